//! Asynchronous resolvers that populate shared resource state.

pub mod fonts;
pub mod images;

pub use fonts::{FontFormat, FontLoadHandle, FontResolver, FontResolverConfig, stylesheet_font_urls};
pub use images::{Credentials, ImageReport, ImageResolver, ImageResolverConfig};
