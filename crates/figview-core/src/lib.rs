//! figview core library
//!
//! Node model, document locator, viewport and the asynchronous resolvers that
//! feed image and font data into a rendered design document.

pub mod fetch;
pub mod locator;
pub mod node;
pub mod resolve;
pub mod resources;
pub mod viewport;

pub use fetch::{AssetFetcher, Credential, FetchKind, FetchRequest, Fetched, GatewayError, GatewayResult};
pub use locator::{LocateError, LocateResult, LocatedDocument, Selection, locate};
pub use node::{BoundingBox, Node, NodeId, NodeKind, Paint};
pub use resolve::{Credentials, FontLoadHandle, FontResolver, ImageReport, ImageResolver};
pub use resources::{
    FontKey, FontLoadState, FontSnapshot, FontStates, GenerationTag, Generations, ImageAsset, ImageKey,
    ImageMap, ResourceError, ResourceEvent, resource_events,
};
pub use viewport::Viewport;
