//! Resolved resource state and the events that announce changes to it.

mod font_states;
mod image_map;

pub use font_states::{FontFace, FontKey, FontLoadState, FontSnapshot, FontStates};
pub use image_map::{ImageAsset, ImageKey, ImageMap};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;

/// Identifies one live tree. Bumped whenever the root is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GenerationTag(pub u64);

/// Shared generation counter.
///
/// Resolvers hold a clone and check `is_current` before writing shared state,
/// so work for a superseded tree never touches the new one.
#[derive(Debug, Clone, Default)]
pub struct Generations {
    current: Arc<AtomicU64>,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> GenerationTag {
        GenerationTag(self.current.load(Ordering::Acquire))
    }

    /// Supersede the current generation and return the new tag.
    pub fn advance(&self) -> GenerationTag {
        GenerationTag(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn is_current(&self, tag: GenerationTag) -> bool {
        self.current() == tag
    }
}

/// Per-resource failure. Never fatal for the render.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("Image '{key}' failed to load: {reason}")]
    AssetFetchFailed {
        key: ImageKey,
        upstream_status: Option<u16>,
        reason: String,
    },

    #[error("Font '{family}' failed to load: {reason}")]
    FontLoadFailed { family: String, reason: String },
}

/// A resolver completion, tagged with the generation it was started for.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    ImageReady {
        generation: GenerationTag,
        key: ImageKey,
    },
    ImageFailed {
        generation: GenerationTag,
        error: ResourceError,
    },
    FontState {
        generation: GenerationTag,
        key: FontKey,
        state: FontLoadState,
    },
}

impl ResourceEvent {
    pub fn generation(&self) -> GenerationTag {
        match self {
            ResourceEvent::ImageReady { generation, .. }
            | ResourceEvent::ImageFailed { generation, .. }
            | ResourceEvent::FontState { generation, .. } => *generation,
        }
    }
}

pub type ResourceEventSender = mpsc::UnboundedSender<ResourceEvent>;
pub type ResourceEventReceiver = mpsc::UnboundedReceiver<ResourceEvent>;

/// Create the channel resolvers publish completions on.
pub fn resource_events() -> (ResourceEventSender, ResourceEventReceiver) {
    mpsc::unbounded_channel()
}
