//! Drives a render session: locate, first paint, resolve in the background.

use std::sync::Arc;

use serde_json::Value;

use figview_core::fetch::AssetFetcher;
use figview_core::locator::{LocateResult, Selection, locate};
use figview_core::node::{Node, NodeId};
use figview_core::resolve::{
    Credentials, FontResolver, FontResolverConfig, ImageResolver, ImageResolverConfig,
};
use figview_core::resources::{
    FontStates, GenerationTag, ImageMap, ResourceEventReceiver, ResourceEventSender,
    resource_events,
};

use crate::scene_graph::{RenderOptions, ResourceRequest};
use crate::session::RenderSession;

/// Settings for a [`Viewer`].
#[derive(Debug, Clone, Default)]
pub struct ViewerConfig {
    pub render: RenderOptions,
    pub images: ImageResolverConfig,
    pub fonts: FontResolverConfig,
}

impl ViewerConfig {
    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        self.render = options;
        self
    }

    pub fn with_image_config(mut self, config: ImageResolverConfig) -> Self {
        self.images = config;
        self
    }

    pub fn with_font_config(mut self, config: FontResolverConfig) -> Self {
        self.fonts = config;
        self
    }
}

/// One open document with its resolvers.
///
/// The first paint is available right after [`Viewer::open`]. Call
/// [`Viewer::start`] from within a tokio runtime to resolve resources, then
/// [`Viewer::pump`] or [`Viewer::next_update`] to fold completions in.
pub struct Viewer {
    session: RenderSession,
    selection: Selection,
    image_resolver: ImageResolver,
    font_resolver: FontResolver,
    credentials: Option<Credentials>,
    events_tx: ResourceEventSender,
    events: ResourceEventReceiver,
}

impl Viewer {
    /// Locate the root in `payload` and paint it once.
    pub fn open(
        payload: &Value,
        target: Option<&str>,
        fetcher: Arc<dyn AssetFetcher>,
        credentials: Option<Credentials>,
        config: ViewerConfig,
    ) -> LocateResult<Self> {
        let located = locate(payload, target)?;
        log::info!("Opened document root '{}' ({:?})", located.root.id, located.path);

        let images = ImageMap::new();
        images.extend(located.embedded_images);
        let fonts = FontStates::new();
        let (events_tx, events) = resource_events();

        let session = RenderSession::new(located.root, images.clone(), fonts.clone(), config.render);
        let generations = session.generations().clone();
        let image_resolver = ImageResolver::new(Arc::clone(&fetcher), images, generations.clone())
            .with_config(config.images);
        let font_resolver = FontResolver::new(fetcher, fonts, generations, events_tx.clone())
            .with_config(config.fonts);

        Ok(Self {
            session,
            selection: located.path,
            image_resolver,
            font_resolver,
            credentials,
            events_tx,
            events,
        })
    }

    pub fn session(&self) -> &RenderSession {
        &self.session
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn generation(&self) -> GenerationTag {
        self.session.generation()
    }

    /// Dispatch every pending resource request.
    ///
    /// Fonts load per family and weight set; images resolve once per call for the whole
    /// tree. Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        let requests = self.session.take_requests();
        let mut wants_images = false;
        for request in requests {
            match request {
                ResourceRequest::Font(key) => {
                    self.font_resolver.load_key(key);
                }
                ResourceRequest::Image(_) => wants_images = true,
            }
        }
        if !wants_images {
            return;
        }

        let resolver = self.image_resolver.clone();
        let root = self.session.root().clone();
        let credentials = self.credentials.clone();
        let generation = self.session.generation();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let report = resolver
                .resolve(&root, credentials.as_ref(), generation, &events)
                .await;
            log::debug!(
                "Image resolve finished: {} resolved, {} failed",
                report.resolved.len(),
                report.errors.len()
            );
        });
    }

    /// Apply every completion received so far.
    pub fn pump(&mut self) -> Vec<NodeId> {
        let touched = self.session.pump(&mut self.events);
        self.dispatch_followups();
        touched
    }

    /// Wait for the next completion, then apply everything queued.
    ///
    /// Returns `None` once no resolver can publish anymore.
    pub async fn next_update(&mut self) -> Option<Vec<NodeId>> {
        let event = self.events.recv().await?;
        let mut touched = self.session.apply(event);
        for id in self.session.pump(&mut self.events) {
            if !touched.contains(&id) {
                touched.push(id);
            }
        }
        self.dispatch_followups();
        Some(touched)
    }

    /// Render a new root under a fresh generation and start resolving it.
    ///
    /// Outside a tokio runtime the requests stay queued for the next
    /// [`Viewer::start`].
    pub fn replace_root(&mut self, root: Node) -> GenerationTag {
        let generation = self.session.replace_root(root);
        self.dispatch_followups();
        generation
    }

    // Re-paints can surface requests that the first pass did not see.
    fn dispatch_followups(&mut self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            self.start();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::FillLayer;
    use figview_core::fetch::MemoryFetcher;
    use figview_core::resolve::fonts::DEFAULT_STYLESHEET_BASE;
    use figview_core::resources::ImageKey;
    use serde_json::json;
    use std::time::Duration;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
    const TTF: &[u8] = &[0x00, 0x01, 0x00, 0x00, 0, 0, 0, 0];

    fn payload() -> Value {
        json!({
            "nodes": {
                "1:1": {"document": {
                    "id": "1:1", "type": "FRAME", "name": "Landing",
                    "absoluteBoundingBox": {"x": 0, "y": 0, "width": 400, "height": 300},
                    "children": [
                        {"id": "1:2", "type": "RECTANGLE",
                         "absoluteBoundingBox": {"x": 10, "y": 10, "width": 50, "height": 50},
                         "fills": [{"type": "IMAGE", "imageRef": "hero"}]},
                        {"id": "1:3", "type": "TEXT", "characters": "Hi",
                         "absoluteBoundingBox": {"x": 10, "y": 100, "width": 50, "height": 20},
                         "style": {"fontFamily": "Brand Sans", "fontSize": 14}}
                    ]
                }},
                "2:2": {"document": {
                    "id": "2:2", "type": "FRAME", "name": "Other",
                    "absoluteBoundingBox": {"x": 0, "y": 0, "width": 10, "height": 10}
                }}
            }
        })
    }

    fn fetcher() -> Arc<MemoryFetcher> {
        let stylesheet = format!("{}?family=Brand+Sans:wght@400&display=swap", DEFAULT_STYLESHEET_BASE);
        Arc::new(
            MemoryFetcher::new()
                .with_json(
                    "https://api.figma.com/v1/files/FILE/images",
                    json!({"meta": {"images": {"hero": "https://s3-alpha.figma.com/hero.png"}}}),
                )
                .with_bytes("https://s3-alpha.figma.com/hero.png", PNG, "image/png")
                .with_bytes(
                    stylesheet,
                    "@font-face { src: url(https://fonts.gstatic.com/s/brand.ttf) format('truetype'); }",
                    "text/css",
                )
                .with_bytes("https://fonts.gstatic.com/s/brand.ttf", TTF, "font/ttf"),
        )
    }

    #[test]
    fn test_open_paints_fallbacks_first() {
        let viewer = Viewer::open(
            &payload(),
            Some("Landing"),
            fetcher(),
            None,
            ViewerConfig::default(),
        )
        .unwrap();
        assert_eq!(viewer.selection(), &Selection::NamedMatch { key: "1:1".into() });
        let tree = viewer.session().tree();
        assert!(tree.children[0].fills[0].is_placeholder());
        assert!(tree.children[1].text.as_ref().unwrap().uses_fallback);
    }

    #[test]
    fn test_replace_root_without_runtime_keeps_requests() {
        let mut viewer = Viewer::open(
            &payload(),
            Some("Landing"),
            fetcher(),
            None,
            ViewerConfig::default(),
        )
        .unwrap();
        let old = viewer.generation();
        let root = viewer.session().root().clone();

        let new = viewer.replace_root(root);
        assert!(new > old);
        assert_eq!(viewer.session.take_requests().len(), 2);
    }

    #[test]
    fn test_open_seeds_embedded_images() {
        let payload = json!({
            "root": {
                "id": "1", "type": "FRAME",
                "absoluteBoundingBox": {"x": 0, "y": 0, "width": 10, "height": 10},
                "fills": [{"type": "IMAGE", "imageRef": "inline"}]
            },
            "images": {"inline": "iVBORw0KGgo="}
        });
        let mut viewer = Viewer::open(&payload, None, fetcher(), None, ViewerConfig::default()).unwrap();
        assert!(matches!(viewer.session().tree().fills[0], FillLayer::Image { .. }));
        assert!(viewer.session.take_requests().is_empty());
    }

    #[tokio::test]
    async fn test_resources_land_incrementally() {
        let fetcher = fetcher();
        let mut viewer = Viewer::open(
            &payload(),
            Some("Landing"),
            fetcher.clone(),
            Some(Credentials::new("FILE", "figd_token")),
            ViewerConfig::default(),
        )
        .unwrap();
        viewer.start();

        let mut touched = Vec::new();
        while touched.len() < 2 {
            let update = tokio::time::timeout(Duration::from_secs(5), viewer.next_update())
                .await
                .unwrap()
                .unwrap();
            for id in update {
                if !touched.contains(&id) {
                    touched.push(id);
                }
            }
        }
        touched.sort();
        assert_eq!(touched, vec!["1:2".to_string(), "1:3".to_string()]);

        let tree = viewer.session().tree();
        assert!(matches!(tree.children[0].fills[0], FillLayer::Image { .. }));
        let text = tree.children[1].text.as_ref().unwrap();
        assert_eq!(text.family, "Brand Sans");
        assert!(viewer.session().images().contains(&ImageKey::new("hero")));
        assert_eq!(fetcher.call_count("https://s3-alpha.figma.com/hero.png"), 1);
    }

    #[tokio::test]
    async fn test_without_credentials_images_stay_fallback() {
        let fetcher = fetcher();
        let mut viewer = Viewer::open(&payload(), None, fetcher.clone(), None, ViewerConfig::default())
            .unwrap();
        viewer.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        viewer.pump();
        assert!(viewer.session().tree().children[0].fills[0].is_placeholder());
        assert_eq!(fetcher.call_count("https://api.figma.com/v1/files/FILE/images"), 0);
    }
}
