//! Resolves image fill references into bytes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::{FutureExt, Shared};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;

use crate::fetch::{AssetFetcher, BoxFuture, Credential, FetchRequest, Fetched, GatewayError};
use crate::node::Node;
use crate::resources::{
    GenerationTag, Generations, ImageAsset, ImageKey, ImageMap, ResourceError, ResourceEvent,
    ResourceEventSender,
};

/// Default REST API origin.
pub const DEFAULT_API_BASE: &str = "https://api.figma.com";

/// Default number of asset fetches in flight per resolve call.
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

#[derive(Debug, Clone)]
pub struct ImageResolverConfig {
    pub api_base: String,
    pub max_concurrent: usize,
    /// Extra attempts after a transient failure.
    pub max_retries: u32,
}

impl Default for ImageResolverConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: 0,
        }
    }
}

impl ImageResolverConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Image-fill URL table of a file.
    pub fn image_fills_url(&self, file_key: &str) -> String {
        format!("{}/v1/files/{}/images", self.api_base, file_key)
    }

    /// Rendered-node URL table, for image paints without a reference.
    pub fn node_renders_url(&self, file_key: &str, node_ids: &[&str]) -> String {
        format!(
            "{}/v1/images/{}?ids={}&format=png",
            self.api_base,
            file_key,
            node_ids.join(",")
        )
    }
}

/// File key and token used to reach the design-tool API.
#[derive(Clone)]
pub struct Credentials {
    pub file_key: String,
    pub access_token: String,
}

impl Credentials {
    pub fn new(file_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            file_key: file_key.into(),
            access_token: access_token.into(),
        }
    }

    pub fn credential(&self) -> Credential {
        Credential::from_token(&self.access_token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("file_key", &self.file_key)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Outcome of one resolve call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageReport {
    pub resolved: Vec<ImageKey>,
    pub errors: Vec<ResourceError>,
    /// Resolution did not run (no credentials).
    pub skipped: bool,
}

impl ImageReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

type FetchOutcome = Result<ImageAsset, ResourceError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Populates the shared [`ImageMap`] from image references in a tree.
///
/// Clones share the in-flight table, so concurrent resolve calls for one key
/// share a single underlying fetch.
#[derive(Clone)]
pub struct ImageResolver {
    fetcher: Arc<dyn AssetFetcher>,
    images: ImageMap,
    generations: Generations,
    config: ImageResolverConfig,
    inflight: Arc<Mutex<HashMap<ImageKey, SharedFetch>>>,
}

impl ImageResolver {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, images: ImageMap, generations: Generations) -> Self {
        Self {
            fetcher,
            images,
            generations,
            config: ImageResolverConfig::default(),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_config(mut self, config: ImageResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn images(&self) -> &ImageMap {
        &self.images
    }

    /// Resolve every unresolved image key in `root`.
    ///
    /// Each success is written to the ImageMap and published as soon as it
    /// lands. Nothing is written once `generation` is superseded.
    pub async fn resolve(
        &self,
        root: &Node,
        credentials: Option<&Credentials>,
        generation: GenerationTag,
        events: &ResourceEventSender,
    ) -> ImageReport {
        let Some(credentials) = credentials else {
            log::debug!("No credentials, keeping fallback fills");
            return ImageReport::skipped();
        };

        let keys: Vec<ImageKey> = root
            .image_refs()
            .into_iter()
            .filter(|key| !self.images.contains(key))
            .collect();
        if keys.is_empty() {
            return ImageReport::default();
        }

        let mut report = ImageReport::default();
        let urls = match self.url_table(&keys, credentials).await {
            Ok(urls) => urls,
            Err(err) => {
                log::warn!("Image URL lookup failed: {}", err);
                for key in keys {
                    let error = fetch_failed(&key, &err);
                    self.publish_failure(generation, events, &mut report, error);
                }
                return report;
            }
        };

        let mut pending = Vec::with_capacity(keys.len());
        for key in keys {
            if self.images.contains(&key) {
                continue;
            }
            match urls.get(&key) {
                Some(url) => {
                    let fetch = self.shared_fetch(key.clone(), url.clone());
                    pending.push(fetch.map(move |outcome| (key, outcome)));
                }
                None => {
                    let error = ResourceError::AssetFetchFailed {
                        key,
                        upstream_status: None,
                        reason: "no URL for image reference".to_string(),
                    };
                    self.publish_failure(generation, events, &mut report, error);
                }
            }
        }

        let mut completions =
            stream::iter(pending).buffer_unordered(self.config.max_concurrent.max(1));
        while let Some((key, outcome)) = completions.next().await {
            if !self.generations.is_current(generation) {
                log::debug!("Dropping image result for superseded {:?}", generation);
                continue;
            }
            match outcome {
                Ok(asset) => {
                    self.images.insert(key.clone(), asset);
                    let _ = events.send(ResourceEvent::ImageReady {
                        generation,
                        key: key.clone(),
                    });
                    report.resolved.push(key);
                }
                Err(error) => self.publish_failure(generation, events, &mut report, error),
            }
        }
        report
    }

    fn publish_failure(
        &self,
        generation: GenerationTag,
        events: &ResourceEventSender,
        report: &mut ImageReport,
        error: ResourceError,
    ) {
        log::warn!("{}", error);
        if self.generations.is_current(generation) {
            let _ = events.send(ResourceEvent::ImageFailed {
                generation,
                error: error.clone(),
            });
        }
        report.errors.push(error);
    }

    /// Map keys to download URLs with at most one API call per table.
    async fn url_table(
        &self,
        keys: &[ImageKey],
        credentials: &Credentials,
    ) -> Result<HashMap<ImageKey, String>, GatewayError> {
        let mut urls = HashMap::new();

        if keys.iter().any(|key| !key.is_synthesized()) {
            let request = FetchRequest::api(
                self.config.image_fills_url(&credentials.file_key),
                credentials.credential(),
            );
            let table = self.fetcher.fetch(request).await?.into_json()?;
            let images = table.pointer("/meta/images").and_then(Value::as_object);
            for key in keys.iter().filter(|key| !key.is_synthesized()) {
                if let Some(url) = images
                    .and_then(|images| images.get(key.as_str()))
                    .and_then(Value::as_str)
                {
                    urls.insert(key.clone(), url.to_string());
                }
            }
        }

        let node_ids: Vec<&str> = keys
            .iter()
            .filter_map(|key| key.as_str().strip_prefix("node:"))
            .collect();
        if !node_ids.is_empty() {
            let request = FetchRequest::api(
                self.config.node_renders_url(&credentials.file_key, &node_ids),
                credentials.credential(),
            );
            let table = self.fetcher.fetch(request).await?.into_json()?;
            let images = table.get("images").and_then(Value::as_object);
            for id in node_ids {
                if let Some(url) = images
                    .and_then(|images| images.get(id))
                    .and_then(Value::as_str)
                {
                    urls.insert(ImageKey::for_node(id), url.to_string());
                }
            }
        }

        Ok(urls)
    }

    /// Join the in-flight fetch for `key`, or start one.
    fn shared_fetch(&self, key: ImageKey, url: String) -> SharedFetch {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inflight.get(&key) {
            log::debug!("Joining in-flight fetch for image '{}'", key);
            return existing.clone();
        }

        let fetcher = Arc::clone(&self.fetcher);
        let table = Arc::clone(&self.inflight);
        let retries = self.config.max_retries;
        let fetch_key = key.clone();
        let future: BoxFuture<'static, FetchOutcome> = Box::pin(async move {
            let outcome = fetch_asset(fetcher.as_ref(), &fetch_key, url, retries).await;
            // Late joiners find successes in the ImageMap; failures may be retried.
            table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&fetch_key);
            outcome
        });
        let shared = future.shared();
        inflight.insert(key, shared.clone());
        shared
    }
}

async fn fetch_asset(
    fetcher: &dyn AssetFetcher,
    key: &ImageKey,
    url: String,
    max_retries: u32,
) -> FetchOutcome {
    let mut attempt = 0;
    loop {
        match fetcher.fetch(FetchRequest::asset(url.clone())).await {
            Ok(Fetched::Bytes {
                bytes,
                content_type,
            }) => {
                log::debug!("Fetched image '{}' ({} bytes)", key, bytes.len());
                return Ok(ImageAsset {
                    bytes,
                    content_type,
                    source_url: Some(url),
                });
            }
            Ok(Fetched::Json(_)) => {
                return Err(ResourceError::AssetFetchFailed {
                    key: key.clone(),
                    upstream_status: None,
                    reason: "expected image bytes, got JSON".to_string(),
                });
            }
            Err(err) if attempt < max_retries && err.is_retryable() => {
                attempt += 1;
                log::debug!("Retrying image '{}' after {} (attempt {})", key, err, attempt);
            }
            Err(err) => return Err(fetch_failed(key, &err)),
        }
    }
}

fn fetch_failed(key: &ImageKey, err: &GatewayError) -> ResourceError {
    ResourceError::AssetFetchFailed {
        key: key.clone(),
        upstream_status: err.upstream_status(),
        reason: err.to_string(),
    }
}
