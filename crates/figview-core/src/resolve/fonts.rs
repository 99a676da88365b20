//! Loads web fonts for the families used by text nodes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use cssparser::{ParseError, Parser, ParserInput, Token};
use tokio::sync::watch;

use crate::fetch::{AssetFetcher, FetchRequest};
use crate::resources::{
    FontFace, FontKey, FontLoadState, FontStates, Generations, ResourceEvent, ResourceEventSender,
};

/// Default web font stylesheet endpoint.
pub const DEFAULT_STYLESHEET_BASE: &str = "https://fonts.googleapis.com/css2";

/// Weight loaded when a key names none.
pub const DEFAULT_WEIGHT: u16 = 400;

/// Upper bound on font files fetched for one key.
pub const DEFAULT_MAX_FACES: usize = 16;

#[derive(Debug, Clone)]
pub struct FontResolverConfig {
    pub stylesheet_base: String,
    pub max_faces: usize,
}

impl Default for FontResolverConfig {
    fn default() -> Self {
        Self {
            stylesheet_base: DEFAULT_STYLESHEET_BASE.to_string(),
            max_faces: DEFAULT_MAX_FACES,
        }
    }
}

impl FontResolverConfig {
    pub fn with_stylesheet_base(mut self, base: impl Into<String>) -> Self {
        self.stylesheet_base = base.into();
        self
    }

    /// Stylesheet URL for `key`, e.g. `...css2?family=Open+Sans:wght@400;700&display=swap`.
    pub fn stylesheet_url(&self, key: &FontKey) -> String {
        let family: String = url::form_urlencoded::byte_serialize(key.family.as_bytes()).collect();
        let weights = if key.weights.is_empty() {
            DEFAULT_WEIGHT.to_string()
        } else {
            key.weights
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(";")
        };
        format!(
            "{}?family={}:wght@{}&display=swap",
            self.stylesheet_base, family, weights
        )
    }
}

/// Container format of a font binary, from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontFormat {
    TrueType,
    OpenType,
    Collection,
    Woff,
    Woff2,
}

impl FontFormat {
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        match data.get(..4)? {
            [0x00, 0x01, 0x00, 0x00] | b"true" => Some(FontFormat::TrueType),
            b"OTTO" => Some(FontFormat::OpenType),
            b"ttcf" => Some(FontFormat::Collection),
            b"wOFF" => Some(FontFormat::Woff),
            b"wOF2" => Some(FontFormat::Woff2),
            _ => None,
        }
    }

    /// Whether the bytes are an uncompressed sfnt a text shaper can read directly.
    pub fn is_sfnt(self) -> bool {
        matches!(
            self,
            FontFormat::TrueType | FontFormat::OpenType | FontFormat::Collection
        )
    }
}

/// Every distinct `url(...)` target in a stylesheet, in order.
///
/// Comments and string literals are tokenized away, so a `url(` inside
/// either is not a target.
pub fn stylesheet_font_urls(css: &str) -> Vec<String> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut urls = Vec::new();
    collect_urls(&mut parser, &mut urls);
    urls
}

fn collect_urls(parser: &mut Parser, urls: &mut Vec<String>) {
    while let Ok(token) = parser.next() {
        match token.clone() {
            Token::UnquotedUrl(url) => push_url(urls, url.as_ref()),
            Token::Function(name) if name.eq_ignore_ascii_case("url") => {
                let _: Result<(), ParseError<'_, ()>> = parser.parse_nested_block(|nested| {
                    let target = nested.expect_string()?.clone();
                    push_url(urls, target.as_ref());
                    Ok(())
                });
            }
            Token::Function(_)
            | Token::ParenthesisBlock
            | Token::SquareBracketBlock
            | Token::CurlyBracketBlock => {
                let _: Result<(), ParseError<'_, ()>> = parser.parse_nested_block(|nested| {
                    collect_urls(nested, urls);
                    Ok(())
                });
            }
            _ => {}
        }
    }
}

fn push_url(urls: &mut Vec<String>, target: &str) {
    let target = target.trim();
    if !target.is_empty() && !urls.iter().any(|u| u == target) {
        urls.push(target.to_string());
    }
}

/// Observes the load state of one [`FontKey`].
#[derive(Debug, Clone)]
pub struct FontLoadHandle {
    key: FontKey,
    rx: watch::Receiver<FontLoadState>,
}

impl FontLoadHandle {
    pub fn family(&self) -> &str {
        &self.key.family
    }

    pub fn key(&self) -> &FontKey {
        &self.key
    }

    pub fn state(&self) -> FontLoadState {
        self.rx.borrow().clone()
    }

    /// Wait until the load reaches `Loaded` or `Error`.
    pub async fn settled(&mut self) -> FontLoadState {
        let settled = self
            .rx
            .wait_for(FontLoadState::is_terminal)
            .await
            .map(|state| state.clone());
        match settled {
            Ok(state) => state,
            Err(_) => self.rx.borrow().clone(),
        }
    }
}

type InflightLoads = HashMap<FontKey, watch::Receiver<FontLoadState>>;

/// Fetches font stylesheets and files.
///
/// Loads are coalesced per [`FontKey`]; a key overlapping loads already in
/// flight only fetches the weights nobody has requested yet.
#[derive(Clone)]
pub struct FontResolver {
    fetcher: Arc<dyn AssetFetcher>,
    fonts: FontStates,
    generations: Generations,
    events: ResourceEventSender,
    config: FontResolverConfig,
    inflight: Arc<Mutex<InflightLoads>>,
}

impl FontResolver {
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        fonts: FontStates,
        generations: Generations,
        events: ResourceEventSender,
    ) -> Self {
        Self {
            fetcher,
            fonts,
            generations,
            events,
            config: FontResolverConfig::default(),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_config(mut self, config: FontResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fonts(&self) -> &FontStates {
        &self.fonts
    }

    /// Start loading `family` at `weights` (or join the loads already running).
    ///
    /// Must be called from within a tokio runtime.
    pub fn load(&self, family: &str, weights: impl IntoIterator<Item = u16>) -> FontLoadHandle {
        self.load_key(FontKey::new(family, weights))
    }

    pub fn load_key(&self, key: FontKey) -> FontLoadHandle {
        let key = if key.weights.is_empty() {
            FontKey::new(key.family, [DEFAULT_WEIGHT])
        } else {
            key
        };

        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = inflight.get(&key) {
            log::debug!("Joining font load for '{}'", key);
            return FontLoadHandle {
                key,
                rx: rx.clone(),
            };
        }

        let mut pending: Vec<watch::Receiver<FontLoadState>> = inflight
            .iter()
            .filter(|(other, _)| {
                other.family == key.family && other.weights.iter().any(|w| key.weights.contains(w))
            })
            .map(|(_, rx)| rx.clone())
            .collect();

        let missing = self.fonts.unrequested_weights(&key);
        if !missing.is_empty() {
            let fetch_key = FontKey::new(key.family.clone(), missing);
            let rx = self.spawn_fetch(&mut inflight, fetch_key.clone());
            if fetch_key == key {
                return FontLoadHandle { key, rx };
            }
            pending.push(rx);
        }
        drop(inflight);

        if pending.is_empty() {
            let (_tx, rx) = watch::channel(self.fonts.key_state(&key));
            return FontLoadHandle { key, rx };
        }

        // The key spans several loads: settle once all of them have.
        let (tx, rx) = watch::channel(FontLoadState::Loading);
        let fonts = self.fonts.clone();
        let combined = key.clone();
        tokio::spawn(async move {
            for mut load in pending {
                let _ = load.wait_for(FontLoadState::is_terminal).await;
            }
            tx.send_replace(fonts.key_state(&combined));
        });
        FontLoadHandle { key, rx }
    }

    fn spawn_fetch(
        &self,
        inflight: &mut InflightLoads,
        key: FontKey,
    ) -> watch::Receiver<FontLoadState> {
        let (tx, rx) = watch::channel(FontLoadState::Loading);
        inflight.insert(key.clone(), rx.clone());
        self.transition(&key, FontLoadState::Loading);

        let resolver = self.clone();
        tokio::spawn(async move {
            let state = match resolver.fetch_faces(&key).await {
                Ok(count) => {
                    log::info!("Loaded {} face(s) for font '{}'", count, key);
                    FontLoadState::Loaded
                }
                Err(reason) => {
                    log::warn!("Font '{}' failed to load: {}", key, reason);
                    FontLoadState::Error(reason)
                }
            };
            resolver.transition(&key, state.clone());
            tx.send_replace(state);
            resolver
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        });
        rx
    }

    /// Start loads for every family a tree uses.
    pub fn load_all(&self, keys: impl IntoIterator<Item = FontKey>) -> Vec<FontLoadHandle> {
        keys.into_iter().map(|key| self.load_key(key)).collect()
    }

    fn transition(&self, key: &FontKey, state: FontLoadState) {
        if self.fonts.advance(key, state.clone()) {
            // Fonts are document independent, so the event is addressed to
            // whichever tree is live when it lands.
            let _ = self.events.send(ResourceEvent::FontState {
                generation: self.generations.current(),
                key: key.clone(),
                state,
            });
        }
    }

    /// Fetch the stylesheet and every face it lists. Returns the face count.
    async fn fetch_faces(&self, key: &FontKey) -> Result<usize, String> {
        let stylesheet_url = self.config.stylesheet_url(key);
        let (css, _) = self
            .fetcher
            .fetch(FetchRequest::stylesheet(stylesheet_url))
            .await
            .and_then(|fetched| fetched.into_bytes())
            .map_err(|err| err.to_string())?;
        let css = String::from_utf8_lossy(&css);

        let urls = stylesheet_font_urls(&css);
        if urls.is_empty() {
            return Err("stylesheet lists no font files".to_string());
        }

        let mut loaded = 0;
        let mut last_error = None;
        for url in urls.into_iter().take(self.config.max_faces) {
            let outcome = self
                .fetcher
                .fetch(FetchRequest::font_file(url.clone()))
                .await
                .and_then(|fetched| fetched.into_bytes());
            match outcome {
                Ok((data, _)) => match FontFormat::from_magic_bytes(&data) {
                    Some(format) => {
                        log::debug!("Font '{}' face {:?} from {}", key.family, format, url);
                        self.fonts.add_face(FontFace {
                            family: key.family.clone(),
                            data,
                        });
                        loaded += 1;
                    }
                    None => last_error = Some(format!("unrecognised font data at {url}")),
                },
                Err(err) => last_error = Some(err.to_string()),
            }
        }

        if loaded == 0 {
            return Err(last_error.unwrap_or_else(|| "no font faces loaded".to_string()));
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use crate::resources::resource_events;
    use std::time::Duration;

    const CSS_URL: &str =
        "https://fonts.googleapis.com/css2?family=Brand+Sans:wght@400;700&display=swap";
    const FACE_URL: &str = "https://fonts.gstatic.com/s/brandsans/v1/regular.ttf";

    fn stylesheet() -> String {
        format!(
            "@font-face {{ font-family: 'Brand Sans'; font-weight: 400; src: url({FACE_URL}) format('truetype'); }}"
        )
    }

    fn ttf() -> Vec<u8> {
        let mut data = vec![0x00, 0x01, 0x00, 0x00];
        data.extend_from_slice(&[0; 12]);
        data
    }

    #[test]
    fn test_stylesheet_url() {
        let config = FontResolverConfig::default();
        let key = FontKey::new("Brand Sans", [700, 400]);
        assert_eq!(config.stylesheet_url(&key), CSS_URL);
    }

    #[test]
    fn test_stylesheet_url_parsing() {
        let css = "src: url(https://a/x.woff2) format('woff2');\nsrc: url('https://a/y.ttf');\nsrc: url(https://a/x.woff2);";
        assert_eq!(
            stylesheet_font_urls(css),
            vec!["https://a/x.woff2".to_string(), "https://a/y.ttf".to_string()]
        );
    }

    #[test]
    fn test_stylesheet_url_parsing_skips_comments_and_strings() {
        let css = r#"
            /* src: url(https://evil/commented.ttf); */
            @font-face {
                font-family: "url(https://evil/in-string.ttf)";
                src: url(https://a/b\)c.ttf) format("truetype"), URL("https://a/upper.woff2");
            }
            @media (min-width: 1px) { .x { background: url(https://a/nested.png) } }
        "#;
        assert_eq!(
            stylesheet_font_urls(css),
            vec![
                "https://a/b)c.ttf".to_string(),
                "https://a/upper.woff2".to_string(),
                "https://a/nested.png".to_string(),
            ]
        );
    }

    #[test]
    fn test_magic_bytes() {
        assert_eq!(FontFormat::from_magic_bytes(&ttf()), Some(FontFormat::TrueType));
        assert_eq!(FontFormat::from_magic_bytes(b"OTTO...."), Some(FontFormat::OpenType));
        assert_eq!(FontFormat::from_magic_bytes(b"wOF2...."), Some(FontFormat::Woff2));
        assert_eq!(FontFormat::from_magic_bytes(b"<htm"), None);
        assert_eq!(FontFormat::from_magic_bytes(b"ab"), None);
        assert!(!FontFormat::Woff2.is_sfnt());
    }

    #[tokio::test]
    async fn test_load_reaches_loaded() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_bytes(CSS_URL, stylesheet().into_bytes(), "text/css")
                .with_bytes(FACE_URL, ttf(), "font/ttf"),
        );
        let (tx, mut rx) = resource_events();
        let resolver = FontResolver::new(fetcher, FontStates::new(), Generations::new(), tx);
        let mut handle = resolver.load("Brand Sans", [400, 700]);
        assert_eq!(handle.settled().await, FontLoadState::Loaded);
        assert_eq!(resolver.fonts().state("Brand Sans", 700), FontLoadState::Loaded);
        assert_eq!(resolver.fonts().face_count(), 1);

        let mut states = Vec::new();
        while let Ok(ResourceEvent::FontState { state, .. }) = rx.try_recv() {
            states.push(state);
        }
        assert_eq!(states, vec![FontLoadState::Loading, FontLoadState::Loaded]);
    }

    #[tokio::test]
    async fn test_requests_are_coalesced() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_delay(Duration::from_millis(10))
                .with_bytes(CSS_URL, stylesheet().into_bytes(), "text/css")
                .with_bytes(FACE_URL, ttf(), "font/ttf"),
        );
        let (tx, _rx) = resource_events();
        let resolver = FontResolver::new(fetcher.clone(), FontStates::new(), Generations::new(), tx);
        let mut first = resolver.load("Brand Sans", [400, 700]);
        let mut second = resolver.load("Brand Sans", [400, 700]);
        assert_eq!(first.settled().await, FontLoadState::Loaded);
        assert_eq!(second.settled().await, FontLoadState::Loaded);
        assert_eq!(fetcher.call_count(CSS_URL), 1);
        assert_eq!(fetcher.call_count(FACE_URL), 1);

        // A settled weight answers immediately without refetching.
        let third = resolver.load("Brand Sans", [400]);
        assert_eq!(third.state(), FontLoadState::Loaded);
        assert_eq!(fetcher.call_count(CSS_URL), 1);
    }

    #[tokio::test]
    async fn test_new_weight_of_loaded_family_is_fetched() {
        let regular_css = "https://fonts.googleapis.com/css2?family=Brand+Sans:wght@400&display=swap";
        let bold_css = "https://fonts.googleapis.com/css2?family=Brand+Sans:wght@700&display=swap";
        let bold_face = "https://fonts.gstatic.com/s/brandsans/v1/bold.ttf";
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_bytes(regular_css, stylesheet().into_bytes(), "text/css")
                .with_bytes(FACE_URL, ttf(), "font/ttf")
                .with_bytes(
                    bold_css,
                    format!("@font-face {{ font-weight: 700; src: url({bold_face}); }}").into_bytes(),
                    "text/css",
                )
                .with_bytes(bold_face, ttf(), "font/ttf"),
        );
        let (tx, mut rx) = resource_events();
        let resolver = FontResolver::new(fetcher.clone(), FontStates::new(), Generations::new(), tx);

        let mut regular = resolver.load("Brand Sans", [400]);
        assert_eq!(regular.settled().await, FontLoadState::Loaded);
        assert_eq!(resolver.fonts().state("Brand Sans", 700), FontLoadState::NotRequested);

        let mut bold = resolver.load("Brand Sans", [700]);
        assert_eq!(bold.settled().await, FontLoadState::Loaded);
        assert_eq!(fetcher.call_count(bold_css), 1);
        assert_eq!(fetcher.call_count(bold_face), 1);
        assert_eq!(resolver.fonts().face_count(), 2);

        // Both weights together only need what is already there.
        let both = resolver.load("Brand Sans", [400, 700]);
        assert_eq!(both.state(), FontLoadState::Loaded);
        assert_eq!(fetcher.call_count(regular_css), 1);
        assert_eq!(fetcher.call_count(bold_css), 1);

        let mut keys = Vec::new();
        while let Ok(ResourceEvent::FontState { key, state, .. }) = rx.try_recv() {
            if state.is_loaded() {
                keys.push(key);
            }
        }
        assert_eq!(
            keys,
            vec![FontKey::new("Brand Sans", [400]), FontKey::new("Brand Sans", [700])]
        );
    }

    #[tokio::test]
    async fn test_overlapping_key_waits_for_running_load() {
        let regular_css = "https://fonts.googleapis.com/css2?family=Brand+Sans:wght@400&display=swap";
        let bold_css = "https://fonts.googleapis.com/css2?family=Brand+Sans:wght@700&display=swap";
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_delay(Duration::from_millis(10))
                .with_bytes(regular_css, stylesheet().into_bytes(), "text/css")
                .with_bytes(FACE_URL, ttf(), "font/ttf"),
        );
        let (tx, _rx) = resource_events();
        let resolver = FontResolver::new(fetcher.clone(), FontStates::new(), Generations::new(), tx);

        let mut regular = resolver.load("Brand Sans", [400]);
        let mut both = resolver.load("Brand Sans", [400, 700]);
        assert_eq!(both.state(), FontLoadState::Loading);

        assert_eq!(regular.settled().await, FontLoadState::Loaded);
        // 700 has no stylesheet, so the combined key reports the failure.
        assert!(matches!(both.settled().await, FontLoadState::Error(_)));
        assert_eq!(fetcher.call_count(regular_css), 1);
        assert_eq!(fetcher.call_count(bold_css), 1);
        assert!(resolver.fonts().state("Brand Sans", 400).is_loaded());
    }

    #[tokio::test]
    async fn test_missing_stylesheet_is_error() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let (tx, _rx) = resource_events();
        let resolver = FontResolver::new(fetcher, FontStates::new(), Generations::new(), tx);
        let mut handle = resolver.load("Brand Sans", [400, 700]);
        match handle.settled().await {
            FontLoadState::Error(reason) => assert!(reason.contains("404")),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_font_data_is_error() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_bytes(CSS_URL, stylesheet().into_bytes(), "text/css")
                .with_bytes(FACE_URL, &b"<html>not a font</html>"[..], "text/html"),
        );
        let (tx, _rx) = resource_events();
        let resolver = FontResolver::new(fetcher, FontStates::new(), Generations::new(), tx);
        let mut handle = resolver.load("Brand Sans", [400, 700]);
        match handle.settled().await {
            FontLoadState::Error(reason) => assert!(reason.contains("unrecognised")),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(resolver.fonts().face_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_stylesheet_is_error() {
        let fetcher = Arc::new(
            MemoryFetcher::new().with_bytes(CSS_URL, &b"/* nothing */"[..], "text/css"),
        );
        let (tx, _rx) = resource_events();
        let resolver = FontResolver::new(fetcher, FontStates::new(), Generations::new(), tx);
        let mut handle = resolver.load("Brand Sans", [400, 700]);
        assert!(matches!(handle.settled().await, FontLoadState::Error(_)));
    }
}
