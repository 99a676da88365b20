//! Selects the node to render from an exported payload.
//!
//! Accepted shapes:
//! - file exports: `{ "document": { ... } }`
//! - a bare node: `{ "id": ..., "type": ..., ... }`
//! - node exports: `{ "nodes": { "<key>": { "document": { ... } } } }`
//! - plugin exports: `{ "nodes": [ ... ], "images": { "<ref>": "<base64>" } }`
//!   or `{ "root": { ... }, "images": { ... } }`

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::node::Node;
use crate::resources::{ImageAsset, ImageKey};

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("No renderable document found in payload")]
    NoDocumentFound,

    #[error("Node '{key}' is not a valid document node: {reason}")]
    InvalidNode { key: String, reason: String },
}

pub type LocateResult<T> = Result<T, LocateError>;

/// How the root was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The payload carried a single document or node.
    DirectRoot,
    /// A node whose name equals the requested target.
    NamedMatch { key: String },
    /// First page/canvas/frame; no target was requested.
    FirstFrame { key: String },
    /// First page/canvas/frame, because `requested` matched nothing.
    FallbackFrame { key: String, requested: String },
}

#[derive(Debug, Clone)]
pub struct LocatedDocument {
    pub root: Node,
    pub path: Selection,
    /// Images shipped inline with plugin exports, for pre-seeding the ImageMap.
    pub embedded_images: Vec<(ImageKey, ImageAsset)>,
}

/// Pick the root node of `payload`, preferring a node named `target`.
pub fn locate(payload: &Value, target: Option<&str>) -> LocateResult<LocatedDocument> {
    let embedded_images = payload
        .get("images")
        .and_then(Value::as_object)
        .map(decode_embedded_images)
        .unwrap_or_default();

    if let Some(document) = payload.get("document").filter(|d| d.is_object()) {
        let root = parse_node("document", document)?;
        return Ok(LocatedDocument {
            root,
            path: Selection::DirectRoot,
            embedded_images,
        });
    }

    if is_bare_node(payload) {
        let root = parse_node("root", payload)?;
        return Ok(LocatedDocument {
            root,
            path: Selection::DirectRoot,
            embedded_images,
        });
    }

    let candidates = collect_candidates(payload);
    let target = target.map(str::trim).filter(|t| !t.is_empty());

    if let Some(requested) = target {
        if let Some((key, document)) = candidates
            .iter()
            .find(|(_, document)| node_name(document) == Some(requested))
        {
            log::debug!("Located node '{}' by name '{}'", key, requested);
            return Ok(LocatedDocument {
                root: parse_node(key, document)?,
                path: Selection::NamedMatch { key: key.clone() },
                embedded_images,
            });
        }
    }

    let (key, document) = candidates
        .iter()
        .find(|(_, document)| is_root_candidate(document))
        .ok_or(LocateError::NoDocumentFound)?;

    let path = match target {
        Some(requested) => {
            log::warn!(
                "No node named '{}' in payload, falling back to '{}'",
                requested,
                key
            );
            Selection::FallbackFrame {
                key: key.clone(),
                requested: requested.to_string(),
            }
        }
        None => Selection::FirstFrame { key: key.clone() },
    };

    Ok(LocatedDocument {
        root: parse_node(key, document)?,
        path,
        embedded_images,
    })
}

fn parse_node(key: &str, value: &Value) -> LocateResult<Node> {
    Node::from_json(value).map_err(|err| LocateError::InvalidNode {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

fn is_bare_node(value: &Value) -> bool {
    value.get("id").is_some() && value.get("type").and_then(Value::as_str).is_some()
}

fn node_name(value: &Value) -> Option<&str> {
    value.get("name").and_then(Value::as_str)
}

fn is_root_candidate(value: &Value) -> bool {
    matches!(
        value.get("type").and_then(Value::as_str),
        Some("PAGE" | "CANVAS" | "FRAME")
    )
}

/// Candidate documents in payload order, keyed by export key or node id.
fn collect_candidates(payload: &Value) -> Vec<(String, &Value)> {
    let mut candidates = Vec::new();
    match payload.get("nodes") {
        Some(Value::Object(nodes)) => {
            for (key, entry) in nodes {
                if let Some(document) = entry_document(entry) {
                    candidates.push((key.clone(), document));
                }
            }
        }
        Some(Value::Array(nodes)) => {
            for (index, entry) in nodes.iter().enumerate() {
                if let Some(document) = entry_document(entry) {
                    let key = document
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| index.to_string());
                    candidates.push((key, document));
                }
            }
        }
        _ => {}
    }
    if let Some(root) = payload.get("root").and_then(entry_document) {
        let key = root
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("root")
            .to_string();
        candidates.push((key, root));
    }
    candidates
}

fn entry_document(entry: &Value) -> Option<&Value> {
    match entry.get("document") {
        Some(document) if document.is_object() => Some(document),
        _ if is_bare_node(entry) => Some(entry),
        _ => None,
    }
}

fn decode_embedded_images(images: &Map<String, Value>) -> Vec<(ImageKey, ImageAsset)> {
    images
        .iter()
        .filter_map(|(reference, value)| {
            let encoded = value.as_str()?;
            match decode_embedded_image(encoded) {
                Some(asset) => Some((ImageKey::new(reference.clone()), asset)),
                None => {
                    log::warn!("Skipping undecodable embedded image '{}'", reference);
                    None
                }
            }
        })
        .collect()
}

/// Decode a base64 string or a `data:<type>;base64,<payload>` URL.
fn decode_embedded_image(encoded: &str) -> Option<ImageAsset> {
    let (declared_type, payload) = match encoded.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',')?;
            let media_type = header.strip_suffix(";base64")?;
            let media_type = (!media_type.is_empty()).then(|| media_type.to_string());
            (media_type, payload)
        }
        None => (None, encoded),
    };

    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(cleaned).ok()?;
    if bytes.is_empty() {
        return None;
    }
    let content_type = declared_type.or_else(|| sniff_image_type(&bytes).map(str::to_string));
    Some(ImageAsset::new(bytes, content_type))
}

/// Media type from the leading magic bytes of common raster formats.
pub fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}
