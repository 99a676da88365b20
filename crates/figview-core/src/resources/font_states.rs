//! Font load state per family and weight, plus the loaded face bytes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A font family together with the weights requested for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FontKey {
    pub family: String,
    /// Sorted and deduplicated.
    pub weights: Vec<u16>,
}

impl FontKey {
    pub fn new(family: impl Into<String>, weights: impl IntoIterator<Item = u16>) -> Self {
        let mut weights: Vec<u16> = weights.into_iter().collect();
        weights.sort_unstable();
        weights.dedup();
        Self {
            family: family.into(),
            weights,
        }
    }
}

impl fmt::Display for FontKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let weights: Vec<String> = self.weights.iter().map(u16::to_string).collect();
        write!(f, "{}:{}", self.family, weights.join(";"))
    }
}

/// Load state of one font weight. Only moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FontLoadState {
    #[default]
    NotRequested,
    Loading,
    Loaded,
    Error(String),
}

impl FontLoadState {
    fn rank(&self) -> u8 {
        match self {
            FontLoadState::NotRequested => 0,
            FontLoadState::Loading => 1,
            FontLoadState::Loaded | FontLoadState::Error(_) => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, FontLoadState::Loaded)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(&self, next: &FontLoadState) -> bool {
        next.rank() > self.rank()
    }
}

/// One validated font face, ready to register with a text backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontFace {
    pub family: String,
    pub data: Bytes,
}

type WeightSlot = (String, u16);

#[derive(Debug, Default)]
struct FontTable {
    states: HashMap<WeightSlot, FontLoadState>,
    faces: Vec<FontFace>,
}

/// Point-in-time copy of every known weight state.
#[derive(Debug, Clone, Default)]
pub struct FontSnapshot {
    states: HashMap<WeightSlot, FontLoadState>,
}

impl FontSnapshot {
    pub fn state(&self, family: &str, weight: u16) -> FontLoadState {
        self.states
            .get(&(family.to_string(), weight))
            .cloned()
            .unwrap_or_default()
    }
}

/// Shared map (family, weight) → load state.
///
/// A load of `Inter:400` says nothing about `Inter:700`; each weight of a
/// [`FontKey`] moves on its own.
#[derive(Debug, Clone, Default)]
pub struct FontStates {
    inner: Arc<RwLock<FontTable>>,
}

impl FontStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, family: &str, weight: u16) -> FontLoadState {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        table
            .states
            .get(&(family.to_string(), weight))
            .cloned()
            .unwrap_or_default()
    }

    /// Combined state of every weight in `key`: the least advanced weight
    /// wins, and a failed weight outranks loaded ones.
    pub fn key_state(&self, key: &FontKey) -> FontLoadState {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut combined = FontLoadState::Loaded;
        for weight in &key.weights {
            let state = table
                .states
                .get(&(key.family.clone(), *weight))
                .cloned()
                .unwrap_or_default();
            combined = match (combined, state) {
                (FontLoadState::NotRequested, _) | (_, FontLoadState::NotRequested) => {
                    return FontLoadState::NotRequested;
                }
                (FontLoadState::Loading, _) | (_, FontLoadState::Loading) => FontLoadState::Loading,
                (FontLoadState::Error(reason), _) | (_, FontLoadState::Error(reason)) => {
                    FontLoadState::Error(reason)
                }
                (FontLoadState::Loaded, FontLoadState::Loaded) => FontLoadState::Loaded,
            };
        }
        combined
    }

    /// Weights of `key` nobody has asked for yet.
    pub fn unrequested_weights(&self, key: &FontKey) -> Vec<u16> {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        key.weights
            .iter()
            .copied()
            .filter(|weight| !table.states.contains_key(&(key.family.clone(), *weight)))
            .collect()
    }

    /// Move every weight of `key` to `next`. Backward or sideways moves are
    /// refused per weight.
    ///
    /// Returns whether any weight changed.
    pub fn advance(&self, key: &FontKey, next: FontLoadState) -> bool {
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = false;
        for weight in &key.weights {
            let slot = (key.family.clone(), *weight);
            let current = table.states.get(&slot).cloned().unwrap_or_default();
            if !current.can_advance_to(&next) {
                log::warn!(
                    "Refusing font state transition for '{}:{}': {:?} -> {:?}",
                    key.family,
                    weight,
                    current,
                    next
                );
                continue;
            }
            table.states.insert(slot, next.clone());
            changed = true;
        }
        changed
    }

    pub fn add_face(&self, face: FontFace) {
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        table.faces.push(face);
    }

    /// All faces loaded so far, in load order.
    pub fn faces(&self) -> Vec<FontFace> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .faces
            .clone()
    }

    pub fn face_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .faces
            .len()
    }

    pub fn snapshot(&self) -> FontSnapshot {
        FontSnapshot {
            states: self
                .inner
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .states
                .clone(),
        }
    }
}
