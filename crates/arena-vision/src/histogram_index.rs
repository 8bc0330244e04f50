use anyhow::{Context, Result};
use arena_data::CardId;
use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::Signature;

/// In-memory database of color signatures, keyed by card identity.
///
/// Entries are only ever added or replaced, never removed. Each entry is an
/// `Arc<Signature>`: readers clone the pointer under a short read lock and
/// compare without holding it, and a re-hash swaps in a fresh `Arc`.
#[derive(Debug, Default)]
pub struct HistogramIndex {
    entries: RwLock<HashMap<CardId, Arc<Signature>>>,
}

impl HistogramIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute and store the signature of `image` for `id`.
    /// Re-adding an identity replaces its signature.
    pub fn add(&self, id: CardId, image: &RgbaImage) -> Arc<Signature> {
        let signature = Arc::new(Signature::from_image(image));
        self.insert(id, signature.clone());
        signature
    }

    pub fn insert(&self, id: CardId, signature: Arc<Signature>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.insert(id.clone(), signature).is_some() {
            debug!("Re-hashed {}", id);
        }
    }

    pub fn signature_of(&self, id: &CardId) -> Option<Arc<Signature>> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &CardId) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Identities of `ids` that have no signature yet
    pub fn missing(&self, ids: &[CardId]) -> Vec<CardId> {
        let entries = self.read();
        ids.iter()
            .filter(|id| !entries.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Signatures present for `ids`, in `ids` order.
    /// The lock is released before the caller starts comparing.
    pub fn snapshot<'a>(&self, ids: &'a [CardId]) -> Vec<(&'a CardId, Arc<Signature>)> {
        let entries = self.read();
        ids.iter()
            .filter_map(|id| entries.get(id).map(|sig| (id, sig.clone())))
            .collect()
    }

    /// Hash cached art from `art_dir` for every identity not yet indexed.
    /// Returns the identities whose art is not cached locally.
    pub fn load_cached_art(&self, art_dir: &Path, ids: &[CardId], is_hero: bool) -> Vec<CardId> {
        let mut missing = Vec::new();
        let mut loaded = 0usize;

        for id in self.missing(ids) {
            match load_art(art_dir, &id, is_hero) {
                Ok(Some(img)) => {
                    self.add(id, &img);
                    loaded += 1;
                }
                Ok(None) => missing.push(id),
                Err(e) => {
                    warn!("Failed to load art for {}: {:#}", id, e);
                    missing.push(id);
                }
            }
        }

        info!(
            "HistogramIndex: hashed {} cached image(s), {} missing, {} total",
            loaded,
            missing.len(),
            self.len()
        );
        missing
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<CardId, Arc<Signature>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Path of the cached art file for an identity
pub fn art_path(art_dir: &Path, id: &CardId) -> PathBuf {
    art_dir.join(format!("{}.png", id.file_stem()))
}

/// Load the hashable part of a cached image: the art window of a card render,
/// or the whole portrait for heroes. `Ok(None)` when the file is not cached.
pub fn load_art(art_dir: &Path, id: &CardId, is_hero: bool) -> Result<Option<RgbaImage>> {
    let path = art_path(art_dir, id);
    if !path.exists() {
        return Ok(None);
    }
    let img = image::open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .to_rgba8();
    if is_hero {
        Ok(Some(img))
    } else {
        Ok(Some(arena_capture::crop_region(
            &img,
            &arena_capture::regions::card_art(),
        )))
    }
}
