//! In-memory watchlist roster.
//!
//! Readers take an `Arc` snapshot and match against it without holding any
//! lock. Writers build a new roster and swap it in, so a reader always sees
//! either the old or the new roster in full.

use crate::types::{FaceEncoding, WatchlistEntry};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum WatchlistError {
    #[error("encoding is empty")]
    EmptyEncoding,
    #[error("encoding has {actual} values, roster uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Immutable view of the roster used by one matching pass.
pub type WatchlistSnapshot = Arc<Vec<WatchlistEntry>>;

#[derive(Default)]
pub struct WatchlistStore {
    entries: RwLock<WatchlistSnapshot>,
}

impl WatchlistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WatchlistSnapshot {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Insert or replace the entry for `identity_id`.
    ///
    /// Returns `true` when a new identity was added, `false` when an existing
    /// one was overwritten in place.
    pub fn upsert(
        &self,
        identity_id: &str,
        name: &str,
        encoding: FaceEncoding,
    ) -> Result<bool, WatchlistError> {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        check_dimension(&guard, identity_id, &encoding)?;

        let mut next: Vec<WatchlistEntry> = guard.as_ref().clone();
        let inserted = match next.iter_mut().find(|e| e.identity_id == identity_id) {
            Some(existing) => {
                existing.name = name.to_string();
                existing.encoding = encoding;
                false
            }
            None => {
                next.push(WatchlistEntry {
                    identity_id: identity_id.to_string(),
                    name: name.to_string(),
                    encoding,
                });
                true
            }
        };

        *guard = Arc::new(next);
        tracing::debug!(identity_id, inserted, roster = guard.len(), "watchlist upsert");
        Ok(inserted)
    }

    /// Remove an identity. Returns whether it was present.
    pub fn remove(&self, identity_id: &str) -> bool {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|e| e.identity_id == identity_id) {
            return false;
        }
        let next: Vec<WatchlistEntry> = guard
            .iter()
            .filter(|e| e.identity_id != identity_id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    /// Copy of the roster for a persistence collaborator.
    pub fn export_snapshot(&self) -> Vec<WatchlistEntry> {
        self.snapshot().as_ref().clone()
    }

    /// Replace the whole roster.
    ///
    /// All encodings must share one dimensionality. Duplicate identity ids
    /// collapse into their last occurrence, keeping the position of the first.
    pub fn import_snapshot(&self, entries: Vec<WatchlistEntry>) -> Result<usize, WatchlistError> {
        let mut roster: Vec<WatchlistEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.encoding.is_empty() {
                return Err(WatchlistError::EmptyEncoding);
            }
            if let Some(first) = roster.first() {
                if first.encoding.len() != entry.encoding.len() {
                    return Err(WatchlistError::DimensionMismatch {
                        expected: first.encoding.len(),
                        actual: entry.encoding.len(),
                    });
                }
            }
            match roster.iter_mut().find(|e| e.identity_id == entry.identity_id) {
                Some(existing) => *existing = entry,
                None => roster.push(entry),
            }
        }

        let count = roster.len();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(roster);
        tracing::info!(count, "watchlist imported");
        Ok(count)
    }
}

/// The replacing entry itself is ignored when checking, so a single-entry
/// roster may be re-enrolled at a new dimensionality.
fn check_dimension(
    roster: &[WatchlistEntry],
    identity_id: &str,
    encoding: &FaceEncoding,
) -> Result<(), WatchlistError> {
    if encoding.is_empty() {
        return Err(WatchlistError::EmptyEncoding);
    }
    match roster.iter().find(|e| e.identity_id != identity_id) {
        Some(other) if other.encoding.len() != encoding.len() => Err(WatchlistError::DimensionMismatch {
            expected: other.encoding.len(),
            actual: encoding.len(),
        }),
        _ => Ok(()),
    }
}
