use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::error::PersistenceError;

/// Markers closer than this are considered the same point.
pub const MARKER_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentIndexEntry {
    #[serde(default)]
    pub in_point: f64,
    #[serde(default)]
    pub out_point: f64,
    #[serde(default)]
    pub markers: Vec<f64>,
}

impl SegmentIndexEntry {
    fn has_marker_near(&self, t: f64) -> bool {
        self.markers.iter().any(|m| (m - t).abs() < MARKER_TOLERANCE)
    }

    /// Inserts `t` keeping the list sorted. Returns false when a marker
    /// already sits within the tolerance window.
    fn insert_marker(&mut self, t: f64) -> bool {
        if self.has_marker_near(t) {
            return false;
        }
        let pos = self.markers.partition_point(|m| *m < t);
        self.markers.insert(pos, t);
        true
    }

    fn nearest_marker(&self, t: f64) -> Option<usize> {
        self.markers
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - t).abs().total_cmp(&(*b - t).abs()))
            .map(|(i, _)| i)
    }

    /// Restores the sorted/deduplicated shape after loading a hand-edited file.
    fn normalize(&mut self) {
        let mut markers = std::mem::take(&mut self.markers);
        markers.retain(|m| m.is_finite());
        markers.sort_by(|a, b| a.total_cmp(b));
        for m in markers {
            self.insert_marker(m);
        }
    }
}

/// Per-segment in/out points and markers, persisted as one JSON object keyed
/// by segment filename. Every mutation rewrites the whole file.
#[derive(Debug)]
pub struct SegmentIndex {
    path: PathBuf,
    entries: BTreeMap<String, SegmentIndexEntry>,
}

impl SegmentIndex {
    /// Loads the index, starting empty when the file is missing or corrupt.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, SegmentIndexEntry>>(&content) {
                Ok(mut entries) => {
                    entries.values_mut().for_each(SegmentIndexEntry::normalize);
                    log::info!("Loaded index with {} segments from {}", entries.len(), path.display());
                    entries
                }
                Err(e) => {
                    log::warn!("Index file {} is corrupt ({}), starting empty", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No index file at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                log::warn!("Failed to read index file {} ({}), starting empty", path.display(), e);
                BTreeMap::new()
            }
        };

        Self { path, entries }
    }

    pub fn get(&self, segment_key: &str) -> Option<&SegmentIndexEntry> {
        self.entries.get(segment_key)
    }

    pub fn set_in_out(&mut self, segment_key: &str, in_point: f64, out_point: f64) -> Result<(), PersistenceError> {
        let entry = self.entries.entry(segment_key.to_string()).or_default();
        entry.in_point = in_point;
        entry.out_point = out_point;
        log::debug!("{}: IN {:.3}s OUT {:.3}s", segment_key, in_point, out_point);
        self.save()
    }

    /// Adds a marker unless one already exists within 0.1s. Returns whether a
    /// marker was added; a no-op changes neither the index nor the file.
    pub fn add_marker(&mut self, segment_key: &str, t: f64) -> Result<bool, PersistenceError> {
        if !t.is_finite() {
            log::warn!("{}: ignoring marker at {}", segment_key, t);
            return Ok(false);
        }
        if self.get(segment_key).is_some_and(|entry| entry.has_marker_near(t)) {
            log::debug!("{}: marker at {:.3}s already present", segment_key, t);
            return Ok(false);
        }
        self.entries.entry(segment_key.to_string()).or_default().insert_marker(t);
        log::debug!("{}: marker added at {:.3}s", segment_key, t);
        self.save()?;
        Ok(true)
    }

    /// Removes the single marker closest to `t`, returning its time.
    pub fn remove_nearest_marker(&mut self, segment_key: &str, t: f64) -> Result<Option<f64>, PersistenceError> {
        let removed = match self.entries.get_mut(segment_key) {
            Some(entry) => entry.nearest_marker(t).map(|i| entry.markers.remove(i)),
            None => None,
        };
        match removed {
            Some(m) => {
                log::debug!("{}: marker removed at {:.3}s", segment_key, m);
                self.save()?;
                Ok(Some(m))
            }
            None => Ok(None),
        }
    }

    pub fn next_marker_after(&self, segment_key: &str, t: f64) -> Option<f64> {
        self.get(segment_key)?
            .markers
            .iter()
            .copied()
            .find(|m| *m > t + MARKER_TOLERANCE / 2.0)
    }

    pub fn previous_marker_before(&self, segment_key: &str, t: f64) -> Option<f64> {
        self.get(segment_key)?
            .markers
            .iter()
            .rev()
            .copied()
            .find(|m| *m < t - MARKER_TOLERANCE / 2.0)
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        let to_err = |source| PersistenceError { path: self.path.clone(), source };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(to_err)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| to_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        std::fs::write(&self.path, content).map_err(to_err)?;
        Ok(())
    }
}
