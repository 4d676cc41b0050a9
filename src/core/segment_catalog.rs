use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::core::time_format::format_short;
use crate::video::processor::MediaProber;

const PROBE_CACHE_CAPACITY: usize = 64;

/// Shown instead of a duration when the segment cannot be probed.
pub const UNKNOWN_DURATION: &str = "??:??";

pub fn is_segment_file_name(name: &str) -> bool {
    name.starts_with("segment_") && name.ends_with(".mp4")
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub duration_label: String,
}

impl SegmentEntry {
    /// `segment_001.mp4 (1:23)`
    pub fn display_label(&self) -> String {
        format!("{} ({})", self.file_name, self.duration_label)
    }
}

/// Recorded segments in the segment directory, in name order.
pub struct SegmentCatalog {
    directory: PathBuf,
    prober: Arc<dyn MediaProber>,
    segments: Vec<PathBuf>,
    durations: LruCache<(PathBuf, Option<SystemTime>), Option<f64>>,
}

impl SegmentCatalog {
    pub fn new(directory: impl Into<PathBuf>, prober: Arc<dyn MediaProber>) -> Self {
        let capacity = NonZeroUsize::new(PROBE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            directory: directory.into(),
            prober,
            segments: Vec::new(),
            durations: LruCache::new(capacity),
        }
    }

    /// Re-reads the directory. A missing directory yields an empty catalog.
    pub fn rescan(&mut self) -> anyhow::Result<usize> {
        let mut segments = Vec::new();

        if self.directory.is_dir() {
            for entry in std::fs::read_dir(&self.directory)? {
                let path = entry?.path();
                if !path.is_file() {
                    continue;
                }
                if let Some(filename) = path.file_name().and_then(|s| s.to_str()) {
                    if is_segment_file_name(filename) {
                        segments.push(path.clone());
                    }
                }
            }
        } else {
            log::warn!("Segment directory {} does not exist", self.directory.display());
        }

        segments.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        log::info!("Found {} segments in {}", segments.len(), self.directory.display());
        self.segments = segments;
        Ok(self.segments.len())
    }

    pub fn segments(&self) -> &[PathBuf] {
        &self.segments
    }

    pub fn position_of(&self, path: &Path) -> Option<usize> {
        let name = path.file_name()?;
        self.segments.iter().position(|p| p.file_name() == Some(name))
    }

    /// Segment after `current`; the first one when `current` is not listed.
    pub fn next_after(&self, current: Option<&Path>) -> Option<&Path> {
        match current.and_then(|p| self.position_of(p)) {
            Some(i) => self.segments.get(i + 1),
            None => self.segments.first(),
        }
        .map(PathBuf::as_path)
    }

    /// Segment before `current`; None at the start or when `current` is not listed.
    pub fn previous_before(&self, current: Option<&Path>) -> Option<&Path> {
        let i = current.and_then(|p| self.position_of(p))?;
        if i == 0 {
            return None;
        }
        self.segments.get(i - 1).map(PathBuf::as_path)
    }

    /// Probed duration in seconds, cached per file and modification time.
    pub fn duration_of(&mut self, path: &Path) -> Option<f64> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        let key = (path.to_path_buf(), modified);
        if let Some(cached) = self.durations.get(&key) {
            return *cached;
        }

        let duration = match self.prober.probe(path) {
            Ok(info) => Some(info.duration),
            Err(e) => {
                log::warn!("Could not probe {}: {}", path.display(), e);
                None
            }
        };
        self.durations.put(key, duration);
        duration
    }

    pub fn duration_label(&mut self, path: &Path) -> String {
        match self.duration_of(path) {
            Some(seconds) => format_short(seconds),
            None => UNKNOWN_DURATION.to_string(),
        }
    }

    pub fn entries(&mut self) -> Vec<SegmentEntry> {
        let paths = self.segments.clone();
        paths
            .into_iter()
            .map(|path| {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let duration_label = self.duration_label(&path);
                SegmentEntry { path, file_name, duration_label }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::testing::{probe_info, StaticProber};
    use std::fs;

    fn catalog_with(names: &[&str], prober: Arc<StaticProber>) -> (tempfile::TempDir, SegmentCatalog) {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let mut catalog = SegmentCatalog::new(dir.path(), prober);
        catalog.rescan().unwrap();
        (dir, catalog)
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let prober = Arc::new(StaticProber::new(None));
        let (_dir, catalog) = catalog_with(
            &["segment_010.mp4", "notes.txt", "segment_002.mp4", "segment_003.mov", "clip.mp4"],
            prober,
        );

        let names: Vec<_> = catalog
            .segments()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["segment_002.mp4", "segment_010.mp4"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let mut catalog = SegmentCatalog::new("/no/such/segments", Arc::new(StaticProber::new(None)));
        assert_eq!(catalog.rescan().unwrap(), 0);
        assert!(catalog.next_after(None).is_none());
    }

    #[test]
    fn test_navigation() {
        let prober = Arc::new(StaticProber::new(None));
        let (_dir, catalog) = catalog_with(&["segment_001.mp4", "segment_002.mp4", "segment_003.mp4"], prober);
        let segments = catalog.segments().to_vec();
        let second = segments[1].as_path();

        assert_eq!(catalog.next_after(None), Some(segments[0].as_path()));
        assert_eq!(catalog.next_after(Some(second)), Some(segments[2].as_path()));
        assert_eq!(catalog.previous_before(Some(second)), Some(segments[0].as_path()));
        assert_eq!(catalog.next_after(Some(segments[2].as_path())), None);
        assert_eq!(catalog.previous_before(Some(segments[0].as_path())), None);
        assert_eq!(catalog.previous_before(Some(Path::new("/elsewhere/other.mp4"))), None);
    }

    #[test]
    fn test_duration_labels_are_cached() {
        let prober = Arc::new(StaticProber::new(Some(probe_info(1920, 1080, 30.0, 83.4))));
        let (_dir, mut catalog) = catalog_with(&["segment_001.mp4", "broken_link.mp4"], prober.clone());

        let entries = catalog.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_label(), "segment_001.mp4 (1:23)");

        catalog.entries();
        assert_eq!(prober.calls(), 1);
    }

    #[test]
    fn test_probe_failure_shows_unknown() {
        let prober = Arc::new(StaticProber::new(None));
        let (_dir, mut catalog) = catalog_with(&["segment_001.mp4"], prober);
        assert_eq!(catalog.entries()[0].duration_label, UNKNOWN_DURATION);
    }
}
