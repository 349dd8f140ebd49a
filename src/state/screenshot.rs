//! Latest captured screenshot.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// A decoded screenshot and when it was stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotRecord {
    pub image: Arc<Vec<u8>>,
    pub content_type: String,
    pub captured_at: DateTime<Utc>,
}

impl ScreenshotRecord {
    pub fn new(image: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            image: Arc::new(image),
            content_type: content_type.into(),
            captured_at: Utc::now(),
        }
    }
}

/// Holds at most one screenshot, last write wins.
///
/// The whole record is swapped under the lock so readers see either the
/// previous image or the new one, never a mix.
#[derive(Default)]
pub struct ScreenshotStore {
    latest: Mutex<Option<ScreenshotRecord>>,
}

impl ScreenshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, record: ScreenshotRecord) {
        *self.latest.lock() = Some(record);
    }

    pub fn latest(&self) -> Option<ScreenshotRecord> {
        self.latest.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store() {
        let store = ScreenshotStore::new();
        assert!(store.latest().is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let store = ScreenshotStore::new();
        store.replace(ScreenshotRecord::new(vec![1, 1, 1], "image/png"));
        store.replace(ScreenshotRecord::new(vec![2, 2], "image/jpeg"));

        let latest = store.latest().unwrap();
        assert_eq!(latest.image.as_slice(), &[2, 2]);
        assert_eq!(latest.content_type, "image/jpeg");
    }

    #[test]
    fn test_concurrent_replace_never_tears() {
        let store = Arc::new(ScreenshotStore::new());
        let image_a = vec![0xAA; 64 * 1024];
        let image_b = vec![0xBB; 32 * 1024];

        let writers: Vec<_> = [image_a.clone(), image_b.clone()]
            .into_iter()
            .map(|image| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        store.replace(ScreenshotRecord::new(image.clone(), "image/png"));
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            if let Some(record) = store.latest() {
                let image = record.image.as_slice();
                assert!(image == image_a.as_slice() || image == image_b.as_slice());
            }
        }

        for writer in writers {
            writer.join().unwrap();
        }
    }
}
