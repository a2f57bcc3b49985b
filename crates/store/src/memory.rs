//! In-memory store for tests and single-process pipelines.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use color_eyre::eyre::{eyre, Result};
use dumpsync_core::hash::ContentHash;

use crate::object::{ObjectInfo, ObjectStore, ObjectUri, ReadSeek};

/// Store keeping objects in a shared map. Clones share the same objects,
/// so one instance can serve both the driver and in-process workers.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All object URIs currently held, sorted. Test helper.
    #[must_use]
    pub fn object_names(&self) -> Vec<String> {
        let objects = self.objects.lock().expect("store lock poisoned");
        let mut names: Vec<String> = objects.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of objects currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().expect("store lock poisoned").len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writer that commits its buffer to the shared map when dropped.
struct MemoryWriter {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    key: String,
    buffer: Vec<u8>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        let mut objects = self.objects.lock().expect("store lock poisoned");
        objects.insert(self.key.clone(), std::mem::take(&mut self.buffer));
    }
}

impl ObjectStore for MemoryStore {
    fn object_info(&self, uri: &ObjectUri) -> Result<Option<ObjectInfo>> {
        let objects = self.objects.lock().expect("store lock poisoned");
        Ok(objects.get(uri.as_str()).map(|bytes| ObjectInfo {
            size: bytes.len() as u64,
            content_hash: ContentHash::from_bytes(bytes),
        }))
    }

    fn reader(&self, uri: &ObjectUri) -> Result<Box<dyn ReadSeek + Send>> {
        let objects = self.objects.lock().expect("store lock poisoned");
        let bytes = objects
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| eyre!("no such object: {uri}"))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn writer(&self, uri: &ObjectUri) -> Result<Box<dyn Write + Send>> {
        Ok(Box::new(MemoryWriter {
            objects: Arc::clone(&self.objects),
            key: uri.as_str().to_string(),
            buffer: Vec::new(),
        }))
    }

    fn copy(&self, from: &ObjectUri, to: &ObjectUri) -> Result<()> {
        let mut objects = self.objects.lock().expect("store lock poisoned");
        let bytes = objects
            .get(from.as_str())
            .cloned()
            .ok_or_else(|| eyre!("no such object: {from}"))?;
        objects.insert(to.as_str().to_string(), bytes);
        Ok(())
    }

    fn delete(&self, uri: &ObjectUri) -> Result<bool> {
        let mut objects = self.objects.lock().expect("store lock poisoned");
        Ok(objects.remove(uri.as_str()).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_commits_on_drop() {
        let store = MemoryStore::new();
        let uri = ObjectUri::new("mem://run/a");

        {
            let mut writer = store.writer(&uri).unwrap();
            writer.write_all(b"partial ").unwrap();
            writer.write_all(b"content").unwrap();
        }

        assert_eq!(store.read_bytes(&uri).unwrap(), b"partial content");
        let info = store.object_info(&uri).unwrap().unwrap();
        assert_eq!(info.size, 15);
    }

    #[test]
    fn clones_share_objects() {
        let store = MemoryStore::new();
        let clone = store.clone();
        let uri = ObjectUri::new("mem://run/shared");

        store.write_bytes(&uri, b"x").unwrap();
        assert_eq!(clone.read_bytes(&uri).unwrap(), b"x");

        assert!(clone.delete(&uri).unwrap());
        assert!(store.object_info(&uri).unwrap().is_none());
    }

    #[test]
    fn copy_duplicates_content() {
        let store = MemoryStore::new();
        let a = ObjectUri::new("mem://run/a");
        let b = ObjectUri::new("mem://run/b");

        store.write_bytes(&a, b"data").unwrap();
        store.copy(&a, &b).unwrap();
        assert_eq!(store.read_bytes(&b).unwrap(), b"data");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn missing_reader_is_error() {
        let store = MemoryStore::new();
        assert!(store.reader(&ObjectUri::new("mem://run/absent")).is_err());
    }
}
