// ingest-core/src/sources/provider.rs

//! Records fetched through an external byte provider.
//!
//! Used for containers whose extraction lives outside this crate (key-value
//! stores, protobuf record files). The provider hands back raw bytes for a
//! key, and the bytes are served from memory.

use std::sync::Arc;

use crate::dataset::{MetadataLookup, OpaqueByteProvider, ProviderKey, RecordPayload, RecordSource};
use crate::error::Result;
use crate::storage::MemoryReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    pub key: ProviderKey,
}

enum KeySource {
    Fixed(Vec<ProviderKey>),
    Lookup(Arc<dyn MetadataLookup>),
}

pub struct ProviderSource {
    provider: Arc<dyn OpaqueByteProvider>,
    keys: KeySource,
}

impl ProviderSource {
    /// Serves exactly `keys`, in the given order.
    pub fn new(provider: Arc<dyn OpaqueByteProvider>, keys: Vec<ProviderKey>) -> Self {
        Self {
            provider,
            keys: KeySource::Fixed(keys),
        }
    }

    /// Serves every path the lookup lists, keyed by name.
    pub fn from_lookup(provider: Arc<dyn OpaqueByteProvider>, lookup: Arc<dyn MetadataLookup>) -> Self {
        Self {
            provider,
            keys: KeySource::Lookup(lookup),
        }
    }
}

impl RecordSource for ProviderSource {
    type Record = ProviderRecord;

    fn name(&self) -> &str {
        "provider"
    }

    fn enumerate(&mut self) -> Result<Vec<ProviderRecord>> {
        let keys = match &self.keys {
            KeySource::Fixed(keys) => keys.clone(),
            KeySource::Lookup(lookup) => lookup.relative_paths().into_iter().map(ProviderKey::Name).collect(),
        };
        Ok(keys.into_iter().map(|key| ProviderRecord { key }).collect())
    }

    fn open(&self, record: &ProviderRecord) -> Result<RecordPayload> {
        let bytes = self.provider.fetch(&record.key, None)?;
        let label = record.key.to_string();
        Ok(RecordPayload::whole(Box::new(MemoryReader::new(bytes, label.clone())), label))
    }

    fn record_id(&self, record: &ProviderRecord) -> String {
        record.key.to_string()
    }

    fn grouping_key(&self, record: &ProviderRecord) -> Option<f32> {
        let (KeySource::Lookup(lookup), ProviderKey::Name(name)) = (&self.keys, &record.key) else {
            return None;
        };
        let (height, width) = lookup.size_of(name)?;
        (height > 0).then(|| width as f32 / height as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use std::collections::HashMap;

    struct MockProvider {
        entries: HashMap<ProviderKey, Vec<u8>>,
    }

    impl OpaqueByteProvider for MockProvider {
        fn fetch(&self, key: &ProviderKey, length: Option<u64>) -> Result<Vec<u8>> {
            let data = self
                .entries
                .get(key)
                .ok_or_else(|| IngestError::storage(key.to_string(), "no such entry"))?;
            let n = length.map_or(data.len(), |l| (l as usize).min(data.len()));
            Ok(data[..n].to_vec())
        }
    }

    struct MockLookup(Vec<(String, (u32, u32))>);

    impl MetadataLookup for MockLookup {
        fn exists(&self, name: &str) -> bool {
            self.0.iter().any(|(n, _)| n == name)
        }

        fn relative_paths(&self) -> Vec<String> {
            self.0.iter().map(|(n, _)| n.clone()).collect()
        }

        fn size_of(&self, name: &str) -> Option<(u32, u32)> {
            self.0.iter().find(|(n, _)| n == name).map(|(_, s)| *s)
        }
    }

    fn provider() -> Arc<MockProvider> {
        let mut entries = HashMap::new();
        entries.insert(ProviderKey::Name("a.jpg".into()), b"alpha".to_vec());
        entries.insert(ProviderKey::Name("b.jpg".into()), b"beta".to_vec());
        entries.insert(ProviderKey::Offset(4096), b"raw".to_vec());
        Arc::new(MockProvider { entries })
    }

    #[test]
    fn test_explicit_keys() {
        let mut src = ProviderSource::new(
            provider(),
            vec![ProviderKey::Offset(4096), ProviderKey::Name("a.jpg".into())],
        );
        let records = src.enumerate().unwrap();
        assert_eq!(src.record_id(&records[0]), "@4096");

        let mut payload = src.open(&records[1]).unwrap();
        assert_eq!(payload.len(), 5);
        assert_eq!(payload.read_to_vec().unwrap(), b"alpha");
    }

    #[test]
    fn test_keys_from_lookup() {
        let lookup = Arc::new(MockLookup(vec![
            ("b.jpg".into(), (10, 20)),
            ("a.jpg".into(), (20, 10)),
        ]));
        let mut src = ProviderSource::from_lookup(provider(), lookup);
        let records = src.enumerate().unwrap();

        assert_eq!(src.record_id(&records[0]), "b.jpg");
        assert_eq!(src.grouping_key(&records[0]), Some(2.0));
        assert_eq!(src.grouping_key(&records[1]), Some(0.5));
    }

    #[test]
    fn test_missing_key_is_per_record() {
        let mut src = ProviderSource::new(provider(), vec![ProviderKey::Name("gone.jpg".into())]);
        let records = src.enumerate().unwrap();
        let err = src.open(&records[0]).unwrap_err();
        assert!(err.is_record_recoverable());
    }
}
