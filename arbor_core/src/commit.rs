//! Commit objects.

use crate::checksum::Checksum;
use crate::error::Result;
use crate::wire::{WireReader, WireWriter};

/// A commit: a root tree, an optional parent and descriptive metadata.
///
/// Checksum fields are kept as decoded bytes (empty parent = none); their size is
/// checked by structural validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Auxiliary key/value metadata, sorted by key.
    pub metadata: Vec<(String, Vec<u8>)>,
    pub parent: Vec<u8>,
    pub subject: String,
    pub body: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub root_tree: Vec<u8>,
    pub root_meta: Vec<u8>,
}

impl Commit {
    pub fn new(
        parent: Option<Checksum>,
        subject: impl Into<String>,
        body: impl Into<String>,
        timestamp: u64,
        root_tree: Checksum,
        root_meta: Checksum,
    ) -> Self {
        Self {
            metadata: Vec::new(),
            parent: parent.map(|p| p.as_bytes().to_vec()).unwrap_or_default(),
            subject: subject.into(),
            body: body.into(),
            timestamp,
            root_tree: root_tree.as_bytes().to_vec(),
            root_meta: root_meta.as_bytes().to_vec(),
        }
    }

    /// Set a metadata key, keeping keys sorted.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        let value = value.into();
        match self.metadata.binary_search_by(|(k, _)| k.as_str().cmp(key.as_str())) {
            Ok(pos) => self.metadata[pos].1 = value,
            Err(pos) => self.metadata.insert(pos, (key, value)),
        }
    }

    pub fn parent(&self) -> Result<Option<Checksum>> {
        if self.parent.is_empty() {
            Ok(None)
        } else {
            Checksum::from_slice(&self.parent).map(Some)
        }
    }

    /// The root `(dirtree, dirmeta)` pair.
    pub fn root(&self) -> Result<(Checksum, Checksum)> {
        Ok((
            Checksum::from_slice(&self.root_tree)?,
            Checksum::from_slice(&self.root_meta)?,
        ))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_len(self.metadata.len());
        for (key, value) in &self.metadata {
            w.put_str(key);
            w.put_bytes(value);
        }
        w.put_bytes(&self.parent);
        w.put_str(&self.subject);
        w.put_str(&self.body);
        w.put_u64(self.timestamp);
        w.put_bytes(&self.root_tree);
        w.put_bytes(&self.root_meta);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(data);

        let n_meta = r.count("commit metadata", 8)?;
        let mut metadata = Vec::with_capacity(n_meta);
        for _ in 0..n_meta {
            let key = r.string("metadata key")?;
            let value = r.bytes("metadata value")?.to_vec();
            metadata.push((key, value));
        }

        let parent = r.bytes("parent")?.to_vec();
        let subject = r.string("subject")?;
        let body = r.string("body")?;
        let timestamp = r.u64("timestamp")?;
        let root_tree = r.bytes("root tree")?.to_vec();
        let root_meta = r.bytes("root meta")?.to_vec();
        r.finish("commit")?;

        Ok(Self {
            metadata,
            parent,
            subject,
            body,
            timestamp,
            root_tree,
            root_meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Algorithm;

    #[test]
    fn test_commit_fields_survive_encoding() {
        let tree = Checksum::compute(Algorithm::Blake3, b"tree");
        let meta = Checksum::compute(Algorithm::Blake3, b"meta");
        let parent = Checksum::compute(Algorithm::Blake3, b"parent");
        let mut commit = Commit::new(Some(parent), "subject", "body", 1_700_000_000, tree, meta);
        commit.set_metadata("version", b"1.0".to_vec());

        let decoded = Commit::decode(&commit.encode()).unwrap();
        assert_eq!(decoded, commit);
        assert_eq!(decoded.parent().unwrap(), Some(parent));
        assert_eq!(decoded.root().unwrap(), (tree, meta));
    }

    #[test]
    fn test_no_parent() {
        let c = Checksum::compute(Algorithm::Blake3, b"x");
        let commit = Commit::new(None, "s", "", 0, c, c);
        assert!(commit.parent.is_empty());
        assert_eq!(Commit::decode(&commit.encode()).unwrap().parent().unwrap(), None);
    }

    #[test]
    fn test_metadata_sorted() {
        let c = Checksum::compute(Algorithm::Blake3, b"x");
        let mut commit = Commit::new(None, "s", "", 0, c, c);
        commit.set_metadata("b", "2");
        commit.set_metadata("a", "1");
        assert_eq!(commit.metadata[0].0, "a");
        assert_eq!(commit.metadata[1].0, "b");
    }

    #[test]
    fn test_truncated_commit_rejected() {
        let c = Checksum::compute(Algorithm::Blake3, b"x");
        let encoded = Commit::new(None, "s", "b", 0, c, c).encode();
        assert!(Commit::decode(&encoded[..encoded.len() - 5]).is_err());
    }
}
