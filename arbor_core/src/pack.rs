//! Pack files: index format, writer and validation.
//!
//! A pack is a data blob holding object envelopes back to back, plus an index
//! locating each of them. The pack is named by the checksum of its data blob.
//!
//! Index layout (all integers big-endian):
//!
//! ```text
//! 0x00  4    "APKI" magic
//! 0x04  4    version (u32) = 1
//! 0x08  32   checksum of the data blob
//! 0x28  4    entry count (u32)
//! 0x2C  ...  count x (u8 objtype, 32-byte checksum, u64 offset)
//! ```

use crate::checksum::{Algorithm, CHECKSUM_SIZE, Checksum, Hasher};
use crate::error::{Error, Result};
use crate::object::{ObjectName, ObjectType};
use crate::store::PackStore;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Magic bytes at the start of every pack index.
pub const INDEX_MAGIC: &[u8; 4] = b"APKI";

/// Current pack index version.
pub const INDEX_VERSION: u32 = 1;

/// Size of the fixed index header.
pub const INDEX_HEADER_SIZE: usize = 4 + 4 + CHECKSUM_SIZE + 4;

/// Size of one index entry.
pub const INDEX_ENTRY_SIZE: usize = 1 + CHECKSUM_SIZE + 8;

/// Why a pack failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackCorruption {
    /// The data blob does not hash to the checksum in the index.
    ChecksumMismatch { expected: Checksum, actual: Checksum },
    /// An entry points at or past the end of the data blob.
    OffsetOutOfBounds { offset: u64, size: u64 },
    /// The index describes a different data blob than the pack it belongs to.
    IdentityMismatch { claimed: Checksum },
    /// The index could not be parsed.
    MalformedIndex { reason: String },
}

impl fmt::Display for PackCorruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackCorruption::ChecksumMismatch { expected, actual } => write!(
                f,
                "data checksum mismatch: expected {}, actual {}",
                expected, actual
            ),
            PackCorruption::OffsetOutOfBounds { offset, size } => {
                write!(f, "offset {} out of bounds for pack of size {}", offset, size)
            }
            PackCorruption::IdentityMismatch { claimed } => {
                write!(f, "index claims data checksum {}", claimed)
            }
            PackCorruption::MalformedIndex { reason } => write!(f, "malformed index: {}", reason),
        }
    }
}

/// Location of one object inside a pack's data blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackIndexEntry {
    pub objtype: ObjectType,
    pub checksum: Checksum,
    /// Byte offset of the object's envelope in the data blob.
    pub offset: u64,
}

impl PackIndexEntry {
    pub fn name(&self) -> ObjectName {
        ObjectName::new(self.checksum, self.objtype)
    }
}

/// A decoded pack index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackIndex {
    pub data_checksum: Checksum,
    pub entries: Vec<PackIndexEntry>,
}

impl PackIndex {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INDEX_HEADER_SIZE + self.entries.len() * INDEX_ENTRY_SIZE);
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        buf.extend_from_slice(self.data_checksum.as_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            buf.push(entry.objtype.to_u8());
            buf.extend_from_slice(entry.checksum.as_bytes());
            buf.extend_from_slice(&entry.offset.to_be_bytes());
        }
        buf
    }

    /// Decode and structurally validate an index. Every failure is a `Schema` error.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < INDEX_HEADER_SIZE {
            return Err(Error::schema(format!(
                "Pack index too short: {} bytes",
                data.len()
            )));
        }
        if &data[0..4] != INDEX_MAGIC {
            return Err(Error::schema(format!(
                "Invalid pack index magic: {:?}",
                &data[0..4]
            )));
        }
        let version = be_u32(&data[4..8]);
        if version != INDEX_VERSION {
            return Err(Error::schema(format!(
                "Unsupported pack index version: {}",
                version
            )));
        }
        let data_checksum = Checksum::from_slice(&data[8..8 + CHECKSUM_SIZE])?;
        let count = be_u32(&data[8 + CHECKSUM_SIZE..INDEX_HEADER_SIZE]) as usize;

        let body = &data[INDEX_HEADER_SIZE..];
        if count.checked_mul(INDEX_ENTRY_SIZE) != Some(body.len()) {
            return Err(Error::schema(format!(
                "Pack index declares {} entries but has {} entry bytes",
                count,
                body.len()
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for raw in body.chunks_exact(INDEX_ENTRY_SIZE) {
            let objtype = ObjectType::from_u8(raw[0])
                .map_err(|_| Error::schema(format!("Invalid object type tag {} in pack index", raw[0])))?;
            let checksum = Checksum::from_slice(&raw[1..1 + CHECKSUM_SIZE])?;
            let offset = be_u64(&raw[1 + CHECKSUM_SIZE..]);
            entries.push(PackIndexEntry {
                objtype,
                checksum,
                offset,
            });
        }

        Ok(Self {
            data_checksum,
            entries,
        })
    }

    /// Offset of an object in the data blob, if the pack holds it.
    pub fn find(&self, name: &ObjectName) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.checksum == name.checksum && e.objtype == name.objtype)
            .map(|e| e.offset)
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

/// Path of a pack's index file inside `dir`.
pub fn pack_index_path(dir: &Path, id: &Checksum) -> PathBuf {
    dir.join(format!("pack-{}.index", id))
}

/// Path of a pack's data file inside `dir`.
pub fn pack_data_path(dir: &Path, id: &Checksum) -> PathBuf {
    dir.join(format!("pack-{}.data", id))
}

/// Extract the pack id from an index file name.
pub fn parse_pack_index_name(file_name: &str) -> Option<Checksum> {
    let hex = file_name.strip_prefix("pack-")?.strip_suffix(".index")?;
    Checksum::from_hex(hex).ok()
}

/// Validate one pack.
///
/// Checks, in order: the index's shape, that it describes this pack, the data
/// blob's checksum (streamed), and that every entry offset is strictly less than
/// the blob size. Corruption is returned as [`Error::CorruptPack`]; I/O failures
/// propagate unchanged.
pub fn verify_pack<S: PackStore + ?Sized>(
    store: &S,
    algorithm: Algorithm,
    id: &Checksum,
) -> Result<()> {
    let corrupt = |reason| Error::CorruptPack { pack: *id, reason };

    let raw_index = store.open_pack_index(id)?;
    let index = match PackIndex::decode(&raw_index) {
        Ok(index) => index,
        Err(Error::Schema { reason }) | Err(Error::InvalidChecksum { reason }) => {
            return Err(corrupt(PackCorruption::MalformedIndex { reason }));
        }
        Err(err) => return Err(err),
    };

    if index.data_checksum != *id {
        return Err(corrupt(PackCorruption::IdentityMismatch {
            claimed: index.data_checksum,
        }));
    }

    let size = store.pack_data_size(id)?;
    let actual = Checksum::compute_reader(algorithm, store.open_pack_data(id)?)?;
    if actual != index.data_checksum {
        return Err(corrupt(PackCorruption::ChecksumMismatch {
            expected: index.data_checksum,
            actual,
        }));
    }

    if let Some(entry) = index.entries.iter().find(|e| e.offset >= size) {
        return Err(corrupt(PackCorruption::OffsetOutOfBounds {
            offset: entry.offset,
            size,
        }));
    }

    debug!(pack = %id, entries = index.entries.len(), size, "pack verified");
    Ok(())
}

/// Streams object envelopes into a new pack.
pub struct PackWriter {
    dir: PathBuf,
    data: NamedTempFile,
    hasher: Hasher,
    offset: u64,
    entries: Vec<PackIndexEntry>,
}

impl PackWriter {
    /// Start a pack in `dir`; nothing is visible there until [`PackWriter::finish`].
    pub fn new(dir: &Path, algorithm: Algorithm) -> Result<Self> {
        Ok(Self {
            dir: dir.to_path_buf(),
            data: NamedTempFile::new_in(dir)?,
            hasher: algorithm.hasher(),
            offset: 0,
            entries: Vec::new(),
        })
    }

    /// Append one object envelope.
    pub fn add(&mut self, name: ObjectName, envelope: &[u8]) -> Result<()> {
        self.data.write_all(envelope)?;
        self.hasher.update(envelope);
        self.entries.push(PackIndexEntry {
            objtype: name.objtype,
            checksum: name.checksum,
            offset: self.offset,
        });
        self.offset += envelope.len() as u64;
        Ok(())
    }

    /// Persist the data blob and its index. Returns the pack id.
    pub fn finish(mut self) -> Result<Checksum> {
        self.data.flush()?;
        let id = self.hasher.finalize();
        let index = PackIndex {
            data_checksum: id,
            entries: self.entries,
        };

        // Data first, so a visible index always has its data.
        self.data.persist(pack_data_path(&self.dir, &id))?;

        let mut index_file = NamedTempFile::new_in(&self.dir)?;
        index_file.write_all(&index.encode())?;
        index_file.flush()?;
        index_file.persist(pack_index_path(&self.dir, &id))?;

        debug!(pack = %id, entries = index.entries.len(), "pack written");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::io::Read;
    use tempfile::TempDir;

    const ALGO: Algorithm = Algorithm::Blake3;

    /// In-memory pack store.
    #[derive(Default)]
    struct MemPacks {
        packs: HashMap<Checksum, (Vec<u8>, Vec<u8>)>,
    }

    impl MemPacks {
        fn insert(&mut self, id: Checksum, index: Vec<u8>, data: Vec<u8>) {
            self.packs.insert(id, (index, data));
        }
    }

    impl PackStore for MemPacks {
        fn list_pack_ids(&self) -> Result<BTreeSet<Checksum>> {
            Ok(self.packs.keys().copied().collect())
        }

        fn open_pack_index(&self, id: &Checksum) -> Result<Vec<u8>> {
            Ok(self.packs[id].0.clone())
        }

        fn open_pack_data(&self, id: &Checksum) -> Result<Box<dyn Read + '_>> {
            Ok(Box::new(&self.packs[id].1[..]))
        }

        fn pack_data_size(&self, id: &Checksum) -> Result<u64> {
            Ok(self.packs[id].1.len() as u64)
        }
    }

    fn entry(byte: u8, offset: u64) -> PackIndexEntry {
        PackIndexEntry {
            objtype: ObjectType::RawFile,
            checksum: Checksum::from_bytes([byte; 32]),
            offset,
        }
    }

    fn pack_with_offsets(data: &[u8], offsets: &[u64]) -> (Checksum, MemPacks) {
        let id = Checksum::compute(ALGO, data);
        let index = PackIndex {
            data_checksum: id,
            entries: offsets
                .iter()
                .enumerate()
                .map(|(i, &offset)| entry(i as u8, offset))
                .collect(),
        };
        let mut packs = MemPacks::default();
        packs.insert(id, index.encode(), data.to_vec());
        (id, packs)
    }

    fn reason(result: Result<()>) -> PackCorruption {
        match result {
            Err(Error::CorruptPack { reason, .. }) => reason,
            other => panic!("expected CorruptPack, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_pack() {
        let (id, packs) = pack_with_offsets(b"0123456789", &[0, 4, 9]);
        assert!(verify_pack(&packs, ALGO, &id).is_ok());
    }

    #[test]
    fn test_index_layout() {
        let index = PackIndex {
            data_checksum: Checksum::from_bytes([9; 32]),
            entries: vec![entry(1, 0x0102030405060708)],
        };
        let encoded = index.encode();
        assert_eq!(encoded.len(), INDEX_HEADER_SIZE + INDEX_ENTRY_SIZE);
        assert_eq!(&encoded[0..4], b"APKI");
        assert_eq!(&encoded[4..8], &[0, 0, 0, 1]);
        assert_eq!(&encoded[40..44], &[0, 0, 0, 1]);
        assert_eq!(encoded[44], ObjectType::RawFile.to_u8());
        assert_eq!(&encoded[77..85], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(PackIndex::decode(&encoded).unwrap(), index);
    }

    #[test]
    fn test_data_checksum_mismatch_reported_first() {
        let data = b"pack data blob".to_vec();
        // Out-of-bounds offset too: the checksum failure must win.
        let (id, mut packs) = pack_with_offsets(&data, &[1000]);
        packs.packs.get_mut(&id).unwrap().1[3] ^= 0xFF;

        let actual = Checksum::compute(ALGO, &packs.packs[&id].1);
        assert_eq!(
            reason(verify_pack(&packs, ALGO, &id)),
            PackCorruption::ChecksumMismatch {
                expected: id,
                actual
            }
        );
    }

    #[test]
    fn test_offset_boundary() {
        let data = b"abcdefgh";
        let (id, packs) = pack_with_offsets(data, &[0, 8]);
        assert_eq!(
            reason(verify_pack(&packs, ALGO, &id)),
            PackCorruption::OffsetOutOfBounds { offset: 8, size: 8 }
        );

        let (id, packs) = pack_with_offsets(data, &[0, 7]);
        assert!(verify_pack(&packs, ALGO, &id).is_ok());
    }

    #[test]
    fn test_empty_pack_has_no_valid_offset() {
        let (id, packs) = pack_with_offsets(b"", &[]);
        assert!(verify_pack(&packs, ALGO, &id).is_ok());

        let (id, packs) = pack_with_offsets(b"", &[0]);
        assert!(matches!(
            reason(verify_pack(&packs, ALGO, &id)),
            PackCorruption::OffsetOutOfBounds { offset: 0, size: 0 }
        ));
    }

    #[test]
    fn test_identity_mismatch() {
        let data = b"data".to_vec();
        let claimed = Checksum::compute(ALGO, b"other data");
        let index = PackIndex {
            data_checksum: claimed,
            entries: vec![],
        };
        let id = Checksum::compute(ALGO, &data);
        let mut packs = MemPacks::default();
        packs.insert(id, index.encode(), data);

        assert_eq!(
            reason(verify_pack(&packs, ALGO, &id)),
            PackCorruption::IdentityMismatch { claimed }
        );
    }

    #[test]
    fn test_malformed_indexes() {
        let (id, packs) = pack_with_offsets(b"data", &[0, 1]);
        let good = packs.packs[&id].0.clone();

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        let mut bad_type = good.clone();
        bad_type[INDEX_HEADER_SIZE] = 99;
        let mut wrong_count = good.clone();
        wrong_count[43] = 3;
        let truncated = good[..good.len() - 1].to_vec();

        for index in [bad_magic, bad_type, wrong_count, truncated, vec![]] {
            let mut packs = MemPacks::default();
            packs.insert(id, index, b"data".to_vec());
            assert!(matches!(
                reason(verify_pack(&packs, ALGO, &id)),
                PackCorruption::MalformedIndex { .. }
            ));
        }
    }

    #[test]
    fn test_writer_produces_valid_pack() {
        let temp_dir = TempDir::new().unwrap();
        let a = ObjectName::new(Checksum::from_bytes([1; 32]), ObjectType::Commit);
        let b = ObjectName::new(Checksum::from_bytes([2; 32]), ObjectType::DirMeta);

        let mut writer = PackWriter::new(temp_dir.path(), ALGO).unwrap();
        writer.add(a, b"first").unwrap();
        writer.add(b, b"second").unwrap();
        let id = writer.finish().unwrap();

        let data = std::fs::read(pack_data_path(temp_dir.path(), &id)).unwrap();
        assert_eq!(data, b"firstsecond");
        assert_eq!(Checksum::compute(ALGO, &data), id);

        let index_path = pack_index_path(temp_dir.path(), &id);
        let file_name = index_path.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_pack_index_name(file_name), Some(id));

        let index = PackIndex::decode(&std::fs::read(&index_path).unwrap()).unwrap();
        assert_eq!(index.find(&a), Some(0));
        assert_eq!(index.find(&b), Some(5));
        assert_eq!(
            index.find(&ObjectName::new(b.checksum, ObjectType::DirTree)),
            None
        );
    }

    #[test]
    fn test_parse_pack_index_name_rejects_other_files() {
        assert_eq!(parse_pack_index_name("pack-zz.index"), None);
        assert_eq!(parse_pack_index_name("notes.txt"), None);
        let id = Checksum::from_bytes([3; 32]);
        assert_eq!(parse_pack_index_name(&format!("pack-{}.data", id)), None);
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// An entry is accepted iff its offset is strictly inside the data blob
        #[test]
        fn prop_offset_bounds(
            data in prop::collection::vec(any::<u8>(), 1..256),
            pick in any::<u64>(),
        ) {
            let size = data.len() as u64;
            let offset = pick % (size * 2);
            let (id, packs) = pack_with_offsets(&data, &[offset]);
            let result = verify_pack(&packs, ALGO, &id);
            prop_assert_eq!(result.is_ok(), offset < size);
        }
    }
}
