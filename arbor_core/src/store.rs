//! Storage collaborators used by fsck.
//!
//! The checker never touches the filesystem directly. It reads objects through an
//! [`ObjectStore`] and packs through a [`PackStore`]; [`crate::Repo`] implements both.

use crate::checksum::{Algorithm, Checksum};
use crate::error::{Error, Result};
use crate::file::{FileInfo, Xattrs};
use crate::object::ObjectName;
use std::collections::BTreeSet;
use std::io::Read;

/// How file objects are represented in a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoMode {
    /// One `RawFile` object per file.
    Bare,
    /// An `ArchivedFileMeta` + `ArchivedFileContent` pair per file.
    Archive,
}

impl RepoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoMode::Bare => "bare",
            RepoMode::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "bare" => Ok(RepoMode::Bare),
            "archive" => Ok(RepoMode::Archive),
            _ => Err(Error::unsupported_mode(s)),
        }
    }
}

/// A file object as loaded for verification.
pub struct LoadedFile<'a> {
    /// The file's content, streamed.
    pub content: Box<dyn Read + 'a>,
    pub info: FileInfo,
    pub xattrs: Xattrs,
}

/// Read access to objects, plus deletion of confirmed-corrupt ones.
///
/// Implementations must be safe to read from several threads at once; the store
/// is not mutated while a check runs, except by the final deletion pass.
pub trait ObjectStore: Send + Sync {
    /// Digest algorithm objects in this store are named with.
    fn algorithm(&self) -> Algorithm;

    /// Representation used for file objects.
    fn mode(&self) -> RepoMode;

    /// Every object in the store, loose or packed.
    fn list_all_objects(&self) -> Result<BTreeSet<ObjectName>>;

    /// Load a metadata object's payload.
    ///
    /// Returns [`Error::ObjectNotFound`] if the object does not exist.
    fn load_object(&self, name: &ObjectName) -> Result<Vec<u8>>;

    /// Load a file object: content stream, metadata and extended attributes.
    fn load_file(&self, checksum: &Checksum) -> Result<LoadedFile<'_>>;

    /// Delete an object. Returns `true` if something was removed.
    fn delete_object(&self, name: &ObjectName) -> Result<bool>;
}

/// Read access to packs.
pub trait PackStore: Send + Sync {
    /// Ids of every pack in the store.
    fn list_pack_ids(&self) -> Result<BTreeSet<Checksum>>;

    /// Raw bytes of a pack's index.
    fn open_pack_index(&self, id: &Checksum) -> Result<Vec<u8>>;

    /// A stream over a pack's data blob.
    fn open_pack_data(&self, id: &Checksum) -> Result<Box<dyn Read + '_>>;

    /// Size of a pack's data blob in bytes.
    fn pack_data_size(&self, id: &Checksum) -> Result<u64>;
}
