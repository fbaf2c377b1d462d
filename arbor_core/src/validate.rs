//! Structural validation of decoded objects, independent of checksums.

use crate::checksum::CHECKSUM_SIZE;
use crate::commit::Commit;
use crate::error::{Error, Result};
use crate::file::{FileInfo, Xattrs, modes};
use crate::object::ObjectType;
use crate::tree::{DirMeta, DirTree};
use std::collections::HashSet;

/// Maximum length of a directory entry name in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// A decoded metadata object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    Commit(Commit),
    DirTree(DirTree),
    DirMeta(DirMeta),
}

impl Metadata {
    /// Decode a metadata payload of the given type.
    pub fn decode(objtype: ObjectType, payload: &[u8]) -> Result<Self> {
        match objtype {
            ObjectType::Commit => Ok(Metadata::Commit(Commit::decode(payload)?)),
            ObjectType::DirTree => Ok(Metadata::DirTree(DirTree::decode(payload)?)),
            ObjectType::DirMeta => Ok(Metadata::DirMeta(DirMeta::decode(payload)?)),
            ObjectType::RawFile | ObjectType::ArchivedFileMeta | ObjectType::ArchivedFileContent => {
                Err(Error::invalid_object_type("metadata", objtype.as_str()))
            }
        }
    }

    pub fn objtype(&self) -> ObjectType {
        match self {
            Metadata::Commit(_) => ObjectType::Commit,
            Metadata::DirTree(_) => ObjectType::DirTree,
            Metadata::DirMeta(_) => ObjectType::DirMeta,
        }
    }
}

/// Validate a decoded metadata object.
pub fn validate_structure(metadata: &Metadata) -> Result<()> {
    match metadata {
        Metadata::Commit(commit) => validate_commit(commit),
        Metadata::DirTree(tree) => validate_dirtree(tree),
        Metadata::DirMeta(meta) => validate_dirmeta(meta),
    }
}

/// Decode and validate in one step.
pub fn decode_validated(objtype: ObjectType, payload: &[u8]) -> Result<Metadata> {
    let metadata = Metadata::decode(objtype, payload)?;
    validate_structure(&metadata)?;
    Ok(metadata)
}

pub fn validate_checksum_bytes(bytes: &[u8], what: &str) -> Result<()> {
    if bytes.len() != CHECKSUM_SIZE {
        return Err(Error::schema(format!(
            "Invalid {} checksum length {} (expected {})",
            what,
            bytes.len(),
            CHECKSUM_SIZE
        )));
    }
    Ok(())
}

pub fn validate_commit(commit: &Commit) -> Result<()> {
    validate_checksum_bytes(&commit.root_tree, "root tree")?;
    validate_checksum_bytes(&commit.root_meta, "root meta")?;
    if !commit.parent.is_empty() {
        validate_checksum_bytes(&commit.parent, "parent")?;
    }
    for pair in commit.metadata.windows(2) {
        if pair[0].0.as_bytes() >= pair[1].0.as_bytes() {
            return Err(Error::schema(format!(
                "Commit metadata keys out of order: {:?} then {:?}",
                pair[0].0, pair[1].0
            )));
        }
    }
    Ok(())
}

/// Check a directory entry name.
pub fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::schema("Entry name cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::schema(format!(
            "Entry name too long: {} bytes (max {})",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::schema(format!("Invalid entry name: {:?}", name)));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(Error::schema(format!(
            "Entry name contains '/' or NUL: {:?}",
            name
        )));
    }
    Ok(())
}

fn validate_sorted<'a>(mut names: impl Iterator<Item = &'a str>, what: &str) -> Result<()> {
    let Some(mut prev) = names.next() else {
        return Ok(());
    };
    for name in names {
        if prev.as_bytes() >= name.as_bytes() {
            return Err(Error::schema(format!(
                "{} entries not strictly sorted: {:?} then {:?}",
                what, prev, name
            )));
        }
        prev = name;
    }
    Ok(())
}

pub fn validate_dirtree(tree: &DirTree) -> Result<()> {
    for file in &tree.files {
        validate_entry_name(&file.name)?;
        validate_checksum_bytes(&file.checksum, "file")?;
    }
    for dir in &tree.dirs {
        validate_entry_name(&dir.name)?;
        validate_checksum_bytes(&dir.tree, "dirtree")?;
        validate_checksum_bytes(&dir.meta, "dirmeta")?;
    }

    validate_sorted(tree.files.iter().map(|f| f.name.as_str()), "File")?;
    validate_sorted(tree.dirs.iter().map(|d| d.name.as_str()), "Directory")?;

    let file_names: HashSet<&str> = tree.files.iter().map(|f| f.name.as_str()).collect();
    if let Some(dup) = tree.dirs.iter().find(|d| file_names.contains(d.name.as_str())) {
        return Err(Error::schema(format!(
            "Duplicate entry name in directory: {:?}",
            dup.name
        )));
    }
    Ok(())
}

fn validate_xattrs(xattrs: &Xattrs) -> Result<()> {
    for pair in xattrs.0.windows(2) {
        if pair[0].0 >= pair[1].0 {
            return Err(Error::schema("Extended attributes not strictly sorted by name"));
        }
    }
    if xattrs.iter().any(|(name, _)| name.is_empty()) {
        return Err(Error::schema("Extended attribute with empty name"));
    }
    Ok(())
}

fn validate_mode_bits(mode: u32) -> Result<()> {
    if mode & !modes::VALID_BITS != 0 {
        return Err(Error::schema(format!("Invalid mode bits: {:o}", mode)));
    }
    Ok(())
}

pub fn validate_dirmeta(meta: &DirMeta) -> Result<()> {
    validate_mode_bits(meta.mode)?;
    if meta.mode & modes::S_IFMT != modes::S_IFDIR {
        return Err(Error::schema(format!(
            "Invalid directory metadata mode: {:o}",
            meta.mode
        )));
    }
    validate_xattrs(&meta.xattrs)
}

/// A file mode must describe a regular file or a symlink.
pub fn validate_file_mode(mode: u32) -> Result<()> {
    validate_mode_bits(mode)?;
    match mode & modes::S_IFMT {
        modes::S_IFREG | modes::S_IFLNK => Ok(()),
        _ => Err(Error::schema(format!("Invalid file mode: {:o}", mode))),
    }
}

/// Validate file metadata as loaded alongside its content.
pub fn validate_file(info: &FileInfo, xattrs: &Xattrs) -> Result<()> {
    validate_file_mode(info.mode)?;
    match (info.is_symlink(), &info.symlink_target) {
        (true, None) => return Err(Error::schema("Symlink without a target")),
        (false, Some(_)) => return Err(Error::schema("Regular file with a symlink target")),
        _ => {}
    }
    validate_xattrs(xattrs)
}
