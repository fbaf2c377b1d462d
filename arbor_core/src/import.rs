//! Importing a directory tree as a commit.

use crate::checksum::Checksum;
use crate::commit::Commit;
use crate::error::{Error, Result};
use crate::file::{FileInfo, Xattrs, modes};
use crate::object::{ObjectName, ObjectType};
use crate::repo::Repo;
use crate::tree::{DirMeta, DirTree};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Descriptive fields of a new commit.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub subject: String,
    pub body: String,
    pub parent: Option<Checksum>,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    /// Extra key/value metadata stored in the commit.
    pub metadata: Vec<(String, Vec<u8>)>,
}

impl Repo {
    /// Store the contents of `path` and a commit pointing at them.
    ///
    /// Returns the commit checksum. The parent, if given, must already exist.
    pub fn commit_directory(&self, path: &Path, options: &CommitOptions) -> Result<Checksum> {
        if let Some(parent) = options.parent {
            let name = ObjectName::new(parent, ObjectType::Commit);
            if !self.has_object(&name)? {
                return Err(Error::object_not_found(name.to_string()));
            }
        }

        let metadata = fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(Error::Io {
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Not a directory: {}", path.display()),
                ),
            });
        }

        let repo_root = fs::canonicalize(self.root())?;
        let (tree, meta) = self.import_directory(path, &repo_root)?;
        let mut commit = Commit::new(
            options.parent,
            options.subject.clone(),
            options.body.clone(),
            options.timestamp,
            tree,
            meta,
        );
        for (key, value) in &options.metadata {
            commit.set_metadata(key.as_str(), value.as_slice());
        }
        let checksum = self.write_commit(&commit)?;
        debug!(commit = %checksum, path = %path.display(), "committed directory");
        Ok(checksum)
    }

    /// Store a directory recursively; returns its `(dirtree, dirmeta)` checksums.
    ///
    /// `repo_root` is the canonical path of this repository, which is skipped if
    /// it lives inside the imported tree.
    fn import_directory(&self, path: &Path, repo_root: &Path) -> Result<(Checksum, Checksum)> {
        let mut tree = DirTree::new();

        // Use ignore crate to respect .gitignore
        let walker = ignore::WalkBuilder::new(path)
            .max_depth(Some(1)) // Only immediate children
            .hidden(false) // Include hidden files
            .git_ignore(true) // Respect .gitignore
            .build();

        for entry in walker {
            let entry = entry?;
            if entry.depth() == 0 {
                continue;
            }
            let entry_path = entry.path();

            let file_name = entry_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    Error::schema(format!("Invalid filename: {}", entry_path.display()))
                })?
                .to_string();

            let metadata = fs::symlink_metadata(entry_path)?;
            let file_type = metadata.file_type();
            if file_type.is_dir() {
                if fs::canonicalize(entry_path)? == repo_root {
                    continue;
                }
                let (subtree, submeta) = self.import_directory(entry_path, repo_root)?;
                tree.add_dir(file_name, subtree, submeta);
            } else if file_type.is_symlink() {
                let target = fs::read_link(entry_path)?;
                let target = target.to_str().ok_or_else(|| {
                    Error::schema(format!("Invalid symlink target: {}", entry_path.display()))
                })?;
                let mut info = FileInfo::symlink(target);
                set_owner(&mut info, &metadata);
                tree.add_file(file_name, self.write_file(&info, &Xattrs::new(), io::empty())?);
            } else if file_type.is_file() {
                let mut info = FileInfo::regular(file_mode(&metadata));
                set_owner(&mut info, &metadata);
                let file = fs::File::open(entry_path)?;
                tree.add_file(file_name, self.write_file(&info, &Xattrs::new(), file)?);
            } else {
                return Err(Error::Io {
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("Unsupported file type: {}", entry_path.display()),
                    ),
                });
            }
        }

        let meta = self.write_dirmeta(&dir_meta(&fs::metadata(path)?))?;
        let tree = self.write_dirtree(&tree)?;
        Ok((tree, meta))
    }
}

/// Get the file mode from metadata.
#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode() & modes::VALID_BITS
}

/// Get the file mode from metadata (Windows fallback).
#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    modes::REGULAR
}

#[cfg(unix)]
fn set_owner(info: &mut FileInfo, metadata: &fs::Metadata) {
    use std::os::unix::fs::MetadataExt;
    info.uid = metadata.uid();
    info.gid = metadata.gid();
}

#[cfg(not(unix))]
fn set_owner(_info: &mut FileInfo, _metadata: &fs::Metadata) {}

#[cfg(unix)]
fn dir_meta(metadata: &fs::Metadata) -> DirMeta {
    use std::os::unix::fs::MetadataExt;
    let mut meta = DirMeta::new(metadata.mode() & modes::VALID_BITS);
    meta.uid = metadata.uid();
    meta.gid = metadata.gid();
    meta
}

#[cfg(not(unix))]
fn dir_meta(_metadata: &fs::Metadata) -> DirMeta {
    DirMeta::new(modes::DIRECTORY)
}
