//! Repository fixtures shared by unit tests.

use crate::checksum::{Algorithm, Checksum};
use crate::commit::Commit;
use crate::file::{FileInfo, Xattrs, modes};
use crate::object::{ObjectName, ObjectType};
use crate::repo::Repo;
use crate::store::RepoMode;
use crate::tree::{DirMeta, DirTree};
use std::fs;
use tempfile::TempDir;

pub(crate) struct Fixture {
    _dir: TempDir,
    pub repo: Repo,
}

impl Fixture {
    pub fn new(mode: RepoMode) -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repo::init(dir.path().join("repo"), Algorithm::Blake3, mode).unwrap();
        Self { _dir: dir, repo }
    }

    pub fn file(&self, content: &[u8]) -> Checksum {
        self.repo
            .write_file(&FileInfo::regular(modes::REGULAR), &Xattrs::new(), content)
            .unwrap()
    }

    pub fn dirmeta(&self) -> Checksum {
        self.repo.write_dirmeta(&DirMeta::new(modes::DIRECTORY)).unwrap()
    }

    pub fn tree(&self, files: &[(&str, Checksum)], dirs: &[(&str, Checksum, Checksum)]) -> Checksum {
        let mut tree = DirTree::new();
        for (name, checksum) in files {
            tree.add_file(*name, *checksum);
        }
        for (name, dirtree, dirmeta) in dirs {
            tree.add_dir(*name, *dirtree, *dirmeta);
        }
        self.repo.write_dirtree(&tree).unwrap()
    }

    pub fn commit(&self, root_tree: Checksum, root_meta: Checksum, subject: &str) -> Checksum {
        let commit = Commit::new(None, subject, "", 1_700_000_000, root_tree, root_meta);
        self.repo.write_commit(&commit).unwrap()
    }

    /// XOR one byte of a loose object's stored bytes; negative positions count from the end.
    pub fn flip_byte(&self, name: &ObjectName, pos: isize) {
        let path = self.repo.object_path(name);
        let mut raw = fs::read(&path).unwrap();
        let idx = if pos < 0 {
            raw.len() - pos.unsigned_abs()
        } else {
            pos as usize
        };
        raw[idx] ^= 0x01;
        fs::write(&path, raw).unwrap();
    }

    /// One commit: `hello.txt` at the root plus `sub/nested.txt`.
    pub fn small_history(&self) -> SmallHistory {
        let meta = self.dirmeta();
        let hello = self.file(b"hello world\n");
        let nested = self.file(b"nested content\n");
        let sub = self.tree(&[("nested.txt", nested)], &[]);
        let root = self.tree(&[("hello.txt", hello)], &[("sub", sub, meta)]);
        let commit = self.commit(root, meta, "initial import");
        SmallHistory {
            commit: ObjectName::new(commit, ObjectType::Commit),
            root: ObjectName::new(root, ObjectType::DirTree),
            sub: ObjectName::new(sub, ObjectType::DirTree),
            meta: ObjectName::new(meta, ObjectType::DirMeta),
            hello,
            nested,
        }
    }
}

pub(crate) struct SmallHistory {
    pub commit: ObjectName,
    pub root: ObjectName,
    pub sub: ObjectName,
    pub meta: ObjectName,
    pub hello: Checksum,
    pub nested: Checksum,
}
