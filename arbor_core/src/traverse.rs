//! Reachability traversal from commits.

use crate::cancel::CancelFlag;
use crate::canonical::checksum_metadata;
use crate::checksum::Checksum;
use crate::commit::Commit;
use crate::error::{Error, Result};
use crate::object::{ObjectName, ObjectType};
use crate::store::{ObjectStore, RepoMode};
use crate::tree::DirTree;
use crate::validate::{Metadata, decode_validated};
use std::collections::BTreeSet;
use tracing::debug;

/// Collect every object reachable from `commits`.
///
/// Each commit contributes itself, its root dirtree/dirmeta pair and everything
/// below that tree. Parent commits are not followed. A dirtree already in the set
/// is not expanded again, so shared subtrees cost one visit.
///
/// A commit or dirtree whose bytes no longer hash to its name is kept in the set
/// but not expanded: its references cannot be trusted, and verification reports
/// it. Any load, decode or validation failure of an intact object aborts the
/// traversal, attributed to the object involved.
pub fn traverse_commits<'c, S, I>(
    store: &S,
    commits: I,
    cancel: &CancelFlag,
) -> Result<BTreeSet<ObjectName>>
where
    S: ObjectStore + ?Sized,
    I: IntoIterator<Item = &'c ObjectName>,
{
    let file_types: &[ObjectType] = match store.mode() {
        RepoMode::Bare => &[ObjectType::RawFile],
        RepoMode::Archive => &[ObjectType::ArchivedFileMeta, ObjectType::ArchivedFileContent],
    };

    let mut reachable = BTreeSet::new();
    let mut pending: Vec<ObjectName> = Vec::new();

    for commit_name in commits {
        cancel.check()?;
        if !reachable.insert(*commit_name) {
            continue;
        }
        debug!(commit = %commit_name, "traversing commit");

        let Some(commit) = load_commit(store, commit_name)? else {
            continue;
        };
        let (tree, meta) = commit.root().map_err(|e| e.for_object(*commit_name))?;
        reachable.insert(ObjectName::new(meta, ObjectType::DirMeta));
        visit_dirtree(tree, &mut reachable, &mut pending);

        while let Some(tree_name) = pending.pop() {
            cancel.check()?;
            let Some(tree) = load_dirtree(store, &tree_name)? else {
                continue;
            };
            let attribute = |e: Error| e.for_object(tree_name);

            for file in &tree.files {
                let checksum = file.checksum().map_err(attribute)?;
                for objtype in file_types {
                    reachable.insert(ObjectName::new(checksum, *objtype));
                }
            }
            for dir in &tree.dirs {
                reachable.insert(ObjectName::new(
                    dir.meta_checksum().map_err(attribute)?,
                    ObjectType::DirMeta,
                ));
                visit_dirtree(dir.tree_checksum().map_err(attribute)?, &mut reachable, &mut pending);
            }
        }
    }

    debug!(objects = reachable.len(), "traversal complete");
    Ok(reachable)
}

/// Mark a dirtree reachable and queue it for expansion unless already seen.
fn visit_dirtree(
    checksum: Checksum,
    reachable: &mut BTreeSet<ObjectName>,
    pending: &mut Vec<ObjectName>,
) {
    let name = ObjectName::new(checksum, ObjectType::DirTree);
    if reachable.insert(name) {
        pending.push(name);
    }
}

/// Load and decode a metadata object; `None` if it does not hash to its name.
fn load_metadata<S: ObjectStore + ?Sized>(store: &S, name: &ObjectName) -> Result<Option<Metadata>> {
    let payload = store.load_object(name).map_err(|e| e.for_object(*name))?;
    if checksum_metadata(store.algorithm(), name.objtype, &payload) != name.checksum {
        debug!(object = %name, "checksum mismatch, not expanding");
        return Ok(None);
    }
    decode_validated(name.objtype, &payload)
        .map(Some)
        .map_err(|e| e.for_object(*name))
}

fn load_commit<S: ObjectStore + ?Sized>(store: &S, name: &ObjectName) -> Result<Option<Commit>> {
    match load_metadata(store, name)? {
        None => Ok(None),
        Some(Metadata::Commit(commit)) => Ok(Some(commit)),
        Some(other) => {
            Err(Error::invalid_object_type("commit", other.objtype().as_str()).for_object(*name))
        }
    }
}

fn load_dirtree<S: ObjectStore + ?Sized>(store: &S, name: &ObjectName) -> Result<Option<DirTree>> {
    match load_metadata(store, name)? {
        None => Ok(None),
        Some(Metadata::DirTree(tree)) => Ok(Some(tree)),
        Some(other) => {
            Err(Error::invalid_object_type("dirtree", other.objtype().as_str()).for_object(*name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Algorithm;
    use crate::file::{FileInfo, Xattrs};
    use crate::store::LoadedFile;
    use crate::testutil::Fixture;
    use crate::tree::FileEntry;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn commits_of(store: &impl ObjectStore) -> BTreeSet<ObjectName> {
        store
            .list_all_objects()
            .unwrap()
            .into_iter()
            .filter(|n| n.objtype == ObjectType::Commit)
            .collect()
    }

    #[test]
    fn test_reachable_set_bare() {
        let fx = Fixture::new(RepoMode::Bare);
        let h = fx.small_history();

        let reachable = traverse_commits(&fx.repo, &commits_of(&fx.repo), &CancelFlag::new()).unwrap();

        let expected: BTreeSet<ObjectName> = [
            h.commit,
            h.root,
            h.sub,
            h.meta,
            ObjectName::new(h.hello, ObjectType::RawFile),
            ObjectName::new(h.nested, ObjectType::RawFile),
        ]
        .into_iter()
        .collect();
        assert_eq!(reachable, expected);
    }

    #[test]
    fn test_archive_mode_includes_both_halves() {
        let fx = Fixture::new(RepoMode::Archive);
        let h = fx.small_history();

        let reachable = traverse_commits(&fx.repo, &[h.commit], &CancelFlag::new()).unwrap();
        for checksum in [h.hello, h.nested] {
            assert!(reachable.contains(&ObjectName::new(checksum, ObjectType::ArchivedFileMeta)));
            assert!(reachable.contains(&ObjectName::new(checksum, ObjectType::ArchivedFileContent)));
            assert!(!reachable.contains(&ObjectName::new(checksum, ObjectType::RawFile)));
        }
        assert_eq!(reachable.len(), 8);
    }

    #[test]
    fn test_unreferenced_objects_not_reachable() {
        let fx = Fixture::new(RepoMode::Bare);
        let h = fx.small_history();
        let orphan = fx.file(b"orphan");

        let reachable = traverse_commits(&fx.repo, &[h.commit], &CancelFlag::new()).unwrap();
        assert!(!reachable.contains(&ObjectName::new(orphan, ObjectType::RawFile)));
    }

    #[test]
    fn test_parents_not_followed() {
        let fx = Fixture::new(RepoMode::Bare);
        let h = fx.small_history();

        let empty = fx.tree(&[], &[]);
        let meta = h.meta.checksum;
        let child = Commit::new(Some(h.commit.checksum), "child", "", 2, empty, meta);
        let child = ObjectName::new(fx.repo.write_commit(&child).unwrap(), ObjectType::Commit);

        let reachable = traverse_commits(&fx.repo, &[child], &CancelFlag::new()).unwrap();
        assert!(!reachable.contains(&h.commit));
        assert_eq!(reachable.len(), 3);
    }

    /// Delegates to a repo and counts metadata loads per object.
    struct CountingStore<'a> {
        inner: &'a crate::Repo,
        loads: Mutex<HashMap<ObjectName, usize>>,
    }

    impl ObjectStore for CountingStore<'_> {
        fn algorithm(&self) -> Algorithm {
            ObjectStore::algorithm(self.inner)
        }

        fn mode(&self) -> RepoMode {
            ObjectStore::mode(self.inner)
        }

        fn list_all_objects(&self) -> Result<BTreeSet<ObjectName>> {
            self.inner.list_all_objects()
        }

        fn load_object(&self, name: &ObjectName) -> Result<Vec<u8>> {
            *self.loads.lock().unwrap().entry(*name).or_default() += 1;
            self.inner.load_object(name)
        }

        fn load_file(&self, checksum: &Checksum) -> Result<LoadedFile<'_>> {
            self.inner.load_file(checksum)
        }

        fn delete_object(&self, name: &ObjectName) -> Result<bool> {
            self.inner.delete_object(name)
        }
    }

    #[test]
    fn test_shared_subtree_visited_once() {
        let fx = Fixture::new(RepoMode::Bare);
        let meta = fx.dirmeta();
        let shared_file = fx.file(b"shared");
        let shared = fx.tree(&[("lib.rs", shared_file)], &[]);

        let root_a = fx.tree(&[("a", fx.file(b"a"))], &[("shared", shared, meta)]);
        let root_b = fx.tree(&[("b", fx.file(b"b"))], &[("shared", shared, meta), ("again", shared, meta)]);
        let a = fx.commit(root_a, meta, "a");
        let b = fx.commit(root_b, meta, "b");

        let store = CountingStore {
            inner: &fx.repo,
            loads: Mutex::new(HashMap::new()),
        };
        let commits = [
            ObjectName::new(a, ObjectType::Commit),
            ObjectName::new(b, ObjectType::Commit),
        ];
        let reachable = traverse_commits(&store, &commits, &CancelFlag::new()).unwrap();

        let loads = store.loads.lock().unwrap();
        let shared_name = ObjectName::new(shared, ObjectType::DirTree);
        assert_eq!(loads[&shared_name], 1);
        assert!(loads.values().all(|&n| n == 1));
        assert!(reachable.contains(&shared_name));
        assert!(reachable.contains(&ObjectName::new(shared_file, ObjectType::RawFile)));
    }

    #[test]
    fn test_malformed_tree_aborts_with_identity() {
        let fx = Fixture::new(RepoMode::Bare);
        let meta = fx.dirmeta();
        let file = fx.file(b"x");
        let dup = DirTree {
            files: vec![
                FileEntry {
                    name: "same".into(),
                    checksum: file.as_bytes().to_vec(),
                },
                FileEntry {
                    name: "same".into(),
                    checksum: file.as_bytes().to_vec(),
                },
            ],
            dirs: vec![],
        };
        let bad_tree = fx.repo.write_dirtree(&dup).unwrap();
        let commit = fx.commit(bad_tree, meta, "broken");

        let err = traverse_commits(
            &fx.repo,
            &[ObjectName::new(commit, ObjectType::Commit)],
            &CancelFlag::new(),
        )
        .unwrap_err();
        match err {
            Error::Object { name, source } => {
                assert_eq!(name, ObjectName::new(bad_tree, ObjectType::DirTree));
                assert!(matches!(*source, Error::Schema { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_corrupted_commit_reference_not_followed() {
        let fx = Fixture::new(RepoMode::Bare);
        let h = fx.small_history();
        // Inside the root dirtree checksum: root_tree(4 + 32) then root_meta(4 + 32) end the payload.
        fx.flip_byte(&h.commit, -40);

        let reachable = traverse_commits(&fx.repo, &[h.commit], &CancelFlag::new()).unwrap();
        assert_eq!(reachable, BTreeSet::from([h.commit]));
    }

    #[test]
    fn test_corrupted_tree_not_expanded() {
        let fx = Fixture::new(RepoMode::Bare);
        let h = fx.small_history();
        // envelope(16) + n_files(4) + "hello.txt"(4 + 9) + checksum length(4) = 37
        fx.flip_byte(&h.root, 40);

        let reachable = traverse_commits(&fx.repo, &[h.commit], &CancelFlag::new()).unwrap();
        let expected = BTreeSet::from([h.commit, h.root, h.meta]);
        assert_eq!(reachable, expected);
    }

    #[test]
    fn test_missing_tree_aborts() {
        let fx = Fixture::new(RepoMode::Bare);
        let meta = fx.dirmeta();
        let ghost = Checksum::from_bytes([0xEE; 32]);
        let commit = fx.commit(ghost, meta, "dangling");

        let err = traverse_commits(
            &fx.repo,
            &[ObjectName::new(commit, ObjectType::Commit)],
            &CancelFlag::new(),
        )
        .unwrap_err();
        assert!(matches!(err.root_cause(), Error::ObjectNotFound { .. }));
        assert!(err.to_string().contains(&ghost.to_hex()));
    }

    #[test]
    fn test_cancelled_before_start() {
        let fx = Fixture::new(RepoMode::Bare);
        let h = fx.small_history();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = traverse_commits(&fx.repo, &[h.commit], &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_symlink_and_xattr_files_are_leaves() {
        let fx = Fixture::new(RepoMode::Bare);
        let meta = fx.dirmeta();
        let link = fx
            .repo
            .write_file(&FileInfo::symlink("hello.txt"), &Xattrs::new(), &b""[..])
            .unwrap();
        let root = fx.tree(&[("link", link)], &[]);
        let commit = fx.commit(root, meta, "links");

        let reachable = traverse_commits(
            &fx.repo,
            &[ObjectName::new(commit, ObjectType::Commit)],
            &CancelFlag::new(),
        )
        .unwrap();
        assert!(reachable.contains(&ObjectName::new(link, ObjectType::RawFile)));
        assert_eq!(reachable.len(), 4);
    }
}
