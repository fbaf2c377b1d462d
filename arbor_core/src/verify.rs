//! Per-object verification: structure first, then checksum.

use crate::canonical::{ObjectPayload, canonical_checksum};
use crate::error::{Error, Result};
use crate::object::{ObjectName, ObjectType};
use crate::store::ObjectStore;
use crate::validate::{Metadata, validate_file, validate_structure};

/// Verify one object against its name.
///
/// Metadata is decoded and structurally validated before it is hashed; file
/// objects have their mode checked before their content is streamed through the
/// hasher. `ArchivedFileContent` is skipped: its bytes are covered when the paired
/// `ArchivedFileMeta` is verified.
///
/// A checksum mismatch is [`Error::CorruptObject`]; any other failure is returned
/// attributed to `name`.
pub fn verify_object<S: ObjectStore + ?Sized>(store: &S, name: &ObjectName) -> Result<()> {
    let algorithm = store.algorithm();
    let actual = match name.objtype {
        ObjectType::Commit | ObjectType::DirTree | ObjectType::DirMeta => {
            let payload = store.load_object(name).map_err(|e| e.for_object(*name))?;
            let metadata = Metadata::decode(name.objtype, &payload).map_err(|e| e.for_object(*name))?;
            validate_structure(&metadata).map_err(|e| e.for_object(*name))?;
            canonical_checksum(algorithm, name.objtype, ObjectPayload::Metadata(&payload))
        }
        ObjectType::ArchivedFileContent => return Ok(()),
        ObjectType::RawFile | ObjectType::ArchivedFileMeta => {
            let mut file = store
                .load_file(&name.checksum)
                .map_err(|e| e.for_object(*name))?;
            validate_file(&file.info, &file.xattrs).map_err(|e| e.for_object(*name))?;
            canonical_checksum(
                algorithm,
                name.objtype,
                ObjectPayload::File {
                    info: &file.info,
                    xattrs: &file.xattrs,
                    content: &mut *file.content,
                },
            )
        }
    }
    .map_err(|e| e.for_object(*name))?;

    if actual != name.checksum {
        return Err(Error::CorruptObject {
            name: *name,
            expected: name.checksum,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileInfo, Xattrs, modes};
    use crate::store::RepoMode;
    use crate::testutil::Fixture;
    use crate::tree::DirMeta;

    fn root_cause(result: Result<()>) -> Error {
        match result {
            Err(Error::Object { source, .. }) => *source,
            Err(err) => err,
            Ok(()) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_intact_objects_verify() {
        for mode in [RepoMode::Bare, RepoMode::Archive] {
            let fx = Fixture::new(mode);
            fx.small_history();
            for name in crate::ObjectStore::list_all_objects(&fx.repo).unwrap() {
                verify_object(&fx.repo, &name).unwrap();
            }
        }
    }

    #[test]
    fn test_flipped_commit_subject() {
        let fx = Fixture::new(RepoMode::Bare);
        let h = fx.small_history();
        // envelope(16) + n_meta(4) + empty parent(4) + subject length(4)
        fx.flip_byte(&h.commit, 28);

        match verify_object(&fx.repo, &h.commit) {
            Err(Error::CorruptObject {
                name,
                expected,
                actual,
            }) => {
                assert_eq!(name, h.commit);
                assert_eq!(expected, h.commit.checksum);
                assert_ne!(actual, expected);
            }
            other => panic!("expected CorruptObject, got {other:?}"),
        }
    }

    #[test]
    fn test_flipped_raw_file_content() {
        let fx = Fixture::new(RepoMode::Bare);
        let h = fx.small_history();
        let name = ObjectName::new(h.hello, ObjectType::RawFile);
        fx.flip_byte(&name, -1);

        assert!(matches!(
            verify_object(&fx.repo, &name),
            Err(Error::CorruptObject { .. })
        ));
    }

    #[test]
    fn test_archived_content_checked_through_meta() {
        let fx = Fixture::new(RepoMode::Archive);
        let h = fx.small_history();
        let content = ObjectName::new(h.hello, ObjectType::ArchivedFileContent);
        let meta = ObjectName::new(h.hello, ObjectType::ArchivedFileMeta);
        fx.flip_byte(&content, -1);

        // Content alone is never checked.
        assert!(verify_object(&fx.repo, &content).is_ok());
        assert!(matches!(
            verify_object(&fx.repo, &meta),
            Err(Error::CorruptObject { name, .. }) if name == meta
        ));
    }

    #[test]
    fn test_malformed_dirmeta_is_schema_error() {
        let fx = Fixture::new(RepoMode::Bare);
        let checksum = fx.repo.write_dirmeta(&DirMeta::new(modes::REGULAR)).unwrap();
        let name = ObjectName::new(checksum, ObjectType::DirMeta);

        assert!(matches!(
            root_cause(verify_object(&fx.repo, &name)),
            Error::Schema { .. }
        ));
    }

    #[test]
    fn test_file_with_directory_mode_is_schema_error() {
        let fx = Fixture::new(RepoMode::Bare);
        let checksum = fx
            .repo
            .write_file(&FileInfo::regular(modes::DIRECTORY), &Xattrs::new(), &b"x"[..])
            .unwrap();
        let name = ObjectName::new(checksum, ObjectType::RawFile);

        assert!(matches!(
            root_cause(verify_object(&fx.repo, &name)),
            Error::Schema { .. }
        ));
    }

    #[test]
    fn test_missing_object() {
        let fx = Fixture::new(RepoMode::Bare);
        let name = ObjectName::new(crate::Checksum::from_bytes([5; 32]), ObjectType::DirTree);
        assert!(matches!(
            root_cause(verify_object(&fx.repo, &name)),
            Error::ObjectNotFound { .. }
        ));
    }

    #[test]
    fn test_truncated_file_is_not_hashed_short() {
        let fx = Fixture::new(RepoMode::Bare);
        let h = fx.small_history();
        let name = ObjectName::new(h.hello, ObjectType::RawFile);
        let path = fx.repo.object_path(&name);
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() - 2]).unwrap();

        match root_cause(verify_object(&fx.repo, &name)) {
            Error::Io { source } => assert_eq!(source.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            max_shrink_iters: 1000,
            ..ProptestConfig::default()
        })]

        /// Whatever was written verifies
        #[test]
        fn prop_written_files_verify(
            content in prop::collection::vec(any::<u8>(), 0..8192),
            archive in any::<bool>(),
        ) {
            let mode = if archive { RepoMode::Archive } else { RepoMode::Bare };
            let fx = Fixture::new(mode);
            let checksum = fx.file(&content);
            let objtype = if archive { ObjectType::ArchivedFileMeta } else { ObjectType::RawFile };
            prop_assert!(verify_object(&fx.repo, &ObjectName::new(checksum, objtype)).is_ok());
        }
    }
}
