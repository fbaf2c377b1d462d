//! Repository consistency check.
//!
//! A run enumerates every object, traverses from the commits to build the
//! reachable set, verifies each reachable object, then validates every pack.
//! Corruption is collected as [`Finding`]s; I/O failures, cancellation and a
//! traversal that cannot complete abort the run with an error.

use crate::cancel::CancelFlag;
use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::object::{ObjectName, ObjectType};
use crate::pack::{PackCorruption, verify_pack};
use crate::store::{ObjectStore, PackStore};
use crate::traverse::traverse_commits;
use crate::verify::verify_object;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Options for a check run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsckOptions {
    /// Delete objects whose checksum does not match their name.
    pub delete: bool,
    /// Stop at the first finding.
    pub fail_fast: bool,
}

/// Progress notifications, emitted before each phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Enumerated { objects: usize, commits: usize },
    VerifyingObjects { count: usize },
    VerifyingPacks { count: usize },
    Deleted { count: usize },
}

/// One problem found by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// The object's content hashes to something other than its name.
    CorruptObject {
        name: ObjectName,
        expected: Checksum,
        actual: Checksum,
    },
    /// The object could not be decoded or failed structural validation.
    MalformedObject { name: ObjectName, reason: String },
    /// The object is referenced but not present.
    MissingObject { name: ObjectName },
    CorruptPack {
        pack: Checksum,
        reason: PackCorruption,
    },
}

impl Finding {
    /// Objects with this finding may be removed by the deletion pass.
    pub fn deletable(&self) -> Option<&ObjectName> {
        match self {
            Finding::CorruptObject { name, .. } => Some(name),
            Finding::MalformedObject { .. }
            | Finding::MissingObject { .. }
            | Finding::CorruptPack { .. } => None,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::CorruptObject { name, actual, .. } => {
                write!(f, "corrupted object {}; actual checksum: {}", name, actual)
            }
            Finding::MalformedObject { name, reason } => {
                write!(f, "malformed object {}: {}", name, reason)
            }
            Finding::MissingObject { name } => write!(f, "missing object {}", name),
            Finding::CorruptPack { pack, reason } => {
                write!(f, "corrupted pack '{}': {}", pack, reason)
            }
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FsckReport {
    pub commits: usize,
    pub objects_checked: usize,
    pub packs_checked: usize,
    pub findings: Vec<Finding>,
    /// Objects removed by the deletion pass.
    pub deleted: Vec<ObjectName>,
}

impl FsckReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

type ProgressFn<'a> = Box<dyn Fn(&Progress) + 'a>;

/// A configured check over a store.
///
/// ```no_run
/// use arbor_core::{Fsck, FsckOptions, Repo};
///
/// # fn main() -> arbor_core::Result<()> {
/// let repo = Repo::open("arbor-repo")?;
/// let report = Fsck::new(&repo)
///     .options(FsckOptions { delete: true, fail_fast: false })
///     .run()?;
/// for finding in &report.findings {
///     eprintln!("{}", finding);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Fsck<'a, S: ?Sized> {
    store: &'a S,
    options: FsckOptions,
    cancel: CancelFlag,
    progress: Option<ProgressFn<'a>>,
}

impl<'a, S> Fsck<'a, S>
where
    S: ObjectStore + PackStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            options: FsckOptions::default(),
            cancel: CancelFlag::new(),
            progress: None,
        }
    }

    pub fn options(mut self, options: FsckOptions) -> Self {
        self.options = options;
        self
    }

    /// Use an externally owned cancel flag.
    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(&Progress) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    fn emit(&self, event: Progress) {
        debug!(?event, "fsck progress");
        if let Some(callback) = &self.progress {
            callback(&event);
        }
    }

    /// Run the check.
    pub fn run(&self) -> Result<FsckReport> {
        let mut report = FsckReport::default();

        let all = self.store.list_all_objects()?;
        let commits: Vec<ObjectName> = all
            .iter()
            .filter(|name| name.objtype == ObjectType::Commit)
            .copied()
            .collect();
        report.commits = commits.len();
        self.emit(Progress::Enumerated {
            objects: all.len(),
            commits: commits.len(),
        });

        let reachable = traverse_commits(self.store, &commits, &self.cancel)?;
        self.emit(Progress::VerifyingObjects {
            count: reachable.len(),
        });

        let stopped = self.verify_objects(&reachable, &mut report)?;
        if !stopped {
            self.verify_packs(&mut report)?;
        }

        if self.options.delete {
            self.delete_corrupt(&mut report)?;
        }

        if report.is_clean() {
            info!(
                objects = report.objects_checked,
                packs = report.packs_checked,
                "repository is consistent"
            );
        }
        Ok(report)
    }

    /// Returns `true` if the run should stop (fail-fast hit).
    #[cfg(not(feature = "parallel"))]
    fn verify_objects(&self, reachable: &BTreeSet<ObjectName>, report: &mut FsckReport) -> Result<bool> {
        for name in reachable {
            self.cancel.check()?;
            let result = verify_object(self.store, name);
            if self.record(*name, result, report)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns `true` if the run should stop (fail-fast hit).
    #[cfg(feature = "parallel")]
    fn verify_objects(&self, reachable: &BTreeSet<ObjectName>, report: &mut FsckReport) -> Result<bool> {
        let names: Vec<ObjectName> = reachable.iter().copied().collect();
        let store = self.store;
        let cancel = &self.cancel;
        let results: Vec<Result<()>> = names
            .par_iter()
            .map(|name| {
                cancel.check()?;
                verify_object(store, name)
            })
            .collect();

        for (name, result) in names.into_iter().zip(results) {
            if self.record(name, result, report)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fold one verification result into the report. Returns `true` on fail-fast.
    fn record(&self, name: ObjectName, result: Result<()>, report: &mut FsckReport) -> Result<bool> {
        report.objects_checked += 1;
        match classify(name, result)? {
            Some(finding) => {
                warn!(%finding, "fsck finding");
                report.findings.push(finding);
                Ok(self.options.fail_fast)
            }
            None => Ok(false),
        }
    }

    fn verify_packs(&self, report: &mut FsckReport) -> Result<()> {
        let ids = self.store.list_pack_ids()?;
        self.emit(Progress::VerifyingPacks { count: ids.len() });

        let algorithm = ObjectStore::algorithm(self.store);
        for id in &ids {
            self.cancel.check()?;
            report.packs_checked += 1;
            match verify_pack(self.store, algorithm, id) {
                Ok(()) => {}
                Err(Error::CorruptPack { pack, reason }) => {
                    let finding = Finding::CorruptPack { pack, reason };
                    warn!(%finding, "fsck finding");
                    report.findings.push(finding);
                    if self.options.fail_fast {
                        break;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn delete_corrupt(&self, report: &mut FsckReport) -> Result<()> {
        let targets: Vec<ObjectName> = report
            .findings
            .iter()
            .filter_map(Finding::deletable)
            .copied()
            .collect();

        for name in targets {
            if self.store.delete_object(&name)? {
                info!(object = %name, "deleted corrupted object");
                report.deleted.push(name);
            } else {
                warn!(object = %name, "corrupted object could not be deleted");
            }
        }
        self.emit(Progress::Deleted {
            count: report.deleted.len(),
        });
        Ok(())
    }
}

/// Decide whether a verification failure is a finding or fatal to the run.
fn classify(name: ObjectName, result: Result<()>) -> Result<Option<Finding>> {
    let err = match result {
        Ok(()) => return Ok(None),
        Err(Error::CorruptObject {
            name,
            expected,
            actual,
        }) => {
            return Ok(Some(Finding::CorruptObject {
                name,
                expected,
                actual,
            }));
        }
        Err(err) => err,
    };

    let cause = err.root_cause();
    let finding = match cause {
        Error::ObjectNotFound { .. } => Some(Finding::MissingObject { name }),
        Error::Schema { reason } => Some(Finding::MalformedObject {
            name,
            reason: reason.clone(),
        }),
        Error::CorruptedEnvelope { .. }
        | Error::Compression { .. }
        | Error::InvalidChecksum { .. }
        | Error::UnknownObjectType { .. }
        | Error::InvalidObjectType { .. }
        | Error::UnsupportedAlgorithm { .. } => Some(Finding::MalformedObject {
            name,
            reason: cause.to_string(),
        }),
        Error::Io { source }
            if matches!(
                source.kind(),
                io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
            ) =>
        {
            Some(Finding::MalformedObject {
                name,
                reason: source.to_string(),
            })
        }
        _ => None,
    };

    finding.map(Some).ok_or(err)
}
