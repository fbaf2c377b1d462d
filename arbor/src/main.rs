mod output;

use anyhow::{Context, Result};
use arbor_core::{Algorithm, Checksum, CommitOptions, Fsck, FsckOptions, Progress, Repo, RepoMode};
use clap::{Parser, Subcommand};
use output::{CommitOutput, FsckOutput, InitOutput, OutputWriter, PackOutput};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;

/// Exit code when a check completes with findings.
const EXIT_FINDINGS: u8 = 1;
/// Exit code when a command could not complete.
const EXIT_ERROR: u8 = 2;

/// Arbor - A content-addressed tree repository
#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Content-addressed tree repository with an integrity checker", long_about = None)]
#[command(version)]
struct Cli {
    /// Repository root directory (defaults to ARBOR_ROOT env var or ./arbor-repo)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log debug diagnostics to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new repository
    Init {
        /// Storage mode: bare or archive
        #[arg(long, default_value = "bare")]
        mode: String,

        /// Checksum algorithm: blake3 or sha256
        #[arg(long, default_value = "blake3")]
        algo: String,
    },

    /// Commit a directory tree
    Commit {
        /// Directory to commit
        path: PathBuf,

        /// One-line summary
        #[arg(short, long)]
        subject: String,

        /// Longer description
        #[arg(long, default_value = "")]
        body: String,

        /// Checksum of the parent commit
        #[arg(long)]
        parent: Option<String>,

        /// Extra commit metadata (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// Move all loose objects into a new pack
    Pack,

    /// Check repository consistency
    Fsck {
        /// Only print findings
        #[arg(short, long)]
        quiet: bool,

        /// Delete objects whose checksum does not match their name
        #[arg(long)]
        delete: bool,

        /// Stop at the first finding
        #[arg(long)]
        fail_fast: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Determine repository root: CLI arg > ARBOR_ROOT env var > ./arbor-repo default
    let root = cli
        .root
        .or_else(|| std::env::var("ARBOR_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./arbor-repo"));
    let output = OutputWriter::new(cli.json);

    let result = match cli.command {
        Commands::Init { mode, algo } => cmd_init(&root, &mode, &algo, &output),
        Commands::Commit {
            path,
            subject,
            body,
            parent,
            meta,
        } => cmd_commit(&root, &path, subject, body, parent.as_deref(), meta, &output),
        Commands::Pack => cmd_pack(&root, &output),
        Commands::Fsck {
            quiet,
            delete,
            fail_fast,
        } => cmd_fsck(&root, FsckOptions { delete, fail_fast }, quiet, &output),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            output.write_error(&err, EXIT_ERROR);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_repo(root: &Path) -> Result<Repo> {
    Repo::open(root).with_context(|| format!("Failed to open repository at {}", root.display()))
}

fn parse_algorithm(algo: &str) -> Result<Algorithm> {
    match algo {
        "blake3" => Ok(Algorithm::Blake3),
        other => Algorithm::parse(other).with_context(|| format!("Unsupported algorithm: {}", other)),
    }
}

fn parse_meta(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err("metadata key must not be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

fn cmd_init(root: &Path, mode: &str, algo: &str, output: &OutputWriter) -> Result<u8> {
    let algorithm = parse_algorithm(algo)?;
    let mode = RepoMode::parse(mode)?;

    Repo::init(root, algorithm, mode)
        .with_context(|| format!("Failed to initialize repository at {}", root.display()))?;

    let data = InitOutput {
        success: true,
        result_code: 0,
        root: root.display().to_string(),
        algorithm: algorithm.as_str().to_string(),
        mode: mode.as_str().to_string(),
    };
    output.write(&data, || {
        format!(
            "Initialized arbor repository at {}\nAlgorithm: {}\nMode: {}\n",
            root.display(),
            algorithm.as_str(),
            mode.as_str()
        )
    })?;
    Ok(0)
}

fn cmd_commit(
    root: &Path,
    path: &Path,
    subject: String,
    body: String,
    parent: Option<&str>,
    meta: Vec<(String, String)>,
    output: &OutputWriter,
) -> Result<u8> {
    let repo = open_repo(root)?;
    let parent = parent
        .map(|hex| Checksum::from_hex(hex).with_context(|| format!("Invalid checksum: {}", hex)))
        .transpose()?;

    let now = chrono::Utc::now();
    let options = CommitOptions {
        subject,
        body,
        parent,
        timestamp: u64::try_from(now.timestamp()).unwrap_or(0),
        metadata: meta
            .into_iter()
            .map(|(key, value)| (key, value.into_bytes()))
            .collect(),
    };
    let commit = repo
        .commit_directory(path, &options)
        .with_context(|| format!("Failed to commit {}", path.display()))?;

    let data = CommitOutput {
        success: true,
        result_code: 0,
        commit,
        path: path.display().to_string(),
        subject: options.subject.clone(),
        timestamp: options.timestamp,
        timestamp_human: now.to_rfc3339(),
    };
    output.write(&data, || format!("{} {}\n", commit, path.display()))?;
    Ok(0)
}

fn cmd_pack(root: &Path, output: &OutputWriter) -> Result<u8> {
    let repo = open_repo(root)?;
    let pack = repo.pack_objects().context("Failed to pack loose objects")?;

    let data = PackOutput {
        success: true,
        result_code: 0,
        pack,
    };
    output.write(&data, || match pack {
        Some(id) => format!("Created pack {}\n", id),
        None => "No loose objects to pack\n".to_string(),
    })?;
    Ok(0)
}

fn cmd_fsck(root: &Path, options: FsckOptions, quiet: bool, output: &OutputWriter) -> Result<u8> {
    let repo = open_repo(root)?;
    let show_progress = !quiet && !output.is_json();

    if show_progress {
        println!("Enumerating objects...");
    }
    let report = Fsck::new(&repo)
        .options(options)
        .on_progress(|progress| {
            if show_progress {
                print_progress(progress);
            }
        })
        .run()
        .context("Consistency check failed")?;

    let result_code = if report.is_clean() { 0 } else { EXIT_FINDINGS };
    let text = {
        let mut text = String::new();
        for finding in &report.findings {
            text.push_str(&format!("error: {}\n", finding));
        }
        if !report.is_clean() {
            text.push_str(&format!("{} problem(s) found\n", report.findings.len()));
        }
        text
    };
    let data = FsckOutput {
        success: report.is_clean(),
        result_code,
        report,
    };
    output.write(&data, || text)?;
    Ok(result_code)
}

fn print_progress(progress: &Progress) {
    if let Some(line) = progress_line(progress) {
        println!("{}", line);
    }
}

fn progress_line(progress: &Progress) -> Option<String> {
    match progress {
        Progress::Enumerated { objects, commits } => Some(format!(
            "Enumerated {} objects ({} commits)",
            objects, commits
        )),
        Progress::VerifyingObjects { count } => Some(format!(
            "Verifying content integrity of {} reachable objects...",
            count
        )),
        Progress::VerifyingPacks { count } => {
            Some(format!("Verifying structure of {} pack files...", count))
        }
        Progress::Deleted { count: 0 } => None,
        Progress::Deleted { count } => Some(format!("Deleted {} corrupted objects", count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fsck_flags() {
        let cli = Cli::try_parse_from(["arbor", "--root", "/tmp/r", "fsck", "--delete", "-q"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/r")));
        match cli.command {
            Commands::Fsck {
                quiet,
                delete,
                fail_fast,
            } => {
                assert!(quiet);
                assert!(delete);
                assert!(!fail_fast);
            }
            _ => panic!("expected fsck"),
        }
    }

    #[test]
    fn test_parse_commit_metadata() {
        let cli = Cli::try_parse_from([
            "arbor", "commit", "src", "-s", "msg", "--meta", "origin=ci", "--meta", "empty=",
        ])
        .unwrap();
        match cli.command {
            Commands::Commit { meta, .. } => assert_eq!(
                meta,
                vec![
                    ("origin".to_string(), "ci".to_string()),
                    ("empty".to_string(), String::new()),
                ]
            ),
            _ => panic!("expected commit"),
        }
        assert!(Cli::try_parse_from(["arbor", "commit", "src", "-s", "m", "--meta", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["arbor", "commit", "src", "-s", "m", "--meta", "=v"]).is_err());
    }

    #[test]
    fn test_progress_lines() {
        assert_eq!(
            progress_line(&Progress::Enumerated {
                objects: 9,
                commits: 2
            })
            .unwrap(),
            "Enumerated 9 objects (2 commits)"
        );
        assert_eq!(
            progress_line(&Progress::VerifyingObjects { count: 6 }).unwrap(),
            "Verifying content integrity of 6 reachable objects..."
        );
        assert_eq!(progress_line(&Progress::Deleted { count: 0 }), None);
        assert_eq!(
            progress_line(&Progress::Deleted { count: 2 }).unwrap(),
            "Deleted 2 corrupted objects"
        );
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(parse_algorithm("blake3").unwrap(), Algorithm::Blake3);
        assert_eq!(parse_algorithm("blake3-256").unwrap(), Algorithm::Blake3);
        assert_eq!(parse_algorithm("sha256").unwrap(), Algorithm::Sha256);
        assert!(parse_algorithm("md5").is_err());
    }

    #[test]
    fn test_init_commit_fsck() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let root = temp_dir.path().join("repo");
        let src = temp_dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("a.txt"), b"a").unwrap();
        let output = OutputWriter::new(true);

        assert_eq!(cmd_init(&root, "archive", "sha256", &output).unwrap(), 0);
        assert_eq!(
            cmd_commit(&root, &src, "first".into(), String::new(), None, vec![], &output).unwrap(),
            0
        );
        assert_eq!(cmd_pack(&root, &output).unwrap(), 0);
        assert_eq!(cmd_fsck(&root, FsckOptions::default(), true, &output).unwrap(), 0);
    }

    #[test]
    fn test_commit_rejects_bad_parent() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let root = temp_dir.path().join("repo");
        let output = OutputWriter::new(true);
        cmd_init(&root, "bare", "blake3", &output).unwrap();

        let result = cmd_commit(
            &root,
            temp_dir.path(),
            "x".into(),
            String::new(),
            Some("zz"),
            vec![],
            &output,
        );
        assert!(result.is_err());
    }
}
