//! gitrecon - local/remote reconciliation for pull-request workflows

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gitrecon::{
    CancellationToken, Git2Repository, GitReconciler, MergeBaseQuery, ReconcilerConfig,
    RepositoryUrl,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gitrecon")]
#[command(about = "Reconcile a local git repository with its remotes")]
#[command(version)]
struct Args {
    /// Path to git repository (default: current directory)
    #[arg(short, long, global = true)]
    path: Option<String>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Do not ask credential helpers or the SSH agent for credentials
    #[arg(long, global = true)]
    no_credential_helper: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report whether a file differs from HEAD or a given commit
    IsModified {
        file: String,
        #[arg(long)]
        commit: Option<String>,
    },

    /// Report whether HEAD tracks an upstream and is not ahead of it
    HeadPushed,

    /// Fetch from a repository URL, adding a remote if needed
    Fetch {
        url: String,
        ref_specs: Vec<String>,
    },

    /// Point a remote at a URL
    SetRemote { name: String, url: String },

    /// Make <remote>/<branch> the upstream of <branch>
    SetTracking {
        branch: String,
        #[arg(long)]
        remote: Option<String>,
    },

    /// Push HEAD to a branch on a remote
    Push {
        branch: String,
        #[arg(long)]
        remote: Option<String>,
    },

    /// Merge base of a pull request, fetching missing commits
    MergeBase {
        #[arg(long)]
        url: String,
        #[arg(long)]
        base_ref: String,
        #[arg(long = "pr")]
        pull_request: u64,
        #[arg(long)]
        base_sha: Option<String>,
        #[arg(long)]
        head_sha: Option<String>,
    },

    /// Print a file as of a commit
    Show { commit: String, file: String },

    /// List paths changed between two commits, or line changes to one file
    Compare {
        sha1: String,
        sha2: String,
        file: Option<String>,
        /// Compare <file> as of <sha1> against this file's contents instead
        #[arg(long, requires = "file")]
        contents: Option<PathBuf>,
        #[arg(long)]
        detect_renames: bool,
    },

    /// Most recent HEAD commit the remote already has
    LatestPushed {
        #[arg(long)]
        remote: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = ReconcilerConfig::load()?;
    if args.no_credential_helper {
        config.use_credential_helper = false;
    }
    debug!(?config, "Loaded configuration");

    let git = match &args.path {
        Some(path) => Git2Repository::open(Path::new(path)),
        None => Git2Repository::open_current_dir(),
    }
    .context("Failed to open git repository. Are you in a git directory?")?
    .with_credential_helper(config.use_credential_helper);

    let reconciler = GitReconciler::new(config);
    run(&reconciler, &git, args.command)
}

fn run(reconciler: &GitReconciler, git: &Git2Repository, command: Command) -> Result<()> {
    let cancel = CancellationToken::new();
    let remote_or_default =
        |remote: Option<String>| remote.unwrap_or_else(|| reconciler.config().default_remote.clone());

    match command {
        Command::IsModified { file, commit } => {
            let modified = reconciler.is_modified(git, &file, commit.as_deref())?;
            println!("{}", modified);
        }
        Command::HeadPushed => {
            println!("{}", reconciler.is_head_pushed(git)?);
        }
        Command::Fetch { url, ref_specs } => {
            let url = RepositoryUrl::parse(&url)?;
            reconciler.fetch(git, &url, &ref_specs, &cancel)?;
        }
        Command::SetRemote { name, url } => {
            reconciler.set_remote(git, &name, &url)?;
        }
        Command::SetTracking { branch, remote } => {
            reconciler.set_tracking_branch(git, &branch, &remote_or_default(remote))?;
        }
        Command::Push { branch, remote } => {
            reconciler.push(git, &branch, &remote_or_default(remote))?;
        }
        Command::MergeBase {
            url,
            base_ref,
            pull_request,
            base_sha,
            head_sha,
        } => {
            let query = MergeBaseQuery {
                target_clone_url: RepositoryUrl::parse(&url)?,
                base_sha,
                head_sha,
                base_ref,
                pull_request_number: pull_request,
            };
            println!(
                "{}",
                reconciler.get_pull_request_merge_base(git, &query, &cancel)?
            );
        }
        Command::Show { commit, file } => match reconciler.extract_file(git, &commit, &file)? {
            Some(contents) => print!("{}", contents),
            None => anyhow::bail!("{} does not exist at {}", file, commit),
        },
        Command::Compare {
            sha1,
            sha2,
            file,
            contents,
            detect_renames,
        } => {
            let missing = || anyhow::anyhow!("{} or {} is not present locally", sha1, sha2);
            match (file, contents) {
                (Some(file), Some(contents)) => {
                    let bytes = fs::read(&contents)
                        .with_context(|| format!("Failed to read {}", contents.display()))?;
                    let changes = reconciler
                        .compare_with(git, &sha1, &sha2, &file, &bytes)?
                        .ok_or_else(missing)?;
                    println!("{}", changes);
                }
                (Some(file), None) => {
                    let changes = reconciler
                        .compare_file(git, &sha1, &sha2, &file)?
                        .ok_or_else(missing)?;
                    println!("{}", changes);
                }
                (None, _) => {
                    let changes = reconciler
                        .compare_commits(git, &sha1, &sha2, detect_renames)?
                        .ok_or_else(missing)?;
                    for change in changes {
                        if change.old_path == change.path {
                            println!("{}\t{}", change.kind, change.path);
                        } else {
                            println!("{}\t{}\t{}", change.kind, change.old_path, change.path);
                        }
                    }
                }
            }
        }
        Command::LatestPushed { remote } => {
            match reconciler.get_latest_pushed_sha(git, &remote_or_default(remote))? {
                Some(sha) => println!("{}", sha),
                None => println!("none"),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_merge_base_arguments() {
        let args = Args::try_parse_from([
            "gitrecon",
            "merge-base",
            "--url",
            "https://github.com/owner/repo",
            "--base-ref",
            "main",
            "--pr",
            "42",
            "--head-sha",
            "abc123",
        ])
        .unwrap();

        match args.command {
            Command::MergeBase {
                pull_request,
                base_sha,
                head_sha,
                ..
            } => {
                assert_eq!(pull_request, 42);
                assert_eq!(base_sha, None);
                assert_eq!(head_sha.as_deref(), Some("abc123"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn compare_contents_requires_a_file() {
        assert!(Args::try_parse_from(["gitrecon", "compare", "a", "b", "--contents", "x"]).is_err());
        let args =
            Args::try_parse_from(["gitrecon", "compare", "a", "b", "f.txt", "--contents", "x"])
                .unwrap();
        assert!(matches!(args.command, Command::Compare { file: Some(_), .. }));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let args =
            Args::try_parse_from(["gitrecon", "head-pushed", "--path", "/tmp/repo"]).unwrap();
        assert_eq!(args.path.as_deref(), Some("/tmp/repo"));
        assert_eq!(args.log_level, "warn");
        assert!(!args.no_credential_helper);
    }
}
