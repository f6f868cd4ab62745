//! Local/remote reconciliation for pull-request workflows.
//! Uses trait objects for the repository so callers keep ownership of it.

use crate::config::ReconcilerConfig;
use crate::domain::{
    CancellationToken, ContentChanges, FetchRequest, FileStatus, MergeBaseQuery, RepositoryUrl,
    TreeChange, TreeEntry, TreeEntryTarget,
};
use crate::error::ReconcileError;
use crate::ports::GitRepository;
use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How far back along HEAD to look for a pushed commit.
const LATEST_PUSHED_SEARCH_DEPTH: usize = 10_000;

/// The ref-spec every fetch carries for a remote.
pub fn standard_fetch_ref_spec(remote: &str) -> String {
    format!("+refs/heads/*:refs/remotes/{}/*", remote)
}

/// Stateless apart from configuration: every operation takes the repository
/// it works on.
#[derive(Debug, Clone, Default)]
pub struct GitReconciler {
    config: ReconcilerConfig,
}

impl GitReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Whether `path` differs from the committed version.
    ///
    /// Without `commit_sha` the index/workdir status decides, falling back to
    /// a content comparison against HEAD when the status is unaltered. With
    /// `commit_sha` the working-tree content is compared against that commit.
    pub fn is_modified(
        &self,
        repo: &dyn GitRepository,
        path: &str,
        commit_sha: Option<&str>,
    ) -> Result<bool> {
        self.is_modified_with(repo, path, commit_sha, None)
    }

    /// Like [`is_modified`](Self::is_modified), comparing against `contents`
    /// (an unsaved buffer) instead of the working-tree file when given.
    pub fn is_modified_with(
        &self,
        repo: &dyn GitRepository,
        path: &str,
        commit_sha: Option<&str>,
        contents: Option<&[u8]>,
    ) -> Result<bool> {
        if commit_sha.is_none() {
            let status = repo.file_status(path)?;
            if status.is_untracked() {
                debug!(path, %status, "Untracked path treated as unmodified");
                return Ok(false);
            }
            if status != FileStatus::Unaltered {
                return Ok(true);
            }
        }

        let Some(entry) = repo.tree_entry(commit_sha, path)? else {
            return Ok(false);
        };

        match entry.target {
            TreeEntryTarget::GitLink | TreeEntryTarget::Tree => Ok(false),
            TreeEntryTarget::Blob => {
                let workdir;
                let current: &[u8] = match contents {
                    Some(c) => c,
                    None => {
                        workdir = repo.read_workdir_file(path)?.unwrap_or_default();
                        &workdir
                    }
                };
                let changes = repo.compare_blob(&entry.id, current, path)?;
                debug!(path, %changes, "Compared committed content");
                Ok(changes.has_changes())
            }
        }
    }

    /// True only when HEAD tracks an upstream and is not ahead of it.
    pub fn is_head_pushed(&self, repo: &dyn GitRepository) -> Result<bool> {
        let tracking = repo.head_tracking()?;
        Ok(tracking.ahead_by == Some(0))
    }

    /// Fetch `ref_specs` from `url`, reusing a matching remote when there is one.
    pub fn fetch(
        &self,
        repo: &dyn GitRepository,
        url: &RepositoryUrl,
        ref_specs: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled.into());
        }

        let remotes = repo.remotes()?;
        for remote in &remotes {
            // Only HTTP(S) remotes take part in matching.
            let Ok(remote_url) = RepositoryUrl::parse(&remote.url) else {
                continue;
            };
            if remote_url.is_http() && remote_url.same_repository(url) {
                debug!(remote = %remote.name, url = %url, "Using existing remote");
                return self.fetch_remote(repo, &remote.name, ref_specs, cancel);
            }
        }

        let repository_url = url.to_repository_url();
        let owner = url
            .owner()
            .ok_or_else(|| ReconcileError::InvalidUrl(format!("{} has no owner", url)))?;

        if remotes.iter().any(|r| r.name == owner) {
            let name = format!("{}-{}", self.config.temp_remote_prefix, Uuid::new_v4().simple());
            debug!(
                remote = %name,
                conflicting = owner,
                url = %repository_url,
                "Remote name taken, fetching through a temporary remote"
            );
            repo.add_remote(&name, &repository_url)
                .with_context(|| format!("Failed to add temporary remote {}", name))?;
            let temporary = TemporaryRemote { repo, name };
            return self.fetch_remote(repo, &temporary.name, ref_specs, cancel);
        }

        repo.add_remote(owner, &repository_url)
            .with_context(|| format!("Failed to add remote {}", owner))?;
        info!(remote = owner, url = %repository_url, "Added remote");
        self.fetch_remote(repo, owner, ref_specs, cancel)
    }

    pub fn fetch_request(
        &self,
        repo: &dyn GitRepository,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.fetch(repo, &request.url, &request.ref_specs, cancel)
    }

    /// Fetch through an already-configured remote.
    pub fn fetch_remote(
        &self,
        repo: &dyn GitRepository,
        remote: &str,
        ref_specs: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled.into());
        }

        let mut specs = vec![standard_fetch_ref_spec(remote)];
        for spec in ref_specs {
            if !spec.is_empty() && !specs.contains(spec) {
                specs.push(spec.clone());
            }
        }

        debug!(remote, ?specs, "Fetching");
        repo.fetch(remote, &specs, cancel)
            .with_context(|| format!("Failed to fetch from {}", remote))
    }

    /// Configures `name` to point at `url` with the standard fetch ref-spec.
    pub fn set_remote(&self, repo: &dyn GitRepository, name: &str, url: &str) -> Result<()> {
        repo.set_config(&format!("remote.{}.url", name), url)?;
        repo.set_config(
            &format!("remote.{}.fetch", name),
            &standard_fetch_ref_spec(name),
        )?;
        info!(remote = name, url, "Configured remote");
        Ok(())
    }

    /// Makes `refs/remotes/<remote>/<branch>` the upstream of `refs/heads/<branch>`.
    pub fn set_tracking_branch(
        &self,
        repo: &dyn GitRepository,
        branch: &str,
        remote: &str,
    ) -> Result<()> {
        let local_ref = format!("refs/heads/{}", branch);
        let remote_ref = format!("refs/remotes/{}/{}", remote, branch);
        repo.set_upstream(&local_ref, &remote_ref)?;
        info!(branch, upstream = %remote_ref, "Set tracking branch");
        Ok(())
    }

    /// Pushes HEAD to `refs/heads/<branch>` on `remote`. Does nothing in an
    /// empty repository.
    pub fn push(&self, repo: &dyn GitRepository, branch: &str, remote: &str) -> Result<()> {
        if !repo.head_has_commits()? {
            debug!(branch, remote, "Nothing to push");
            return Ok(());
        }

        let remote_ref = format!("refs/heads/{}", branch);
        repo.push(remote, "HEAD", &remote_ref)
            .with_context(|| format!("Failed to push to {}", remote))?;
        info!(remote, branch, "Pushed HEAD");
        Ok(())
    }

    /// Merge base of a pull request's base and head, fetching at most once.
    ///
    /// | base local | head local | fetch                 |
    /// |------------|------------|-----------------------|
    /// | yes        | yes        | nothing               |
    /// | no         | yes        | `base_ref`            |
    /// | yes        | no         | `refs/pull/<N>/head`  |
    /// | no         | no         | `refs/pull/<N>/head`  |
    pub fn get_pull_request_merge_base(
        &self,
        repo: &dyn GitRepository,
        query: &MergeBaseQuery,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let base = lookup_optional(repo, query.base_sha.as_deref())?;
        let head = lookup_optional(repo, query.head_sha.as_deref())?;

        let (base, head) = match (base, head) {
            (Some(base), Some(head)) => (base, head),
            (base, head) => {
                let ref_spec = if head.is_none() {
                    query.pull_head_ref()
                } else {
                    query.base_ref.clone()
                };
                debug!(
                    pull_request = query.pull_request_number,
                    ref_spec = %ref_spec,
                    "Commits missing locally, fetching"
                );
                self.fetch(repo, &query.target_clone_url, &[ref_spec], cancel)?;

                let base = match base {
                    Some(base) => base,
                    None => resolve_fetched(
                        repo,
                        query.base_sha.as_deref(),
                        &query.base_branch_ref(),
                    )?,
                };
                let head = match head {
                    Some(head) => head,
                    None => {
                        resolve_fetched(repo, query.head_sha.as_deref(), &query.pull_head_ref())?
                    }
                };
                (base, head)
            }
        };

        repo.merge_base(&base, &head)?.ok_or_else(|| {
            ReconcileError::NotFound(format!("merge base of {} and {}", base, head)).into()
        })
    }

    /// Content of `path` at `commit_sha`, `None` when it is not a file there.
    pub fn extract_file(
        &self,
        repo: &dyn GitRepository,
        commit_sha: &str,
        path: &str,
    ) -> Result<Option<String>> {
        if repo.lookup_commit(commit_sha)?.is_none() {
            return Err(ReconcileError::NotFound(format!("commit {}", commit_sha)).into());
        }

        match repo.tree_entry(Some(commit_sha), path)? {
            Some(TreeEntry {
                id,
                target: TreeEntryTarget::Blob,
            }) => {
                let bytes = repo.read_blob(&id)?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            _ => Ok(None),
        }
    }

    /// Most recent commit on HEAD that `remote` already has.
    pub fn get_latest_pushed_sha(
        &self,
        repo: &dyn GitRepository,
        remote: &str,
    ) -> Result<Option<String>> {
        let unpushed = repo.unpushed_commits(remote)?;
        Ok(repo
            .head_history(LATEST_PUSHED_SEARCH_DEPTH)?
            .into_iter()
            .find(|sha| !unpushed.contains(sha)))
    }

    /// Line changes to `path` between two commits, `None` unless both
    /// commits are present locally.
    pub fn compare_file(
        &self,
        repo: &dyn GitRepository,
        sha1: &str,
        sha2: &str,
        path: &str,
    ) -> Result<Option<ContentChanges>> {
        if !both_local(repo, sha1, sha2)? {
            return Ok(None);
        }
        Ok(Some(repo.diff_file(sha1, sha2, path)?))
    }

    /// Compares `contents` against `path` as of `sha1`.
    ///
    /// When `path` was renamed between `sha1` and `sha2`, the file is read
    /// from its old name. `None` when `sha1` is not present locally.
    pub fn compare_with(
        &self,
        repo: &dyn GitRepository,
        sha1: &str,
        sha2: &str,
        path: &str,
        contents: &[u8],
    ) -> Result<Option<ContentChanges>> {
        if path.contains('\\') {
            bail!("Path must use forward slashes: {}", path);
        }
        if repo.lookup_commit(sha1)?.is_none() {
            return Ok(None);
        }

        let old_path = if repo.lookup_commit(sha2)?.is_some() {
            repo.tree_changes(sha1, sha2, true)?
                .into_iter()
                .find(|change| change.path == path)
                .map(|change| change.old_path)
        } else {
            None
        };
        let old_path = old_path.as_deref().unwrap_or(path);

        let changes = match repo.tree_entry(Some(sha1), old_path)? {
            Some(TreeEntry {
                id,
                target: TreeEntryTarget::Blob,
            }) => repo.compare_blob(&id, contents, path)?,
            _ => ContentChanges::all_added(contents),
        };
        debug!(path, old_path, %changes, "Compared contents with commit");
        Ok(Some(changes))
    }

    /// Paths changed between two commits, `None` unless both are present
    /// locally (a pull request from a fork that was never fetched, say).
    pub fn compare_commits(
        &self,
        repo: &dyn GitRepository,
        sha1: &str,
        sha2: &str,
        detect_renames: bool,
    ) -> Result<Option<Vec<TreeChange>>> {
        if !both_local(repo, sha1, sha2)? {
            return Ok(None);
        }
        Ok(Some(repo.tree_changes(sha1, sha2, detect_renames)?))
    }

    /// Parsed URL of the remote called `name`.
    pub fn remote_url(&self, repo: &dyn GitRepository, name: &str) -> Result<Option<RepositoryUrl>> {
        match repo.remotes()?.into_iter().find(|r| r.name == name) {
            Some(remote) => Ok(Some(RepositoryUrl::parse(&remote.url)?)),
            None => Ok(None),
        }
    }
}

/// Removes a one-off remote however the fetch through it ends.
struct TemporaryRemote<'a> {
    repo: &'a dyn GitRepository,
    name: String,
}

impl Drop for TemporaryRemote<'_> {
    fn drop(&mut self) {
        match self.repo.remove_remote(&self.name) {
            Ok(()) => debug!(remote = %self.name, "Removed temporary remote"),
            Err(e) => warn!(remote = %self.name, error = %e, "Failed to remove temporary remote"),
        }
    }
}

fn lookup_optional(repo: &dyn GitRepository, sha: Option<&str>) -> Result<Option<String>> {
    match sha {
        Some(sha) => repo.lookup_commit(sha),
        None => Ok(None),
    }
}

fn both_local(repo: &dyn GitRepository, one: &str, two: &str) -> Result<bool> {
    Ok(repo.lookup_commit(one)?.is_some() && repo.lookup_commit(two)?.is_some())
}

fn resolve_fetched(repo: &dyn GitRepository, sha: Option<&str>, ref_name: &str) -> Result<String> {
    let found = match sha {
        Some(sha) => repo.lookup_commit(sha)?,
        None => match repo.fetch_head(ref_name)? {
            Some(id) => repo.lookup_commit(&id)?,
            None => None,
        },
    };
    found.ok_or_else(|| ReconcileError::NotFound(sha.unwrap_or(ref_name).to_string()).into())
}
