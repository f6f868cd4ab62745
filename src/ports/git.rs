//! Git repository port (trait).
//! Defines the repository capabilities the reconciler needs without coupling
//! to any implementation.

use crate::domain::{
    CancellationToken, ContentChanges, FileStatus, Remote, TrackingDetails, TreeChange, TreeEntry,
};
use anyhow::Result;
use std::collections::HashSet;

/// Port for an already-open repository.
/// Implementations may use git2, shell commands, or test fakes.
///
/// Object ids are passed around as full hex SHAs.
pub trait GitRepository {
    /// Index and working-directory status of a repository-relative path.
    fn file_status(&self, path: &str) -> Result<FileStatus>;

    /// Tree entry at `path` in `commit`, or in HEAD when `commit` is `None`.
    /// `Ok(None)` when the path does not exist there.
    fn tree_entry(&self, commit: Option<&str>, path: &str) -> Result<Option<TreeEntry>>;

    /// Raw content of a blob.
    fn read_blob(&self, blob_id: &str) -> Result<Vec<u8>>;

    /// Line-level comparison of a stored blob against arbitrary content.
    fn compare_blob(&self, blob_id: &str, contents: &[u8], path: &str) -> Result<ContentChanges>;

    /// Line changes to `path` going from `old_commit` to `new_commit`.
    /// A side where the path is absent counts as an empty file.
    fn diff_file(&self, old_commit: &str, new_commit: &str, path: &str) -> Result<ContentChanges>;

    /// Paths that differ between the trees of two commits.
    fn tree_changes(
        &self,
        old_commit: &str,
        new_commit: &str,
        detect_renames: bool,
    ) -> Result<Vec<TreeChange>>;

    /// Current working-tree content of `path`, `None` if the file is absent.
    fn read_workdir_file(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Tracking details of the branch HEAD points at.
    /// Untracked for detached or unborn heads.
    fn head_tracking(&self) -> Result<TrackingDetails>;

    /// Whether HEAD resolves to at least one commit.
    fn head_has_commits(&self) -> Result<bool>;

    /// Commits reachable from HEAD, newest first, at most `limit`.
    fn head_history(&self, limit: usize) -> Result<Vec<String>>;

    /// Commits reachable from HEAD but from no `refs/remotes/<remote>/*` ref.
    fn unpushed_commits(&self, remote: &str) -> Result<HashSet<String>>;

    /// All configured remotes.
    fn remotes(&self) -> Result<Vec<Remote>>;

    fn add_remote(&self, name: &str, url: &str) -> Result<()>;

    /// Removes the remote and its remote-tracking refs.
    fn remove_remote(&self, name: &str) -> Result<()>;

    /// Sets a key in the repository-local configuration.
    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// Points the upstream of `local_ref` (`refs/heads/...`) at `remote_ref`
    /// (`refs/remotes/...`).
    fn set_upstream(&self, local_ref: &str, remote_ref: &str) -> Result<()>;

    /// Fetches `ref_specs` through the named remote.
    /// Must abort with `ReconcileError::Cancelled` once `cancel` fires.
    fn fetch(&self, remote: &str, ref_specs: &[String], cancel: &CancellationToken) -> Result<()>;

    /// Pushes `local_ref` to `remote_ref` on the named remote.
    fn push(&self, remote: &str, local_ref: &str, remote_ref: &str) -> Result<()>;

    /// Full SHA of the commit `sha` if that commit object is present locally.
    /// Anything that is not a hex object id is reported as absent.
    fn lookup_commit(&self, sha: &str) -> Result<Option<String>>;

    /// Commit recorded in FETCH_HEAD for `ref_name` by the last fetch.
    fn fetch_head(&self, ref_name: &str) -> Result<Option<String>>;

    /// Best common ancestor of two commits, `None` if the histories are unrelated.
    fn merge_base(&self, one: &str, two: &str) -> Result<Option<String>>;
}
