//! Pure data types for the reconciliation domain.
//! No I/O, no dependencies on external crates beyond std.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::url::RepositoryUrl;

/// A named remote and the URL it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

impl Remote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// One fetch to perform: where from, and which ref-specs on top of the
/// standard branch ref-spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: RepositoryUrl,
    pub ref_specs: Vec<String>,
}

/// Inputs for resolving the merge base of a pull request.
/// Absent SHAs are resolved from the fetched refs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeBaseQuery {
    pub target_clone_url: RepositoryUrl,
    pub base_sha: Option<String>,
    pub head_sha: Option<String>,
    pub base_ref: String,
    pub pull_request_number: u64,
}

impl MergeBaseQuery {
    /// Ref namespace holding the pull request head on the hosting side.
    pub fn pull_head_ref(&self) -> String {
        format!("refs/pull/{}/head", self.pull_request_number)
    }

    /// Fully qualified name of the base branch on the remote.
    pub fn base_branch_ref(&self) -> String {
        if self.base_ref.starts_with("refs/") {
            self.base_ref.clone()
        } else {
            format!("refs/heads/{}", self.base_ref)
        }
    }
}

/// Status of a single path in the index and working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Unaltered,
    NewInIndex,
    ModifiedInIndex,
    DeletedFromIndex,
    RenamedInIndex,
    TypeChangeInIndex,
    NewInWorkdir,
    ModifiedInWorkdir,
    DeletedFromWorkdir,
    RenamedInWorkdir,
    TypeChangeInWorkdir,
    Conflicted,
    Ignored,
    /// Not in HEAD, the index or the working directory.
    Nonexistent,
}

impl FileStatus {
    /// Statuses that say nothing about whether tracked content changed.
    pub fn is_untracked(self) -> bool {
        matches!(self, FileStatus::Ignored | FileStatus::Nonexistent)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileStatus::Unaltered => "unaltered",
            FileStatus::NewInIndex => "new in index",
            FileStatus::ModifiedInIndex => "modified in index",
            FileStatus::DeletedFromIndex => "deleted from index",
            FileStatus::RenamedInIndex => "renamed in index",
            FileStatus::TypeChangeInIndex => "type change in index",
            FileStatus::NewInWorkdir => "new in workdir",
            FileStatus::ModifiedInWorkdir => "modified in workdir",
            FileStatus::DeletedFromWorkdir => "deleted from workdir",
            FileStatus::RenamedInWorkdir => "renamed in workdir",
            FileStatus::TypeChangeInWorkdir => "type change in workdir",
            FileStatus::Conflicted => "conflicted",
            FileStatus::Ignored => "ignored",
            FileStatus::Nonexistent => "nonexistent",
        };
        f.write_str(name)
    }
}

/// What a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEntryTarget {
    Blob,
    Tree,
    /// A submodule commit link.
    GitLink,
}

/// A named pointer inside a commit's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub id: String,
    pub target: TreeEntryTarget,
}

/// Line counts from comparing a stored blob with other content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentChanges {
    pub lines_added: usize,
    pub lines_deleted: usize,
}

impl ContentChanges {
    pub fn new(lines_added: usize, lines_deleted: usize) -> Self {
        Self {
            lines_added,
            lines_deleted,
        }
    }

    /// Every line of `contents` counted as added, as when the file did not
    /// exist before. A final line without a newline still counts.
    pub fn all_added(contents: &[u8]) -> Self {
        let newlines = contents.iter().filter(|b| **b == b'\n').count();
        let unterminated = usize::from(contents.last().is_some_and(|b| *b != b'\n'));
        Self::new(newlines + unterminated, 0)
    }

    pub fn has_changes(&self) -> bool {
        self.lines_added + self.lines_deleted > 0
    }
}

impl fmt::Display for ContentChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{} -{}", self.lines_added, self.lines_deleted)
    }
}

/// How a path changed between two commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    TypeChange,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ChangeKind::Added => "A",
            ChangeKind::Deleted => "D",
            ChangeKind::Modified => "M",
            ChangeKind::Renamed => "R",
            ChangeKind::Copied => "C",
            ChangeKind::TypeChange => "T",
        };
        f.write_str(code)
    }
}

/// One changed path in a commit-to-commit comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChange {
    pub kind: ChangeKind,
    pub path: String,
    /// Path in the older commit; differs from `path` only for renames and copies.
    pub old_path: String,
}

/// Relationship between a local branch and its upstream.
/// Counts are `None` when the branch has no upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackingDetails {
    pub ahead_by: Option<usize>,
    pub behind_by: Option<usize>,
}

impl TrackingDetails {
    pub fn untracked() -> Self {
        Self::default()
    }

    pub fn tracked(ahead_by: usize, behind_by: usize) -> Self {
        Self {
            ahead_by: Some(ahead_by),
            behind_by: Some(behind_by),
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a running fetch.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(base_ref: &str, number: u64) -> MergeBaseQuery {
        MergeBaseQuery {
            target_clone_url: RepositoryUrl::parse("https://github.com/owner/repo").unwrap(),
            base_sha: None,
            head_sha: None,
            base_ref: base_ref.to_string(),
            pull_request_number: number,
        }
    }

    #[test]
    fn pull_head_ref_uses_pull_namespace() {
        assert_eq!(query("master", 777).pull_head_ref(), "refs/pull/777/head");
    }

    #[test]
    fn base_branch_ref_qualifies_short_names() {
        assert_eq!(query("master", 1).base_branch_ref(), "refs/heads/master");
        assert_eq!(
            query("refs/heads/release", 1).base_branch_ref(),
            "refs/heads/release"
        );
    }

    #[test]
    fn content_changes_detects_any_line_change() {
        assert!(!ContentChanges::new(0, 0).has_changes());
        assert!(ContentChanges::new(1, 0).has_changes());
        assert!(ContentChanges::new(0, 1).has_changes());
        assert!(ContentChanges::new(1, 1).has_changes());
    }

    #[test]
    fn all_added_counts_lines_like_a_new_file() {
        assert_eq!(ContentChanges::all_added(b""), ContentChanges::new(0, 0));
        assert_eq!(ContentChanges::all_added(b"one\n"), ContentChanges::new(1, 0));
        assert_eq!(ContentChanges::all_added(b"one\ntwo"), ContentChanges::new(2, 0));
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let handle = token.clone();
        assert!(!handle.is_cancelled());
        token.cancel();
        assert!(handle.is_cancelled());
    }
}
