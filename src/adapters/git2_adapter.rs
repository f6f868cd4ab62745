//! Git2 implementation of the GitRepository port.

use crate::domain::{
    CancellationToken, ChangeKind, ContentChanges, FileStatus, Remote, TrackingDetails,
    TreeChange, TreeEntry, TreeEntryTarget,
};
use crate::error::ReconcileError;
use crate::ports::GitRepository;
use anyhow::{anyhow, Context, Result};
use git2::{
    Branch, ConfigLevel, Cred, CredentialType, Delta, DiffFindOptions, DiffOptions, ErrorCode,
    FetchOptions, ObjectType, Oid, Patch, PushOptions, RemoteCallbacks, Repository, Sort, Status,
    Tree,
};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// libgit2 asks again after every rejected credential; stop eventually.
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

pub struct Git2Repository {
    repo: Repository,
    use_credential_helper: bool,
}

impl Git2Repository {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path).context("Failed to open git repository")?;
        Ok(Self::new(repo))
    }

    pub fn open_current_dir() -> Result<Self> {
        Self::open(Path::new("."))
    }

    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            use_credential_helper: true,
        }
    }

    pub fn with_credential_helper(mut self, enabled: bool) -> Self {
        self.use_credential_helper = enabled;
        self
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn workdir(&self) -> Result<PathBuf> {
        self.repo
            .workdir()
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("Repository has no working directory (bare repo?)"))
    }

    fn find_commit(&self, sha: &str) -> Result<git2::Commit<'_>> {
        let not_found = || ReconcileError::NotFound(format!("commit {}", sha));
        let oid = Oid::from_str(sha).map_err(|_| not_found())?;
        match self.repo.find_commit(oid) {
            Ok(commit) => Ok(commit),
            Err(e) if e.code() == ErrorCode::NotFound => Err(not_found().into()),
            Err(e) => Err(e).with_context(|| format!("Failed to read commit {}", sha)),
        }
    }

    fn commit_tree(&self, sha: &str) -> Result<Tree<'_>> {
        let commit = self.find_commit(sha)?;
        commit
            .tree()
            .with_context(|| format!("Failed to read tree of {}", sha))
    }

    fn head_commit(&self) -> Result<Option<git2::Commit<'_>>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit().context("HEAD is not a commit")?)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e).context("Failed to get HEAD"),
        }
    }

    fn remote_callbacks(&self, cancel: Option<CancellationToken>) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();

        if let Some(token) = cancel {
            let transfer_token = token.clone();
            callbacks.transfer_progress(move |_stats| !transfer_token.is_cancelled());
            callbacks.sideband_progress(move |_data| !token.is_cancelled());
        }

        let config = if self.use_credential_helper {
            self.repo.config().ok()
        } else {
            None
        };
        let attempts = Cell::new(0usize);
        callbacks.credentials(move |url, username_from_url, allowed| {
            attempts.set(attempts.get() + 1);
            if attempts.get() > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("no credential strategy succeeded"));
            }

            if allowed.contains(CredentialType::SSH_KEY) && config.is_some() {
                if let Ok(cred) = Cred::ssh_key_from_agent(username_from_url.unwrap_or("git")) {
                    return Ok(cred);
                }
            }
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                if let Some(config) = &config {
                    if let Ok(cred) = Cred::credential_helper(config, url, username_from_url) {
                        return Ok(cred);
                    }
                }
            }
            if allowed.contains(CredentialType::USERNAME) {
                return Cred::username(username_from_url.unwrap_or("git"));
            }
            Cred::default()
        });

        callbacks
    }
}

impl GitRepository for Git2Repository {
    fn file_status(&self, path: &str) -> Result<FileStatus> {
        match self.repo.status_file(Path::new(path)) {
            Ok(status) => Ok(map_status(status)),
            Err(e) if matches!(e.code(), ErrorCode::NotFound | ErrorCode::Ambiguous) => {
                Ok(FileStatus::Nonexistent)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to get status of {}", path)),
        }
    }

    fn tree_entry(&self, commit: Option<&str>, path: &str) -> Result<Option<TreeEntry>> {
        let commit = match commit {
            Some(sha) => self.find_commit(sha)?,
            None => match self.head_commit()? {
                Some(commit) => commit,
                None => return Ok(None),
            },
        };

        let tree = commit.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to look up {}", path)),
        };

        let target = match entry.kind() {
            Some(ObjectType::Blob) => TreeEntryTarget::Blob,
            Some(ObjectType::Tree) => TreeEntryTarget::Tree,
            Some(ObjectType::Commit) => TreeEntryTarget::GitLink,
            _ => return Ok(None),
        };

        Ok(Some(TreeEntry {
            id: entry.id().to_string(),
            target,
        }))
    }

    fn read_blob(&self, blob_id: &str) -> Result<Vec<u8>> {
        let oid = Oid::from_str(blob_id)?;
        let blob = self
            .repo
            .find_blob(oid)
            .with_context(|| format!("Failed to find blob {}", blob_id))?;
        Ok(blob.content().to_vec())
    }

    fn compare_blob(&self, blob_id: &str, contents: &[u8], path: &str) -> Result<ContentChanges> {
        let oid = Oid::from_str(blob_id)?;
        let blob = self
            .repo
            .find_blob(oid)
            .with_context(|| format!("Failed to find blob {}", blob_id))?;

        let mut opts = DiffOptions::new();
        opts.context_lines(0);
        let as_path = Path::new(path);
        let patch =
            Patch::from_blob_and_buffer(&blob, Some(as_path), contents, Some(as_path), Some(&mut opts))?;

        // Binary content has no lines; count a difference as one line each way.
        if patch.delta().flags().is_binary() {
            let changed = usize::from(blob.content() != contents);
            return Ok(ContentChanges::new(changed, changed));
        }

        let (_context, additions, deletions) = patch.line_stats()?;
        Ok(ContentChanges::new(additions, deletions))
    }

    fn diff_file(&self, old_commit: &str, new_commit: &str, path: &str) -> Result<ContentChanges> {
        let old_tree = self.commit_tree(old_commit)?;
        let new_tree = self.commit_tree(new_commit)?;

        let mut opts = DiffOptions::new();
        opts.pathspec(path)
            .disable_pathspec_match(true)
            .context_lines(0);
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut opts))
            .with_context(|| format!("Failed to diff {}", path))?;

        let stats = diff.stats()?;
        Ok(ContentChanges::new(stats.insertions(), stats.deletions()))
    }

    fn tree_changes(
        &self,
        old_commit: &str,
        new_commit: &str,
        detect_renames: bool,
    ) -> Result<Vec<TreeChange>> {
        let old_tree = self.commit_tree(old_commit)?;
        let new_tree = self.commit_tree(new_commit)?;

        let mut diff = self
            .repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)
            .with_context(|| format!("Failed to diff {}..{}", old_commit, new_commit))?;
        if detect_renames {
            let mut find = DiffFindOptions::new();
            find.renames(true);
            diff.find_similar(Some(&mut find))?;
        }

        let mut changes = Vec::new();
        for delta in diff.deltas() {
            let kind = match delta.status() {
                Delta::Added => ChangeKind::Added,
                Delta::Deleted => ChangeKind::Deleted,
                Delta::Modified => ChangeKind::Modified,
                Delta::Renamed => ChangeKind::Renamed,
                Delta::Copied => ChangeKind::Copied,
                Delta::Typechange => ChangeKind::TypeChange,
                _ => continue,
            };
            let (Some(old_path), Some(path)) = (delta.old_file().path(), delta.new_file().path())
            else {
                continue;
            };
            changes.push(TreeChange {
                kind,
                path: path.to_string_lossy().into_owned(),
                old_path: old_path.to_string_lossy().into_owned(),
            });
        }
        Ok(changes)
    }

    fn read_workdir_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.workdir()?.join(path);
        if !full.is_file() {
            return Ok(None);
        }
        let bytes =
            fs::read(&full).with_context(|| format!("Failed to read {}", full.display()))?;
        Ok(Some(bytes))
    }

    fn head_tracking(&self) -> Result<TrackingDetails> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if is_missing(&e) => return Ok(TrackingDetails::untracked()),
            Err(e) => return Err(e).context("Failed to get HEAD"),
        };
        if !head.is_branch() {
            return Ok(TrackingDetails::untracked());
        }

        let branch = Branch::wrap(head);
        let upstream = match branch.upstream() {
            Ok(upstream) => upstream,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(TrackingDetails::untracked()),
            Err(e) => return Err(e).context("Failed to resolve upstream"),
        };

        let (Some(local), Some(remote)) = (branch.get().target(), upstream.get().target()) else {
            return Ok(TrackingDetails::untracked());
        };
        let (ahead, behind) = self.repo.graph_ahead_behind(local, remote)?;
        Ok(TrackingDetails::tracked(ahead, behind))
    }

    fn head_has_commits(&self) -> Result<bool> {
        Ok(self.head_commit()?.is_some())
    }

    fn head_history(&self, limit: usize) -> Result<Vec<String>> {
        let Some(head) = self.head_commit()? else {
            return Ok(Vec::new());
        };

        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        revwalk.push(head.id())?;

        let mut history = Vec::new();
        for oid in revwalk.take(limit) {
            history.push(oid?.to_string());
        }
        Ok(history)
    }

    fn unpushed_commits(&self, remote: &str) -> Result<HashSet<String>> {
        let Some(head) = self.head_commit()? else {
            return Ok(HashSet::new());
        };

        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(head.id())?;
        revwalk
            .hide_glob(&format!("refs/remotes/{}/*", remote))
            .with_context(|| format!("Failed to read refs of remote {}", remote))?;

        let unpushed = revwalk
            .map(|oid| oid.map(|oid| oid.to_string()))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(unpushed)
    }

    fn remotes(&self) -> Result<Vec<Remote>> {
        let names = self.repo.remotes().context("Failed to list remotes")?;
        let mut remotes = Vec::new();
        for name in names.iter().flatten() {
            let remote = self.repo.find_remote(name)?;
            remotes.push(Remote::new(name, remote.url().unwrap_or_default()));
        }
        Ok(remotes)
    }

    fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.repo
            .remote(name, url)
            .with_context(|| format!("Failed to add remote {}", name))?;
        Ok(())
    }

    fn remove_remote(&self, name: &str) -> Result<()> {
        self.repo
            .remote_delete(name)
            .with_context(|| format!("Failed to remove remote {}", name))
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let mut config = self
            .repo
            .config()?
            .open_level(ConfigLevel::Local)
            .context("Failed to open repository config")?;
        config
            .set_str(key, value)
            .with_context(|| format!("Failed to set {}", key))
    }

    fn set_upstream(&self, local_ref: &str, remote_ref: &str) -> Result<()> {
        let local = self
            .repo
            .find_reference(local_ref)
            .map_err(|_| ReconcileError::NotFound(local_ref.to_string()))?;
        if !local.is_branch() {
            return Err(ReconcileError::NotFound(local_ref.to_string()).into());
        }
        self.repo
            .find_reference(remote_ref)
            .map_err(|_| ReconcileError::NotFound(remote_ref.to_string()))?;

        let upstream = remote_ref.strip_prefix("refs/remotes/").unwrap_or(remote_ref);
        let mut branch = Branch::wrap(local);
        branch
            .set_upstream(Some(upstream))
            .with_context(|| format!("Failed to set upstream of {}", local_ref))
    }

    fn fetch(&self, remote: &str, ref_specs: &[String], cancel: &CancellationToken) -> Result<()> {
        let mut handle = self
            .repo
            .find_remote(remote)
            .map_err(|_| ReconcileError::NotFound(format!("remote {}", remote)))?;

        let mut opts = FetchOptions::new();
        opts.remote_callbacks(self.remote_callbacks(Some(cancel.clone())));

        debug!(remote, url = handle.url().unwrap_or_default(), "git2 fetch");
        match handle.fetch(ref_specs, Some(&mut opts), None) {
            Ok(()) => Ok(()),
            Err(_) if cancel.is_cancelled() => Err(ReconcileError::Cancelled.into()),
            Err(e) => Err(e.into()),
        }
    }

    fn push(&self, remote: &str, local_ref: &str, remote_ref: &str) -> Result<()> {
        let mut handle = self
            .repo
            .find_remote(remote)
            .map_err(|_| ReconcileError::NotFound(format!("remote {}", remote)))?;

        let rejected: Rc<RefCell<Option<(String, String)>>> = Rc::new(RefCell::new(None));
        let rejected_cb = Rc::clone(&rejected);

        let mut callbacks = self.remote_callbacks(None);
        callbacks.push_update_reference(move |refname, status| {
            if let Some(message) = status {
                *rejected_cb.borrow_mut() = Some((refname.to_string(), message.to_string()));
            }
            Ok(())
        });

        let mut opts = PushOptions::new();
        opts.remote_callbacks(callbacks);

        let refspec = format!("{}:{}", local_ref, remote_ref);
        handle.push(&[refspec.as_str()], Some(&mut opts))?;

        let rejection = rejected.borrow_mut().take();
        if let Some((reference, message)) = rejection {
            return Err(ReconcileError::PushRejected { reference, message }.into());
        }
        Ok(())
    }

    fn lookup_commit(&self, sha: &str) -> Result<Option<String>> {
        let Ok(oid) = Oid::from_str(sha) else {
            debug!(sha, "Not an object id");
            return Ok(None);
        };
        match self.repo.find_commit(oid) {
            Ok(commit) => Ok(Some(commit.id().to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to look up commit {}", sha)),
        }
    }

    fn fetch_head(&self, ref_name: &str) -> Result<Option<String>> {
        let mut found = None;
        let result = self.repo.fetchhead_foreach(|name, _url, oid, _is_merge| {
            if found.is_none() && name == ref_name {
                found = Some(oid.to_string());
            }
            true
        });

        match result {
            Ok(()) => Ok(found),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read FETCH_HEAD"),
        }
    }

    fn merge_base(&self, one: &str, two: &str) -> Result<Option<String>> {
        let one = Oid::from_str(one)?;
        let two = Oid::from_str(two)?;
        match self.repo.merge_base(one, two) {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to compute merge base"),
        }
    }
}

fn is_missing(err: &git2::Error) -> bool {
    matches!(err.code(), ErrorCode::NotFound | ErrorCode::UnbornBranch)
}

fn map_status(status: Status) -> FileStatus {
    if status.is_empty() {
        FileStatus::Unaltered
    } else if status.is_conflicted() {
        FileStatus::Conflicted
    } else if status.is_index_new() {
        FileStatus::NewInIndex
    } else if status.is_index_modified() {
        FileStatus::ModifiedInIndex
    } else if status.is_index_deleted() {
        FileStatus::DeletedFromIndex
    } else if status.is_index_renamed() {
        FileStatus::RenamedInIndex
    } else if status.is_index_typechange() {
        FileStatus::TypeChangeInIndex
    } else if status.is_wt_new() {
        FileStatus::NewInWorkdir
    } else if status.is_wt_modified() {
        FileStatus::ModifiedInWorkdir
    } else if status.is_wt_deleted() {
        FileStatus::DeletedFromWorkdir
    } else if status.is_wt_renamed() {
        FileStatus::RenamedInWorkdir
    } else if status.is_wt_typechange() {
        FileStatus::TypeChangeInWorkdir
    } else if status.is_ignored() {
        FileStatus::Ignored
    } else {
        FileStatus::Unaltered
    }
}
