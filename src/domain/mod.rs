pub mod types;
pub mod url;

pub use types::{
    CancellationToken, ChangeKind, ContentChanges, FetchRequest, FileStatus, MergeBaseQuery,
    Remote, TrackingDetails, TreeChange, TreeEntry, TreeEntryTarget,
};
pub use url::{RepositoryUrl, UrlKind};
