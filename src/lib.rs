//! gitrecon - reconcile a local git repository with its remotes
//!
//! Answers the questions a pull-request workflow keeps asking: is this file
//! modified, has HEAD been pushed, and what is the merge base of a pull
//! request whose commits may not be local yet.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod reconciler;

pub use adapters::Git2Repository;
pub use config::ReconcilerConfig;
pub use domain::{CancellationToken, MergeBaseQuery, RepositoryUrl};
pub use error::ReconcileError;
pub use ports::GitRepository;
pub use reconciler::GitReconciler;
