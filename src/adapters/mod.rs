pub mod git2_adapter;

pub use git2_adapter::Git2Repository;
