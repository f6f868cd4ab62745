pub mod git;

pub use git::GitRepository;
