use thiserror::Error;

/// Failures callers are expected to tell apart.
///
/// Operations return `anyhow::Result`; these are attached as the root cause
/// and recovered with `downcast_ref`.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid repository URL: {0}")]
    InvalidUrl(String),

    #[error("Push of {reference} rejected: {message}")]
    PushRejected { reference: String, message: String },
}

/// True when `err` was caused by a missing commit, ref or branch.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ReconcileError>(),
        Some(ReconcileError::NotFound(_))
    )
}

/// True when `err` was caused by the caller cancelling the operation.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ReconcileError>(),
        Some(ReconcileError::Cancelled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn not_found_survives_context() {
        let err: anyhow::Result<()> =
            Err(ReconcileError::NotFound("commit abc".to_string())).context("resolving base");
        let err = err.unwrap_err();
        assert!(is_not_found(&err));
        assert!(!is_cancelled(&err));
    }

    #[test]
    fn other_errors_are_not_classified() {
        let err = anyhow::anyhow!("network unreachable");
        assert!(!is_not_found(&err));
        assert!(!is_cancelled(&err));
    }
}
