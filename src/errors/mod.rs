use std::error::Error;

use thiserror::Error;

/// Error taxonomy shared by the lock and context-sync subsystems (spec §7).
///
/// Variants map 1:1 onto the "kinds, not type names" taxonomy: callers match
/// on the variant, not on a subsystem-specific error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict with existing lock: {0}")]
    Conflict(String),

    #[error("lock expired")]
    Expired,

    #[error("not lock holder")]
    NotHolder,

    #[error("maximum renewals exceeded")]
    MaxRenewalsExceeded,

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("human intervention required: {0}")]
    HumanInterventionRequired(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("negotiation session timed out")]
    SessionTimeout,
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Lets callers look for a specific error kind buried anywhere in a causal
/// chain, without caring which wrapper type (`anyhow::Error`, a boxed
/// `dyn Error`, ...) carried it.
pub trait AsError {
    fn as_error<E: Error + 'static>(&self) -> Option<&E>;

    fn is_error<E: Error + PartialEq + 'static>(&self, err: &E) -> bool {
        if let Some(e) = self.as_error::<E>() {
            e == err
        } else {
            false
        }
    }
}

impl<T: Error + 'static> AsError for T {
    fn as_error<E: Error + 'static>(&self) -> Option<&E> {
        let mut cause: Option<&(dyn Error + 'static)> = Some(self);
        while let Some(err) = cause {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            cause = err.source();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_error_messages_name_the_condition() {
        assert_eq!(
            CoreError::Conflict("lock-abc".to_string()).to_string(),
            "conflict with existing lock: lock-abc"
        );
        assert_eq!(CoreError::NotHolder.to_string(), "not lock holder");
    }
}
