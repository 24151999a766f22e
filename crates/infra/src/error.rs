use thiserror::Error;

use clinicflow_auth::AuthzError;
use clinicflow_core::DomainError;

use crate::store::StoreError;

/// Error returned by every workflow operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// A clinical, catalog or ledger rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The acting principal's role may not perform the operation.
    #[error(transparent)]
    Unauthorized(#[from] AuthzError),

    /// The store could not run or commit the unit of work.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::Domain(err) => err.code(),
            WorkflowError::Unauthorized(_) => "permission_denied",
            WorkflowError::Store(_) => "store_error",
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            WorkflowError::Domain(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            WorkflowError::Unauthorized(_) | WorkflowError::Domain(DomainError::PermissionDenied(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicflow_auth::{Action, Role};

    #[test]
    fn authorization_failures_share_the_permission_code() {
        let err: WorkflowError = AuthzError::Forbidden {
            role: Role::Pharmacist,
            action: Action::CreatePrescription,
        }
        .into();
        assert_eq!(err.code(), "permission_denied");
        assert!(err.is_permission_denied());

        let err: WorkflowError = DomainError::permission_denied("not the assigned technician").into();
        assert_eq!(err.code(), "permission_denied");
        assert!(err.is_permission_denied());
    }

    #[test]
    fn domain_codes_pass_through() {
        let err: WorkflowError = DomainError::duplicate_payment("payment PAY1").into();
        assert_eq!(err.code(), "duplicate_payment");
        assert!(err.domain().is_some());
    }
}
