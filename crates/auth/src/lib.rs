//! `clinicflow-auth`: role-based authorization for clinic staff.
//!
//! Callers present an already-authenticated [`Principal`]; this crate only decides
//! whether the principal's role may perform an [`Action`]. No IO, no storage.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthorizationExplanation, AuthzError, authorize, explain_authorization};
pub use permissions::{Action, CapabilityTable};
pub use principal::{Principal, StaffMember};
pub use roles::Role;
