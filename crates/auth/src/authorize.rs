use serde::Serialize;
use thiserror::Error;

use crate::{Action, CapabilityTable, Principal, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("staff account is inactive")]
    Inactive,

    #[error("forbidden: role {role} may not perform '{action}'")]
    Forbidden { role: Role, action: Action },
}

/// Authorize a principal for one action.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(
    principal: &Principal,
    action: Action,
    table: &CapabilityTable,
) -> Result<(), AuthzError> {
    if !principal.active {
        return Err(AuthzError::Inactive);
    }

    if table.allows(principal.role, action) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            role: principal.role,
            action,
        })
    }
}

/// Detailed explanation of an authorization decision, for audit logs.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub action: Action,
    pub role: Role,
    pub granted: bool,
    pub reason: String,
    /// Roles that would have been allowed (empty when granted).
    pub granting_roles: Vec<Role>,
}

/// Explain why `authorize` would allow or deny this principal.
pub fn explain_authorization(
    principal: &Principal,
    action: Action,
    table: &CapabilityTable,
) -> AuthorizationExplanation {
    match authorize(principal, action, table) {
        Ok(()) => AuthorizationExplanation {
            action,
            role: principal.role,
            granted: true,
            reason: format!("role {} is granted '{}'", principal.role, action),
            granting_roles: Vec::new(),
        },
        Err(AuthzError::Inactive) => AuthorizationExplanation {
            action,
            role: principal.role,
            granted: false,
            reason: "staff account is inactive".to_string(),
            granting_roles: Vec::new(),
        },
        Err(AuthzError::Forbidden { .. }) => AuthorizationExplanation {
            action,
            role: principal.role,
            granted: false,
            reason: format!("role {} lacks '{}'", principal.role, action),
            granting_roles: table.roles_for(action),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicflow_core::StaffId;

    #[test]
    fn allows_granted_role() {
        let table = CapabilityTable::standard();
        let doctor = Principal::new(StaffId::new(), Role::Doctor);
        assert!(authorize(&doctor, Action::CreatePrescription, &table).is_ok());
    }

    #[test]
    fn forbids_other_roles() {
        let table = CapabilityTable::standard();
        let pharmacist = Principal::new(StaffId::new(), Role::Pharmacist);

        let err = authorize(&pharmacist, Action::CreatePrescription, &table).unwrap_err();
        assert_eq!(
            err,
            AuthzError::Forbidden {
                role: Role::Pharmacist,
                action: Action::CreatePrescription
            }
        );
    }

    #[test]
    fn inactive_staff_are_rejected_before_the_table_is_consulted() {
        let table = CapabilityTable::standard();
        let mut doctor = Principal::new(StaffId::new(), Role::Doctor);
        doctor.active = false;

        assert_eq!(
            authorize(&doctor, Action::CreatePrescription, &table),
            Err(AuthzError::Inactive)
        );
    }

    #[test]
    fn explanation_lists_granting_roles_on_denial() {
        let table = CapabilityTable::standard();
        let nurse = Principal::new(StaffId::new(), Role::Nurse);

        let explanation = explain_authorization(&nurse, Action::SubmitLabResult, &table);
        assert!(!explanation.granted);
        assert_eq!(explanation.granting_roles, vec![Role::LabTech]);
    }

    #[test]
    fn explanation_for_inactive_staff_names_no_granting_roles() {
        let table = CapabilityTable::standard();
        let mut tech = Principal::new(StaffId::new(), Role::LabTech);
        tech.active = false;

        let explanation = explain_authorization(&tech, Action::SubmitLabResult, &table);
        assert!(!explanation.granted);
        assert_eq!(explanation.reason, "staff account is inactive");
        assert!(explanation.granting_roles.is_empty());
    }
}
