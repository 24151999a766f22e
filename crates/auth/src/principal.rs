use serde::{Deserialize, Serialize};

use clinicflow_core::StaffId;

use crate::Role;

/// An authenticated staff member acting on the system.
///
/// Authentication happens elsewhere; by the time a principal reaches the workflow
/// its identity and role are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub staff_id: StaffId,
    pub role: Role,
    pub active: bool,
}

impl Principal {
    pub fn new(staff_id: StaffId, role: Role) -> Self {
        Self {
            staff_id,
            role,
            active: true,
        }
    }
}

/// Directory record for a staff member.
///
/// Consumed for assignment checks (e.g. "technician must be an active lab tech") and
/// role-addressed notification fan-out. Staff management itself is out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: StaffId,
    pub name: String,
    pub role: Role,
    pub active: bool,
}

impl StaffMember {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            id: StaffId::new(),
            name: name.into(),
            role,
            active: true,
        }
    }

    pub fn principal(&self) -> Principal {
        Principal {
            staff_id: self.id,
            role: self.role,
            active: self.active,
        }
    }

    pub fn is_active_with_role(&self, role: Role) -> bool {
        self.active && self.role == role
    }
}
