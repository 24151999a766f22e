use serde::{Deserialize, Serialize};

/// Staff role. Each staff member holds exactly one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Doctor,
    Nurse,
    LabTech,
    Receptionist,
    Pharmacist,
    Cashier,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Admin,
        Role::Doctor,
        Role::Nurse,
        Role::LabTech,
        Role::Receptionist,
        Role::Pharmacist,
        Role::Cashier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Doctor => "DOCTOR",
            Role::Nurse => "NURSE",
            Role::LabTech => "LAB_TECH",
            Role::Receptionist => "RECEPTIONIST",
            Role::Pharmacist => "PHARMACIST",
            Role::Cashier => "CASHIER",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_upper_snake_case() {
        let json = serde_json::to_string(&Role::LabTech).unwrap();
        assert_eq!(json, "\"LAB_TECH\"");
        assert_eq!(Role::LabTech.to_string(), "LAB_TECH");
    }
}
