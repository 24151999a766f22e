use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use clinicflow_core::{Aggregate, AggregateRoot, BusinessRef, DomainError, StaffId};
use clinicflow_events::Event;

clinicflow_core::aggregate_id!(PatientId, "Patient identifier.");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "O")]
    Other,
}

/// Demographics and medical background captured at the front desk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetails {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: String,
    pub address: String,
    pub emergency_contact: String,
    pub blood_group: Option<String>,
    pub allergies: String,
    pub medical_history: String,
}

impl PatientDetails {
    fn validate(&self) -> Result<(), DomainError> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(DomainError::validation("first and last name are required"));
        }
        if self.phone.trim().is_empty() {
            return Err(DomainError::validation("phone is required"));
        }
        if let Some(group) = &self.blood_group {
            const GROUPS: [&str; 8] = ["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];
            if !GROUPS.contains(&group.as_str()) {
                return Err(DomainError::validation(format!("unknown blood group '{group}'")));
            }
        }
        Ok(())
    }
}

/// Aggregate root: Patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patient {
    id: PatientId,
    reference: Option<BusinessRef>,
    details: Option<PatientDetails>,
    registered_by: Option<StaffId>,
    registered_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Patient {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PatientId) -> Self {
        Self {
            id,
            reference: None,
            details: None,
            registered_by: None,
            registered_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PatientId {
        self.id
    }

    pub fn reference(&self) -> Option<&BusinessRef> {
        self.reference.as_ref()
    }

    pub fn details(&self) -> Option<&PatientDetails> {
        self.details.as_ref()
    }

    pub fn full_name(&self) -> String {
        self.details
            .as_ref()
            .map(|d| format!("{} {}", d.first_name, d.last_name))
            .unwrap_or_default()
    }

    pub fn registered_by(&self) -> Option<StaffId> {
        self.registered_by
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.registered_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl core::fmt::Display for Patient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.reference {
            Some(r) => write!(f, "{} - {}", r, self.full_name()),
            None => f.write_str(&self.full_name()),
        }
    }
}

impl AggregateRoot for Patient {
    type Id = PatientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPatient {
    pub patient_id: PatientId,
    pub reference: BusinessRef,
    pub details: PatientDetails,
    pub registered_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePatientDetails {
    pub patient_id: PatientId,
    pub details: PatientDetails,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatientCommand {
    Register(RegisterPatient),
    UpdateDetails(UpdatePatientDetails),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRegistered {
    pub patient_id: PatientId,
    pub reference: BusinessRef,
    pub details: PatientDetails,
    pub registered_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetailsUpdated {
    pub patient_id: PatientId,
    pub details: PatientDetails,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatientEvent {
    Registered(PatientRegistered),
    DetailsUpdated(PatientDetailsUpdated),
}

impl Event for PatientEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PatientEvent::Registered(_) => "clinical.patient.registered",
            PatientEvent::DetailsUpdated(_) => "clinical.patient.details_updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PatientEvent::Registered(e) => e.occurred_at,
            PatientEvent::DetailsUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Patient {
    type Command = PatientCommand;
    type Event = PatientEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PatientEvent::Registered(e) => {
                self.id = e.patient_id;
                self.reference = Some(e.reference.clone());
                self.details = Some(e.details.clone());
                self.registered_by = Some(e.registered_by);
                self.registered_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            PatientEvent::DetailsUpdated(e) => {
                self.details = Some(e.details.clone());
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PatientCommand::Register(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("patient already exists"));
                }
                cmd.details.validate()?;
                Ok(vec![PatientEvent::Registered(PatientRegistered {
                    patient_id: cmd.patient_id,
                    reference: cmd.reference.clone(),
                    details: cmd.details.clone(),
                    registered_by: cmd.registered_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PatientCommand::UpdateDetails(cmd) => {
                if !self.created {
                    return Err(DomainError::not_found(format!("patient {}", cmd.patient_id)));
                }
                if self.id != cmd.patient_id {
                    return Err(DomainError::invariant("patient_id mismatch"));
                }
                cmd.details.validate()?;
                Ok(vec![PatientEvent::DetailsUpdated(PatientDetailsUpdated {
                    patient_id: cmd.patient_id,
                    details: cmd.details.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicflow_core::ReferenceKind;

    fn details() -> PatientDetails {
        PatientDetails {
            first_name: "Amina".to_string(),
            last_name: "Okafor".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 12).unwrap(),
            gender: Gender::Female,
            phone: "+254700000001".to_string(),
            address: "12 Hospital Road".to_string(),
            emergency_contact: String::new(),
            blood_group: Some("O+".to_string()),
            allergies: "Penicillin".to_string(),
            medical_history: String::new(),
        }
    }

    #[test]
    fn register_then_update() {
        let id = PatientId::generate();
        let mut patient = Patient::empty(id);
        let reference = BusinessRef::generate(ReferenceKind::Patient, Utc::now());

        let events = patient
            .handle(&PatientCommand::Register(RegisterPatient {
                patient_id: id,
                reference: reference.clone(),
                details: details(),
                registered_by: StaffId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        patient.apply(&events[0]);
        assert_eq!(patient.full_name(), "Amina Okafor");
        assert_eq!(patient.to_string(), format!("{reference} - Amina Okafor"));

        let mut changed = details();
        changed.phone = "+254700000002".to_string();
        let events = patient
            .handle(&PatientCommand::UpdateDetails(UpdatePatientDetails {
                patient_id: id,
                details: changed,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        patient.apply(&events[0]);
        assert_eq!(patient.details().unwrap().phone, "+254700000002");
        assert_eq!(patient.version(), 2);
    }

    #[test]
    fn rejects_unknown_blood_group() {
        let id = PatientId::generate();
        let mut bad = details();
        bad.blood_group = Some("C+".to_string());

        let err = Patient::empty(id)
            .handle(&PatientCommand::Register(RegisterPatient {
                patient_id: id,
                reference: BusinessRef::generate(ReferenceKind::Patient, Utc::now()),
                details: bad,
                registered_by: StaffId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
