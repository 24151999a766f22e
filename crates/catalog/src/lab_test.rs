use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicflow_core::{Aggregate, AggregateRoot, DomainError};
use clinicflow_events::Event;

clinicflow_core::aggregate_id!(LabTestTypeId, "Lab test type identifier.");

/// Aggregate root: LabTestType (an orderable diagnostic test).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabTestType {
    id: LabTestTypeId,
    name: String,
    description: String,
    /// Price in smallest currency unit.
    price: u64,
    turnaround_hours: u32,
    active: bool,
    version: u64,
    created: bool,
}

impl LabTestType {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: LabTestTypeId) -> Self {
        Self {
            id,
            name: String::new(),
            description: String::new(),
            price: 0,
            turnaround_hours: 0,
            active: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LabTestTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn price(&self) -> u64 {
        self.price
    }

    pub fn turnaround_hours(&self) -> u32 {
        self.turnaround_hours
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl AggregateRoot for LabTestType {
    type Id = LabTestTypeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefineLabTestType {
    pub lab_test_type_id: LabTestTypeId,
    pub name: String,
    pub description: String,
    pub price: u64,
    pub turnaround_hours: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepriceLabTestType {
    pub lab_test_type_id: LabTestTypeId,
    pub price: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateLabTestType {
    pub lab_test_type_id: LabTestTypeId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabTestTypeCommand {
    Define(DefineLabTestType),
    Reprice(RepriceLabTestType),
    Deactivate(DeactivateLabTestType),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabTestTypeDefined {
    pub lab_test_type_id: LabTestTypeId,
    pub name: String,
    pub description: String,
    pub price: u64,
    pub turnaround_hours: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabTestTypeRepriced {
    pub lab_test_type_id: LabTestTypeId,
    pub old_price: u64,
    pub new_price: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabTestTypeDeactivated {
    pub lab_test_type_id: LabTestTypeId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabTestTypeEvent {
    Defined(LabTestTypeDefined),
    Repriced(LabTestTypeRepriced),
    Deactivated(LabTestTypeDeactivated),
}

impl Event for LabTestTypeEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LabTestTypeEvent::Defined(_) => "catalog.lab_test_type.defined",
            LabTestTypeEvent::Repriced(_) => "catalog.lab_test_type.repriced",
            LabTestTypeEvent::Deactivated(_) => "catalog.lab_test_type.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LabTestTypeEvent::Defined(e) => e.occurred_at,
            LabTestTypeEvent::Repriced(e) => e.occurred_at,
            LabTestTypeEvent::Deactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for LabTestType {
    type Command = LabTestTypeCommand;
    type Event = LabTestTypeEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LabTestTypeEvent::Defined(e) => {
                self.id = e.lab_test_type_id;
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.price = e.price;
                self.turnaround_hours = e.turnaround_hours;
                self.active = true;
                self.created = true;
            }
            LabTestTypeEvent::Repriced(e) => {
                self.price = e.new_price;
            }
            LabTestTypeEvent::Deactivated(_) => {
                self.active = false;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LabTestTypeCommand::Define(cmd) => self.handle_define(cmd),
            LabTestTypeCommand::Reprice(cmd) => self.handle_reprice(cmd),
            LabTestTypeCommand::Deactivate(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl LabTestType {
    fn ensure_exists(&self, id: LabTestTypeId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("lab test type {id}")));
        }
        if self.id != id {
            return Err(DomainError::invariant("lab_test_type_id mismatch"));
        }
        Ok(())
    }

    fn handle_define(&self, cmd: &DefineLabTestType) -> Result<Vec<LabTestTypeEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("lab test type already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.price == 0 {
            return Err(DomainError::validation("price must be positive"));
        }

        Ok(vec![LabTestTypeEvent::Defined(LabTestTypeDefined {
            lab_test_type_id: cmd.lab_test_type_id,
            name: cmd.name.trim().to_string(),
            description: cmd.description.clone(),
            price: cmd.price,
            turnaround_hours: cmd.turnaround_hours,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reprice(&self, cmd: &RepriceLabTestType) -> Result<Vec<LabTestTypeEvent>, DomainError> {
        self.ensure_exists(cmd.lab_test_type_id)?;
        if cmd.price == 0 {
            return Err(DomainError::validation("price must be positive"));
        }
        if cmd.price == self.price {
            return Err(DomainError::validation("price is unchanged"));
        }

        Ok(vec![LabTestTypeEvent::Repriced(LabTestTypeRepriced {
            lab_test_type_id: cmd.lab_test_type_id,
            old_price: self.price,
            new_price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(
        &self,
        cmd: &DeactivateLabTestType,
    ) -> Result<Vec<LabTestTypeEvent>, DomainError> {
        self.ensure_exists(cmd.lab_test_type_id)?;
        if !self.active {
            return Err(DomainError::conflict("lab test type is already inactive"));
        }

        Ok(vec![LabTestTypeEvent::Deactivated(LabTestTypeDeactivated {
            lab_test_type_id: cmd.lab_test_type_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn defined(price: u64) -> LabTestType {
        let id = LabTestTypeId::generate();
        let mut t = LabTestType::empty(id);
        let events = t
            .handle(&LabTestTypeCommand::Define(DefineLabTestType {
                lab_test_type_id: id,
                name: "Complete Blood Count".to_string(),
                description: "CBC".to_string(),
                price,
                turnaround_hours: 24,
                occurred_at: test_time(),
            }))
            .unwrap();
        t.apply(&events[0]);
        t
    }

    #[test]
    fn define_activates_test_type() {
        let t = defined(100);
        assert!(t.is_active());
        assert_eq!(t.price(), 100);
        assert_eq!(t.version(), 1);
    }

    #[test]
    fn zero_price_is_rejected() {
        let id = LabTestTypeId::generate();
        let err = LabTestType::empty(id)
            .handle(&LabTestTypeCommand::Define(DefineLabTestType {
                lab_test_type_id: id,
                name: "Lipid Panel".to_string(),
                description: String::new(),
                price: 0,
                turnaround_hours: 48,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn reprice_records_old_and_new_price() {
        let mut t = defined(100);
        let events = t
            .handle(&LabTestTypeCommand::Reprice(RepriceLabTestType {
                lab_test_type_id: t.id_typed(),
                price: 120,
                occurred_at: test_time(),
            }))
            .unwrap();
        match &events[0] {
            LabTestTypeEvent::Repriced(e) => {
                assert_eq!(e.old_price, 100);
                assert_eq!(e.new_price, 120);
            }
            _ => panic!("Expected Repriced event"),
        }
        t.apply(&events[0]);
        assert_eq!(t.price(), 120);
    }

    #[test]
    fn cannot_deactivate_twice() {
        let mut t = defined(100);
        let cmd = LabTestTypeCommand::Deactivate(DeactivateLabTestType {
            lab_test_type_id: t.id_typed(),
            occurred_at: test_time(),
        });
        let events = t.handle(&cmd).unwrap();
        t.apply(&events[0]);
        assert!(!t.is_active());

        match t.handle(&cmd).unwrap_err() {
            DomainError::Conflict(_) => {}
            other => panic!("Expected Conflict, got {other:?}"),
        }
    }
}
