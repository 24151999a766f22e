use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicflow_catalog::MedicineId;
use clinicflow_core::{Aggregate, AggregateRoot, BusinessRef, DomainError, StaffId};
use clinicflow_events::Event;

use crate::visit::VisitId;

clinicflow_core::aggregate_id!(PrescriptionId, "Prescription identifier.");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrescriptionStatus {
    Pending,
    UnderReview,
    Ready,
    Dispensed,
    Cancelled,
}

impl PrescriptionStatus {
    /// Items may still be added and the prescription cancelled.
    pub fn is_editable(self) -> bool {
        matches!(self, PrescriptionStatus::Pending | PrescriptionStatus::UnderReview)
    }
}

/// A requested medicine line, with the unit price already taken from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionLine {
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub quantity: i64,
    pub dosage: String,
    pub duration: String,
    pub instructions: String,
    pub unit_price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionItem {
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub quantity: i64,
    pub dosage: String,
    pub duration: String,
    pub instructions: String,
    pub unit_price: u64,
    pub total_price: u64,
}

/// `unit_price * quantity`, rejecting non-positive quantities and overflow.
pub fn line_total(unit_price: u64, quantity: i64) -> Result<u64, DomainError> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    unit_price
        .checked_mul(quantity as u64)
        .ok_or_else(|| DomainError::invariant("line amount overflow"))
}

impl PrescriptionItem {
    fn from_line(line: &PrescriptionLine) -> Result<Self, DomainError> {
        if line.dosage.trim().is_empty() {
            return Err(DomainError::validation("dosage is required"));
        }
        Ok(Self {
            medicine_id: line.medicine_id,
            medicine_name: line.medicine_name.clone(),
            quantity: line.quantity,
            dosage: line.dosage.clone(),
            duration: line.duration.clone(),
            instructions: line.instructions.clone(),
            unit_price: line.unit_price,
            total_price: line_total(line.unit_price, line.quantity)?,
        })
    }
}

/// Aggregate root: Prescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prescription {
    id: PrescriptionId,
    reference: Option<BusinessRef>,
    visit_id: Option<VisitId>,
    prescribed_by: Option<StaffId>,
    status: PrescriptionStatus,
    notes: String,
    items: Vec<PrescriptionItem>,
    total_cost: u64,
    prepared_by: Option<StaffId>,
    cancel_reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
    reviewed_at: Option<DateTime<Utc>>,
    ready_at: Option<DateTime<Utc>>,
    dispensed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Prescription {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PrescriptionId) -> Self {
        Self {
            id,
            reference: None,
            visit_id: None,
            prescribed_by: None,
            status: PrescriptionStatus::Pending,
            notes: String::new(),
            items: Vec::new(),
            total_cost: 0,
            prepared_by: None,
            cancel_reason: None,
            created_at: None,
            reviewed_at: None,
            ready_at: None,
            dispensed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PrescriptionId {
        self.id
    }

    pub fn reference(&self) -> Option<&BusinessRef> {
        self.reference.as_ref()
    }

    pub fn visit_id(&self) -> Option<VisitId> {
        self.visit_id
    }

    pub fn prescribed_by(&self) -> Option<StaffId> {
        self.prescribed_by
    }

    pub fn status(&self) -> PrescriptionStatus {
        self.status
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn items(&self) -> &[PrescriptionItem] {
        &self.items
    }

    pub fn item(&self, medicine_id: MedicineId) -> Option<&PrescriptionItem> {
        self.items.iter().find(|i| i.medicine_id == medicine_id)
    }

    /// Amount charged at dispensing; zero until the prescription is ready.
    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    /// Sum of the prescribed line totals.
    pub fn items_total(&self) -> u64 {
        self.items.iter().map(|i| i.total_price).sum()
    }

    pub fn prepared_by(&self) -> Option<StaffId> {
        self.prepared_by
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn reviewed_at(&self) -> Option<DateTime<Utc>> {
        self.reviewed_at
    }

    pub fn ready_at(&self) -> Option<DateTime<Utc>> {
        self.ready_at
    }

    pub fn dispensed_at(&self) -> Option<DateTime<Utc>> {
        self.dispensed_at
    }
}

impl AggregateRoot for Prescription {
    type Id = PrescriptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePrescription {
    pub prescription_id: PrescriptionId,
    pub reference: BusinessRef,
    pub visit_id: VisitId,
    pub prescribed_by: StaffId,
    pub lines: Vec<PrescriptionLine>,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginReview {
    pub prescription_id: PrescriptionId,
    pub pharmacist: StaffId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem (new medicine, or more of one already prescribed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub prescription_id: PrescriptionId,
    pub line: PrescriptionLine,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkReady (stock has left the shelf, payment is due).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReady {
    pub prescription_id: PrescriptionId,
    pub total_cost: u64,
    pub prepared_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: HandOver (MEDICINE payment completed, medicine handed to the patient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandOver {
    pub prescription_id: PrescriptionId,
    pub payment: BusinessRef,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPrescription {
    pub prescription_id: PrescriptionId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrescriptionCommand {
    Create(CreatePrescription),
    BeginReview(BeginReview),
    AddItem(AddItem),
    MarkReady(MarkReady),
    HandOver(HandOver),
    Cancel(CancelPrescription),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionCreated {
    pub prescription_id: PrescriptionId,
    pub reference: BusinessRef,
    pub visit_id: VisitId,
    pub prescribed_by: StaffId,
    pub items: Vec<PrescriptionItem>,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStarted {
    pub prescription_id: PrescriptionId,
    pub pharmacist: StaffId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded. `item` is the resulting line (merged if the medicine was already
/// prescribed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub prescription_id: PrescriptionId,
    pub item: PrescriptionItem,
    pub added_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionReady {
    pub prescription_id: PrescriptionId,
    pub total_cost: u64,
    pub prepared_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionDispensed {
    pub prescription_id: PrescriptionId,
    pub payment: BusinessRef,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionCancelled {
    pub prescription_id: PrescriptionId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrescriptionEvent {
    Created(PrescriptionCreated),
    ReviewStarted(ReviewStarted),
    ItemAdded(ItemAdded),
    Ready(PrescriptionReady),
    Dispensed(PrescriptionDispensed),
    Cancelled(PrescriptionCancelled),
}

impl Event for PrescriptionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PrescriptionEvent::Created(_) => "clinical.prescription.created",
            PrescriptionEvent::ReviewStarted(_) => "clinical.prescription.review_started",
            PrescriptionEvent::ItemAdded(_) => "clinical.prescription.item_added",
            PrescriptionEvent::Ready(_) => "clinical.prescription.ready",
            PrescriptionEvent::Dispensed(_) => "clinical.prescription.dispensed",
            PrescriptionEvent::Cancelled(_) => "clinical.prescription.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PrescriptionEvent::Created(e) => e.occurred_at,
            PrescriptionEvent::ReviewStarted(e) => e.occurred_at,
            PrescriptionEvent::ItemAdded(e) => e.occurred_at,
            PrescriptionEvent::Ready(e) => e.occurred_at,
            PrescriptionEvent::Dispensed(e) => e.occurred_at,
            PrescriptionEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Prescription {
    type Command = PrescriptionCommand;
    type Event = PrescriptionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PrescriptionEvent::Created(e) => {
                self.id = e.prescription_id;
                self.reference = Some(e.reference.clone());
                self.visit_id = Some(e.visit_id);
                self.prescribed_by = Some(e.prescribed_by);
                self.items = e.items.clone();
                self.notes = e.notes.clone();
                self.status = PrescriptionStatus::Pending;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            PrescriptionEvent::ReviewStarted(e) => {
                self.status = PrescriptionStatus::UnderReview;
                self.reviewed_at = Some(e.occurred_at);
            }
            PrescriptionEvent::ItemAdded(e) => {
                match self
                    .items
                    .iter_mut()
                    .find(|i| i.medicine_id == e.item.medicine_id)
                {
                    Some(existing) => *existing = e.item.clone(),
                    None => self.items.push(e.item.clone()),
                }
            }
            PrescriptionEvent::Ready(e) => {
                self.status = PrescriptionStatus::Ready;
                self.total_cost = e.total_cost;
                self.prepared_by = Some(e.prepared_by);
                self.ready_at = Some(e.occurred_at);
            }
            PrescriptionEvent::Dispensed(e) => {
                self.status = PrescriptionStatus::Dispensed;
                self.dispensed_at = Some(e.occurred_at);
            }
            PrescriptionEvent::Cancelled(e) => {
                self.status = PrescriptionStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PrescriptionCommand::Create(cmd) => self.handle_create(cmd),
            PrescriptionCommand::BeginReview(cmd) => {
                self.ensure_exists(cmd.prescription_id)?;
                self.ensure_status(PrescriptionStatus::Pending, "begin review of")?;
                Ok(vec![PrescriptionEvent::ReviewStarted(ReviewStarted {
                    prescription_id: cmd.prescription_id,
                    pharmacist: cmd.pharmacist,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PrescriptionCommand::AddItem(cmd) => self.handle_add_item(cmd),
            PrescriptionCommand::MarkReady(cmd) => {
                self.ensure_exists(cmd.prescription_id)?;
                self.ensure_status(PrescriptionStatus::UnderReview, "prepare")?;
                if cmd.total_cost == 0 {
                    return Err(DomainError::validation("total cost must be positive"));
                }
                Ok(vec![PrescriptionEvent::Ready(PrescriptionReady {
                    prescription_id: cmd.prescription_id,
                    total_cost: cmd.total_cost,
                    prepared_by: cmd.prepared_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PrescriptionCommand::HandOver(cmd) => {
                self.ensure_exists(cmd.prescription_id)?;
                self.ensure_status(PrescriptionStatus::Ready, "dispense")?;
                Ok(vec![PrescriptionEvent::Dispensed(PrescriptionDispensed {
                    prescription_id: cmd.prescription_id,
                    payment: cmd.payment.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            PrescriptionCommand::Cancel(cmd) => {
                self.ensure_exists(cmd.prescription_id)?;
                if !self.status.is_editable() {
                    return Err(DomainError::invalid_transition(
                        "prescription",
                        self.status,
                        "cancel",
                    ));
                }
                if cmd.reason.trim().is_empty() {
                    return Err(DomainError::validation("cancellation reason is required"));
                }
                Ok(vec![PrescriptionEvent::Cancelled(PrescriptionCancelled {
                    prescription_id: cmd.prescription_id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Prescription {
    fn ensure_exists(&self, prescription_id: PrescriptionId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("prescription {prescription_id}")));
        }
        if self.id != prescription_id {
            return Err(DomainError::invariant("prescription_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: PrescriptionStatus, attempted: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invalid_transition("prescription", self.status, attempted));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePrescription) -> Result<Vec<PrescriptionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("prescription already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("prescription needs at least one item"));
        }

        let mut items: Vec<PrescriptionItem> = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            if items.iter().any(|i| i.medicine_id == line.medicine_id) {
                return Err(DomainError::validation(format!(
                    "{} is prescribed more than once",
                    line.medicine_name
                )));
            }
            items.push(PrescriptionItem::from_line(line)?);
        }
        items
            .iter()
            .try_fold(0u64, |acc, i| acc.checked_add(i.total_price))
            .ok_or_else(|| DomainError::invariant("prescription total overflow"))?;

        Ok(vec![PrescriptionEvent::Created(PrescriptionCreated {
            prescription_id: cmd.prescription_id,
            reference: cmd.reference.clone(),
            visit_id: cmd.visit_id,
            prescribed_by: cmd.prescribed_by,
            items,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.prescription_id)?;
        if !self.status.is_editable() {
            return Err(DomainError::invalid_transition(
                "prescription",
                self.status,
                "add items to",
            ));
        }

        let item = match self.item(cmd.line.medicine_id) {
            Some(existing) => {
                if cmd.line.quantity <= 0 {
                    return Err(DomainError::validation("quantity must be positive"));
                }
                let quantity = existing
                    .quantity
                    .checked_add(cmd.line.quantity)
                    .ok_or_else(|| DomainError::invariant("quantity overflow"))?;
                PrescriptionItem {
                    quantity,
                    total_price: line_total(existing.unit_price, quantity)?,
                    ..existing.clone()
                }
            }
            None => PrescriptionItem::from_line(&cmd.line)?,
        };

        Ok(vec![PrescriptionEvent::ItemAdded(ItemAdded {
            prescription_id: cmd.prescription_id,
            item,
            added_quantity: cmd.line.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicflow_core::ReferenceKind;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn line(medicine_id: MedicineId, name: &str, quantity: i64, unit_price: u64) -> PrescriptionLine {
        PrescriptionLine {
            medicine_id,
            medicine_name: name.to_string(),
            quantity,
            dosage: "1 tablet twice daily".to_string(),
            duration: "5 days".to_string(),
            instructions: String::new(),
            unit_price,
        }
    }

    fn create(lines: Vec<PrescriptionLine>) -> Result<Prescription, DomainError> {
        let id = PrescriptionId::generate();
        let mut p = Prescription::empty(id);
        let events = p.handle(&PrescriptionCommand::Create(CreatePrescription {
            prescription_id: id,
            reference: BusinessRef::generate(ReferenceKind::Prescription, test_time()),
            visit_id: VisitId::generate(),
            prescribed_by: StaffId::new(),
            lines,
            notes: String::new(),
            occurred_at: test_time(),
        }))?;
        p.apply(&events[0]);
        Ok(p)
    }

    #[test]
    fn create_captures_line_totals() {
        let p = create(vec![
            line(MedicineId::generate(), "Amoxil", 3, 20),
            line(MedicineId::generate(), "Panadol", 1, 30),
        ])
        .unwrap();

        assert_eq!(p.status(), PrescriptionStatus::Pending);
        assert_eq!(p.items().len(), 2);
        assert_eq!(p.items()[0].total_price, 60);
        assert_eq!(p.items_total(), 90);
        assert_eq!(p.total_cost(), 0);
    }

    #[test]
    fn duplicate_medicine_is_rejected() {
        let med = MedicineId::generate();
        let err = create(vec![line(med, "Amoxil", 3, 20), line(med, "Amoxil", 1, 20)]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("more than once")));
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let err = create(vec![line(MedicineId::generate(), "Amoxil", 0, 20)]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn adding_an_existing_medicine_increases_quantity() {
        let med = MedicineId::generate();
        let mut p = create(vec![line(med, "Amoxil", 3, 20)]).unwrap();

        let events = p
            .handle(&PrescriptionCommand::AddItem(AddItem {
                prescription_id: p.id_typed(),
                line: line(med, "Amoxil", 2, 999),
                occurred_at: test_time(),
            }))
            .unwrap();
        p.apply(&events[0]);

        assert_eq!(p.items().len(), 1);
        assert_eq!(p.item(med).unwrap().quantity, 5);
        // Captured price wins over the one on the incoming line.
        assert_eq!(p.item(med).unwrap().total_price, 100);
    }

    #[test]
    fn cannot_hand_over_before_ready() {
        let p = create(vec![line(MedicineId::generate(), "Amoxil", 3, 20)]).unwrap();
        let err = p
            .handle(&PrescriptionCommand::HandOver(HandOver {
                prescription_id: p.id_typed(),
                payment: BusinessRef::generate(ReferenceKind::Payment, test_time()),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvalidStateTransition { entity, state, .. } => {
                assert_eq!(entity, "prescription");
                assert_eq!(state, "Pending");
            }
            other => panic!("Expected InvalidStateTransition, got {other:?}"),
        }
    }

    #[test]
    fn ready_prescription_cannot_be_cancelled() {
        let mut p = create(vec![line(MedicineId::generate(), "Amoxil", 3, 20)]).unwrap();
        let id = p.id_typed();
        let pharmacist = StaffId::new();
        for cmd in [
            PrescriptionCommand::BeginReview(BeginReview {
                prescription_id: id,
                pharmacist,
                occurred_at: test_time(),
            }),
            PrescriptionCommand::MarkReady(MarkReady {
                prescription_id: id,
                total_cost: 60,
                prepared_by: pharmacist,
                occurred_at: test_time(),
            }),
        ] {
            let events = p.handle(&cmd).unwrap();
            p.apply(&events[0]);
        }
        assert_eq!(p.status(), PrescriptionStatus::Ready);
        assert_eq!(p.total_cost(), 60);

        let err = p
            .handle(&PrescriptionCommand::Cancel(CancelPrescription {
                prescription_id: id,
                reason: "changed mind".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }
}
