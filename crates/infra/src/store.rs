//! In-memory transactional clinic store.
//!
//! ## Unit of work
//!
//! [`InMemoryClinicStore::transaction`] takes the write lock, hands the closure a
//! [`UnitOfWork`] over a *copy* of the committed state, and swaps the copy in only if
//! the closure returns `Ok`. Stock decrements, status changes and payment records
//! created by one operation therefore commit or vanish together.
//!
//! Every aggregate command executed through the unit of work is journaled; role
//! notifications queued in the outbox are fanned out against the staff directory at
//! commit and handed back to the caller for delivery.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use clinicflow_auth::{Role, StaffMember};
use clinicflow_billing::{Payment, PaymentId, PaymentStatus, PaymentType};
use clinicflow_catalog::{LabTestType, LabTestTypeId, Medicine, MedicineId};
use clinicflow_clinical::{
    DispenseCart, DispenseCartId, LabRequestId, LabTestRequest, Patient, PatientId, Prescription,
    PrescriptionId, PrescriptionStatus, Visit, VisitId,
};
use clinicflow_core::{
    Aggregate, AggregateId, AggregateRoot, BusinessRef, DomainError, ReferenceKind, StaffId,
};
use clinicflow_events::{Event, Notification};

use crate::error::WorkflowError;
use crate::journal::JournalEntry;

/// Draws before giving up on finding an unused business reference.
const MAX_REFERENCE_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("clinic store lock poisoned")]
    Poisoned,

    #[error("journal serialization failed: {0}")]
    Serialization(String),

    #[error("could not draw an unused {0} reference")]
    ReferenceSpaceExhausted(&'static str),
}

/// Committed clinic state: every record, the staff directory and issued references.
#[derive(Debug, Clone, Default)]
pub struct ClinicState {
    patients: HashMap<PatientId, Patient>,
    visits: HashMap<VisitId, Visit>,
    lab_requests: HashMap<LabRequestId, LabTestRequest>,
    prescriptions: HashMap<PrescriptionId, Prescription>,
    carts: HashMap<DispenseCartId, DispenseCart>,
    payments: HashMap<PaymentId, Payment>,
    lab_test_types: HashMap<LabTestTypeId, LabTestType>,
    medicines: HashMap<MedicineId, Medicine>,
    staff: HashMap<StaffId, StaffMember>,
    issued_refs: HashSet<BusinessRef>,
    cart_sequence: u64,
}

/// A record kept in one of the [`ClinicState`] tables.
pub trait StoredRecord: Aggregate<Error = DomainError> + Clone {
    /// Journal aggregate type, e.g. `"clinical.visit"`.
    const AGGREGATE_TYPE: &'static str;
    /// Name used in not-found messages.
    const LABEL: &'static str;

    fn table(state: &ClinicState) -> &HashMap<Self::Id, Self>;
    fn table_mut(state: &mut ClinicState) -> &mut HashMap<Self::Id, Self>;
    fn blank(id: Self::Id) -> Self;
    fn stream_id(id: &Self::Id) -> AggregateId;
}

macro_rules! stored_record {
    ($record:ty, $id:ty, $table:ident, $aggregate_type:literal, $label:literal) => {
        impl StoredRecord for $record {
            const AGGREGATE_TYPE: &'static str = $aggregate_type;
            const LABEL: &'static str = $label;

            fn table(state: &ClinicState) -> &HashMap<$id, Self> {
                &state.$table
            }

            fn table_mut(state: &mut ClinicState) -> &mut HashMap<$id, Self> {
                &mut state.$table
            }

            fn blank(id: $id) -> Self {
                <$record>::empty(id)
            }

            fn stream_id(id: &$id) -> AggregateId {
                id.aggregate_id()
            }
        }
    };
}

stored_record!(Patient, PatientId, patients, "clinical.patient", "patient");
stored_record!(Visit, VisitId, visits, "clinical.visit", "visit");
stored_record!(LabTestRequest, LabRequestId, lab_requests, "clinical.lab_request", "lab request");
stored_record!(Prescription, PrescriptionId, prescriptions, "clinical.prescription", "prescription");
stored_record!(DispenseCart, DispenseCartId, carts, "clinical.dispense_cart", "dispense cart");
stored_record!(Payment, PaymentId, payments, "billing.payment", "payment");
stored_record!(LabTestType, LabTestTypeId, lab_test_types, "catalog.lab_test_type", "lab test type");
stored_record!(Medicine, MedicineId, medicines, "catalog.medicine", "medicine");

impl ClinicState {
    pub fn patient(&self, id: PatientId) -> Option<&Patient> {
        self.patients.get(&id)
    }

    pub fn visit(&self, id: VisitId) -> Option<&Visit> {
        self.visits.get(&id)
    }

    pub fn lab_request(&self, id: LabRequestId) -> Option<&LabTestRequest> {
        self.lab_requests.get(&id)
    }

    pub fn prescription(&self, id: PrescriptionId) -> Option<&Prescription> {
        self.prescriptions.get(&id)
    }

    pub fn cart(&self, id: DispenseCartId) -> Option<&DispenseCart> {
        self.carts.get(&id)
    }

    pub fn payment(&self, id: PaymentId) -> Option<&Payment> {
        self.payments.get(&id)
    }

    pub fn lab_test_type(&self, id: LabTestTypeId) -> Option<&LabTestType> {
        self.lab_test_types.get(&id)
    }

    pub fn medicine(&self, id: MedicineId) -> Option<&Medicine> {
        self.medicines.get(&id)
    }

    pub fn staff_member(&self, id: StaffId) -> Option<&StaffMember> {
        self.staff.get(&id)
    }

    pub fn patients(&self) -> impl Iterator<Item = &Patient> {
        self.patients.values()
    }

    pub fn visits(&self) -> impl Iterator<Item = &Visit> {
        self.visits.values()
    }

    pub fn lab_requests(&self) -> impl Iterator<Item = &LabTestRequest> {
        self.lab_requests.values()
    }

    pub fn prescriptions(&self) -> impl Iterator<Item = &Prescription> {
        self.prescriptions.values()
    }

    pub fn carts(&self) -> impl Iterator<Item = &DispenseCart> {
        self.carts.values()
    }

    pub fn payments(&self) -> impl Iterator<Item = &Payment> {
        self.payments.values()
    }

    pub fn lab_test_types(&self) -> impl Iterator<Item = &LabTestType> {
        self.lab_test_types.values()
    }

    pub fn medicines(&self) -> impl Iterator<Item = &Medicine> {
        self.medicines.values()
    }

    pub fn staff(&self) -> impl Iterator<Item = &StaffMember> {
        self.staff.values()
    }

    pub fn is_active_staff_with_role(&self, id: StaffId, role: Role) -> bool {
        self.staff
            .get(&id)
            .is_some_and(|member| member.is_active_with_role(role))
    }

    pub fn lab_requests_for_visit(&self, visit_id: VisitId) -> impl Iterator<Item = &LabTestRequest> {
        self.lab_requests
            .values()
            .filter(move |lab| lab.visit_id() == Some(visit_id))
    }

    /// The visit's live prescription (a cancelled one no longer counts).
    pub fn prescription_for_visit(&self, visit_id: VisitId) -> Option<&Prescription> {
        self.prescriptions.values().find(|p| {
            p.visit_id() == Some(visit_id) && p.status() != PrescriptionStatus::Cancelled
        })
    }

    pub fn payments_for_lab_request(&self, id: LabRequestId) -> impl Iterator<Item = &Payment> {
        self.payments.values().filter(move |p| {
            p.payment_type() == PaymentType::LabTest && p.links().lab_request_id == Some(id)
        })
    }

    pub fn payments_for_prescription(&self, id: PrescriptionId) -> impl Iterator<Item = &Payment> {
        self.payments.values().filter(move |p| {
            p.payment_type() == PaymentType::Medicine && p.links().prescription_id == Some(id)
        })
    }

    pub fn has_completed_registration(&self, patient_id: PatientId) -> bool {
        self.payments.values().any(|p| {
            p.patient_id() == Some(patient_id)
                && p.payment_type() == PaymentType::Registration
                && p.status() == PaymentStatus::Completed
        })
    }

    pub fn active_carts_for(
        &self,
        pharmacist: StaffId,
        prescription_id: PrescriptionId,
    ) -> Vec<&DispenseCart> {
        self.carts
            .values()
            .filter(|c| c.is_active() && c.belongs_to(pharmacist, prescription_id))
            .collect()
    }

    pub fn active_carts_for_prescription(
        &self,
        prescription_id: PrescriptionId,
    ) -> impl Iterator<Item = &DispenseCart> {
        self.carts
            .values()
            .filter(move |c| c.is_active() && c.prescription_id() == Some(prescription_id))
    }

    pub fn is_issued(&self, reference: &BusinessRef) -> bool {
        self.issued_refs.contains(reference)
    }
}

/// One atomic operation against a snapshot of the clinic state.
#[derive(Debug)]
pub struct UnitOfWork {
    state: ClinicState,
    journal: Vec<JournalEntry>,
    outbox: Vec<Notification>,
}

impl UnitOfWork {
    fn begin(state: ClinicState) -> Self {
        Self {
            state,
            journal: Vec::new(),
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> &ClinicState {
        &self.state
    }

    /// Fetch a copy of a record, failing with `NotFound`.
    pub fn load<R: StoredRecord>(&self, id: &R::Id) -> Result<R, DomainError> {
        R::table(&self.state)
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("{} {}", R::LABEL, R::stream_id(id))))
    }

    /// Run a command against a record (a blank one when it does not exist yet) and
    /// stage the resulting events in the journal.
    pub fn execute<R>(&mut self, id: R::Id, command: &R::Command) -> Result<Vec<R::Event>, WorkflowError>
    where
        R: StoredRecord,
        R::Event: Event + Serialize,
    {
        let mut record = R::table(&self.state)
            .get(&id)
            .cloned()
            .unwrap_or_else(|| R::blank(id.clone()));
        let before = record.version();

        let events = clinicflow_events::execute(&mut record, command)?;

        let stream_id = R::stream_id(&id);
        for (offset, event) in events.iter().enumerate() {
            self.journal.push(JournalEntry::from_typed(
                R::AGGREGATE_TYPE,
                stream_id,
                before + offset as u64 + 1,
                event,
            )?);
        }
        R::table_mut(&mut self.state).insert(id, record);

        Ok(events)
    }

    /// Draw a business reference no record in the store has used before.
    pub fn issue_ref(&mut self, kind: ReferenceKind, at: DateTime<Utc>) -> Result<BusinessRef, StoreError> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let candidate = BusinessRef::generate(kind, at);
            if self.state.issued_refs.insert(candidate.clone()) {
                return Ok(candidate);
            }
        }
        Err(StoreError::ReferenceSpaceExhausted(kind.prefix()))
    }

    /// Register a reference drawn outside the store (e.g. imported records).
    pub fn claim_ref(&mut self, reference: BusinessRef) -> Result<(), DomainError> {
        if !self.state.issued_refs.insert(reference.clone()) {
            return Err(DomainError::conflict(format!("reference {reference} already issued")));
        }
        Ok(())
    }

    /// Monotonic counter used to order dispense carts by creation.
    pub fn next_cart_sequence(&mut self) -> u64 {
        self.state.cart_sequence += 1;
        self.state.cart_sequence
    }

    /// Queue a notification for delivery after commit.
    pub fn notify(&mut self, notification: Notification) {
        self.outbox.push(notification);
    }

    /// Remove a payment record. Completed and refunded payments are refused.
    pub fn delete_payment(
        &mut self,
        payment_id: PaymentId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Payment, WorkflowError> {
        let payment: Payment = self.load(&payment_id)?;
        if !payment.is_deletable() {
            return Err(DomainError::invalid_transition("payment", payment.status(), "delete").into());
        }

        let payload = serde_json::json!({
            "payment_id": payment_id,
            "payment_ref": payment.payment_ref(),
            "status": payment.status(),
            "amount": payment.amount(),
        });
        self.journal.push(JournalEntry {
            event_id: uuid::Uuid::now_v7(),
            aggregate_type: <Payment as StoredRecord>::AGGREGATE_TYPE.to_string(),
            aggregate_id: payment_id.aggregate_id(),
            sequence_number: payment.version() + 1,
            event_type: "billing.payment.deleted".to_string(),
            event_version: 1,
            occurred_at,
            payload,
        });
        self.state.payments.remove(&payment_id);

        Ok(payment)
    }
}

/// Result of a committed unit of work.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    /// Outbox, already fanned out to individual staff members.
    pub notifications: Vec<Notification>,
    pub journal_entries: usize,
}

#[derive(Debug, Default)]
struct StoreInner {
    state: ClinicState,
    journal: Vec<JournalEntry>,
}

/// The clinic's single source of truth.
#[derive(Debug, Default)]
pub struct InMemoryClinicStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryClinicStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` as one unit of work. Nothing it did is visible unless it returns `Ok`.
    pub fn transaction<T, F>(&self, work: F) -> Result<Committed<T>, WorkflowError>
    where
        F: FnOnce(&mut UnitOfWork) -> Result<T, WorkflowError>,
    {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let mut uow = UnitOfWork::begin(inner.state.clone());
        let value = work(&mut uow)?;

        let UnitOfWork {
            state,
            journal,
            outbox,
        } = uow;
        let notifications = outbox
            .into_iter()
            .flat_map(|n| n.fan_out(state.staff.values()))
            .collect();
        let journal_entries = journal.len();

        inner.state = state;
        inner.journal.extend(journal);

        Ok(Committed {
            value,
            notifications,
            journal_entries,
        })
    }

    /// Read-only access to the committed state. `None` if the store is poisoned.
    pub fn read<T, F>(&self, query: F) -> Option<T>
    where
        F: FnOnce(&ClinicState) -> T,
    {
        let inner = self.inner.read().ok()?;
        Some(query(&inner.state))
    }

    pub fn register_staff(&self, member: StaffMember) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        inner.state.staff.insert(member.id, member);
        Ok(())
    }

    /// Every committed journal entry, in commit order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner
            .read()
            .map(|inner| inner.journal.clone())
            .unwrap_or_default()
    }

    pub fn journal_for(&self, aggregate_id: AggregateId) -> Vec<JournalEntry> {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .journal
                    .iter()
                    .filter(|e| e.aggregate_id == aggregate_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicflow_billing::{CreatePayment, PaymentCommand, PaymentLinks, PaymentMethod};
    use clinicflow_catalog::{
        DispenseStock, MedicineCategory, MedicineCommand, RegisterMedicine,
    };

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn register_medicine(store: &InMemoryClinicStore, stock: i64) -> MedicineId {
        let medicine_id = MedicineId::generate();
        store
            .transaction(|uow| {
                let reference = uow.issue_ref(ReferenceKind::Medicine, test_time())?;
                uow.execute::<Medicine>(
                    medicine_id,
                    &MedicineCommand::Register(RegisterMedicine {
                        medicine_id,
                        reference,
                        name: "Amoxil".to_string(),
                        generic_name: Some("Amoxicillin".to_string()),
                        category: MedicineCategory::Capsule,
                        strength: "500mg".to_string(),
                        unit_price: 2_000,
                        initial_stock: stock,
                        reorder_level: 5,
                        occurred_at: test_time(),
                    }),
                )?;
                Ok(())
            })
            .unwrap();
        medicine_id
    }

    fn create_payment(uow: &mut UnitOfWork, collected: bool) -> Result<PaymentId, WorkflowError> {
        let payment_id = PaymentId::generate();
        let payment_ref = uow.issue_ref(ReferenceKind::Payment, test_time())?;
        let collect_now = if collected {
            Some(uow.issue_ref(ReferenceKind::Receipt, test_time())?)
        } else {
            None
        };
        uow.execute::<Payment>(
            payment_id,
            &PaymentCommand::Create(CreatePayment {
                payment_id,
                payment_ref,
                patient_id: PatientId::generate(),
                links: PaymentLinks::default(),
                payment_type: clinicflow_billing::PaymentType::Other,
                method: PaymentMethod::Cash,
                amount: 1_000,
                processed_by: StaffId::new(),
                notes: String::new(),
                collect_now,
                occurred_at: test_time(),
            }),
        )?;
        Ok(payment_id)
    }

    #[test]
    fn failed_unit_of_work_leaves_no_trace() {
        let store = InMemoryClinicStore::new();
        let medicine_id = register_medicine(&store, 10);
        let journal_before = store.journal().len();

        let result: Result<Committed<()>, WorkflowError> = store.transaction(|uow| {
            uow.execute::<Medicine>(
                medicine_id,
                &MedicineCommand::Dispense(DispenseStock {
                    medicine_id,
                    quantity: 4,
                    prescription: BusinessRef::generate(ReferenceKind::Prescription, test_time()),
                    occurred_at: test_time(),
                }),
            )?;
            Err(DomainError::validation("later step failed").into())
        });

        assert!(result.is_err());
        let stock = store.read(|s| s.medicine(medicine_id).map(|m| m.stock())).flatten();
        assert_eq!(stock, Some(10));
        assert_eq!(store.journal().len(), journal_before);
    }

    #[test]
    fn journal_numbers_events_per_aggregate() {
        let store = InMemoryClinicStore::new();
        let medicine_id = register_medicine(&store, 10);

        store
            .transaction(|uow| {
                for _ in 0..2 {
                    uow.execute::<Medicine>(
                        medicine_id,
                        &MedicineCommand::Dispense(DispenseStock {
                            medicine_id,
                            quantity: 1,
                            prescription: BusinessRef::generate(
                                ReferenceKind::Prescription,
                                test_time(),
                            ),
                            occurred_at: test_time(),
                        }),
                    )?;
                }
                Ok(())
            })
            .unwrap();

        let entries = store.journal_for(medicine_id.aggregate_id());
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(entries[0].event_type, "catalog.medicine.registered");
        assert!(entries.iter().all(|e| e.aggregate_type == "catalog.medicine"));
    }

    #[test]
    fn rejected_command_on_missing_record_reports_not_found() {
        let store = InMemoryClinicStore::new();
        let missing = MedicineId::generate();

        let err = store
            .transaction(|uow| {
                uow.execute::<Medicine>(
                    missing,
                    &MedicineCommand::Dispense(DispenseStock {
                        medicine_id: missing,
                        quantity: 1,
                        prescription: BusinessRef::generate(ReferenceKind::Prescription, test_time()),
                        occurred_at: test_time(),
                    }),
                )
            })
            .unwrap_err();

        assert_eq!(err.code(), "not_found");
        assert!(store.read(|s| s.medicine(missing).is_none()).unwrap_or(false));
    }

    #[test]
    fn issued_references_are_unique_and_claims_conflict() {
        let store = InMemoryClinicStore::new();
        store
            .transaction(|uow| {
                let a = uow.issue_ref(ReferenceKind::Receipt, test_time())?;
                let b = uow.issue_ref(ReferenceKind::Receipt, test_time())?;
                assert_ne!(a, b);
                assert!(uow.state().is_issued(&a));
                match uow.claim_ref(a.clone()) {
                    Err(DomainError::Conflict(_)) => {}
                    other => panic!("expected Conflict, got {other:?}"),
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn store_refuses_to_delete_completed_payments() {
        let store = InMemoryClinicStore::new();
        let committed = store
            .transaction(|uow| {
                let completed = create_payment(uow, true)?;
                let pending = create_payment(uow, false)?;
                Ok((completed, pending))
            })
            .unwrap();
        let (completed, pending) = committed.value;

        let err = store
            .transaction(|uow| uow.delete_payment(completed, test_time()))
            .unwrap_err();
        match err {
            WorkflowError::Domain(DomainError::InvalidStateTransition { state, .. }) => {
                assert_eq!(state, "Completed")
            }
            other => panic!("expected InvalidStateTransition, got {other:?}"),
        }
        assert!(store.read(|s| s.payment(completed).is_some()).unwrap_or(false));

        store
            .transaction(|uow| uow.delete_payment(pending, test_time()))
            .unwrap();
        assert!(store.read(|s| s.payment(pending).is_none()).unwrap_or(false));
        assert!(store
            .journal()
            .iter()
            .any(|e| e.event_type == "billing.payment.deleted"));
    }

    #[test]
    fn role_notifications_fan_out_at_commit() {
        use clinicflow_events::{NotificationType, Recipient};

        let store = InMemoryClinicStore::new();
        let tech_a = StaffMember::new("Tech A", Role::LabTech);
        let tech_b = StaffMember::new("Tech B", Role::LabTech);
        let mut retired = StaffMember::new("Tech C", Role::LabTech);
        retired.active = false;
        for member in [tech_a.clone(), tech_b.clone(), retired] {
            store.register_staff(member).unwrap();
        }

        let committed = store
            .transaction(|uow| {
                uow.notify(Notification::new(
                    Recipient::Role(Role::LabTech),
                    NotificationType::LabRequest,
                    "New Lab Test Request",
                    "CBC requested",
                    None,
                    test_time(),
                ));
                Ok(())
            })
            .unwrap();

        let mut recipients: Vec<Recipient> =
            committed.notifications.iter().map(|n| n.recipient).collect();
        recipients.sort_by_key(|r| match r {
            Recipient::Staff(id) => Some(*id),
            Recipient::Role(_) => None,
        });
        let mut expected = vec![Recipient::Staff(tech_a.id), Recipient::Staff(tech_b.id)];
        expected.sort_by_key(|r| match r {
            Recipient::Staff(id) => Some(*id),
            Recipient::Role(_) => None,
        });
        assert_eq!(recipients, expected);
    }
}
