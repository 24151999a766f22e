//! Clinic workflow service: the entry points staff call to move a visit along.
//!
//! ## Operation pipeline
//!
//! ```text
//! Principal + request
//!   ↓
//! 1. Authorize against the capability table (once per entry point)
//!   ↓
//! 2. Open a unit of work on a snapshot of the store
//!   ↓
//! 3. Execute aggregate commands (visit, lab request, prescription, payment, stock…)
//!    and queue notifications in the outbox
//!   ↓
//! 4. Commit: snapshot swapped in, events journaled, role notifications fanned out
//!   ↓
//! 5. Deliver notifications to the sink (failures logged, never rolled back)
//! ```
//!
//! Any error in step 3 discards the snapshot, so a rejected operation has no partial
//! side effects.

mod catalog;
mod front_desk;
mod lab;
mod ledger;
mod pharmacy;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicflow_auth::{
    Action, CapabilityTable, Principal, StaffMember, authorize, explain_authorization,
};
use clinicflow_billing::{Payment, PaymentId, PaymentLinks, PaymentMethod, PaymentType};
use clinicflow_catalog::{LabTestType, LabTestTypeId, Medicine, MedicineCategory, MedicineId};
use clinicflow_clinical::{
    AdvanceVisit, DispenseCart, LabRequestId, LabTestRequest, Patient, PatientId, Prescription,
    PrescriptionId, Visit, VisitCommand, VisitId, VisitStatus,
};
use clinicflow_core::{BusinessRef, DomainError, StaffId};
use clinicflow_events::{InMemoryNotificationSink, Notification, NotificationSink};

use crate::config::ClinicConfig;
use crate::error::WorkflowError;
use crate::reporting::Reporting;
use crate::store::{InMemoryClinicStore, UnitOfWork};

/// Patient record plus the registration fee collected with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRegistration {
    pub patient: Patient,
    pub registration_payment: Payment,
}

/// A lab test order and the pending payment that gates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabOrder {
    pub request: LabTestRequest,
    pub payment: Payment,
}

/// A prepared prescription and the medicine payment raised for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispensation {
    pub prescription: Prescription,
    pub payment: Payment,
}

/// One medicine line as a doctor (or pharmacist) writes it. Name and price come
/// from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescribedMedicine {
    pub medicine_id: MedicineId,
    pub quantity: i64,
    pub dosage: String,
    pub duration: String,
    pub instructions: String,
}

/// Manual ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayment {
    pub patient_id: PatientId,
    pub payment_type: PaymentType,
    pub method: PaymentMethod,
    pub amount: u64,
    pub links: PaymentLinks,
    pub notes: String,
    /// Money taken at the counter: the payment is completed immediately.
    pub collect_now: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMedicine {
    pub name: String,
    pub generic_name: Option<String>,
    pub category: MedicineCategory,
    pub strength: String,
    pub unit_price: u64,
    pub initial_stock: i64,
    /// Falls back to the configured default.
    pub reorder_level: Option<i64>,
}

/// The clinic's workflow service.
///
/// Generic over the notification sink so deployments can deliver to a bus, while
/// tests inspect an [`InMemoryNotificationSink`].
#[derive(Debug)]
pub struct ClinicWorkflow<N = InMemoryNotificationSink> {
    store: InMemoryClinicStore,
    sink: N,
    capabilities: CapabilityTable,
    config: ClinicConfig,
}

impl<N> ClinicWorkflow<N>
where
    N: NotificationSink,
{
    pub fn new(config: ClinicConfig, sink: N) -> Self {
        Self {
            store: InMemoryClinicStore::new(),
            sink,
            capabilities: CapabilityTable::standard(),
            config,
        }
    }

    /// Replace the standard role matrix.
    pub fn with_capabilities(mut self, capabilities: CapabilityTable) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn store(&self) -> &InMemoryClinicStore {
        &self.store
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    pub fn config(&self) -> &ClinicConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Add or update a staff directory record.
    pub fn enroll_staff(&self, member: StaffMember) -> Result<(), WorkflowError> {
        tracing::info!(staff_id = %member.id, role = %member.role, "staff member enrolled");
        self.store.register_staff(member)?;
        Ok(())
    }

    /// Read-only reports. Requires the reporting capability.
    pub fn reporting(&self, actor: &Principal) -> Result<Reporting<'_>, WorkflowError> {
        self.authorize(actor, Action::ViewReports)?;
        Ok(Reporting::new(&self.store))
    }

    pub fn patient(&self, id: PatientId) -> Option<Patient> {
        self.store.read(|s| s.patient(id).cloned()).flatten()
    }

    pub fn visit(&self, id: VisitId) -> Option<Visit> {
        self.store.read(|s| s.visit(id).cloned()).flatten()
    }

    pub fn lab_request(&self, id: LabRequestId) -> Option<LabTestRequest> {
        self.store.read(|s| s.lab_request(id).cloned()).flatten()
    }

    pub fn prescription(&self, id: PrescriptionId) -> Option<Prescription> {
        self.store.read(|s| s.prescription(id).cloned()).flatten()
    }

    pub fn payment(&self, id: PaymentId) -> Option<Payment> {
        self.store.read(|s| s.payment(id).cloned()).flatten()
    }

    pub fn medicine(&self, id: MedicineId) -> Option<Medicine> {
        self.store.read(|s| s.medicine(id).cloned()).flatten()
    }

    pub fn lab_test_type(&self, id: LabTestTypeId) -> Option<LabTestType> {
        self.store.read(|s| s.lab_test_type(id).cloned()).flatten()
    }

    /// The pharmacist's active cart for a prescription, if one is open.
    pub fn active_cart(&self, pharmacist: StaffId, prescription_id: PrescriptionId) -> Option<DispenseCart> {
        self.store
            .read(|s| {
                s.active_carts_for(pharmacist, prescription_id)
                    .into_iter()
                    .max_by_key(|c| c.sequence())
                    .cloned()
            })
            .flatten()
    }

    pub fn lab_requests_for_visit(&self, visit_id: VisitId) -> Vec<LabTestRequest> {
        self.store
            .read(|s| s.lab_requests_for_visit(visit_id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn payments_for_patient(&self, patient_id: PatientId) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .store
            .read(|s| {
                s.payments()
                    .filter(|p| p.patient_id() == Some(patient_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        payments.sort_by_key(|p| p.created_at());
        payments
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn authorize(&self, actor: &Principal, action: Action) -> Result<(), WorkflowError> {
        authorize(actor, action, &self.capabilities).map_err(|err| {
            let explanation = explain_authorization(actor, action, &self.capabilities);
            tracing::warn!(
                staff_id = %actor.staff_id,
                role = %explanation.role,
                action = %explanation.action,
                reason = %explanation.reason,
                granting_roles = ?explanation.granting_roles,
                "authorization denied"
            );
            WorkflowError::from(err)
        })
    }

    /// Run one unit of work, then deliver its notifications.
    fn run<T, F>(&self, operation: &'static str, actor: &Principal, work: F) -> Result<T, WorkflowError>
    where
        F: FnOnce(&mut UnitOfWork) -> Result<T, WorkflowError>,
    {
        match self.store.transaction(work) {
            Ok(committed) => {
                tracing::info!(
                    operation,
                    staff_id = %actor.staff_id,
                    role = %actor.role,
                    events = committed.journal_entries,
                    notifications = committed.notifications.len(),
                    "operation committed"
                );
                self.deliver(operation, committed.notifications);
                Ok(committed.value)
            }
            Err(err) => {
                tracing::warn!(
                    operation,
                    staff_id = %actor.staff_id,
                    role = %actor.role,
                    code = err.code(),
                    error = %err,
                    "operation rejected"
                );
                Err(err)
            }
        }
    }

    fn deliver(&self, operation: &'static str, notifications: Vec<Notification>) {
        for notification in notifications {
            let notification_id = notification.id;
            if let Err(err) = self.sink.notify(notification) {
                tracing::warn!(
                    operation,
                    %notification_id,
                    error = %err,
                    "notification delivery failed"
                );
            }
        }
    }
}

fn advance_visit(
    uow: &mut UnitOfWork,
    visit_id: VisitId,
    target: VisitStatus,
    at: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    uow.execute::<Visit>(
        visit_id,
        &VisitCommand::Advance(AdvanceVisit {
            visit_id,
            target,
            occurred_at: at,
        }),
    )?;
    Ok(())
}

/// Only the visit's assigned doctor may order, review or prescribe for it.
fn ensure_attending(visit: &Visit, actor: &Principal) -> Result<(), DomainError> {
    if visit.assigned_doctor() != Some(actor.staff_id) {
        return Err(DomainError::permission_denied(format!(
            "visit {} is not assigned to this doctor",
            display_ref(visit.reference())
        )));
    }
    Ok(())
}

fn visit_patient(visit: &Visit) -> Result<PatientId, DomainError> {
    visit
        .patient_id()
        .ok_or_else(|| DomainError::invariant("visit has no patient"))
}

fn required_ref(reference: Option<&BusinessRef>, what: &str) -> Result<BusinessRef, DomainError> {
    reference
        .cloned()
        .ok_or_else(|| DomainError::invariant(format!("{what} has no reference")))
}

fn display_ref(reference: Option<&BusinessRef>) -> String {
    reference.map(|r| r.to_string()).unwrap_or_default()
}

fn patient_name(uow: &UnitOfWork, patient_id: PatientId) -> String {
    uow.state()
        .patient(patient_id)
        .map(|p| p.full_name())
        .unwrap_or_default()
}
