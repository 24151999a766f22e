//! Lab test requests: ordered by a doctor, paid for at the cashier, run by a
//! technician, reviewed by the doctor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicflow_catalog::LabTestTypeId;
use clinicflow_core::{Aggregate, AggregateRoot, BusinessRef, DomainError, StaffId};
use clinicflow_events::Event;

use crate::visit::VisitId;

clinicflow_core::aggregate_id!(LabRequestId, "Lab test request identifier.");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabRequestStatus {
    Requested,
    PaymentPending,
    PaymentCompleted,
    InProgress,
    Completed,
    Cancelled,
}

impl LabRequestStatus {
    /// Still counts towards the visit's outstanding lab work.
    pub fn is_open(self) -> bool {
        !matches!(self, LabRequestStatus::Completed | LabRequestStatus::Cancelled)
    }
}

/// Findings recorded by the technician.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResultDetails {
    pub result_data: String,
    pub findings: String,
    pub interpretation: String,
    pub result_value: String,
    pub normal_range: String,
    pub unit: String,
    pub is_abnormal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub details: TestResultDetails,
    pub performed_by: StaffId,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate root: LabTestRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabTestRequest {
    id: LabRequestId,
    reference: Option<BusinessRef>,
    visit_id: Option<VisitId>,
    test_type_id: Option<LabTestTypeId>,
    test_name: String,
    /// Price captured from the catalog when ordered.
    price: u64,
    requested_by: Option<StaffId>,
    assigned_to: Option<StaffId>,
    status: LabRequestStatus,
    doctor_notes: String,
    lab_notes: String,
    result: Option<TestResult>,
    cancel_reason: Option<String>,
    requested_at: Option<DateTime<Utc>>,
    payment_completed_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    doctor_reviewed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl LabTestRequest {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: LabRequestId) -> Self {
        Self {
            id,
            reference: None,
            visit_id: None,
            test_type_id: None,
            test_name: String::new(),
            price: 0,
            requested_by: None,
            assigned_to: None,
            status: LabRequestStatus::Requested,
            doctor_notes: String::new(),
            lab_notes: String::new(),
            result: None,
            cancel_reason: None,
            requested_at: None,
            payment_completed_at: None,
            started_at: None,
            completed_at: None,
            doctor_reviewed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LabRequestId {
        self.id
    }

    pub fn reference(&self) -> Option<&BusinessRef> {
        self.reference.as_ref()
    }

    pub fn visit_id(&self) -> Option<VisitId> {
        self.visit_id
    }

    pub fn test_type_id(&self) -> Option<LabTestTypeId> {
        self.test_type_id
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn price(&self) -> u64 {
        self.price
    }

    pub fn requested_by(&self) -> Option<StaffId> {
        self.requested_by
    }

    pub fn assigned_to(&self) -> Option<StaffId> {
        self.assigned_to
    }

    pub fn status(&self) -> LabRequestStatus {
        self.status
    }

    pub fn doctor_notes(&self) -> &str {
        &self.doctor_notes
    }

    pub fn lab_notes(&self) -> &str {
        &self.lab_notes
    }

    pub fn result(&self) -> Option<&TestResult> {
        self.result.as_ref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    pub fn payment_completed_at(&self) -> Option<DateTime<Utc>> {
        self.payment_completed_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn doctor_reviewed_at(&self) -> Option<DateTime<Utc>> {
        self.doctor_reviewed_at
    }
}

impl AggregateRoot for LabTestRequest {
    type Id = LabRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLabTest {
    pub lab_request_id: LabRequestId,
    pub reference: BusinessRef,
    pub visit_id: VisitId,
    pub test_type_id: LabTestTypeId,
    pub test_name: String,
    pub price: u64,
    pub requested_by: StaffId,
    pub doctor_notes: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AwaitPayment (a LAB_TEST payment was raised for the request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitPayment {
    pub lab_request_id: LabRequestId,
    pub payment: BusinessRef,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPayment (the LAB_TEST payment completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPayment {
    pub lab_request_id: LabRequestId,
    pub payment: BusinessRef,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignTechnician {
    pub lab_request_id: LabRequestId,
    pub technician: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub lab_request_id: LabRequestId,
    pub submitted_by: StaffId,
    pub details: TestResultDetails,
    pub lab_notes: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelLabRequest {
    pub lab_request_id: LabRequestId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReviewed {
    pub lab_request_id: LabRequestId,
    pub reviewed_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabRequestCommand {
    Request(RequestLabTest),
    AwaitPayment(AwaitPayment),
    ConfirmPayment(ConfirmPayment),
    AssignTechnician(AssignTechnician),
    SubmitResult(SubmitResult),
    Cancel(CancelLabRequest),
    MarkReviewed(MarkReviewed),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabTestRequested {
    pub lab_request_id: LabRequestId,
    pub reference: BusinessRef,
    pub visit_id: VisitId,
    pub test_type_id: LabTestTypeId,
    pub test_name: String,
    pub price: u64,
    pub requested_by: StaffId,
    pub doctor_notes: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAwaited {
    pub lab_request_id: LabRequestId,
    pub payment: BusinessRef,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub lab_request_id: LabRequestId,
    pub payment: BusinessRef,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicianAssigned {
    pub lab_request_id: LabRequestId,
    pub technician: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSubmitted {
    pub lab_request_id: LabRequestId,
    pub result: TestResult,
    pub lab_notes: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabRequestCancelled {
    pub lab_request_id: LabRequestId,
    pub previous_status: LabRequestStatus,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsReviewed {
    pub lab_request_id: LabRequestId,
    pub reviewed_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabRequestEvent {
    Requested(LabTestRequested),
    PaymentAwaited(PaymentAwaited),
    PaymentConfirmed(PaymentConfirmed),
    TechnicianAssigned(TechnicianAssigned),
    ResultSubmitted(ResultSubmitted),
    Cancelled(LabRequestCancelled),
    Reviewed(ResultsReviewed),
}

impl Event for LabRequestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LabRequestEvent::Requested(_) => "clinical.lab_request.requested",
            LabRequestEvent::PaymentAwaited(_) => "clinical.lab_request.payment_awaited",
            LabRequestEvent::PaymentConfirmed(_) => "clinical.lab_request.payment_confirmed",
            LabRequestEvent::TechnicianAssigned(_) => "clinical.lab_request.technician_assigned",
            LabRequestEvent::ResultSubmitted(_) => "clinical.lab_request.result_submitted",
            LabRequestEvent::Cancelled(_) => "clinical.lab_request.cancelled",
            LabRequestEvent::Reviewed(_) => "clinical.lab_request.reviewed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LabRequestEvent::Requested(e) => e.occurred_at,
            LabRequestEvent::PaymentAwaited(e) => e.occurred_at,
            LabRequestEvent::PaymentConfirmed(e) => e.occurred_at,
            LabRequestEvent::TechnicianAssigned(e) => e.occurred_at,
            LabRequestEvent::ResultSubmitted(e) => e.occurred_at,
            LabRequestEvent::Cancelled(e) => e.occurred_at,
            LabRequestEvent::Reviewed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for LabTestRequest {
    type Command = LabRequestCommand;
    type Event = LabRequestEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LabRequestEvent::Requested(e) => {
                self.id = e.lab_request_id;
                self.reference = Some(e.reference.clone());
                self.visit_id = Some(e.visit_id);
                self.test_type_id = Some(e.test_type_id);
                self.test_name = e.test_name.clone();
                self.price = e.price;
                self.requested_by = Some(e.requested_by);
                self.doctor_notes = e.doctor_notes.clone();
                self.status = LabRequestStatus::Requested;
                self.requested_at = Some(e.occurred_at);
                self.created = true;
            }
            LabRequestEvent::PaymentAwaited(_) => {
                self.status = LabRequestStatus::PaymentPending;
            }
            LabRequestEvent::PaymentConfirmed(e) => {
                self.status = LabRequestStatus::PaymentCompleted;
                self.payment_completed_at = Some(e.occurred_at);
            }
            LabRequestEvent::TechnicianAssigned(e) => {
                self.assigned_to = Some(e.technician);
                self.status = LabRequestStatus::InProgress;
                self.started_at = Some(e.occurred_at);
            }
            LabRequestEvent::ResultSubmitted(e) => {
                self.result = Some(e.result.clone());
                self.lab_notes = e.lab_notes.clone();
                self.status = LabRequestStatus::Completed;
                self.completed_at = Some(e.occurred_at);
            }
            LabRequestEvent::Cancelled(e) => {
                self.status = LabRequestStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
            }
            LabRequestEvent::Reviewed(e) => {
                self.doctor_reviewed_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LabRequestCommand::Request(cmd) => self.handle_request(cmd),
            LabRequestCommand::AwaitPayment(cmd) => {
                self.ensure_exists(cmd.lab_request_id)?;
                self.ensure_status(LabRequestStatus::Requested, "await payment for")?;
                Ok(vec![LabRequestEvent::PaymentAwaited(PaymentAwaited {
                    lab_request_id: cmd.lab_request_id,
                    payment: cmd.payment.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            LabRequestCommand::ConfirmPayment(cmd) => {
                self.ensure_exists(cmd.lab_request_id)?;
                self.ensure_status(LabRequestStatus::PaymentPending, "confirm payment for")?;
                Ok(vec![LabRequestEvent::PaymentConfirmed(PaymentConfirmed {
                    lab_request_id: cmd.lab_request_id,
                    payment: cmd.payment.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            LabRequestCommand::AssignTechnician(cmd) => {
                self.ensure_exists(cmd.lab_request_id)?;
                self.ensure_status(LabRequestStatus::PaymentCompleted, "assign technician to")?;
                Ok(vec![LabRequestEvent::TechnicianAssigned(TechnicianAssigned {
                    lab_request_id: cmd.lab_request_id,
                    technician: cmd.technician,
                    occurred_at: cmd.occurred_at,
                })])
            }
            LabRequestCommand::SubmitResult(cmd) => self.handle_submit(cmd),
            LabRequestCommand::Cancel(cmd) => self.handle_cancel(cmd),
            LabRequestCommand::MarkReviewed(cmd) => {
                self.ensure_exists(cmd.lab_request_id)?;
                self.ensure_status(LabRequestStatus::Completed, "review results of")?;
                if self.doctor_reviewed_at.is_some() {
                    return Err(DomainError::conflict("results already reviewed"));
                }
                Ok(vec![LabRequestEvent::Reviewed(ResultsReviewed {
                    lab_request_id: cmd.lab_request_id,
                    reviewed_by: cmd.reviewed_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl LabTestRequest {
    fn ensure_exists(&self, lab_request_id: LabRequestId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("lab request {lab_request_id}")));
        }
        if self.id != lab_request_id {
            return Err(DomainError::invariant("lab_request_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: LabRequestStatus, attempted: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invalid_transition("lab request", self.status, attempted));
        }
        Ok(())
    }

    fn handle_request(&self, cmd: &RequestLabTest) -> Result<Vec<LabRequestEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("lab request already exists"));
        }
        if cmd.price == 0 {
            return Err(DomainError::validation("lab test price must be positive"));
        }

        Ok(vec![LabRequestEvent::Requested(LabTestRequested {
            lab_request_id: cmd.lab_request_id,
            reference: cmd.reference.clone(),
            visit_id: cmd.visit_id,
            test_type_id: cmd.test_type_id,
            test_name: cmd.test_name.clone(),
            price: cmd.price,
            requested_by: cmd.requested_by,
            doctor_notes: cmd.doctor_notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitResult) -> Result<Vec<LabRequestEvent>, DomainError> {
        self.ensure_exists(cmd.lab_request_id)?;
        if self.result.is_some() {
            return Err(DomainError::conflict("result already submitted"));
        }
        self.ensure_status(LabRequestStatus::InProgress, "submit result for")?;
        if self.assigned_to != Some(cmd.submitted_by) {
            return Err(DomainError::permission_denied(
                "only the assigned technician may submit results",
            ));
        }

        Ok(vec![LabRequestEvent::ResultSubmitted(ResultSubmitted {
            lab_request_id: cmd.lab_request_id,
            result: TestResult {
                details: cmd.details.clone(),
                performed_by: cmd.submitted_by,
                recorded_at: cmd.occurred_at,
            },
            lab_notes: cmd.lab_notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelLabRequest) -> Result<Vec<LabRequestEvent>, DomainError> {
        self.ensure_exists(cmd.lab_request_id)?;
        if !self.status.is_open() {
            return Err(DomainError::invalid_transition("lab request", self.status, "cancel"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("cancellation reason is required"));
        }

        Ok(vec![LabRequestEvent::Cancelled(LabRequestCancelled {
            lab_request_id: cmd.lab_request_id,
            previous_status: self.status,
            reason: cmd.reason.clone(),
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

    fn payment_ref() -> BusinessRef {
        BusinessRef::generate(ReferenceKind::Payment, test_time())
    }

    fn execute(req: &mut LabTestRequest, cmd: LabRequestCommand) -> Result<(), DomainError> {
        for e in req.handle(&cmd)? {
            req.apply(&e);
        }
        Ok(())
    }

    fn requested() -> LabTestRequest {
        let id = LabRequestId::generate();
        let mut req = LabTestRequest::empty(id);
        execute(
            &mut req,
            LabRequestCommand::Request(RequestLabTest {
                lab_request_id: id,
                reference: BusinessRef::generate(ReferenceKind::LabRequest, test_time()),
                visit_id: VisitId::generate(),
                test_type_id: LabTestTypeId::generate(),
                test_name: "Complete Blood Count".to_string(),
                price: 100,
                requested_by: StaffId::new(),
                doctor_notes: "rule out anaemia".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        req
    }

    fn paid() -> LabTestRequest {
        let mut req = requested();
        let id = req.id_typed();
        let payment = payment_ref();
        execute(
            &mut req,
            LabRequestCommand::AwaitPayment(AwaitPayment {
                lab_request_id: id,
                payment: payment.clone(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut req,
            LabRequestCommand::ConfirmPayment(ConfirmPayment {
                lab_request_id: id,
                payment,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        req
    }

    #[test]
    fn cannot_start_before_payment() {
        let mut req = requested();
        let id = req.id_typed();
        execute(
            &mut req,
            LabRequestCommand::AwaitPayment(AwaitPayment {
                lab_request_id: id,
                payment: payment_ref(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let err = req
            .handle(&LabRequestCommand::AssignTechnician(AssignTechnician {
                lab_request_id: id,
                technician: StaffId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvalidStateTransition { state, .. } => assert_eq!(state, "PaymentPending"),
            other => panic!("Expected InvalidStateTransition, got {other:?}"),
        }
    }

    #[test]
    fn only_assigned_technician_submits() {
        let mut req = paid();
        let id = req.id_typed();
        let tech = StaffId::new();
        execute(
            &mut req,
            LabRequestCommand::AssignTechnician(AssignTechnician {
                lab_request_id: id,
                technician: tech,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(req.status(), LabRequestStatus::InProgress);

        let err = req
            .handle(&LabRequestCommand::SubmitResult(SubmitResult {
                lab_request_id: id,
                submitted_by: StaffId::new(),
                details: TestResultDetails::default(),
                lab_notes: String::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::PermissionDenied(_)));

        execute(
            &mut req,
            LabRequestCommand::SubmitResult(SubmitResult {
                lab_request_id: id,
                submitted_by: tech,
                details: TestResultDetails {
                    result_value: "13.5".to_string(),
                    normal_range: "12-16".to_string(),
                    unit: "g/dL".to_string(),
                    ..TestResultDetails::default()
                },
                lab_notes: String::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(req.status(), LabRequestStatus::Completed);
        assert_eq!(req.result().unwrap().performed_by, tech);
    }

    #[test]
    fn result_is_one_time() {
        let mut req = paid();
        let id = req.id_typed();
        let tech = StaffId::new();
        execute(
            &mut req,
            LabRequestCommand::AssignTechnician(AssignTechnician {
                lab_request_id: id,
                technician: tech,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        let submit = LabRequestCommand::SubmitResult(SubmitResult {
            lab_request_id: id,
            submitted_by: tech,
            details: TestResultDetails::default(),
            lab_notes: String::new(),
            occurred_at: test_time(),
        });
        execute(&mut req, submit.clone()).unwrap();

        let err = req.handle(&submit).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn cancel_before_completion_only() {
        let mut req = paid();
        let id = req.id_typed();
        execute(
            &mut req,
            LabRequestCommand::Cancel(CancelLabRequest {
                lab_request_id: id,
                reason: "patient declined".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(req.status(), LabRequestStatus::Cancelled);
        assert!(!req.status().is_open());

        let err = req
            .handle(&LabRequestCommand::Cancel(CancelLabRequest {
                lab_request_id: id,
                reason: "again".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }
}
