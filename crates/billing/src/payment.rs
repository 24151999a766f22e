use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicflow_clinical::{LabRequestId, PatientId, PrescriptionId, VisitId};
use clinicflow_core::{Aggregate, AggregateRoot, BusinessRef, DomainError, StaffId};
use clinicflow_events::Event;

clinicflow_core::aggregate_id!(PaymentId, "Payment identifier.");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Registration,
    LabTest,
    Medicine,
    Consultation,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Mobile,
    Insurance,
    /// Not collected yet.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// What a payment is for, beyond the patient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLinks {
    pub visit_id: Option<VisitId>,
    pub lab_request_id: Option<LabRequestId>,
    pub prescription_id: Option<PrescriptionId>,
}

/// Aggregate root: Payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    id: PaymentId,
    payment_ref: Option<BusinessRef>,
    patient_id: Option<PatientId>,
    links: PaymentLinks,
    payment_type: PaymentType,
    method: PaymentMethod,
    /// Smallest currency unit.
    amount: u64,
    status: PaymentStatus,
    processed_by: Option<StaffId>,
    notes: String,
    receipt_number: Option<BusinessRef>,
    failure_reason: Option<String>,
    refund_reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Payment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PaymentId) -> Self {
        Self {
            id,
            payment_ref: None,
            patient_id: None,
            links: PaymentLinks::default(),
            payment_type: PaymentType::Other,
            method: PaymentMethod::Pending,
            amount: 0,
            status: PaymentStatus::Pending,
            processed_by: None,
            notes: String::new(),
            receipt_number: None,
            failure_reason: None,
            refund_reason: None,
            created_at: None,
            completed_at: None,
            refunded_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PaymentId {
        self.id
    }

    pub fn payment_ref(&self) -> Option<&BusinessRef> {
        self.payment_ref.as_ref()
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn links(&self) -> &PaymentLinks {
        &self.links
    }

    pub fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn processed_by(&self) -> Option<StaffId> {
        self.processed_by
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn receipt_number(&self) -> Option<&BusinessRef> {
        self.receipt_number.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn refund_reason(&self) -> Option<&str> {
        self.refund_reason.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn refunded_at(&self) -> Option<DateTime<Utc>> {
        self.refunded_at
    }

    /// Completed and refunded payments are part of the permanent record.
    pub fn is_deletable(&self) -> bool {
        matches!(self.status, PaymentStatus::Pending | PaymentStatus::Failed)
    }

    fn display_ref(&self) -> String {
        self.payment_ref
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| self.id.to_string())
    }
}

impl AggregateRoot for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePayment.
///
/// With `collect_now` set the payment is completed in the same step (money taken at
/// the counter) and stamped with that receipt number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayment {
    pub payment_id: PaymentId,
    pub payment_ref: BusinessRef,
    pub patient_id: PatientId,
    pub links: PaymentLinks,
    pub payment_type: PaymentType,
    pub method: PaymentMethod,
    pub amount: u64,
    pub processed_by: StaffId,
    pub notes: String,
    pub collect_now: Option<BusinessRef>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletePayment {
    pub payment_id: PaymentId,
    pub method: PaymentMethod,
    pub receipt_number: BusinessRef,
    pub processed_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailPayment {
    pub payment_id: PaymentId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPayment {
    pub payment_id: PaymentId,
    pub reason: String,
    pub processed_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentCommand {
    Create(CreatePayment),
    Complete(CompletePayment),
    Fail(FailPayment),
    Refund(RefundPayment),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCreated {
    pub payment_id: PaymentId,
    pub payment_ref: BusinessRef,
    pub patient_id: PatientId,
    pub links: PaymentLinks,
    pub payment_type: PaymentType,
    pub method: PaymentMethod,
    pub amount: u64,
    pub processed_by: StaffId,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub payment_id: PaymentId,
    pub method: PaymentMethod,
    pub receipt_number: BusinessRef,
    pub processed_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub payment_id: PaymentId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    pub payment_id: PaymentId,
    pub amount: u64,
    pub reason: String,
    pub processed_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEvent {
    Created(PaymentCreated),
    Completed(PaymentCompleted),
    Failed(PaymentFailed),
    Refunded(PaymentRefunded),
}

impl Event for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::Created(_) => "billing.payment.created",
            PaymentEvent::Completed(_) => "billing.payment.completed",
            PaymentEvent::Failed(_) => "billing.payment.failed",
            PaymentEvent::Refunded(_) => "billing.payment.refunded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::Created(e) => e.occurred_at,
            PaymentEvent::Completed(e) => e.occurred_at,
            PaymentEvent::Failed(e) => e.occurred_at,
            PaymentEvent::Refunded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Payment {
    type Command = PaymentCommand;
    type Event = PaymentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PaymentEvent::Created(e) => {
                self.id = e.payment_id;
                self.payment_ref = Some(e.payment_ref.clone());
                self.patient_id = Some(e.patient_id);
                self.links = e.links;
                self.payment_type = e.payment_type;
                self.method = e.method;
                self.amount = e.amount;
                self.processed_by = Some(e.processed_by);
                self.notes = e.notes.clone();
                self.status = PaymentStatus::Pending;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            PaymentEvent::Completed(e) => {
                self.status = PaymentStatus::Completed;
                self.method = e.method;
                self.receipt_number = Some(e.receipt_number.clone());
                self.processed_by = Some(e.processed_by);
                self.completed_at = Some(e.occurred_at);
            }
            PaymentEvent::Failed(e) => {
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(e.reason.clone());
            }
            PaymentEvent::Refunded(e) => {
                self.status = PaymentStatus::Refunded;
                self.refund_reason = Some(e.reason.clone());
                self.refunded_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PaymentCommand::Create(cmd) => self.handle_create(cmd),
            PaymentCommand::Complete(cmd) => self.handle_complete(cmd),
            PaymentCommand::Fail(cmd) => self.handle_fail(cmd),
            PaymentCommand::Refund(cmd) => self.handle_refund(cmd),
        }
    }
}

impl Payment {
    fn ensure_exists(&self, payment_id: PaymentId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("payment {payment_id}")));
        }
        if self.id != payment_id {
            return Err(DomainError::invariant("payment_id mismatch"));
        }
        Ok(())
    }

    fn ensure_pending(&self, attempted: &str) -> Result<(), DomainError> {
        match self.status {
            PaymentStatus::Pending => Ok(()),
            PaymentStatus::Completed => Err(DomainError::duplicate_payment(format!(
                "payment {}",
                self.display_ref()
            ))),
            other => Err(DomainError::invalid_transition("payment", other, attempted)),
        }
    }

    fn handle_create(&self, cmd: &CreatePayment) -> Result<Vec<PaymentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("payment already exists"));
        }
        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        match cmd.payment_type {
            PaymentType::LabTest if cmd.links.lab_request_id.is_none() => {
                return Err(DomainError::validation("lab test payment must reference a lab request"));
            }
            PaymentType::Medicine if cmd.links.prescription_id.is_none() => {
                return Err(DomainError::validation(
                    "medicine payment must reference a prescription",
                ));
            }
            _ => {}
        }
        if cmd.collect_now.is_some() && cmd.method == PaymentMethod::Pending {
            return Err(DomainError::validation("a collected payment needs a payment method"));
        }

        let mut events = vec![PaymentEvent::Created(PaymentCreated {
            payment_id: cmd.payment_id,
            payment_ref: cmd.payment_ref.clone(),
            patient_id: cmd.patient_id,
            links: cmd.links,
            payment_type: cmd.payment_type,
            method: cmd.method,
            amount: cmd.amount,
            processed_by: cmd.processed_by,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })];

        if let Some(receipt_number) = &cmd.collect_now {
            events.push(PaymentEvent::Completed(PaymentCompleted {
                payment_id: cmd.payment_id,
                method: cmd.method,
                receipt_number: receipt_number.clone(),
                processed_by: cmd.processed_by,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_complete(&self, cmd: &CompletePayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_exists(cmd.payment_id)?;
        self.ensure_pending("complete")?;
        if cmd.method == PaymentMethod::Pending {
            return Err(DomainError::validation("a collected payment needs a payment method"));
        }

        Ok(vec![PaymentEvent::Completed(PaymentCompleted {
            payment_id: cmd.payment_id,
            method: cmd.method,
            receipt_number: cmd.receipt_number.clone(),
            processed_by: cmd.processed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_fail(&self, cmd: &FailPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_exists(cmd.payment_id)?;
        self.ensure_pending("fail")?;

        Ok(vec![PaymentEvent::Failed(PaymentFailed {
            payment_id: cmd.payment_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &RefundPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_exists(cmd.payment_id)?;
        if self.status != PaymentStatus::Completed {
            return Err(DomainError::invalid_transition("payment", self.status, "refund"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("refund reason is required"));
        }

        Ok(vec![PaymentEvent::Refunded(PaymentRefunded {
            payment_id: cmd.payment_id,
            amount: self.amount,
            reason: cmd.reason.clone(),
            processed_by: cmd.processed_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
