//! Payment ledger operations and the hand-offs a collected payment triggers.

use chrono::{DateTime, Utc};

use clinicflow_auth::{Action, Principal, Role};
use clinicflow_billing::{
    CompletePayment, CreatePayment, FailPayment, Payment, PaymentCommand, PaymentId,
    PaymentLinks, PaymentMethod, PaymentStatus, PaymentType, RefundPayment,
};
use clinicflow_clinical::{
    ConfirmPayment, HandOver, LabRequestCommand, LabRequestStatus, LabTestRequest, Patient,
    PatientId, Prescription, PrescriptionCommand, PrescriptionId, PrescriptionStatus, Visit, VisitId,
    VisitStatus,
};
use clinicflow_core::{BusinessRef, DomainError, ReferenceKind, StaffId};
use clinicflow_events::{Notification, NotificationSink, NotificationType, Recipient};

use super::{ClinicWorkflow, NewPayment, advance_visit, display_ref, required_ref};
use crate::error::WorkflowError;
use crate::store::UnitOfWork;

/// A payment about to be written to the ledger.
pub(super) struct PaymentDraft {
    pub patient_id: PatientId,
    pub links: PaymentLinks,
    pub payment_type: PaymentType,
    pub method: PaymentMethod,
    pub amount: u64,
    pub notes: String,
    pub collect: bool,
}

/// Create a payment. A collected draft is completed in the same step and its
/// downstream hand-off runs immediately.
pub(super) fn raise_payment(
    uow: &mut UnitOfWork,
    processed_by: StaffId,
    draft: PaymentDraft,
    at: DateTime<Utc>,
) -> Result<Payment, WorkflowError> {
    let payment_id = PaymentId::generate();
    let payment_ref = uow.issue_ref(ReferenceKind::Payment, at)?;
    let collect_now = if draft.collect {
        Some(uow.issue_ref(ReferenceKind::Receipt, at)?)
    } else {
        None
    };

    uow.execute::<Payment>(
        payment_id,
        &PaymentCommand::Create(CreatePayment {
            payment_id,
            payment_ref,
            patient_id: draft.patient_id,
            links: draft.links,
            payment_type: draft.payment_type,
            method: draft.method,
            amount: draft.amount,
            processed_by,
            notes: draft.notes,
            collect_now,
            occurred_at: at,
        }),
    )?;

    let payment: Payment = uow.load(&payment_id)?;
    if payment.status() == PaymentStatus::Completed {
        after_collection(uow, &payment, at)?;
    }
    Ok(payment)
}

/// Complete a pending payment with a fresh receipt number and run its hand-off.
pub(super) fn settle(
    uow: &mut UnitOfWork,
    processed_by: StaffId,
    payment_id: PaymentId,
    method: PaymentMethod,
    at: DateTime<Utc>,
) -> Result<Payment, WorkflowError> {
    let receipt_number = uow.issue_ref(ReferenceKind::Receipt, at)?;
    uow.execute::<Payment>(
        payment_id,
        &PaymentCommand::Complete(CompletePayment {
            payment_id,
            method,
            receipt_number,
            processed_by,
            occurred_at: at,
        }),
    )?;

    let payment: Payment = uow.load(&payment_id)?;
    after_collection(uow, &payment, at)?;
    Ok(payment)
}

/// Next workflow stage unlocked by a collected payment.
fn after_collection(uow: &mut UnitOfWork, payment: &Payment, at: DateTime<Utc>) -> Result<(), WorkflowError> {
    let payment_ref = required_ref(payment.payment_ref(), "payment")?;

    match payment.payment_type() {
        PaymentType::LabTest => {
            let Some(lab_request_id) = payment.links().lab_request_id else {
                return Ok(());
            };
            let lab: LabTestRequest = uow.load(&lab_request_id)?;
            if lab.status() != LabRequestStatus::PaymentPending {
                return Ok(());
            }
            uow.execute::<LabTestRequest>(
                lab_request_id,
                &LabRequestCommand::ConfirmPayment(ConfirmPayment {
                    lab_request_id,
                    payment: payment_ref,
                    occurred_at: at,
                }),
            )?;
            uow.notify(Notification::new(
                Recipient::Role(Role::LabTech),
                NotificationType::Payment,
                "Lab Test Paid",
                format!("{} is paid and ready to be assigned", lab.test_name()),
                lab.reference().cloned(),
                at,
            ));
        }
        PaymentType::Medicine => {
            let Some(prescription_id) = payment.links().prescription_id else {
                return Ok(());
            };
            let prescription: Prescription = uow.load(&prescription_id)?;
            if prescription.status() == PrescriptionStatus::Ready {
                hand_over(uow, &prescription, payment_ref, at)?;
            }
        }
        PaymentType::Registration | PaymentType::Consultation | PaymentType::Other => {}
    }
    Ok(())
}

/// READY → DISPENSED, and the visit runs out to COMPLETED.
fn hand_over(
    uow: &mut UnitOfWork,
    prescription: &Prescription,
    payment_ref: BusinessRef,
    at: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    let prescription_id = prescription.id_typed();
    uow.execute::<Prescription>(
        prescription_id,
        &PrescriptionCommand::HandOver(HandOver {
            prescription_id,
            payment: payment_ref,
            occurred_at: at,
        }),
    )?;

    let visit_id = prescription
        .visit_id()
        .ok_or_else(|| DomainError::invariant("prescription has no visit"))?;
    let visit: Visit = uow.load(&visit_id)?;
    if visit.status() == VisitStatus::PrescriptionReady {
        advance_visit(uow, visit_id, VisitStatus::MedicineDispensed, at)?;
        advance_visit(uow, visit_id, VisitStatus::Completed, at)?;
    }

    if let Some(pharmacist) = prescription.prepared_by() {
        uow.notify(Notification::new(
            Recipient::Staff(pharmacist),
            NotificationType::Prescription,
            "Medicine Paid",
            format!(
                "Payment received for {}; hand the medicines to the patient",
                display_ref(prescription.reference())
            ),
            prescription.reference().cloned(),
            at,
        ));
    }
    Ok(())
}

/// Manual LAB_TEST and MEDICINE entries may only replace a failed attempt.
fn ensure_no_live_payment<'a>(
    mut payments: impl Iterator<Item = &'a Payment>,
    what: &str,
) -> Result<(), DomainError> {
    if payments.any(|p| matches!(p.status(), PaymentStatus::Pending | PaymentStatus::Completed)) {
        return Err(DomainError::conflict(format!("{what} already has a payment")));
    }
    Ok(())
}

/// A manual entry must be billed to the patient whose visit owns the target, and any
/// visit it links must be that same visit.
fn ensure_billed_to_owner(
    uow: &UnitOfWork,
    owner_visit: Option<VisitId>,
    payment: &NewPayment,
    what: &str,
) -> Result<(), WorkflowError> {
    let visit_id = owner_visit.ok_or_else(|| DomainError::invariant(format!("{what} has no visit")))?;
    if payment.links.visit_id.is_some_and(|linked| linked != visit_id) {
        return Err(DomainError::validation(format!("{what} belongs to another visit")).into());
    }
    let visit: Visit = uow.load(&visit_id)?;
    if visit.patient_id() != Some(payment.patient_id) {
        return Err(DomainError::validation(format!("{what} belongs to another patient")).into());
    }
    Ok(())
}

impl<N> ClinicWorkflow<N>
where
    N: NotificationSink,
{
    #[tracing::instrument(skip(self, payment), fields(staff_id = %actor.staff_id, payment_type = ?payment.payment_type))]
    pub fn create_payment(&self, actor: &Principal, payment: NewPayment) -> Result<Payment, WorkflowError> {
        self.authorize(actor, Action::ProcessPayment)?;
        let at = self.now();

        self.run("create_payment", actor, |uow| {
            uow.load::<Patient>(&payment.patient_id)?;

            if let Some(visit_id) = payment.links.visit_id {
                let visit: Visit = uow.load(&visit_id)?;
                if visit.patient_id() != Some(payment.patient_id) {
                    return Err(DomainError::validation("visit belongs to another patient").into());
                }
            }

            match payment.payment_type {
                PaymentType::LabTest => {
                    let lab_request_id = payment
                        .links
                        .lab_request_id
                        .ok_or_else(|| DomainError::validation("lab test payment must reference a lab request"))?;
                    let lab: LabTestRequest = uow.load(&lab_request_id)?;
                    let what = format!("lab request {}", display_ref(lab.reference()));
                    ensure_billed_to_owner(uow, lab.visit_id(), &payment, &what)?;
                    if lab.status() != LabRequestStatus::PaymentPending {
                        return Err(DomainError::invalid_transition(
                            "lab request",
                            lab.status(),
                            "raise payment for",
                        )
                        .into());
                    }
                    ensure_no_live_payment(uow.state().payments_for_lab_request(lab_request_id), &what)?;
                    if payment.amount != lab.price() {
                        return Err(DomainError::validation("amount must equal the lab test price").into());
                    }
                }
                PaymentType::Medicine => {
                    let prescription_id: PrescriptionId = payment
                        .links
                        .prescription_id
                        .ok_or_else(|| DomainError::validation("medicine payment must reference a prescription"))?;
                    let prescription: Prescription = uow.load(&prescription_id)?;
                    let what = format!("prescription {}", display_ref(prescription.reference()));
                    ensure_billed_to_owner(uow, prescription.visit_id(), &payment, &what)?;
                    if prescription.status() != PrescriptionStatus::Ready {
                        return Err(DomainError::invalid_transition(
                            "prescription",
                            prescription.status(),
                            "raise payment for",
                        )
                        .into());
                    }
                    ensure_no_live_payment(uow.state().payments_for_prescription(prescription_id), &what)?;
                    if payment.amount != prescription.total_cost() {
                        return Err(DomainError::validation(
                            "amount must equal the prescription total",
                        )
                        .into());
                    }
                }
                PaymentType::Registration | PaymentType::Consultation | PaymentType::Other => {}
            }

            raise_payment(
                uow,
                actor.staff_id,
                PaymentDraft {
                    patient_id: payment.patient_id,
                    links: payment.links,
                    payment_type: payment.payment_type,
                    method: payment.method,
                    amount: payment.amount,
                    notes: payment.notes.clone(),
                    collect: payment.collect_now,
                },
                at,
            )
        })
    }

    /// Complete a pending payment and trigger the stage it gates.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn complete_payment(
        &self,
        actor: &Principal,
        payment_id: PaymentId,
        method: PaymentMethod,
    ) -> Result<Payment, WorkflowError> {
        self.authorize(actor, Action::ProcessPayment)?;
        let at = self.now();
        self.run("complete_payment", actor, |uow| {
            settle(uow, actor.staff_id, payment_id, method, at)
        })
    }

    #[tracing::instrument(skip(self, reason), fields(staff_id = %actor.staff_id))]
    pub fn fail_payment(
        &self,
        actor: &Principal,
        payment_id: PaymentId,
        reason: impl Into<String>,
    ) -> Result<Payment, WorkflowError> {
        self.authorize(actor, Action::ProcessPayment)?;
        let at = self.now();
        let reason = reason.into();
        self.run("fail_payment", actor, |uow| {
            uow.execute::<Payment>(
                payment_id,
                &PaymentCommand::Fail(FailPayment {
                    payment_id,
                    reason,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&payment_id)?)
        })
    }

    #[tracing::instrument(skip(self, reason), fields(staff_id = %actor.staff_id))]
    pub fn refund_payment(
        &self,
        actor: &Principal,
        payment_id: PaymentId,
        reason: impl Into<String>,
    ) -> Result<Payment, WorkflowError> {
        self.authorize(actor, Action::RefundPayment)?;
        let at = self.now();
        let reason = reason.into();
        self.run("refund_payment", actor, |uow| {
            uow.execute::<Payment>(
                payment_id,
                &PaymentCommand::Refund(RefundPayment {
                    payment_id,
                    reason,
                    processed_by: actor.staff_id,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&payment_id)?)
        })
    }

    /// Remove a pending or failed payment. The store refuses completed and refunded ones.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn delete_payment(&self, actor: &Principal, payment_id: PaymentId) -> Result<Payment, WorkflowError> {
        self.authorize(actor, Action::DeletePayment)?;
        let at = self.now();
        self.run("delete_payment", actor, |uow| uow.delete_payment(payment_id, at))
    }
}
