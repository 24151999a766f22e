//! Laboratory flow: order, pay, assign, run, report, review.

use chrono::{DateTime, Utc};

use clinicflow_auth::{Action, Principal, Role};
use clinicflow_billing::{
    FailPayment, Payment, PaymentCommand, PaymentLinks, PaymentMethod, PaymentStatus, PaymentType,
};
use clinicflow_catalog::{LabTestType, LabTestTypeId};
use clinicflow_clinical::{
    AssignTechnician, AwaitPayment, CancelLabRequest, LabRequestCommand, LabRequestId,
    LabRequestStatus, LabTestRequest, MarkReviewed, RequestLabTest, SubmitResult,
    TestResultDetails, Visit, VisitId, VisitStatus,
};
use clinicflow_core::{DomainError, ReferenceKind, StaffId};
use clinicflow_events::{Notification, NotificationSink, NotificationType, Recipient};

use super::ledger::{PaymentDraft, raise_payment, settle};
use super::{
    ClinicWorkflow, LabOrder, advance_visit, display_ref, ensure_attending, patient_name,
    required_ref, visit_patient,
};
use crate::error::WorkflowError;
use crate::reporting;
use crate::store::UnitOfWork;

/// Stamp every completed, unreviewed result of the visit as reviewed.
pub(super) fn mark_results_reviewed(
    uow: &mut UnitOfWork,
    visit_id: VisitId,
    reviewed_by: StaffId,
    at: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    let pending: Vec<LabRequestId> = uow
        .state()
        .lab_requests_for_visit(visit_id)
        .filter(|l| l.status() == LabRequestStatus::Completed && l.doctor_reviewed_at().is_none())
        .map(|l| l.id_typed())
        .collect();

    for lab_request_id in pending {
        uow.execute::<LabTestRequest>(
            lab_request_id,
            &LabRequestCommand::MarkReviewed(MarkReviewed {
                lab_request_id,
                reviewed_by,
                occurred_at: at,
            }),
        )?;
    }
    Ok(())
}

/// Once no lab request of the visit is open, the visit moves to LAB_COMPLETED and
/// the doctor is told the patient is ready for review.
pub(super) fn close_lab_phase_if_done(
    uow: &mut UnitOfWork,
    visit_id: VisitId,
    at: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    let still_open = uow
        .state()
        .lab_requests_for_visit(visit_id)
        .any(|l| l.status().is_open());
    if still_open {
        return Ok(());
    }

    let visit: Visit = uow.load(&visit_id)?;
    if visit.status() != VisitStatus::LabInProgress {
        return Ok(());
    }
    advance_visit(uow, visit_id, VisitStatus::LabCompleted, at)?;

    if let Some(doctor) = visit.assigned_doctor() {
        let patient = patient_name(uow, visit_patient(&visit)?);
        uow.notify(Notification::new(
            Recipient::Staff(doctor),
            NotificationType::ConsultationReady,
            "Patient Ready for Review",
            format!("All lab results for {patient} are in"),
            visit.reference().cloned(),
            at,
        ));
    }
    Ok(())
}

impl<N> ClinicWorkflow<N>
where
    N: NotificationSink,
{
    /// Order a test for the doctor's visit. The request waits on a pending LAB_TEST
    /// payment for the catalog price.
    #[tracing::instrument(skip(self, doctor_notes), fields(staff_id = %actor.staff_id))]
    pub fn request_lab_test(
        &self,
        actor: &Principal,
        visit_id: VisitId,
        test_type_id: LabTestTypeId,
        doctor_notes: impl Into<String>,
    ) -> Result<LabOrder, WorkflowError> {
        self.authorize(actor, Action::RequestLabTest)?;
        let at = self.now();
        let doctor_notes = doctor_notes.into();

        self.run("request_lab_test", actor, |uow| {
            let visit: Visit = uow.load(&visit_id)?;
            ensure_attending(&visit, actor)?;

            let test_type: LabTestType = uow.load(&test_type_id)?;
            if !test_type.is_active() {
                return Err(DomainError::validation(format!(
                    "lab test {} is no longer offered",
                    test_type.name()
                ))
                .into());
            }

            match visit.status() {
                VisitStatus::WithDoctor => {
                    advance_visit(uow, visit_id, VisitStatus::LabRequested, at)?;
                }
                VisitStatus::LabRequested | VisitStatus::LabInProgress => {}
                other => {
                    return Err(DomainError::invalid_transition("visit", other, "request lab test for").into());
                }
            }

            let lab_request_id = LabRequestId::generate();
            let reference = uow.issue_ref(ReferenceKind::LabRequest, at)?;
            uow.execute::<LabTestRequest>(
                lab_request_id,
                &LabRequestCommand::Request(RequestLabTest {
                    lab_request_id,
                    reference: reference.clone(),
                    visit_id,
                    test_type_id,
                    test_name: test_type.name().to_string(),
                    price: test_type.price(),
                    requested_by: actor.staff_id,
                    doctor_notes,
                    occurred_at: at,
                }),
            )?;

            let patient_id = visit_patient(&visit)?;
            let payment = raise_payment(
                uow,
                actor.staff_id,
                PaymentDraft {
                    patient_id,
                    links: PaymentLinks {
                        visit_id: Some(visit_id),
                        lab_request_id: Some(lab_request_id),
                        prescription_id: None,
                    },
                    payment_type: PaymentType::LabTest,
                    method: PaymentMethod::Pending,
                    amount: test_type.price(),
                    notes: format!("Lab test: {}", test_type.name()),
                    collect: false,
                },
                at,
            )?;

            uow.execute::<LabTestRequest>(
                lab_request_id,
                &LabRequestCommand::AwaitPayment(AwaitPayment {
                    lab_request_id,
                    payment: required_ref(payment.payment_ref(), "payment")?,
                    occurred_at: at,
                }),
            )?;

            uow.notify(Notification::new(
                Recipient::Role(Role::LabTech),
                NotificationType::LabRequest,
                "New Lab Test Request",
                format!(
                    "{} requested for {} (awaiting payment)",
                    test_type.name(),
                    patient_name(uow, patient_id)
                ),
                Some(reference),
                at,
            ));

            Ok(LabOrder {
                request: uow.load(&lab_request_id)?,
                payment,
            })
        })
    }

    /// Collect the lab test fee. Completes the pending payment, or raises a fresh
    /// collected one when the earlier attempt failed.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn process_lab_payment(
        &self,
        actor: &Principal,
        lab_request_id: LabRequestId,
        method: PaymentMethod,
    ) -> Result<Payment, WorkflowError> {
        self.authorize(actor, Action::ProcessPayment)?;
        let at = self.now();

        self.run("process_lab_payment", actor, |uow| {
            let lab: LabTestRequest = uow.load(&lab_request_id)?;
            let payments: Vec<Payment> = uow
                .state()
                .payments_for_lab_request(lab_request_id)
                .cloned()
                .collect();

            if payments.iter().any(|p| p.status() == PaymentStatus::Completed) {
                return Err(DomainError::duplicate_payment(format!(
                    "lab test payment for {} already processed",
                    display_ref(lab.reference())
                ))
                .into());
            }
            if lab.status() != LabRequestStatus::PaymentPending {
                return Err(DomainError::invalid_transition("lab request", lab.status(), "pay for").into());
            }

            if let Some(pending) = payments.iter().find(|p| p.status() == PaymentStatus::Pending) {
                return settle(uow, actor.staff_id, pending.id_typed(), method, at);
            }

            let visit_id = lab
                .visit_id()
                .ok_or_else(|| DomainError::invariant("lab request has no visit"))?;
            let visit: Visit = uow.load(&visit_id)?;
            raise_payment(
                uow,
                actor.staff_id,
                PaymentDraft {
                    patient_id: visit_patient(&visit)?,
                    links: PaymentLinks {
                        visit_id: Some(visit_id),
                        lab_request_id: Some(lab_request_id),
                        prescription_id: None,
                    },
                    payment_type: PaymentType::LabTest,
                    method,
                    amount: lab.price(),
                    notes: format!("Lab test: {}", lab.test_name()),
                    collect: true,
                },
                at,
            )
        })
    }

    /// Hand a paid request to a technician; the visit's lab work is now in progress.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn assign_lab_technician(
        &self,
        actor: &Principal,
        lab_request_id: LabRequestId,
        technician: StaffId,
    ) -> Result<LabTestRequest, WorkflowError> {
        self.authorize(actor, Action::AssignLabTechnician)?;
        let at = self.now();

        self.run("assign_lab_technician", actor, |uow| {
            if !uow.state().is_active_staff_with_role(technician, Role::LabTech) {
                return Err(DomainError::validation("assignee must be an active lab technician").into());
            }

            uow.execute::<LabTestRequest>(
                lab_request_id,
                &LabRequestCommand::AssignTechnician(AssignTechnician {
                    lab_request_id,
                    technician,
                    occurred_at: at,
                }),
            )?;
            let lab: LabTestRequest = uow.load(&lab_request_id)?;
            let paid = uow
                .state()
                .payments_for_lab_request(lab_request_id)
                .any(|p| p.status() == PaymentStatus::Completed);
            if !paid {
                return Err(DomainError::validation(format!(
                    "lab test fee for {} has not been collected",
                    display_ref(lab.reference())
                ))
                .into());
            }

            let visit_id = lab
                .visit_id()
                .ok_or_else(|| DomainError::invariant("lab request has no visit"))?;
            let visit: Visit = uow.load(&visit_id)?;
            if visit.status() == VisitStatus::LabRequested {
                advance_visit(uow, visit_id, VisitStatus::LabInProgress, at)?;
            }

            uow.notify(Notification::new(
                Recipient::Staff(technician),
                NotificationType::LabRequest,
                "Lab Test Assigned",
                format!("{} ({}) is assigned to you", lab.test_name(), display_ref(lab.reference())),
                lab.reference().cloned(),
                at,
            ));
            Ok(lab)
        })
    }

    /// Record the assigned technician's findings and tell the requesting doctor.
    #[tracing::instrument(skip(self, details, lab_notes), fields(staff_id = %actor.staff_id))]
    pub fn submit_lab_result(
        &self,
        actor: &Principal,
        lab_request_id: LabRequestId,
        details: TestResultDetails,
        lab_notes: impl Into<String>,
    ) -> Result<LabTestRequest, WorkflowError> {
        self.authorize(actor, Action::SubmitLabResult)?;
        let at = self.now();
        let lab_notes = lab_notes.into();

        self.run("submit_lab_result", actor, |uow| {
            let abnormal = details.is_abnormal;
            uow.execute::<LabTestRequest>(
                lab_request_id,
                &LabRequestCommand::SubmitResult(SubmitResult {
                    lab_request_id,
                    submitted_by: actor.staff_id,
                    details,
                    lab_notes,
                    occurred_at: at,
                }),
            )?;
            let lab: LabTestRequest = uow.load(&lab_request_id)?;

            if let Some(doctor) = lab.requested_by() {
                let message = if abnormal {
                    format!("{} results are ready (abnormal)", lab.test_name())
                } else {
                    format!("{} results are ready", lab.test_name())
                };
                uow.notify(Notification::new(
                    Recipient::Staff(doctor),
                    NotificationType::LabResult,
                    "Lab Results Ready",
                    message,
                    lab.reference().cloned(),
                    at,
                ));
            }

            if let Some(visit_id) = lab.visit_id() {
                close_lab_phase_if_done(uow, visit_id, at)?;
            }
            Ok(lab)
        })
    }

    /// Cancel an open request. Its pending payment is marked failed so it no longer
    /// counts as owed.
    #[tracing::instrument(skip(self, reason), fields(staff_id = %actor.staff_id))]
    pub fn cancel_lab_request(
        &self,
        actor: &Principal,
        lab_request_id: LabRequestId,
        reason: impl Into<String>,
    ) -> Result<LabTestRequest, WorkflowError> {
        self.authorize(actor, Action::CancelLabRequest)?;
        let at = self.now();
        let reason = reason.into();

        self.run("cancel_lab_request", actor, |uow| {
            uow.execute::<LabTestRequest>(
                lab_request_id,
                &LabRequestCommand::Cancel(CancelLabRequest {
                    lab_request_id,
                    reason: reason.clone(),
                    occurred_at: at,
                }),
            )?;
            let lab: LabTestRequest = uow.load(&lab_request_id)?;

            let pending: Vec<_> = uow
                .state()
                .payments_for_lab_request(lab_request_id)
                .filter(|p| p.status() == PaymentStatus::Pending)
                .map(|p| p.id_typed())
                .collect();
            for payment_id in pending {
                uow.execute::<Payment>(
                    payment_id,
                    &PaymentCommand::Fail(FailPayment {
                        payment_id,
                        reason: format!("lab request cancelled: {reason}"),
                        occurred_at: at,
                    }),
                )?;
            }

            if let Some(technician) = lab.assigned_to() {
                uow.notify(Notification::new(
                    Recipient::Staff(technician),
                    NotificationType::LabRequest,
                    "Lab Test Cancelled",
                    format!("{} ({}) was cancelled", lab.test_name(), display_ref(lab.reference())),
                    lab.reference().cloned(),
                    at,
                ));
            }

            if let Some(visit_id) = lab.visit_id() {
                close_lab_phase_if_done(uow, visit_id, at)?;
            }
            Ok(lab)
        })
    }

    /// The attending doctor picks up the finished results.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn begin_result_review(&self, actor: &Principal, visit_id: VisitId) -> Result<Visit, WorkflowError> {
        self.authorize(actor, Action::ReviewLabResults)?;
        let at = self.now();

        self.run("begin_result_review", actor, |uow| {
            let visit: Visit = uow.load(&visit_id)?;
            ensure_attending(&visit, actor)?;
            advance_visit(uow, visit_id, VisitStatus::WithDoctorReview, at)?;
            mark_results_reviewed(uow, visit_id, actor.staff_id, at)?;
            Ok(uow.load(&visit_id)?)
        })
    }

    /// Requests visible to the caller: technicians see their assignments, doctors
    /// their own orders, everyone else the whole queue.
    pub fn lab_worklist(&self, actor: &Principal) -> Result<Vec<LabTestRequest>, WorkflowError> {
        self.authorize(actor, Action::ViewLabWorklist)?;
        Ok(self
            .store
            .read(|s| reporting::lab_worklist(s, actor))
            .unwrap_or_default())
    }
}
