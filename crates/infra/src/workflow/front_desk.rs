//! Reception and consultation: patients, visits, doctor assignment, examination.

use chrono::{DateTime, Utc};

use clinicflow_auth::{Action, Principal, Role};
use clinicflow_billing::{Payment, PaymentLinks, PaymentMethod, PaymentType};
use clinicflow_clinical::{
    AssignDoctor, MedicalExamination, OpenVisit, Patient, PatientCommand, PatientDetails,
    PatientId, RecordDiagnosis, RecordExamination, RegisterPatient, UpdatePatientDetails, Visit,
    VisitCommand, VisitId,
};
use clinicflow_core::{DomainError, ReferenceKind, StaffId};
use clinicflow_events::{Notification, NotificationSink, NotificationType, Recipient};

use super::ledger::{PaymentDraft, raise_payment};
use super::{ClinicWorkflow, PatientRegistration, display_ref, ensure_attending, patient_name};
use crate::error::WorkflowError;
use crate::store::UnitOfWork;

/// Assign (or transfer) a visit's doctor and tell the people involved.
fn assign_doctor_in(
    uow: &mut UnitOfWork,
    visit_id: VisitId,
    doctor: StaffId,
    at: DateTime<Utc>,
) -> Result<Visit, WorkflowError> {
    if !uow.state().is_active_staff_with_role(doctor, Role::Doctor) {
        return Err(DomainError::validation("assignee must be an active doctor").into());
    }

    let before: Visit = uow.load(&visit_id)?;
    uow.execute::<Visit>(
        visit_id,
        &VisitCommand::AssignDoctor(AssignDoctor {
            visit_id,
            doctor,
            occurred_at: at,
        }),
    )?;

    let visit: Visit = uow.load(&visit_id)?;
    let patient = visit
        .patient_id()
        .map(|id| patient_name(uow, id))
        .unwrap_or_default();
    let reference = visit.reference().cloned();

    match before.assigned_doctor() {
        None => uow.notify(Notification::new(
            Recipient::Staff(doctor),
            NotificationType::PatientAssignment,
            "New Patient Assigned",
            format!("{patient} ({}) is waiting for consultation", display_ref(reference.as_ref())),
            reference,
            at,
        )),
        Some(previous) => {
            uow.notify(Notification::new(
                Recipient::Staff(doctor),
                NotificationType::PatientAssignment,
                "Patient Transferred to You",
                format!("{patient} ({}) was transferred to you", display_ref(reference.as_ref())),
                reference.clone(),
                at,
            ));
            uow.notify(Notification::new(
                Recipient::Staff(previous),
                NotificationType::System,
                "Patient Transferred",
                format!("{patient} was transferred to another doctor"),
                reference,
                at,
            ));
        }
    }

    Ok(visit)
}

impl<N> ClinicWorkflow<N>
where
    N: NotificationSink,
{
    /// Register a patient and collect the registration fee in the same unit of work.
    #[tracing::instrument(skip(self, details), fields(staff_id = %actor.staff_id))]
    pub fn register_patient(
        &self,
        actor: &Principal,
        details: PatientDetails,
        method: PaymentMethod,
    ) -> Result<PatientRegistration, WorkflowError> {
        self.authorize(actor, Action::RegisterPatient)?;
        let at = self.now();
        let fee = self.config.registration_fee;

        self.run("register_patient", actor, |uow| {
            let patient_id = PatientId::generate();
            let reference = uow.issue_ref(ReferenceKind::Patient, at)?;
            uow.execute::<Patient>(
                patient_id,
                &PatientCommand::Register(RegisterPatient {
                    patient_id,
                    reference,
                    details,
                    registered_by: actor.staff_id,
                    occurred_at: at,
                }),
            )?;

            let registration_payment: Payment = raise_payment(
                uow,
                actor.staff_id,
                PaymentDraft {
                    patient_id,
                    links: PaymentLinks::default(),
                    payment_type: PaymentType::Registration,
                    method,
                    amount: fee,
                    notes: "Registration fee".to_string(),
                    collect: true,
                },
                at,
            )?;

            Ok(PatientRegistration {
                patient: uow.load(&patient_id)?,
                registration_payment,
            })
        })
    }

    #[tracing::instrument(skip(self, details), fields(staff_id = %actor.staff_id))]
    pub fn update_patient(
        &self,
        actor: &Principal,
        patient_id: PatientId,
        details: PatientDetails,
    ) -> Result<Patient, WorkflowError> {
        self.authorize(actor, Action::UpdatePatient)?;
        let at = self.now();
        self.run("update_patient", actor, |uow| {
            uow.execute::<Patient>(
                patient_id,
                &PatientCommand::UpdateDetails(UpdatePatientDetails {
                    patient_id,
                    details,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&patient_id)?)
        })
    }

    /// Open a visit for a registered (and paid-up) patient, optionally assigning a
    /// doctor straight away.
    #[tracing::instrument(skip(self, symptoms), fields(staff_id = %actor.staff_id))]
    pub fn open_visit(
        &self,
        actor: &Principal,
        patient_id: PatientId,
        doctor: Option<StaffId>,
        symptoms: impl Into<String>,
    ) -> Result<Visit, WorkflowError> {
        self.authorize(actor, Action::OpenVisit)?;
        let at = self.now();
        let symptoms = symptoms.into();

        self.run("open_visit", actor, |uow| {
            let patient: Patient = uow.load(&patient_id)?;
            if !uow.state().has_completed_registration(patient_id) {
                return Err(DomainError::validation(format!(
                    "patient {} has no completed registration payment",
                    display_ref(patient.reference())
                ))
                .into());
            }

            let visit_id = VisitId::generate();
            let reference = uow.issue_ref(ReferenceKind::Visit, at)?;
            uow.execute::<Visit>(
                visit_id,
                &VisitCommand::Open(OpenVisit {
                    visit_id,
                    reference,
                    patient_id,
                    symptoms,
                    occurred_at: at,
                }),
            )?;

            match doctor {
                Some(doctor) => assign_doctor_in(uow, visit_id, doctor, at),
                None => Ok(uow.load(&visit_id)?),
            }
        })
    }

    /// First assignment moves the visit to the doctor; later ones transfer it.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn assign_doctor(&self, actor: &Principal, visit_id: VisitId, doctor: StaffId) -> Result<Visit, WorkflowError> {
        self.authorize(actor, Action::AssignDoctor)?;
        let at = self.now();
        self.run("assign_doctor", actor, |uow| assign_doctor_in(uow, visit_id, doctor, at))
    }

    #[tracing::instrument(skip(self, examination), fields(staff_id = %actor.staff_id))]
    pub fn record_examination(
        &self,
        actor: &Principal,
        visit_id: VisitId,
        examination: MedicalExamination,
    ) -> Result<Visit, WorkflowError> {
        self.authorize(actor, Action::RecordExamination)?;
        let at = self.now();
        self.run("record_examination", actor, |uow| {
            uow.execute::<Visit>(
                visit_id,
                &VisitCommand::RecordExamination(RecordExamination {
                    visit_id,
                    examination,
                    recorded_by: actor.staff_id,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&visit_id)?)
        })
    }

    #[tracing::instrument(skip(self, diagnosis, doctor_notes), fields(staff_id = %actor.staff_id))]
    pub fn record_diagnosis(
        &self,
        actor: &Principal,
        visit_id: VisitId,
        diagnosis: impl Into<String>,
        doctor_notes: impl Into<String>,
    ) -> Result<Visit, WorkflowError> {
        self.authorize(actor, Action::RecordDiagnosis)?;
        let at = self.now();
        let diagnosis = diagnosis.into();
        let doctor_notes = doctor_notes.into();
        self.run("record_diagnosis", actor, |uow| {
            let visit: Visit = uow.load(&visit_id)?;
            ensure_attending(&visit, actor)?;
            uow.execute::<Visit>(
                visit_id,
                &VisitCommand::RecordDiagnosis(RecordDiagnosis {
                    visit_id,
                    diagnosis,
                    doctor_notes,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&visit_id)?)
        })
    }
}
