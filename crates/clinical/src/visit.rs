//! Visit: one clinical episode, driven by a single status through the pipeline
//! registration → consultation → lab → prescription → dispensing → completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicflow_core::{Aggregate, AggregateRoot, BusinessRef, DomainError, StaffId};
use clinicflow_events::Event;

use crate::patient::PatientId;

clinicflow_core::aggregate_id!(VisitId, "Visit identifier.");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitStatus {
    Registered,
    WithDoctor,
    LabRequested,
    LabInProgress,
    LabCompleted,
    WithDoctorReview,
    PrescriptionReady,
    MedicineDispensed,
    Completed,
}

impl VisitStatus {
    pub const ALL: [VisitStatus; 9] = [
        VisitStatus::Registered,
        VisitStatus::WithDoctor,
        VisitStatus::LabRequested,
        VisitStatus::LabInProgress,
        VisitStatus::LabCompleted,
        VisitStatus::WithDoctorReview,
        VisitStatus::PrescriptionReady,
        VisitStatus::MedicineDispensed,
        VisitStatus::Completed,
    ];

    /// Allowed next states.
    ///
    /// Each state advances to its successor. `WithDoctor` may also go straight to
    /// `PrescriptionReady` when the consultation needs no lab work, and so may
    /// `LabRequested` once every request on the visit was cancelled unpaid.
    pub fn successors(self) -> &'static [VisitStatus] {
        use VisitStatus::*;
        match self {
            Registered => &[WithDoctor],
            WithDoctor => &[LabRequested, PrescriptionReady],
            LabRequested => &[LabInProgress, PrescriptionReady],
            LabInProgress => &[LabCompleted],
            LabCompleted => &[WithDoctorReview],
            WithDoctorReview => &[PrescriptionReady],
            PrescriptionReady => &[MedicineDispensed],
            MedicineDispensed => &[Completed],
            Completed => &[],
        }
    }

    pub fn can_advance_to(self, target: VisitStatus) -> bool {
        self.successors().contains(&target)
    }

    /// Position in the pipeline (0 = registered).
    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn is_terminal(self) -> bool {
        self == VisitStatus::Completed
    }
}

/// Vitals and notes from the physical examination. One per visit, last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalExamination {
    /// e.g. "120/80".
    pub blood_pressure: String,
    /// Tenths of a degree Celsius (368 = 36.8 °C).
    pub temperature_decicelsius: Option<u16>,
    pub heart_rate_bpm: Option<u16>,
    pub weight_grams: Option<u32>,
    pub height_mm: Option<u32>,
    pub notes: String,
}

impl MedicalExamination {
    fn validate(&self) -> Result<(), DomainError> {
        if let Some(t) = self.temperature_decicelsius {
            if !(250..=450).contains(&t) {
                return Err(DomainError::validation("temperature out of range"));
            }
        }
        if let Some(hr) = self.heart_rate_bpm {
            if !(20..=300).contains(&hr) {
                return Err(DomainError::validation("heart rate out of range"));
            }
        }
        Ok(())
    }
}

/// When each phase of the visit was reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitTimeline {
    pub registered_at: Option<DateTime<Utc>>,
    pub doctor_assigned_at: Option<DateTime<Utc>>,
    pub lab_requested_at: Option<DateTime<Utc>>,
    pub lab_completed_at: Option<DateTime<Utc>>,
    pub prescription_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate root: Visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    id: VisitId,
    reference: Option<BusinessRef>,
    patient_id: Option<PatientId>,
    assigned_doctor: Option<StaffId>,
    status: VisitStatus,
    symptoms: String,
    diagnosis: String,
    doctor_notes: String,
    examination: Option<MedicalExamination>,
    examined_by: Option<StaffId>,
    timeline: VisitTimeline,
    version: u64,
    created: bool,
}

impl Visit {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: VisitId) -> Self {
        Self {
            id,
            reference: None,
            patient_id: None,
            assigned_doctor: None,
            status: VisitStatus::Registered,
            symptoms: String::new(),
            diagnosis: String::new(),
            doctor_notes: String::new(),
            examination: None,
            examined_by: None,
            timeline: VisitTimeline::default(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> VisitId {
        self.id
    }

    pub fn reference(&self) -> Option<&BusinessRef> {
        self.reference.as_ref()
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn assigned_doctor(&self) -> Option<StaffId> {
        self.assigned_doctor
    }

    pub fn status(&self) -> VisitStatus {
        self.status
    }

    pub fn symptoms(&self) -> &str {
        &self.symptoms
    }

    pub fn diagnosis(&self) -> &str {
        &self.diagnosis
    }

    pub fn doctor_notes(&self) -> &str {
        &self.doctor_notes
    }

    pub fn examination(&self) -> Option<&MedicalExamination> {
        self.examination.as_ref()
    }

    pub fn examined_by(&self) -> Option<StaffId> {
        self.examined_by
    }

    pub fn timeline(&self) -> &VisitTimeline {
        &self.timeline
    }

    /// Registration time, used for date-range reporting.
    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.timeline.registered_at
    }
}

impl AggregateRoot for Visit {
    type Id = VisitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenVisit {
    pub visit_id: VisitId,
    pub reference: BusinessRef,
    pub patient_id: PatientId,
    pub symptoms: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignDoctor (first assignment or transfer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignDoctor {
    pub visit_id: VisitId,
    pub doctor: StaffId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceVisit (move to the next pipeline state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceVisit {
    pub visit_id: VisitId,
    pub target: VisitStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordExamination {
    pub visit_id: VisitId,
    pub examination: MedicalExamination,
    pub recorded_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDiagnosis {
    pub visit_id: VisitId,
    pub diagnosis: String,
    pub doctor_notes: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisitCommand {
    Open(OpenVisit),
    AssignDoctor(AssignDoctor),
    Advance(AdvanceVisit),
    RecordExamination(RecordExamination),
    RecordDiagnosis(RecordDiagnosis),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitOpened {
    pub visit_id: VisitId,
    pub reference: BusinessRef,
    pub patient_id: PatientId,
    pub symptoms: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorAssigned {
    pub visit_id: VisitId,
    pub doctor: StaffId,
    pub previous_doctor: Option<StaffId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitStatusChanged {
    pub visit_id: VisitId,
    pub from: VisitStatus,
    pub to: VisitStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExaminationRecorded {
    pub visit_id: VisitId,
    pub examination: MedicalExamination,
    pub recorded_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRecorded {
    pub visit_id: VisitId,
    pub diagnosis: String,
    pub doctor_notes: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisitEvent {
    Opened(VisitOpened),
    DoctorAssigned(DoctorAssigned),
    StatusChanged(VisitStatusChanged),
    ExaminationRecorded(ExaminationRecorded),
    DiagnosisRecorded(DiagnosisRecorded),
}

impl Event for VisitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            VisitEvent::Opened(_) => "clinical.visit.opened",
            VisitEvent::DoctorAssigned(_) => "clinical.visit.doctor_assigned",
            VisitEvent::StatusChanged(_) => "clinical.visit.status_changed",
            VisitEvent::ExaminationRecorded(_) => "clinical.visit.examination_recorded",
            VisitEvent::DiagnosisRecorded(_) => "clinical.visit.diagnosis_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            VisitEvent::Opened(e) => e.occurred_at,
            VisitEvent::DoctorAssigned(e) => e.occurred_at,
            VisitEvent::StatusChanged(e) => e.occurred_at,
            VisitEvent::ExaminationRecorded(e) => e.occurred_at,
            VisitEvent::DiagnosisRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Visit {
    type Command = VisitCommand;
    type Event = VisitEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            VisitEvent::Opened(e) => {
                self.id = e.visit_id;
                self.reference = Some(e.reference.clone());
                self.patient_id = Some(e.patient_id);
                self.symptoms = e.symptoms.clone();
                self.status = VisitStatus::Registered;
                self.timeline.registered_at = Some(e.occurred_at);
                self.created = true;
            }
            VisitEvent::DoctorAssigned(e) => {
                self.assigned_doctor = Some(e.doctor);
                self.timeline.doctor_assigned_at = Some(e.occurred_at);
            }
            VisitEvent::StatusChanged(e) => {
                self.status = e.to;
                let at = Some(e.occurred_at);
                match e.to {
                    VisitStatus::LabRequested => self.timeline.lab_requested_at = at,
                    VisitStatus::LabCompleted => self.timeline.lab_completed_at = at,
                    VisitStatus::PrescriptionReady => self.timeline.prescription_at = at,
                    VisitStatus::Completed => self.timeline.completed_at = at,
                    _ => {}
                }
            }
            VisitEvent::ExaminationRecorded(e) => {
                self.examination = Some(e.examination.clone());
                self.examined_by = Some(e.recorded_by);
            }
            VisitEvent::DiagnosisRecorded(e) => {
                self.diagnosis = e.diagnosis.clone();
                self.doctor_notes = e.doctor_notes.clone();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            VisitCommand::Open(cmd) => self.handle_open(cmd),
            VisitCommand::AssignDoctor(cmd) => self.handle_assign_doctor(cmd),
            VisitCommand::Advance(cmd) => self.handle_advance(cmd),
            VisitCommand::RecordExamination(cmd) => self.handle_examination(cmd),
            VisitCommand::RecordDiagnosis(cmd) => self.handle_diagnosis(cmd),
        }
    }
}

impl Visit {
    fn ensure_exists(&self, visit_id: VisitId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("visit {visit_id}")));
        }
        if self.id != visit_id {
            return Err(DomainError::invariant("visit_id mismatch"));
        }
        Ok(())
    }

    fn ensure_open(&self, attempted: &str) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition("visit", self.status, attempted));
        }
        Ok(())
    }

    fn status_change(&self, to: VisitStatus, occurred_at: DateTime<Utc>) -> VisitEvent {
        VisitEvent::StatusChanged(VisitStatusChanged {
            visit_id: self.id,
            from: self.status,
            to,
            occurred_at,
        })
    }

    fn handle_open(&self, cmd: &OpenVisit) -> Result<Vec<VisitEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("visit already exists"));
        }

        Ok(vec![VisitEvent::Opened(VisitOpened {
            visit_id: cmd.visit_id,
            reference: cmd.reference.clone(),
            patient_id: cmd.patient_id,
            symptoms: cmd.symptoms.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_doctor(&self, cmd: &AssignDoctor) -> Result<Vec<VisitEvent>, DomainError> {
        self.ensure_exists(cmd.visit_id)?;
        self.ensure_open("assign doctor to")?;

        if self.assigned_doctor == Some(cmd.doctor) {
            return Err(DomainError::validation("doctor is already assigned to this visit"));
        }

        let mut events = vec![VisitEvent::DoctorAssigned(DoctorAssigned {
            visit_id: cmd.visit_id,
            doctor: cmd.doctor,
            previous_doctor: self.assigned_doctor,
            occurred_at: cmd.occurred_at,
        })];

        if self.status == VisitStatus::Registered {
            events.push(self.status_change(VisitStatus::WithDoctor, cmd.occurred_at));
        }

        Ok(events)
    }

    fn handle_advance(&self, cmd: &AdvanceVisit) -> Result<Vec<VisitEvent>, DomainError> {
        self.ensure_exists(cmd.visit_id)?;

        if !self.status.can_advance_to(cmd.target) {
            return Err(DomainError::invalid_transition(
                "visit",
                self.status,
                format!("move to {:?}", cmd.target),
            ));
        }
        if cmd.target == VisitStatus::WithDoctor && self.assigned_doctor.is_none() {
            return Err(DomainError::validation("visit has no assigned doctor"));
        }

        Ok(vec![self.status_change(cmd.target, cmd.occurred_at)])
    }

    fn handle_examination(&self, cmd: &RecordExamination) -> Result<Vec<VisitEvent>, DomainError> {
        self.ensure_exists(cmd.visit_id)?;
        self.ensure_open("record examination on")?;
        cmd.examination.validate()?;

        Ok(vec![VisitEvent::ExaminationRecorded(ExaminationRecorded {
            visit_id: cmd.visit_id,
            examination: cmd.examination.clone(),
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_diagnosis(&self, cmd: &RecordDiagnosis) -> Result<Vec<VisitEvent>, DomainError> {
        self.ensure_exists(cmd.visit_id)?;
        self.ensure_open("record diagnosis on")?;
        if self.status == VisitStatus::Registered {
            return Err(DomainError::invalid_transition(
                "visit",
                self.status,
                "record diagnosis on",
            ));
        }

        Ok(vec![VisitEvent::DiagnosisRecorded(DiagnosisRecorded {
            visit_id: cmd.visit_id,
            diagnosis: cmd.diagnosis.clone(),
            doctor_notes: cmd.doctor_notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
