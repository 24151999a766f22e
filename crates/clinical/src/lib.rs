//! Clinical domain module (event-sourced): patients, visits, lab test requests,
//! prescriptions and dispense carts.
//!
//! Every record is an [`clinicflow_core::Aggregate`]: commands are validated against
//! the current state and turned into events, state only changes by applying them.

pub mod cart;
pub mod lab;
pub mod patient;
pub mod prescription;
pub mod visit;

pub use cart::{
    CartClosure, CartCommand, CartEvent, CartItem, CartResolution, CloseCart, DispenseCart,
    DispenseCartId, OpenCart, RemoveItem, SetItemQuantity, StageItem, resolve_active_carts,
};
pub use lab::{
    AssignTechnician, AwaitPayment, CancelLabRequest, ConfirmPayment, LabRequestCommand,
    LabRequestEvent, LabRequestId, LabRequestStatus, LabTestRequest, MarkReviewed,
    RequestLabTest, SubmitResult, TestResult, TestResultDetails,
};
pub use patient::{
    Gender, Patient, PatientCommand, PatientDetails, PatientEvent, PatientId, RegisterPatient,
    UpdatePatientDetails,
};
pub use prescription::{
    AddItem, BeginReview, CancelPrescription, CreatePrescription, HandOver, MarkReady,
    Prescription, PrescriptionCommand, PrescriptionEvent, PrescriptionId, PrescriptionItem,
    PrescriptionLine, PrescriptionStatus, line_total,
};
pub use visit::{
    AdvanceVisit, AssignDoctor, MedicalExamination, OpenVisit, RecordDiagnosis,
    RecordExamination, Visit, VisitCommand, VisitEvent, VisitId, VisitStatus, VisitTimeline,
};
