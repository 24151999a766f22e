//! Infrastructure layer: clinic store, journal, workflow service, config.
//!
//! Every workflow operation runs as one unit of work against a snapshot of the
//! in-memory clinic store. The snapshot replaces the committed state only when the
//! whole operation succeeds; the journal and the notification outbox are flushed on
//! commit.

pub mod config;
pub mod error;
pub mod journal;
pub mod reporting;
pub mod store;
pub mod workflow;


pub use config::{ClinicConfig, ConfigError};
pub use error::WorkflowError;
pub use journal::JournalEntry;
pub use reporting::{DateRange, PaymentFilter, Reporting, RevenueSummary};
pub use store::{ClinicState, Committed, InMemoryClinicStore, StoreError, UnitOfWork};
pub use workflow::{
    ClinicWorkflow, Dispensation, LabOrder, NewMedicine, NewPayment, PatientRegistration,
    PrescribedMedicine,
};
