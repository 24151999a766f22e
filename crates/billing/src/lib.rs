//! Payment ledger (event-sourced).
//!
//! Payments are append-only facts about money owed or collected. Once a payment is
//! completed its amount never changes and it never returns to pending; the only
//! further transition is a refund.

pub mod payment;

pub use payment::{
    CompletePayment, CreatePayment, FailPayment, Payment, PaymentCommand, PaymentCompleted,
    PaymentCreated, PaymentEvent, PaymentFailed, PaymentId, PaymentLinks, PaymentMethod,
    PaymentRefunded, PaymentStatus, PaymentType, RefundPayment,
};
