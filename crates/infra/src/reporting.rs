//! Read-only reports over the committed clinic state.
//!
//! Every query runs against one consistent snapshot and never mutates it. A
//! poisoned store degrades to empty results.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use clinicflow_auth::{Principal, Role};
use clinicflow_billing::{Payment, PaymentMethod, PaymentStatus, PaymentType};
use clinicflow_catalog::Medicine;
use clinicflow_clinical::{
    LabRequestStatus, LabTestRequest, PatientId, Prescription, PrescriptionStatus, Visit,
    VisitStatus,
};
use clinicflow_core::DomainError;

use crate::store::{ClinicState, InMemoryClinicStore};

/// Inclusive range of calendar days (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, DomainError> {
        if from > to {
            return Err(DomainError::validation("date range starts after it ends"));
        }
        Ok(Self { from, to })
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        self.from <= day && day <= self.to
    }

    fn contains_opt(&self, at: Option<DateTime<Utc>>) -> bool {
        at.is_some_and(|at| self.contains(at))
    }
}

/// Ledger filter. Unset fields match everything; the range applies to `created_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFilter {
    pub range: Option<DateRange>,
    pub status: Option<PaymentStatus>,
    pub payment_type: Option<PaymentType>,
    pub patient_id: Option<PatientId>,
}

impl PaymentFilter {
    fn matches(&self, payment: &Payment) -> bool {
        self.range.is_none_or(|r| r.contains_opt(payment.created_at()))
            && self.status.is_none_or(|s| payment.status() == s)
            && self.payment_type.is_none_or(|t| payment.payment_type() == t)
            && self.patient_id.is_none_or(|p| payment.patient_id() == Some(p))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSummary {
    /// Collected in the range (by `completed_at`); refunded payments excluded.
    pub completed_total: u64,
    pub completed_count: usize,
    /// Still owed, raised in the range (by `created_at`).
    pub pending_total: u64,
    pub pending_count: usize,
    /// Refunded in the range (by `refunded_at`).
    pub refunded_total: u64,
    pub refunded_count: usize,
    pub by_type: BTreeMap<PaymentType, u64>,
    pub by_method: BTreeMap<PaymentMethod, u64>,
}

/// Read-only reporting handle. Obtained from `ClinicWorkflow::reporting`.
#[derive(Debug, Clone, Copy)]
pub struct Reporting<'s> {
    store: &'s InMemoryClinicStore,
}

impl<'s> Reporting<'s> {
    pub(crate) fn new(store: &'s InMemoryClinicStore) -> Self {
        Self { store }
    }

    fn query<T: Default>(&self, f: impl FnOnce(&ClinicState) -> T) -> T {
        self.store.read(f).unwrap_or_default()
    }

    /// Matching payments, oldest first.
    pub fn payments(&self, filter: &PaymentFilter) -> Vec<Payment> {
        let mut rows: Vec<Payment> =
            self.query(|s| s.payments().filter(|p| filter.matches(p)).cloned().collect());
        rows.sort_by_key(|p| p.created_at());
        rows
    }

    /// Single pass over the ledger.
    pub fn revenue_summary(&self, range: &DateRange) -> RevenueSummary {
        self.query(|s| {
            let mut summary = RevenueSummary::default();
            for payment in s.payments() {
                match payment.status() {
                    PaymentStatus::Completed if range.contains_opt(payment.completed_at()) => {
                        summary.completed_total = summary.completed_total.saturating_add(payment.amount());
                        summary.completed_count += 1;
                        let by_type = summary.by_type.entry(payment.payment_type()).or_default();
                        *by_type = by_type.saturating_add(payment.amount());
                        let by_method = summary.by_method.entry(payment.method()).or_default();
                        *by_method = by_method.saturating_add(payment.amount());
                    }
                    PaymentStatus::Pending if range.contains_opt(payment.created_at()) => {
                        summary.pending_total = summary.pending_total.saturating_add(payment.amount());
                        summary.pending_count += 1;
                    }
                    PaymentStatus::Refunded if range.contains_opt(payment.refunded_at()) => {
                        summary.refunded_total = summary.refunded_total.saturating_add(payment.amount());
                        summary.refunded_count += 1;
                    }
                    _ => {}
                }
            }
            summary
        })
    }

    /// Visits registered in the range, optionally in one status.
    pub fn visits(&self, range: &DateRange, status: Option<VisitStatus>) -> Vec<Visit> {
        let mut rows: Vec<Visit> = self.query(|s| {
            s.visits()
                .filter(|v| range.contains_opt(v.registered_at()))
                .filter(|v| status.is_none_or(|st| v.status() == st))
                .cloned()
                .collect()
        });
        rows.sort_by_key(|v| v.registered_at());
        rows
    }

    pub fn lab_requests(&self, range: &DateRange, status: Option<LabRequestStatus>) -> Vec<LabTestRequest> {
        let mut rows: Vec<LabTestRequest> = self.query(|s| {
            s.lab_requests()
                .filter(|l| range.contains_opt(l.requested_at()))
                .filter(|l| status.is_none_or(|st| l.status() == st))
                .cloned()
                .collect()
        });
        rows.sort_by_key(|l| l.requested_at());
        rows
    }

    pub fn prescriptions(&self, range: &DateRange, status: Option<PrescriptionStatus>) -> Vec<Prescription> {
        let mut rows: Vec<Prescription> = self.query(|s| {
            s.prescriptions()
                .filter(|p| range.contains_opt(p.created_at()))
                .filter(|p| status.is_none_or(|st| p.status() == st))
                .cloned()
                .collect()
        });
        rows.sort_by_key(|p| p.created_at());
        rows
    }

    /// Prescriptions prepared by the pharmacy and waiting at the cashier.
    pub fn pending_medicine_payments(&self) -> Vec<Prescription> {
        let mut rows: Vec<Prescription> = self.query(|s| {
            s.prescriptions()
                .filter(|p| p.status() == PrescriptionStatus::Ready)
                .cloned()
                .collect()
        });
        rows.sort_by_key(|p| p.ready_at());
        rows
    }

    /// Active medicines at or below their reorder level, lowest stock first.
    pub fn low_stock_medicines(&self) -> Vec<Medicine> {
        let mut rows: Vec<Medicine> = self.query(|s| {
            s.medicines()
                .filter(|m| m.is_active() && m.is_low_stock())
                .cloned()
                .collect()
        });
        rows.sort_by(|a, b| a.stock().cmp(&b.stock()).then_with(|| a.name().cmp(b.name())));
        rows
    }
}

/// Lab requests a staff member should see, oldest first.
pub fn lab_worklist(state: &ClinicState, viewer: &Principal) -> Vec<LabTestRequest> {
    let mut rows: Vec<LabTestRequest> = state
        .lab_requests()
        .filter(|l| match viewer.role {
            Role::LabTech => l.assigned_to() == Some(viewer.staff_id),
            Role::Doctor => l.requested_by() == Some(viewer.staff_id),
            _ => true,
        })
        .cloned()
        .collect();
    rows.sort_by_key(|l| l.requested_at());
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn at(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, 10, 30, 0).unwrap()
    }

    #[test]
    fn date_range_is_inclusive_on_both_ends() {
        let range = DateRange::new(day(2), day(4)).unwrap();
        assert!(!range.contains(at(1)));
        assert!(range.contains(at(2)));
        assert!(range.contains(at(4)));
        assert!(!range.contains(at(5)));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = DateRange::new(day(5), day(1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn single_day_range_contains_only_that_day() {
        let range = DateRange::single_day(day(3));
        assert!(range.contains(at(3)));
        assert!(!range.contains(at(2)));
        assert!(!range.contains_opt(None));
    }

    #[test]
    fn empty_store_reports_are_empty() {
        let store = InMemoryClinicStore::new();
        let reporting = Reporting::new(&store);
        let range = DateRange::single_day(day(3));

        assert_eq!(reporting.revenue_summary(&range), RevenueSummary::default());
        assert!(reporting.payments(&PaymentFilter::default()).is_empty());
        assert!(reporting.visits(&range, None).is_empty());
        assert!(reporting.low_stock_medicines().is_empty());
    }
}
