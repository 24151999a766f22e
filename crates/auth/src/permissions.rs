use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::Role;

/// A gated workflow action.
///
/// One variant per operation entry point that needs a role check. Read-only lookups
/// that every staff member may perform are not listed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    RegisterPatient,
    UpdatePatient,
    OpenVisit,
    AssignDoctor,
    RecordExamination,
    RecordDiagnosis,
    RequestLabTest,
    ProcessPayment,
    AssignLabTechnician,
    SubmitLabResult,
    CancelLabRequest,
    ReviewLabResults,
    CreatePrescription,
    CancelPrescription,
    ManageDispenseCart,
    DispenseMedicine,
    RefundPayment,
    DeletePayment,
    ManageLabCatalog,
    ManageMedicineStock,
    ViewLabWorklist,
    ViewReports,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::RegisterPatient => "patient.register",
            Action::UpdatePatient => "patient.update",
            Action::OpenVisit => "visit.open",
            Action::AssignDoctor => "visit.assign_doctor",
            Action::RecordExamination => "visit.record_examination",
            Action::RecordDiagnosis => "visit.record_diagnosis",
            Action::RequestLabTest => "lab.request",
            Action::ProcessPayment => "payment.process",
            Action::AssignLabTechnician => "lab.assign_technician",
            Action::SubmitLabResult => "lab.submit_result",
            Action::CancelLabRequest => "lab.cancel",
            Action::ReviewLabResults => "lab.review_results",
            Action::CreatePrescription => "prescription.create",
            Action::CancelPrescription => "prescription.cancel",
            Action::ManageDispenseCart => "pharmacy.cart",
            Action::DispenseMedicine => "pharmacy.dispense",
            Action::RefundPayment => "payment.refund",
            Action::DeletePayment => "payment.delete",
            Action::ManageLabCatalog => "catalog.lab_tests",
            Action::ManageMedicineStock => "catalog.medicines",
            Action::ViewLabWorklist => "lab.worklist",
            Action::ViewReports => "reports.view",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role → allowed actions.
///
/// There is no wildcard: an admin may only do what the table lists for `Admin`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityTable {
    grants: HashMap<Role, BTreeSet<Action>>,
}

impl CapabilityTable {
    /// An empty table (denies everything).
    pub fn empty() -> Self {
        Self::default()
    }

    /// The clinic's standard role matrix.
    pub fn standard() -> Self {
        use Action::*;
        use Role::*;

        let mut table = Self::empty();
        let matrix: &[(Action, &[Role])] = &[
            (RegisterPatient, &[Receptionist, Admin]),
            (UpdatePatient, &[Receptionist, Admin, Doctor, Nurse]),
            (OpenVisit, &[Receptionist, Admin]),
            (AssignDoctor, &[Receptionist, Admin, Nurse]),
            (RecordExamination, &[Doctor, Nurse]),
            (RecordDiagnosis, &[Doctor]),
            (RequestLabTest, &[Doctor]),
            (ProcessPayment, &[Cashier, Receptionist, Admin]),
            (AssignLabTechnician, &[Cashier, Receptionist, Admin, LabTech]),
            (SubmitLabResult, &[LabTech]),
            (CancelLabRequest, &[Doctor, Admin]),
            (ReviewLabResults, &[Doctor]),
            (CreatePrescription, &[Doctor]),
            (CancelPrescription, &[Doctor, Admin]),
            (ManageDispenseCart, &[Pharmacist]),
            (DispenseMedicine, &[Pharmacist]),
            (RefundPayment, &[Cashier, Admin]),
            (DeletePayment, &[Admin]),
            (ManageLabCatalog, &[Admin]),
            (ManageMedicineStock, &[Admin, Pharmacist]),
            (ViewLabWorklist, &[LabTech, Doctor, Admin]),
            (ViewReports, &[Admin, Cashier, Receptionist]),
        ];

        for (action, roles) in matrix {
            for role in *roles {
                table.grant(*role, *action);
            }
        }
        table
    }

    pub fn grant(&mut self, role: Role, action: Action) {
        self.grants.entry(role).or_default().insert(action);
    }

    pub fn revoke(&mut self, role: Role, action: Action) {
        if let Some(actions) = self.grants.get_mut(&role) {
            actions.remove(&action);
        }
    }

    pub fn allows(&self, role: Role, action: Action) -> bool {
        self.grants
            .get(&role)
            .is_some_and(|actions| actions.contains(&action))
    }

    /// Roles allowed to perform `action`, in declaration order.
    pub fn roles_for(&self, action: Action) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|role| self.allows(*role, action))
            .collect()
    }
}
