//! Catalog maintenance and lookups.

use clinicflow_auth::{Action, Principal};
use clinicflow_catalog::{
    AdjustStock, DeactivateLabTestType, DeactivateMedicine, DefineLabTestType, LabTestType,
    LabTestTypeCommand, LabTestTypeId, Medicine, MedicineCommand, MedicineId, RegisterMedicine,
    RepriceLabTestType, RepriceMedicine, RestockMedicine, SetReorderLevel,
};
use clinicflow_core::{DomainError, ReferenceKind};
use clinicflow_events::NotificationSink;

use super::{ClinicWorkflow, NewMedicine};
use crate::error::WorkflowError;

impl<N> ClinicWorkflow<N>
where
    N: NotificationSink,
{
    #[tracing::instrument(skip(self, name, description), fields(staff_id = %actor.staff_id))]
    pub fn define_lab_test(
        &self,
        actor: &Principal,
        name: impl Into<String>,
        description: impl Into<String>,
        price: u64,
        turnaround_hours: u32,
    ) -> Result<LabTestType, WorkflowError> {
        self.authorize(actor, Action::ManageLabCatalog)?;
        let at = self.now();
        let name = name.into();
        let description = description.into();

        self.run("define_lab_test", actor, |uow| {
            let taken = uow
                .state()
                .lab_test_types()
                .any(|t| t.name().eq_ignore_ascii_case(name.trim()));
            if taken {
                return Err(DomainError::conflict(format!(
                    "lab test {} is already defined",
                    name.trim()
                ))
                .into());
            }

            let lab_test_type_id = LabTestTypeId::generate();
            uow.execute::<LabTestType>(
                lab_test_type_id,
                &LabTestTypeCommand::Define(DefineLabTestType {
                    lab_test_type_id,
                    name: name.trim().to_string(),
                    description,
                    price,
                    turnaround_hours,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&lab_test_type_id)?)
        })
    }

    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn reprice_lab_test(
        &self,
        actor: &Principal,
        lab_test_type_id: LabTestTypeId,
        price: u64,
    ) -> Result<LabTestType, WorkflowError> {
        self.authorize(actor, Action::ManageLabCatalog)?;
        let at = self.now();
        self.run("reprice_lab_test", actor, |uow| {
            uow.execute::<LabTestType>(
                lab_test_type_id,
                &LabTestTypeCommand::Reprice(RepriceLabTestType {
                    lab_test_type_id,
                    price,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&lab_test_type_id)?)
        })
    }

    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn deactivate_lab_test(
        &self,
        actor: &Principal,
        lab_test_type_id: LabTestTypeId,
    ) -> Result<LabTestType, WorkflowError> {
        self.authorize(actor, Action::ManageLabCatalog)?;
        let at = self.now();
        self.run("deactivate_lab_test", actor, |uow| {
            uow.execute::<LabTestType>(
                lab_test_type_id,
                &LabTestTypeCommand::Deactivate(DeactivateLabTestType {
                    lab_test_type_id,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&lab_test_type_id)?)
        })
    }

    /// Active lab tests, cheapest first.
    pub fn available_lab_tests(&self) -> Vec<LabTestType> {
        let mut tests: Vec<LabTestType> = self
            .store
            .read(|s| s.lab_test_types().filter(|t| t.is_active()).cloned().collect())
            .unwrap_or_default();
        tests.sort_by(|a, b| a.price().cmp(&b.price()).then_with(|| a.name().cmp(b.name())));
        tests
    }

    #[tracing::instrument(skip(self, medicine), fields(staff_id = %actor.staff_id, name = %medicine.name))]
    pub fn register_medicine(&self, actor: &Principal, medicine: NewMedicine) -> Result<Medicine, WorkflowError> {
        self.authorize(actor, Action::ManageMedicineStock)?;
        let at = self.now();
        let reorder_level = medicine
            .reorder_level
            .unwrap_or(self.config.default_reorder_level);

        self.run("register_medicine", actor, |uow| {
            let medicine_id = MedicineId::generate();
            let reference = uow.issue_ref(ReferenceKind::Medicine, at)?;
            uow.execute::<Medicine>(
                medicine_id,
                &MedicineCommand::Register(RegisterMedicine {
                    medicine_id,
                    reference,
                    name: medicine.name,
                    generic_name: medicine.generic_name,
                    category: medicine.category,
                    strength: medicine.strength,
                    unit_price: medicine.unit_price,
                    initial_stock: medicine.initial_stock,
                    reorder_level,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&medicine_id)?)
        })
    }

    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn restock_medicine(
        &self,
        actor: &Principal,
        medicine_id: MedicineId,
        quantity: i64,
    ) -> Result<Medicine, WorkflowError> {
        self.authorize(actor, Action::ManageMedicineStock)?;
        let at = self.now();
        self.run("restock_medicine", actor, |uow| {
            uow.execute::<Medicine>(
                medicine_id,
                &MedicineCommand::Restock(RestockMedicine {
                    medicine_id,
                    quantity,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&medicine_id)?)
        })
    }

    /// Stock-take correction. The shelf count never goes below zero.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn adjust_medicine_stock(
        &self,
        actor: &Principal,
        medicine_id: MedicineId,
        delta: i64,
    ) -> Result<Medicine, WorkflowError> {
        self.authorize(actor, Action::ManageMedicineStock)?;
        let at = self.now();
        self.run("adjust_medicine_stock", actor, |uow| {
            uow.execute::<Medicine>(
                medicine_id,
                &MedicineCommand::Adjust(AdjustStock {
                    medicine_id,
                    delta,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&medicine_id)?)
        })
    }

    /// New unit price. Prescriptions already written keep the price they captured.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn reprice_medicine(
        &self,
        actor: &Principal,
        medicine_id: MedicineId,
        unit_price: u64,
    ) -> Result<Medicine, WorkflowError> {
        self.authorize(actor, Action::ManageMedicineStock)?;
        let at = self.now();
        self.run("reprice_medicine", actor, |uow| {
            uow.execute::<Medicine>(
                medicine_id,
                &MedicineCommand::Reprice(RepriceMedicine {
                    medicine_id,
                    unit_price,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&medicine_id)?)
        })
    }

    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn set_reorder_level(
        &self,
        actor: &Principal,
        medicine_id: MedicineId,
        reorder_level: i64,
    ) -> Result<Medicine, WorkflowError> {
        self.authorize(actor, Action::ManageMedicineStock)?;
        let at = self.now();
        self.run("set_reorder_level", actor, |uow| {
            uow.execute::<Medicine>(
                medicine_id,
                &MedicineCommand::SetReorderLevel(SetReorderLevel {
                    medicine_id,
                    reorder_level,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&medicine_id)?)
        })
    }

    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn deactivate_medicine(&self, actor: &Principal, medicine_id: MedicineId) -> Result<Medicine, WorkflowError> {
        self.authorize(actor, Action::ManageMedicineStock)?;
        let at = self.now();
        self.run("deactivate_medicine", actor, |uow| {
            uow.execute::<Medicine>(
                medicine_id,
                &MedicineCommand::Deactivate(DeactivateMedicine {
                    medicine_id,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&medicine_id)?)
        })
    }

    /// Dispensable medicines (active, in stock) matching name, generic name or
    /// reference, sorted by name.
    pub fn search_medicines(&self, query: &str) -> Vec<Medicine> {
        let mut found: Vec<Medicine> = self
            .store
            .read(|s| {
                s.medicines()
                    .filter(|m| m.is_active() && m.stock() > 0 && m.matches(query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by(|a, b| a.name().cmp(b.name()));
        found
    }
}
