//! Catalog domain module: priced, referenceable lab test types and medicines
//! (medicines also carry pharmacy stock).

pub mod lab_test;
pub mod medicine;

pub use lab_test::{
    DeactivateLabTestType, DefineLabTestType, LabTestType, LabTestTypeCommand,
    LabTestTypeDeactivated, LabTestTypeDefined, LabTestTypeEvent, LabTestTypeId,
    LabTestTypeRepriced, RepriceLabTestType,
};
pub use medicine::{
    AdjustStock, DeactivateMedicine, DispenseStock, Medicine, MedicineCategory, MedicineCommand,
    MedicineDeactivated, MedicineEvent, MedicineId, MedicineRegistered, MedicineRepriced,
    RegisterMedicine, ReorderLevelChanged, RepriceMedicine, RestockMedicine, SetReorderLevel,
    StockAdjusted, StockMovement,
};
