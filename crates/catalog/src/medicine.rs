use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicflow_core::{Aggregate, AggregateRoot, BusinessRef, DomainError};
use clinicflow_events::Event;

clinicflow_core::aggregate_id!(MedicineId, "Medicine identifier.");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MedicineCategory {
    Tablet,
    Capsule,
    Syrup,
    Injection,
    Ointment,
    Drops,
    Other,
}

/// Why a stock level changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockMovement {
    Restock,
    Correction,
    Dispense,
}

/// Aggregate root: Medicine (catalog entry + pharmacy stock).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Medicine {
    id: MedicineId,
    reference: Option<BusinessRef>,
    name: String,
    generic_name: Option<String>,
    category: MedicineCategory,
    strength: String,
    /// Price per unit in smallest currency unit.
    unit_price: u64,
    stock: i64,
    reorder_level: i64,
    active: bool,
    version: u64,
    created: bool,
}

impl Medicine {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: MedicineId) -> Self {
        Self {
            id,
            reference: None,
            name: String::new(),
            generic_name: None,
            category: MedicineCategory::Other,
            strength: String::new(),
            unit_price: 0,
            stock: 0,
            reorder_level: 0,
            active: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> MedicineId {
        self.id
    }

    pub fn reference(&self) -> Option<&BusinessRef> {
        self.reference.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generic_name(&self) -> Option<&str> {
        self.generic_name.as_deref()
    }

    pub fn category(&self) -> MedicineCategory {
        self.category
    }

    /// Display label, e.g. "Amoxicillin 500mg".
    pub fn label(&self) -> String {
        if self.strength.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.strength)
        }
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn stock(&self) -> i64 {
        self.stock
    }

    pub fn reorder_level(&self) -> i64 {
        self.reorder_level
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.reorder_level
    }

    /// Case-insensitive match on name, generic name or reference.
    pub fn matches(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&q)
            || self
                .generic_name
                .as_deref()
                .is_some_and(|g| g.to_lowercase().contains(&q))
            || self
                .reference
                .as_ref()
                .is_some_and(|r| r.as_str().to_lowercase().contains(&q))
    }
}

impl AggregateRoot for Medicine {
    type Id = MedicineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMedicine {
    pub medicine_id: MedicineId,
    pub reference: BusinessRef,
    pub name: String,
    pub generic_name: Option<String>,
    pub category: MedicineCategory,
    pub strength: String,
    pub unit_price: u64,
    pub initial_stock: i64,
    pub reorder_level: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RestockMedicine (goods received).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockMedicine {
    pub medicine_id: MedicineId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (stock-take correction, either sign).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub medicine_id: MedicineId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DispenseStock (units leave the shelf for a prescription).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenseStock {
    pub medicine_id: MedicineId,
    pub quantity: i64,
    pub prescription: BusinessRef,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepriceMedicine {
    pub medicine_id: MedicineId,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReorderLevel {
    pub medicine_id: MedicineId,
    pub reorder_level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateMedicine {
    pub medicine_id: MedicineId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MedicineCommand {
    Register(RegisterMedicine),
    Restock(RestockMedicine),
    Adjust(AdjustStock),
    Dispense(DispenseStock),
    Reprice(RepriceMedicine),
    SetReorderLevel(SetReorderLevel),
    Deactivate(DeactivateMedicine),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineRegistered {
    pub medicine_id: MedicineId,
    pub reference: BusinessRef,
    pub name: String,
    pub generic_name: Option<String>,
    pub category: MedicineCategory,
    pub strength: String,
    pub unit_price: u64,
    pub initial_stock: i64,
    pub reorder_level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub medicine_id: MedicineId,
    pub movement: StockMovement,
    pub delta: i64,
    pub new_stock: i64,
    /// Prescription the units were dispensed for, if any.
    pub prescription: Option<BusinessRef>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineRepriced {
    pub medicine_id: MedicineId,
    pub old_price: u64,
    pub new_price: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderLevelChanged {
    pub medicine_id: MedicineId,
    pub reorder_level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineDeactivated {
    pub medicine_id: MedicineId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MedicineEvent {
    Registered(MedicineRegistered),
    StockAdjusted(StockAdjusted),
    Repriced(MedicineRepriced),
    ReorderLevelChanged(ReorderLevelChanged),
    Deactivated(MedicineDeactivated),
}

impl Event for MedicineEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MedicineEvent::Registered(_) => "catalog.medicine.registered",
            MedicineEvent::StockAdjusted(_) => "catalog.medicine.stock_adjusted",
            MedicineEvent::Repriced(_) => "catalog.medicine.repriced",
            MedicineEvent::ReorderLevelChanged(_) => "catalog.medicine.reorder_level_changed",
            MedicineEvent::Deactivated(_) => "catalog.medicine.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MedicineEvent::Registered(e) => e.occurred_at,
            MedicineEvent::StockAdjusted(e) => e.occurred_at,
            MedicineEvent::Repriced(e) => e.occurred_at,
            MedicineEvent::ReorderLevelChanged(e) => e.occurred_at,
            MedicineEvent::Deactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Medicine {
    type Command = MedicineCommand;
    type Event = MedicineEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MedicineEvent::Registered(e) => {
                self.id = e.medicine_id;
                self.reference = Some(e.reference.clone());
                self.name = e.name.clone();
                self.generic_name = e.generic_name.clone();
                self.category = e.category;
                self.strength = e.strength.clone();
                self.unit_price = e.unit_price;
                self.stock = e.initial_stock;
                self.reorder_level = e.reorder_level;
                self.active = true;
                self.created = true;
            }
            MedicineEvent::StockAdjusted(e) => {
                self.stock = e.new_stock;
            }
            MedicineEvent::Repriced(e) => {
                self.unit_price = e.new_price;
            }
            MedicineEvent::ReorderLevelChanged(e) => {
                self.reorder_level = e.reorder_level;
            }
            MedicineEvent::Deactivated(_) => {
                self.active = false;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MedicineCommand::Register(cmd) => self.handle_register(cmd),
            MedicineCommand::Restock(cmd) => self.handle_restock(cmd),
            MedicineCommand::Adjust(cmd) => self.handle_adjust(cmd),
            MedicineCommand::Dispense(cmd) => self.handle_dispense(cmd),
            MedicineCommand::Reprice(cmd) => self.handle_reprice(cmd),
            MedicineCommand::SetReorderLevel(cmd) => self.handle_reorder_level(cmd),
            MedicineCommand::Deactivate(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl Medicine {
    fn ensure_exists(&self, medicine_id: MedicineId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("medicine {medicine_id}")));
        }
        if self.id != medicine_id {
            return Err(DomainError::invariant("medicine_id mismatch"));
        }
        Ok(())
    }

    fn stock_event(
        &self,
        movement: StockMovement,
        delta: i64,
        prescription: Option<BusinessRef>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<MedicineEvent>, DomainError> {
        let new_stock = self
            .stock
            .checked_add(delta)
            .ok_or_else(|| DomainError::invariant("stock overflow"))?;
        if new_stock < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }

        Ok(vec![MedicineEvent::StockAdjusted(StockAdjusted {
            medicine_id: self.id,
            movement,
            delta,
            new_stock,
            prescription,
            occurred_at,
        })])
    }

    fn handle_register(&self, cmd: &RegisterMedicine) -> Result<Vec<MedicineEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("medicine already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }
        if cmd.initial_stock < 0 {
            return Err(DomainError::validation("initial_stock cannot be negative"));
        }
        if cmd.reorder_level < 0 {
            return Err(DomainError::validation("reorder_level cannot be negative"));
        }

        Ok(vec![MedicineEvent::Registered(MedicineRegistered {
            medicine_id: cmd.medicine_id,
            reference: cmd.reference.clone(),
            name: cmd.name.trim().to_string(),
            generic_name: cmd.generic_name.clone(),
            category: cmd.category,
            strength: cmd.strength.trim().to_string(),
            unit_price: cmd.unit_price,
            initial_stock: cmd.initial_stock,
            reorder_level: cmd.reorder_level,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restock(&self, cmd: &RestockMedicine) -> Result<Vec<MedicineEvent>, DomainError> {
        self.ensure_exists(cmd.medicine_id)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("restock quantity must be positive"));
        }
        self.stock_event(StockMovement::Restock, cmd.quantity, None, cmd.occurred_at)
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<MedicineEvent>, DomainError> {
        self.ensure_exists(cmd.medicine_id)?;
        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        self.stock_event(StockMovement::Correction, cmd.delta, None, cmd.occurred_at)
    }

    fn handle_dispense(&self, cmd: &DispenseStock) -> Result<Vec<MedicineEvent>, DomainError> {
        self.ensure_exists(cmd.medicine_id)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("dispense quantity must be positive"));
        }
        if cmd.quantity > self.stock {
            return Err(DomainError::insufficient_stock(
                self.label(),
                self.stock,
                cmd.quantity,
            ));
        }
        self.stock_event(
            StockMovement::Dispense,
            -cmd.quantity,
            Some(cmd.prescription.clone()),
            cmd.occurred_at,
        )
    }

    fn handle_reprice(&self, cmd: &RepriceMedicine) -> Result<Vec<MedicineEvent>, DomainError> {
        self.ensure_exists(cmd.medicine_id)?;
        if cmd.unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }
        if cmd.unit_price == self.unit_price {
            return Err(DomainError::validation("price is unchanged"));
        }

        Ok(vec![MedicineEvent::Repriced(MedicineRepriced {
            medicine_id: cmd.medicine_id,
            old_price: self.unit_price,
            new_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reorder_level(
        &self,
        cmd: &SetReorderLevel,
    ) -> Result<Vec<MedicineEvent>, DomainError> {
        self.ensure_exists(cmd.medicine_id)?;
        if cmd.reorder_level < 0 {
            return Err(DomainError::validation("reorder_level cannot be negative"));
        }

        Ok(vec![MedicineEvent::ReorderLevelChanged(ReorderLevelChanged {
            medicine_id: cmd.medicine_id,
            reorder_level: cmd.reorder_level,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(
        &self,
        cmd: &DeactivateMedicine,
    ) -> Result<Vec<MedicineEvent>, DomainError> {
        self.ensure_exists(cmd.medicine_id)?;
        if !self.active {
            return Err(DomainError::conflict("medicine is already inactive"));
        }

        Ok(vec![MedicineEvent::Deactivated(MedicineDeactivated {
            medicine_id: cmd.medicine_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicflow_core::ReferenceKind;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn prescription_ref() -> BusinessRef {
        BusinessRef::generate(ReferenceKind::Prescription, test_time())
    }

    fn registered(stock: i64) -> Medicine {
        let id = MedicineId::generate();
        let mut m = Medicine::empty(id);
        let events = m
            .handle(&MedicineCommand::Register(RegisterMedicine {
                medicine_id: id,
                reference: BusinessRef::generate(ReferenceKind::Medicine, test_time()),
                name: "Amoxil".to_string(),
                generic_name: Some("Amoxicillin".to_string()),
                category: MedicineCategory::Capsule,
                strength: "500mg".to_string(),
                unit_price: 20,
                initial_stock: stock,
                reorder_level: 10,
                occurred_at: test_time(),
            }))
            .unwrap();
        m.apply(&events[0]);
        m
    }

    #[test]
    fn register_sets_initial_stock() {
        let m = registered(50);
        assert_eq!(m.stock(), 50);
        assert!(m.is_active());
        assert!(!m.is_low_stock());
        assert!(m.reference().is_some());
    }

    #[test]
    fn dispense_more_than_stock_names_the_medicine() {
        let m = registered(2);
        let err = m
            .handle(&MedicineCommand::Dispense(DispenseStock {
                medicine_id: m.id_typed(),
                quantity: 5,
                prescription: prescription_ref(),
                occurred_at: test_time(),
            }))
            .unwrap_err();

        match err {
            DomainError::InsufficientStock {
                medicine,
                available,
                requested,
            } => {
                assert_eq!(medicine, "Amoxil 500mg");
                assert_eq!(available, 2);
                assert_eq!(requested, 5);
            }
            other => panic!("Expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(m.stock(), 2);
    }

    #[test]
    fn dispense_decrements_and_flags_low_stock() {
        let mut m = registered(12);
        let events = m
            .handle(&MedicineCommand::Dispense(DispenseStock {
                medicine_id: m.id_typed(),
                quantity: 3,
                prescription: prescription_ref(),
                occurred_at: test_time(),
            }))
            .unwrap();
        m.apply(&events[0]);

        assert_eq!(m.stock(), 9);
        assert!(m.is_low_stock());
    }

    #[test]
    fn correction_cannot_drive_stock_negative() {
        let m = registered(1);
        let err = m
            .handle(&MedicineCommand::Adjust(AdjustStock {
                medicine_id: m.id_typed(),
                delta: -2,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("negative") => {}
            other => panic!("Expected InvariantViolation, got {other:?}"),
        }
    }

    #[test]
    fn search_matches_generic_name_and_reference() {
        let m = registered(5);
        assert!(m.matches("amoxi"));
        assert!(m.matches("MED"));
        assert!(!m.matches("ibuprofen"));
    }

    #[test]
    fn unknown_medicine_is_not_found() {
        let m = Medicine::empty(MedicineId::generate());
        let err = m
            .handle(&MedicineCommand::Restock(RestockMedicine {
                medicine_id: m.id_typed(),
                quantity: 5,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever mix of restocks, corrections and dispenses is attempted,
        /// accepted commands never leave stock below zero.
        #[test]
        fn stock_never_goes_negative(
            initial in 0i64..100,
            moves in prop::collection::vec((0u8..3, 1i64..60), 1..40)
        ) {
            let mut m = registered(initial);

            for (kind, qty) in moves {
                let cmd = match kind {
                    0 => MedicineCommand::Restock(RestockMedicine {
                        medicine_id: m.id_typed(),
                        quantity: qty,
                        occurred_at: test_time(),
                    }),
                    1 => MedicineCommand::Adjust(AdjustStock {
                        medicine_id: m.id_typed(),
                        delta: -qty,
                        occurred_at: test_time(),
                    }),
                    _ => MedicineCommand::Dispense(DispenseStock {
                        medicine_id: m.id_typed(),
                        quantity: qty,
                        prescription: prescription_ref(),
                        occurred_at: test_time(),
                    }),
                };

                let before = m.stock();
                match m.handle(&cmd) {
                    Ok(events) => {
                        for e in &events {
                            m.apply(e);
                        }
                    }
                    Err(_) => prop_assert_eq!(m.stock(), before),
                }
                prop_assert!(m.stock() >= 0);
            }
        }
    }
}
