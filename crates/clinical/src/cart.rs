//! Pharmacist-scoped dispense carts.
//!
//! A cart stages the quantities a pharmacist is about to hand out for one
//! prescription. Only one cart per (pharmacist, prescription) may be active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicflow_catalog::MedicineId;
use clinicflow_core::{Aggregate, AggregateRoot, DomainError, StaffId};
use clinicflow_events::Event;

use crate::prescription::{PrescriptionId, line_total};

clinicflow_core::aggregate_id!(DispenseCartId, "Dispense cart identifier.");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub quantity: i64,
    pub unit_price: u64,
    pub subtotal: u64,
}

impl CartItem {
    pub fn new(
        medicine_id: MedicineId,
        medicine_name: impl Into<String>,
        quantity: i64,
        unit_price: u64,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            medicine_id,
            medicine_name: medicine_name.into(),
            quantity,
            unit_price,
            subtotal: line_total(unit_price, quantity)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartClosure {
    Dispensed,
    /// A newer active cart for the same pharmacist and prescription won.
    Superseded,
    PrescriptionCancelled,
}

#[derive(Debug)]
enum CartState {
    Closed,
}

/// Aggregate root: DispenseCart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispenseCart {
    id: DispenseCartId,
    pharmacist: Option<StaffId>,
    prescription_id: Option<PrescriptionId>,
    items: Vec<CartItem>,
    total_amount: u64,
    active: bool,
    /// Store-assigned creation order; larger is newer.
    sequence: u64,
    created_at: Option<DateTime<Utc>>,
    closed_as: Option<CartClosure>,
    version: u64,
    created: bool,
}

impl DispenseCart {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: DispenseCartId) -> Self {
        Self {
            id,
            pharmacist: None,
            prescription_id: None,
            items: Vec::new(),
            total_amount: 0,
            active: false,
            sequence: 0,
            created_at: None,
            closed_as: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DispenseCartId {
        self.id
    }

    pub fn pharmacist(&self) -> Option<StaffId> {
        self.pharmacist
    }

    pub fn prescription_id(&self) -> Option<PrescriptionId> {
        self.prescription_id
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn item(&self, medicine_id: MedicineId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.medicine_id == medicine_id)
    }

    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn closed_as(&self) -> Option<CartClosure> {
        self.closed_as
    }

    pub fn belongs_to(&self, pharmacist: StaffId, prescription_id: PrescriptionId) -> bool {
        self.pharmacist == Some(pharmacist) && self.prescription_id == Some(prescription_id)
    }

    fn recompute_total(&mut self) {
        self.total_amount = self.items.iter().map(|i| i.subtotal).sum();
    }
}

impl AggregateRoot for DispenseCart {
    type Id = DispenseCartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCart {
    pub cart_id: DispenseCartId,
    pub pharmacist: StaffId,
    pub prescription_id: PrescriptionId,
    pub items: Vec<CartItem>,
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StageItem (add a medicine or more of one already staged).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageItem {
    pub cart_id: DispenseCartId,
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub quantity: i64,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetItemQuantity. Zero or less removes the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetItemQuantity {
    pub cart_id: DispenseCartId,
    pub medicine_id: MedicineId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub cart_id: DispenseCartId,
    pub medicine_id: MedicineId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseCart {
    pub cart_id: DispenseCartId,
    pub closure: CartClosure,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartCommand {
    Open(OpenCart),
    StageItem(StageItem),
    SetItemQuantity(SetItemQuantity),
    RemoveItem(RemoveItem),
    Close(CloseCart),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartOpened {
    pub cart_id: DispenseCartId,
    pub pharmacist: StaffId,
    pub prescription_id: PrescriptionId,
    pub items: Vec<CartItem>,
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CartItemSet. `item` is the resulting line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItemSet {
    pub cart_id: DispenseCartId,
    pub item: CartItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItemRemoved {
    pub cart_id: DispenseCartId,
    pub medicine_id: MedicineId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartClosed {
    pub cart_id: DispenseCartId,
    pub closure: CartClosure,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartEvent {
    Opened(CartOpened),
    ItemSet(CartItemSet),
    ItemRemoved(CartItemRemoved),
    Closed(CartClosed),
}

impl Event for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::Opened(_) => "pharmacy.cart.opened",
            CartEvent::ItemSet(_) => "pharmacy.cart.item_set",
            CartEvent::ItemRemoved(_) => "pharmacy.cart.item_removed",
            CartEvent::Closed(_) => "pharmacy.cart.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::Opened(e) => e.occurred_at,
            CartEvent::ItemSet(e) => e.occurred_at,
            CartEvent::ItemRemoved(e) => e.occurred_at,
            CartEvent::Closed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DispenseCart {
    type Command = CartCommand;
    type Event = CartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CartEvent::Opened(e) => {
                self.id = e.cart_id;
                self.pharmacist = Some(e.pharmacist);
                self.prescription_id = Some(e.prescription_id);
                self.items = e.items.clone();
                self.sequence = e.sequence;
                self.active = true;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            CartEvent::ItemSet(e) => {
                match self
                    .items
                    .iter_mut()
                    .find(|i| i.medicine_id == e.item.medicine_id)
                {
                    Some(existing) => *existing = e.item.clone(),
                    None => self.items.push(e.item.clone()),
                }
            }
            CartEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.medicine_id != e.medicine_id);
            }
            CartEvent::Closed(e) => {
                self.active = false;
                self.closed_as = Some(e.closure);
            }
        }
        self.recompute_total();

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::Open(cmd) => self.handle_open(cmd),
            CartCommand::StageItem(cmd) => self.handle_stage(cmd),
            CartCommand::SetItemQuantity(cmd) => self.handle_set_quantity(cmd),
            CartCommand::RemoveItem(cmd) => {
                self.ensure_active(cmd.cart_id)?;
                if self.item(cmd.medicine_id).is_none() {
                    return Err(DomainError::not_found("cart item"));
                }
                Ok(vec![CartEvent::ItemRemoved(CartItemRemoved {
                    cart_id: cmd.cart_id,
                    medicine_id: cmd.medicine_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            CartCommand::Close(cmd) => {
                self.ensure_active(cmd.cart_id)?;
                Ok(vec![CartEvent::Closed(CartClosed {
                    cart_id: cmd.cart_id,
                    closure: cmd.closure,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl DispenseCart {
    fn ensure_active(&self, cart_id: DispenseCartId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("dispense cart {cart_id}")));
        }
        if self.id != cart_id {
            return Err(DomainError::invariant("cart_id mismatch"));
        }
        if !self.active {
            return Err(DomainError::invalid_transition(
                "dispense cart",
                CartState::Closed,
                "modify",
            ));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenCart) -> Result<Vec<CartEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("dispense cart already exists"));
        }
        for item in &cmd.items {
            if item.subtotal != line_total(item.unit_price, item.quantity)? {
                return Err(DomainError::invariant("cart item subtotal mismatch"));
            }
        }

        Ok(vec![CartEvent::Opened(CartOpened {
            cart_id: cmd.cart_id,
            pharmacist: cmd.pharmacist,
            prescription_id: cmd.prescription_id,
            items: cmd.items.clone(),
            sequence: cmd.sequence,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_stage(&self, cmd: &StageItem) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_active(cmd.cart_id)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let item = match self.item(cmd.medicine_id) {
            Some(existing) => {
                let quantity = existing
                    .quantity
                    .checked_add(cmd.quantity)
                    .ok_or_else(|| DomainError::invariant("quantity overflow"))?;
                CartItem::new(
                    existing.medicine_id,
                    existing.medicine_name.clone(),
                    quantity,
                    existing.unit_price,
                )?
            }
            None => CartItem::new(
                cmd.medicine_id,
                cmd.medicine_name.clone(),
                cmd.quantity,
                cmd.unit_price,
            )?,
        };

        Ok(vec![CartEvent::ItemSet(CartItemSet {
            cart_id: cmd.cart_id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_quantity(&self, cmd: &SetItemQuantity) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_active(cmd.cart_id)?;
        let Some(existing) = self.item(cmd.medicine_id) else {
            return Err(DomainError::not_found("cart item"));
        };

        if cmd.quantity <= 0 {
            return Ok(vec![CartEvent::ItemRemoved(CartItemRemoved {
                cart_id: cmd.cart_id,
                medicine_id: cmd.medicine_id,
                occurred_at: cmd.occurred_at,
            })]);
        }

        Ok(vec![CartEvent::ItemSet(CartItemSet {
            cart_id: cmd.cart_id,
            item: CartItem::new(
                existing.medicine_id,
                existing.medicine_name.clone(),
                cmd.quantity,
                existing.unit_price,
            )?,
            occurred_at: cmd.occurred_at,
        })])
    }
}

/// Outcome of reconciling the active carts of one (pharmacist, prescription) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartResolution {
    pub keep: Option<DispenseCartId>,
    pub superseded: Vec<DispenseCartId>,
}

/// Pick the cart to keep among active carts: the most recently created one (highest
/// sequence) wins, every other active cart is superseded. Inactive carts are ignored.
pub fn resolve_active_carts<'a, I>(carts: I) -> CartResolution
where
    I: IntoIterator<Item = &'a DispenseCart>,
{
    let mut active: Vec<&DispenseCart> = carts.into_iter().filter(|c| c.is_active()).collect();
    active.sort_by_key(|c| std::cmp::Reverse(c.sequence()));

    let mut iter = active.into_iter();
    CartResolution {
        keep: iter.next().map(|c| c.id_typed()),
        superseded: iter.map(|c| c.id_typed()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn open_cart(
        pharmacist: StaffId,
        prescription_id: PrescriptionId,
        items: Vec<CartItem>,
        sequence: u64,
    ) -> DispenseCart {
        let id = DispenseCartId::generate();
        let mut cart = DispenseCart::empty(id);
        let events = cart
            .handle(&CartCommand::Open(OpenCart {
                cart_id: id,
                pharmacist,
                prescription_id,
                items,
                sequence,
                occurred_at: test_time(),
            }))
            .unwrap();
        cart.apply(&events[0]);
        cart
    }

    fn seeded(medicines: &[(MedicineId, i64, u64)]) -> DispenseCart {
        let items = medicines
            .iter()
            .map(|(id, qty, price)| CartItem::new(*id, "med", *qty, *price).unwrap())
            .collect();
        open_cart(StaffId::new(), PrescriptionId::generate(), items, 1)
    }

    #[test]
    fn opened_cart_totals_seeded_items() {
        let cart = seeded(&[
            (MedicineId::generate(), 3, 20),
            (MedicineId::generate(), 1, 30),
        ]);
        assert!(cart.is_active());
        assert_eq!(cart.total_amount(), 90);
    }

    #[test]
    fn setting_quantity_to_zero_removes_the_line() {
        let med = MedicineId::generate();
        let mut cart = seeded(&[(med, 3, 20)]);

        let events = cart
            .handle(&CartCommand::SetItemQuantity(SetItemQuantity {
                cart_id: cart.id_typed(),
                medicine_id: med,
                quantity: 0,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(matches!(events[0], CartEvent::ItemRemoved(_)));
        cart.apply(&events[0]);

        assert!(cart.items().is_empty());
        assert_eq!(cart.total_amount(), 0);
    }

    #[test]
    fn closed_cart_rejects_changes() {
        let med = MedicineId::generate();
        let mut cart = seeded(&[(med, 3, 20)]);
        let events = cart
            .handle(&CartCommand::Close(CloseCart {
                cart_id: cart.id_typed(),
                closure: CartClosure::Dispensed,
                occurred_at: test_time(),
            }))
            .unwrap();
        cart.apply(&events[0]);
        assert_eq!(cart.closed_as(), Some(CartClosure::Dispensed));

        let err = cart
            .handle(&CartCommand::StageItem(StageItem {
                cart_id: cart.id_typed(),
                medicine_id: med,
                medicine_name: "med".to_string(),
                quantity: 1,
                unit_price: 20,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn most_recent_active_cart_wins() {
        let pharmacist = StaffId::new();
        let prescription = PrescriptionId::generate();
        let older = open_cart(pharmacist, prescription, Vec::new(), 3);
        let newest = open_cart(pharmacist, prescription, Vec::new(), 9);
        let middle = open_cart(pharmacist, prescription, Vec::new(), 5);

        let resolution = resolve_active_carts([&older, &newest, &middle]);
        assert_eq!(resolution.keep, Some(newest.id_typed()));
        assert_eq!(resolution.superseded, vec![middle.id_typed(), older.id_typed()]);
    }

    #[test]
    fn no_active_carts_resolves_to_nothing() {
        let none: Vec<&DispenseCart> = Vec::new();
        assert_eq!(resolve_active_carts(none), CartResolution::default());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of staging, re-quantifying and removing lines,
        /// the cart total equals the sum of line subtotals and each subtotal equals
        /// unit price times quantity.
        #[test]
        fn cart_total_is_sum_of_subtotals(
            ops in prop::collection::vec((0u8..3, 0usize..4, -3i64..20), 1..40)
        ) {
            let medicines: Vec<(MedicineId, u64)> = (0..4)
                .map(|i| (MedicineId::generate(), 5 + i as u64 * 7))
                .collect();
            let mut cart = seeded(&[]);

            for (kind, idx, qty) in ops {
                let (medicine_id, price) = medicines[idx];
                let cmd = match kind {
                    0 => CartCommand::StageItem(StageItem {
                        cart_id: cart.id_typed(),
                        medicine_id,
                        medicine_name: "med".to_string(),
                        quantity: qty,
                        unit_price: price,
                        occurred_at: test_time(),
                    }),
                    1 => CartCommand::SetItemQuantity(SetItemQuantity {
                        cart_id: cart.id_typed(),
                        medicine_id,
                        quantity: qty,
                        occurred_at: test_time(),
                    }),
                    _ => CartCommand::RemoveItem(RemoveItem {
                        cart_id: cart.id_typed(),
                        medicine_id,
                        occurred_at: test_time(),
                    }),
                };
                if let Ok(events) = cart.handle(&cmd) {
                    for e in &events {
                        cart.apply(e);
                    }
                }

                let sum: u64 = cart.items().iter().map(|i| i.subtotal).sum();
                prop_assert_eq!(cart.total_amount(), sum);
                for item in cart.items() {
                    prop_assert!(item.quantity > 0);
                    prop_assert_eq!(item.subtotal, item.unit_price * item.quantity as u64);
                }
            }
        }
    }
}
