//! Prescriptions, dispense carts and the dispense unit of work.

use chrono::{DateTime, Utc};

use clinicflow_auth::{Action, Principal, Role};
use clinicflow_billing::{Payment, PaymentLinks, PaymentMethod, PaymentStatus, PaymentType};
use clinicflow_catalog::{DispenseStock, Medicine, MedicineCommand, MedicineId};
use clinicflow_clinical::{
    AddItem, BeginReview, CancelPrescription, CartClosure, CartCommand, CartItem, CloseCart,
    CreatePrescription, DispenseCart, DispenseCartId, LabRequestStatus, MarkReady, OpenCart,
    Prescription, PrescriptionCommand, PrescriptionId, PrescriptionLine, PrescriptionStatus,
    RemoveItem, SetItemQuantity, StageItem, Visit, VisitId, VisitStatus, resolve_active_carts,
};
use clinicflow_core::{DomainError, ReferenceKind, StaffId};
use clinicflow_events::{Notification, NotificationSink, NotificationType, Recipient};

use super::lab::mark_results_reviewed;
use super::ledger::{PaymentDraft, raise_payment, settle};
use super::{
    ClinicWorkflow, Dispensation, PrescribedMedicine, advance_visit, display_ref,
    ensure_attending, patient_name, required_ref, visit_patient,
};
use crate::error::WorkflowError;
use crate::store::UnitOfWork;

/// Catalog-priced prescription line for an active medicine.
fn priced_line(uow: &UnitOfWork, prescribed: &PrescribedMedicine) -> Result<PrescriptionLine, WorkflowError> {
    let medicine: Medicine = uow.load(&prescribed.medicine_id)?;
    if !medicine.is_active() {
        return Err(DomainError::validation(format!("{} is no longer stocked", medicine.label())).into());
    }
    Ok(PrescriptionLine {
        medicine_id: prescribed.medicine_id,
        medicine_name: medicine.label(),
        quantity: prescribed.quantity,
        dosage: prescribed.dosage.clone(),
        duration: prescribed.duration.clone(),
        instructions: prescribed.instructions.clone(),
        unit_price: medicine.unit_price(),
    })
}

fn close_cart(
    uow: &mut UnitOfWork,
    cart_id: DispenseCartId,
    closure: CartClosure,
    at: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    uow.execute::<DispenseCart>(
        cart_id,
        &CartCommand::Close(CloseCart {
            cart_id,
            closure,
            occurred_at: at,
        }),
    )?;
    Ok(())
}

/// Get-or-create the pharmacist's active cart for an editable prescription.
///
/// Duplicate active carts collapse onto the newest one. A new cart is seeded with
/// every prescription item at its prescribed quantity.
fn active_cart_in(
    uow: &mut UnitOfWork,
    pharmacist: StaffId,
    prescription_id: PrescriptionId,
    at: DateTime<Utc>,
) -> Result<DispenseCartId, WorkflowError> {
    let prescription: Prescription = uow.load(&prescription_id)?;
    if !prescription.status().is_editable() {
        return Err(DomainError::invalid_transition(
            "prescription",
            prescription.status(),
            "stage medicines for",
        )
        .into());
    }

    let resolution = resolve_active_carts(uow.state().active_carts_for(pharmacist, prescription_id));
    for duplicate in resolution.superseded {
        tracing::warn!(cart_id = %duplicate, "superseding duplicate active cart");
        close_cart(uow, duplicate, CartClosure::Superseded, at)?;
    }
    if let Some(cart_id) = resolution.keep {
        return Ok(cart_id);
    }

    if prescription.status() == PrescriptionStatus::Pending {
        uow.execute::<Prescription>(
            prescription_id,
            &PrescriptionCommand::BeginReview(BeginReview {
                prescription_id,
                pharmacist,
                occurred_at: at,
            }),
        )?;
    }

    let items = prescription
        .items()
        .iter()
        .map(|i| CartItem::new(i.medicine_id, i.medicine_name.clone(), i.quantity, i.unit_price))
        .collect::<Result<Vec<_>, _>>()?;
    let cart_id = DispenseCartId::generate();
    let sequence = uow.next_cart_sequence();
    uow.execute::<DispenseCart>(
        cart_id,
        &CartCommand::Open(OpenCart {
            cart_id,
            pharmacist,
            prescription_id,
            items,
            sequence,
            occurred_at: at,
        }),
    )?;
    Ok(cart_id)
}

impl<N> ClinicWorkflow<N>
where
    N: NotificationSink,
{
    /// Write the visit's prescription. Moves the visit to PRESCRIPTION_READY, walking
    /// through the review step when lab results are waiting.
    #[tracing::instrument(skip(self, medicines, notes), fields(staff_id = %actor.staff_id))]
    pub fn create_prescription(
        &self,
        actor: &Principal,
        visit_id: VisitId,
        medicines: Vec<PrescribedMedicine>,
        notes: impl Into<String>,
    ) -> Result<Prescription, WorkflowError> {
        self.authorize(actor, Action::CreatePrescription)?;
        let at = self.now();
        let notes = notes.into();

        self.run("create_prescription", actor, |uow| {
            let visit: Visit = uow.load(&visit_id)?;
            ensure_attending(&visit, actor)?;

            if let Some(existing) = uow.state().prescription_for_visit(visit_id) {
                return Err(DomainError::conflict(format!(
                    "visit {} already has prescription {}",
                    display_ref(visit.reference()),
                    display_ref(existing.reference())
                ))
                .into());
            }

            let lines = medicines
                .iter()
                .map(|m| priced_line(uow, m))
                .collect::<Result<Vec<_>, _>>()?;

            match visit.status() {
                VisitStatus::WithDoctor => {
                    advance_visit(uow, visit_id, VisitStatus::PrescriptionReady, at)?;
                }
                VisitStatus::LabRequested => {
                    let all_cancelled = uow
                        .state()
                        .lab_requests_for_visit(visit_id)
                        .all(|lab| lab.status() == LabRequestStatus::Cancelled);
                    if !all_cancelled {
                        return Err(DomainError::invalid_transition(
                            "visit",
                            VisitStatus::LabRequested,
                            "prescribe for",
                        )
                        .into());
                    }
                    advance_visit(uow, visit_id, VisitStatus::PrescriptionReady, at)?;
                }
                VisitStatus::LabCompleted => {
                    advance_visit(uow, visit_id, VisitStatus::WithDoctorReview, at)?;
                    mark_results_reviewed(uow, visit_id, actor.staff_id, at)?;
                    advance_visit(uow, visit_id, VisitStatus::PrescriptionReady, at)?;
                }
                VisitStatus::WithDoctorReview => {
                    mark_results_reviewed(uow, visit_id, actor.staff_id, at)?;
                    advance_visit(uow, visit_id, VisitStatus::PrescriptionReady, at)?;
                }
                // The earlier prescription was cancelled.
                VisitStatus::PrescriptionReady => {}
                other => {
                    return Err(DomainError::invalid_transition("visit", other, "prescribe for").into());
                }
            }

            let prescription_id = PrescriptionId::generate();
            let reference = uow.issue_ref(ReferenceKind::Prescription, at)?;
            uow.execute::<Prescription>(
                prescription_id,
                &PrescriptionCommand::Create(CreatePrescription {
                    prescription_id,
                    reference: reference.clone(),
                    visit_id,
                    prescribed_by: actor.staff_id,
                    lines,
                    notes,
                    occurred_at: at,
                }),
            )?;

            let patient = patient_name(uow, visit_patient(&visit)?);
            uow.notify(Notification::new(
                Recipient::Role(Role::Pharmacist),
                NotificationType::Prescription,
                "New Prescription",
                format!("Prescription {reference} for {patient} is waiting"),
                Some(reference),
                at,
            ));

            Ok(uow.load(&prescription_id)?)
        })
    }

    /// The pharmacist's working cart for a prescription, opened on first use.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn open_cart(&self, actor: &Principal, prescription_id: PrescriptionId) -> Result<DispenseCart, WorkflowError> {
        self.authorize(actor, Action::ManageDispenseCart)?;
        let at = self.now();
        self.run("open_cart", actor, |uow| {
            let cart_id = active_cart_in(uow, actor.staff_id, prescription_id, at)?;
            Ok(uow.load(&cart_id)?)
        })
    }

    /// Add a medicine to the prescription (or more of one already on it) and stage
    /// the same quantity in the cart.
    #[tracing::instrument(skip(self, medicine), fields(staff_id = %actor.staff_id))]
    pub fn add_to_cart(
        &self,
        actor: &Principal,
        prescription_id: PrescriptionId,
        medicine: PrescribedMedicine,
    ) -> Result<DispenseCart, WorkflowError> {
        self.authorize(actor, Action::ManageDispenseCart)?;
        let at = self.now();

        self.run("add_to_cart", actor, |uow| {
            let cart_id = active_cart_in(uow, actor.staff_id, prescription_id, at)?;
            let line = priced_line(uow, &medicine)?;

            uow.execute::<Prescription>(
                prescription_id,
                &PrescriptionCommand::AddItem(AddItem {
                    prescription_id,
                    line: line.clone(),
                    occurred_at: at,
                }),
            )?;
            let prescription: Prescription = uow.load(&prescription_id)?;
            let unit_price = prescription
                .item(line.medicine_id)
                .map(|i| i.unit_price)
                .unwrap_or(line.unit_price);

            uow.execute::<DispenseCart>(
                cart_id,
                &CartCommand::StageItem(StageItem {
                    cart_id,
                    medicine_id: line.medicine_id,
                    medicine_name: line.medicine_name,
                    quantity: line.quantity,
                    unit_price,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&cart_id)?)
        })
    }

    /// Change the staged quantity of a cart line; zero or less removes it. A cart
    /// never stages more than was prescribed.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn update_cart_item(
        &self,
        actor: &Principal,
        prescription_id: PrescriptionId,
        medicine_id: MedicineId,
        quantity: i64,
    ) -> Result<DispenseCart, WorkflowError> {
        self.authorize(actor, Action::ManageDispenseCart)?;
        let at = self.now();

        self.run("update_cart_item", actor, |uow| {
            let cart_id = active_cart_in(uow, actor.staff_id, prescription_id, at)?;
            let prescription: Prescription = uow.load(&prescription_id)?;
            let prescribed = prescription
                .item(medicine_id)
                .ok_or_else(|| DomainError::not_found(format!("prescription item {medicine_id}")))?;
            if quantity > prescribed.quantity {
                return Err(DomainError::validation(format!(
                    "{} is prescribed {} units, cannot stage {quantity}",
                    prescribed.medicine_name, prescribed.quantity
                ))
                .into());
            }

            uow.execute::<DispenseCart>(
                cart_id,
                &CartCommand::SetItemQuantity(SetItemQuantity {
                    cart_id,
                    medicine_id,
                    quantity,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&cart_id)?)
        })
    }

    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn remove_cart_item(
        &self,
        actor: &Principal,
        prescription_id: PrescriptionId,
        medicine_id: MedicineId,
    ) -> Result<DispenseCart, WorkflowError> {
        self.authorize(actor, Action::ManageDispenseCart)?;
        let at = self.now();
        self.run("remove_cart_item", actor, |uow| {
            let cart_id = active_cart_in(uow, actor.staff_id, prescription_id, at)?;
            uow.execute::<DispenseCart>(
                cart_id,
                &CartCommand::RemoveItem(RemoveItem {
                    cart_id,
                    medicine_id,
                    occurred_at: at,
                }),
            )?;
            Ok(uow.load(&cart_id)?)
        })
    }

    /// Take the cart's medicines off the shelf and raise the medicine bill.
    ///
    /// Stock for every line is checked before any is decremented; the prescription
    /// becomes READY and a pending MEDICINE payment for the cart total is created in
    /// the same unit of work.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn dispense(&self, actor: &Principal, prescription_id: PrescriptionId) -> Result<Dispensation, WorkflowError> {
        self.authorize(actor, Action::DispenseMedicine)?;
        let at = self.now();

        self.run("dispense", actor, |uow| {
            let cart_id = active_cart_in(uow, actor.staff_id, prescription_id, at)?;
            let cart: DispenseCart = uow.load(&cart_id)?;
            if cart.items().is_empty() {
                return Err(DomainError::validation("dispense cart is empty").into());
            }

            for item in cart.items() {
                let medicine: Medicine = uow.load(&item.medicine_id)?;
                if !medicine.is_active() {
                    return Err(DomainError::validation(format!(
                        "{} is no longer stocked",
                        medicine.label()
                    ))
                    .into());
                }
                if medicine.stock() < item.quantity {
                    return Err(DomainError::insufficient_stock(
                        medicine.label(),
                        medicine.stock(),
                        item.quantity,
                    )
                    .into());
                }
            }

            let prescription: Prescription = uow.load(&prescription_id)?;
            let prescription_ref = required_ref(prescription.reference(), "prescription")?;
            for item in cart.items() {
                uow.execute::<Medicine>(
                    item.medicine_id,
                    &MedicineCommand::Dispense(DispenseStock {
                        medicine_id: item.medicine_id,
                        quantity: item.quantity,
                        prescription: prescription_ref.clone(),
                        occurred_at: at,
                    }),
                )?;
            }

            let total_cost = cart.total_amount();
            uow.execute::<Prescription>(
                prescription_id,
                &PrescriptionCommand::MarkReady(MarkReady {
                    prescription_id,
                    total_cost,
                    prepared_by: actor.staff_id,
                    occurred_at: at,
                }),
            )?;

            let visit_id = prescription
                .visit_id()
                .ok_or_else(|| DomainError::invariant("prescription has no visit"))?;
            let visit: Visit = uow.load(&visit_id)?;
            let patient_id = visit_patient(&visit)?;
            let payment = raise_payment(
                uow,
                actor.staff_id,
                PaymentDraft {
                    patient_id,
                    links: PaymentLinks {
                        visit_id: Some(visit_id),
                        lab_request_id: None,
                        prescription_id: Some(prescription_id),
                    },
                    payment_type: PaymentType::Medicine,
                    method: PaymentMethod::Pending,
                    amount: total_cost,
                    notes: format!("Medicines for {prescription_ref}"),
                    collect: false,
                },
                at,
            )?;

            close_cart(uow, cart_id, CartClosure::Dispensed, at)?;
            let others: Vec<DispenseCartId> = uow
                .state()
                .active_carts_for_prescription(prescription_id)
                .map(|c| c.id_typed())
                .collect();
            for other in others {
                close_cart(uow, other, CartClosure::Superseded, at)?;
            }

            uow.notify(Notification::new(
                Recipient::Role(Role::Cashier),
                NotificationType::Payment,
                "Medicine Payment Due",
                format!(
                    "{} owes {} for {prescription_ref}",
                    patient_name(uow, patient_id),
                    self.config.format_amount(total_cost)
                ),
                Some(prescription_ref.clone()),
                at,
            ));

            let low: Vec<String> = cart
                .items()
                .iter()
                .filter_map(|i| uow.state().medicine(i.medicine_id))
                .filter(|m| m.is_low_stock())
                .map(|m| format!("{} ({} left)", m.label(), m.stock()))
                .collect();
            if !low.is_empty() {
                uow.notify(Notification::new(
                    Recipient::Role(Role::Pharmacist),
                    NotificationType::System,
                    "Low Stock",
                    format!("Reorder soon: {}", low.join(", ")),
                    None,
                    at,
                ));
            }

            Ok(Dispensation {
                prescription: uow.load(&prescription_id)?,
                payment,
            })
        })
    }

    /// Collect the medicine bill; the prescription is handed over and the visit closes.
    #[tracing::instrument(skip(self), fields(staff_id = %actor.staff_id))]
    pub fn process_medicine_payment(
        &self,
        actor: &Principal,
        prescription_id: PrescriptionId,
        method: PaymentMethod,
    ) -> Result<Payment, WorkflowError> {
        self.authorize(actor, Action::ProcessPayment)?;
        let at = self.now();

        self.run("process_medicine_payment", actor, |uow| {
            let prescription: Prescription = uow.load(&prescription_id)?;
            let payments: Vec<Payment> = uow
                .state()
                .payments_for_prescription(prescription_id)
                .cloned()
                .collect();

            if payments.iter().any(|p| p.status() == PaymentStatus::Completed) {
                return Err(DomainError::duplicate_payment(format!(
                    "medicine payment for {} already processed",
                    display_ref(prescription.reference())
                ))
                .into());
            }
            if prescription.status() != PrescriptionStatus::Ready {
                return Err(DomainError::invalid_transition(
                    "prescription",
                    prescription.status(),
                    "pay for",
                )
                .into());
            }

            if let Some(pending) = payments.iter().find(|p| p.status() == PaymentStatus::Pending) {
                return settle(uow, actor.staff_id, pending.id_typed(), method, at);
            }

            let visit_id = prescription
                .visit_id()
                .ok_or_else(|| DomainError::invariant("prescription has no visit"))?;
            let visit: Visit = uow.load(&visit_id)?;
            raise_payment(
                uow,
                actor.staff_id,
                PaymentDraft {
                    patient_id: visit_patient(&visit)?,
                    links: PaymentLinks {
                        visit_id: Some(visit_id),
                        lab_request_id: None,
                        prescription_id: Some(prescription_id),
                    },
                    payment_type: PaymentType::Medicine,
                    method,
                    amount: prescription.total_cost(),
                    notes: format!("Medicines for {}", display_ref(prescription.reference())),
                    collect: true,
                },
                at,
            )
        })
    }

    /// Cancel a prescription that has not been prepared yet. Open carts for it close.
    #[tracing::instrument(skip(self, reason), fields(staff_id = %actor.staff_id))]
    pub fn cancel_prescription(
        &self,
        actor: &Principal,
        prescription_id: PrescriptionId,
        reason: impl Into<String>,
    ) -> Result<Prescription, WorkflowError> {
        self.authorize(actor, Action::CancelPrescription)?;
        let at = self.now();
        let reason = reason.into();

        self.run("cancel_prescription", actor, |uow| {
            uow.execute::<Prescription>(
                prescription_id,
                &PrescriptionCommand::Cancel(CancelPrescription {
                    prescription_id,
                    reason,
                    occurred_at: at,
                }),
            )?;

            let carts: Vec<(DispenseCartId, Option<StaffId>)> = uow
                .state()
                .active_carts_for_prescription(prescription_id)
                .map(|c| (c.id_typed(), c.pharmacist()))
                .collect();
            let prescription: Prescription = uow.load(&prescription_id)?;
            for (cart_id, pharmacist) in carts {
                close_cart(uow, cart_id, CartClosure::PrescriptionCancelled, at)?;
                if let Some(pharmacist) = pharmacist {
                    uow.notify(Notification::new(
                        Recipient::Staff(pharmacist),
                        NotificationType::Prescription,
                        "Prescription Cancelled",
                        format!("{} was cancelled", display_ref(prescription.reference())),
                        prescription.reference().cloned(),
                        at,
                    ));
                }
            }
            Ok(prescription)
        })
    }
}
