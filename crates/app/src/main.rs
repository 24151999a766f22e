use anyhow::Context;
use chrono::{NaiveDate, Utc};

use clinicflow_auth::{Principal, Role, StaffMember};
use clinicflow_billing::PaymentMethod;
use clinicflow_catalog::MedicineCategory;
use clinicflow_clinical::{Gender, MedicalExamination, PatientDetails, TestResultDetails};
use clinicflow_events::InMemoryNotificationSink;
use clinicflow_infra::{ClinicConfig, ClinicWorkflow, DateRange, NewMedicine, PrescribedMedicine};

fn enroll(wf: &ClinicWorkflow, name: &str, role: Role) -> anyhow::Result<Principal> {
    let member = StaffMember::new(name, role);
    let principal = member.principal();
    wf.enroll_staff(member)?;
    Ok(principal)
}

fn main() -> anyhow::Result<()> {
    clinicflow_observability::init();

    let config = ClinicConfig::from_env().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "invalid clinic configuration; using defaults");
        ClinicConfig::default()
    });
    tracing::info!(
        registration_fee = %config.format_amount(config.registration_fee),
        currency = %config.currency,
        "clinic configured"
    );

    let wf = ClinicWorkflow::new(config, InMemoryNotificationSink::new());

    let admin = enroll(&wf, "Clinic Admin", Role::Admin)?;
    let receptionist = enroll(&wf, "Front Desk", Role::Receptionist)?;
    let doctor = enroll(&wf, "Dr. Demo", Role::Doctor)?;
    let cashier = enroll(&wf, "Cashier", Role::Cashier)?;
    let tech = enroll(&wf, "Lab Technician", Role::LabTech)?;
    let pharmacist = enroll(&wf, "Pharmacist", Role::Pharmacist)?;

    let blood_count = wf
        .define_lab_test(&admin, "Complete Blood Count", "CBC with differential", 10_000, 24)
        .context("defining lab test")?;
    let stock_medicine = |name: &str, unit_price: u64| {
        wf.register_medicine(
            &pharmacist,
            NewMedicine {
                name: name.to_string(),
                generic_name: None,
                category: MedicineCategory::Tablet,
                strength: "500mg".to_string(),
                unit_price,
                initial_stock: 100,
                reorder_level: None,
            },
        )
    };
    let amoxicillin = stock_medicine("Amoxicillin", 2_000).context("stocking amoxicillin")?;
    let paracetamol = stock_medicine("Paracetamol", 3_000).context("stocking paracetamol")?;

    let registration = wf
        .register_patient(
            &receptionist,
            PatientDetails {
                first_name: "Jane".to_string(),
                last_name: "Doe".to_string(),
                date_of_birth: NaiveDate::from_ymd_opt(1990, 6, 15).context("date of birth")?,
                gender: Gender::Female,
                phone: "+15550100".to_string(),
                address: "1 Main Street".to_string(),
                emergency_contact: "+15550101".to_string(),
                blood_group: Some("A+".to_string()),
                allergies: "penicillin (mild)".to_string(),
                medical_history: String::new(),
            },
            PaymentMethod::Cash,
        )
        .context("registering patient")?;
    let patient_id = registration.patient.id_typed();

    let visit = wf
        .open_visit(&receptionist, patient_id, Some(doctor.staff_id), "persistent cough")
        .context("opening visit")?;
    let visit_id = visit.id_typed();

    wf.record_examination(
        &doctor,
        visit_id,
        MedicalExamination {
            blood_pressure: "118/76".to_string(),
            temperature_decicelsius: Some(378),
            heart_rate_bpm: Some(88),
            weight_grams: Some(62_500),
            height_mm: Some(1_650),
            notes: String::new(),
        },
    )?;

    let order = wf.request_lab_test(&doctor, visit_id, blood_count.id_typed(), "rule out infection")?;
    let lab_id = order.request.id_typed();
    wf.process_lab_payment(&cashier, lab_id, PaymentMethod::Card)?;
    wf.assign_lab_technician(&receptionist, lab_id, tech.staff_id)?;
    wf.submit_lab_result(
        &tech,
        lab_id,
        TestResultDetails {
            findings: "white cell count slightly raised".to_string(),
            result_value: "11.8".to_string(),
            normal_range: "4.0-11.0".to_string(),
            unit: "10^9/L".to_string(),
            is_abnormal: true,
            ..TestResultDetails::default()
        },
        "",
    )?;

    wf.record_diagnosis(&doctor, visit_id, "acute bronchitis", "")?;
    let line = |medicine_id, quantity| PrescribedMedicine {
        medicine_id,
        quantity,
        dosage: "1 tablet".to_string(),
        duration: "5 days".to_string(),
        instructions: "after meals".to_string(),
    };
    let prescription = wf.create_prescription(
        &doctor,
        visit_id,
        vec![line(amoxicillin.id_typed(), 3), line(paracetamol.id_typed(), 1)],
        "",
    )?;
    let prescription_id = prescription.id_typed();

    wf.open_cart(&pharmacist, prescription_id)?;
    let dispensation = wf.dispense(&pharmacist, prescription_id)?;
    wf.process_medicine_payment(&cashier, prescription_id, PaymentMethod::Cash)?;

    let visit = wf.visit(visit_id).context("visit disappeared")?;
    let summary = wf
        .reporting(&admin)?
        .revenue_summary(&DateRange::single_day(Utc::now().date_naive()));

    tracing::info!(
        visit_ref = ?visit.reference().map(|r| r.to_string()),
        status = ?visit.status(),
        medicine_bill = %wf.config().format_amount(dispensation.payment.amount()),
        collected_today = %wf.config().format_amount(summary.completed_total),
        journal_entries = wf.store().journal().len(),
        doctor_notifications = wf.sink().inbox(doctor.staff_id).len(),
        "visit walked through the clinic"
    );

    Ok(())
}
