use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{NaiveDate, Utc};
use clinicflow_auth::{Principal, Role, StaffMember};
use clinicflow_billing::PaymentMethod;
use clinicflow_catalog::{MedicineCategory, MedicineId};
use clinicflow_clinical::{Gender, PatientDetails, PrescriptionId, VisitId};
use clinicflow_events::InMemoryNotificationSink;
use clinicflow_infra::{ClinicConfig, ClinicWorkflow, DateRange, NewMedicine, PrescribedMedicine};

struct Bench {
    wf: ClinicWorkflow,
    receptionist: Principal,
    doctor: Principal,
    pharmacist: Principal,
    cashier: Principal,
    admin: Principal,
    medicines: Vec<MedicineId>,
}

fn staff(wf: &ClinicWorkflow, name: &str, role: Role) -> Principal {
    let member = StaffMember::new(name, role);
    let principal = member.principal();
    wf.enroll_staff(member).unwrap();
    principal
}

fn setup(medicine_count: usize) -> Bench {
    let wf = ClinicWorkflow::new(ClinicConfig::default(), InMemoryNotificationSink::new());
    let receptionist = staff(&wf, "front desk", Role::Receptionist);
    let doctor = staff(&wf, "doctor", Role::Doctor);
    let pharmacist = staff(&wf, "pharmacist", Role::Pharmacist);
    let cashier = staff(&wf, "cashier", Role::Cashier);
    let admin = staff(&wf, "admin", Role::Admin);

    let medicines = (0..medicine_count)
        .map(|i| {
            wf.register_medicine(
                &pharmacist,
                NewMedicine {
                    name: format!("Medicine {i}"),
                    generic_name: None,
                    category: MedicineCategory::Tablet,
                    strength: "250mg".to_string(),
                    unit_price: 1_000 + i as u64,
                    initial_stock: 10_000_000,
                    reorder_level: Some(10),
                },
            )
            .unwrap()
            .id_typed()
        })
        .collect();

    Bench {
        wf,
        receptionist,
        doctor,
        pharmacist,
        cashier,
        admin,
        medicines,
    }
}

fn patient(n: usize) -> PatientDetails {
    PatientDetails {
        first_name: format!("Patient{n}"),
        last_name: "Bench".to_string(),
        date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
        gender: Gender::Other,
        phone: format!("+1555{n:07}"),
        address: String::new(),
        emergency_contact: String::new(),
        blood_group: None,
        allergies: String::new(),
        medical_history: String::new(),
    }
}

fn visit(bench: &Bench, n: usize) -> VisitId {
    let registration = bench
        .wf
        .register_patient(&bench.receptionist, patient(n), PaymentMethod::Cash)
        .unwrap();
    bench
        .wf
        .open_visit(
            &bench.receptionist,
            registration.patient.id_typed(),
            Some(bench.doctor.staff_id),
            "benchmark",
        )
        .unwrap()
        .id_typed()
}

fn prescription(bench: &Bench, n: usize, lines: usize) -> PrescriptionId {
    let visit_id = visit(bench, n);
    let medicines = bench
        .medicines
        .iter()
        .take(lines)
        .map(|&medicine_id| PrescribedMedicine {
            medicine_id,
            quantity: 2,
            dosage: "1 tablet".to_string(),
            duration: "3 days".to_string(),
            instructions: String::new(),
        })
        .collect();
    bench
        .wf
        .create_prescription(&bench.doctor, visit_id, medicines, "")
        .unwrap()
        .id_typed()
}

fn bench_dispense_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispense_latency");

    for lines in [1usize, 5, 20] {
        let bench = setup(20);
        let mut n = 0;
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::new("open_cart_and_dispense", lines), &lines, |b, &lines| {
            b.iter_batched(
                || {
                    n += 1;
                    prescription(&bench, n, lines)
                },
                |prescription_id| {
                    bench.wf.open_cart(&bench.pharmacist, prescription_id).unwrap();
                    black_box(bench.wf.dispense(&bench.pharmacist, prescription_id).unwrap())
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_unit_of_work_with_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("unit_of_work_with_history");
    group.sample_size(50);

    // Every unit of work works on a copy of the state, so cost tracks clinic size.
    for existing_visits in [10usize, 100, 1000] {
        let bench = setup(1);
        for n in 0..existing_visits {
            visit(&bench, n);
        }
        let mut n = existing_visits;
        group.bench_with_input(
            BenchmarkId::new("register_and_open_visit", existing_visits),
            &existing_visits,
            |b, _| {
                b.iter(|| {
                    n += 1;
                    black_box(visit(&bench, n))
                });
            },
        );
    }

    group.finish();
}

fn bench_revenue_summary(c: &mut Criterion) {
    let mut group = c.benchmark_group("revenue_summary");

    for visits in [100usize, 1000] {
        let bench = setup(3);
        for n in 0..visits {
            let prescription_id = prescription(&bench, n, 3);
            bench.wf.open_cart(&bench.pharmacist, prescription_id).unwrap();
            bench.wf.dispense(&bench.pharmacist, prescription_id).unwrap();
            if n % 2 == 0 {
                bench
                    .wf
                    .process_medicine_payment(&bench.cashier, prescription_id, PaymentMethod::Card)
                    .unwrap();
            }
        }
        let range = DateRange::single_day(Utc::now().date_naive());

        group.throughput(Throughput::Elements(visits as u64 * 2));
        group.bench_with_input(BenchmarkId::new("single_day", visits), &visits, |b, _| {
            let reporting = bench.wf.reporting(&bench.admin).unwrap();
            b.iter(|| black_box(reporting.revenue_summary(&range)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dispense_latency,
    bench_unit_of_work_with_history,
    bench_revenue_summary
);
criterion_main!(benches);
