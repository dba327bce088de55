#![cfg(feature = "transport-mock")]
use bytes::Bytes;
use hospital_sim::generator::RecordGenerator;
use hospital_sim::pacing::JitterPacer;
use hospital_sim::records::{
    Appointment, Medicine, Patient, Prescription, Topic, decode, encode,
};
use hospital_sim::roles::publisher::{CycleMode, PublisherConfig, run_publisher};
use hospital_sim::roles::subscriber::{StopReason, SubscriberConfig, run_subscriber};
use hospital_sim::transport::mock::MockTransport;
use hospital_sim::transport::{ConnectOptions, Engine, OffsetReset, TransportBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn finite(workers: u32, cycles: u64, seed: u64) -> PublisherConfig {
    PublisherConfig {
        workers,
        mode: CycleMode::Cycles(cycles),
        pacer: JitterPacer::none(),
        seed: Some(seed),
        ..Default::default()
    }
}

fn keys(payload: &[u8]) -> Vec<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).expect("json payload");
    let mut keys: Vec<String> = value.as_object().expect("object").keys().cloned().collect();
    keys.sort();
    keys
}

#[tokio::test]
async fn single_worker_single_cycle_publishes_four_records_in_order() {
    let mock = Arc::new(MockTransport::new());
    let summary = run_publisher(finite(1, 1, 2024), mock.clone(), CancellationToken::new())
        .await
        .expect("publisher");
    assert_eq!(summary.cycles, 1);

    let published = mock.published().await;
    let topics: Vec<_> = published.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(topics, ["patients", "appointments", "medicines", "prescriptions"]);

    assert_eq!(keys(&published[0].payload), ["age", "gender", "name", "patient_id"]);
    assert_eq!(
        keys(&published[1].payload),
        ["appointment_id", "datetime", "doctor_id", "patient_id"]
    );
    assert_eq!(keys(&published[2].payload), ["dosage", "medicine_id", "name"]);
    assert_eq!(
        keys(&published[3].payload),
        ["doctor_id", "medicine_id", "notes", "patient_id", "prescription_id"]
    );
}

#[tokio::test]
async fn many_workers_never_cross_link_cycles() {
    let mock = Arc::new(MockTransport::new());
    run_publisher(finite(4, 5, 1), mock.clone(), CancellationToken::new())
        .await
        .expect("publisher");
    let published = mock.published().await;
    assert_eq!(published.len(), 4 * 5 * 4);

    let mut patients = HashMap::new();
    let mut medicines = HashMap::new();
    let mut appointments = Vec::new();
    let mut prescriptions = Vec::new();
    for m in &published {
        match m.topic.parse::<Topic>().expect("known topic") {
            Topic::Patients => {
                let p: Patient = decode(&m.payload).unwrap();
                patients.insert(p.patient_id, p);
            }
            Topic::Medicines => {
                let med: Medicine = decode(&m.payload).unwrap();
                medicines.insert(med.medicine_id, med);
            }
            Topic::Appointments => appointments.push(decode::<Appointment>(&m.payload).unwrap()),
            Topic::Prescriptions => prescriptions.push(decode::<Prescription>(&m.payload).unwrap()),
        }
    }
    assert_eq!(patients.len(), 20);
    assert_eq!(prescriptions.len(), 20);

    // Each patient has exactly one appointment and one prescription, and
    // both name the same doctor
    let doctor_by_patient: HashMap<_, _> = appointments
        .iter()
        .map(|a| (a.patient_id, a.doctor_id))
        .collect();
    assert_eq!(doctor_by_patient.len(), 20);
    for rx in &prescriptions {
        assert!(patients.contains_key(&rx.patient_id));
        assert!(medicines.contains_key(&rx.medicine_id));
        assert_eq!(doctor_by_patient.get(&rx.patient_id), Some(&rx.doctor_id));
    }
}

#[tokio::test]
async fn subscriber_reports_twice_for_250_messages() {
    let mock = Arc::new(MockTransport::new());
    let mut generator = RecordGenerator::seeded(3);
    for i in 0..250 {
        let topic = Topic::ALL[i % 4];
        let payload = match topic {
            Topic::Patients => encode(&generator.generate_patient()).unwrap(),
            Topic::Medicines => encode(&generator.generate_medicine()).unwrap(),
            _ => Bytes::from_static(b"{\"note\":\"pre-queued\"}"),
        };
        mock.inject(topic.as_str(), payload).await;
    }
    mock.close().await;

    let mut out = Vec::new();
    let summary = run_subscriber(
        SubscriberConfig::default(),
        mock.clone(),
        CancellationToken::new(),
        &mut out,
    )
    .await
    .expect("subscriber");

    assert_eq!(summary.consumed, 250);
    assert_eq!(summary.stopped_by, StopReason::StreamEnded);
    assert_eq!(summary.reports.len(), 2);
    assert_eq!(summary.reports[0].consumed, 100);
    assert_eq!(summary.reports[1].consumed, 200);
    assert!(summary.reports[0].elapsed < summary.reports[1].elapsed);
    assert!(summary.reports.iter().all(|r| r.rate >= 0.0));

    let text = String::from_utf8(out).unwrap();
    let report_lines = text.lines().filter(|l| l.starts_with("Consumed ")).count();
    assert_eq!(report_lines, 2);
    let record_lines = Topic::ALL
        .iter()
        .map(|t| text.lines().filter(|l| l.starts_with(&format!("{t}: "))).count())
        .sum::<usize>();
    assert_eq!(record_lines, 250);
}

#[tokio::test]
async fn published_traffic_reaches_subscriber() {
    let mock = Arc::new(MockTransport::new());
    run_publisher(finite(5, 5, 77), mock.clone(), CancellationToken::new())
        .await
        .expect("publisher");
    mock.close().await;

    let mut out = Vec::new();
    let config = SubscriberConfig {
        quiet: true,
        ..Default::default()
    };
    let summary = run_subscriber(config, mock.clone(), CancellationToken::new(), &mut out)
        .await
        .expect("subscriber");
    assert_eq!(summary.consumed, 100);
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.stats.consumed_count, 100);
    let text = String::from_utf8(out).unwrap();
    assert!(!text.contains("patients: "));
}

#[tokio::test]
async fn subscriber_stops_at_max_messages_and_on_shutdown() {
    let mock = Arc::new(MockTransport::new());
    for _ in 0..10 {
        mock.inject("patients", Bytes::from_static(b"{}")).await;
    }
    let config = SubscriberConfig {
        max_messages: Some(4),
        quiet: true,
        ..Default::default()
    };
    let summary = run_subscriber(config, mock.clone(), CancellationToken::new(), &mut Vec::new())
        .await
        .expect("subscriber");
    assert_eq!(summary.consumed, 4);
    assert_eq!(summary.stopped_by, StopReason::MaxMessages);

    // Live subscription with nothing left to read ends only on shutdown
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let config = SubscriberConfig {
        group_id: "idle-group".into(),
        offset_reset: OffsetReset::Latest,
        ..Default::default()
    };
    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        run_subscriber(config, mock.clone(), token, &mut Vec::new()),
    )
    .await
    .expect("stopped by shutdown")
    .expect("subscriber");
    assert_eq!(summary.consumed, 0);
    assert_eq!(summary.stopped_by, StopReason::Interrupted);
}

#[tokio::test]
async fn malformed_payload_is_fatal() {
    let mock = Arc::new(MockTransport::new());
    mock.inject("patients", Bytes::from_static(b"{\"ok\":true}")).await;
    mock.inject("medicines", Bytes::from_static(b"\xff\xfe not json")).await;
    mock.close().await;
    let err = run_subscriber(
        SubscriberConfig::default(),
        mock,
        CancellationToken::new(),
        &mut Vec::new(),
    )
    .await
    .expect_err("decode failure must surface");
    assert!(format!("{err:#}").contains("malformed payload on topic medicines"));
}

#[tokio::test]
async fn broker_unreachable_fails_before_any_worker() {
    let mut opts = ConnectOptions::with_broker("localhost:1");
    opts.params.insert("fail_connect".into(), "1".into());
    let err = TransportBuilder::connect(Engine::Mock, opts).await.err();
    assert!(err.is_some_and(|e| e.to_string().starts_with("connect:")));
}

#[tokio::test]
async fn failing_worker_does_not_stop_siblings() {
    let mock = Arc::new(MockTransport::new().with_failing_publishers(1));
    let err = run_publisher(finite(3, 2, 9), mock.clone(), CancellationToken::new())
        .await
        .expect_err("one worker fails");
    let msg = format!("{err:#}");
    assert!(msg.contains("1 of 3 publisher workers failed"));
    assert!(msg.contains("flush"));
    // The two healthy workers complete their cycles
    assert_eq!(mock.published().await.len(), 2 * 2 * 4);
}

#[tokio::test]
async fn fail_fast_stops_continuous_workers() {
    let mock = Arc::new(MockTransport::new().with_failing_publishers(1));
    let config = PublisherConfig {
        workers: 3,
        mode: CycleMode::Continuous,
        pacer: JitterPacer::from_millis(5, 10),
        fail_fast: true,
        ..Default::default()
    };
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run_publisher(config, mock, CancellationToken::new()),
    )
    .await
    .expect("harness ends once a worker fails");
    assert!(result.is_err());
}

#[tokio::test]
async fn shutdown_stops_continuous_harness() {
    let mock = Arc::new(MockTransport::new());
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });
    let config = PublisherConfig {
        workers: 2,
        pacer: JitterPacer::from_millis(10, 20),
        ..Default::default()
    };
    let summary = tokio::time::timeout(Duration::from_secs(5), run_publisher(config, mock.clone(), token))
        .await
        .expect("harness stops on shutdown")
        .expect("no worker failed");
    assert!(summary.cycles >= 2);
    assert_eq!(mock.published().await.len() as u64, summary.messages);
}

#[test]
fn generated_records_round_trip() {
    let mut g = RecordGenerator::seeded(12);
    for _ in 0..50 {
        let b = g.generate_batch();
        assert_eq!(decode::<Patient>(&encode(&b.patient).unwrap()).unwrap(), b.patient);
        assert_eq!(decode::<Medicine>(&encode(&b.medicine).unwrap()).unwrap(), b.medicine);
        assert_eq!(
            decode::<Appointment>(&encode(&b.appointment).unwrap()).unwrap(),
            b.appointment
        );
        assert_eq!(
            decode::<Prescription>(&encode(&b.prescription).unwrap()).unwrap(),
            b.prescription
        );
    }
}
