//! Webhook fan-out against stub receivers.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::time::timeout;

use applicant_relay::dispatch::{DispatchOptions, Dispatcher};
use applicant_relay::error::DeliveryError;
use applicant_relay::extract::ApplicantRecord;

use common::{HookBehavior, TEST_TIMEOUT, endpoint, start_webhooks, start_webhooks_with};

fn record() -> ApplicantRecord {
    ApplicantRecord {
        name: "Jane Doe".into(),
        email: "jane@example.com".into(),
        phone: Some("555-123-4567".into()),
        received_at: Some(Utc.with_ymd_and_hms(2025, 10, 14, 9, 30, 0).unwrap()),
    }
}

#[tokio::test]
async fn failing_endpoint_does_not_block_the_others() {
    let (base, received) = start_webhooks(&["2"]).await;
    let endpoints = vec![
        endpoint("hr", "crm", format!("{base}/hook/1")),
        endpoint("hr", "sheet", format!("{base}/hook/2")),
        endpoint("hr", "chat", format!("{base}/hook/3")),
    ];

    let dispatcher = Dispatcher::new(DispatchOptions::default());
    let outcomes = timeout(TEST_TIMEOUT, dispatcher.dispatch(&[record()], &endpoints))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].endpoint.name, "sheet");
    assert!(matches!(
        failed[0].error,
        Some(DeliveryError::Status { status: 500, .. })
    ));

    let mut hooks: Vec<_> = received.lock().unwrap().iter().map(|(id, _)| id.clone()).collect();
    hooks.sort();
    assert_eq!(hooks, ["1", "3"]);
}

#[tokio::test]
async fn body_uses_camel_case_keys() {
    let (base, received) = start_webhooks(&[]).await;
    let endpoints = vec![endpoint("hr", "crm", format!("{base}/hook/1"))];
    let mut no_phone = record();
    no_phone.phone = None;

    Dispatcher::default().dispatch(&[no_phone], &endpoints).await;

    let received = received.lock().unwrap();
    let (_, body) = &received[0];
    assert_eq!(body["name"], "Jane Doe");
    assert_eq!(body["email"], "jane@example.com");
    assert!(body["phone"].is_null());
    assert_eq!(body["receivedAt"], "2025-10-14T09:30:00Z");
    assert!(body.get("received_at").is_none());
}

#[tokio::test]
async fn every_record_reaches_every_endpoint() {
    let (base, received) = start_webhooks(&[]).await;
    let endpoints = vec![
        endpoint("hr", "a", format!("{base}/hook/a")),
        endpoint("hr", "b", format!("{base}/hook/b")),
    ];
    let mut second = record();
    second.email = "john@example.com".into();

    let outcomes = Dispatcher::new(DispatchOptions {
        max_in_flight: 1,
        ..Default::default()
    })
    .dispatch(&[record(), second], &endpoints)
    .await;

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| o.success));
    assert_eq!(received.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let endpoints = vec![endpoint("hr", "gone", format!("http://127.0.0.1:{port}/hook"))];
    let outcomes = Dispatcher::new(DispatchOptions {
        delivery_timeout: Duration::from_secs(2),
        ..Default::default()
    })
    .dispatch(&[record()], &endpoints)
    .await;

    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    assert!(matches!(
        outcomes[0].error,
        Some(DeliveryError::Transport { .. } | DeliveryError::Timeout { .. })
    ));
}

#[tokio::test]
async fn slow_endpoint_times_out_while_others_succeed() {
    let hooks = start_webhooks_with(HookBehavior {
        slow: vec!["2".into()],
        delay: Duration::from_secs(3),
        ..Default::default()
    })
    .await;
    let endpoints = vec![
        endpoint("hr", "crm", format!("{}/hook/1", hooks.base)),
        endpoint("hr", "sheet", format!("{}/hook/2", hooks.base)),
        endpoint("hr", "chat", format!("{}/hook/3", hooks.base)),
    ];

    let dispatcher = Dispatcher::new(DispatchOptions {
        delivery_timeout: Duration::from_millis(300),
        ..Default::default()
    });
    let outcomes = timeout(TEST_TIMEOUT, dispatcher.dispatch(&[record()], &endpoints))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].endpoint.name, "sheet");
    assert!(matches!(
        failed[0].error,
        Some(DeliveryError::Timeout { .. })
    ));
    assert_eq!(hooks.received.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn in_flight_deliveries_stay_within_bound() {
    let ids: Vec<String> = (1..=6).map(|n| n.to_string()).collect();
    let hooks = start_webhooks_with(HookBehavior {
        slow: ids.clone(),
        delay: Duration::from_millis(100),
        ..Default::default()
    })
    .await;
    let endpoints: Vec<_> = ids
        .iter()
        .map(|id| endpoint("hr", id, format!("{}/hook/{id}", hooks.base)))
        .collect();

    let outcomes = timeout(
        TEST_TIMEOUT,
        Dispatcher::new(DispatchOptions {
            max_in_flight: 2,
            ..Default::default()
        })
        .dispatch(&[record()], &endpoints),
    )
    .await
    .unwrap();

    assert!(outcomes.iter().all(|o| o.success));
    assert_eq!(hooks.received.lock().unwrap().len(), 6);
    let peak = hooks.peak_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 2, "saw {peak} deliveries in flight");
    assert!(peak >= 1);
}
