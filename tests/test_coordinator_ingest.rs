mod common;
use common::*;

use eagle_bridge::coordinator::IngestOutcome;
use eagle_bridge::prelude::*;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn xml_demand_is_stored_as_a_tagged_point() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    let coordinator = Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    );

    let outcome = coordinator
        .ingest(Factory::request(
            Factory::xml_demand(),
            Some("application/xml"),
            Some(Factory::API_KEY),
        ))
        .await;

    assert_eq!(outcome, IngestOutcome::Accepted);

    let points = store.points();
    assert_eq!(points.len(), 1);
    let point = &points[0];
    assert_eq!(point.measurement, "energy_monitor");
    assert_eq!(point.tag_value("device_id"), Some("d8d5b90000001234"));
    assert_eq!(point.tag_value("meter_id"), Some("00135003001234ab"));
    assert_eq!(point.tag_value("message_type"), Some("instantaneous_demand"));
    assert_eq!(point.float("power_w"), Some(16000.0));

    let stats = coordinator.stats.lock().unwrap();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_writes, 1);
    assert_eq!(stats.failed_writes, 0);
    assert_eq!(stats.last_power_reading, Some(16000.0));
    assert!(stats.last_write.is_some());
}

#[tokio::test]
async fn nested_summation_stores_delivered_and_received() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    let coordinator = Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    );

    let outcome = coordinator
        .ingest(Factory::request(
            Factory::nested_summation_json(),
            Some("application/json"),
            Some(Factory::API_KEY),
        ))
        .await;

    assert_eq!(outcome, IngestOutcome::Accepted);

    let points = store.points();
    assert_eq!(points.len(), 1);
    let point = &points[0];
    let delivered = point.float("energy_delivered_kwh").unwrap();
    let received = point.float("energy_received_kwh").unwrap();
    assert!((delivered - 100.0).abs() < 1e-6);
    assert!((received - 5.0).abs() < 1e-6);
    // net consumption stays derivable from the stored pair
    assert!((delivered - received - 95.0).abs() < 1e-6);
}

#[tokio::test]
async fn empty_body_is_acknowledged_without_a_write() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    let coordinator = Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    );

    let outcome = coordinator
        .ingest(Factory::request("", Some("application/xml"), Some(Factory::API_KEY)))
        .await;

    assert_eq!(outcome, IngestOutcome::Accepted);
    assert!(store.points().is_empty());

    let stats = coordinator.stats.lock().unwrap();
    assert_eq!(stats.parse_failures, 1);
    assert_eq!(stats.successful_writes, 0);
}

#[tokio::test]
async fn flagged_addresses_are_denied_before_parsing() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    let coordinator = Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    );

    let now = Utils::utc();
    for _ in 0..5 {
        coordinator.security.record_auth_failure("203.0.113.9", Some("bad"), now);
    }

    // a valid key does not help once the address is flagged
    let outcome = coordinator
        .ingest(Factory::request(
            Factory::xml_demand(),
            Some("application/xml"),
            Some(Factory::API_KEY),
        ))
        .await;

    assert_eq!(outcome, IngestOutcome::Denied);
    assert!(store.points().is_empty());
}

#[tokio::test]
async fn wrong_key_is_unauthorized_and_recorded() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    let coordinator = Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    );

    let outcome = coordinator
        .ingest(Factory::request(
            Factory::xml_demand(),
            Some("application/xml"),
            Some("wrong-key"),
        ))
        .await;

    assert_eq!(outcome, IngestOutcome::Unauthorized);
    assert!(store.points().is_empty());

    let stats = coordinator.security.stats(Utils::utc());
    assert_eq!(stats["auth_failures"]["203.0.113.9"], 1);
}

#[tokio::test]
async fn missing_key_is_unauthorized_when_one_is_configured() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    let coordinator = Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    );

    let outcome = coordinator
        .ingest(Factory::request(Factory::xml_demand(), Some("application/xml"), None))
        .await;

    assert_eq!(outcome, IngestOutcome::Unauthorized);
}

#[tokio::test]
async fn unconfigured_key_disables_authentication() {
    common_setup();

    let dir = tempdir().unwrap();
    let mut config = Factory::config(&dir.path().join("events.log"));
    config.security.api_key = None;

    let store = MockStore::default();
    let coordinator = Factory::coordinator(config, Arc::new(store.clone()));

    let outcome = coordinator
        .ingest(Factory::request(Factory::xml_demand(), Some("application/xml"), None))
        .await;

    assert_eq!(outcome, IngestOutcome::Accepted);
    assert_eq!(store.points().len(), 1);
}

#[tokio::test]
async fn rate_limit_violations_are_rejected_and_recorded() {
    common_setup();

    let dir = tempdir().unwrap();
    let mut config = Factory::config(&dir.path().join("events.log"));
    config.rate_limit.max_requests = 2;

    let store = MockStore::default();
    let coordinator = Factory::coordinator(config, Arc::new(store.clone()));

    for _ in 0..2 {
        let outcome = coordinator
            .ingest(Factory::request(
                Factory::xml_demand(),
                Some("application/xml"),
                Some(Factory::API_KEY),
            ))
            .await;
        assert_eq!(outcome, IngestOutcome::Accepted);
    }

    let outcome = coordinator
        .ingest(Factory::request(
            Factory::xml_demand(),
            Some("application/xml"),
            Some(Factory::API_KEY),
        ))
        .await;

    assert_eq!(outcome, IngestOutcome::RateLimited);
    assert_eq!(store.points().len(), 2);

    let stats = coordinator.security.stats(Utils::utc());
    assert_eq!(stats["rate_violations"]["203.0.113.9"], 1);
}

#[tokio::test]
async fn store_failure_still_acknowledges_the_device() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    store.fail_writes();

    let coordinator = Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    );

    let outcome = coordinator
        .ingest(Factory::request(
            Factory::xml_demand(),
            Some("application/xml"),
            Some(Factory::API_KEY),
        ))
        .await;

    assert_eq!(outcome, IngestOutcome::Accepted);

    let stats = coordinator.stats.lock().unwrap();
    assert_eq!(stats.failed_writes, 1);
    assert_eq!(stats.successful_writes, 0);
    assert!(stats.last_write.is_none());
}

#[tokio::test]
async fn unknown_messages_are_acknowledged_but_never_stored() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    let coordinator = Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    );

    let xml = r#"<FirmwareStatus><DeviceMacId>0xd8d5b90000001234</DeviceMacId></FirmwareStatus>"#;
    let outcome = coordinator
        .ingest(Factory::request(xml, Some("application/xml"), Some(Factory::API_KEY)))
        .await;

    assert_eq!(outcome, IngestOutcome::Accepted);
    assert!(store.points().is_empty());
}

#[tokio::test]
async fn forwarded_for_header_identifies_the_client() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    let coordinator = Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    );

    let mut request = Factory::request(Factory::xml_demand(), Some("application/xml"), Some("bad"));
    request.forwarded_for = Some("198.51.100.7, 10.0.0.1".to_string());

    let outcome = coordinator.ingest(request).await;
    assert_eq!(outcome, IngestOutcome::Unauthorized);

    let stats = coordinator.security.stats(Utils::utc());
    assert_eq!(stats["auth_failures"]["198.51.100.7"], 1);
}

#[tokio::test]
async fn text_cluster_messages_store_their_raw_fields() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    let coordinator = Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    );

    let xml = r#"<MessageCluster>
  <DeviceMacId>0xd8d5b90000001234</DeviceMacId>
  <Text>Planned outage tonight</Text>
  <Id>0x2a</Id>
</MessageCluster>"#;

    let outcome = coordinator
        .ingest(Factory::request(xml, Some("application/xml"), Some(Factory::API_KEY)))
        .await;

    assert_eq!(outcome, IngestOutcome::Accepted);

    let points = store.points();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].tag_value("message_type"), Some("message_cluster"));
    assert_eq!(
        points[0].fields.get("message_text"),
        Some(&eagle_bridge::store::FieldValue::Text("Planned outage tonight".to_string()))
    );
}

#[tokio::test]
async fn concurrent_requests_are_all_accounted_for() {
    common_setup();

    let dir = tempdir().unwrap();
    let store = MockStore::default();
    let coordinator = Arc::new(Factory::coordinator(
        Factory::config(&dir.path().join("events.log")),
        Arc::new(store.clone()),
    ));

    let a = coordinator.ingest(Factory::request(
        Factory::xml_demand(),
        Some("application/xml"),
        Some(Factory::API_KEY),
    ));
    let b = coordinator.ingest(Factory::request(
        Factory::nested_summation_json(),
        Some("application/json"),
        Some(Factory::API_KEY),
    ));

    let (outcome_a, outcome_b) = futures::join!(a, b);
    assert_eq!(outcome_a, IngestOutcome::Accepted);
    assert_eq!(outcome_b, IngestOutcome::Accepted);

    assert_eq!(store.points().len(), 2);
    let stats = coordinator.stats.lock().unwrap();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.successful_writes, 2);
}
