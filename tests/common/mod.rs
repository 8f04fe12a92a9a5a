use async_trait::async_trait;
use eagle_bridge::coordinator::{Coordinator, IngestRequest};
use eagle_bridge::eagle::parser::RawMessage;
use eagle_bridge::prelude::*;
use eagle_bridge::security::SecurityMonitor;
use eagle_bridge::store::{Point, Row, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-memory store capturing every written point; flip `fail_writes` to make
/// the backend refuse.
#[derive(Clone, Default)]
pub struct MockStore {
    pub points: Arc<Mutex<Vec<Point>>>,
    pub fail_writes: Arc<AtomicBool>,
}

impl MockStore {
    pub fn points(&self) -> Vec<Point> {
        self.points.lock().unwrap().clone()
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MockStore {
    async fn write(&self, point: Point) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("mock write failure");
        }
        self.points.lock().unwrap().push(point);
        Ok(())
    }

    async fn query(&self, _query: &str) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }
}

pub struct Factory;

impl Factory {
    pub const API_KEY: &'static str = "test-api-key";

    pub fn config(event_log: &std::path::Path) -> Config {
        let yaml = format!(
            r#"
http:
  host: 127.0.0.1
  port: 5000
influx:
  url: http://localhost:8086
  database: energy
security:
  api_key: "{}"
  admin_key: "test-admin-key"
  event_log: "{}"
"#,
            Self::API_KEY,
            event_log.display()
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    pub fn coordinator(config: Config, store: Arc<dyn Store>) -> Coordinator {
        let security = Arc::new(SecurityMonitor::new(config.security.clone()));
        Coordinator::new(ConfigWrapper::from_config(config), store, security)
    }

    pub fn raw(body: &str, content_type: Option<&str>) -> RawMessage {
        RawMessage {
            body: bytes::Bytes::copy_from_slice(body.as_bytes()),
            content_type: content_type.map(String::from),
            source: "203.0.113.9".to_string(),
        }
    }

    pub fn request(body: &str, content_type: Option<&str>, api_key: Option<&str>) -> IngestRequest {
        IngestRequest {
            peer_addr: "203.0.113.9".to_string(),
            forwarded_for: None,
            api_key: api_key.map(String::from),
            content_type: content_type.map(String::from),
            body: bytes::Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    pub fn xml_demand() -> &'static str {
        r#"<InstantaneousDemand>
  <DeviceMacId>0xd8d5b90000001234</DeviceMacId>
  <MeterMacId>0x00135003001234ab</MeterMacId>
  <TimeStamp>CURRENT</TimeStamp>
  <Demand>0x00000010</Demand>
  <Multiplier>0x00000001</Multiplier>
  <Divisor>0x00000001</Divisor>
</InstantaneousDemand>"#
    }

    pub fn nested_summation_json() -> &'static str {
        r#"{
  "deviceGuid": "0xd8d5b90000001234",
  "body": [
    {
      "dataType": "CurrentSummation",
      "timestamp": "1754300000000",
      "data": { "summationDelivered": 100.0, "summationReceived": 5.0 }
    }
  ]
}"#
    }

    pub fn flat_json() -> &'static str {
        r#"{
  "DeviceMacId": "0xd8d5b90000001234",
  "MeterMacId": "0x00135003001234ab",
  "TimeStamp": "2026-08-01T10:30:00Z",
  "Demand": 16,
  "CurrentSummationDelivered": 100000,
  "CurrentSummationReceived": 5000,
  "Multiplier": 1,
  "Divisor": 1
}"#
    }
}
