use crate::prelude::*;

use crate::eagle::message::{MessageType, ParsedReading};
use crate::eagle::parser::{self, RawMessage};
use crate::rate_limiter::RateLimiter;
use crate::security::SecurityMonitor;
use crate::store::{Point, Store};

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

static MEASUREMENT: &str = "energy_monitor";

/// Gate-pipeline outcome for one inbound request. Every request ends in one
/// of these; the meter must always get a response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngestOutcome {
    /// Soft success: parsed-and-stored, parse failure, or store failure all
    /// land here so the device does not retry.
    Accepted,
    /// Source address is on the block-list.
    Denied,
    /// Credential missing or mismatched.
    Unauthorized,
    /// Sliding-window budget exhausted.
    RateLimited,
}

/// One inbound request, as the HTTP layer hands it over.
#[derive(Clone, Debug)]
pub struct IngestRequest {
    pub peer_addr: String,
    pub forwarded_for: Option<String>,
    pub api_key: Option<String>,
    pub content_type: Option<String>,
    pub body: bytes::Bytes,
}

#[derive(Default)]
pub struct IngestStats {
    pub total_requests: u64,
    pub successful_writes: u64,
    pub failed_writes: u64,
    pub parse_failures: u64,
    pub last_write: Option<DateTime<Utc>>,
    pub last_power_reading: Option<f64>,
}

impl IngestStats {
    pub fn print_summary(&self) {
        info!("Ingestion statistics:");
        info!("  Total requests: {}", self.total_requests);
        info!("  Successful writes: {}", self.successful_writes);
        info!("  Failed writes: {}", self.failed_writes);
        info!("  Parse failures: {}", self.parse_failures);
        if let Some(last_write) = self.last_write {
            info!("  Last successful write: {}", last_write);
        }
        if let Some(power_w) = self.last_power_reading {
            info!("  Last power reading: {} W", power_w);
        }
    }
}

/// Composes the gate pipeline and the decode path: suspicious-check, then
/// auth, then rate limit, then parse/convert/store. Owns the running
/// statistics and the injected store client.
pub struct Coordinator {
    config: ConfigWrapper,
    store: Arc<dyn Store>,
    rate_limiter: RateLimiter,
    pub security: Arc<SecurityMonitor>,
    pub stats: Arc<Mutex<IngestStats>>,
    start_time: DateTime<Utc>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, store: Arc<dyn Store>, security: Arc<SecurityMonitor>) -> Self {
        let rate_limit = config.rate_limit();

        Self {
            config,
            store,
            rate_limiter: RateLimiter::new(rate_limit.max_requests(), rate_limit.window()),
            security,
            stats: Arc::new(Mutex::new(IngestStats::default())),
            start_time: Utils::utc(),
        }
    }

    /// First forwarded-for entry wins over the direct peer address.
    pub fn client_addr(request: &IngestRequest) -> String {
        request
            .forwarded_for
            .as_deref()
            .and_then(|header| header.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .unwrap_or_else(|| request.peer_addr.clone())
    }

    pub async fn ingest(&self, request: IngestRequest) -> IngestOutcome {
        let now = Utils::utc();
        self.stats.lock().unwrap().total_requests += 1;

        let addr = Self::client_addr(&request);

        // Known-bad sources are rejected before any other work.
        if self.security.is_suspicious(&addr) {
            self.security.record_blocked(&addr);
            return IngestOutcome::Denied;
        }

        if let Some(expected) = self.config.security().api_key() {
            match request.api_key.as_deref() {
                Some(offered) if offered == expected.as_str() => {}
                offered => {
                    self.security.record_auth_failure(&addr, offered, now);
                    return IngestOutcome::Unauthorized;
                }
            }
        } else {
            warn!("api_key not configured - authentication disabled");
        }

        let identity = match request.api_key.as_deref() {
            Some(key) => format!("{}:{}", addr, key),
            None => addr.clone(),
        };
        if !self.rate_limiter.allow(&identity, now) {
            self.security.record_rate_violation(&addr, now);
            return IngestOutcome::RateLimited;
        }

        let raw = RawMessage {
            body: request.body,
            content_type: request.content_type,
            source: addr.clone(),
        };

        let readings = match parser::parse(&raw, now) {
            Ok(readings) => readings,
            Err(failure) => {
                // The meter retries hard on errors; a bad payload still gets
                // a clean acknowledgment.
                warn!("unparseable payload from {}: {}", addr, failure);
                self.stats.lock().unwrap().parse_failures += 1;
                return IngestOutcome::Accepted;
            }
        };

        futures::future::join_all(readings.into_iter().map(|reading| self.store_reading(reading)))
            .await;

        IngestOutcome::Accepted
    }

    async fn store_reading(&self, reading: ParsedReading) {
        if reading.message_type == MessageType::Unknown {
            info!("skipping unknown message type from device {}", reading.device_id);
            return;
        }

        let point = match Self::build_point(&reading) {
            Some(point) => point,
            None => {
                debug!(
                    "no storable fields in {} message from device {}",
                    reading.message_type, reading.device_id
                );
                return;
            }
        };

        if !self.config.influx().enabled() {
            debug!("influx disabled, dropping point");
            return;
        }

        let power_w = reading.converted.get("power_w").copied();

        // The write runs as its own task so a dropped connection does not
        // cancel it; the stored point is worth keeping either way.
        let timeout = std::time::Duration::from_secs(self.config.influx().write_timeout());
        let write = tokio::spawn({
            let store = self.store.clone();
            async move { tokio::time::timeout(timeout, store.write(point)).await }
        });

        let result = match write.await {
            Ok(result) => result,
            Err(err) => {
                self.stats.lock().unwrap().failed_writes += 1;
                error!("store write task failed: {}", err);
                return;
            }
        };

        let mut stats = self.stats.lock().unwrap();
        match result {
            Ok(Ok(())) => {
                stats.successful_writes += 1;
                stats.last_write = Some(Utils::utc());
                if let Some(power_w) = power_w {
                    stats.last_power_reading = Some(power_w);
                }
            }
            Ok(Err(err)) => {
                stats.failed_writes += 1;
                error!("store write failed: {:#}", err);
            }
            Err(_) => {
                stats.failed_writes += 1;
                error!("store write timed out after {}s", timeout.as_secs());
            }
        }
    }

    /// Builds the point for one reading: converted physical values, plus the
    /// verbatim text fields for the text-only cluster types. Returns `None`
    /// when nothing is storable (e.g. a zero divisor left no fields).
    fn build_point(reading: &ParsedReading) -> Option<Point> {
        let mut point = Point::new(MEASUREMENT, reading.timestamp)
            .tag("device_id", reading.device_id.as_str())
            .tag("message_type", reading.message_type.as_tag());
        if let Some(meter_id) = &reading.meter_id {
            point = point.tag("meter_id", meter_id.as_str());
        }

        for (name, value) in &reading.converted {
            point = point.float_field(name.as_str(), *value);
        }

        if reading.message_type.is_text_only() {
            for (name, value) in &reading.raw_fields {
                point = point.text_field(name.as_str(), value.as_str());
            }
        }

        if point.fields.is_empty() {
            None
        } else {
            Some(point)
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utils::utc() - self.start_time).num_seconds()
    }

    pub fn stats_json(&self) -> serde_json::Value {
        let stats = self.stats.lock().unwrap();
        serde_json::json!({
            "total_requests": stats.total_requests,
            "successful_writes": stats.successful_writes,
            "failed_writes": stats.failed_writes,
            "parse_failures": stats.parse_failures,
            "last_data_received": stats.last_write.map(|t| t.to_rfc3339()),
            "last_power_reading": stats.last_power_reading,
            "start_time": self.start_time.to_rfc3339(),
        })
    }
}
