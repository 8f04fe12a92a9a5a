use crate::prelude::*;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

/// Tracks authentication failures and rate-limit violations per source
/// address and escalates repeat offenders to a block-list. Every state change
/// is appended to a JSON-lines event log for audit; the log is best-effort
/// and never fails the calling request.
pub struct SecurityMonitor {
    config: config::Security,
    state: Mutex<State>,
    log_file: Mutex<Option<std::fs::File>>,
}

#[derive(Default)]
struct State {
    auth_failures: HashMap<String, Vec<DateTime<Utc>>>,
    rate_violations: HashMap<String, Vec<DateTime<Utc>>>,
    suspicious: HashSet<String>,
}

impl SecurityMonitor {
    pub fn new(config: config::Security) -> Self {
        let log_file = match Self::open_log(config.event_log()) {
            Ok(file) => Some(file),
            Err(err) => {
                error!("Failed to open security event log {}: {}", config.event_log(), err);
                None
            }
        };

        Self {
            config,
            state: Mutex::new(State::default()),
            log_file: Mutex::new(log_file),
        }
    }

    fn open_log(path: &str) -> Result<std::fs::File> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(file)
    }

    /// Appends one event line and mirrors it to the logger. Write failures
    /// are logged and swallowed.
    fn log_event(&self, event_type: &str, ip_address: &str, details: serde_json::Value) {
        let event = json!({
            "timestamp": Utils::utc().to_rfc3339(),
            "event_type": event_type,
            "ip_address": ip_address,
            "details": details,
        });

        if let Some(file) = self.log_file.lock().unwrap().as_mut() {
            if let Err(err) = writeln!(file, "{}", event) {
                error!("Failed to write security log: {}", err);
            }
        }

        warn!("Security event: {} from {} - {}", event_type, ip_address, event["details"]);
    }

    pub fn record_auth_failure(&self, ip_address: &str, api_key: Option<&str>, now: DateTime<Utc>) {
        let (count, flagged) = {
            let mut state = self.state.lock().unwrap();
            let cutoff = now - Duration::seconds(self.config.auth_failure_window() as i64);

            let count = {
                let failures = state.auth_failures.entry(ip_address.to_string()).or_default();
                failures.push(now);
                failures.retain(|instant| *instant > cutoff);
                failures.len()
            };

            let flagged = count >= self.config.max_auth_failures()
                && state.suspicious.insert(ip_address.to_string());
            (count, flagged)
        };

        if flagged {
            self.log_event("SUSPICIOUS_IP_FLAGGED", ip_address, json!({ "auth_failures": count }));
        }

        self.log_event("AUTH_FAILURE", ip_address, json!({ "api_key": truncate_key(api_key) }));
    }

    pub fn record_rate_violation(&self, ip_address: &str, now: DateTime<Utc>) {
        let (count, flagged) = {
            let mut state = self.state.lock().unwrap();
            let cutoff = now - Duration::seconds(self.config.rate_violation_window() as i64);

            let count = {
                let violations = state.rate_violations.entry(ip_address.to_string()).or_default();
                violations.push(now);
                violations.retain(|instant| *instant > cutoff);
                violations.len()
            };

            let flagged = count >= self.config.max_rate_violations()
                && state.suspicious.insert(ip_address.to_string());
            (count, flagged)
        };

        if flagged {
            self.log_event("EXCESSIVE_RATE_VIOLATIONS", ip_address, json!({ "violations": count }));
        }

        self.log_event("RATE_LIMIT_VIOLATION", ip_address, json!({}));
    }

    /// Membership check only; suspicious status never expires on its own.
    pub fn is_suspicious(&self, ip_address: &str) -> bool {
        self.state.lock().unwrap().suspicious.contains(ip_address)
    }

    pub fn record_blocked(&self, ip_address: &str) {
        self.log_event("BLOCKED_SUSPICIOUS_IP", ip_address, json!({}));
    }

    /// Drops the suspicious flag and all recorded history for an address.
    pub fn clear(&self, ip_address: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.suspicious.remove(ip_address);
            state.auth_failures.remove(ip_address);
            state.rate_violations.remove(ip_address);
        }

        self.log_event("IP_CLEARED", ip_address, json!({}));
    }

    /// Snapshot for the admin endpoint: flagged addresses plus in-window
    /// failure and violation counts.
    pub fn stats(&self, now: DateTime<Utc>) -> serde_json::Value {
        let state = self.state.lock().unwrap();

        let auth_cutoff = now - Duration::seconds(self.config.auth_failure_window() as i64);
        let rate_cutoff = now - Duration::seconds(self.config.rate_violation_window() as i64);

        let auth_failures: HashMap<&String, usize> = state
            .auth_failures
            .iter()
            .map(|(ip, times)| (ip, times.iter().filter(|t| **t > auth_cutoff).count()))
            .filter(|(_, count)| *count > 0)
            .collect();

        let rate_violations: HashMap<&String, usize> = state
            .rate_violations
            .iter()
            .map(|(ip, times)| (ip, times.iter().filter(|t| **t > rate_cutoff).count()))
            .filter(|(_, count)| *count > 0)
            .collect();

        let mut suspicious: Vec<&String> = state.suspicious.iter().collect();
        suspicious.sort();

        json!({
            "suspicious_ips": suspicious,
            "auth_failures": auth_failures,
            "rate_violations": rate_violations,
            "total_suspicious": state.suspicious.len(),
            "timestamp": now.to_rfc3339(),
        })
    }
}

fn truncate_key(api_key: Option<&str>) -> String {
    match api_key {
        Some(key) => format!("{}...", key.chars().take(8).collect::<String>()),
        None => "none".to_string(),
    }
}
