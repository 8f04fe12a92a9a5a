use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, NoneAsEmptyString};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub http: Http,
    pub influx: Influx,

    #[serde(default)]
    pub security: Security,

    #[serde(default)]
    pub rate_limit: RateLimit,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Http {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Http {
    #[serde(default = "Config::default_http_host")]
    pub host: String,

    #[serde(default = "Config::default_http_port")]
    pub port: u16,

    /// Origins allowed to hit the read-side API; empty permits any origin.
    #[serde(default = "Vec::new")]
    pub cors_origins: Vec<String>,
}

impl Http {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.cors_origins
    }
} // }}}

// Influx {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Influx {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,

    pub database: String,

    #[serde(default = "Config::default_write_timeout")]
    pub write_timeout: u64,
}

impl Influx {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn write_timeout(&self) -> u64 {
        self.write_timeout
    }
} // }}}

// Security {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Security {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub admin_key: Option<String>,

    #[serde(default = "Config::default_event_log")]
    pub event_log: String,

    #[serde(default = "Config::default_max_auth_failures")]
    pub max_auth_failures: usize,

    #[serde(default = "Config::default_security_window")]
    pub auth_failure_window: u64,

    #[serde(default = "Config::default_max_rate_violations")]
    pub max_rate_violations: usize,

    #[serde(default = "Config::default_security_window")]
    pub rate_violation_window: u64,
}

impl Security {
    pub fn api_key(&self) -> &Option<String> {
        &self.api_key
    }

    pub fn admin_key(&self) -> &Option<String> {
        &self.admin_key
    }

    pub fn event_log(&self) -> &str {
        &self.event_log
    }

    pub fn max_auth_failures(&self) -> usize {
        self.max_auth_failures
    }

    pub fn auth_failure_window(&self) -> u64 {
        self.auth_failure_window
    }

    pub fn max_rate_violations(&self) -> usize {
        self.max_rate_violations
    }

    pub fn rate_violation_window(&self) -> u64 {
        self.rate_violation_window
    }
}

impl Default for Security {
    fn default() -> Self {
        Self {
            api_key: None,
            admin_key: None,
            event_log: Config::default_event_log(),
            max_auth_failures: Config::default_max_auth_failures(),
            auth_failure_window: Config::default_security_window(),
            max_rate_violations: Config::default_max_rate_violations(),
            rate_violation_window: Config::default_security_window(),
        }
    }
} // }}}

// RateLimit {{{
#[derive(Clone, Debug, Deserialize)]
pub struct RateLimit {
    #[serde(default = "Config::default_rate_limit")]
    pub max_requests: usize,

    #[serde(default = "Config::default_rate_window")]
    pub window: u64,
}

impl RateLimit {
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> u64 {
        self.window
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: Config::default_rate_limit(),
            window: Config::default_rate_window(),
        }
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn http(&self) -> Http {
        self.config.lock().unwrap().http.clone()
    }

    pub fn influx(&self) -> Influx {
        self.config.lock().unwrap().influx.clone()
    }

    pub fn security(&self) -> Security {
        self.config.lock().unwrap().security.clone()
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.config.lock().unwrap().rate_limit.clone()
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }

    pub fn log_summary(&self) {
        self.config.lock().unwrap().log_summary();
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  HTTP:");
        info!("    Host: {}", self.http.host);
        info!("    Port: {}", self.http.port);
        if self.http.cors_origins.is_empty() {
            info!("    CORS: any origin");
        } else {
            info!("    CORS origins: {}", self.http.cors_origins.join(", "));
        }

        info!("  InfluxDB: {}", if self.influx.enabled { "enabled" } else { "disabled" });
        if self.influx.enabled {
            info!("    URL: {}", self.influx.url);
            info!("    Database: {}", self.influx.database);
            info!("    Write timeout: {}s", self.influx.write_timeout);
        }

        info!("  Security:");
        info!("    API key: {}", if self.security.api_key.is_some() { "configured" } else { "not configured" });
        info!("    Admin key: {}", if self.security.admin_key.is_some() { "configured" } else { "not configured" });
        info!("    Event log: {}", self.security.event_log);
        info!("    Auth failure threshold: {} per {}s", self.security.max_auth_failures, self.security.auth_failure_window);
        info!("    Rate violation threshold: {} per {}s", self.security.max_rate_violations, self.security.rate_violation_window);

        info!("  Rate limit: {} requests per {}s", self.rate_limit.max_requests, self.rate_limit.window);
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        if self.http.port == 0 {
            bail!("http.port must be between 1 and 65535");
        }
        if self.http.host.is_empty() {
            return Err(anyhow!("config.rs:HTTP host cannot be empty"));
        }

        if self.influx.enabled {
            if let Err(e) = url::Url::parse(&self.influx.url) {
                return Err(anyhow!("config.rs:Invalid InfluxDB URL: {}", e));
            }
            if self.influx.database.is_empty() {
                return Err(anyhow!("config.rs:InfluxDB database name cannot be empty"));
            }
            if self.influx.write_timeout == 0 {
                return Err(anyhow!("config.rs:Invalid write timeout: 0"));
            }
        }

        if self.rate_limit.max_requests == 0 {
            bail!("rate_limit.max_requests must be greater than 0");
        }
        if self.rate_limit.window == 0 {
            bail!("rate_limit.window must be greater than 0");
        }

        if self.security.auth_failure_window == 0 || self.security.rate_violation_window == 0 {
            bail!("security windows must be greater than 0");
        }

        Ok(())
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_http_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_http_port() -> u16 {
        5000
    }

    fn default_write_timeout() -> u64 {
        30
    }

    fn default_event_log() -> String {
        "/tmp/security_events.log".to_string()
    }

    fn default_max_auth_failures() -> usize {
        5
    }

    fn default_max_rate_violations() -> usize {
        10
    }

    fn default_security_window() -> u64 {
        3600
    }

    fn default_rate_limit() -> usize {
        60
    }

    fn default_rate_window() -> u64 {
        60
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
