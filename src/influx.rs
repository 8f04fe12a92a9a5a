use crate::prelude::*;
use crate::store::{FieldValue, Point, Row, Store};

use async_trait::async_trait;
use rinfluxdb::line_protocol::{r#async::Client, LineBuilder};

/// InfluxDB v1 backend: line-protocol writes, InfluxQL reads.
pub struct Influx {
    config: config::Influx,
    client: Client,
    http: reqwest::Client,
}

impl Influx {
    pub fn new(config: config::Influx) -> Result<Self> {
        info!("initializing influx at {}", config.url());

        let url = reqwest::Url::parse(config.url())?;
        let credentials = match (config.username(), config.password()) {
            (Some(u), Some(p)) => Some((u, p)),
            _ => None,
        };
        let client = Client::new(url, credentials)?;

        Ok(Self {
            config,
            client,
            http: reqwest::Client::new(),
        })
    }

    fn database(&self) -> String {
        self.config.database().to_string()
    }
}

#[async_trait]
impl Store for Influx {
    async fn write(&self, point: Point) -> Result<()> {
        let mut line = LineBuilder::new(point.measurement.as_str());

        for (key, value) in &point.tags {
            line = line.insert_tag(key.as_str(), value.as_str());
        }
        for (key, value) in &point.fields {
            line = match value {
                FieldValue::Float(value) => line.insert_field(key.as_str(), *value),
                FieldValue::Text(value) => line.insert_field(key.as_str(), value.clone()),
            };
        }
        let lines = vec![line.set_timestamp(point.time).build()];

        trace!("Sending to InfluxDB: {:?}", lines);

        self.client
            .send(&self.database(), &lines)
            .await
            .map_err(|err| anyhow!("influx write failed: {:?}", err))?;

        Ok(())
    }

    async fn query(&self, query: &str) -> Result<Vec<Row>> {
        let url = format!("{}/query", self.config.url().trim_end_matches('/'));

        let mut request = self
            .http
            .get(&url)
            .query(&[("db", self.database().as_str()), ("q", query), ("epoch", "ms")]);
        if let (Some(username), Some(password)) = (self.config.username(), self.config.password()) {
            request = request.query(&[("u", username.as_str()), ("p", password.as_str())]);
        }

        let response = request.send().await?.error_for_status()?;
        let body: serde_json::Value = response.json().await?;

        let mut rows = Vec::new();
        if let Some(series) = body.pointer("/results/0/series").and_then(|s| s.as_array()) {
            for serie in series {
                let columns: Vec<String> = serie
                    .get("columns")
                    .and_then(|c| c.as_array())
                    .map(|cols| {
                        cols.iter()
                            .filter_map(|c| c.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();

                if let Some(values) = serie.get("values").and_then(|v| v.as_array()) {
                    for value_row in values {
                        if let Some(cells) = value_row.as_array() {
                            let row: Row =
                                columns.iter().cloned().zip(cells.iter().cloned()).collect();
                            rows.push(row);
                        }
                    }
                }
            }
        }

        Ok(rows)
    }
}
