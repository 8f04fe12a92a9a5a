use crate::prelude::*;

use crate::eagle::decode::{decode_eagle_timestamp, decode_hex, device_epoch};
use crate::eagle::message::{MessageType, ParsedReading};
use crate::eagle::normalize::normalize;
use crate::eagle::scale::ScalingFactors;

use chrono::{DateTime, TimeZone, Utc};
use roxmltree::Document;
use serde_json::Value;

/// Tag the cloud-relay firmware wraps its messages in.
const WRAPPER_TAG: &str = "rainforest";

const UNKNOWN_DEVICE: &str = "unknown";

/// One inbound request body, as received.
#[derive(Clone, Debug)]
pub struct RawMessage {
    pub body: bytes::Bytes,
    pub content_type: Option<String>,
    pub source: String,
}

/// The payload was neither valid XML nor valid JSON (or empty). The caller
/// acknowledges this benignly; the meter retries aggressively on anything
/// that looks like an error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseFailure {
    reason: String,
}

impl ParseFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for ParseFailure {}

/// Parses a raw payload into readings.
///
/// Detection order: an XML content-type hint or a leading `<` selects the XML
/// path; anything else is treated as JSON. A payload that fails XML parsing
/// structurally gets one JSON attempt before the whole message is declared
/// unparseable. The nested JSON body format yields one reading per body
/// element; the other formats yield exactly one.
pub fn parse(raw: &RawMessage, now: DateTime<Utc>) -> Result<Vec<ParsedReading>, ParseFailure> {
    let text = match std::str::from_utf8(&raw.body) {
        Ok(text) => text.trim(),
        Err(_) => return Err(ParseFailure::new("payload is not valid UTF-8")),
    };

    if text.is_empty() {
        return Err(ParseFailure::new("empty payload"));
    }

    let hinted_xml = raw
        .content_type
        .as_deref()
        .map(|ct| ct.to_ascii_lowercase().contains("xml"))
        .unwrap_or(false);

    if hinted_xml || text.starts_with('<') {
        match parse_xml(text, now) {
            Ok(readings) => return Ok(readings),
            Err(err) => debug!("XML parse failed ({}), trying JSON", err),
        }
    }

    parse_json(text, now)
}

// XML {{{

fn parse_xml(text: &str, now: DateTime<Utc>) -> Result<Vec<ParsedReading>, ParseFailure> {
    let doc = Document::parse(text).map_err(|err| ParseFailure::new(format!("invalid XML: {err}")))?;
    let root = doc.root_element();

    let node = if root.tag_name().name() == WRAPPER_TAG {
        root.children().find(|n| {
            n.is_element() && MessageType::from_tag(n.tag_name().name()) != MessageType::Unknown
        })
    } else {
        Some(root)
    };

    let node = match node {
        Some(node) if MessageType::from_tag(node.tag_name().name()) != MessageType::Unknown => node,
        _ => {
            // Not a hard failure: keep whatever identifies the device so the
            // skip can be attributed in the logs.
            warn!("unrecognized XML message root {:?}", root.tag_name().name());
            let mut reading = ParsedReading::new(
                descendant_text(root, "DeviceMacId")
                    .map(normalize_mac)
                    .unwrap_or_else(|| UNKNOWN_DEVICE.to_string()),
                MessageType::Unknown,
                now,
            );
            reading.meter_id = descendant_text(root, "MeterMacId").map(normalize_mac);
            return Ok(vec![reading]);
        }
    };

    let message_type = MessageType::from_tag(node.tag_name().name());
    let timestamp = normalize(decode_eagle_timestamp(child_text(node, "TimeStamp"), now), now);

    let mut reading = ParsedReading::new(
        child_text(node, "DeviceMacId")
            .map(normalize_mac)
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string()),
        message_type,
        timestamp,
    );
    reading.meter_id = child_text(node, "MeterMacId").map(normalize_mac);

    match message_type {
        MessageType::InstantaneousDemand => {
            record_raw(&mut reading, node, &[("Demand", "demand"), ("Multiplier", "multiplier"), ("Divisor", "divisor")]);
            let demand = decode_hex(child_text(node, "Demand"));
            match xml_scaling(node).apply(demand as f64, 1000.0) {
                Some(power_w) => {
                    reading.converted.insert("power_w".to_string(), power_w);
                }
                None => warn!("divisor is zero, demand unavailable"),
            }
        }
        MessageType::CurrentSummation => {
            record_raw(
                &mut reading,
                node,
                &[
                    ("SummationDelivered", "summation_delivered"),
                    ("SummationReceived", "summation_received"),
                    ("Multiplier", "multiplier"),
                    ("Divisor", "divisor"),
                ],
            );
            let factors = xml_scaling(node);
            // The meter reports summations in watt-hours; the extra /1000
            // lands them in kWh. Dropping it inflates readings 1000x.
            if let Some(text) = child_text(node, "SummationDelivered") {
                let delivered = decode_hex(Some(text));
                match factors.apply(delivered as f64, 1.0 / 1000.0) {
                    Some(kwh) => {
                        reading.converted.insert("energy_delivered_kwh".to_string(), kwh);
                    }
                    None => warn!("divisor is zero, delivered summation unavailable"),
                }
            }
            if let Some(text) = child_text(node, "SummationReceived") {
                let received = decode_hex(Some(text));
                if let Some(kwh) = factors.apply(received as f64, 1.0 / 1000.0) {
                    reading.converted.insert("energy_received_kwh".to_string(), kwh);
                }
            }
        }
        MessageType::PriceCluster => {
            record_raw(&mut reading, node, &[("Price", "price"), ("TrailingDigits", "trailing_digits")]);
            if let Some(text) = child_text(node, "Price") {
                let price = decode_hex(Some(text));
                let digits = child_text(node, "TrailingDigits")
                    .map(|v| decode_hex(Some(v)))
                    .unwrap_or(2);
                reading
                    .converted
                    .insert("price_per_kwh".to_string(), price as f64 / 10f64.powi(digits as i32));
            }
        }
        MessageType::TimeCluster => {
            record_raw(&mut reading, node, &[("UTCTime", "utc_time"), ("LocalTime", "local_time")]);
        }
        MessageType::NetworkInfo => {
            record_raw(&mut reading, node, &[("LinkStrength", "link_strength"), ("Status", "status")]);
        }
        MessageType::MessageCluster => {
            record_raw(&mut reading, node, &[("Text", "message_text"), ("Id", "message_id")]);
        }
        MessageType::BlockPriceDetail => {
            record_raw(
                &mut reading,
                node,
                &[("CurrentBlock", "current_block"), ("CurrentPrice", "current_price")],
            );
        }
        MessageType::Unknown => unreachable!("unknown roots are handled above"),
    }

    Ok(vec![reading])
}

fn xml_scaling(node: roxmltree::Node<'_, '_>) -> ScalingFactors {
    ScalingFactors::new(
        child_text(node, "Multiplier").map(|v| decode_hex(Some(v))).unwrap_or(1),
        child_text(node, "Divisor").map(|v| decode_hex(Some(v))).unwrap_or(1),
    )
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn descendant_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn record_raw(reading: &mut ParsedReading, node: roxmltree::Node<'_, '_>, fields: &[(&str, &str)]) {
    for (tag, key) in fields {
        if let Some(text) = child_text(node, tag) {
            reading.raw_fields.insert((*key).to_string(), text.to_string());
        }
    }
}

fn normalize_mac(value: &str) -> String {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
        .to_string()
}

// }}}

// JSON {{{

fn parse_json(text: &str, now: DateTime<Utc>) -> Result<Vec<ParsedReading>, ParseFailure> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| ParseFailure::new(format!("payload is neither valid XML nor valid JSON: {err}")))?;

    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return Err(ParseFailure::new("JSON payload is not an object")),
    };

    if obj.get("body").map(Value::is_array).unwrap_or(false) {
        Ok(parse_nested_json(obj, now))
    } else {
        Ok(parse_flat_json(obj, now))
    }
}

/// Cloud-uploader format: an envelope with a `body` array of typed items.
/// Values here arrive already in physical units (kW / kWh).
fn parse_nested_json(obj: &serde_json::Map<String, Value>, now: DateTime<Utc>) -> Vec<ParsedReading> {
    let device_id = obj
        .get("deviceGuid")
        .and_then(Value::as_str)
        .map(normalize_mac)
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());

    let envelope_timestamp = obj.get("timestamp").and_then(millis_to_utc);

    let mut readings = Vec::new();

    for item in obj.get("body").and_then(Value::as_array).into_iter().flatten() {
        let item = match item.as_object() {
            Some(item) => item,
            None => {
                warn!("skipping non-object body element");
                continue;
            }
        };

        let data_type = item.get("dataType").and_then(Value::as_str).unwrap_or("");
        let empty = serde_json::Map::new();
        let data = item.get("data").and_then(Value::as_object).unwrap_or(&empty);

        let timestamp = item
            .get("timestamp")
            .and_then(millis_to_utc)
            .or(envelope_timestamp)
            .unwrap_or(now);
        let timestamp = normalize(timestamp, now);

        match data_type {
            "InstantaneousDemand" => {
                let mut reading =
                    ParsedReading::new(device_id.clone(), MessageType::InstantaneousDemand, timestamp);
                let demand_kw = data.get("demand").and_then(json_f64).unwrap_or(0.0);
                reading.converted.insert("power_w".to_string(), demand_kw * 1000.0);
                readings.push(reading);
            }
            "CurrentSummation" => {
                let mut reading =
                    ParsedReading::new(device_id.clone(), MessageType::CurrentSummation, timestamp);
                if let Some(delivered) = data.get("summationDelivered").and_then(json_f64) {
                    reading.converted.insert("energy_delivered_kwh".to_string(), delivered);
                }
                if let Some(received) = data.get("summationReceived").and_then(json_f64) {
                    reading.converted.insert("energy_received_kwh".to_string(), received);
                }
                readings.push(reading);
            }
            "Price" => {
                let mut reading =
                    ParsedReading::new(device_id.clone(), MessageType::PriceCluster, timestamp);
                if let Some(price) = data.get("price").and_then(json_f64) {
                    reading.converted.insert("price_per_kwh".to_string(), price);
                }
                if let Some(tier) = data.get("PriceTier") {
                    reading.raw_fields.insert("price_tier".to_string(), json_string(tier));
                }
                if let Some(label) = data.get("PriceRateLabel") {
                    reading.raw_fields.insert("price_label".to_string(), json_string(label));
                }
                readings.push(reading);
            }
            other => info!("skipping unsupported dataType {:?}", other),
        }
    }

    readings
}

/// Legacy flat format: decimal values at the top level, same scaling math as
/// the XML messages. Demand and summation groups become separate readings so
/// each point carries only its own message type's fields.
fn parse_flat_json(obj: &serde_json::Map<String, Value>, now: DateTime<Utc>) -> Vec<ParsedReading> {
    let device_id = obj
        .get("DeviceMacId")
        .and_then(Value::as_str)
        .map(normalize_mac)
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
    let meter_id = obj.get("MeterMacId").and_then(Value::as_str).map(normalize_mac);

    let timestamp = normalize(flat_timestamp(obj.get("TimeStamp"), now), now);

    let multiplier = obj.get("Multiplier").and_then(json_f64).unwrap_or(1.0);
    let divisor = obj.get("Divisor").and_then(json_f64).unwrap_or(1.0);

    let mut readings = Vec::new();

    if let Some(demand) = obj.get("Demand").and_then(json_f64) {
        let mut reading =
            ParsedReading::new(device_id.clone(), MessageType::InstantaneousDemand, timestamp);
        reading.meter_id = meter_id.clone();
        reading.raw_fields.insert("demand".to_string(), demand.to_string());
        match crate::eagle::scale::scale(demand, multiplier, divisor, 1000.0) {
            Some(power_w) => {
                reading.converted.insert("power_w".to_string(), power_w);
            }
            None => warn!("divisor is zero, demand unavailable"),
        }
        readings.push(reading);
    }

    let delivered = obj.get("CurrentSummationDelivered").and_then(json_f64);
    let received = obj.get("CurrentSummationReceived").and_then(json_f64);
    if delivered.is_some() || received.is_some() {
        let mut reading =
            ParsedReading::new(device_id.clone(), MessageType::CurrentSummation, timestamp);
        reading.meter_id = meter_id.clone();
        if let Some(delivered) = delivered {
            reading
                .raw_fields
                .insert("summation_delivered".to_string(), delivered.to_string());
            if let Some(kwh) = crate::eagle::scale::scale(delivered, multiplier, divisor, 1.0 / 1000.0) {
                reading.converted.insert("energy_delivered_kwh".to_string(), kwh);
            }
        }
        if let Some(received) = received {
            reading
                .raw_fields
                .insert("summation_received".to_string(), received.to_string());
            if let Some(kwh) = crate::eagle::scale::scale(received, multiplier, divisor, 1.0 / 1000.0) {
                reading.converted.insert("energy_received_kwh".to_string(), kwh);
            }
        }
        readings.push(reading);
    }

    if readings.is_empty() {
        warn!("flat JSON payload carries no recognized measurement fields");
        let mut reading = ParsedReading::new(device_id, MessageType::Unknown, timestamp);
        reading.meter_id = meter_id;
        readings.push(reading);
    }

    readings
}

/// Flat-format timestamps are usually RFC 3339 literals, but some firmware
/// revisions send the device-epoch counter here too.
fn flat_timestamp(value: Option<&Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    match value {
        Some(Value::String(text)) => match DateTime::parse_from_rfc3339(text) {
            Ok(timestamp) => timestamp.with_timezone(&Utc),
            Err(_) => decode_eagle_timestamp(Some(text), now),
        },
        Some(Value::Number(number)) => match number.as_i64() {
            Some(seconds) => chrono::Duration::try_seconds(seconds)
                .and_then(|offset| device_epoch().checked_add_signed(offset))
                .unwrap_or_else(|| {
                    warn!("numeric timestamp {} out of range, using current time", number);
                    now
                }),
            None => {
                warn!("non-integer timestamp {}, using current time", number);
                now
            }
        },
        _ => now,
    }
}

fn millis_to_utc(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    Utc.timestamp_millis_opt(millis).single()
}

/// The uploader is inconsistent about numbers-as-strings.
fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn json_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// }}}
