use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Message types the meter pushes. `Unknown` is parseable-but-unconvertible;
/// such readings are logged, never stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    InstantaneousDemand,
    CurrentSummation,
    PriceCluster,
    TimeCluster,
    NetworkInfo,
    MessageCluster,
    BlockPriceDetail,
    Unknown,
}

impl MessageType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "InstantaneousDemand" => Self::InstantaneousDemand,
            "CurrentSummation" | "CurrentSummationDelivered" => Self::CurrentSummation,
            "PriceCluster" => Self::PriceCluster,
            "TimeCluster" => Self::TimeCluster,
            "NetworkInfo" => Self::NetworkInfo,
            "MessageCluster" => Self::MessageCluster,
            "BlockPriceDetail" => Self::BlockPriceDetail,
            _ => Self::Unknown,
        }
    }

    /// Tag value used on stored points.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::InstantaneousDemand => "instantaneous_demand",
            Self::CurrentSummation => "current_summation",
            Self::PriceCluster => "price_cluster",
            Self::TimeCluster => "time_cluster",
            Self::NetworkInfo => "network_info",
            Self::MessageCluster => "message_cluster",
            Self::BlockPriceDetail => "block_price_detail",
            Self::Unknown => "unknown",
        }
    }

    /// Cluster messages that carry only verbatim text fields.
    pub fn is_text_only(&self) -> bool {
        matches!(
            self,
            Self::TimeCluster | Self::NetworkInfo | Self::MessageCluster | Self::BlockPriceDetail
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Format-agnostic result of parsing one device message.
///
/// `converted` holds physical-unit values keyed by a vocabulary fixed per
/// message type (`power_w`, `energy_delivered_kwh`, `energy_received_kwh`,
/// `price_per_kwh`); `raw_fields` keeps the unconverted field values for
/// diagnostics and for the text-only cluster types.
#[derive(Clone, Debug)]
pub struct ParsedReading {
    pub device_id: String,
    pub meter_id: Option<String>,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub raw_fields: HashMap<String, String>,
    pub converted: HashMap<String, f64>,
}

impl ParsedReading {
    pub fn new(device_id: String, message_type: MessageType, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id,
            meter_id: None,
            message_type,
            timestamp,
            raw_fields: HashMap::new(),
            converted: HashMap::new(),
        }
    }
}
