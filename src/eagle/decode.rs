use crate::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

/// The meter counts seconds from its own epoch, not the Unix one.
pub fn device_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

/// Decodes a device hex field, with or without a `0x`/`0X` prefix.
///
/// The meter occasionally sends blank or truncated fields; those decode to 0
/// with a warning rather than failing the whole message.
pub fn decode_hex(value: Option<&str>) -> u64 {
    let raw = match value {
        Some(raw) => raw.trim(),
        None => {
            warn!("missing hex field, defaulting to 0");
            return 0;
        }
    };

    if raw.is_empty() {
        warn!("empty hex field, defaulting to 0");
        return 0;
    }

    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);

    match u64::from_str_radix(digits, 16) {
        Ok(value) => value,
        Err(err) => {
            warn!("undecodable hex field {:?}: {}", raw, err);
            0
        }
    }
}

/// Decodes a device timestamp field into an absolute instant.
///
/// `CURRENT` is a device sentinel for "right now". A `0x` prefix selects hex,
/// otherwise the value is decimal; either way it counts seconds since the
/// device epoch. Undecodable values fall back to `now` so that a reading
/// always carries a time.
pub fn decode_eagle_timestamp(value: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let raw = match value {
        Some(raw) if !raw.trim().is_empty() => raw.trim(),
        _ => {
            warn!("missing device timestamp, using current time");
            return now;
        }
    };

    if raw == "CURRENT" {
        return now;
    }

    let seconds = if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        raw.parse::<i64>()
    };

    match seconds {
        Ok(seconds) => {
            let decoded = chrono::Duration::try_seconds(seconds)
                .and_then(|offset| device_epoch().checked_add_signed(offset));
            match decoded {
                Some(timestamp) => timestamp,
                None => {
                    warn!("device timestamp {:?} out of range, using current time", raw);
                    now
                }
            }
        }
        Err(err) => {
            warn!("undecodable device timestamp {:?}: {}", raw, err);
            now
        }
    }
}
