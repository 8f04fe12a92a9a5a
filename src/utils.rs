use chrono::{DateTime, Utc};

pub struct Utils;

impl Utils {
    pub fn utc() -> DateTime<Utc> {
        Utc::now()
    }
}
