pub use std::io::Write;
pub use std::str::FromStr;

pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::options::Options;
pub use crate::utils::Utils;
