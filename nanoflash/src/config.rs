//! Settings file support for nanoflash.
//!
//! Every timeout and retry policy of the protocols can be tuned from a TOML
//! file. Durations are written in seconds and may be fractional:
//!
//! ```toml
//! [xmodem]
//! packet_size = 128
//! start_timeout = 60
//! chunk_delay = 0.05
//!
//! [mailbox]
//! response_timeout = 2.5
//!
//! [ctrl_ap]
//! erase_attempts = 45
//! ```
//!
//! Missing tables and keys keep their defaults.

use crate::debugger::{AhbConfig, CtrlApConfig, MailboxConfig};
use crate::error::{Error, Result};
use crate::protocol::XmodemConfig;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// All protocol settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// XMODEM transfer settings.
    pub xmodem: XmodemConfig,
    /// Mailbox protocol settings.
    pub mailbox: MailboxConfig,
    /// CTRL-AP settings.
    pub ctrl_ap: CtrlApConfig,
    /// AHB-AP settings.
    pub ahb: AhbConfig,
}

impl Settings {
    /// Parse settings from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Render the settings as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load settings from a file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;

        let settings = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))?;

        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load settings from a file, falling back to defaults if it is missing
    /// or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load_from_path(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{e}, using defaults");
                Self::default()
            },
        }
    }
}

/// `Duration` as floating-point seconds.
pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// `Option<Duration>` as floating-point seconds.
pub(crate) mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
