//! Timeouts and addresses used when parties talk over the network.
//!
//! Both types can be loaded from JSON, so that a hosting application can describe a distributed
//! run in a file instead of in code:
//!
//! ```json
//! {
//!     "addresses": { "alice": "127.0.0.1:4000", "bob": "127.0.0.1:4001" },
//!     "local_party": "alice",
//!     "connect_timeout_secs": 30,
//!     "transport": { "receive_timeout_secs": 10 }
//! }
//! ```

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Timeouts and poll intervals of a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// How long a networked receive waits for a value before recording it as not received.
    pub receive_timeout_secs: f64,
    /// How often a networked receive checks the buffer for a newly arrived value.
    pub receive_poll_interval_secs: f64,
    /// How long to wait between two connection attempts.
    pub connect_poll_interval_secs: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            receive_timeout_secs: 60.0,
            receive_poll_interval_secs: 0.1,
            connect_poll_interval_secs: 0.25,
        }
    }
}

impl TransportConfig {
    /// The receive timeout as a [`Duration`].
    pub fn receive_timeout(&self) -> Duration {
        secs(self.receive_timeout_secs)
    }

    /// The receive poll interval as a [`Duration`].
    pub fn receive_poll_interval(&self) -> Duration {
        secs(self.receive_poll_interval_secs)
    }

    /// The connect poll interval as a [`Duration`].
    pub fn connect_poll_interval(&self) -> Duration {
        secs(self.connect_poll_interval_secs)
    }
}

/// Describes a distributed run: where every party listens and which one runs in this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// The `ip:port` every party listens on, keyed by party name.
    pub addresses: HashMap<String, String>,
    /// The party executed by this process.
    pub local_party: String,
    /// How long to keep retrying to connect to each of the other parties.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: f64,
    /// Settings applied to the transport of every party.
    #[serde(default)]
    pub transport: TransportConfig,
}

impl NetworkConfig {
    /// Parses a network configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// The connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_secs)
    }
}

fn default_connect_timeout() -> f64 {
    60.0
}

// negative or NaN settings are treated as zero
/// Negative and NaN values become zero, values too large for a [`Duration`] saturate.
fn secs(s: f64) -> Duration {
    match Duration::try_from_secs_f64(s) {
        Ok(d) => d,
        Err(_) if s > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}
