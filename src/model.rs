//! Records read from the backend: the live session and candidate nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing record of the wallet's VPN session
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i64,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rate_per_second: f64,
    #[serde(default, rename = "x4pnEarned")]
    pub x4pn_earned: f64,
}

impl Session {
    /// Start time, but only while the session is live
    pub fn active_since(&self) -> Option<DateTime<Utc>> {
        if self.is_active {
            self.started_at
        } else {
            None
        }
    }
}

/// A candidate VPN server
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub country_code: String,
    /// Round-trip latency in milliseconds
    #[serde(default)]
    pub latency: f64,
    #[serde(default)]
    pub rate_per_minute: f64,
    #[serde(default)]
    pub active_users: u64,
    /// Uptime percentage (0-100)
    #[serde(default)]
    pub uptime: f64,
    /// On-chain address the session is opened against
    #[serde(default)]
    pub operator: Option<String>,
}

impl Node {
    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_minute / 60.0
    }
}
