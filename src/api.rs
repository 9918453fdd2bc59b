//! Backend REST client for session records and the node list.

use crate::http;
use crate::model::{Node, Session};
use anyhow::{anyhow, Context, Result};
use std::time::Duration;

/// Read access to the backend's session and node records
pub trait BackendApi {
    /// The wallet's current session, `None` if it never had one
    fn current_session(&self, address: &str) -> Result<Option<Session>>;
    fn nodes(&self) -> Result<Vec<Node>>;
    /// Tunnel configuration for a session, as served
    fn session_config(&self, session_id: i64) -> Result<String>;
}

pub struct HttpBackend {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: http::agent(timeout),
        }
    }
}

impl BackendApi for HttpBackend {
    fn current_session(&self, address: &str) -> Result<Option<Session>> {
        let url = http::join(&self.base_url, "/api/sessions/current");
        let resp = self.agent.get(&url).query("address", address).call();
        match resp {
            Err(ureq::Error::Status(404, _)) => Ok(None),
            other => http::read_json(other).context("Failed to fetch current session"),
        }
    }

    fn nodes(&self) -> Result<Vec<Node>> {
        let url = http::join(&self.base_url, "/api/nodes");
        http::read_json(self.agent.get(&url).call()).context("Failed to fetch nodes")
    }

    fn session_config(&self, session_id: i64) -> Result<String> {
        let url = http::join(
            &self.base_url,
            &format!("/api/sessions/{}/config", session_id),
        );
        match self.agent.get(&url).call() {
            Ok(r) => Ok(r.into_string()?),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(anyhow!("Config download failed ({}): {}", code, body))
            }
            Err(e) => Err(anyhow!("Request failed: {}", e)),
        }
    }
}
