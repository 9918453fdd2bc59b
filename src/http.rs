//! Shared plumbing for the blocking HTTP clients.

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

pub fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

pub fn join(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Map transport failures and error statuses to descriptive errors
pub fn check(resp: Result<ureq::Response, ureq::Error>) -> Result<ureq::Response> {
    match resp {
        Ok(r) => Ok(r),
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            Err(anyhow!("HTTP {}: {}", code, body))
        }
        Err(e) => Err(anyhow!("Request failed: {}", e)),
    }
}

/// Turn a ureq result into a decoded body or a descriptive error
pub fn read_json<T: DeserializeOwned>(resp: Result<ureq::Response, ureq::Error>) -> Result<T> {
    Ok(check(resp)?.into_json()?)
}

/// POST a JSON body; the reply body is left unread
pub fn post(agent: &ureq::Agent, url: &str, body: &Value) -> Result<ureq::Response> {
    check(
        agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_json(body),
    )
}

/// POST a JSON body and decode the JSON reply
pub fn post_json<T: DeserializeOwned>(agent: &ureq::Agent, url: &str, body: &Value) -> Result<T> {
    Ok(post(agent, url, body)?.into_json()?)
}
