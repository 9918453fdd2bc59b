//! Calls into the on-chain VPN session contract.
//!
//! Transactions are submitted through a relay that waits for the receipt
//! before answering, so every call here returns a mined receipt or an error.

use crate::http;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Failure of a contract call
#[derive(Debug, Clone, PartialEq)]
pub struct ContractError {
    /// Revert reason reported by the chain, when there is one
    pub reason: Option<String>,
    pub message: String,
}

impl ContractError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            reason: None,
            message: message.into(),
        }
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            message: "transaction reverted".to_string(),
        }
    }

    /// Text shown to the user: the revert reason, else the message
    pub fn user_message(&self) -> &str {
        match &self.reason {
            Some(reason) if !reason.is_empty() => reason,
            _ => &self.message,
        }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} ({})", self.message, reason),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ContractError {}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TxReceipt {
    pub hash: String,
    /// 1 = success, 0 = reverted
    pub status: u8,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }

    /// Treat a reverted receipt as a failed call
    pub fn ensure_success(self) -> Result<TxReceipt, ContractError> {
        if self.succeeded() {
            Ok(self)
        } else {
            Err(ContractError::reverted(format!(
                "transaction {} reverted",
                self.hash
            )))
        }
    }
}

/// The session contract as seen by the client. `signer` is the wallet
/// address the transaction is sent from.
pub trait SessionContract {
    fn start_session(
        &self,
        signer: &str,
        target: &str,
        rate_per_second: f64,
    ) -> Result<TxReceipt, ContractError>;
    fn settle_session(&self, signer: &str) -> Result<TxReceipt, ContractError>;
    fn end_session(&self, signer: &str) -> Result<TxReceipt, ContractError>;
    /// Deposit available for paying sessions
    fn balance_of(&self, address: &str) -> Result<f64, ContractError>;
}

#[derive(Debug, Deserialize)]
struct RelayError {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceReply {
    balance: f64,
}

/// Contract client backed by the transaction relay
pub struct RelayContract {
    base_url: String,
    agent: ureq::Agent,
}

impl RelayContract {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: http::agent(timeout),
        }
    }

    fn send(&self, path: &str, body: Value) -> Result<TxReceipt, ContractError> {
        let url = http::join(&self.base_url, path);
        let resp = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(body);
        let receipt: TxReceipt = decode(resp)?;
        receipt.ensure_success()
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    resp: Result<ureq::Response, ureq::Error>,
) -> Result<T, ContractError> {
    match resp {
        Ok(r) => r
            .into_json()
            .map_err(|e| ContractError::new(format!("Invalid relay reply: {}", e))),
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            Err(relay_error(code, &body))
        }
        Err(e) => Err(ContractError::new(format!("Relay unreachable: {}", e))),
    }
}

/// Build an error from a relay error body: `{ "reason"?, "message"? }`
fn relay_error(code: u16, body: &str) -> ContractError {
    match serde_json::from_str::<RelayError>(body) {
        Ok(err) => ContractError {
            reason: err.reason,
            message: err
                .message
                .unwrap_or_else(|| format!("Relay error {}", code)),
        },
        Err(_) if body.trim().is_empty() => ContractError::new(format!("Relay error {}", code)),
        Err(_) => ContractError::new(format!("Relay error {}: {}", code, body.trim())),
    }
}

impl SessionContract for RelayContract {
    fn start_session(
        &self,
        signer: &str,
        target: &str,
        rate_per_second: f64,
    ) -> Result<TxReceipt, ContractError> {
        self.send(
            "/vpn/start",
            json!({
                "signer": signer,
                "target": target,
                "ratePerSecond": rate_per_second,
            }),
        )
    }

    fn settle_session(&self, signer: &str) -> Result<TxReceipt, ContractError> {
        self.send("/vpn/settle", json!({ "signer": signer }))
    }

    fn end_session(&self, signer: &str) -> Result<TxReceipt, ContractError> {
        self.send("/vpn/end", json!({ "signer": signer }))
    }

    fn balance_of(&self, address: &str) -> Result<f64, ContractError> {
        let url = http::join(&self.base_url, &format!("/balance/{}", address));
        let reply: BalanceReply = decode(self.agent.get(&url).call())?;
        Ok(reply.balance)
    }
}
