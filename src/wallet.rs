//! Wallet provider and the connected-account state.

use crate::http;
use crate::notify::{Notice, Notifier};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// An external wallet holding the user's signing key
pub trait WalletProvider {
    /// Ask the user to connect; yields the account address
    fn connect(&self) -> Result<String>;
    fn disconnect(&self) -> Result<()>;
    /// Ask the user to approve acting with `address`
    fn authorize(&self, address: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ConnectReply {
    address: String,
}

#[derive(Debug, Deserialize)]
struct AuthorizeReply {
    #[serde(default)]
    authorized: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Wallet reached through a local HTTP bridge
pub struct BridgeWallet {
    base_url: String,
    agent: ureq::Agent,
}

impl BridgeWallet {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: http::agent(timeout),
        }
    }
}

impl WalletProvider for BridgeWallet {
    fn connect(&self) -> Result<String> {
        let url = http::join(&self.base_url, "/connect");
        let reply: ConnectReply = http::post_json(&self.agent, &url, &json!({}))?;
        Ok(reply.address)
    }

    fn disconnect(&self) -> Result<()> {
        let url = http::join(&self.base_url, "/disconnect");
        // bridges may answer with an empty body
        http::post(&self.agent, &url, &json!({}))?;
        Ok(())
    }

    fn authorize(&self, address: &str) -> Result<()> {
        let url = http::join(&self.base_url, "/authorize");
        let reply: AuthorizeReply =
            http::post_json(&self.agent, &url, &json!({ "address": address }))?;
        if reply.authorized {
            Ok(())
        } else {
            Err(anyhow!(reply
                .message
                .unwrap_or_else(|| "Authorization rejected".to_string())))
        }
    }
}

/// Shorten an address for display: 0x1234…abcd
pub fn short_address(address: &str) -> String {
    if address.len() <= 10 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 4..])
}

/// The connected account, if any
pub struct Wallet {
    provider: Box<dyn WalletProvider>,
    address: Option<String>,
}

impl Wallet {
    pub fn new(provider: Box<dyn WalletProvider>) -> Self {
        Self {
            provider,
            address: None,
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    pub fn connect(&mut self, notifier: &dyn Notifier) -> bool {
        match self.provider.connect() {
            Ok(address) => {
                notifier.notify(Notice::success(
                    "Wallet connected",
                    short_address(&address),
                ));
                self.address = Some(address);
                true
            }
            Err(e) => {
                notifier.notify(Notice::error("Wallet connection failed", e.to_string()));
                false
            }
        }
    }

    pub fn disconnect(&mut self, notifier: &dyn Notifier) -> bool {
        match self.provider.disconnect() {
            Ok(()) => {
                self.address = None;
                notifier.notify(Notice::success("Wallet disconnected", "Account released"));
                true
            }
            Err(e) => {
                notifier.notify(Notice::error("Wallet disconnect failed", e.to_string()));
                false
            }
        }
    }

    /// Request authorization for the connected account
    pub fn authorize(&self) -> Result<()> {
        let address = self
            .address
            .as_deref()
            .ok_or_else(|| anyhow!("Wallet not connected"))?;
        self.provider.authorize(address)
    }

    pub fn reauthorize(&self, notifier: &dyn Notifier) -> bool {
        match self.authorize() {
            Ok(()) => {
                notifier.notify(Notice::success("Wallet re-authorized", "Signing approved"));
                true
            }
            Err(e) => {
                notifier.notify(Notice::error("Authorization failed", e.to_string()));
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeWallet;
    use super::*;
    use crate::notify::{Level, MemoryNotifier};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_short_address() {
        assert_eq!(
            short_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"),
            "0x5aAe…eAed"
        );
        assert_eq!(short_address("0x1234"), "0x1234");
    }

    #[test]
    fn test_connect_and_disconnect() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut wallet = Wallet::new(Box::new(FakeWallet::new(log.clone())));
        let sink = MemoryNotifier::default();

        assert!(wallet.connect(&sink));
        assert!(wallet.is_connected());
        assert!(wallet.disconnect(&sink));
        assert!(!wallet.is_connected());
        assert_eq!(sink.count(Level::Success), 2);
        assert_eq!(*log.borrow(), vec!["wallet.connect", "wallet.disconnect"]);
    }

    #[test]
    fn test_failed_connect_reports_error() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut fake = FakeWallet::new(log);
        fake.fail_connect = true;
        let mut wallet = Wallet::new(Box::new(fake));
        let sink = MemoryNotifier::default();

        assert!(!wallet.connect(&sink));
        assert!(!wallet.is_connected());
        let notices = sink.notices();
        assert_eq!(notices[0].level, Level::Error);
        assert_eq!(notices[0].detail.as_deref(), Some("User rejected the request"));
    }

    #[test]
    fn test_bridge_disconnect_accepts_empty_reply() {
        let base = crate::http::testing::serve_once("204 No Content", "");
        let bridge = BridgeWallet::new(&base, Duration::from_secs(5));
        assert!(bridge.disconnect().is_ok());
    }

    #[test]
    fn test_bridge_authorize_rejection_message() {
        let base = crate::http::testing::serve_once(
            "200 OK",
            r#"{"authorized":false,"message":"User denied"}"#,
        );
        let bridge = BridgeWallet::new(&base, Duration::from_secs(5));
        assert_eq!(
            bridge.authorize("0xabc").unwrap_err().to_string(),
            "User denied"
        );
    }

    #[test]
    fn test_authorize_requires_connection() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let wallet = Wallet::new(Box::new(FakeWallet::new(log.clone())));
        let sink = MemoryNotifier::default();

        assert!(!wallet.reauthorize(&sink));
        // provider never asked without an account
        assert!(log.borrow().is_empty());
    }
}
