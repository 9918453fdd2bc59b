//! Connect/disconnect flows and the client-side session state.
//!
//! Every action is handled at this boundary: failures become notices and the
//! caller gets an outcome value, never an error.

use crate::analysis::{self, Analysis};
use crate::api::BackendApi;
use crate::contract::{SessionContract, TxReceipt};
use crate::meter::{Projection, Reading, SessionMeter};
use crate::model::{Node, Session};
use crate::notify::{Notice, Notifier};
use crate::ticker::{Ticker, TICK_PERIOD};
use crate::wallet::Wallet;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FlowOptions {
    /// Scripted length of the "analyzing" display
    pub analysis_delay: Duration,
    pub default_rate_per_second: f64,
    pub default_target: Option<String>,
    pub low_balance_secs: u64,
    pub tick_period: Duration,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            analysis_delay: Duration::from_millis(3_000),
            default_rate_per_second: 0.0001,
            default_target: None,
            low_balance_secs: crate::meter::DEFAULT_LOW_BALANCE_SECS,
            tick_period: TICK_PERIOD,
        }
    }
}

/// Whether the connect control is enabled, and if not, why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Ready,
    WalletNotConnected,
    NoBalance,
    NoTarget,
    AlreadyConnected,
    NotConnected,
    Processing,
}

impl Gate {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::WalletNotConnected => "Connect your wallet first",
            Self::NoBalance => "Deposit X4PN to start a session",
            Self::NoTarget => "No node operator address; select a node or set contract.default_target",
            Self::AlreadyConnected => "A session is already active",
            Self::NotConnected => "No active session",
            Self::Processing => "Another request is in progress",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// Preconditions not met; nothing was called
    Refused(Gate),
    /// Wallet authorization failed; nothing else was called
    Unauthorized(String),
    /// Session start call failed
    Failed(String),
    Connected {
        receipt: TxReceipt,
        analysis: Analysis,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectOutcome {
    Refused(Gate),
    Failed(String),
    Ended { receipt: TxReceipt, settled: bool },
}

/// Snapshot for display
#[derive(Debug, Clone)]
pub struct Status {
    pub address: Option<String>,
    pub balance: f64,
    pub connected: bool,
    pub processing: bool,
    pub session: Option<Session>,
    pub reading: Reading,
    pub projection: Projection,
    pub selected: Option<Node>,
}

/// Client-side state machine driving the wallet, contract and meter
pub struct Controller {
    wallet: Wallet,
    contract: Box<dyn SessionContract>,
    backend: Box<dyn BackendApi>,
    options: FlowOptions,
    meter: SessionMeter,
    ticker: Option<Ticker>,
    balance: f64,
    connected: bool,
    processing: bool,
    selected: Option<Node>,
    nodes: Vec<Node>,
}

impl Controller {
    pub fn new(
        wallet: Wallet,
        contract: Box<dyn SessionContract>,
        backend: Box<dyn BackendApi>,
        options: FlowOptions,
    ) -> Self {
        let meter = SessionMeter::new(options.low_balance_secs);
        Self {
            wallet,
            contract,
            backend,
            options,
            meter,
            ticker: None,
            balance: 0.0,
            connected: false,
            processing: false,
            selected: None,
            nodes: Vec::new(),
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.wallet.address()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn selected(&self) -> Option<&Node> {
        self.selected.as_ref()
    }

    pub fn status(&self) -> Status {
        Status {
            address: self.wallet.address().map(String::from),
            balance: self.balance,
            connected: self.connected,
            processing: self.processing,
            session: self.meter.session().cloned(),
            reading: self.meter.reading(),
            projection: self.meter.projection(self.balance),
            selected: self.selected.clone(),
        }
    }

    // ---- wallet ----

    pub fn connect_wallet(&mut self, notifier: &dyn Notifier) -> bool {
        if !self.wallet.connect(notifier) {
            return false;
        }
        self.refresh_balance(notifier);
        self.sync_session(notifier);
        true
    }

    pub fn disconnect_wallet(&mut self, notifier: &dyn Notifier) -> bool {
        if self.connected {
            notifier.notify(Notice::warning(
                "Session still active",
                "It keeps accruing until you disconnect the VPN",
            ));
        }
        if !self.wallet.disconnect(notifier) {
            return false;
        }
        self.clear_session();
        self.balance = 0.0;
        true
    }

    pub fn reauthorize(&self, notifier: &dyn Notifier) -> bool {
        self.wallet.reauthorize(notifier)
    }

    pub fn refresh_balance(&mut self, notifier: &dyn Notifier) {
        let Some(address) = self.wallet.address() else {
            return;
        };
        match self.contract.balance_of(address) {
            Ok(balance) => self.balance = balance,
            Err(e) => notifier.notify(Notice::warning("Balance unavailable", e.user_message())),
        }
    }

    // ---- nodes ----

    pub fn load_nodes(&mut self, notifier: &dyn Notifier) -> bool {
        match self.backend.nodes() {
            Ok(nodes) => {
                self.nodes = nodes;
                true
            }
            Err(e) => {
                notifier.notify(Notice::error("Could not load nodes", format!("{:#}", e)));
                false
            }
        }
    }

    /// Select a node by list index or by name
    pub fn select_node(&mut self, key: &str) -> Option<&Node> {
        let found = match key.parse::<usize>() {
            Ok(i) if i >= 1 => self.nodes.get(i - 1),
            _ => self
                .nodes
                .iter()
                .find(|n| n.name.eq_ignore_ascii_case(key) || n.id.as_deref() == Some(key)),
        };
        self.selected = found.cloned();
        self.selected.as_ref()
    }

    /// Select the best-scoring node
    pub fn select_recommended(&mut self) -> Option<&Node> {
        self.selected = analysis::recommend(&self.nodes).cloned();
        self.selected.as_ref()
    }

    // ---- session ----

    fn target(&self) -> Option<String> {
        self.selected
            .as_ref()
            .and_then(|n| n.operator.clone())
            .or_else(|| self.options.default_target.clone())
    }

    /// Signer and target for a session start, or the gate that is missing
    fn session_parties(&self) -> std::result::Result<(String, String), Gate> {
        let signer = self
            .wallet
            .address()
            .map(String::from)
            .ok_or(Gate::WalletNotConnected)?;
        let target = self.target().ok_or(Gate::NoTarget)?;
        Ok((signer, target))
    }

    fn rate_per_second(&self) -> f64 {
        self.selected
            .as_ref()
            .map(Node::rate_per_second)
            .filter(|r| *r > 0.0)
            .unwrap_or(self.options.default_rate_per_second)
    }

    /// Whether connect may run right now
    pub fn connect_gate(&self) -> Gate {
        if self.processing {
            Gate::Processing
        } else if !self.wallet.is_connected() {
            Gate::WalletNotConnected
        } else if self.connected {
            Gate::AlreadyConnected
        } else if self.balance <= 0.0 {
            Gate::NoBalance
        } else if self.target().is_none() {
            Gate::NoTarget
        } else {
            Gate::Ready
        }
    }

    pub fn disconnect_gate(&self) -> Gate {
        if self.processing {
            Gate::Processing
        } else if !self.wallet.is_connected() {
            Gate::WalletNotConnected
        } else if !self.connected {
            Gate::NotConnected
        } else {
            Gate::Ready
        }
    }

    pub fn connect<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        notifier: &dyn Notifier,
    ) -> ConnectOutcome {
        let gate = self.connect_gate();
        if gate != Gate::Ready {
            notifier.notify(Notice::warning("Cannot connect", gate.reason()));
            return ConnectOutcome::Refused(gate);
        }

        self.processing = true;
        let outcome = self.run_connect(rng, notifier);
        self.processing = false;
        outcome
    }

    fn run_connect<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        notifier: &dyn Notifier,
    ) -> ConnectOutcome {
        if let Err(e) = self.wallet.authorize() {
            let message = e.to_string();
            notifier.notify(Notice::error("Authorization failed", message.clone()));
            return ConnectOutcome::Unauthorized(message);
        }

        notifier.notify(Notice::info("Analyzing network conditions..."));
        std::thread::sleep(self.options.analysis_delay);

        let location = self
            .selected
            .as_ref()
            .map(|n| n.location.clone())
            .unwrap_or_else(|| "the nearest region".to_string());
        let analysis = analysis::pick(rng, &location);
        notifier.notify(Notice::info(analysis.text.clone()));

        let (signer, target) = match self.session_parties() {
            Ok(parties) => parties,
            Err(gate) => return ConnectOutcome::Refused(gate),
        };
        let rate = self.rate_per_second();

        match self.contract.start_session(&signer, &target, rate) {
            Ok(receipt) => {
                self.connected = true;
                self.load_session_after_start(&signer, rate, notifier);
                self.start_ticker();
                notifier.notify(Notice::success(
                    "VPN connected",
                    format!("Session started in tx {}", receipt.hash),
                ));
                ConnectOutcome::Connected { receipt, analysis }
            }
            Err(e) => {
                let message = e.user_message().to_string();
                notifier.notify(Notice::error("Connection failed", message.clone()));
                ConnectOutcome::Failed(message)
            }
        }
    }

    fn load_session_after_start(&mut self, signer: &str, rate: f64, notifier: &dyn Notifier) {
        match self.backend.current_session(signer) {
            Ok(Some(session)) if session.is_active => {
                self.meter.observe(Some(&session));
            }
            other => {
                if let Err(e) = other {
                    eprintln!("Warning: session record unavailable: {:#}", e);
                }
                notifier.notify(Notice::warning(
                    "Session record not yet available",
                    "Metering from the local clock",
                ));
                let local = Session {
                    id: 0,
                    is_active: true,
                    started_at: Some(Utc::now()),
                    rate_per_second: rate,
                    x4pn_earned: 0.0,
                };
                self.meter.observe(Some(&local));
            }
        }
    }

    pub fn disconnect(&mut self, notifier: &dyn Notifier) -> DisconnectOutcome {
        let gate = self.disconnect_gate();
        if gate != Gate::Ready {
            notifier.notify(Notice::warning("Cannot disconnect", gate.reason()));
            return DisconnectOutcome::Refused(gate);
        }

        self.processing = true;
        let outcome = self.run_disconnect(notifier);
        self.processing = false;
        outcome
    }

    fn run_disconnect(&mut self, notifier: &dyn Notifier) -> DisconnectOutcome {
        let Some(signer) = self.wallet.address().map(String::from) else {
            return DisconnectOutcome::Refused(Gate::WalletNotConnected);
        };

        // Settling first is best effort; ending the session must still happen
        let settled = match self.contract.settle_session(&signer) {
            Ok(_) => true,
            Err(e) => {
                eprintln!("Warning: settle failed, ending session anyway: {}", e);
                false
            }
        };

        match self.contract.end_session(&signer) {
            Ok(receipt) => {
                self.clear_session();
                self.refresh_balance(notifier);
                notifier.notify(Notice::success(
                    "VPN disconnected",
                    format!("Session ended in tx {}", receipt.hash),
                ));
                DisconnectOutcome::Ended { receipt, settled }
            }
            Err(e) => {
                let message = e.user_message().to_string();
                notifier.notify(Notice::error("Disconnect failed", message.clone()));
                DisconnectOutcome::Failed(message)
            }
        }
    }

    /// Re-read the session record and follow its active flag
    pub fn sync_session(&mut self, notifier: &dyn Notifier) {
        let Some(address) = self.wallet.address().map(String::from) else {
            return;
        };
        let session = match self.backend.current_session(&address) {
            Ok(session) => session,
            Err(e) => {
                eprintln!("Warning: session refresh failed: {:#}", e);
                return;
            }
        };

        let active = self.meter.observe(session.as_ref());
        match (self.connected, active) {
            (true, false) => {
                self.clear_session();
                notifier.notify(Notice::info("Session ended"));
            }
            (false, true) => {
                self.connected = true;
                self.start_ticker();
                notifier.notify(Notice::info("Resumed active session"));
            }
            _ => {}
        }
    }

    /// Advance the meter to `now` and raise the low-balance warning once
    pub fn tick(&mut self, now: DateTime<Utc>, notifier: &dyn Notifier) -> Reading {
        let reading = self.meter.tick(now);
        if let Some(remaining) = self.meter.check_low_balance(self.balance) {
            notifier.notify(Notice::warning(
                "Low balance",
                format!(
                    "About {} of runtime left",
                    crate::meter::format_duration(remaining)
                ),
            ));
        }
        reading
    }

    /// Block for the next tick of the running session.
    ///
    /// A tick queued while nobody was watching is discarded, and the reading
    /// is taken at the current wall-clock time rather than the tick's.
    pub fn next_tick(&mut self, notifier: &dyn Notifier) -> Option<Reading> {
        let ticker = self.ticker.as_ref()?;
        ticker.drain();
        ticker.recv_timeout(self.options.tick_period + Duration::from_millis(500))?;
        Some(self.tick(Utc::now(), notifier))
    }

    /// Save the tunnel configuration of the active session
    pub fn download_config(&self, dest: Option<&Path>) -> Result<std::path::PathBuf> {
        let session = self
            .meter
            .session()
            .filter(|s| s.is_active && s.id > 0)
            .ok_or_else(|| anyhow!("No active session with a backend record"))?;
        let text = self.backend.session_config(session.id)?;
        let path = dest
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::path::PathBuf::from(format!("x4pn-{}.conf", session.id)));
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    fn start_ticker(&mut self) {
        if self.ticker.is_none() {
            self.ticker = Some(Ticker::start(self.options.tick_period));
        }
    }

    fn clear_session(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
        self.meter.reset();
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeBackend;
    use crate::contract::testing::FakeContract;
    use crate::contract::ContractError;
    use crate::notify::{Level, MemoryNotifier};
    use crate::wallet::testing::FakeWallet;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::RefCell;
    use std::rc::Rc;

    const OPERATOR: &str = "0x1111111111111111111111111111111111111111";

    type Log = Rc<RefCell<Vec<String>>>;

    fn frankfurt() -> Node {
        Node {
            id: Some("fra-1".to_string()),
            name: "Frankfurt-01".to_string(),
            location: "Frankfurt".to_string(),
            country_code: "DE".to_string(),
            latency: 24.0,
            rate_per_minute: 0.06,
            active_users: 120,
            uptime: 99.9,
            operator: Some(OPERATOR.to_string()),
        }
    }

    fn options() -> FlowOptions {
        FlowOptions {
            analysis_delay: Duration::ZERO,
            ..FlowOptions::default()
        }
    }

    fn controller_with(wallet: FakeWallet, contract: FakeContract, backend: FakeBackend) -> Controller {
        let mut c = Controller::new(
            Wallet::new(Box::new(wallet)),
            Box::new(contract),
            Box::new(backend),
            options(),
        );
        c.nodes = vec![frankfurt()];
        c
    }

    fn backend_with_session() -> FakeBackend {
        let backend = FakeBackend::default();
        *backend.session.borrow_mut() = Some(Session {
            id: 9,
            is_active: true,
            started_at: Some(Utc::now()),
            rate_per_second: 0.001,
            x4pn_earned: 0.0,
        });
        backend
    }

    fn ready_controller(log: &Log, balance: f64) -> Controller {
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), balance),
            FakeBackend::default(),
        );
        let sink = MemoryNotifier::default();
        assert!(c.connect_wallet(&sink));
        c.select_node("1");
        c
    }

    #[test]
    fn test_connect_happy_path() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), 10.0),
            FakeBackend::default(),
        );
        let sink = MemoryNotifier::default();
        c.connect_wallet(&sink);
        c.select_node("Frankfurt-01");

        let outcome = c.connect(&mut StdRng::seed_from_u64(1), &sink);
        let ConnectOutcome::Connected { analysis, .. } = outcome.clone() else {
            panic!("expected connected, got {:?}", outcome);
        };
        assert_eq!(analysis.text.matches("Frankfurt").count(), 1);
        assert!(c.is_connected());
        assert!(!c.status().processing);
        assert_eq!(
            log.borrow().last().unwrap(),
            &format!("contract.start {} {}", OPERATOR, 0.06 / 60.0)
        );
        assert_eq!(sink.notices().last().unwrap().title, "VPN connected");
    }

    #[test]
    fn test_authorization_precedes_session_start() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut c = ready_controller(&log, 10.0);
        c.connect(&mut StdRng::seed_from_u64(2), &MemoryNotifier::default());

        let calls = log.borrow();
        let auth = calls.iter().position(|c| c == "wallet.authorize").unwrap();
        let start = calls
            .iter()
            .position(|c| c.starts_with("contract.start"))
            .unwrap();
        assert!(auth < start);
    }

    /// Notifier writing notice titles into the call log
    struct LogNotifier(Log);

    impl Notifier for LogNotifier {
        fn notify(&self, notice: Notice) {
            self.0.borrow_mut().push(format!("notice {}", notice.title));
        }
    }

    #[test]
    fn test_analysis_shown_between_authorize_and_start() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut c = ready_controller(&log, 10.0);
        c.options.analysis_delay = Duration::from_millis(200);
        log.borrow_mut().clear();

        let begin = std::time::Instant::now();
        let outcome = c.connect(&mut StdRng::seed_from_u64(7), &LogNotifier(log.clone()));
        assert!(matches!(outcome, ConnectOutcome::Connected { .. }));
        assert!(begin.elapsed() >= Duration::from_millis(200));

        let calls = log.borrow();
        let auth = calls.iter().position(|c| c == "wallet.authorize").unwrap();
        let analyzing = calls
            .iter()
            .position(|c| c == "notice Analyzing network conditions...")
            .unwrap();
        let start = calls
            .iter()
            .position(|c| c.starts_with("contract.start"))
            .unwrap();
        assert!(auth < analyzing);
        assert!(analyzing < start);
    }

    #[test]
    fn test_missing_parties_name_the_gap() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), 10.0),
            FakeBackend::default(),
        );
        assert_eq!(c.session_parties(), Err(Gate::WalletNotConnected));

        c.connect_wallet(&MemoryNotifier::default());
        assert_eq!(c.session_parties(), Err(Gate::NoTarget));

        c.select_node("1");
        let (signer, target) = c.session_parties().unwrap();
        assert_eq!(signer, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        assert_eq!(target, OPERATOR);
    }

    #[test]
    fn test_next_tick_after_idle_reads_wall_clock() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let backend = backend_with_session();
        let start = Utc::now() - chrono::Duration::seconds(10);
        backend.session.borrow_mut().as_mut().unwrap().started_at = Some(start);
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), 10.0),
            backend,
        );
        c.options.tick_period = Duration::from_millis(100);
        let sink = MemoryNotifier::default();
        c.connect_wallet(&sink);
        assert!(c.is_connected());

        // many periods pass with nobody reading
        std::thread::sleep(Duration::from_millis(2_500));

        for _ in 0..3 {
            let reading = c.next_tick(&sink).unwrap();
            let wall = (Utc::now() - start).num_seconds() as u64;
            assert!(wall - reading.elapsed_secs <= 1, "{} vs {}", reading.elapsed_secs, wall);
        }
    }

    #[test]
    fn test_rejected_authorization_aborts_without_state_change() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut wallet = FakeWallet::new(log.clone());
        wallet.approve = false;
        let mut c = controller_with(
            wallet,
            FakeContract::new(log.clone(), 10.0),
            FakeBackend::default(),
        );
        let sink = MemoryNotifier::default();
        c.connect_wallet(&sink);
        c.select_node("1");

        let outcome = c.connect(&mut StdRng::seed_from_u64(3), &sink);
        assert_eq!(
            outcome,
            ConnectOutcome::Unauthorized("Authorization rejected".to_string())
        );
        assert!(!c.is_connected());
        assert!(!c.status().processing);
        assert!(!log.borrow().iter().any(|c| c.starts_with("contract.start")));
        assert_eq!(sink.notices().last().unwrap().level, Level::Error);
    }

    #[test]
    fn test_zero_balance_disables_connect() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut c = ready_controller(&log, 0.0);
        assert_eq!(c.connect_gate(), Gate::NoBalance);

        let outcome = c.connect(&mut StdRng::seed_from_u64(4), &MemoryNotifier::default());
        assert_eq!(outcome, ConnectOutcome::Refused(Gate::NoBalance));
        assert!(!log.borrow().iter().any(|c| c == "wallet.authorize"));
    }

    #[test]
    fn test_gate_order() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), 5.0),
            FakeBackend::default(),
        );
        assert_eq!(c.connect_gate(), Gate::WalletNotConnected);

        c.connect_wallet(&MemoryNotifier::default());
        // no node selected and no default target
        assert_eq!(c.connect_gate(), Gate::NoTarget);

        c.select_node("1");
        assert_eq!(c.connect_gate(), Gate::Ready);

        c.processing = true;
        assert_eq!(c.connect_gate(), Gate::Processing);
        assert_eq!(c.disconnect_gate(), Gate::Processing);
    }

    #[test]
    fn test_default_target_and_rate() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), 5.0),
            FakeBackend::default(),
        );
        c.options.default_target = Some(OPERATOR.to_string());
        c.connect_wallet(&MemoryNotifier::default());
        assert_eq!(c.connect_gate(), Gate::Ready);

        let outcome = c.connect(&mut StdRng::seed_from_u64(5), &MemoryNotifier::default());
        assert!(matches!(outcome, ConnectOutcome::Connected { .. }));
        assert_eq!(
            log.borrow().last().unwrap(),
            &format!("contract.start {} {}", OPERATOR, 0.0001)
        );
    }

    #[test]
    fn test_start_failure_surfaces_reason() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut contract = FakeContract::new(log.clone(), 10.0);
        contract.start_error = Some(ContractError {
            reason: Some("Insufficient deposit".to_string()),
            message: "execution reverted".to_string(),
        });
        let mut c = controller_with(FakeWallet::new(log.clone()), contract, FakeBackend::default());
        let sink = MemoryNotifier::default();
        c.connect_wallet(&sink);
        c.select_node("1");

        let outcome = c.connect(&mut StdRng::seed_from_u64(6), &sink);
        assert_eq!(
            outcome,
            ConnectOutcome::Failed("Insufficient deposit".to_string())
        );
        assert!(!c.is_connected());
        assert!(!c.status().processing);
        assert_eq!(c.connect_gate(), Gate::Ready);
        let last = sink.notices().pop().unwrap();
        assert_eq!(last.detail.as_deref(), Some("Insufficient deposit"));
    }

    #[test]
    fn test_disconnect_survives_settle_failure() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut contract = FakeContract::new(log.clone(), 10.0);
        contract.settle_error = Some(ContractError::new("nothing to settle"));
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            contract,
            backend_with_session(),
        );
        let sink = MemoryNotifier::default();
        c.connect_wallet(&sink);
        assert!(c.is_connected());

        let outcome = c.disconnect(&sink);
        assert!(matches!(
            outcome,
            DisconnectOutcome::Ended { settled: false, .. }
        ));
        let calls = log.borrow();
        let settle = calls.iter().position(|c| c == "contract.settle").unwrap();
        let end = calls.iter().position(|c| c == "contract.end").unwrap();
        assert!(settle < end);
        assert!(!c.is_connected());
        assert!(c.status().reading.is_zero());
        // settle failure is not shown to the user
        assert_eq!(sink.count(Level::Error), 0);
    }

    #[test]
    fn test_end_failure_keeps_session() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut contract = FakeContract::new(log.clone(), 10.0);
        contract.end_error = Some(ContractError::new("Relay unreachable"));
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            contract,
            backend_with_session(),
        );
        let sink = MemoryNotifier::default();
        c.connect_wallet(&sink);

        let outcome = c.disconnect(&sink);
        assert_eq!(
            outcome,
            DisconnectOutcome::Failed("Relay unreachable".to_string())
        );
        assert!(c.is_connected());
        assert_eq!(sink.count(Level::Error), 1);
    }

    #[test]
    fn test_disconnect_refused_without_session() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut c = ready_controller(&log, 10.0);
        let outcome = c.disconnect(&MemoryNotifier::default());
        assert_eq!(outcome, DisconnectOutcome::Refused(Gate::NotConnected));
        assert!(!log.borrow().iter().any(|c| c == "contract.settle"));
    }

    #[test]
    fn test_session_end_zeroes_readings() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let backend = backend_with_session();
        let record = backend.session.clone();
        let start = record.borrow().as_ref().unwrap().started_at.unwrap();
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), 10.0),
            backend,
        );
        let sink = MemoryNotifier::default();
        c.connect_wallet(&sink);
        assert!(c.is_connected());

        let reading = c.tick(start + chrono::Duration::seconds(30), &sink);
        assert_eq!(reading.elapsed_secs, 30);
        assert_eq!(reading.cost, 30.0 * 0.001);

        // the backend reports the session as ended
        record.borrow_mut().as_mut().unwrap().is_active = false;
        c.sync_session(&sink);
        assert!(!c.is_connected());
        let status = c.status();
        assert!(status.reading.is_zero());
        assert!(c.ticker.is_none());
    }

    #[test]
    fn test_low_balance_warning() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let backend = backend_with_session();
        let start = backend.session.borrow().as_ref().unwrap().started_at.unwrap();
        // 0.1 X4PN at 0.001/s lasts 100s, under the 300s threshold
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), 0.1),
            backend,
        );
        let sink = MemoryNotifier::default();
        c.connect_wallet(&sink);

        c.tick(start + chrono::Duration::seconds(1), &sink);
        c.tick(start + chrono::Duration::seconds(2), &sink);
        let warnings: Vec<_> = sink
            .notices()
            .into_iter()
            .filter(|n| n.title == "Low balance")
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_wallet_disconnect_clears_view() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), 10.0),
            backend_with_session(),
        );
        let sink = MemoryNotifier::default();
        c.connect_wallet(&sink);
        assert!(c.is_connected());

        assert!(c.disconnect_wallet(&sink));
        assert!(!c.is_connected());
        assert_eq!(c.balance(), 0.0);
        assert!(sink.notices().iter().any(|n| n.title == "Session still active"));
    }

    #[test]
    fn test_select_node() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), 10.0),
            FakeBackend::default(),
        );
        assert!(c.select_node("0").is_none());
        assert!(c.select_node("2").is_none());
        assert_eq!(c.select_node("fra-1").unwrap().name, "Frankfurt-01");
        assert_eq!(c.select_node("frankfurt-01").unwrap().name, "Frankfurt-01");
        assert_eq!(c.select_recommended().unwrap().name, "Frankfurt-01");
    }

    #[test]
    fn test_download_config() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut backend = backend_with_session();
        backend.config_text = "[Interface]\nAddress = 10.8.0.2/32\n".to_string();
        let mut c = controller_with(
            FakeWallet::new(log.clone()),
            FakeContract::new(log.clone(), 10.0),
            backend,
        );
        assert!(c.download_config(None).is_err());

        c.connect_wallet(&MemoryNotifier::default());
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("tunnel.conf");
        let path = c.download_config(Some(&dest)).unwrap();
        assert_eq!(path, dest);
        let text = std::fs::read_to_string(&dest).unwrap();
        assert!(text.contains("[Interface]"));
    }
}
