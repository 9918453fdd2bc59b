use crate::{
    analysis::ReasoningFactors,
    config::Config,
    db::Database,
    flow::{ConnectOutcome, Controller, DisconnectOutcome, Status},
    meter::{format_amount, format_duration, Reading},
    model::Node,
    notify::{ConsoleNotifier, Notice, Notifier},
    transcript::Transcript,
    wallet::short_address,
    Args,
};
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::path::Path;

pub struct Context {
    pub args: Args,
    pub config: Config,
    pub run_id: String,
    pub transcript: RefCell<Transcript>,
    pub controller: RefCell<Controller>,
    pub database: Database,
}

/// Prints notices and records them in the transcript
struct LoggedNotifier<'a> {
    transcript: &'a RefCell<Transcript>,
}

impl Notifier for LoggedNotifier<'_> {
    fn notify(&self, notice: Notice) {
        let _ = self.transcript.borrow_mut().notice(&notice);
        ConsoleNotifier.notify(notice);
    }
}

fn verbose(ctx: &Context, message: &str) {
    if ctx.args.verbose || ctx.args.debug {
        eprintln!("[VERBOSE] {}", message);
    }
}

/// Run `;`-separated commands and exit
pub fn run_once(ctx: &Context, commands: &str) -> Result<()> {
    for cmd in commands.split(';').map(str::trim).filter(|c| !c.is_empty()) {
        if handle_command(ctx, cmd) {
            break;
        }
    }
    Ok(())
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!("x4pn - type /help for commands, /exit to quit");

    loop {
        match rl.readline("x4pn> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                if handle_command(&ctx, line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

/// Dispatch one command line; returns true when the client should exit
fn handle_command(ctx: &Context, line: &str) -> bool {
    let _ = ctx.transcript.borrow_mut().command(line);
    let notifier = LoggedNotifier {
        transcript: &ctx.transcript,
    };

    let line = line.strip_prefix('/').unwrap_or(line);
    let parts: Vec<&str> = line.splitn(2, ' ').collect();
    let rest = parts.get(1).map(|s| s.trim()).unwrap_or("");

    match parts[0] {
        "exit" | "quit" => return true,
        "help" => print_help(),
        "session" => {
            println!("Run: {}", ctx.run_id);
            println!("Transcript: {:?}", ctx.transcript.borrow().path);
            println!("Backend: {}", ctx.config.api.base_url);
            println!("Wallet bridge: {}", ctx.config.wallet.bridge_url);
            println!("Relay: {}", ctx.config.contract.relay_url);
        }
        "wallet" => handle_wallet_command(ctx, rest, &notifier),
        "balance" => {
            let mut controller = ctx.controller.borrow_mut();
            controller.refresh_balance(&notifier);
            println!("Balance: {}", format_amount(controller.balance()));
        }
        "nodes" => {
            let mut controller = ctx.controller.borrow_mut();
            if controller.load_nodes(&notifier) {
                print_nodes(controller.nodes(), controller.selected());
            }
        }
        "select" => handle_select_command(ctx, rest),
        "connect" => handle_connect(ctx, &notifier),
        "disconnect" => handle_disconnect(ctx, &notifier),
        "sync" => {
            ctx.controller.borrow_mut().sync_session(&notifier);
            println!("{}", format_status(&ctx.controller.borrow().status()));
        }
        "status" => {
            let mut controller = ctx.controller.borrow_mut();
            controller.tick(chrono::Utc::now(), &notifier);
            println!("{}", format_status(&controller.status()));
        }
        "watch" => handle_watch(ctx, rest, &notifier),
        "config" => handle_config_download(ctx, rest, &notifier),
        "db" => {
            println!("Store: {}", ctx.database.redacted_url());
            match ctx.database.connection_string() {
                Ok(_) => println!("Status: configured"),
                Err(e) => println!("Status: {} (queries will fail)", e),
            }
        }
        _ => println!("Unknown command: {}", parts[0]),
    }
    false
}

fn print_help() {
    println!("Commands:");
    println!("  /exit                   - quit");
    println!("  /help                   - show commands");
    println!("  /session                - show run info");
    println!("Wallet:");
    println!("  /wallet                 - show wallet state");
    println!("  /wallet connect         - connect the wallet");
    println!("  /wallet disconnect      - disconnect the wallet");
    println!("  /wallet reauth          - re-authorize the wallet");
    println!("  /balance                - refresh deposit balance");
    println!("VPN:");
    println!("  /nodes                  - list nodes with scores");
    println!("  /select <n|name|best>   - choose a node");
    println!("  /connect                - start a session");
    println!("  /disconnect             - settle and end the session");
    println!("  /status                 - elapsed time, cost and runtime left");
    println!("  /watch [secs]           - live readout, one line per second");
    println!("  /sync                   - re-read the session record");
    println!("  /config [path]          - download the tunnel config");
    println!("  /db                     - show store configuration");
}

fn handle_wallet_command(ctx: &Context, args: &str, notifier: &dyn Notifier) {
    let mut controller = ctx.controller.borrow_mut();
    match args {
        "" => match controller.address() {
            Some(address) => {
                println!("Wallet: {}", address);
                println!("Balance: {}", format_amount(controller.balance()));
            }
            None => println!("Wallet: not connected"),
        },
        "connect" => {
            if controller.connect_wallet(notifier) {
                if let Some(address) = controller.address() {
                    let _ = ctx.transcript.borrow_mut().wallet_connected(address);
                }
                verbose(ctx, &format!("balance {}", controller.balance()));
            }
        }
        "disconnect" => {
            if controller.disconnect_wallet(notifier) {
                let _ = ctx.transcript.borrow_mut().wallet_disconnected();
            }
        }
        "reauth" | "reauthorize" => {
            controller.reauthorize(notifier);
        }
        _ => println!("Usage: /wallet [connect|disconnect|reauth]"),
    }
}

fn handle_select_command(ctx: &Context, args: &str) {
    let mut controller = ctx.controller.borrow_mut();
    if args.is_empty() {
        match controller.selected() {
            Some(node) => println!("Selected: {} ({})", node.name, node.location),
            None => println!("No node selected. Usage: /select <n|name|best>"),
        }
        return;
    }

    let has_nodes = !controller.nodes().is_empty();
    let chosen = if args == "best" {
        controller.select_recommended()
    } else {
        controller.select_node(args)
    }
    .map(|node| format!("{} ({})", node.name, node.location));
    match chosen {
        Some(label) => println!("Selected: {}", label),
        None if !has_nodes => println!("No nodes loaded. Run /nodes first."),
        None => println!("Unknown node: {}", args),
    }
}

fn handle_connect(ctx: &Context, notifier: &dyn Notifier) {
    let mut controller = ctx.controller.borrow_mut();
    let node = controller.selected().map(|n| n.name.clone());
    let outcome = controller.connect(&mut rand::thread_rng(), notifier);

    let mut transcript = ctx.transcript.borrow_mut();
    let _ = match &outcome {
        ConnectOutcome::Refused(gate) => {
            transcript.connect_outcome("refused", node.as_deref(), None, Some(gate.reason()))
        }
        ConnectOutcome::Unauthorized(e) => {
            transcript.connect_outcome("unauthorized", node.as_deref(), None, Some(e.as_str()))
        }
        ConnectOutcome::Failed(e) => {
            transcript.connect_outcome("failed", node.as_deref(), None, Some(e.as_str()))
        }
        ConnectOutcome::Connected { receipt, analysis } => {
            for benefit in &analysis.benefits {
                println!("  + {}", benefit);
            }
            transcript.connect_outcome("connected", node.as_deref(), Some(&receipt.hash), None)
        }
    };
}

fn handle_disconnect(ctx: &Context, notifier: &dyn Notifier) {
    let outcome = ctx.controller.borrow_mut().disconnect(notifier);

    let mut transcript = ctx.transcript.borrow_mut();
    let _ = match &outcome {
        DisconnectOutcome::Refused(gate) => {
            transcript.disconnect_outcome("refused", None, None, Some(gate.reason()))
        }
        DisconnectOutcome::Failed(e) => {
            transcript.disconnect_outcome("failed", None, None, Some(e.as_str()))
        }
        DisconnectOutcome::Ended { receipt, settled } => {
            transcript.disconnect_outcome("ended", Some(*settled), Some(&receipt.hash), None)
        }
    };
}

fn handle_watch(ctx: &Context, args: &str, notifier: &dyn Notifier) {
    let secs: u64 = if args.is_empty() {
        10
    } else {
        match args.parse() {
            Ok(n) => n,
            Err(_) => {
                println!("Usage: /watch [secs]");
                return;
            }
        }
    };

    let mut controller = ctx.controller.borrow_mut();
    if !controller.is_connected() {
        println!("No active session.");
        return;
    }

    for _ in 0..secs {
        let Some(reading) = controller.next_tick(notifier) else {
            break;
        };
        if !controller.is_connected() {
            break;
        }
        println!("{}", format_watch_line(&reading, &controller.status()));
    }
}

/// Live readout line; balance comes from the current status
pub fn format_watch_line(reading: &Reading, status: &Status) -> String {
    let left = status
        .projection
        .remaining_secs
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}  {}  left {}  balance {}",
        format_duration(reading.elapsed_secs),
        format_amount(reading.cost),
        left,
        format_amount(status.balance)
    )
}

fn handle_config_download(ctx: &Context, args: &str, notifier: &dyn Notifier) {
    let controller = ctx.controller.borrow();
    let dest = if args.is_empty() {
        None
    } else {
        Some(Path::new(args))
    };
    match controller.download_config(dest) {
        Ok(path) => {
            if let Some(session) = controller.status().session {
                let _ = ctx.transcript.borrow_mut().config_saved(session.id, &path);
            }
            notifier.notify(Notice::success(
                "Config saved",
                path.display().to_string(),
            ));
        }
        Err(e) => notifier.notify(Notice::error("Config download failed", format!("{:#}", e))),
    }
}

/// One line per node: index, name, location, metrics and overall score
pub fn format_node(index: usize, node: &Node, selected: bool) -> String {
    let score = ReasoningFactors::for_node(node).overall();
    format!(
        "{}[{}] {} - {} ({}) {:.0}ms {}/min {} users {:.1}% up, score {:.1}",
        if selected { "*" } else { " " },
        index,
        node.name,
        node.location,
        node.country_code,
        node.latency,
        format_amount(node.rate_per_minute),
        node.active_users,
        node.uptime,
        score
    )
}

fn print_nodes(nodes: &[Node], selected: Option<&Node>) {
    if nodes.is_empty() {
        println!("No nodes available.");
        return;
    }
    for (i, node) in nodes.iter().enumerate() {
        let is_selected = selected.is_some_and(|s| s.name == node.name);
        println!("{}", format_node(i + 1, node, is_selected));
    }
}

pub fn format_status(status: &Status) -> String {
    let mut lines = Vec::new();
    match &status.address {
        Some(address) => lines.push(format!(
            "Wallet:   {} ({})",
            short_address(address),
            format_amount(status.balance)
        )),
        None => lines.push("Wallet:   not connected".to_string()),
    }
    if let Some(node) = &status.selected {
        lines.push(format!("Node:     {} ({})", node.name, node.location));
    }
    if status.processing {
        lines.push("Request:  in progress".to_string());
    }

    if !status.connected {
        lines.push("VPN:      disconnected".to_string());
        return lines.join("\n");
    }

    lines.push("VPN:      connected".to_string());
    lines.push(format!(
        "Elapsed:  {}",
        format_duration(status.reading.elapsed_secs)
    ));
    lines.push(format!("Cost:     {}", format_amount(status.reading.cost)));
    if let Some(session) = &status.session {
        lines.push(format!("Earned:   {}", format_amount(session.x4pn_earned)));
    }
    match status.projection.remaining_secs {
        Some(_) if status.projection.exhausted => lines.push("Left:     balance exhausted".to_string()),
        Some(secs) => lines.push(format!("Left:     {}", format_duration(secs))),
        None => lines.push("Left:     -".to_string()),
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::Projection;
    use crate::model::Session;

    fn status(connected: bool) -> Status {
        Status {
            address: Some("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string()),
            balance: 2.0,
            connected,
            processing: false,
            session: Some(Session {
                id: 3,
                is_active: connected,
                started_at: None,
                rate_per_second: 0.001,
                x4pn_earned: 0.5,
            }),
            reading: Reading {
                elapsed_secs: 65,
                cost: 0.065,
            },
            projection: Projection {
                remaining_secs: Some(1_935),
                exhausted: false,
            },
            selected: None,
        }
    }

    #[test]
    fn test_watch_line_follows_status_balance() {
        let reading = Reading {
            elapsed_secs: 65,
            cost: 0.065,
        };
        let mut current = status(true);
        assert_eq!(
            format_watch_line(&reading, &current),
            "00:01:05  0.0650 X4PN  left 00:32:15  balance 2.00 X4PN"
        );

        current.balance = 1.5;
        assert!(format_watch_line(&reading, &current).ends_with("balance 1.50 X4PN"));
    }

    #[test]
    fn test_format_status_connected() {
        let text = format_status(&status(true));
        assert!(text.contains("0x5aAe…eAed"));
        assert!(text.contains("Elapsed:  00:01:05"));
        assert!(text.contains("Cost:     0.0650 X4PN"));
        assert!(text.contains("Left:     00:32:15"));
    }

    #[test]
    fn test_format_status_disconnected_hides_cost() {
        let text = format_status(&status(false));
        assert!(text.contains("VPN:      disconnected"));
        assert!(!text.contains("Cost"));
    }

    #[test]
    fn test_format_node() {
        let node = Node {
            id: None,
            name: "Tokyo-02".to_string(),
            location: "Tokyo".to_string(),
            country_code: "JP".to_string(),
            latency: 50.0,
            rate_per_minute: 0.02,
            active_users: 200,
            uptime: 99.0,
            operator: None,
        };
        let line = format_node(2, &node, true);
        assert!(line.starts_with("*[2] Tokyo-02 - Tokyo (JP) 50ms"));
        assert!(line.contains("score"));
    }
}
