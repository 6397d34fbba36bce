//! # retro
//!
//! Command-line client for the retro room service. Inbound messages are
//! printed to stdout as JSON lines; each stdin line holding a JSON value is
//! sent as a command.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use retro_core::Credentials;
use retro_session::{HttpTransport, SessionConfig, SessionManager, SessionPhase};
use retro_settings::{load_settings, load_settings_from_path, RetroSettings};
use retro_telemetry::{init_telemetry, parse_level, TelemetryConfig};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

/// Retro room service client.
#[derive(Parser, Debug)]
#[command(name = "retro", about = "Retro room service client")]
struct Cli {
    /// Service base URL (overrides settings).
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, env = "RETRO_CLIENT_ID")]
    client_id: String,

    #[arg(long, env = "RETRO_SECRET", hide_env_values = true)]
    secret: String,

    /// Settings file (default `~/.retro/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log as JSON lines on stderr.
    #[arg(long)]
    json_logs: bool,
}

/// One line of interactive input.
#[derive(Debug, PartialEq)]
enum Input {
    Empty,
    Quit,
    Restart,
    Stats,
    Command(Value),
    Invalid(String),
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "" => Input::Empty,
        ":quit" | ":q" => Input::Quit,
        ":restart" => Input::Restart,
        ":stats" => Input::Stats,
        other if other.starts_with(':') => Input::Invalid(format!("unknown command {other}")),
        other => match serde_json::from_str(other) {
            Ok(value) => Input::Command(value),
            Err(e) => Input::Invalid(format!("not JSON: {e}")),
        },
    }
}

fn telemetry_config(settings: &RetroSettings, json_logs: bool) -> TelemetryConfig {
    TelemetryConfig {
        log_level: parse_level(&settings.logging.level).unwrap_or(Level::INFO),
        json: json_logs || settings.logging.json,
        ..TelemetryConfig::default()
    }
}

fn register_listeners(session: &SessionManager) {
    session.on_message(|message| match serde_json::to_string(message) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "failed to encode inbound message"),
    });
    session.on_lagging(|lagging| {
        if lagging {
            eprintln!("! connection lagging, reconnecting");
        } else {
            eprintln!("! connection restored");
        }
    });
    session.on_lost(|| eprintln!("! session lost, enter :restart to start a new one"));
}

fn send(session: &SessionManager, payload: Value) {
    let result = session.send_command(payload);
    let _ = tokio::spawn(async move {
        match result.await {
            Ok(value) => println!("{}", json!({ "result": value })),
            Err(e) => eprintln!("! command failed ({}): {e}", e.error_kind()),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;
    init_telemetry(&telemetry_config(&settings, cli.json_logs))
        .context("Failed to initialize logging")?;

    let base_url = cli
        .base_url
        .clone()
        .unwrap_or_else(|| settings.server.base_url.clone());
    let config = SessionConfig::from(&settings.session);
    let transport = HttpTransport::new(&base_url, &config)
        .with_context(|| format!("Invalid base URL: {base_url}"))?;
    let credentials =
        Credentials::new(cli.client_id, cli.secret).context("Invalid client credentials")?;

    let session = SessionManager::new(Arc::new(transport), credentials, config);
    register_listeners(&session);

    info!(client_id = session.client_id(), base_url = %base_url, "starting session");
    session.start().await.context("Failed to start session")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Restart => {
                if session.phase() != SessionPhase::Lost {
                    eprintln!("! session is {}, nothing to restart", session.phase().as_str());
                    continue;
                }
                session.restart().await.context("Failed to restart session")?;
                eprintln!("! session restarted");
            }
            Input::Stats => {
                println!("{}", json!({ "stats": session.stats() }));
            }
            Input::Command(payload) => send(&session, payload),
            Input::Invalid(reason) => eprintln!("! {reason}"),
        }
    }

    info!("shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_control_lines() {
        assert_eq!(parse_input("  "), Input::Empty);
        assert_eq!(parse_input(":quit"), Input::Quit);
        assert_eq!(parse_input(":restart\n"), Input::Restart);
        assert_eq!(parse_input(":stats"), Input::Stats);
        assert!(matches!(parse_input(":nope"), Input::Invalid(_)));
    }

    #[test]
    fn parses_json_commands() {
        assert_eq!(
            parse_input(r#"{"type": "saveNote", "text": "hi"}"#),
            Input::Command(json!({"type": "saveNote", "text": "hi"}))
        );
        assert_eq!(parse_input("42"), Input::Command(json!(42)));
        assert!(matches!(parse_input("save note"), Input::Invalid(_)));
    }

    #[test]
    fn json_flag_or_setting_enables_json_logs() {
        let mut settings = RetroSettings::default();
        assert!(!telemetry_config(&settings, false).json);
        assert!(telemetry_config(&settings, true).json);
        settings.logging.json = true;
        settings.logging.level = "debug".into();
        let config = telemetry_config(&settings, false);
        assert!(config.json);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn cli_reads_flags() {
        let cli = Cli::try_parse_from([
            "retro",
            "--client-id",
            "c1",
            "--secret",
            "s",
            "--base-url",
            "http://localhost:9000/api",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(cli.client_id, "c1");
        assert_eq!(cli.base_url.as_deref(), Some("http://localhost:9000/api"));
        assert!(cli.json_logs);
        assert!(cli.settings.is_none());
    }
}
