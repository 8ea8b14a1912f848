//! Dispatch CLI - follow realtime dispatch channels from the command line
//!
//! Connects with a pre-issued token, watches notification and broadcast
//! channels, joins events and publishes location updates.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dispatch_client::{ApplicationEvent, ClientEvent, DispatchClient, Payload, SessionState};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::CliConfig;

/// Dispatch - realtime client for ambulance dispatch and hospital channels
#[derive(Parser)]
#[command(name = "dispatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// STOMP WebSocket endpoint
    #[arg(short, long, global = true, env = "DISPATCH_SOCKET_URL")]
    url: Option<String>,

    /// Access token, sent as the `token` query parameter
    #[arg(short, long, global = true, env = "DISPATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// User id for notifications and event joins
    #[arg(long, global = true, env = "DISPATCH_USER_ID")]
    user_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch notification and broadcast channels
    Watch {
        /// Include the active-incident broadcast
        #[arg(long)]
        incidents: bool,

        /// Include the admit-request broadcast
        #[arg(long)]
        admit_requests: bool,
    },

    /// Join an event and follow its updates and live location
    Join {
        /// Event id
        event_id: String,
    },

    /// Publish a location update for an event
    Locate {
        /// Event id
        event_id: String,

        /// Latitude in degrees, -90 to 90
        #[arg(allow_hyphen_values = true)]
        latitude: f64,

        /// Longitude in degrees, -180 to 180
        #[arg(allow_hyphen_values = true)]
        longitude: f64,
    },

    /// Show version and configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.log_level, cli.json_logs)?;

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.url {
        config.client.url = url.clone();
    }
    if let Some(user_id) = &cli.user_id {
        config.user_id = Some(user_id.clone());
    }

    // Handle Ctrl+C
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(()).await;
        }
    });

    match cli.command {
        Commands::Watch {
            incidents,
            admit_requests,
        } => {
            config.watch_active_incidents |= incidents;
            config.watch_admit_requests |= admit_requests;
            let client = connect(&config, cli.token.as_deref()).await?;
            watch(&client, &config).await?;
            follow(&client, &mut shutdown_rx).await;
            client.shutdown().await?;
        }

        Commands::Join { event_id } => {
            let user_id = config
                .user_id
                .clone()
                .context("--user-id (or user_id in the config file) is required to join")?;
            let client = connect(&config, cli.token.as_deref()).await?;
            client
                .join_event(&event_id, &user_id, print_event)
                .await
                .with_context(|| format!("Failed to join event {}", event_id))?;
            println!("{} Joined event {}", "OK".green().bold(), event_id.yellow());
            follow(&client, &mut shutdown_rx).await;
            client.shutdown().await?;
        }

        Commands::Locate {
            event_id,
            latitude,
            longitude,
        } => {
            let client = connect(&config, cli.token.as_deref()).await?;
            client
                .send_location(&event_id, latitude, longitude)
                .await
                .context("Failed to send location")?;
            println!(
                "{} Sent {}, {} for event {}",
                "OK".green().bold(),
                latitude,
                longitude,
                event_id.yellow()
            );
            client.shutdown().await?;
        }

        Commands::Info => print_info(&config, cli.config.as_deref()),
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

async fn connect(config: &CliConfig, token: Option<&str>) -> Result<DispatchClient> {
    let Some(token) = token else {
        bail!("--token (or DISPATCH_TOKEN) is required");
    };

    println!(
        "{} Connecting to {}",
        "DISPATCH".cyan().bold(),
        config.client.url
    );
    let client =
        DispatchClient::new(config.client.clone()).context("Invalid client configuration")?;
    client
        .connect_and_wait(token)
        .await
        .context("Failed to connect")?;

    let status = client.status();
    println!(
        "{} Connected (session {}, heart-beat {})",
        "OK".green().bold(),
        status.session_id.as_deref().unwrap_or("-"),
        status.heartbeat
    );
    Ok(client)
}

async fn watch(client: &DispatchClient, config: &CliConfig) -> Result<()> {
    let mut watching = Vec::new();

    if let Some(user_id) = &config.user_id {
        client.watch_notifications(user_id, print_event).await?;
        watching.push("notifications");
    }
    if config.watch_active_incidents {
        client.watch_active_incidents(print_event).await?;
        watching.push("active incidents");
    }
    if config.watch_admit_requests {
        client.watch_admit_requests(print_event).await?;
        watching.push("admit requests");
    }

    if watching.is_empty() {
        bail!("Nothing to watch: pass --user-id, --incidents or --admit-requests");
    }
    println!("{} Watching {}", "OK".green().bold(), watching.join(", "));
    Ok(())
}

/// Print session events until Ctrl+C or the session stops
async fn follow(client: &DispatchClient, shutdown_rx: &mut mpsc::Receiver<()>) {
    let mut events = client.events();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = events.recv() => match event {
                Ok(event) => print_client_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    println!("{} missed {} session events", "WARN".yellow(), n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    println!("{}", "Stopped".yellow());
}

fn print_event(event: ApplicationEvent) {
    let tag = format!("[{}]", event.topic_id).cyan();
    match &event.payload {
        Payload::EventUpdate(record) => {
            let patient = record
                .patient
                .as_ref()
                .map(|p| p.full_name())
                .unwrap_or_default();
            println!("{} event {} {} {}", tag, record.id, record.status.green(), patient);
        }
        Payload::LiveLocationUpdate(point) => {
            println!("{} location {:.5}, {:.5}", tag, point.latitude, point.longitude);
        }
        Payload::Notification(notification) => {
            println!("{} {}", tag, notification.notification_type.green());
        }
        Payload::ActiveIncidentList(incidents) => {
            println!("{} {} active incidents", tag, incidents.len());
            for incident in incidents {
                println!(
                    "    {} {} {}",
                    incident.id,
                    incident.status.green(),
                    incident.pickup_address.as_deref().unwrap_or("")
                );
            }
        }
        Payload::AdmitRequest(request) => {
            let hospital = request
                .event_hospital_assignment
                .hospital
                .name
                .as_deref()
                .unwrap_or("hospital");
            println!(
                "{} admit request for event {} at {} ({})",
                tag,
                request.event.id,
                hospital,
                request.event_hospital_assignment.status.green()
            );
        }
    }
}

fn print_client_event(event: &ClientEvent) {
    match event {
        ClientEvent::StateChanged(SessionState::Connected) => {
            println!("{} {}", "SESSION".cyan(), "connected".green());
        }
        ClientEvent::StateChanged(state) => println!("{} {}", "SESSION".cyan(), state),
        ClientEvent::Disconnected { reason } => println!(
            "{} disconnected: {}",
            "SESSION".yellow(),
            reason.as_deref().unwrap_or("closed")
        ),
        ClientEvent::Error(e) if e.is_protocol_failure() => {
            println!("{} {} (will retry)", "ERROR".red().bold(), e)
        }
        ClientEvent::Error(e) => println!("{} {}", "ERROR".red().bold(), e),
        ClientEvent::ReconnectScheduled { delay } => {
            println!("{} reconnecting in {}", "SESSION".yellow(), format_delay(*delay));
        }
        ClientEvent::DecodeFailed {
            destination, reason, ..
        } => println!("{} bad payload on {}: {}", "WARN".yellow(), destination, reason),
        ClientEvent::HandlerPanicked { topic_id } => {
            println!("{} handler for {} panicked", "WARN".yellow(), topic_id)
        }
        ClientEvent::Connected { .. } | ClientEvent::Unrouted { .. } => {}
    }
}

fn format_delay(delay: Duration) -> String {
    if delay.as_millis() % 1000 == 0 {
        format!("{}s", delay.as_secs())
    } else {
        format!("{}ms", delay.as_millis())
    }
}

fn print_info(config: &CliConfig, path: Option<&std::path::Path>) {
    println!("{} - realtime dispatch client", "DISPATCH".cyan().bold());
    println!();
    println!("Version:    {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:   {}", std::env::consts::OS);
    println!("Arch:       {}", std::env::consts::ARCH);
    println!();
    println!("{}", "Configuration:".green());
    let config_path = path
        .map(|p| p.display().to_string())
        .or_else(|| config::default_path().map(|p| format!("{} (default)", p.display())))
        .unwrap_or_else(|| "-".to_string());
    println!("  File:        {}", config_path);
    println!("  Endpoint:    {}", config.client.url);
    println!(
        "  Heart-beat:  {}ms out, {}ms in",
        config.client.heartbeat_outgoing_ms, config.client.heartbeat_incoming_ms
    );
    println!("  Reconnect:   {}", format_delay(config.client.reconnect_delay()));
    println!("  User:        {}", config.user_id.as_deref().unwrap_or("-"));
    println!();
    println!("{}", "Protocol:".green());
    println!(
        "  - STOMP {} over WebSocket ({})",
        dispatch_core::STOMP_VERSION,
        dispatch_core::WS_SUBPROTOCOL
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_locate_with_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "dispatch", "--token", "t", "locate", "42", "-33.86", "-151.2",
        ])
        .unwrap();
        match cli.command {
            Commands::Locate {
                event_id,
                latitude,
                longitude,
            } => {
                assert_eq!(event_id, "42");
                assert_eq!(latitude, -33.86);
                assert_eq!(longitude, -151.2);
            }
            _ => panic!("expected locate"),
        }
    }

    #[test]
    fn test_format_delay() {
        assert_eq!(format_delay(Duration::from_millis(5000)), "5s");
        assert_eq!(format_delay(Duration::from_millis(250)), "250ms");
    }
}
