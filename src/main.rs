//! # pantrybot
//!
//! Command-line entry point: runs the event hub, watches a household's
//! live caches, or publishes a single event through a running hub.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pantry_cache::{MemoryCache, QueryKey, ReadCache};
use pantry_core::{Credential, Delivery, EventEnvelope, EventType, HouseholdId, Record, UserId};
use pantry_server::ServerConfig;
use pantry_settings::PantrySettings;
use pantry_sync::{CacheSynchronizer, LifecycleEvent, SyncTarget, Transport, TransportConfig};
use pantry_telemetry::{init_telemetry, DiagnosticQuery, TelemetryConfig};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Household inventory sync tool.
#[derive(Parser, Debug)]
#[command(name = "pantrybot", about = "Real-time household inventory sync")]
struct Cli {
    /// Settings file (defaults to `~/.pantrybot/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the event hub.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect to a hub and keep local caches in sync with a household.
    Watch {
        /// Session credential presented in the handshake.
        #[arg(long)]
        token: String,
        #[arg(long)]
        household: String,
        /// Also sync this shopping list.
        #[arg(long)]
        list: Option<String>,
        /// Hub WebSocket URL (overrides settings).
        #[arg(long)]
        url: Option<String>,
    },
    /// Post one event to a running hub.
    Publish {
        /// Deliver to every member of this household.
        #[arg(long, conflicts_with = "user", required_unless_present = "user")]
        household: Option<String>,
        /// Deliver to this user only.
        #[arg(long)]
        user: Option<String>,
        /// Event type, e.g. `item.added`.
        #[arg(long = "type")]
        event_type: String,
        /// Scope id carried in the envelope (defaults to the audience id).
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        item_id: String,
        /// Item fields as a JSON object.
        #[arg(long)]
        item: Option<String>,
        /// Hub base URL (defaults to the configured host and port).
        #[arg(long)]
        hub: Option<String>,
    },
}

fn load(cli: &Cli) -> Result<PantrySettings> {
    let settings = match &cli.config {
        Some(path) => pantry_settings::load_settings_from_path(path),
        None => pantry_settings::load_settings(),
    };
    settings.context("Failed to load settings")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    let telemetry = init_telemetry(TelemetryConfig {
        json: settings.logging.json,
        diagnostics_capacity: settings.logging.diagnostics_capacity,
        ..TelemetryConfig::default().with_level_name(level)
    });

    let result = match cli.command {
        Command::Serve { host, port } => serve(&settings, host, port).await,
        Command::Watch {
            token,
            household,
            list,
            url,
        } => watch(&settings, token, household, list, url).await,
        Command::Publish {
            household,
            user,
            event_type,
            scope,
            item_id,
            item,
            hub,
        } => {
            let delivery = build_delivery(household, user, &event_type, scope, &item_id, item)?;
            let hub = hub.unwrap_or_else(|| {
                format!("http://{}:{}", settings.server.host, settings.server.port)
            });
            publish(&hub, &delivery).await
        }
    };

    let warnings = telemetry.diagnostics().query(&DiagnosticQuery {
        level: Some("WARN".into()),
        ..DiagnosticQuery::default()
    });
    if !warnings.is_empty() {
        tracing::info!(count = warnings.len(), "warnings recorded during run");
    }
    result
}

async fn serve(settings: &PantrySettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = ServerConfig::from_settings(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let mut handle = pantry_server::start(config)
        .await
        .context("Failed to start event hub")?;
    tracing::info!(ws = %handle.ws_url(), "pantrybot hub ready");

    loop {
        tokio::select! {
            emit = handle.recv_emit() => match emit {
                Some(emit) => tracing::info!(
                    client_id = %emit.client_id,
                    user_id = %emit.user_id,
                    household_id = ?emit.household_id,
                    event_type = %emit.event_type,
                    "client emit"
                ),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl+c")?;
                break;
            }
        }
    }

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn watch(
    settings: &PantrySettings,
    token: String,
    household: String,
    list: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let mut config = TransportConfig::from_settings(&settings.transport);
    if let Some(url) = url {
        config.url = url;
    }
    let transport = Transport::new(config);
    let lifecycle = tokio::spawn(log_lifecycle(transport.subscribe_lifecycle()));

    let household = HouseholdId::from(household.as_str());
    transport
        .connect(Credential::new(token), household.clone())
        .await
        .context("Failed to connect to hub")?;
    let Some(user) = transport.user_id() else {
        bail!("hub did not report a user id");
    };

    let mut targets = vec![
        SyncTarget::inventory(household.clone()),
        SyncTarget::notifications(user),
    ];
    if let Some(list) = list {
        targets.push(SyncTarget::shopping_list(household, list.as_str()));
    }

    let cache = Arc::new(MemoryCache::new());
    let changes = tokio::spawn(log_changes(Arc::clone(&cache), cache.subscribe_changes()));
    let mut active = Vec::with_capacity(targets.len());
    for target in targets {
        if !cache.contains(&target.key) {
            cache.populate(target.key.clone(), Vec::<Record>::new());
        }
        active.push(CacheSynchronizer::new(target, cache.clone()).activate(transport.registry()));
    }
    tracing::info!(syncs = active.len(), "watching");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    for sync in active {
        sync.deactivate();
    }
    transport.disconnect().await;
    lifecycle.abort();
    changes.abort();
    Ok(())
}

async fn log_lifecycle(mut rx: broadcast::Receiver<LifecycleEvent>) {
    loop {
        match rx.recv().await {
            Ok(LifecycleEvent::Error { error }) => {
                tracing::warn!(error = %error, kind = error.error_kind(), "connection error");
            }
            Ok(event) => tracing::info!(event = event.name(), detail = ?event, "lifecycle"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "lifecycle listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_changes(cache: Arc<MemoryCache>, mut rx: broadcast::Receiver<QueryKey>) {
    loop {
        match rx.recv().await {
            Ok(key) => {
                let size = cache.get(&key).map_or(0, |c| c.len());
                tracing::info!(key = %key, size, "cache updated");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "change listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn build_delivery(
    household: Option<String>,
    user: Option<String>,
    event_type: &str,
    scope: Option<String>,
    item_id: &str,
    item: Option<String>,
) -> Result<Delivery> {
    if EventType::parse(event_type).is_none() {
        tracing::warn!(event_type, "unrecognized event type, sending anyway");
    }

    let mut payload = json!({ "itemId": item_id });
    if let Some(item) = item {
        let fields: Record = serde_json::from_str(&item).context("--item must be a JSON object")?;
        payload["item"] = Value::Object(fields);
    }

    match (household, user) {
        (Some(household), None) => {
            let scope = scope.unwrap_or_else(|| household.clone());
            Ok(Delivery::household(
                HouseholdId::from(household.as_str()),
                EventEnvelope::new(event_type, scope, payload),
            ))
        }
        (None, Some(user)) => {
            let scope = scope.unwrap_or_else(|| user.clone());
            Ok(Delivery::user(
                UserId::from_raw(user),
                EventEnvelope::new(event_type, scope, payload),
            ))
        }
        _ => bail!("exactly one of --household or --user is required"),
    }
}

async fn publish(hub: &str, delivery: &Delivery) -> Result<()> {
    let response = reqwest::Client::new()
        .post(format!("{}/events", hub.trim_end_matches('/')))
        .json(delivery)
        .send()
        .await
        .with_context(|| format!("Failed to reach hub at {hub}"))?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        bail!("hub refused event ({status}): {body}");
    }
    tracing::info!(delivered = %body["delivered"], "event published");
    Ok(())
}
