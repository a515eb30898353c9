//! Downstream-facing MCP server.
//!
//! Speaks line-delimited JSON-RPC on stdio to the single consumer. Tool
//! names containing `:` route to upstreams through the manager; bare names
//! address the built-in management tools (`retrieve_tools`,
//! `upstream_servers`, `quarantine_security`, `groups`, …).

mod builtin;
mod message_processor;
mod outgoing_message;
mod script;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use mcpproxy_core::Config;
use mcpproxy_core::EventBus;
use mcpproxy_core::UpstreamManager;
use mcpproxy_core::manager::ManagerSettings;
use mcpproxy_protocol::jsonrpc::JSONRPCMessage;
use mcpproxy_state::StateStore;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::message_processor::MessageProcessor;
use crate::outgoing_message::OutgoingMessageSender;
use crate::script::ScriptSupervisor;

pub use script::ScriptStatus;

#[derive(Debug, Clone)]
pub struct ServerArgs {
    pub config_path: Option<PathBuf>,
    pub db_path: PathBuf,
}

/// Bring the manager up, serve MCP on stdio until EOF, then shut down.
pub async fn run_main(args: ServerArgs) -> anyhow::Result<()> {
    let config = match &args.config_path {
        Some(path) => Config::load(path).await?,
        None => Config::default(),
    };

    let store = StateStore::open(&args.db_path)
        .await
        .with_context(|| format!("failed to open state db at {}", args.db_path.display()))?;
    let bus = EventBus::new();
    let manager = UpstreamManager::new(store, bus, ManagerSettings::from_config(&config));
    manager.start().await?;

    // Reconcile configured servers with persisted ones: config wins.
    for server in &config.servers {
        let result = if manager.get_client(&server.name).is_some() {
            manager.update_server_config(server.clone()).await
        } else {
            manager.add_server_config(server.clone()).await
        };
        if let Err(err) = result {
            warn!("failed to apply config for `{}`: {err}", server.name);
        }
    }

    {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let outcome = manager.connect_all().await;
            info!(
                "startup connect wave: {}/{} upstreams ready",
                outcome.succeeded, outcome.attempted
            );
        });
    }

    serve_stdio(Arc::clone(&manager)).await;

    manager.shutdown().await;
    Ok(())
}

async fn serve_stdio(manager: Arc<UpstreamManager>) {
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<JSONRPCMessage>();
    let outgoing = Arc::new(OutgoingMessageSender::new(outgoing_tx));
    let script = Arc::new(ScriptSupervisor::new(None));

    // Mirror bus events to the downstream as notifications so observers on
    // the MCP side see state changes without polling.
    let event_forwarder = {
        let outgoing = Arc::clone(&outgoing);
        let mut events = manager.bus().subscribe(None);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match serde_json::to_value(&event) {
                    Ok(params) => {
                        outgoing.send_notification("mcpproxy/event", Some(params))
                    }
                    Err(err) => warn!("failed to serialize event notification: {err}"),
                }
            }
        })
    };

    let mut processor = MessageProcessor::new(Arc::clone(&outgoing), manager, script);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = outgoing_rx.recv().await {
            let serialized = match serde_json::to_string(&message) {
                Ok(serialized) => serialized,
                Err(err) => {
                    error!("failed to serialize outgoing message: {err}");
                    continue;
                }
            };
            if stdout.write_all(serialized.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JSONRPCMessage>(&line) {
            Ok(message) => processor.process_message(message).await,
            Err(err) => error!("failed to parse incoming message: {err}; line = {line}"),
        }
    }

    info!("stdin closed; shutting down");
    event_forwarder.abort();
    drop(processor);
    drop(outgoing);
    let _ = writer.await;
}
