//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use poiesis_core::{
    ClientConfig, ConnectionManager, ConnectionState, EventPayload, SubscriptionHandle,
    TcpTransport,
};
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Parse the `--params` argument. Absent or `null` means no params.
pub fn parse_params(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("--params is not valid JSON")? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => bail!("--params must be a JSON object, got {}", other),
    }
}

async fn connect_tcp(config: ClientConfig) -> Result<ConnectionManager> {
    let transport = Arc::new(TcpTransport::from_config(&config));
    let client = ConnectionManager::new(config, transport)?;
    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", client.endpoint()))?;
    Ok(client)
}

/// `poiesis call`
pub async fn call(config: ClientConfig, method: &str, params: Map<String, Value>) -> Result<Value> {
    let client = connect_tcp(config).await?;
    let result = run_call(&client, method, params).await;
    client.shutdown().await;
    result
}

/// `poiesis watch`
pub async fn watch(config: ClientConfig, event_types: &[String], count: Option<usize>) -> Result<()> {
    let client = connect_tcp(config).await?;
    let mut stdout = std::io::stdout();

    let outcome = tokio::select! {
        result = run_watch(&client, event_types, count, &mut stdout) => result.map(|received| {
            info!("Received {} events", received);
        }),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, disconnecting");
            Ok(())
        }
    };

    client.shutdown().await;
    outcome
}

/// Perform one request on an already connected client.
pub async fn run_call(
    client: &ConnectionManager,
    method: &str,
    params: Map<String, Value>,
) -> Result<Value> {
    client
        .request(method, params)
        .await
        .with_context(|| format!("request '{}' failed", method))
}

/// Write matching push events to `out` as JSON lines.
///
/// Returns the number of events written once `count` is reached or the bus
/// drops the handlers, or an error if the connection ends for good. The
/// handlers are removed from the bus before returning.
pub async fn run_watch<W: Write>(
    client: &ConnectionManager,
    event_types: &[String],
    count: Option<usize>,
    out: &mut W,
) -> Result<usize> {
    let (tx, rx) = mpsc::unbounded_channel::<EventPayload<Value>>();
    let subscriptions: Vec<SubscriptionHandle> = event_types
        .iter()
        .map(|event_type| {
            let tx = tx.clone();
            client.events().on(event_type.clone(), move |event| {
                let _ = tx.send(event);
            })
        })
        .collect();
    drop(tx);

    let outcome = forward_events(client, rx, count, out).await;

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    outcome
}

async fn forward_events<W: Write>(
    client: &ConnectionManager,
    mut rx: mpsc::UnboundedReceiver<EventPayload<Value>>,
    count: Option<usize>,
    out: &mut W,
) -> Result<usize> {
    let mut states = client.subscribe_state();
    let mut received = 0;

    while count.map_or(true, |limit| received < limit) {
        tokio::select! {
            event = rx.recv() => {
                // Every handler was cleared off the bus
                let Some(event) = event else { break };
                writeln!(out, "{}", serde_json::to_string(&event)?)?;
                out.flush()?;
                received += 1;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Reconnecting => {
                        warn!("Connection to {} lost, reconnecting", client.endpoint())
                    }
                    ConnectionState::Disconnected | ConnectionState::Closed => {
                        bail!("connection to {} ended ({})", client.endpoint(), state)
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(received)
}
