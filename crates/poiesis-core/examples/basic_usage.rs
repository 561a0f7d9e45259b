//! Basic usage example - connect, issue a request, receive a push event.
//!
//! Runs entirely in-process: the "server" side is scripted through the
//! memory transport's peer handle.

use poiesis_core::{ClientConfig, ConnectionManager, MemoryTransport, Result};
use serde_json::{json, Map};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let (transport, peer) = MemoryTransport::new();
    let config = ClientConfig::new("mem://example").with_api_key("example-key");
    let client = ConnectionManager::new(config, Arc::new(transport))?;

    let _progress = client.events().on("job.progress", |event| {
        println!("[{}] {} from {}", event.sequence, event.data, event.source);
    });

    println!("Connecting to {}...", client.endpoint());
    client.connect().await?;
    println!("State: {}", client.state());

    // Answer the next request from the scripted server side.
    let server = tokio::spawn(async move {
        if let Some(request) = peer.next_request().await {
            peer.push("job.progress", json!({"percent": 50}), "scheduler");
            peer.reply_ok(&request.id, json!({"healthy": true, "jobs": 2}));
        }
    });

    let status = client.request("getStatus", Map::new()).await?;
    println!("getStatus -> {}", status);
    let _ = server.await;

    println!("History:");
    for event in client.events().history(None) {
        println!("  - {} {}", event.event_type, event.data);
    }

    client.disconnect().await;
    Ok(())
}
