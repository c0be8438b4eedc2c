//! Process entry point for one mesh device runtime (§6, §10.1). Owns the
//! `tokio` runtime, the real socket I/O, CLI/env argument parsing, and
//! `tracing` initialization, then wires `mesh-rt-core`'s library pieces
//! into a running device process. Mirrors
//! `bpmn-lite-server/src/main.rs`'s tracing-init / parse-config /
//! build-engine / serve shape.

use std::sync::Arc;

use mesh_rt_core::config::RuntimeConfig;
use mesh_rt_core::resolve::NoNativeFunctions;
use mesh_rt_core::runtime::Runtime;
use mesh_rt_core::{decoder, events};
use mesh_rt_node::{net, peers};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::from_env_and_args(&args);

    let self_addr = match &config.self_addr_override {
        Some(addr) => addr.clone(),
        None => net::resolve_self_addr(config.port)?,
    };
    config.self_addr_override = Some(self_addr.clone());

    tracing::info!(
        config = %serde_json::json!({
            "device": config.device_name,
            "port": config.port,
            "self_addr": self_addr,
        }),
        "starting mesh-rt-node"
    );

    let devices = Arc::new(peers::peers_from_env());
    let natives = Arc::new(NoNativeFunctions);

    let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(config.queue_capacity);
    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(config.queue_capacity);
    let (events_tx, events_rx) = tokio::sync::mpsc::channel(config.queue_capacity);

    let port = config.port;
    let rt = Runtime::new(config, devices, natives, outbound_tx);

    let listener = tokio::spawn(net::run_listener(port, inbound_tx));
    let sender = tokio::spawn(net::run_sender(outbound_rx));
    let decoder = tokio::spawn(decoder::run_decoder(Arc::clone(&rt), inbound_rx, events_tx));
    let dispatcher = tokio::spawn(events::run_dispatcher(Arc::clone(&rt), events_rx));

    // Any one of the four tasks exiting means the device can no longer do
    // useful work (§5: these are the canonical thread set for one
    // device); propagate whichever failure surfaces first.
    tokio::select! {
        res = listener => {
            if let Ok(Err(err)) = res {
                tracing::error!(error = %err, "listener task exited with an error");
            }
        }
        _ = sender => tracing::error!("sender task exited"),
        _ = decoder => tracing::error!("decoder task exited"),
        _ = dispatcher => tracing::error!("dispatcher task exited"),
    }

    Ok(())
}
