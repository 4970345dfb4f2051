//! Show command implementation

use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde_json::json;
use wgnetns_core::InterfaceName;
use wgnetns_tunnel::{DeviceState, PeerStats, UapiClient};

pub async fn execute(tmpdir: &Path, interface: &InterfaceName, json: bool) -> Result<()> {
    let client = UapiClient::for_interface(tmpdir, interface);
    tracing::debug!(socket = %client.socket_path().display(), "Querying tunnel");

    let state = client
        .get_state()
        .await
        .with_context(|| format!("Failed to query {}", client.socket_path().display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(interface, &state))?);
    } else {
        print_text(interface, &state);
    }
    Ok(())
}

/// JSON view; leaves the private key out
fn to_json(interface: &InterfaceName, state: &DeviceState) -> serde_json::Value {
    let peers: Vec<_> = state
        .config
        .peers
        .iter()
        .zip(&state.stats)
        .map(|(peer, stats)| {
            json!({
                "public_key": peer.public_key,
                "endpoint": peer.endpoint,
                "allowed_ips": peer.allowed_ips,
                "persistent_keepalive": peer.persistent_keepalive,
                "latest_handshake": handshake_age(stats).map(|age| age.as_secs()),
                "rx_bytes": stats.rx_bytes,
                "tx_bytes": stats.tx_bytes,
            })
        })
        .collect();

    json!({
        "interface": interface.as_str(),
        "public_key": state.config.public_key(),
        "listen_port": state.config.listen_port,
        "fwmark": state.config.fwmark,
        "peers": peers,
    })
}

fn handshake_age(stats: &PeerStats) -> Option<std::time::Duration> {
    stats
        .last_handshake
        .map(|at| SystemTime::now().duration_since(at).unwrap_or_default())
}

fn print_text(interface: &InterfaceName, state: &DeviceState) {
    println!("interface: {interface}");
    println!("  public key: {}", state.config.public_key());
    if let Some(port) = state.config.listen_port {
        println!("  listening port: {port}");
    }
    if let Some(mark) = state.config.fwmark {
        println!("  fwmark: {mark:#x}");
    }

    for (peer, stats) in state.config.peers.iter().zip(&state.stats) {
        println!();
        println!("peer: {}", peer.public_key);
        if let Some(endpoint) = peer.endpoint {
            println!("  endpoint: {endpoint}");
        }
        let allowed: Vec<String> = peer.allowed_ips.iter().map(ToString::to_string).collect();
        println!(
            "  allowed ips: {}",
            if allowed.is_empty() { "(none)".to_string() } else { allowed.join(", ") }
        );
        match handshake_age(stats) {
            Some(age) => println!("  latest handshake: {} seconds ago", age.as_secs()),
            None => println!("  latest handshake: (none)"),
        }
        println!(
            "  transfer: {} B received, {} B sent",
            stats.rx_bytes, stats.tx_bytes
        );
        if let Some(seconds) = peer.persistent_keepalive {
            println!("  persistent keepalive: every {seconds} seconds");
        }
    }
}
