//! Up command implementation

use anyhow::{Context, Result};
use tracing::info;
use wgnetns_core::WgConfFile;
use wgnetns_tunnel::{TunnelBuilder, TunnelRequest};

use crate::cli::UpArgs;

pub async fn execute(args: UpArgs) -> Result<()> {
    let options = args.options();
    let source = WgConfFile::new(&args.config);
    let request = TunnelRequest::new(args.ns_pid, args.interface.clone(), &options.work_dir);

    info!(
        pid = %args.ns_pid,
        interface = %args.interface,
        config = %args.config.display(),
        "Bringing up tunnel"
    );

    let tunnel = TunnelBuilder::from_options(&options)
        .create(&request, &source)
        .await
        .with_context(|| format!("Failed to bring up {}", args.interface))?;

    let socket = tunnel.control_socket().display().to_string();
    // The engine outlives us; it stops when the namespace or tmpdir goes away.
    let engine = tunnel.detach();

    println!("✅ {} is up in process {}", args.interface, args.ns_pid);
    println!("   engine pid: {engine}");
    println!("   control socket: {socket}");

    Ok(())
}
