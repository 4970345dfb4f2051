//! CLI argument definitions

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use wgnetns_core::{DEFAULT_MTU, InterfaceName, ProcessId};
use wgnetns_tunnel::{ReadinessConfig, TunnelOptions};

#[derive(Parser)]
#[command(name = "wgnetns")]
#[command(about = "WireGuard tunnels inside unprivileged network namespaces", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a tunnel interface in a process's namespaces and start WireGuard on it
    Up(UpArgs),

    /// Show the state of a running tunnel
    Show {
        /// Directory holding the engine's control socket
        #[arg(long, default_value = ".")]
        tmpdir: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Interface name
        interface: InterfaceName,
    },

    /// List the interfaces in a process's network namespace
    Interfaces {
        /// Process ID
        pid: ProcessId,
    },
}

#[derive(Args)]
pub struct UpArgs {
    /// Engine working directory (holds the control socket)
    #[arg(long, default_value = ".")]
    pub tmpdir: PathBuf,

    /// Tunnel engine executable
    #[arg(long, default_value = "wireguard-go")]
    pub engine: PathBuf,

    /// Log level passed to the engine (error, verbose, debug, silent)
    #[arg(long)]
    pub engine_log_level: Option<String>,

    /// Interface MTU
    #[arg(long, default_value_t = DEFAULT_MTU)]
    pub mtu: u32,

    /// Ask for IFF_NO_PI (no packet information header on the device)
    #[arg(long)]
    pub no_packet_info: bool,

    /// Seconds to wait for the control socket (0 waits indefinitely)
    #[arg(long, default_value = "30")]
    pub ready_timeout: u64,

    /// Milliseconds between control socket checks
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_ms: u64,

    /// Process whose user and network namespaces receive the interface
    pub ns_pid: ProcessId,

    /// Interface name
    pub interface: InterfaceName,

    /// WireGuard configuration file
    #[arg(value_name = "wireguard.conf")]
    pub config: PathBuf,
}

impl UpArgs {
    /// Tunnel options selected by the flags
    pub fn options(&self) -> TunnelOptions {
        let timeout = (self.ready_timeout > 0).then(|| Duration::from_secs(self.ready_timeout));
        let readiness = ReadinessConfig::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_timeout(timeout);

        let options = TunnelOptions::new()
            .with_work_dir(&self.tmpdir)
            .with_engine(&self.engine)
            .with_mtu(self.mtu)
            .with_packet_info(!self.no_packet_info)
            .with_readiness(readiness);

        match &self.engine_log_level {
            Some(level) => options.with_engine_log_level(level.clone()),
            None => options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> UpArgs {
        let mut argv = vec!["wgnetns", "up"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Commands::Up(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_up_defaults() {
        let options = parse(&["1234", "wg0", "wg0.conf"]).options();
        assert_eq!(options, TunnelOptions::default());
    }

    #[test]
    fn test_up_flags() {
        let args = parse(&[
            "--tmpdir",
            "/run/wg",
            "--mtu",
            "1280",
            "--ready-timeout",
            "0",
            "--poll-interval-ms",
            "10",
            "--no-packet-info",
            "--engine-log-level",
            "debug",
            "1234",
            "wg1",
            "wg1.conf",
        ]);
        assert_eq!(args.ns_pid.as_raw(), 1234);
        assert_eq!(args.interface.as_str(), "wg1");

        let options = args.options();
        assert_eq!(options.work_dir, PathBuf::from("/run/wg"));
        assert_eq!(options.mtu, 1280);
        assert!(!options.packet_info);
        assert_eq!(options.engine_log_level.as_deref(), Some("debug"));
        assert_eq!(options.readiness.timeout, None);
        assert_eq!(options.readiness.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_invalid_interface_rejected() {
        let result = Cli::try_parse_from(["wgnetns", "up", "1234", "bad/name", "wg.conf"]);
        assert!(result.is_err());
    }
}
