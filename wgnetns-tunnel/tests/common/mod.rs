//! Test doubles: an in-process UAPI server and engine/device fakes

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tokio::task::JoinHandle;
use wgnetns_core::{InterfaceName, IpPrefix, Key, PrivateKey, ProcessId, Result};
use wgnetns_namespace::{DeviceProvider, TunDevice};
use wgnetns_tunnel::{EngineLauncher, TunnelProcessHandle, control_socket_path};

// Keys from the wg(8) example configuration
pub const PRIVATE_B64: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
pub const PEER_A_B64: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
pub const PEER_B_B64: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";
pub const PEER_C_B64: &str = "gN65BkIKy1eCE9pP1wdc8ROUtkHLF2PfAqYdyYBz6EA=";

pub fn private_key() -> PrivateKey {
    PrivateKey::from_base64(PRIVATE_B64).unwrap()
}

pub fn key(b64: &str) -> Key {
    Key::from_base64(b64).unwrap()
}

#[derive(Debug, Clone, Default)]
pub struct FakePeer {
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub keepalive: u16,
}

/// Device state kept by the fake engine, in wire (hex) form
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    pub private_key: Option<String>,
    pub listen_port: u16,
    pub fwmark: u32,
    pub peers: Vec<FakePeer>,
    /// Answer every `set` with this errno instead of applying it
    pub reject_set: Option<i32>,
    pub requests: usize,
}

impl FakeDevice {
    fn apply_set(&mut self, lines: &[(String, String)]) -> i32 {
        if let Some(errno) = self.reject_set {
            return errno;
        }
        let mut current: Option<usize> = None;
        for (key, value) in lines {
            match key.as_str() {
                "private_key" => self.private_key = Some(value.clone()),
                "listen_port" => self.listen_port = value.parse().unwrap_or(0),
                "fwmark" => self.fwmark = value.parse().unwrap_or(0),
                "replace_peers" => self.peers.clear(),
                "public_key" => {
                    let idx = self.peers.iter().position(|p| &p.public_key == value);
                    current = Some(idx.unwrap_or_else(|| {
                        self.peers.push(FakePeer {
                            public_key: value.clone(),
                            ..FakePeer::default()
                        });
                        self.peers.len() - 1
                    }));
                }
                other => {
                    let Some(idx) = current else { return -22 };
                    let peer = &mut self.peers[idx];
                    match other {
                        "remove" => {
                            self.peers.remove(idx);
                            current = None;
                        }
                        "preshared_key" => peer.preshared_key = Some(value.clone()),
                        "endpoint" => peer.endpoint = Some(value.clone()),
                        "replace_allowed_ips" => peer.allowed_ips.clear(),
                        // Stored with host bits cleared, like wireguard-go
                        "allowed_ip" => match value.parse::<IpPrefix>() {
                            Ok(prefix) => peer.allowed_ips.push(prefix.network().to_string()),
                            Err(_) => return -22,
                        },
                        "persistent_keepalive_interval" => {
                            peer.keepalive = value.parse().unwrap_or(0);
                        }
                        _ => return -22,
                    }
                }
            }
        }
        0
    }

    fn render_get(&self) -> String {
        let mut out = String::new();
        if let Some(key) = &self.private_key {
            out.push_str(&format!("private_key={key}\n"));
        }
        out.push_str(&format!("listen_port={}\n", self.listen_port));
        if self.fwmark != 0 {
            out.push_str(&format!("fwmark={}\n", self.fwmark));
        }
        for peer in &self.peers {
            out.push_str(&format!("public_key={}\n", peer.public_key));
            let psk = peer.preshared_key.clone().unwrap_or_else(|| "0".repeat(64));
            out.push_str(&format!("preshared_key={psk}\n"));
            out.push_str("protocol_version=1\n");
            if let Some(endpoint) = &peer.endpoint {
                out.push_str(&format!("endpoint={endpoint}\n"));
            }
            out.push_str("last_handshake_time_sec=0\nlast_handshake_time_nsec=0\n");
            out.push_str("tx_bytes=0\nrx_bytes=0\n");
            out.push_str(&format!("persistent_keepalive_interval={}\n", peer.keepalive));
            for ip in &peer.allowed_ips {
                out.push_str(&format!("allowed_ip={ip}\n"));
            }
        }
        out
    }
}

/// A UAPI server on a Unix socket, serving until dropped
pub struct FakeUapiServer {
    pub path: PathBuf,
    pub device: Arc<Mutex<FakeDevice>>,
    task: JoinHandle<()>,
}

impl FakeUapiServer {
    pub fn start(path: &Path) -> Self {
        Self::start_with(path, FakeDevice::default())
    }

    pub fn start_with(path: &Path, device: FakeDevice) -> Self {
        let listener = UnixListener::bind(path).unwrap();
        let device = Arc::new(Mutex::new(device));
        let shared = Arc::clone(&device);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&shared)));
            }
        });
        Self {
            path: path.to_path_buf(),
            device,
            task,
        }
    }

    pub fn snapshot(&self) -> FakeDevice {
        self.device.lock().unwrap().clone()
    }
}

impl Drop for FakeUapiServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: UnixStream, device: Arc<Mutex<FakeDevice>>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    loop {
        let mut command = String::new();
        if reader.read_line(&mut command).await.unwrap_or(0) == 0 {
            return;
        }
        let command = command.trim_end().to_string();

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((k, v)) = line.split_once('=') {
                lines.push((k.to_string(), v.to_string()));
            }
        }

        let reply = {
            let mut dev = device.lock().unwrap();
            dev.requests += 1;
            match command.as_str() {
                "set=1" => format!("errno={}\n\n", dev.apply_set(&lines)),
                "get=1" => format!("{}errno=0\n\n", dev.render_get()),
                _ => "errno=-22\n\n".to_string(),
            }
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Hands out pipe read ends as "devices"
#[derive(Default)]
pub struct PipeDevices {
    pub write_ends: Mutex<Vec<std::os::fd::OwnedFd>>,
}

impl DeviceProvider for PipeDevices {
    fn create_device(&self, _target: ProcessId, name: &InterfaceName) -> Result<TunDevice> {
        let (read_end, write_end) = nix::unistd::pipe()?;
        self.write_ends.lock().unwrap().push(write_end);
        Ok(TunDevice::from_parts(read_end, name.clone(), 1420))
    }
}

/// Engine stand-in: a `sleep` child plus an in-process UAPI server
#[derive(Default)]
pub struct FakeEngine {
    pub template: FakeDevice,
    pub servers: Mutex<Vec<FakeUapiServer>>,
    pub pids: Mutex<Vec<ProcessId>>,
}

impl FakeEngine {
    pub fn rejecting(errno: i32) -> Self {
        Self {
            template: FakeDevice {
                reject_set: Some(errno),
                ..FakeDevice::default()
            },
            ..Self::default()
        }
    }
}

impl EngineLauncher for FakeEngine {
    fn launch(
        &self,
        device: TunDevice,
        interface: &InterfaceName,
        work_dir: &Path,
    ) -> Result<TunnelProcessHandle> {
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .spawn()?;
        drop(device);
        let handle = TunnelProcessHandle::new(child, interface.clone(), work_dir)?;
        let server = FakeUapiServer::start_with(
            &control_socket_path(work_dir, interface),
            self.template.clone(),
        );
        self.servers.lock().unwrap().push(server);
        self.pids.lock().unwrap().push(handle.pid());
        Ok(handle)
    }
}

/// Engine stand-in running a shell command and nothing else
pub struct ShellEngine(pub &'static str);

impl EngineLauncher for ShellEngine {
    fn launch(
        &self,
        device: TunDevice,
        interface: &InterfaceName,
        work_dir: &Path,
    ) -> Result<TunnelProcessHandle> {
        let child = Command::new("/bin/sh")
            .args(["-c", self.0])
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .spawn()?;
        drop(device);
        TunnelProcessHandle::new(child, interface.clone(), work_dir)
    }
}

/// Whether `pid` still names a live (or zombie) process
pub fn process_exists(pid: ProcessId) -> bool {
    nix::sys::signal::kill(pid.as_nix_pid(), None).is_ok()
}
