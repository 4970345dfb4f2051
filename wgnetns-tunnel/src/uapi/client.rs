//! Connections to an engine's control socket

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, error};
use wgnetns_core::{Error, InterfaceName, Key, Peer, Result, UapiConfig};

use super::protocol::{self, DeviceState, Operation, Response};

/// Talks to one engine through its control socket
///
/// Each call opens a fresh connection and closes it before returning. Use
/// [`UapiClient::connect`] to run several requests over one connection.
#[derive(Debug, Clone)]
pub struct UapiClient {
    socket_path: PathBuf,
}

impl UapiClient {
    /// Client for the socket at `socket_path`
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Client for the socket the engine creates for `interface` in `work_dir`
    #[must_use]
    pub fn for_interface(work_dir: &Path, interface: &InterfaceName) -> Self {
        Self::new(crate::supervisor::control_socket_path(work_dir, interface))
    }

    /// Control socket path
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Open a connection
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the socket cannot be reached
    pub async fn connect(&self) -> Result<UapiConnection> {
        UapiConnection::open(&self.socket_path).await
    }

    /// Replace the device configuration, peer set included
    pub async fn set_config(&self, config: &UapiConfig) -> Result<()> {
        self.connect().await?.set_config(config).await
    }

    /// Read back the device configuration
    pub async fn get_config(&self) -> Result<UapiConfig> {
        Ok(self.get_state().await?.config)
    }

    /// Read back configuration and peer counters
    pub async fn get_state(&self) -> Result<DeviceState> {
        self.connect().await?.get_state().await
    }

    /// Add or update individual peers
    pub async fn update_peers(&self, peers: &[Peer]) -> Result<()> {
        self.connect().await?.update_peers(peers).await
    }

    /// Remove one peer
    pub async fn remove_peer(&self, public_key: &Key) -> Result<()> {
        self.connect().await?.remove_peer(public_key).await
    }
}

/// An open control connection
///
/// The socket is closed when the connection is dropped, whichever way the
/// surrounding code exits. Closing it never affects the engine process.
#[derive(Debug)]
pub struct UapiConnection {
    stream: BufReader<UnixStream>,
    path: PathBuf,
}

impl UapiConnection {
    /// Connect to the socket at `path`
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the socket cannot be reached
    pub async fn open(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to connect to control socket");
            Error::Io(e)
        })?;
        debug!(path = %path.display(), "Control connection opened");
        Ok(Self {
            stream: BufReader::new(stream),
            path: path.to_path_buf(),
        })
    }

    /// Replace the device configuration, peer set included
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if the engine rejects the request
    pub async fn set_config(&mut self, config: &UapiConfig) -> Result<()> {
        debug!(
            path = %self.path.display(),
            peers = config.peers.len(),
            "Applying device configuration"
        );
        self.set(&protocol::encode_set(config)).await
    }

    /// Add or update individual peers without touching the others
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if the engine rejects the request
    pub async fn update_peers(&mut self, peers: &[Peer]) -> Result<()> {
        debug!(path = %self.path.display(), peers = peers.len(), "Updating peers");
        self.set(&protocol::encode_update(peers)).await
    }

    /// Remove one peer
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if the engine rejects the request
    pub async fn remove_peer(&mut self, public_key: &Key) -> Result<()> {
        debug!(path = %self.path.display(), peer = %public_key, "Removing peer");
        self.set(&protocol::encode_remove(public_key)).await
    }

    /// Read back the device configuration
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if the engine rejects the request, or
    /// [`Error::InvalidResponse`] if the reply cannot be parsed
    pub async fn get_config(&mut self) -> Result<UapiConfig> {
        Ok(self.get_state().await?.config)
    }

    /// Read back configuration and peer counters
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if the engine rejects the request, or
    /// [`Error::InvalidResponse`] if the reply cannot be parsed
    pub async fn get_state(&mut self) -> Result<DeviceState> {
        let fields = self
            .request(protocol::encode_get())
            .await?
            .check(Operation::Get)?;
        protocol::decode_device(&fields)
    }

    /// Close the connection now
    ///
    /// # Errors
    /// Returns error if the shutdown fails
    pub async fn close(mut self) -> Result<()> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }

    async fn set(&mut self, request: &str) -> Result<()> {
        self.request(request).await?.check(Operation::Set)?;
        Ok(())
    }

    async fn request(&mut self, request: &str) -> Result<Response> {
        self.stream.get_mut().write_all(request.as_bytes()).await?;
        self.stream.get_mut().flush().await?;

        let mut text = String::new();
        loop {
            let mut line = String::new();
            let n = self.stream.read_line(&mut line).await?;
            if n == 0 {
                // Engine hung up; accept what arrived if it is complete
                break;
            }
            if line == "\n" {
                if text.is_empty() {
                    return Err(Error::InvalidResponse {
                        message: "empty response from engine".to_string(),
                    });
                }
                break;
            }
            text.push_str(&line);
        }

        let response = protocol::parse_response(&text)?;
        debug!(path = %self.path.display(), errno = response.errno, "Control response");
        Ok(response)
    }
}

impl Drop for UapiConnection {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Control connection closed");
    }
}
