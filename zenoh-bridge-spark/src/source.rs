//! Connection to the local SPARK producer socket.
//!
//! Two deployment modes are supported:
//!
//! - **stream**: connect a TCP stream to the producer and split the byte
//!   stream into `\n`-terminated lines
//! - **datagram**: bind a UDP socket and receive one datagram per sample
//!
//! [`SourceConnector::connect`] retries forever with exponential backoff and
//! only gives up when shutdown is requested. Every wait (resolution, connect,
//! read, backoff sleep) races against the shutdown signal.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::config::{SourceMode, SparkBridgeConfig};
use crate::error::{BridgeError, ConnectionError, SourceError};
use crate::shutdown::{ShutdownController, WaitOutcome};

/// Lifecycle of the producer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Resolved producer socket settings.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub mode: SourceMode,
    pub host: String,
    pub port: u16,
    pub buffer_size: usize,
    pub connect_timeout: Duration,
    /// `None` waits forever for the next message.
    pub read_timeout: Option<Duration>,
    pub backoff: BackoffConfig,
}

impl SourceSettings {
    /// Extract the producer settings from a validated configuration.
    pub fn from_config(config: &SparkBridgeConfig) -> Result<Self, BridgeError> {
        let host = config.source_host().ok_or_else(|| {
            BridgeError::validation("spark_socket_ipv4 or spark_socket_ipv6 must be set")
        })?;

        Ok(Self {
            mode: config.source.mode,
            host: host.to_string(),
            port: config.spark_socket_port,
            buffer_size: config.source.buffer_size,
            connect_timeout: Duration::from_millis(config.source.connect_timeout_ms),
            read_timeout: match config.source.read_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            backoff: config.source.backoff,
        })
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

enum Socket {
    Stream(TcpStream),
    Datagram(UdpSocket),
}

/// An established producer connection.
pub struct Connection {
    socket: Socket,
    addr: SocketAddr,
    buf: Vec<u8>,
    /// Stream bytes received but not yet handed out as a line.
    pending: Vec<u8>,
    /// The message returned by the last read.
    frame: Vec<u8>,
}

impl Connection {
    /// Remote address (stream) or local bound address (datagram).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn mode(&self) -> SourceMode {
        match self.socket {
            Socket::Stream(_) => SourceMode::Stream,
            Socket::Datagram(_) => SourceMode::Datagram,
        }
    }

    fn new(socket: Socket, addr: SocketAddr, buffer_size: usize) -> Self {
        Self {
            socket,
            addr,
            buf: vec![0u8; buffer_size],
            pending: Vec::new(),
            frame: Vec::new(),
        }
    }

    /// Move the next complete line out of `pending` into `frame`.
    ///
    /// A line that outgrows the read buffer is handed out unterminated so a
    /// producer that never sends `\n` cannot grow `pending` without bound.
    fn next_line(&mut self) -> bool {
        if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            self.frame.clear();
            self.frame.extend(self.pending.drain(..=pos));
            true
        } else if !self.pending.is_empty() && self.pending.len() >= self.buf.len() {
            self.frame.clear();
            self.frame.append(&mut self.pending);
            true
        } else {
            false
        }
    }

    /// Take `len` freshly received bytes. True once a message is ready.
    fn accept(&mut self, len: usize) -> bool {
        match self.socket {
            Socket::Stream(_) => {
                self.pending.extend_from_slice(&self.buf[..len]);
                self.next_line()
            }
            Socket::Datagram(_) => {
                self.frame.clear();
                self.frame.extend_from_slice(&self.buf[..len]);
                true
            }
        }
    }

    async fn recv(&mut self) -> io::Result<usize> {
        match &mut self.socket {
            Socket::Stream(stream) => stream.read(&mut self.buf).await,
            Socket::Datagram(socket) => {
                let (len, from) = socket.recv_from(&mut self.buf).await?;
                debug!(from = %from, len, "Datagram received");
                Ok(len)
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("mode", &self.mode())
            .field("addr", &self.addr)
            .finish()
    }
}

/// Owns the producer connection lifecycle.
pub struct SourceConnector {
    settings: SourceSettings,
    shutdown: ShutdownController,
    backoff: Backoff,
    state: ConnectionState,
    attempts: u64,
}

impl SourceConnector {
    pub fn new(settings: SourceSettings, shutdown: ShutdownController) -> Self {
        let backoff = Backoff::from(settings.backoff);
        Self {
            settings,
            shutdown,
            backoff,
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Total connect attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Connect to the producer, retrying until success or shutdown.
    pub async fn connect(&mut self) -> Result<Connection, SourceError> {
        let endpoint = self.settings.endpoint();

        loop {
            if self.shutdown.is_shutdown_requested() {
                self.state = ConnectionState::Disconnected;
                return Err(SourceError::Cancelled);
            }

            self.state = ConnectionState::Connecting;
            self.attempts += 1;

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                result = self.try_connect() => Some(result),
            };

            match result {
                None => {
                    self.state = ConnectionState::Disconnected;
                    return Err(SourceError::Cancelled);
                }
                Some(Ok(conn)) => {
                    self.backoff.reset();
                    self.state = ConnectionState::Connected;
                    info!(
                        mode = %self.settings.mode,
                        endpoint = %endpoint,
                        addr = %conn.addr(),
                        attempts = self.attempts,
                        "Producer socket ready"
                    );
                    return Ok(conn);
                }
                Some(Err(e)) => {
                    self.state = ConnectionState::Disconnected;
                    let delay = self.backoff.next_delay();
                    warn!(
                        mode = %self.settings.mode,
                        endpoint = %endpoint,
                        error = %e,
                        kind = e.kind(),
                        attempt = self.backoff.attempt(),
                        next_delay_ms = delay.as_millis() as u64,
                        "Producer socket unavailable, retrying"
                    );

                    if self.shutdown.wait_or(delay).await == WaitOutcome::Shutdown {
                        return Err(SourceError::Cancelled);
                    }
                }
            }
        }
    }

    /// Wait for the next message from the producer.
    ///
    /// In stream mode a message is one line including its `\n`; bytes after
    /// it stay buffered for the next call. In datagram mode it is one
    /// datagram. A zero-length read is reported as
    /// [`ConnectionError::PeerClosed`] and drops any unterminated line.
    pub async fn read<'c>(&self, conn: &'c mut Connection) -> Result<&'c [u8], SourceError> {
        let read_timeout = self.settings.read_timeout;

        while !conn.next_line() {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                result = recv_with_timeout(conn, read_timeout) => Some(result),
            };

            match result {
                None => return Err(SourceError::Cancelled),
                Some(Ok(0)) => {
                    if !conn.pending.is_empty() {
                        debug!(
                            addr = %conn.addr,
                            len = conn.pending.len(),
                            "Discarding unterminated line"
                        );
                        conn.pending.clear();
                    }
                    return Err(ConnectionError::PeerClosed.into());
                }
                Some(Ok(len)) => {
                    if conn.accept(len) {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }

        Ok(conn.frame.as_slice())
    }

    /// Close the connection. Errors during close are logged, not returned.
    pub async fn close(&mut self, conn: Connection) {
        self.state = ConnectionState::Closing;
        let addr = conn.addr;

        if let Socket::Stream(mut stream) = conn.socket {
            if let Err(e) = stream.shutdown().await {
                debug!(addr = %addr, error = %e, "Error shutting down producer stream");
            }
        }

        self.state = ConnectionState::Disconnected;
        info!(addr = %addr, "Producer socket closed");
    }

    async fn try_connect(&self) -> Result<Connection, ConnectionError> {
        let addrs: Vec<SocketAddr> = lookup_host((self.settings.host.as_str(), self.settings.port))
            .await
            .map_err(ConnectionError::Os)?
            .collect();

        let mut last_error = ConnectionError::Os(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} resolved to no addresses", self.settings.endpoint()),
        ));

        for addr in addrs {
            let attempt = match self.settings.mode {
                SourceMode::Stream => self.connect_stream(addr).await,
                SourceMode::Datagram => bind_datagram(addr).await,
            };

            match attempt {
                Ok(socket) => return Ok(Connection::new(socket, addr, self.settings.buffer_size)),
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Address failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn connect_stream(&self, addr: SocketAddr) -> Result<Socket, ConnectionError> {
        match tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(Socket::Stream(stream)),
            Ok(Err(e)) => Err(ConnectionError::from_io(e, addr.to_string())),
            Err(_) => Err(ConnectionError::Timeout(self.settings.connect_timeout)),
        }
    }
}

async fn bind_datagram(addr: SocketAddr) -> Result<Socket, ConnectionError> {
    UdpSocket::bind(addr)
        .await
        .map(Socket::Datagram)
        .map_err(ConnectionError::Os)
}

async fn recv_with_timeout(
    conn: &mut Connection,
    read_timeout: Option<Duration>,
) -> Result<usize, ConnectionError> {
    let addr = conn.addr.to_string();
    let result = match read_timeout {
        Some(limit) => match tokio::time::timeout(limit, conn.recv()).await {
            Ok(result) => result,
            Err(_) => return Err(ConnectionError::Timeout(limit)),
        },
        None => conn.recv().await,
    };
    result.map_err(|e| ConnectionError::from_io(e, addr))
}
