use crate::buffer::EventBuffer;
use crate::config::ShipperConfig;
use crate::error::TransportError;
use crate::transport::{SendReport, Transport, TransportBase};
use async_trait::async_trait;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info, warn};

pub const STACK_FRAME: &str = "stack";
pub const LOG_FRAME: &str = "log";
const FIELD_DELIMITER: u8 = b'\t';

/// Byte stream a [`TcpTransport`] writes frames to.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens the connection used by [`TcpTransport`].
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, domain: &str, port: u16) -> io::Result<BoxedStream>;
}

/// Plain TCP, no encryption.
#[derive(Clone, Debug, Default)]
pub struct PlainDialer;

#[async_trait]
impl Dialer for PlainDialer {
    async fn dial(&self, domain: &str, port: u16) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect((domain, port)).await?;
        Ok(Box::new(stream))
    }
}

/// TLS over TCP, verified against the platform's root certificates.
#[derive(Clone)]
pub struct TlsDialer {
    connector: TlsConnector,
}

impl TlsDialer {
    /// Connector pinned to the `ring` crypto provider, so it does not
    /// depend on which provider the rest of the dependency graph installs.
    pub fn new() -> io::Result<Self> {
        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for e in native.errors {
            debug!("failed to load native certificate: {}", e);
        }
        for cert in native.certs {
            if let Err(e) = roots.add(cert) {
                debug!("failed to parse certificate: {:?}", e);
            }
        }
        if roots.is_empty() {
            warn!("no native root certificates found, TLS handshakes will fail");
        }

        let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self, domain: &str, port: u16) -> io::Result<BoxedStream> {
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let tcp = TcpStream::connect((domain, port)).await?;
        let tls = self.connector.connect(server_name, tcp).await?;
        Ok(Box::new(tls))
    }
}

/// Framed MessagePack delivery over one persistent connection.
///
/// Each record is written as `project_key \t kind \t payload \n` where
/// `kind` is [`STACK_FRAME`] or [`LOG_FRAME`]. A failed write closes the
/// connection, redials and retries that frame once; a second failure
/// drops it.
pub struct TcpTransport {
    base: TransportBase,
    dialer: Arc<dyn Dialer>,
    writer: Option<WriteHalf<BoxedStream>>,
    reader: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Transport dialing with TLS or plain TCP according to `config.tls`.
    ///
    /// **Returns**
    /// - `Err(..)` if the TLS client configuration cannot be built.
    pub fn new(config: ShipperConfig) -> Result<Self, TransportError> {
        let dialer: Arc<dyn Dialer> = if config.tls {
            Arc::new(TlsDialer::new()?)
        } else {
            Arc::new(PlainDialer)
        };
        Ok(Self::with_dialer(config, dialer))
    }

    pub fn with_dialer(config: ShipperConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            base: TransportBase::new(config),
            dialer,
            writer: None,
            reader: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let domain = self.base.config().tcp_domain();
        let port = self.base.config().tcp_port();
        let stream = self.dialer.dial(&domain, port).await?;
        let (read, write) = tokio::io::split(stream);

        // Acknowledgements and diagnostics only, nothing here drives flow control.
        self.reader = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(collector = %line, "collector message");
            }
        }));
        self.writer = Some(write);
        debug!(%domain, port, "connected to collector");
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn frame(&self, kind: &str, payload: &[u8]) -> Vec<u8> {
        let key = self.base.project_key().as_bytes();
        let mut frame = Vec::with_capacity(key.len() + kind.len() + payload.len() + 3);
        frame.extend_from_slice(key);
        frame.push(FIELD_DELIMITER);
        frame.extend_from_slice(kind.as_bytes());
        frame.push(FIELD_DELIMITER);
        frame.extend_from_slice(payload);
        frame.push(b'\n');
        frame
    }

    async fn try_write(&mut self, frame: &[u8]) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no collector connection"))?;
        writer.write_all(frame).await?;
        writer.flush().await
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if let Err(e) = self.try_write(frame).await {
            warn!(size = frame.len(), "couldn't write frame on the TCP socket: {}, reconnecting", e);
            self.close().await;
            self.connect().await?;
            self.try_write(frame).await?;
        }
        Ok(())
    }

    async fn ship_record<T: Serialize + Sync>(&mut self, kind: &str, record: &T) -> Result<(), TransportError> {
        let payload = rmp_serde::to_vec_named(record)?;
        let frame = self.frame(kind, &payload);
        self.write_frame(&frame).await
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn init(&mut self) -> Result<(), TransportError> {
        if let Err(e) = self.connect().await {
            error!(
                domain = %self.base.config().tcp_domain(),
                port = self.base.config().tcp_port(),
                "couldn't connect to collector: {}", e
            );
        }
        Ok(())
    }

    async fn send(&mut self, buffer: &EventBuffer) -> SendReport {
        let pending = buffer.drain();
        let mut report = SendReport::default();

        for stack in &pending.stacks {
            match self.ship_record(STACK_FRAME, stack).await {
                Ok(()) => report.stacks += 1,
                Err(e) => {
                    error!(request_id = %stack.id, "stack record dropped: {}", e);
                    report.failed_batches += 1;
                }
            }
        }

        for log in &pending.logs {
            match self.ship_record(LOG_FRAME, log).await {
                Ok(()) => report.logs += 1,
                Err(e) => {
                    error!(request_id = %log.request_id, "log record dropped: {}", e);
                    report.failed_batches += 1;
                }
            }
        }

        report
    }

    fn get_option(&self, key: &str) -> Option<serde_json::Value> {
        self.base.get_option(key)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
