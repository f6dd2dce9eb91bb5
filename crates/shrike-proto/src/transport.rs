//! Framed IRC transport over TCP and client-side TLS.
//!
//! A [`Transport`] is used directly during connection and registration, then
//! split into read/write halves so a dedicated writer task can own the send
//! side while the listen loop owns the receive side.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Framed, FramedRead, FramedWrite};
use tracing::debug;

use crate::error::ProtocolError;
use crate::irc::IrcCodec;
use crate::message::Message;

/// TLS trust configuration for outbound connections.
///
/// With no CA file set, the platform's certificate store is used. The
/// server's certificate and hostname are always verified.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Optional path to a PEM bundle of trusted CA certificates.
    pub ca_file: Option<PathBuf>,
}

/// A unified raw stream type underneath the framed codec.
#[non_exhaustive]
pub enum TransportStream {
    /// Plain TCP stream.
    Tcp(TcpStream),
    /// Client-side TLS stream (boxed for size).
    ClientTls(Box<ClientTlsStream<TcpStream>>),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(inner) => Pin::new(inner).poll_read(cx, buf),
            Self::ClientTls(inner) => Pin::new(inner).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(inner) => Pin::new(inner).poll_write(cx, buf),
            Self::ClientTls(inner) => Pin::new(inner).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(inner) => Pin::new(inner).poll_flush(cx),
            Self::ClientTls(inner) => Pin::new(inner).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(inner) => Pin::new(inner).poll_shutdown(cx),
            Self::ClientTls(inner) => Pin::new(inner).poll_shutdown(cx),
        }
    }
}

/// Framed IRC connection.
pub struct Transport {
    framed: Framed<TransportStream, IrcCodec>,
}

/// The read side of a split [`Transport`].
pub struct TransportReader {
    inner: FramedRead<ReadHalf<TransportStream>, IrcCodec>,
}

/// The write side of a split [`Transport`].
pub struct TransportWriter {
    inner: FramedWrite<WriteHalf<TransportStream>, IrcCodec>,
}

impl Transport {
    /// Open a plain TCP connection.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect((host, port)).await?;
        debug!(host, port, "connected");
        Ok(Self {
            framed: Framed::new(TransportStream::Tcp(stream), IrcCodec::new()),
        })
    }

    /// Open a TLS connection with certificate and hostname verification.
    pub async fn connect_tls(
        host: &str,
        port: u16,
        options: &TlsOptions,
    ) -> Result<Self, ProtocolError> {
        let config = client_tls_config(options)?;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let tcp = TcpStream::connect((host, port)).await?;
        let stream = connector.connect(server_name, tcp).await?;
        debug!(host, port, "connected with TLS");
        Ok(Self {
            framed: Framed::new(
                TransportStream::ClientTls(Box::new(stream)),
                IrcCodec::new(),
            ),
        })
    }

    /// Read the next message. Returns `Ok(None)` when the connection closed.
    pub async fn read_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        self.framed.next().await.transpose()
    }

    /// Write one message, flushing it to the socket.
    pub async fn write_message(&mut self, message: Message) -> Result<(), ProtocolError> {
        self.framed.send(message).await
    }

    /// Split into independently owned read and write halves.
    ///
    /// Any bytes already read but not yet parsed are carried over into the
    /// read half.
    #[must_use]
    pub fn split(self) -> (TransportReader, TransportWriter) {
        let parts = self.framed.into_parts();
        let (read, write) = tokio::io::split(parts.io);

        let mut reader = FramedRead::new(read, IrcCodec::new());
        reader.read_buffer_mut().extend_from_slice(&parts.read_buf);
        let writer = FramedWrite::new(write, IrcCodec::new());

        (
            TransportReader { inner: reader },
            TransportWriter { inner: writer },
        )
    }
}

impl TransportReader {
    /// Read the next message. Returns `Ok(None)` when the connection closed.
    pub async fn read_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        self.inner.next().await.transpose()
    }
}

impl TransportWriter {
    /// Write one message, flushing it to the socket.
    pub async fn write_message(&mut self, message: Message) -> Result<(), ProtocolError> {
        self.inner.send(message).await
    }
}

/// Whether an I/O error belongs to the ordinary-disconnect family
/// (reset/broken pipe/shutdown). These end a listen loop cleanly; anything
/// else is a real transport fault.
#[must_use]
pub fn is_disconnect_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

fn client_tls_config(options: &TlsOptions) -> Result<ClientConfig, ProtocolError> {
    let mut roots = RootCertStore::empty();

    if let Some(path) = &options.ca_file {
        let pem = std::fs::read(path)?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert?;
            roots.add(cert).map_err(io::Error::other)?;
        }
    } else {
        let loaded = rustls_native_certs::load_native_certs();
        for cert in loaded.certs {
            // Platform stores can contain certificates rustls rejects; those
            // are skipped rather than failing the whole store.
            let _ = roots.add(cert);
        }
    }

    if roots.is_empty() {
        return Err(ProtocolError::Io(io::Error::other(
            "no usable trusted CA certificates",
        )));
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}
