//! Connection stream that can switch from plaintext to TLS mid-dialogue
//!
//! Shared by the inbound session and the outbound delivery client.

use rustls::ServerName;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

pub enum SmtpStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    /// Placeholder while the handshake owns the socket. Also left behind
    /// when a handshake fails; all I/O on it errors.
    Upgrading,
}

fn upgrading_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        "stream unavailable during TLS upgrade",
    )
}

impl SmtpStream {
    fn take_plain(&mut self) -> io::Result<TcpStream> {
        match std::mem::replace(self, SmtpStream::Upgrading) {
            SmtpStream::Plain(tcp) => Ok(tcp),
            other => {
                *self = other;
                Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "stream is not a plaintext connection",
                ))
            }
        }
    }

    /// Server side of STARTTLS
    pub async fn accept_tls(&mut self, acceptor: &TlsAcceptor) -> io::Result<()> {
        let tcp = self.take_plain()?;
        let tls = acceptor.accept(tcp).await?;
        *self = SmtpStream::Tls(Box::new(tls.into()));
        Ok(())
    }

    /// Client side of STARTTLS
    pub async fn connect_tls(
        &mut self,
        connector: &TlsConnector,
        server_name: ServerName,
    ) -> io::Result<()> {
        let tcp = self.take_plain()?;
        let tls = connector.connect(server_name, tcp).await?;
        *self = SmtpStream::Tls(Box::new(tls.into()));
        Ok(())
    }
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            SmtpStream::Upgrading => Poll::Ready(Err(upgrading_error())),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            SmtpStream::Upgrading => Poll::Ready(Err(upgrading_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            SmtpStream::Upgrading => Poll::Ready(Err(upgrading_error())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            SmtpStream::Upgrading => Poll::Ready(Err(upgrading_error())),
        }
    }
}
