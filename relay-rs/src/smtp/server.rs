use crate::error::Result;
use crate::queue::QueueStore;
use crate::security::TlsConfig;
use crate::smtp::session::SmtpSession;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Inbound listener; one task per accepted connection
pub struct SmtpServer {
    listener: TcpListener,
    hostname: String,
    queue: Arc<dyn QueueStore>,
    tls: Arc<TlsConfig>,
}

impl SmtpServer {
    pub async fn bind(
        listen_addr: &str,
        hostname: String,
        queue: Arc<dyn QueueStore>,
        tls: Arc<TlsConfig>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("SMTP server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            hostname,
            queue,
            tls,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    info!("New SMTP connection from {}", addr);

                    let session =
                        SmtpSession::new(self.hostname.clone(), self.queue.clone(), self.tls.clone());

                    tokio::spawn(async move {
                        if let Err(e) = session.handle(socket).await {
                            error!("Session error ({}): {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
