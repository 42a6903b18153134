//! Outbound SMTP delivery
//!
//! One call to [`Deliver::deliver`] is one complete attempt: MX lookup,
//! connect, greeting, EHLO, opportunistic STARTTLS, envelope, DATA, QUIT.
//! No state is kept between attempts and nothing is retried here; the
//! scheduler owns retry policy.

use crate::error::DeliveryError;
use crate::queue::QueuedMessage;
use crate::smtp::reply::{read_reply, Reply};
use crate::smtp::stream::SmtpStream;
use crate::smtp::transparency::dot_stuff;
use crate::utils::MxResolver;
use async_trait::async_trait;
use rustls::ServerName;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// A single delivery attempt for one queued message
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), DeliveryError>;
}

/// SMTP client relaying queued messages to the recipient's mail exchanger
///
/// # Examples
/// ```no_run
/// use relay_rs::security::TlsConfig;
/// use relay_rs::smtp::DeliveryClient;
/// use relay_rs::utils::DnsMxResolver;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> relay_rs::Result<()> {
/// let tls = TlsConfig::self_signed("relay.example.com")?;
/// let client = DeliveryClient::new(
///     "relay.example.com".to_string(),
///     25,
///     Duration::from_secs(10),
///     Arc::new(DnsMxResolver::new()),
///     tls.connector(),
/// );
/// # Ok(())
/// # }
/// ```
pub struct DeliveryClient {
    helo_name: String,
    port: u16,
    connect_timeout: Duration,
    resolver: Arc<dyn MxResolver>,
    connector: TlsConnector,
}

impl DeliveryClient {
    pub fn new(
        helo_name: String,
        port: u16,
        connect_timeout: Duration,
        resolver: Arc<dyn MxResolver>,
        connector: TlsConnector,
    ) -> Self {
        Self {
            helo_name,
            port,
            connect_timeout,
            resolver,
            connector,
        }
    }

    async fn resolve(&self, message: &QueuedMessage) -> Result<String, DeliveryError> {
        let domain = message
            .routing_domain()
            .ok_or_else(|| DeliveryError::Resolution {
                domain: message.to.first().cloned().unwrap_or_default(),
                reason: "recipient has no domain".to_string(),
            })?;

        self.resolver
            .lookup_mx(domain)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DeliveryError::Resolution {
                domain: domain.to_string(),
                reason: "no MX found".to_string(),
            })
    }

    async fn connect(&self, host: &str) -> Result<Connection, DeliveryError> {
        debug!("Connecting to {}:{}", host, self.port);

        let tcp = match timeout(self.connect_timeout, TcpStream::connect((host, self.port))).await
        {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(e)) => {
                return Err(DeliveryError::Connect {
                    host: host.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DeliveryError::Connect {
                    host: host.to_string(),
                    reason: format!("timed out after {:?}", self.connect_timeout),
                })
            }
        };

        Ok(Connection {
            reader: BufReader::new(SmtpStream::Plain(tcp)),
        })
    }

    /// Everything between connect and QUIT
    async fn transact(
        &self,
        conn: &mut Connection,
        host: &str,
        message: &QueuedMessage,
    ) -> Result<(), DeliveryError> {
        conn.expect_code("greeting", 220).await?;

        let capabilities = self.ehlo(conn).await?;
        if capabilities.advertises("STARTTLS") {
            conn.command("STARTTLS").await?;
            conn.expect_code("STARTTLS", 220).await?;

            let server_name = ServerName::try_from(host)
                .map_err(|e| DeliveryError::Tls(format!("invalid server name {}: {}", host, e)))?;
            conn.upgrade(&self.connector, server_name).await?;
            debug!("STARTTLS negotiated with {}", host);

            self.ehlo(conn).await?;
        } else {
            warn!("{} does not offer STARTTLS, sending in plaintext", host);
        }

        conn.command(&format!("MAIL FROM:<{}>", message.from)).await?;
        conn.expect_code("MAIL FROM", 250).await?;

        for rcpt in &message.to {
            conn.command(&format!("RCPT TO:<{}>", rcpt)).await?;
            conn.expect_code("RCPT TO", 250).await?;
        }

        conn.command("DATA").await?;
        conn.expect_code("DATA", 354).await?;

        conn.write_raw(&dot_stuff(&message.content)).await?;
        conn.expect_code("end of data", 250).await?;

        Ok(())
    }

    async fn ehlo(&self, conn: &mut Connection) -> Result<Reply, DeliveryError> {
        conn.command(&format!("EHLO {}", self.helo_name)).await?;
        let reply = read_reply(&mut conn.reader, "EHLO").await?;
        if !reply.is_positive() {
            return Err(DeliveryError::Protocol {
                stage: "EHLO",
                reply: reply.to_string(),
            });
        }
        Ok(reply)
    }
}

#[async_trait]
impl Deliver for DeliveryClient {
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), DeliveryError> {
        let host = self.resolve(message).await?;
        info!("Delivering {} via {}", message.id, host);

        let mut conn = self.connect(&host).await?;
        let result = self.transact(&mut conn, &host, message).await;

        if result.is_ok() {
            // Best effort, the message is already accepted
            if conn.command("QUIT").await.is_ok() {
                let _ = read_reply(&mut conn.reader, "QUIT").await;
            }
        }
        conn.close().await;

        result
    }
}

/// An open outbound dialogue
struct Connection {
    reader: BufReader<SmtpStream>,
}

impl Connection {
    async fn command(&mut self, line: &str) -> Result<(), DeliveryError> {
        debug!("> {}", line);
        self.write_raw(format!("{}\r\n", line).as_bytes()).await
    }

    async fn write_raw(&mut self, data: &[u8]) -> Result<(), DeliveryError> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn expect_code(&mut self, stage: &'static str, code: u16) -> Result<Reply, DeliveryError> {
        let reply = read_reply(&mut self.reader, stage).await?;
        if reply.code != code {
            return Err(DeliveryError::Protocol {
                stage,
                reply: reply.to_string(),
            });
        }
        Ok(reply)
    }

    /// Client-side STARTTLS. Bytes buffered from the plaintext phase are dropped.
    async fn upgrade(
        &mut self,
        connector: &TlsConnector,
        server_name: ServerName,
    ) -> Result<(), DeliveryError> {
        let reader = std::mem::replace(&mut self.reader, BufReader::new(SmtpStream::Upgrading));
        let mut stream = reader.into_inner();

        stream
            .connect_tls(connector, server_name)
            .await
            .map_err(|e| DeliveryError::Tls(e.to_string()))?;

        self.reader = BufReader::new(stream);
        Ok(())
    }

    async fn close(mut self) {
        let _ = self.reader.get_mut().shutdown().await;
    }
}
