use crate::error::{RelayError, Result};
use crate::queue::{QueueStore, QueuedMessage};
use crate::security::TlsConfig;
use crate::smtp::commands::SmtpCommand;
use crate::smtp::stream::SmtpStream;
use crate::smtp::transparency::{unstuff_line, END_OF_DATA};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Where the current transaction stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    None,
    SenderSet,
    RecipientSet,
}

/// Per-connection transaction state.
///
/// Only `secure` survives a reset; everything else belongs to the current
/// transaction and is cleared after DATA completes and on STARTTLS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub body_lines: Vec<Vec<u8>>,
    pub phase: Phase,
    pub secure: bool,
}

impl SessionState {
    pub fn reset(&mut self) {
        *self = Self {
            secure: self.secure,
            ..Self::default()
        };
    }

    /// Collected body as stored content: lines joined with CRLF, CRLF-terminated
    fn content(&self) -> Vec<u8> {
        let mut content = self.body_lines.join(&b"\r\n"[..]);
        content.extend_from_slice(b"\r\n");
        content
    }
}

/// What the connection loop does once the reply has been written
#[derive(Debug, PartialEq)]
enum Next {
    Continue,
    ReadData,
    UpgradeTls,
    Close,
}

#[derive(Debug)]
struct Response {
    reply: String,
    next: Next,
}

impl Response {
    fn reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            next: Next::Continue,
        }
    }

    fn then(reply: impl Into<String>, next: Next) -> Self {
        Self {
            reply: reply.into(),
            next,
        }
    }
}

enum SessionResult {
    /// STARTTLS completed, resume reading on the upgraded stream
    Continue,
    Quit,
}

const BAD_SEQUENCE: &str = "503 Bad sequence of commands\r\n";

/// Inbound SMTP dialogue for one connection
pub struct SmtpSession {
    state: SessionState,
    hostname: String,
    queue: Arc<dyn QueueStore>,
    tls: Arc<TlsConfig>,
}

impl SmtpSession {
    pub fn new(hostname: String, queue: Arc<dyn QueueStore>, tls: Arc<TlsConfig>) -> Self {
        Self {
            state: SessionState::default(),
            hostname,
            queue,
            tls,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub async fn handle(mut self, stream: TcpStream) -> Result<()> {
        if let Ok(peer) = stream.peer_addr() {
            debug!("Session started for {}", peer);
        }

        let mut smtp_stream = SmtpStream::Plain(stream);
        send(
            &mut smtp_stream,
            &format!("220 {} ESMTP ready\r\n", self.hostname),
        )
        .await?;

        // STARTTLS restarts command processing on the new stream
        loop {
            match self.process_commands(&mut smtp_stream).await? {
                SessionResult::Continue => continue,
                SessionResult::Quit => break,
            }
        }

        let _ = smtp_stream.shutdown().await;
        Ok(())
    }

    async fn process_commands(&mut self, stream: &mut SmtpStream) -> Result<SessionResult> {
        // Dropped before a TLS upgrade, which also discards anything the
        // client pipelined after STARTTLS on the plaintext channel
        let mut buf_reader = BufReader::new(&mut *stream);

        loop {
            let line = match read_line(&mut buf_reader).await? {
                Some(line) => line,
                None => {
                    debug!("Client disconnected");
                    return Ok(SessionResult::Quit);
                }
            };
            debug!("Received: {}", line);

            let response = self.handle_command(SmtpCommand::parse(&line));
            send(&mut buf_reader, &response.reply).await?;

            match response.next {
                Next::Continue => {}
                Next::Close => return Ok(SessionResult::Quit),
                Next::ReadData => {
                    self.receive_data(&mut buf_reader).await?;
                    let reply = self.finish_data().await;
                    send(&mut buf_reader, &reply).await?;
                }
                Next::UpgradeTls => {
                    drop(buf_reader);

                    info!("STARTTLS: performing handshake");
                    stream
                        .accept_tls(&self.tls.acceptor())
                        .await
                        .map_err(|e| RelayError::Tls(format!("TLS handshake failed: {}", e)))?;

                    self.complete_upgrade();
                    info!("STARTTLS upgrade completed");
                    return Ok(SessionResult::Continue);
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: SmtpCommand) -> Response {
        match cmd {
            SmtpCommand::Helo(domain) => {
                info!("HELO from {}", domain);
                self.state.reset();
                Response::reply("250 OK\r\n")
            }
            SmtpCommand::Ehlo(domain) => {
                info!("EHLO from {}", domain);
                if self.state.secure {
                    Response::reply(format!("250 {}\r\n", self.hostname))
                } else {
                    Response::reply(format!(
                        "250-{}\r\n250-STARTTLS\r\n250 HELP\r\n",
                        self.hostname
                    ))
                }
            }
            SmtpCommand::StartTls => {
                if self.state.secure {
                    warn!("STARTTLS refused: already secure");
                    Response::reply("503 Already under TLS\r\n")
                } else {
                    Response::then("220 Ready to start TLS\r\n", Next::UpgradeTls)
                }
            }
            SmtpCommand::MailFrom(from) => {
                info!("MAIL FROM: {}", from);
                self.state.reset();
                self.state.sender = Some(from);
                self.state.phase = Phase::SenderSet;
                Response::reply("250 OK\r\n")
            }
            SmtpCommand::MalformedMail => Response::reply("501 Syntax: MAIL FROM:<address>\r\n"),
            SmtpCommand::RcptTo(_) | SmtpCommand::MalformedRcpt
                if self.state.phase == Phase::None =>
            {
                Response::reply(BAD_SEQUENCE)
            }
            SmtpCommand::RcptTo(to) => {
                info!("RCPT TO: {}", to);
                self.state.recipients.push(to);
                self.state.phase = Phase::RecipientSet;
                Response::reply("250 OK\r\n")
            }
            SmtpCommand::MalformedRcpt => Response::reply("501 Syntax: RCPT TO:<address>\r\n"),
            SmtpCommand::Data => {
                if self.state.phase != Phase::RecipientSet {
                    return Response::reply(BAD_SEQUENCE);
                }
                debug!("DATA command received");
                Response::then(
                    "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
                    Next::ReadData,
                )
            }
            SmtpCommand::Quit => {
                info!("QUIT command");
                Response::then(format!("221 {} closing connection\r\n", self.hostname), Next::Close)
            }
            SmtpCommand::Unknown(line) => {
                debug!("Unrecognised command: {}", line);
                Response::reply("500 Unrecognised command\r\n")
            }
        }
    }

    /// Post-handshake state: nothing seen on the plaintext channel is kept
    fn complete_upgrade(&mut self) {
        self.state.secure = true;
        self.state.reset();
    }

    /// Collect body lines up to the lone `.` line
    async fn receive_data<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let line = read_raw_line(reader).await?.ok_or_else(|| {
                RelayError::SmtpProtocol("Connection closed during DATA".to_string())
            })?;

            if line == END_OF_DATA {
                debug!("End of DATA, {} line(s)", self.state.body_lines.len());
                return Ok(());
            }

            self.state.body_lines.push(unstuff_line(&line).to_vec());
        }
    }

    /// Hand the finished transaction to the queue and reset
    async fn finish_data(&mut self) -> String {
        let message = QueuedMessage::new(
            self.state.sender.clone().unwrap_or_default(),
            self.state.recipients.clone(),
            self.state.content(),
        );

        let reply = match self.queue.create(message).await {
            Ok(stored) => {
                info!("Accepted message {}", stored.id);
                format!("250 OK: queued as {}\r\n", stored.id)
            }
            Err(e) => {
                error!("Failed to enqueue message: {}", e);
                "451 Requested action aborted: local error in processing\r\n".to_string()
            }
        };

        self.state.reset();
        reply
    }
}

/// Next raw line without its terminator, `None` at end of stream
async fn read_raw_line<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }

    if buf.ends_with(b"\n") {
        buf.pop();
    }
    if buf.ends_with(b"\r") {
        buf.pop();
    }
    Ok(Some(buf))
}

/// Next command line. Commands are ASCII, so stray bytes are replaced.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    Ok(read_raw_line(reader)
        .await?
        .map(|line| String::from_utf8_lossy(&line).into_owned()))
}

async fn send<W>(writer: &mut W, reply: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(reply.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
