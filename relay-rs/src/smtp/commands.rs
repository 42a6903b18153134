use crate::utils::strip_address;

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    /// MAIL without the `FROM:` marker
    MalformedMail,
    /// RCPT without the `TO:` marker
    MalformedRcpt,
    Data,
    StartTls,
    Quit,
    Unknown(String),
}

impl SmtpCommand {
    /// Parse one command line (terminator already removed).
    ///
    /// Verbs are case-insensitive. Anything unrecognised, including an
    /// empty line, becomes [`SmtpCommand::Unknown`].
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (verb, args) = match line.split_once(' ') {
            Some((verb, args)) => (verb, args.trim()),
            None => (line, ""),
        };

        match verb.to_uppercase().as_str() {
            "HELO" => SmtpCommand::Helo(args.to_string()),
            "EHLO" => SmtpCommand::Ehlo(args.to_string()),
            "MAIL" => match strip_marker(args, "FROM:") {
                Some(address) => SmtpCommand::MailFrom(strip_address(address)),
                None => SmtpCommand::MalformedMail,
            },
            "RCPT" => match strip_marker(args, "TO:") {
                Some(address) => SmtpCommand::RcptTo(strip_address(address)),
                None => SmtpCommand::MalformedRcpt,
            },
            "DATA" => SmtpCommand::Data,
            "STARTTLS" => SmtpCommand::StartTls,
            "QUIT" => SmtpCommand::Quit,
            _ => SmtpCommand::Unknown(line.to_string()),
        }
    }
}

/// `FROM:<a@b>` -> `<a@b>`, marker matched case-insensitively
fn strip_marker<'a>(args: &'a str, marker: &str) -> Option<&'a str> {
    let prefix = args.get(..marker.len())?;
    if prefix.eq_ignore_ascii_case(marker) {
        Some(&args[marker.len()..])
    } else {
        None
    }
}
