//! Low-level SMTP probe engine
//!
//! Performs HELO/MAIL FROM/RCPT TO conversations against MX hosts and
//! reports whether the recipient was accepted, how long the server took,
//! and a structured error for anything else. Known strict enterprise
//! gateways get slowed-down command pacing and a longer conversation
//! deadline so tarpits do not time us out.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, trace};
use url::Url;

use crate::proxy::ProxyPool;

/// Base per-conversation deadline
const CONVERSATION_DEADLINE: Duration = Duration::from_secs(12);
/// Extended deadline used when command pacing is active
const STRICT_CONVERSATION_DEADLINE: Duration = Duration::from_secs(16);
/// Deadline for the short VRFY conversation
const VRFY_DEADLINE: Duration = Duration::from_secs(10);
/// TCP dial timeout
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause inserted between commands for strict gateways
const COMMAND_PACE: Duration = Duration::from_secs(1);

/// MX hostname fragments of gateways known to tarpit fast senders
const STRICT_GATEWAYS: &[&str] = &[
    "mimecast.com",
    "pphosted.com",
    "barracudanetworks.com",
    "messagelabs.com",
    "iphmx.com",
    "trendmicro.com",
    "trendmicro.eu",
    "sophos.com",
    "mailcontrol.com",
    "mxlogic.net",
    "fireeye.com",
    "mx.cloudflare.net",
];

/// Reply text fragments that mean the server is complaining about us,
/// not about the mailbox. Checked before any no-such-user signal and
/// always winning.
const SHIELD_KEYWORDS: &[&str] = &[
    "spam",
    "block",
    "banned",
    "blacklisted",
    "ip",
    "policy",
    "relay",
    "access denied",
    "reputation",
    "spf",
    "dmarc",
    "dkim",
    "quota",
    "rate limit",
    "temporarily",
    "reverse dns",
    "ptr",
    "helo",
    "spamhaus",
    "sorbs",
    "connection refused",
    "timeout",
    "greylist",
    "sender",
    "not permitted",
];

/// Reply text fragments that definitively mean the mailbox does not exist
const NO_SUCH_USER_KEYWORDS: &[&str] = &[
    "does not exist",
    "user unknown",
    "no such user",
    "recipient rejected",
    "invalid mailbox",
    "mailbox unavailable",
    "unrouteable address",
    "unknown user",
    "address rejected",
];

/// Enhanced status codes that definitively mean the mailbox does not exist
const NO_SUCH_USER_ENHANCED: &[&str] = &["5.1.0", "5.1.1", "5.4.1"];

/// A failed SMTP probe, structured so classification downstream is reliable
#[derive(Debug, Clone, Error)]
pub enum SmtpError {
    #[error("connection failed: {0}")]
    Connect(String),
    /// The server replied with a non-success code during the conversation
    #[error("smtp {code}: {message}")]
    Reject { code: u16, message: String },
    #[error("conversation timed out")]
    Timeout,
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Outcome of a single RCPT probe
#[derive(Debug)]
pub struct ProbeOutcome {
    pub accepted: bool,
    pub elapsed: Duration,
    pub error: Option<SmtpError>,
}

impl ProbeOutcome {
    fn failed(error: SmtpError) -> Self {
        Self {
            accepted: false,
            elapsed: Duration::ZERO,
            error: Some(error),
        }
    }
}

trait SmtpStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SmtpStream for T {}

type BoxedStream = Box<dyn SmtpStream>;

/// SMTP conversation engine with a global concurrency cap
pub struct SmtpProber {
    pool: Arc<ProxyPool>,
    /// Caps outbound port-25 conversations regardless of proxy mode, to
    /// preserve egress-IP reputation
    conversations: Arc<Semaphore>,
    helo_host: String,
}

impl SmtpProber {
    pub fn new(pool: Arc<ProxyPool>, helo_host: impl Into<String>, max_conversations: usize) -> Self {
        Self {
            pool,
            conversations: Arc::new(Semaphore::new(max_conversations)),
            helo_host: helo_host.into(),
        }
    }

    /// Probe whether the MX accepts mail for `target`.
    ///
    /// Latency is measured from just after the TCP connect to the RCPT
    /// reply, so ghost/target comparisons see the same fixed costs.
    pub async fn probe_rcpt(
        &self,
        mx_host: &str,
        target: &str,
        pinned: Option<&Url>,
        deadline: Instant,
    ) -> ProbeOutcome {
        let Some(_permit) = self.acquire_conversation(deadline).await else {
            return ProbeOutcome::failed(SmtpError::Timeout);
        };
        self.converse(mx_host, target, pinned, deadline).await
    }

    /// Probe the recipient with the VRFY command. Many servers disable
    /// VRFY; a 250/251 reply is a definitive positive.
    pub async fn probe_vrfy(
        &self,
        mx_host: &str,
        target: &str,
        pinned: Option<&Url>,
        deadline: Instant,
    ) -> bool {
        let Some(_permit) = self.acquire_conversation(deadline).await else {
            return false;
        };
        let (stream, _slot) = match self.dial(mx_host, pinned, deadline).await {
            Ok(conn) => conn,
            Err(e) => {
                debug!("VRFY dial to {mx_host} failed: {e}");
                return false;
            }
        };
        let mut conn = BufReader::new(stream);
        let conv_deadline = (Instant::now() + VRFY_DEADLINE).min(deadline);

        let reply: Result<u16, SmtpError> = async {
            expect_reply(&mut conn, conv_deadline, 220).await?;
            send_command(&mut conn, &format!("HELO {}", self.helo_host), conv_deadline).await?;
            expect_reply(&mut conn, conv_deadline, 250).await?;
            send_command(&mut conn, &format!("VRFY {target}"), conv_deadline).await?;
            // the reply code itself decides the outcome here
            let (code, _) = read_reply(&mut conn, conv_deadline).await?;
            Ok(code)
        }
        .await;

        matches!(reply, Ok(250) | Ok(251))
    }

    /// Whether the domain accepts mail to its postmaster address.
    ///
    /// Fails open: only a definitive no-such-user reply reports the
    /// postmaster as broken; timeouts and rate limits presume it works.
    pub async fn probe_postmaster(
        &self,
        mx_host: &str,
        domain: &str,
        pinned: Option<&Url>,
        deadline: Instant,
    ) -> bool {
        let outcome = self
            .probe_rcpt(mx_host, &format!("postmaster@{domain}"), pinned, deadline)
            .await;
        if outcome.accepted {
            return true;
        }
        match &outcome.error {
            Some(e) => !is_no_such_user(e),
            None => true,
        }
    }

    async fn acquire_conversation(&self, deadline: Instant) -> Option<OwnedSemaphorePermit> {
        match tokio::time::timeout_at(deadline, self.conversations.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Some(permit),
            _ => {
                debug!("gave up waiting for an SMTP conversation slot");
                None
            }
        }
    }

    async fn converse(
        &self,
        mx_host: &str,
        target: &str,
        pinned: Option<&Url>,
        caller_deadline: Instant,
    ) -> ProbeOutcome {
        let strict = is_strict_gateway(mx_host);
        let (stream, _slot) = match self.dial(mx_host, pinned, caller_deadline).await {
            Ok(conn) => conn,
            Err(e) => return ProbeOutcome::failed(e),
        };
        let mut conn = BufReader::new(stream);

        let started = std::time::Instant::now();
        let budget = if strict {
            STRICT_CONVERSATION_DEADLINE
        } else {
            CONVERSATION_DEADLINE
        };
        let deadline = (Instant::now() + budget).min(caller_deadline);

        let rcpt_reply: Result<(u16, String), SmtpError> = async {
            expect_reply(&mut conn, deadline, 220).await?;

            pace(strict, deadline).await?;
            send_command(&mut conn, &format!("HELO {}", self.helo_host), deadline).await?;
            expect_reply(&mut conn, deadline, 250).await?;

            pace(strict, deadline).await?;
            send_command(&mut conn, "MAIL FROM:<>", deadline).await?;
            expect_reply(&mut conn, deadline, 250).await?;

            pace(strict, deadline).await?;
            send_command(&mut conn, &format!("RCPT TO:<{target}>"), deadline).await?;
            read_reply(&mut conn, deadline).await
        }
        .await;

        let elapsed = started.elapsed();
        match rcpt_reply {
            Ok((code, message)) => {
                let _ = send_command(&mut conn, "QUIT", deadline).await;
                if code == 250 || code == 251 {
                    trace!("{mx_host} accepted <{target}> in {elapsed:?}");
                    ProbeOutcome {
                        accepted: true,
                        elapsed,
                        error: None,
                    }
                } else {
                    ProbeOutcome {
                        accepted: false,
                        elapsed,
                        error: Some(SmtpError::Reject { code, message }),
                    }
                }
            }
            Err(e) => ProbeOutcome {
                accepted: false,
                elapsed,
                error: Some(e),
            },
        }
    }

    async fn dial(
        &self,
        mx_host: &str,
        pinned: Option<&Url>,
        deadline: Instant,
    ) -> Result<(BoxedStream, Option<OwnedSemaphorePermit>), SmtpError> {
        let dial_deadline = (Instant::now() + DIAL_TIMEOUT).min(deadline);

        if self.pool.smtp_proxy_enabled() {
            if let Some(proxy) = pinned {
                // The slot permit travels with the connection: dropping the
                // pair releases the slot exactly once.
                let permit = self
                    .pool
                    .acquire_slot(deadline)
                    .await
                    .ok_or(SmtpError::Timeout)?;
                let stream = dial_via_proxy(proxy, mx_host, 25, dial_deadline).await?;
                return Ok((stream, Some(permit)));
            }
        }

        let stream = tokio::time::timeout_at(dial_deadline, TcpStream::connect((mx_host, 25)))
            .await
            .map_err(|_| SmtpError::Connect(format!("dial to {mx_host}:25 timed out")))?
            .map_err(|e| SmtpError::Connect(e.to_string()))?;
        Ok((Box::new(stream), None))
    }
}

async fn dial_via_proxy(
    proxy: &Url,
    host: &str,
    port: u16,
    deadline: Instant,
) -> Result<BoxedStream, SmtpError> {
    let proxy_host = proxy
        .host_str()
        .ok_or_else(|| SmtpError::Connect("proxy URL has no host".into()))?;
    let proxy_port = proxy.port_or_known_default().unwrap_or(1080);

    match proxy.scheme() {
        "socks5" | "socks5h" => {
            let connect = async {
                let user = proxy.username();
                if user.is_empty() {
                    Socks5Stream::connect((proxy_host, proxy_port), (host, port)).await
                } else {
                    Socks5Stream::connect_with_password(
                        (proxy_host, proxy_port),
                        (host, port),
                        user,
                        proxy.password().unwrap_or(""),
                    )
                    .await
                }
            };
            let stream = tokio::time::timeout_at(deadline, connect)
                .await
                .map_err(|_| SmtpError::Connect("proxy dial timed out".into()))?
                .map_err(|e| SmtpError::Connect(format!("socks5 dial failed: {e}")))?;
            Ok(Box::new(stream))
        }
        "http" => {
            let stream =
                tokio::time::timeout_at(deadline, TcpStream::connect((proxy_host, proxy_port)))
                    .await
                    .map_err(|_| SmtpError::Connect("proxy dial timed out".into()))?
                    .map_err(|e| SmtpError::Connect(e.to_string()))?;
            http_connect(stream, host, port, deadline).await
        }
        other => Err(SmtpError::Connect(format!(
            "unsupported proxy scheme {other:?}"
        ))),
    }
}

/// Establish an HTTP CONNECT tunnel to `host:port` over `stream`.
///
/// The response is read byte-by-byte so no tunnelled bytes past the
/// blank line (the SMTP banner arrives immediately) are consumed.
async fn http_connect(
    mut stream: TcpStream,
    host: &str,
    port: u16,
    deadline: Instant,
) -> Result<BoxedStream, SmtpError> {
    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    tokio::time::timeout_at(deadline, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| SmtpError::Timeout)?
        .map_err(|e| SmtpError::Connect(e.to_string()))?;

    let mut header = Vec::with_capacity(256);
    loop {
        let mut byte = [0u8; 1];
        let n = tokio::time::timeout_at(deadline, stream.read(&mut byte))
            .await
            .map_err(|_| SmtpError::Timeout)?
            .map_err(|e| SmtpError::Connect(e.to_string()))?;
        if n == 0 {
            return Err(SmtpError::Connect("proxy closed during CONNECT".into()));
        }
        header.push(byte[0]);
        if header.ends_with(b"\r\n\r\n") {
            break;
        }
        if header.len() > 8 * 1024 {
            return Err(SmtpError::Connect("oversized CONNECT response".into()));
        }
    }

    let response = String::from_utf8_lossy(&header);
    let status_line = response.lines().next().unwrap_or_default();
    if !status_line.contains(" 200") {
        return Err(SmtpError::Connect(format!(
            "proxy CONNECT refused: {status_line}"
        )));
    }
    Ok(Box::new(stream))
}

/// Insert the strict-gateway pause between commands, aborting promptly
/// when the deadline fires.
async fn pace(strict: bool, deadline: Instant) -> Result<(), SmtpError> {
    if !strict {
        return Ok(());
    }
    tokio::time::timeout_at(deadline, tokio::time::sleep(COMMAND_PACE))
        .await
        .map_err(|_| SmtpError::Timeout)
}

async fn send_command(
    conn: &mut BufReader<BoxedStream>,
    line: &str,
    deadline: Instant,
) -> Result<(), SmtpError> {
    trace!(">>> {line}");
    let write = async {
        conn.write_all(line.as_bytes()).await?;
        conn.write_all(b"\r\n").await?;
        conn.flush().await
    };
    tokio::time::timeout_at(deadline, write)
        .await
        .map_err(|_| SmtpError::Timeout)?
        .map_err(|e| SmtpError::Connect(e.to_string()))
}

/// Read one SMTP reply, consuming `XYZ-` continuation lines until the
/// terminal `XYZ ` line. Returns the code and the joined reply text.
async fn read_reply(
    conn: &mut BufReader<BoxedStream>,
    deadline: Instant,
) -> Result<(u16, String), SmtpError> {
    let mut text = String::new();
    loop {
        let mut line = String::new();
        let n = tokio::time::timeout_at(deadline, conn.read_line(&mut line))
            .await
            .map_err(|_| SmtpError::Timeout)?
            .map_err(|e| SmtpError::Connect(e.to_string()))?;
        if n == 0 {
            return Err(SmtpError::Protocol("connection closed mid-reply".into()));
        }
        let trimmed = line.trim_end();
        trace!("<<< {trimmed}");

        let code: u16 = trimmed
            .get(..3)
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| SmtpError::Protocol(format!("unparsable reply {trimmed:?}")))?;

        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(trimmed.get(4..).unwrap_or_default());

        if trimmed.as_bytes().get(3) == Some(&b'-') {
            continue;
        }
        return Ok((code, text));
    }
}

async fn expect_reply(
    conn: &mut BufReader<BoxedStream>,
    deadline: Instant,
    want: u16,
) -> Result<(), SmtpError> {
    let (code, message) = read_reply(conn, deadline).await?;
    if code == want {
        Ok(())
    } else {
        Err(SmtpError::Reject { code, message })
    }
}

fn is_strict_gateway(mx_host: &str) -> bool {
    let host = mx_host.to_ascii_lowercase();
    STRICT_GATEWAYS.iter().any(|gw| host.contains(gw))
}

/// Whether the error means the mailbox definitively does not exist.
///
/// Shield keywords are checked first and always win: a server that says
/// "blocked" is rejecting us, not the mailbox, whatever code it used.
pub fn is_no_such_user(error: &SmtpError) -> bool {
    let SmtpError::Reject { code, message } = error else {
        return false;
    };
    let text = message.to_ascii_lowercase();

    if SHIELD_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return false;
    }
    if NO_SUCH_USER_ENHANCED.iter().any(|c| text.contains(c)) {
        return true;
    }
    if NO_SUCH_USER_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return true;
    }
    *code == 550 || *code == 551
}

/// Whether the server is asking us to slow down
pub fn is_rate_limit(error: &SmtpError) -> bool {
    let SmtpError::Reject { code, message } = error else {
        return false;
    };
    if matches!(code, 450 | 451 | 452) {
        return true;
    }
    let text = message.to_ascii_lowercase();
    text.contains("too many requests") || text.contains("rate limit")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reject(code: u16, message: &str) -> SmtpError {
        SmtpError::Reject {
            code,
            message: message.to_string(),
        }
    }

    #[test]
    fn hard_bounce_codes_mean_no_such_user() {
        assert!(is_no_such_user(&reject(550, "mailbox not here")));
        assert!(is_no_such_user(&reject(551, "not local")));
        assert!(!is_no_such_user(&reject(450, "come back later")));
    }

    #[test]
    fn enhanced_codes_mean_no_such_user() {
        assert!(is_no_such_user(&reject(554, "5.1.1 the address could not be found")));
        assert!(is_no_such_user(&reject(550, "5.4.1 mailbox does not exist")));
    }

    #[test]
    fn mailbox_keywords_mean_no_such_user() {
        assert!(is_no_such_user(&reject(553, "user unknown")));
        assert!(is_no_such_user(&reject(550, "address rejected")));
        assert!(is_no_such_user(&reject(550, "unrouteable address")));
    }

    #[test]
    fn shield_keywords_win_over_everything() {
        // contains both "user unknown" and a shield keyword: the shield wins
        assert!(!is_no_such_user(&reject(
            550,
            "user unknown; sender address blacklisted by spamhaus"
        )));
        assert!(!is_no_such_user(&reject(550, "rejected due to policy")));
        assert!(!is_no_such_user(&reject(550, "your ip has a poor reputation")));
        assert!(!is_no_such_user(&reject(550, "greylisted, try again")));
    }

    #[test]
    fn non_reject_errors_are_never_no_such_user() {
        assert!(!is_no_such_user(&SmtpError::Timeout));
        assert!(!is_no_such_user(&SmtpError::Connect("refused".into())));
    }

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limit(&reject(451, "try again later")));
        assert!(is_rate_limit(&reject(452, "insufficient storage")));
        assert!(is_rate_limit(&reject(550, "rate limit exceeded")));
        assert!(!is_rate_limit(&reject(550, "user unknown")));
        assert!(!is_rate_limit(&SmtpError::Timeout));
    }

    #[test]
    fn strict_gateways_match_by_substring() {
        assert!(is_strict_gateway("us-smtp-inbound-1.mimecast.com"));
        assert!(is_strict_gateway("mxa-00001.gslb.PPHOSTED.com"));
        assert!(is_strict_gateway("d1.mx.cloudflare.net"));
        assert!(!is_strict_gateway("aspmx.l.google.com"));
        assert!(!is_strict_gateway("mail.protection.outlook.com"));
    }
}
