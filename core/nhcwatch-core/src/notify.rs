//! Notification rendering and dispatch.
//!
//! Every notice becomes one [`Notification`] payload, and a [`Transport`]
//! delivers it. Transport failures are logged by the caller and never end
//! the run: by the time we notify, the result store is already committed.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};

use crate::config::{NotifyConfig, TransportKind};
use crate::engine::{Report, ReportKind};
use crate::error::{NhcError, NotifyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// New or changed health-check errors.
    Alert,
    /// Errors from the previous run are gone.
    Cleared,
    /// Node brought back online.
    Online,
    /// Node left offline for a reason we do not own.
    ForeignReason,
    /// Our note is cleared but a pre-existing lock keeps the node offline.
    KeptLocked,
}

impl NoticeKind {
    fn icon(self) -> &'static str {
        match self {
            NoticeKind::Alert => ":rotating_light:",
            NoticeKind::Cleared => ":white_check_mark:",
            NoticeKind::Online => ":large_green_circle:",
            NoticeKind::ForeignReason => ":information_source:",
            NoticeKind::KeptLocked => ":lock:",
        }
    }
}

impl From<ReportKind> for NoticeKind {
    fn from(kind: ReportKind) -> Self {
        match kind {
            ReportKind::Alert => NoticeKind::Alert,
            ReportKind::Cleared => NoticeKind::Cleared,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub subject: String,
    pub host: String,
    pub body: String,
}

impl Notice {
    pub fn from_report(report: &Report, subject: &str, host: &str) -> Self {
        Self {
            kind: report.kind.into(),
            subject: subject.to_string(),
            host: host.to_string(),
            body: report.text.clone(),
        }
    }

    pub fn title(&self) -> String {
        match self.kind {
            NoticeKind::Alert => format!("{} errors on {}", self.subject, self.host),
            NoticeKind::Cleared => format!("{} errors cleared on {}", self.subject, self.host),
            NoticeKind::Online => format!("{} brought back online by {}", self.host, self.subject),
            NoticeKind::ForeignReason => {
                format!("{} offline for a non-{} reason", self.host, self.subject)
            }
            NoticeKind::KeptLocked => format!("{} kept offline: pre-existing lock", self.host),
        }
    }

    pub fn render(&self) -> String {
        let lead = match self.kind {
            NoticeKind::Alert => "The following errors were detected:",
            NoticeKind::Cleared => "The following errors have cleared:",
            NoticeKind::Online => "Previous offline note:",
            NoticeKind::ForeignReason => "Node remains offline with note:",
            NoticeKind::KeptLocked => "Node remains offline for pre-existing lock:",
        };
        let body = self.body.trim_end();
        if body.is_empty() {
            format!("{}\n", self.title())
        } else {
            format!("{}\n\n{}\n{}\n", self.title(), lead, body)
        }
    }
}

/// Single payload shape handed to every transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub username: String,
    #[serde(rename = "icon_emoji")]
    pub icon: String,
}

pub trait Transport {
    fn name(&self) -> &'static str;

    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Prints notifications on stdout (cron mails whatever we print).
#[derive(Debug, Clone, Default)]
pub struct StdoutTransport;

impl Transport for StdoutTransport {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(notification.text.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

/// `mail -s <title> <recipient>` with the text on stdin.
#[derive(Debug, Clone)]
pub struct MailTransport {
    pub program: String,
    /// Recipient when the notification names no channel.
    pub default_recipient: String,
}

impl Transport for MailTransport {
    fn name(&self) -> &'static str {
        "mail"
    }

    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let recipient = notification
            .channel
            .as_deref()
            .unwrap_or(&self.default_recipient);
        let args = vec![
            "-s".to_string(),
            notification.title.clone(),
            recipient.to_string(),
        ];
        pipe_to(&self.program, &args, notification.text.as_bytes())
    }
}

/// External sender (chat webhook helper) fed the JSON payload on stdin.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    pub program: String,
    pub args: Vec<String>,
}

impl Transport for CommandTransport {
    fn name(&self) -> &'static str {
        "command"
    }

    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_vec(notification)?;
        pipe_to(&self.program, &self.args, &payload)
    }
}

fn pipe_to(program: &str, args: &[String], input: &[u8]) -> Result<(), NotifyError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|source| NotifyError::Launch {
            program: program.to_string(),
            source,
        })?;

    // The child is reaped even when it stops reading early.
    let written = child
        .stdin
        .take()
        .map(|mut stdin| stdin.write_all(input))
        .unwrap_or(Ok(()));
    let status = child.wait()?;
    written?;
    if !status.success() {
        return Err(NotifyError::SenderFailed {
            program: program.to_string(),
            status: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

pub struct Notifier {
    transport: Box<dyn Transport>,
    destination: Option<String>,
}

impl Notifier {
    pub fn new(transport: Box<dyn Transport>, destination: Option<String>) -> Self {
        Self {
            transport,
            destination: destination.filter(|dest| !dest.trim().is_empty()),
        }
    }

    /// Picks the transport named by `config`. The command transport needs a
    /// sender program.
    pub fn from_config(config: &NotifyConfig) -> crate::error::Result<Self> {
        let transport: Box<dyn Transport> = match config.transport {
            TransportKind::Stdout => Box::new(StdoutTransport),
            TransportKind::Mail => Box::new(MailTransport {
                program: config.mail_program.clone(),
                default_recipient: config
                    .default_recipient
                    .clone()
                    .unwrap_or_else(|| "root".to_string()),
            }),
            TransportKind::Command => {
                let program = config
                    .command
                    .clone()
                    .filter(|program| !program.trim().is_empty())
                    .ok_or_else(|| {
                        NhcError::InvalidArgument(
                            "command transport selected but no notify command configured"
                                .to_string(),
                        )
                    })?;
                Box::new(CommandTransport {
                    program,
                    args: config.command_args.clone(),
                })
            }
        };
        Ok(Self::new(transport, config.destination.clone()))
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Builds the payload. A configured destination is used as the channel;
    /// otherwise the default recipient gets a host-scoped identity.
    pub fn build(&self, notice: &Notice) -> Notification {
        let (username, icon) = match &self.destination {
            Some(_) => (notice.subject.clone(), notice.kind.icon().to_string()),
            None => (
                format!("{}@{}", notice.subject, notice.host),
                ":computer:".to_string(),
            ),
        };
        Notification {
            title: notice.title(),
            text: notice.render(),
            channel: self.destination.clone(),
            username,
            icon,
        }
    }

    pub fn notify(&self, notice: &Notice) -> Result<(), NotifyError> {
        let notification = self.build(notice);
        tracing::info!(
            transport = self.transport.name(),
            kind = ?notice.kind,
            host = %notice.host,
            channel = ?notification.channel,
            "Sending notification"
        );
        self.transport.send(&notification)
    }

    /// Sends and logs failures instead of returning them.
    pub fn notify_logged(&self, notice: &Notice) {
        if let Err(err) = self.notify(notice) {
            tracing::warn!(error = %err, kind = ?notice.kind, "Notification failed");
        }
    }
}

/// Short host name (up to the first dot), or `localhost` if unavailable.
pub fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..len]);
    match name.split('.').next() {
        Some(short) if !short.is_empty() => short.to_string(),
        _ => "localhost".to_string(),
    }
}
