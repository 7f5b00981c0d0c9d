//! Resource-manager node state reconciliation.
//!
//! Each adapter turns its RM's CLI output into a [`NodeStateRecord`]; the
//! decision itself is RM-independent and lives in [`decide`]. Add new
//! adapters in [`adapter_for`].
//!
//! ## Decision table (mark online)
//!
//! ```text
//! status    note owner   lock   ignore-empty  → decision
//! online    *            *      *             → AlreadyOnline
//! unknown   *            *      *             → Skip(UnknownStatus)
//! offline   foreign      *      *             → Skip(ForeignReason)
//! offline   empty        *      no            → Skip(NoNote)
//! offline   empty        *      yes           → Online
//! offline   own          none   *             → Online
//! offline   own          some   *             → KeepLocked
//! ```
//!
//! When in doubt the node stays offline.

mod gridengine;
mod lsf;
mod pbs;
mod runner;
mod slurm;

pub use gridengine::GridEngineAdapter;
pub use lsf::LsfAdapter;
pub use pbs::PbsAdapter;
pub use runner::{render_command, CommandOutput, CommandRunner, SystemRunner};
pub use slurm::SlurmAdapter;

use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::{RmCommands, RmConfig};
use crate::error::{NhcError, Result};
use crate::notify::{Notice, NoticeKind, Notifier};

/// Marker inside our own note that carries a pre-existing foreign lock reason.
pub const LOCK_MARKER: &str = "Existing Lock MSG:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceManager {
    Pbs,
    Slurm,
    Lsf,
    GridEngine,
}

impl FromStr for ResourceManager {
    type Err = NhcError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pbs" | "torque" | "pbspro" | "openpbs" => Ok(ResourceManager::Pbs),
            "slurm" => Ok(ResourceManager::Slurm),
            "lsf" | "openlava" => Ok(ResourceManager::Lsf),
            "sge" | "ge" | "soge" | "uge" | "oge" | "ogs" => Ok(ResourceManager::GridEngine),
            other => Err(NhcError::UnsupportedResourceManager(other.to_string())),
        }
    }
}

impl fmt::Display for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceManager::Pbs => "pbs",
            ResourceManager::Slurm => "slurm",
            ResourceManager::Lsf => "lsf",
            ResourceManager::GridEngine => "sge",
        };
        f.write_str(name)
    }
}

impl ResourceManager {
    /// Uses the configured identifier, or detects one from `path`.
    pub fn resolve(configured: Option<&str>, path: Option<OsString>) -> Result<Self> {
        match configured.map(str::trim).filter(|value| !value.is_empty()) {
            Some(name) => name.parse(),
            None => Self::detect(path),
        }
    }

    /// First RM whose query command is on `path`.
    pub fn detect(path: Option<OsString>) -> Result<Self> {
        const PROBES: [(&str, ResourceManager); 4] = [
            ("sinfo", ResourceManager::Slurm),
            ("pbsnodes", ResourceManager::Pbs),
            ("bhosts", ResourceManager::Lsf),
            ("qhost", ResourceManager::GridEngine),
        ];

        let dirs: Vec<_> = path
            .map(|path| std::env::split_paths(&path).collect())
            .unwrap_or_default();
        for (binary, manager) in PROBES {
            if dirs.iter().any(|dir| is_executable(&dir.join(binary))) {
                tracing::debug!(rm = %manager, binary, "Detected resource manager");
                return Ok(manager);
            }
        }
        Err(NhcError::ResourceManagerNotFound)
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOwner {
    Empty,
    Own,
    Foreign,
}

/// Node state as reported by the RM. Re-fetched on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStateRecord {
    pub host: String,
    pub status: String,
    pub class: StatusClass,
    pub note_leader: String,
    pub note_body: String,
}

impl NodeStateRecord {
    pub fn new(host: &str, status: &str, class: StatusClass, note: &str) -> Self {
        let (note_leader, note_body) = split_note(note);
        Self {
            host: host.to_string(),
            status: status.to_string(),
            class,
            note_leader,
            note_body,
        }
    }

    pub fn owner(&self, leader: &str) -> NoteOwner {
        if self.note_leader.is_empty() {
            NoteOwner::Empty
        } else if self.note_leader == leader {
            NoteOwner::Own
        } else {
            NoteOwner::Foreign
        }
    }

    /// Full note as the RM stores it.
    pub fn note(&self) -> String {
        if self.note_body.is_empty() {
            self.note_leader.clone()
        } else {
            format!("{} {}", self.note_leader, self.note_body)
        }
    }

    /// Foreign reason embedded after [`LOCK_MARKER`], if any.
    pub fn lock_reason(&self) -> Option<&str> {
        let (_, rest) = self.note_body.split_once(LOCK_MARKER)?;
        Some(rest.trim()).filter(|reason| !reason.is_empty())
    }
}

/// Splits a note into its leader token and the remaining text.
pub fn split_note(note: &str) -> (String, String) {
    let note = note.trim();
    match note.split_once(char::is_whitespace) {
        Some((leader, body)) => (leader.to_string(), body.trim().to_string()),
        None => (note.to_string(), String::new()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoNote,
    ForeignReason,
    UnknownStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    AlreadyOnline,
    Online,
    Skip(SkipReason),
    KeepLocked { reason: String },
    /// The RM needs no manual marking.
    Unmanaged,
}

pub fn decide(
    class: StatusClass,
    owner: NoteOwner,
    lock: Option<&str>,
    ignore_empty_note: bool,
) -> Decision {
    match (class, owner, lock) {
        (StatusClass::Online, _, _) => Decision::AlreadyOnline,
        (StatusClass::Unknown, _, _) => Decision::Skip(SkipReason::UnknownStatus),
        (StatusClass::Offline, NoteOwner::Foreign, _) => Decision::Skip(SkipReason::ForeignReason),
        (StatusClass::Offline, NoteOwner::Empty, _) if !ignore_empty_note => {
            Decision::Skip(SkipReason::NoNote)
        }
        (StatusClass::Offline, NoteOwner::Empty, _) => Decision::Online,
        (StatusClass::Offline, NoteOwner::Own, None) => Decision::Online,
        (StatusClass::Offline, NoteOwner::Own, Some(reason)) => Decision::KeepLocked {
            reason: reason.to_string(),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineAction {
    /// Offline command issued with our note.
    Marked,
    /// Already offline with this exact note.
    AlreadyMarked,
    /// Offline for someone else's reason; left untouched.
    KeepForeign,
    Unmanaged,
}

/// Trait for resource-manager integrations.
///
/// Implementors should keep all output-format parsing inside the adapter
/// and report a non-zero command exit through [`CommandOutput`].
pub trait RmAdapter {
    fn kind(&self) -> ResourceManager;

    /// False for RMs that never need nodes marked by hand.
    fn manages_state(&self) -> bool {
        true
    }

    fn query(&self, host: &str) -> Result<NodeStateRecord>;

    /// Brings `host` online and clears its note.
    fn online(&self, host: &str) -> Result<CommandOutput>;

    /// Takes `host` offline with `note` stored verbatim.
    fn offline(&self, host: &str, note: &str) -> Result<CommandOutput>;
}

pub fn adapter_for(
    kind: ResourceManager,
    commands: &RmCommands,
    runner: Box<dyn CommandRunner>,
) -> Box<dyn RmAdapter> {
    match kind {
        ResourceManager::Pbs => Box::new(PbsAdapter::new(commands.pbsnodes.clone(), runner)),
        ResourceManager::Slurm => Box::new(SlurmAdapter::new(
            commands.sinfo.clone(),
            commands.scontrol.clone(),
            runner,
        )),
        ResourceManager::Lsf => Box::new(LsfAdapter::new(
            commands.bhosts.clone(),
            commands.badmin.clone(),
            runner,
        )),
        ResourceManager::GridEngine => Box::new(GridEngineAdapter),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub host: String,
    pub record: Option<NodeStateRecord>,
    pub decision: Decision,
    /// Exit status of the online/offline command, if one was issued.
    pub command_status: Option<i32>,
}

impl Reconciliation {
    pub fn exit_code(&self) -> i32 {
        self.command_status.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineOutcome {
    pub host: String,
    pub record: Option<NodeStateRecord>,
    pub action: OfflineAction,
    pub command_status: Option<i32>,
}

impl OfflineOutcome {
    pub fn exit_code(&self) -> i32 {
        self.command_status.unwrap_or(0)
    }
}

pub struct Reconciler {
    adapter: Box<dyn RmAdapter>,
    leader: String,
    ignore_empty_note: bool,
    notifier: Option<Notifier>,
    notify_foreign: bool,
}

impl Reconciler {
    pub fn new(adapter: Box<dyn RmAdapter>, config: &RmConfig) -> Self {
        Self {
            adapter,
            leader: config.leader.clone(),
            ignore_empty_note: config.ignore_empty_note,
            notifier: None,
            notify_foreign: false,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier, notify_foreign: bool) -> Self {
        self.notifier = Some(notifier);
        self.notify_foreign = notify_foreign;
        self
    }

    pub fn kind(&self) -> ResourceManager {
        self.adapter.kind()
    }

    /// Query, decide and (when owned) bring `host` back online.
    pub fn mark_online(&self, host: &str) -> Result<Reconciliation> {
        if !self.adapter.manages_state() {
            tracing::info!(rm = %self.kind(), host, "No manual onlining needed");
            return Ok(Reconciliation {
                host: host.to_string(),
                record: None,
                decision: Decision::Unmanaged,
                command_status: None,
            });
        }

        let record = self.adapter.query(host)?;
        let owner = record.owner(&self.leader);
        let decision = decide(
            record.class,
            owner,
            record.lock_reason(),
            self.ignore_empty_note,
        );

        let command_status = match &decision {
            Decision::AlreadyOnline => {
                tracing::info!(host, status = %record.status, "Node already online");
                None
            }
            Decision::Skip(SkipReason::NoNote) => {
                tracing::info!(host, status = %record.status, "Not onlining: no note set");
                None
            }
            Decision::Skip(SkipReason::ForeignReason) => {
                tracing::info!(
                    host,
                    status = %record.status,
                    note = %record.note(),
                    "Not onlining: offline for a non-owned reason"
                );
                if self.notify_foreign {
                    self.send(NoticeKind::ForeignReason, host, record.note());
                }
                None
            }
            Decision::Skip(SkipReason::UnknownStatus) => {
                tracing::warn!(
                    host,
                    status = %record.status,
                    note = %record.note(),
                    "Skipping node in unrecognized state"
                );
                None
            }
            Decision::Online => {
                tracing::info!(
                    host,
                    status = %record.status,
                    note = %record.note(),
                    "Marking node online and clearing note"
                );
                let output = self.adapter.online(host)?;
                if output.success() {
                    self.send(NoticeKind::Online, host, record.note());
                } else {
                    log_command_failure(host, "online", &output);
                }
                Some(output.status)
            }
            Decision::KeepLocked { reason } => {
                tracing::info!(
                    host,
                    status = %record.status,
                    lock = %reason,
                    "Own note cleared but keeping node offline for pre-existing lock"
                );
                let output = self.adapter.offline(host, reason)?;
                if output.success() {
                    self.send(NoticeKind::KeptLocked, host, reason.clone());
                } else {
                    log_command_failure(host, "offline", &output);
                }
                Some(output.status)
            }
            Decision::Unmanaged => None,
        };

        Ok(Reconciliation {
            host: host.to_string(),
            record: Some(record),
            decision,
            command_status,
        })
    }

    /// Takes `host` offline with `<leader> <note>` unless someone else owns
    /// its current offline state.
    pub fn mark_offline(&self, host: &str, note: &str) -> Result<OfflineOutcome> {
        if !self.adapter.manages_state() {
            tracing::info!(rm = %self.kind(), host, "No manual offlining needed");
            return Ok(OfflineOutcome {
                host: host.to_string(),
                record: None,
                action: OfflineAction::Unmanaged,
                command_status: None,
            });
        }

        let note = note.trim();
        let record = self.adapter.query(host)?;
        let owner = record.owner(&self.leader);

        let action = match (record.class, owner) {
            (StatusClass::Offline, NoteOwner::Foreign) => OfflineAction::KeepForeign,
            (StatusClass::Offline, NoteOwner::Own) if record.note_body == note => {
                OfflineAction::AlreadyMarked
            }
            _ => OfflineAction::Marked,
        };

        let command_status = match action {
            OfflineAction::Marked => {
                let full_note = if note.is_empty() {
                    self.leader.clone()
                } else {
                    format!("{} {}", self.leader, note)
                };
                tracing::info!(host, status = %record.status, note = %full_note, "Marking node offline");
                let output = self.adapter.offline(host, &full_note)?;
                if !output.success() {
                    log_command_failure(host, "offline", &output);
                }
                Some(output.status)
            }
            OfflineAction::AlreadyMarked => {
                tracing::info!(host, status = %record.status, "Node already offline with this note");
                None
            }
            OfflineAction::KeepForeign => {
                tracing::info!(
                    host,
                    status = %record.status,
                    note = %record.note(),
                    "Node already offline for a non-owned reason; leaving note alone"
                );
                None
            }
            OfflineAction::Unmanaged => None,
        };

        Ok(OfflineOutcome {
            host: host.to_string(),
            record: Some(record),
            action,
            command_status,
        })
    }

    fn send(&self, kind: NoticeKind, host: &str, body: String) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        notifier.notify_logged(&Notice {
            kind,
            subject: self.leader.trim_end_matches(':').to_string(),
            host: host.to_string(),
            body,
        });
    }
}

fn log_command_failure(host: &str, action: &str, output: &CommandOutput) {
    tracing::error!(
        host,
        action,
        status = output.status,
        stderr = %output.stderr.trim(),
        "Resource manager command failed"
    );
}
