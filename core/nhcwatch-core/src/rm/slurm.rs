//! Slurm: `sinfo` for state, `scontrol update` to change it.

use super::{CommandOutput, CommandRunner, NodeStateRecord, ResourceManager, RmAdapter, StatusClass};
use crate::error::Result;

/// Compact `%t` states that mean "not accepting jobs".
const OFFLINE_PREFIXES: [&str; 5] = ["down", "drain", "drng", "fail", "maint"];
const ONLINE_PREFIXES: [&str; 6] = ["alloc", "comp", "idle", "mix", "resv", "plnd"];

pub struct SlurmAdapter {
    sinfo: String,
    scontrol: String,
    runner: Box<dyn CommandRunner>,
}

impl SlurmAdapter {
    pub fn new(sinfo: String, scontrol: String, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            sinfo,
            scontrol,
            runner,
        }
    }

    fn update(&self, host: &str, state: &str, reason: Option<&str>) -> Result<CommandOutput> {
        let mut args = vec![
            "update".to_string(),
            format!("State={}", state),
            format!("NodeName={}", host),
        ];
        if let Some(reason) = reason {
            args.push(format!("Reason={}", reason));
        }
        self.runner.run(&self.scontrol, &args)
    }
}

impl RmAdapter for SlurmAdapter {
    fn kind(&self) -> ResourceManager {
        ResourceManager::Slurm
    }

    fn query(&self, host: &str) -> Result<NodeStateRecord> {
        let args = vec![
            "-h".to_string(),
            "-o".to_string(),
            "%t %E".to_string(),
            "-n".to_string(),
            host.to_string(),
        ];
        let output = self.runner.run(&self.sinfo, &args)?;
        if !output.success() {
            tracing::warn!(
                host,
                status = output.status,
                stderr = %output.stderr.trim(),
                "sinfo failed; treating node state as unknown"
            );
            return Ok(NodeStateRecord::new(host, "", StatusClass::Unknown, ""));
        }
        Ok(parse_sinfo(host, &output.stdout))
    }

    fn online(&self, host: &str) -> Result<CommandOutput> {
        self.update(host, "RESUME", None)
    }

    fn offline(&self, host: &str, note: &str) -> Result<CommandOutput> {
        self.update(host, "DRAIN", Some(note))
    }
}

/// Parses the first line of `sinfo -h -o '%t %E'`.
pub fn parse_sinfo(host: &str, stdout: &str) -> NodeStateRecord {
    let line = stdout.lines().map(str::trim).find(|line| !line.is_empty());
    let Some(line) = line else {
        return NodeStateRecord::new(host, "", StatusClass::Unknown, "");
    };

    let (status, reason) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let reason = reason.trim();
    let reason = if reason.eq_ignore_ascii_case("none") {
        ""
    } else {
        reason
    };
    NodeStateRecord::new(host, status, classify(status), reason)
}

fn classify(status: &str) -> StatusClass {
    // Flags such as `*` (not responding) or `~` (powered off) trail the name.
    let status = status.to_ascii_lowercase();
    if OFFLINE_PREFIXES.iter().any(|prefix| status.starts_with(prefix)) {
        StatusClass::Offline
    } else if ONLINE_PREFIXES.iter().any(|prefix| status.starts_with(prefix)) {
        StatusClass::Online
    } else {
        StatusClass::Unknown
    }
}
