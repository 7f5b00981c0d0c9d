//! PBS/Torque: everything goes through `pbsnodes`.

use super::{CommandOutput, CommandRunner, NodeStateRecord, ResourceManager, RmAdapter, StatusClass};
use crate::error::Result;

const ONLINE_STATES: [&str; 10] = [
    "free",
    "job-exclusive",
    "job-sharing",
    "job-busy",
    "busy",
    "reserve",
    "resv-exclusive",
    "time-shared",
    "provisioning",
    "wait-provisioning",
];

pub struct PbsAdapter {
    pbsnodes: String,
    runner: Box<dyn CommandRunner>,
}

impl PbsAdapter {
    pub fn new(pbsnodes: String, runner: Box<dyn CommandRunner>) -> Self {
        Self { pbsnodes, runner }
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        self.runner.run(&self.pbsnodes, &args)
    }
}

impl RmAdapter for PbsAdapter {
    fn kind(&self) -> ResourceManager {
        ResourceManager::Pbs
    }

    fn query(&self, host: &str) -> Result<NodeStateRecord> {
        let output = self.run(&["-n", "-l", "all", host])?;
        if !output.success() {
            tracing::warn!(
                host,
                status = output.status,
                stderr = %output.stderr.trim(),
                "pbsnodes failed; treating node state as unknown"
            );
            return Ok(NodeStateRecord::new(host, "", StatusClass::Unknown, ""));
        }
        Ok(parse_pbsnodes(host, &output.stdout))
    }

    fn online(&self, host: &str) -> Result<CommandOutput> {
        self.run(&["-c", "-N", "", host])
    }

    fn offline(&self, host: &str, note: &str) -> Result<CommandOutput> {
        self.run(&["-o", "-N", note, host])
    }
}

/// Finds `host` in `pbsnodes -n -l` output (`<name> <state> [note...]`).
pub fn parse_pbsnodes(host: &str, stdout: &str) -> NodeStateRecord {
    for line in stdout.lines() {
        let mut fields = line.trim().splitn(2, char::is_whitespace);
        let Some(name) = fields.next() else {
            continue;
        };
        if name != host && name.split('.').next() != Some(host) {
            continue;
        }

        let rest = fields.next().unwrap_or("").trim_start();
        let (status, note) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        return NodeStateRecord::new(host, status, classify(status), note);
    }
    NodeStateRecord::new(host, "", StatusClass::Unknown, "")
}

/// States are comma-joined (`offline,job-exclusive`). Any offline part wins;
/// down and stale nodes are left for an administrator.
fn classify(status: &str) -> StatusClass {
    let parts: Vec<&str> = status.split(',').map(str::trim).collect();
    if parts.iter().any(|part| part.contains("offline")) {
        StatusClass::Offline
    } else if !parts.is_empty() && parts.iter().all(|part| ONLINE_STATES.contains(part)) {
        StatusClass::Online
    } else {
        StatusClass::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rm::test_utils::{stdout, ScriptedRunner};

    #[test]
    fn classifies_state_lists() {
        assert_eq!(classify("free"), StatusClass::Online);
        assert_eq!(classify("job-exclusive,busy"), StatusClass::Online);
        assert_eq!(classify("offline"), StatusClass::Offline);
        assert_eq!(classify("offline,job-exclusive"), StatusClass::Offline);
        assert_eq!(classify("down"), StatusClass::Unknown);
        assert_eq!(classify("state-unknown,down"), StatusClass::Unknown);
        assert_eq!(classify(""), StatusClass::Unknown);
    }

    #[test]
    fn parses_matching_host_line() {
        let out = "\
n0001                offline    NHC: check_fs_free: /tmp full
n0002                free
";
        let record = parse_pbsnodes("n0001", out);
        assert_eq!(record.class, StatusClass::Offline);
        assert_eq!(record.note(), "NHC: check_fs_free: /tmp full");

        let record = parse_pbsnodes("n0002", out);
        assert_eq!(record.class, StatusClass::Online);
        assert!(record.note().is_empty());

        assert_eq!(parse_pbsnodes("n0003", out).class, StatusClass::Unknown);
    }

    #[test]
    fn short_name_matches_fqdn_entry() {
        let record = parse_pbsnodes("n0001", "n0001.cluster.local offline NHC: x\n");
        assert_eq!(record.class, StatusClass::Offline);
        assert_eq!(record.note_leader, "NHC:");
    }

    #[test]
    fn clears_note_when_onlining() {
        let runner = ScriptedRunner::new(vec![stdout(""), stdout("")]);
        let adapter = PbsAdapter::new("pbsnodes".into(), Box::new(runner.clone()));

        adapter.online("n1").unwrap();
        adapter.offline("n1", "NHC: bad disk").unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0], ["pbsnodes", "-c", "-N", "", "n1"]);
        assert_eq!(calls[1], ["pbsnodes", "-o", "-N", "NHC: bad disk", "n1"]);
    }
}
