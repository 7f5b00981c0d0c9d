//! LSF: `bhosts -l` for state, `badmin hopen/hclose` to change it.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{CommandOutput, CommandRunner, NodeStateRecord, ResourceManager, RmAdapter, StatusClass};
use crate::error::Result;

static ADMIN_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"ADMIN ACTION COMMENT:\s*"(.*)""#).expect("valid regex"));

pub struct LsfAdapter {
    bhosts: String,
    badmin: String,
    runner: Box<dyn CommandRunner>,
}

impl LsfAdapter {
    pub fn new(bhosts: String, badmin: String, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            bhosts,
            badmin,
            runner,
        }
    }

    fn badmin(&self, args: Vec<String>) -> Result<CommandOutput> {
        self.runner.run(&self.badmin, &args)
    }
}

impl RmAdapter for LsfAdapter {
    fn kind(&self) -> ResourceManager {
        ResourceManager::Lsf
    }

    fn query(&self, host: &str) -> Result<NodeStateRecord> {
        let output = self
            .runner
            .run(&self.bhosts, &["-l".to_string(), host.to_string()])?;
        if !output.success() {
            tracing::warn!(
                host,
                status = output.status,
                stderr = %output.stderr.trim(),
                "bhosts failed; treating node state as unknown"
            );
            return Ok(NodeStateRecord::new(host, "", StatusClass::Unknown, ""));
        }
        Ok(parse_bhosts(host, &output.stdout))
    }

    fn online(&self, host: &str) -> Result<CommandOutput> {
        self.badmin(vec!["hopen".to_string(), host.to_string()])
    }

    fn offline(&self, host: &str, note: &str) -> Result<CommandOutput> {
        self.badmin(vec![
            "hclose".to_string(),
            "-C".to_string(),
            note.to_string(),
            host.to_string(),
        ])
    }
}

/// Reads the STATUS column under the `HOST <name>` header and the admin
/// comment, if any.
pub fn parse_bhosts(host: &str, stdout: &str) -> NodeStateRecord {
    let mut lines = stdout.lines();
    let mut status = None;
    while let Some(line) = lines.next() {
        if line.trim_start().starts_with("STATUS") {
            status = lines
                .next()
                .and_then(|values| values.split_whitespace().next())
                .map(str::to_string);
            break;
        }
    }

    let Some(status) = status else {
        return NodeStateRecord::new(host, "", StatusClass::Unknown, "");
    };
    let note = ADMIN_COMMENT
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|comment| comment.as_str())
        .unwrap_or("");
    NodeStateRecord::new(host, &status, classify(&status), note)
}

fn classify(status: &str) -> StatusClass {
    let status = status.to_ascii_lowercase();
    if status.starts_with("closed") {
        StatusClass::Offline
    } else if status.starts_with("ok") {
        StatusClass::Online
    } else {
        StatusClass::Unknown
    }
}
