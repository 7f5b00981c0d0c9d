//! Grid Engine family. Hosts are disabled and re-enabled through load
//! sensors, so there is nothing to mark by hand.

use super::{CommandOutput, NodeStateRecord, ResourceManager, RmAdapter, StatusClass};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct GridEngineAdapter;

impl RmAdapter for GridEngineAdapter {
    fn kind(&self) -> ResourceManager {
        ResourceManager::GridEngine
    }

    fn manages_state(&self) -> bool {
        false
    }

    fn query(&self, host: &str) -> Result<NodeStateRecord> {
        Ok(NodeStateRecord::new(host, "", StatusClass::Unknown, ""))
    }

    fn online(&self, _host: &str) -> Result<CommandOutput> {
        Ok(CommandOutput::default())
    }

    fn offline(&self, _host: &str, _note: &str) -> Result<CommandOutput> {
        Ok(CommandOutput::default())
    }
}
