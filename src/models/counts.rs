use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dashboard summary: issue counts keyed by status and by severity.
/// Issues with no value are counted under the empty-string key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueCounts {
    pub status: BTreeMap<String, u64>,
    pub severity: BTreeMap<String, u64>,
}

impl IssueCounts {
    pub fn total(&self) -> u64 {
        self.status.values().sum()
    }
}
