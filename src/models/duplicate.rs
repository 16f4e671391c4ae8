use crate::models::issue::Issue;
use serde::{Deserialize, Serialize};

/// Two or more issues sharing the exact same title and site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub title: String,
    pub site: Option<String>,
    pub issues: Vec<Issue>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
    pub total_groups: usize,
}

impl DuplicateReport {
    pub fn new(groups: Vec<DuplicateGroup>) -> Self {
        Self {
            total_groups: groups.len(),
            groups,
        }
    }
}
