use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

static RE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<label>[A-Za-z][^:]*?)\s*:\s*(?P<value>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)")
        .unwrap()
});

/// `label : value` pairs from an engine `.res` file. QA only; never gates a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub values: BTreeMap<String, f64>,
}

impl ResultSummary {
    pub fn parse(content: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in content.lines() {
            if let Some(caps) = RE_LINE.captures(line) {
                let label = caps["label"].split_whitespace().collect::<Vec<_>>().join(" ");
                if let Ok(value) = caps["value"].parse::<f64>() {
                    values.entry(label).or_insert(value);
                }
            }
        }
        Self { values }
    }

    pub fn read(path: &Path) -> Result<Self, ToolError> {
        let content = std::fs::read(path).map_err(|_| ToolError::MissingOutput(path.to_path_buf()))?;
        Ok(Self::parse(&String::from_utf8_lossy(&content)))
    }

    /// First value whose label contains `needle`, case-insensitively.
    pub fn find(&self, needle: &str) -> Option<f64> {
        let needle = needle.to_ascii_lowercase();
        self.values
            .iter()
            .find(|(label, _)| label.to_ascii_lowercase().contains(&needle))
            .map(|(_, value)| *value)
    }

    pub fn sensitivity(&self) -> Option<f64> {
        self.find("sensitivity")
    }

    pub fn scatter_fraction(&self) -> Option<f64> {
        self.find("scatter")
    }

    pub fn detector_hits(&self) -> Option<f64> {
        self.find("hits")
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
