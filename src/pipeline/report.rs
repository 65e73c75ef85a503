use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PlaygraphError;
use crate::graph::RejectionSummary;

/// Pipeline phases in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Entities,
    Discovery,
    Mapping,
    Validation,
    Consolidation,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Entities,
        Phase::Discovery,
        Phase::Mapping,
        Phase::Validation,
        Phase::Consolidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Entities => "entities",
            Phase::Discovery => "discovery",
            Phase::Mapping => "mapping",
            Phase::Validation => "validation",
            Phase::Consolidation => "consolidation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = PlaygraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PlaygraphError::InvalidInput(format!("unknown phase: {}", s)))
    }
}

/// What one phase did: counts keyed by outcome, plus rejections per relation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub counts: BTreeMap<String, usize>,
    #[serde(default)]
    pub rejections: RejectionSummary,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl PhaseSummary {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            counts: BTreeMap::new(),
            rejections: RejectionSummary::new(),
            notes: Vec::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: usize) {
        self.counts.insert(key.to_string(), value);
    }

    pub fn add(&mut self, key: &str, n: usize) {
        *self.counts.entry(key.to_string()).or_insert(0) += n;
    }

    pub fn get(&self, key: &str) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Merge rejection counts, e.g. rule-level and validator-level
    pub fn add_rejections(&mut self, other: &RejectionSummary) {
        for (relation_type, reasons) in other {
            let entry = self.rejections.entry(relation_type.clone()).or_default();
            for (reason, count) in reasons {
                *entry.entry(reason.clone()).or_insert(0) += count;
            }
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn log(&self) {
        let counts: Vec<String> = self.counts.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        log::info!("Phase {} complete: {}", self.phase, counts.join(", "));
        for (relation_type, reasons) in &self.rejections {
            for (reason, count) in reasons {
                log::info!("  {} rejected {}: {}", relation_type, reason, count);
            }
        }
        for note in &self.notes {
            log::info!("  {}", note);
        }
    }
}

impl fmt::Display for PhaseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", self.phase)?;
        for (key, value) in &self.counts {
            writeln!(f, "  {:<28} {:>10}", key, value)?;
        }
        for (relation_type, reasons) in &self.rejections {
            for (reason, count) in reasons {
                writeln!(f, "  rejected {:<19} {:>10}  ({})", reason, count, relation_type)?;
            }
        }
        for note in &self.notes {
            writeln!(f, "  note: {}", note)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_parse() {
        assert_eq!(Phase::ALL[0], Phase::Entities);
        assert!(Phase::Mapping < Phase::Validation);
        assert_eq!("consolidation".parse::<Phase>().unwrap(), Phase::Consolidation);
        assert!("indexing".parse::<Phase>().is_err());
    }

    #[test]
    fn test_summary_counts_and_json() {
        let mut summary = PhaseSummary::new(Phase::Validation);
        summary.add("accepted", 3);
        summary.add("accepted", 2);
        summary.set("candidates", 7);
        let mut rejections = RejectionSummary::new();
        rejections
            .entry("instrument".into())
            .or_default()
            .insert("MalformedAttribute".into(), 2);
        summary.add_rejections(&rejections);
        summary.add_rejections(&rejections);

        assert_eq!(summary.get("accepted"), 5);
        assert_eq!(summary.get("missing"), 0);
        assert_eq!(summary.rejections["instrument"]["MalformedAttribute"], 4);

        let json = serde_json::to_string(&summary).unwrap();
        let back: PhaseSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
        assert!(summary.to_string().contains("[validation]"));
    }
}
