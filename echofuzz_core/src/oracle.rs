use crate::config::RunConfig;
use crate::executor::{ExecutionResult, ProcessOutput};
use crate::similarity::similarity_ratio;
use std::fmt;

/// Outputs less similar to the baseline than this are anomalous.
pub const SIMILARITY_THRESHOLD: f64 = 0.9;

/// Output of the single sacrificial probe every other run is compared to.
pub type Baseline = ProcessOutput;

/// The oracle's decision, tagged with the tier that made it.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The marker was found and the probe was echoed verbatim after it.
    MarkerEchoed,
    /// The marker was found but the bytes following it differ from the probe.
    MarkerCorrupted,
    /// A deny-listed keyword appeared in stdout or stderr.
    KeywordVeto { keyword: String },
    /// Stdout diverged from the baseline.
    Diverged { ratio: f64 },
    /// Stdout length differs from the baseline.
    LengthChanged { baseline: usize, observed: usize },
    Unchanged,
}

impl Verdict {
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            Verdict::MarkerCorrupted | Verdict::Diverged { .. } | Verdict::LengthChanged { .. }
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::MarkerEchoed => write!(f, "marker echoed verbatim"),
            Verdict::MarkerCorrupted => write!(f, "payload after marker corrupted"),
            Verdict::KeywordVeto { keyword } => write!(f, "vetoed by keyword '{keyword}'"),
            Verdict::Diverged { ratio } => write!(f, "output diverged (similarity {ratio:.3})"),
            Verdict::LengthChanged { baseline, observed } => {
                write!(f, "output length changed ({baseline} -> {observed})")
            }
            Verdict::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Classifies the output of a completed probe.
pub trait Oracle: Send + Sync {
    fn classify(&self, probe: &[u8], output: &ProcessOutput) -> Verdict;
}

/// Tiered classifier comparing each run to the baseline. The first tier that
/// applies decides:
///
/// 1. marker echo: the bytes after the marker must equal the probe,
/// 2. keyword veto: any deny-listed keyword makes the run benign,
/// 3. divergence: similarity to the baseline stdout below the threshold,
/// 4. length: stdout length differs from the baseline.
#[derive(Debug, Clone)]
pub struct VariationOracle {
    baseline: Baseline,
    attack_keywords: Vec<String>,
    marker: String,
}

impl VariationOracle {
    pub fn new(baseline: Baseline, attack_keywords: &[String], marker: &str) -> Self {
        Self {
            baseline,
            attack_keywords: attack_keywords
                .iter()
                .filter(|k| !k.is_empty())
                .map(|k| k.to_lowercase())
                .collect(),
            marker: marker.to_string(),
        }
    }

    pub fn from_config(baseline: Baseline, config: &RunConfig) -> Self {
        Self::new(baseline, &config.attack_keywords, &config.marker)
    }


    fn marker_tier(&self, probe: &[u8], stdout: &str) -> Option<Verdict> {
        if self.marker.is_empty() {
            return None;
        }
        let start = stdout.find(&self.marker)?;
        let tail = &stdout.as_bytes()[start..];
        let echoed = &tail[..probe.len().min(tail.len())];
        Some(if echoed == probe {
            Verdict::MarkerEchoed
        } else {
            Verdict::MarkerCorrupted
        })
    }

    fn keyword_tier(&self, output: &ProcessOutput) -> Option<Verdict> {
        let stdout = output.stdout.to_lowercase();
        let stderr = output.stderr.to_lowercase();
        self.attack_keywords
            .iter()
            .find(|k| stdout.contains(k.as_str()) || stderr.contains(k.as_str()))
            .map(|keyword| Verdict::KeywordVeto {
                keyword: keyword.clone(),
            })
    }
}

impl Oracle for VariationOracle {
    fn classify(&self, probe: &[u8], output: &ProcessOutput) -> Verdict {
        if let Some(verdict) = self.marker_tier(probe, &output.stdout) {
            return verdict;
        }
        if let Some(verdict) = self.keyword_tier(output) {
            return verdict;
        }

        let ratio = similarity_ratio(&self.baseline.stdout, &output.stdout);
        if ratio < SIMILARITY_THRESHOLD {
            return Verdict::Diverged { ratio };
        }

        let baseline_len = self.baseline.stdout.chars().count();
        let observed_len = output.stdout.chars().count();
        if baseline_len != observed_len {
            return Verdict::LengthChanged {
                baseline: baseline_len,
                observed: observed_len,
            };
        }
        Verdict::Unchanged
    }
}

/// An execution the oracle classified as anomalous.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyRecord {
    pub result: ExecutionResult,
    pub verdict: Verdict,
    /// MD5 of the probe, for deduplication and cross-referencing.
    pub input_hash: String,
}

impl AnomalyRecord {
    pub fn new(result: ExecutionResult, verdict: Verdict) -> Self {
        let input_hash = format!("{:x}", md5::compute(&result.probe));
        Self {
            result,
            verdict,
            input_hash,
        }
    }

    pub fn probe(&self) -> &[u8] {
        &self.result.probe
    }
}
