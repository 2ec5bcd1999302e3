use crate::analysis::AnomalyStatistics;
use crate::hypothesis::{HypothesisResult, ProbeOrigin};
use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

/// Specifiers probed once a `%` is confirmed.
pub const FORMAT_SPECIFIERS: [&str; 6] = ["%s", "%d", "%x", "%f", "%p", "%n"];
/// Confirmed hypotheses listed by [`Report::summary`] before truncating.
pub const SUMMARY_LIMIT: usize = 5;
pub const FORMAT_STRING_DETECTED: &str = "Format string vulnerability detected";

pub fn is_format_specifier(value: &[u8]) -> bool {
    FORMAT_SPECIFIERS.iter().any(|s| s.as_bytes() == value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedHypothesis {
    pub index: usize,
    pub value: Vec<u8>,
    pub probe: Vec<u8>,
}

impl fmt::Display for ConfirmedHypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Character '{}' at position {} with test input '{}'",
            String::from_utf8_lossy(&self.value),
            self.index + 1,
            String::from_utf8_lossy(&self.probe)
        )
    }
}

/// Final outcome of the hypothesis engine.
#[derive(Debug, Clone)]
pub struct Report {
    pub statistics: AnomalyStatistics,
    pub results: Vec<HypothesisResult>,
    pub confirmed: Vec<ConfirmedHypothesis>,
    /// Set when a multi-character format specifier was confirmed.
    pub format_string_suspected: bool,
}

impl Report {
    pub fn new(statistics: AnomalyStatistics, results: Vec<HypothesisResult>) -> Self {
        let confirmed: Vec<ConfirmedHypothesis> = results
            .iter()
            .filter_map(|r| {
                r.confirmed_value().map(|(index, value)| ConfirmedHypothesis {
                    index,
                    value: value.to_vec(),
                    probe: r.result.probe.clone(),
                })
            })
            .collect();
        let format_string_suspected = confirmed.iter().any(|c| is_format_specifier(&c.value));

        Self {
            statistics,
            results,
            confirmed,
            format_string_suspected,
        }
    }

    /// Indices of confirmed `%` or specifier hypotheses, ascending and unique.
    pub fn format_string_indices(&self) -> Vec<usize> {
        self.confirmed
            .iter()
            .filter(|c| c.value == b"%" || is_format_specifier(&c.value))
            .map(|c| c.index)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Short human-readable digest with at most [`SUMMARY_LIMIT`] confirmed
    /// hypotheses spelled out.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} anomalies analysed, {} hypothesis probes executed, {} confirmed",
            self.statistics.inputs.len(),
            self.results.len(),
            self.confirmed.len()
        );
        for confirmed in self.confirmed.iter().take(SUMMARY_LIMIT) {
            let _ = writeln!(out, "  Confirmed Hypothesis: {confirmed}");
        }
        if self.confirmed.len() > SUMMARY_LIMIT {
            let _ = writeln!(out, "  ... and {} more", self.confirmed.len() - SUMMARY_LIMIT);
        }
        if self.format_string_suspected {
            let _ = writeln!(out, "{FORMAT_STRING_DETECTED}");
        }
        out.trim_end().to_string()
    }
}

fn char_list(bytes: impl Iterator<Item = u8>) -> String {
    let items: Vec<String> = bytes.map(|b| format!("{:?}", char::from(b))).collect();
    format!("[{}]", items.join(", "))
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.statistics;
        writeln!(f, "Most common length: {}", stats.most_common_length)?;
        writeln!(
            f,
            "Most common characters: {}",
            char_list(stats.most_common_chars.iter().map(|&(b, _)| b))
        )?;
        writeln!(
            f,
            "Common pattern: {}",
            String::from_utf8_lossy(&stats.common_pattern)
        )?;
        let positions: Vec<String> = stats
            .dominant_chars
            .iter()
            .map(|(index, &b)| format!("{index}: {:?}", char::from(b)))
            .collect();
        writeln!(f, "Common character positions: {{{}}}", positions.join(", "))?;
        let impactful: Vec<String> = stats
            .impactful_positions
            .iter()
            .map(ToString::to_string)
            .collect();
        writeln!(f, "Impactful positions: [{}]", impactful.join(", "))?;
        let inputs: Vec<String> = stats
            .inputs
            .iter()
            .map(|i| format!("'{}'", String::from_utf8_lossy(i)))
            .collect();
        writeln!(f, "Inputs: [{}]", inputs.join(", "))?;

        writeln!(f)?;
        writeln!(f, "Extended Analytics (Further testing results):")?;
        for (i, result) in self.results.iter().enumerate() {
            let probe = result.result.probe_text();
            match &result.origin {
                ProbeOrigin::Hypothesis { index, value } => writeln!(
                    f,
                    "Hypothesis {}: Character '{}' at position {} with test input '{}'",
                    i + 1,
                    String::from_utf8_lossy(value),
                    index + 1,
                    probe
                )?,
                ProbeOrigin::Random => {
                    writeln!(f, "Hypothesis {}: Random input '{}'", i + 1, probe)?
                }
            }
            writeln!(
                f,
                "Testing result: STDOUT: {} STDERR: {}",
                result.result.output.stdout, result.result.output.stderr
            )?;
            writeln!(
                f,
                "Anomaly Cause Guess: {}",
                if result.confirmed {
                    "Confirmed"
                } else {
                    "Not Confirmed"
                }
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Final Result with Confirmed Hypotheses:")?;
        if self.confirmed.is_empty() {
            write!(f, "No confirmed hypotheses")?;
            return Ok(());
        }
        for (i, confirmed) in self.confirmed.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "Confirmed Hypothesis: {confirmed}")?;
        }
        if self.format_string_suspected {
            write!(f, "\n{FORMAT_STRING_DETECTED}")?;
        }
        Ok(())
    }
}
