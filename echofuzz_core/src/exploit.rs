use crate::hypothesis::{HypothesisResult, ProbeOrigin};

/// Turns confirmed findings into an extracted secret.
///
/// Returning `None` means no exploit was found, which is not an error.
pub trait ExploitBridge {
    fn exploit(
        &mut self,
        format_string_indices: &[usize],
        results: &[HypothesisResult],
    ) -> Option<String>;
}

/// Never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExploit;

impl ExploitBridge for NoExploit {
    fn exploit(&mut self, _indices: &[usize], _results: &[HypothesisResult]) -> Option<String> {
        None
    }
}

/// Looks for a leaked flag in the output of the hypothesis probes, checking
/// probes at format-string indices first.
#[derive(Debug, Clone)]
pub struct OutputScanBridge {
    pattern: String,
}

impl OutputScanBridge {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    fn scan(&self, text: &str) -> Option<String> {
        if self.pattern.is_empty() {
            return None;
        }
        let start = text.find(&self.pattern)?;
        let rest = &text[start..];
        let token = if self.pattern.ends_with('{') {
            match rest.find('}') {
                Some(end) => &rest[..=end],
                None => rest.split_whitespace().next().unwrap_or(rest),
            }
        } else {
            rest.split_whitespace().next().unwrap_or(rest)
        };
        Some(token.to_string())
    }

    fn scan_result(&self, result: &HypothesisResult) -> Option<String> {
        let output = &result.result.output;
        self.scan(&output.stdout)
            .or_else(|| self.scan(&output.stderr))
    }
}

impl ExploitBridge for OutputScanBridge {
    fn exploit(
        &mut self,
        format_string_indices: &[usize],
        results: &[HypothesisResult],
    ) -> Option<String> {
        let at_format_index = |r: &&HypothesisResult| {
            matches!(&r.origin, ProbeOrigin::Hypothesis { index, .. } if format_string_indices.contains(index))
        };
        results
            .iter()
            .filter(at_format_index)
            .chain(results.iter().filter(|r| !at_format_index(r)))
            .find_map(|r| self.scan_result(r))
    }
}
