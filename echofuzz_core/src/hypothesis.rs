use crate::analysis::{AnomalyStatistics, ImpactfulPosition};
use crate::classifier::{PositionProfileClassifier, ProbeClassifier};
use crate::config::RunConfig;
use crate::executor::{ExecutionResult, Executor};
use crate::mutator::{Alphabet, generate_random};
use crate::oracle::{AnomalyRecord, Oracle, Verdict};
use crate::report::{FORMAT_SPECIFIERS, Report};
use rand::Rng;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Character the hypothesis probes are filled with.
pub const FILLER_BYTE: u8 = b'a';

/// A candidate cause: `byte` at `index` of the marker-prefixed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hypothesis {
    pub index: usize,
    pub byte: u8,
}

impl From<&ImpactfulPosition> for Hypothesis {
    fn from(position: &ImpactfulPosition) -> Self {
        Self {
            index: position.index,
            byte: position.byte,
        }
    }
}

/// Where a refinement probe came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOrigin {
    /// A targeted probe placing `value` at `index`. `value` is a single
    /// character for impactful-position hypotheses and a two-character
    /// specifier for the format-specifier sweep.
    Hypothesis { index: usize, value: Vec<u8> },
    /// A random probe let through by the classifier.
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HypothesisResult {
    pub origin: ProbeOrigin,
    pub result: ExecutionResult,
    pub verdict: Verdict,
    pub confirmed: bool,
}

impl HypothesisResult {
    /// `(index, value)` of a confirmed targeted probe.
    pub fn confirmed_value(&self) -> Option<(usize, &[u8])> {
        match &self.origin {
            ProbeOrigin::Hypothesis { index, value } if self.confirmed => {
                Some((*index, value.as_slice()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefinementSettings {
    /// Length of the random candidates in phase 4.
    pub probe_length: usize,
    /// Number of random candidates drawn in phase 4.
    pub random_probes: usize,
    pub marker: String,
    pub filler: u8,
    pub classifier_threshold: f64,
}

impl RefinementSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            probe_length: config.probe_length,
            random_probes: config.probes_per_worker,
            marker: config.marker.clone(),
            filler: FILLER_BYTE,
            classifier_threshold: config.classifier_threshold,
        }
    }
}

/// Turns an anomaly set into confirmed or refuted causal hypotheses.
pub struct HypothesisEngine<'a> {
    executor: &'a dyn Executor,
    oracle: &'a dyn Oracle,
    settings: RefinementSettings,
}

impl<'a> HypothesisEngine<'a> {
    pub fn new(executor: &'a dyn Executor, oracle: &'a dyn Oracle, settings: RefinementSettings) -> Self {
        Self {
            executor,
            oracle,
            settings,
        }
    }

    /// Runs every phase and builds the report. Returns `None` when there is
    /// nothing to analyse.
    pub fn analyze<R: Rng + ?Sized>(&self, anomalies: &[AnomalyRecord], rng: &mut R) -> Option<Report> {
        let statistics = AnomalyStatistics::compute(anomalies)?;
        info!(
            most_common_length = statistics.most_common_length,
            max_length = statistics.max_length,
            impactful = statistics.impactful_positions.len(),
            "computed anomaly statistics"
        );

        let mut classifier = PositionProfileClassifier::new(self.settings.classifier_threshold);
        let results = self.refine(&statistics, &mut classifier, rng);
        Some(Report::new(statistics, results))
    }

    /// Phases 2 to 5 in order.
    pub fn refine<R: Rng + ?Sized>(
        &self,
        statistics: &AnomalyStatistics,
        classifier: &mut dyn ProbeClassifier,
        rng: &mut R,
    ) -> Vec<HypothesisResult> {
        let hypotheses = generate_hypotheses(&statistics.impactful_positions);
        let mut results = self.confirm(&hypotheses, statistics.max_length);

        classifier.fit(&statistics.inputs);
        let alphabet = Alphabet::from(statistics.observed_chars.as_slice());
        results.extend(self.random_probing(&*classifier, &alphabet, rng));

        let follow_ups = self.format_specifier_sweep(&results, statistics.max_length);
        results.extend(follow_ups);
        results
    }

    /// Phase 3: one targeted probe per hypothesis, in hypothesis order.
    pub fn confirm(&self, hypotheses: &[Hypothesis], max_length: usize) -> Vec<HypothesisResult> {
        hypotheses
            .iter()
            .map(|h| {
                let value = vec![h.byte];
                let probe = self.build_probe(h.index, &value, max_length);
                self.execute(
                    ProbeOrigin::Hypothesis {
                        index: h.index,
                        value,
                    },
                    probe,
                )
            })
            .collect()
    }

    /// Phase 4: random candidates, executed only when the classifier lets
    /// them through.
    pub fn random_probing<R: Rng + ?Sized>(
        &self,
        classifier: &dyn ProbeClassifier,
        alphabet: &Alphabet,
        rng: &mut R,
    ) -> Vec<HypothesisResult> {
        let mut results = Vec::new();
        let mut skipped = 0usize;
        for _ in 0..self.settings.random_probes {
            let candidate = generate_random(alphabet, self.settings.probe_length, rng);
            if classifier.predict(&candidate) {
                results.push(self.execute(ProbeOrigin::Random, candidate));
            } else {
                skipped += 1;
            }
        }
        debug!(executed = results.len(), skipped, "random probing finished");
        results
    }

    /// Phase 5: every confirmed `%` triggers one probe per format specifier at
    /// the same index.
    pub fn format_specifier_sweep(
        &self,
        results: &[HypothesisResult],
        max_length: usize,
    ) -> Vec<HypothesisResult> {
        let indices: BTreeSet<usize> = results
            .iter()
            .filter_map(HypothesisResult::confirmed_value)
            .filter(|&(_, value)| value == b"%")
            .map(|(index, _)| index)
            .collect();

        let mut follow_ups = Vec::with_capacity(indices.len() * FORMAT_SPECIFIERS.len());
        for index in indices {
            info!(index, "percent sign confirmed, sweeping format specifiers");
            for specifier in FORMAT_SPECIFIERS {
                let value = specifier.as_bytes().to_vec();
                let probe = self.build_probe(index, &value, max_length);
                follow_ups.push(self.execute(ProbeOrigin::Hypothesis { index, value }, probe));
            }
        }
        follow_ups
    }

    /// Builds a marker-prefixed probe of `max_length` filler characters with
    /// the character at the marker-adjusted `index` replaced by `value`.
    ///
    /// The effective index is clamped to the body, so indices inside the
    /// marker land on the first character and indices past the end on the last.
    pub fn build_probe(&self, index: usize, value: &[u8], max_length: usize) -> Vec<u8> {
        let marker = self.settings.marker.as_bytes();
        let mut body = vec![self.settings.filler; max_length];
        if body.is_empty() {
            body.extend_from_slice(value);
        } else {
            let effective = index
                .saturating_sub(marker.len())
                .min(body.len() - 1);
            body.splice(effective..=effective, value.iter().copied());
        }

        let mut probe = Vec::with_capacity(marker.len() + body.len());
        probe.extend_from_slice(marker);
        probe.extend(body);
        probe
    }

    fn execute(&self, origin: ProbeOrigin, probe: Vec<u8>) -> HypothesisResult {
        let output = self.executor.run(&probe);
        let verdict = self.oracle.classify(&probe, &output);
        let confirmed = verdict.is_anomaly();
        debug!(
            probe = %String::from_utf8_lossy(&probe),
            %verdict,
            confirmed,
            "hypothesis probe executed"
        );
        HypothesisResult {
            origin,
            result: ExecutionResult::new(probe, output),
            verdict,
            confirmed,
        }
    }
}

/// Phase 2: one hypothesis per impactful position, in the same order.
pub fn generate_hypotheses(positions: &[ImpactfulPosition]) -> Vec<Hypothesis> {
    positions.iter().map(Hypothesis::from).collect()
}
