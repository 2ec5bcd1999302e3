/// Byte used to pad short probes up to the feature width.
pub const PADDING_BYTE: u8 = b' ';

/// A cheap pre-filter deciding whether a candidate probe resembles the
/// anomalous probes seen so far and is worth executing.
///
/// Classifiers are trained on positive examples only, so their verdicts are
/// advisory and must never be treated as an anomaly detection.
pub trait ProbeClassifier {
    fn fit(&mut self, anomalous_probes: &[Vec<u8>]);
    fn predict(&self, candidate: &[u8]) -> bool;
}

/// Pads with [`PADDING_BYTE`] or truncates `probe` to exactly `width` bytes.
pub fn feature_vector(probe: &[u8], width: usize) -> Vec<u8> {
    let mut features: Vec<u8> = probe.iter().copied().take(width).collect();
    features.resize(width, PADDING_BYTE);
    features
}

/// Remembers which byte values occurred at each position of the training
/// vectors. A candidate's score is the share of its positions holding a byte
/// already seen there; it is predicted anomalous when the score reaches the
/// threshold.
#[derive(Debug, Clone)]
pub struct PositionProfileClassifier {
    threshold: f64,
    seen: Vec<[bool; 256]>,
}

impl PositionProfileClassifier {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            seen: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.seen.len()
    }

    pub fn is_trained(&self) -> bool {
        !self.seen.is_empty()
    }

    pub fn score(&self, candidate: &[u8]) -> f64 {
        if self.seen.is_empty() {
            return 1.0;
        }
        let features = feature_vector(candidate, self.seen.len());
        let hits = features
            .iter()
            .zip(&self.seen)
            .filter(|&(&byte, seen)| seen[usize::from(byte)])
            .count();
        hits as f64 / self.seen.len() as f64
    }
}

impl ProbeClassifier for PositionProfileClassifier {
    fn fit(&mut self, anomalous_probes: &[Vec<u8>]) {
        let width = anomalous_probes.iter().map(Vec::len).max().unwrap_or(0);
        self.seen = vec![[false; 256]; width];
        for probe in anomalous_probes {
            for (position, byte) in feature_vector(probe, width).into_iter().enumerate() {
                self.seen[position][usize::from(byte)] = true;
            }
        }
    }

    /// An untrained classifier lets every candidate through.
    fn predict(&self, candidate: &[u8]) -> bool {
        self.score(candidate) >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_vector_pads_and_truncates() {
        assert_eq!(feature_vector(b"ab", 4), b"ab  ".to_vec());
        assert_eq!(feature_vector(b"abcdef", 3), b"abc".to_vec());
        assert!(feature_vector(b"abc", 0).is_empty());
    }

    #[test]
    fn untrained_classifier_accepts_everything() {
        let classifier = PositionProfileClassifier::new(1.0);
        assert!(!classifier.is_trained());
        assert!(classifier.predict(b"anything"));
    }

    #[test]
    fn training_probes_are_always_accepted() {
        let probes = vec![b"<m>abc".to_vec(), b"<m>xyz1".to_vec()];
        let mut classifier = PositionProfileClassifier::new(1.0);
        classifier.fit(&probes);
        assert_eq!(classifier.width(), 7);
        for probe in &probes {
            assert!(classifier.predict(probe));
        }
    }

    #[test]
    fn score_reflects_positional_overlap() {
        let mut classifier = PositionProfileClassifier::new(0.5);
        classifier.fit(&[b"abcd".to_vec()]);
        assert!((classifier.score(b"abzz") - 0.5).abs() < 1e-9);
        assert!(classifier.predict(b"abzz"));
        assert!(!classifier.predict(b"azzz"));
        assert!((classifier.score(b"zzzz")).abs() < 1e-9);
    }

    #[test]
    fn zero_threshold_accepts_everything() {
        let mut classifier = PositionProfileClassifier::new(0.0);
        classifier.fit(&[b"abcd".to_vec()]);
        assert!(classifier.predict(b"\x00\x01\x02\x03"));
    }
}
