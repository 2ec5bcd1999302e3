use rand::Rng;
use rand::seq::IndexedRandom;

/// The set of characters probes are drawn from.
///
/// Duplicates are kept on purpose: a character listed twice is drawn with
/// twice the probability.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Alphabet {
    chars: Vec<u8>,
}

impl Alphabet {
    pub fn new(chars: Vec<u8>) -> Self {
        Self { chars }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Draws one character uniformly. Returns `None` for an empty alphabet.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u8> {
        self.chars.choose(rng).copied()
    }
}

impl From<&[u8]> for Alphabet {
    fn from(chars: &[u8]) -> Self {
        Self::new(chars.to_vec())
    }
}

/// Draws `length` characters uniformly, independently and with replacement.
///
/// An empty alphabet has nothing to draw from and yields an empty probe.
pub fn generate_random<R: Rng + ?Sized>(alphabet: &Alphabet, length: usize, rng: &mut R) -> Vec<u8> {
    if alphabet.is_empty() {
        return Vec::new();
    }
    (0..length).filter_map(|_| alphabet.pick(rng)).collect()
}

/// Replaces each position of `base`, independently with probability `rate`,
/// by a uniformly drawn character. The replacement may equal the original.
///
/// `rate` is clamped to `[0, 1]`; a rate of zero returns `base` unchanged.
pub fn mutate<R: Rng + ?Sized>(base: &[u8], alphabet: &Alphabet, rate: f64, rng: &mut R) -> Vec<u8> {
    let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
    base.iter()
        .map(|&original| {
            if rng.random_bool(rate) {
                alphabet.pick(rng).unwrap_or(original)
            } else {
                original
            }
        })
        .collect()
}

/// Produces marker-prefixed probes: a random base of fixed length, mutated at
/// the configured rate.
#[derive(Debug, Clone)]
pub struct ProbeMutator {
    alphabet: Alphabet,
    length: usize,
    rate: f64,
    marker: Vec<u8>,
}

impl ProbeMutator {
    pub fn new(alphabet: Alphabet, length: usize, rate: f64, marker: &str) -> Self {
        Self {
            alphabet,
            length,
            rate,
            marker: marker.as_bytes().to_vec(),
        }
    }

    /// A plain random probe without the marker, as used for the baseline.
    pub fn random_probe<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<u8> {
        generate_random(&self.alphabet, self.length, rng)
    }

    pub fn next_probe<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<u8> {
        let base = generate_random(&self.alphabet, self.length, rng);
        let mut probe = self.marker.clone();
        probe.extend(mutate(&base, &self.alphabet, self.rate, rng));
        probe
    }
}
