use crate::oracle::AnomalyRecord;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// How many of the most frequent characters the statistics keep.
pub const TOP_CHARACTERS: usize = 5;

/// Byte index -> character -> number of anomalous probes carrying that
/// character at that index.
pub type PositionCharTable = BTreeMap<usize, BTreeMap<u8, usize>>;

/// A `(index, character)` pair seen in more than one anomalous probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpactfulPosition {
    pub index: usize,
    pub byte: u8,
    pub count: usize,
}

impl fmt::Display for ImpactfulPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(({}, {:?}), {})",
            self.index,
            char::from(self.byte),
            self.count
        )
    }
}

/// Aggregate view of the anomaly set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyStatistics {
    pub most_common_length: usize,
    /// Up to [`TOP_CHARACTERS`] characters with the number of anomalous
    /// probes containing them at least once.
    pub most_common_chars: Vec<(u8, usize)>,
    pub common_pattern: Vec<u8>,
    pub position_table: PositionCharTable,
    pub dominant_chars: BTreeMap<usize, u8>,
    pub impactful_positions: Vec<ImpactfulPosition>,
    pub max_length: usize,
    /// Every character that occurred in some anomalous probe, ascending.
    pub observed_chars: Vec<u8>,
    pub inputs: Vec<Vec<u8>>,
}

impl AnomalyStatistics {
    /// Computes the statistics. Returns `None` for an empty anomaly set, since
    /// none of the arg-max quantities are defined there.
    ///
    /// All arg-max ties are broken towards the smallest value so the result
    /// does not depend on the order the anomalies were merged in.
    pub fn compute(anomalies: &[AnomalyRecord]) -> Option<Self> {
        if anomalies.is_empty() {
            return None;
        }

        let mut lengths: HashMap<usize, usize> = HashMap::new();
        let mut presence: HashMap<u8, usize> = HashMap::new();
        let mut patterns: HashMap<&[u8], usize> = HashMap::new();
        let mut position_table = PositionCharTable::new();
        let mut max_length = 0;

        for record in anomalies {
            let probe = record.probe();
            *lengths.entry(probe.len()).or_default() += 1;
            let distinct: BTreeSet<u8> = probe.iter().copied().collect();
            for byte in distinct {
                *presence.entry(byte).or_default() += 1;
            }
            *patterns.entry(probe).or_default() += 1;
            for (index, &byte) in probe.iter().enumerate() {
                *position_table
                    .entry(index)
                    .or_default()
                    .entry(byte)
                    .or_default() += 1;
            }
            max_length = max_length.max(probe.len());
        }

        let most_common_length = arg_max(lengths.into_iter())?;
        let common_pattern = arg_max(patterns.into_iter())?.to_vec();

        let mut most_common_chars: Vec<(u8, usize)> = presence.into_iter().collect();
        most_common_chars.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let observed_chars = {
            let mut chars: Vec<u8> = most_common_chars.iter().map(|&(b, _)| b).collect();
            chars.sort_unstable();
            chars
        };
        most_common_chars.truncate(TOP_CHARACTERS);

        let dominant_chars = position_table
            .iter()
            .filter_map(|(&index, chars)| {
                arg_max(chars.iter().map(|(&b, &c)| (b, c))).map(|b| (index, b))
            })
            .collect();

        let impactful_positions = impactful_positions(&position_table);

        Some(Self {
            most_common_length,
            most_common_chars,
            common_pattern,
            position_table,
            dominant_chars,
            impactful_positions,
            max_length,
            observed_chars,
            inputs: anomalies.iter().map(|r| r.probe().to_vec()).collect(),
        })
    }
}

/// Pairs with a count strictly greater than one, sorted by count descending,
/// then index ascending, then character ascending.
pub fn impactful_positions(table: &PositionCharTable) -> Vec<ImpactfulPosition> {
    let mut positions: Vec<ImpactfulPosition> = table
        .iter()
        .flat_map(|(&index, chars)| {
            chars
                .iter()
                .filter(|&(_, &count)| count > 1)
                .map(move |(&byte, &count)| ImpactfulPosition { index, byte, count })
        })
        .collect();
    positions.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(a.index.cmp(&b.index))
            .then(a.byte.cmp(&b.byte))
    });
    positions
}

/// Key with the highest count; the smallest key wins a tie.
fn arg_max<K: Ord>(counts: impl Iterator<Item = (K, usize)>) -> Option<K> {
    counts
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(key, _)| key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionResult, ProcessOutput};
    use crate::oracle::Verdict;

    fn anomalies(probes: &[&[u8]]) -> Vec<AnomalyRecord> {
        probes
            .iter()
            .map(|p| {
                AnomalyRecord::new(
                    ExecutionResult::new(p.to_vec(), ProcessOutput::default()),
                    Verdict::MarkerCorrupted,
                )
            })
            .collect()
    }

    #[test]
    fn empty_anomaly_set_has_no_statistics() {
        assert!(AnomalyStatistics::compute(&[]).is_none());
    }

    #[test]
    fn count_one_entries_are_not_impactful() {
        let stats = AnomalyStatistics::compute(&anomalies(&[b"aXc", b"aYc", b"aXc"])).unwrap();

        let position_one = &stats.position_table[&1];
        assert_eq!(position_one.get(&b'X'), Some(&2));
        assert_eq!(position_one.get(&b'Y'), Some(&1));
        assert_eq!(position_one.len(), 2);

        // Positions 0 and 2 carry 'a' and 'c' three times each; position 1 only
        // contributes the repeated 'X'.
        let at_one: Vec<_> = stats
            .impactful_positions
            .iter()
            .filter(|p| p.index == 1)
            .collect();
        assert_eq!(
            at_one,
            vec![&ImpactfulPosition {
                index: 1,
                byte: b'X',
                count: 2
            }]
        );
        assert!(stats.impactful_positions.iter().all(|p| p.count > 1));
    }

    #[test]
    fn impactful_positions_of_single_varying_column() {
        let mut table = PositionCharTable::new();
        table.entry(1).or_default().insert(b'X', 2);
        table.entry(1).or_default().insert(b'Y', 1);
        assert_eq!(
            impactful_positions(&table),
            vec![ImpactfulPosition {
                index: 1,
                byte: b'X',
                count: 2
            }]
        );
    }

    #[test]
    fn impactful_positions_tiebreak_is_deterministic() {
        let stats =
            AnomalyStatistics::compute(&anomalies(&[b"ba", b"ba", b"ab", b"ab", b"ab"])).unwrap();
        let ordered: Vec<(usize, u8, usize)> = stats
            .impactful_positions
            .iter()
            .map(|p| (p.index, p.byte, p.count))
            .collect();
        assert_eq!(
            ordered,
            vec![(0, b'a', 3), (1, b'b', 3), (0, b'b', 2), (1, b'a', 2)]
        );
    }

    #[test]
    fn summary_statistics() {
        let stats =
            AnomalyStatistics::compute(&anomalies(&[b"aXc", b"aYc", b"aXc", b"zzzz"])).unwrap();
        assert_eq!(stats.most_common_length, 3);
        assert_eq!(stats.max_length, 4);
        assert_eq!(stats.common_pattern, b"aXc".to_vec());
        assert_eq!(stats.most_common_chars[0], (b'a', 3));
        assert_eq!(stats.most_common_chars[1], (b'c', 3));
        assert_eq!(stats.most_common_chars.len(), TOP_CHARACTERS);
        assert_eq!(stats.dominant_chars[&0], b'a');
        assert_eq!(stats.dominant_chars[&1], b'X');
        assert_eq!(stats.dominant_chars[&3], b'z');
        assert_eq!(stats.observed_chars, b"XYacz".to_vec());
        assert_eq!(stats.inputs.len(), 4);
    }

    #[test]
    fn presence_counts_each_probe_once() {
        let stats = AnomalyStatistics::compute(&anomalies(&[b"aaaa", b"b"])).unwrap();
        assert_eq!(stats.most_common_chars, vec![(b'a', 1), (b'b', 1)]);
    }

    #[test]
    fn length_ties_prefer_shorter_length() {
        let stats = AnomalyStatistics::compute(&anomalies(&[b"abcd", b"ab"])).unwrap();
        assert_eq!(stats.most_common_length, 2);
        assert_eq!(stats.common_pattern, b"ab".to_vec());
    }
}
