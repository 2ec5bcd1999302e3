pub mod analysis;
pub mod classifier;
pub mod config;
pub mod executor;
pub mod exploit;
pub mod fuzzer;
pub mod hypothesis;
pub mod mutator;
pub mod oracle;
pub mod report;
pub mod similarity;
pub mod store;

pub use analysis::{AnomalyStatistics, ImpactfulPosition};
pub use classifier::{PositionProfileClassifier, ProbeClassifier};
pub use config::{ConfigError, EchofuzzConfig, RunConfig, VulnerabilityProfile};
pub use executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionResult, Executor, ProcessOutput,
};
pub use exploit::{ExploitBridge, NoExploit, OutputScanBridge};
pub use fuzzer::{CampaignResults, Fuzzer, RunSummary};
pub use hypothesis::{Hypothesis, HypothesisEngine, HypothesisResult, ProbeOrigin};
pub use mutator::{Alphabet, ProbeMutator};
pub use oracle::{AnomalyRecord, Baseline, Oracle, Verdict, VariationOracle};
pub use report::Report;
pub use store::{FileResultStore, MemoryResultStore, ResultStore, StoreError};
