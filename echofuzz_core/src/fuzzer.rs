use crate::config::RunConfig;
use crate::executor::{ExecutionResult, Executor};
use crate::exploit::ExploitBridge;
use crate::hypothesis::{HypothesisEngine, RefinementSettings};
use crate::mutator::ProbeMutator;
use crate::oracle::{AnomalyRecord, Baseline, Oracle, VariationOracle};
use crate::report::Report;
use crate::store::ResultStore;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Capacity of the bounded progress channel.
const PROGRESS_CHANNEL_CAPACITY: usize = 1024;
/// The progress reporter logs once per this fraction of the campaign.
const PROGRESS_STEPS: usize = 10;
/// ChaCha stream reserved for the baseline and refinement phases.
const COORDINATOR_STREAM: u64 = u64::MAX;

/// Completion of one probe, sent by workers for observability only.
#[derive(Debug, Clone, Copy)]
pub struct ProbeEvent {
    pub worker: usize,
    pub anomalous: bool,
}

/// What a single worker produced.
#[derive(Debug, Default)]
struct WorkerOutput {
    results: Vec<ExecutionResult>,
    anomalies: Vec<AnomalyRecord>,
}

/// Merged output of all workers. Cross-worker order is unspecified.
#[derive(Debug, Default)]
pub struct CampaignResults {
    pub results: Vec<ExecutionResult>,
    pub anomalies: Vec<AnomalyRecord>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub baseline: Baseline,
    pub executions: usize,
    pub anomalies: usize,
    pub report: Option<Report>,
    pub secret: Option<String>,
}

/// Drives a run: baseline, parallel probing, refinement, exploitation.
pub struct Fuzzer<E: Executor> {
    config: RunConfig,
    executor: E,
    mutator: ProbeMutator,
    workers: usize,
}

impl<E: Executor> Fuzzer<E> {
    /// One worker per logical CPU.
    pub fn new(config: RunConfig, executor: E) -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let mutator = ProbeMutator::new(
            config.alphabet.clone(),
            config.probe_length,
            config.mutation_rate,
            &config.marker,
        );
        Self {
            config,
            executor,
            mutator,
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn rng_for(&self, stream: u64) -> ChaCha8Rng {
        match self.config.seed {
            Some(seed) => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(stream);
                rng
            }
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        }
    }

    /// Runs one random, marker-free probe and returns its output.
    pub fn compute_baseline(&self) -> Baseline {
        let mut rng = self.rng_for(COORDINATOR_STREAM);
        let probe = self.mutator.random_probe(&mut rng);
        let baseline = self.executor.run(&probe);
        info!(
            stdout = %baseline.stdout,
            stderr = %baseline.stderr,
            "baseline output"
        );
        baseline
    }

    /// Runs the full pipeline with the tiered [`VariationOracle`].
    pub fn run(&self, store: &mut dyn ResultStore, bridge: &mut dyn ExploitBridge) -> RunSummary {
        self.run_with_oracle(
            |baseline| VariationOracle::from_config(baseline, &self.config),
            store,
            bridge,
        )
    }

    /// Runs the full pipeline with an oracle built from the baseline.
    pub fn run_with_oracle<O, F>(
        &self,
        make_oracle: F,
        store: &mut dyn ResultStore,
        bridge: &mut dyn ExploitBridge,
    ) -> RunSummary
    where
        O: Oracle,
        F: FnOnce(Baseline) -> O,
    {
        let baseline = self.compute_baseline();
        let oracle = make_oracle(baseline.clone());

        let campaign = self.run_campaign(&oracle);
        if let Err(e) = store.save_results(&campaign.results, &campaign.anomalies) {
            error!(error = %e, "failed to persist results");
        }

        let mut summary = RunSummary {
            baseline,
            executions: campaign.results.len(),
            anomalies: campaign.anomalies.len(),
            report: None,
            secret: None,
        };
        if campaign.anomalies.is_empty() {
            info!("no anomalies found, skipping hypothesis refinement");
            return summary;
        }

        let Some(report) = self.refine(&oracle, &campaign.anomalies) else {
            return summary;
        };
        info!("{}", report.summary());
        if let Err(e) = store.save_report(&report) {
            error!(error = %e, "failed to persist report");
        }

        summary.secret = bridge.exploit(&report.format_string_indices(), &report.results);
        match &summary.secret {
            Some(secret) => info!(%secret, "secret extracted"),
            None => info!("no exploit found"),
        }
        summary.report = Some(report);
        summary
    }

    /// Runs the hypothesis engine on a non-empty anomaly set.
    pub fn refine(&self, oracle: &dyn Oracle, anomalies: &[AnomalyRecord]) -> Option<Report> {
        let engine = HypothesisEngine::new(
            &self.executor,
            oracle,
            RefinementSettings::from_config(&self.config),
        );
        let mut rng = self.rng_for(COORDINATOR_STREAM - 1);
        engine.analyze(anomalies, &mut rng)
    }

    /// Spawns the worker pool, waits for every worker and merges their output.
    pub fn run_campaign(&self, oracle: &dyn Oracle) -> CampaignResults {
        let total = self.workers * self.config.probes_per_worker;
        info!(
            workers = self.workers,
            probes_per_worker = self.config.probes_per_worker,
            "starting probe campaign"
        );
        let start_time = Instant::now();
        let (progress_tx, progress_rx) = sync_channel::<ProbeEvent>(PROGRESS_CHANNEL_CAPACITY);

        let outputs: Vec<WorkerOutput> = thread::scope(|scope| {
            let reporter = scope.spawn(move || report_progress(progress_rx, total));

            let handles: Vec<_> = (0..self.workers)
                .map(|worker| {
                    let progress = progress_tx.clone();
                    scope.spawn(move || self.worker_loop(worker, oracle, progress))
                })
                .collect();
            drop(progress_tx);

            let outputs = handles
                .into_iter()
                .enumerate()
                .filter_map(|(worker, handle)| match handle.join() {
                    Ok(output) => Some(output),
                    Err(_) => {
                        error!(worker, "worker panicked, its results are lost");
                        None
                    }
                })
                .collect();
            match reporter.join() {
                Ok(tally) => debug!(?tally, "progress reporter finished"),
                Err(_) => warn!("progress reporter panicked"),
            }
            outputs
        });

        let mut campaign = CampaignResults::default();
        for output in outputs {
            campaign.results.extend(output.results);
            campaign.anomalies.extend(output.anomalies);
        }
        info!(
            executions = campaign.results.len(),
            anomalies = campaign.anomalies.len(),
            elapsed = ?start_time.elapsed(),
            "probe campaign finished"
        );
        campaign
    }

    fn worker_loop(
        &self,
        worker: usize,
        oracle: &dyn Oracle,
        progress: SyncSender<ProbeEvent>,
    ) -> WorkerOutput {
        let mut rng = self.rng_for(worker as u64);
        let mut output = WorkerOutput::default();

        for _ in 0..self.config.probes_per_worker {
            let probe = self.mutator.next_probe(&mut rng);
            let process_output = self.executor.run(&probe);
            let verdict = oracle.classify(&probe, &process_output);
            let anomalous = verdict.is_anomaly();
            let result = ExecutionResult::new(probe, process_output);

            if anomalous {
                info!(
                    worker,
                    input = %result.probe_text(),
                    stdout = %result.output.stdout,
                    stderr = %result.output.stderr,
                    %verdict,
                    "potential vulnerability detected"
                );
                output
                    .anomalies
                    .push(AnomalyRecord::new(result.clone(), verdict));
            }
            output.results.push(result);

            // The reporter going away must not stop the campaign.
            let _ = progress.send(ProbeEvent { worker, anomalous });
        }
        debug!(worker, anomalies = output.anomalies.len(), "worker finished");
        output
    }
}

/// Counts seen by the progress reporter once every sender has gone away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTally {
    pub processed: usize,
    pub anomalies: usize,
}

fn report_progress(events: Receiver<ProbeEvent>, total: usize) -> ProgressTally {
    let step = (total / PROGRESS_STEPS).max(1);
    let mut tally = ProgressTally::default();
    for event in events {
        tally.processed += 1;
        if event.anomalous {
            tally.anomalies += 1;
        }
        if tally.processed % step == 0 || tally.processed == total {
            info!(
                processed = tally.processed,
                total,
                anomalies = tally.anomalies,
                "testing combinations"
            );
        }
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EchofuzzConfig, VulnerabilityProfile};
    use crate::executor::{CommandExecutor, CommandExecutorConfig, ProcessOutput};
    use crate::exploit::{NoExploit, OutputScanBridge};
    use crate::hypothesis::tests::{ContainsOracle, RecordingExecutor};
    use crate::mutator::Alphabet;
    use crate::oracle::Verdict;
    use crate::store::MemoryResultStore;

    fn run_config(profile: VulnerabilityProfile, probes_per_worker: usize) -> RunConfig {
        let mut config = EchofuzzConfig::default();
        config.target.command = vec!["unused".to_string()];
        config.fuzzer.profile = profile;
        config.fuzzer.probe_length = 8;
        config.fuzzer.mutation_rate = 0.2;
        config.fuzzer.probes_per_worker = probes_per_worker;
        config.fuzzer.seed = Some(7);
        config.fuzzer.classifier_threshold = 0.0;
        config.validate().unwrap()
    }

    /// Echoes probes, but prints a fixed greeting for probes without a marker.
    struct GreetingExecutor;

    impl Executor for GreetingExecutor {
        fn run(&self, input: &[u8]) -> ProcessOutput {
            if input.starts_with(b"<MARKER>") {
                let echoed: Vec<u8> = input
                    .iter()
                    .map(|&b| if b == b'%' { b'?' } else { b })
                    .collect();
                ProcessOutput::new(String::from_utf8_lossy(&echoed), "")
            } else {
                ProcessOutput::new("Hello", "")
            }
        }
    }

    #[test]
    fn every_worker_runs_its_probe_count() {
        let fuzzer = Fuzzer::new(run_config(VulnerabilityProfile::FormatString, 4), RecordingExecutor::default());
        let campaign = fuzzer.run_campaign(&ContainsOracle(b"%"));

        assert_eq!(campaign.results.len(), fuzzer.workers() * 4);
        assert_eq!(fuzzer.executor().calls().len(), fuzzer.workers() * 4);
        assert!(campaign.results.iter().all(|r| r.probe.starts_with(b"<MARKER>")));
        assert!(campaign.results.iter().all(|r| r.probe.len() == "<MARKER>".len() + 8));
        let expected_anomalies = campaign
            .results
            .iter()
            .filter(|r| r.probe.contains(&b'%'))
            .count();
        assert_eq!(campaign.anomalies.len(), expected_anomalies);
    }

    #[test]
    fn seeded_workers_are_reproducible() {
        let first = Fuzzer::new(run_config(VulnerabilityProfile::AutomatedFuzzing, 3), RecordingExecutor::default());
        let second = Fuzzer::new(run_config(VulnerabilityProfile::AutomatedFuzzing, 3), RecordingExecutor::default());
        let oracle = ContainsOracle(b"never");

        let mut a: Vec<Vec<u8>> = first.run_campaign(&oracle).results.into_iter().map(|r| r.probe).collect();
        let mut b: Vec<Vec<u8>> = second.run_campaign(&oracle).results.into_iter().map(|r| r.probe).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(first.compute_baseline(), second.compute_baseline());
    }

    #[test]
    fn run_without_anomalies_skips_refinement() {
        let fuzzer = Fuzzer::new(run_config(VulnerabilityProfile::FormatString, 2), RecordingExecutor::default());
        let mut store = MemoryResultStore::default();
        let summary = fuzzer.run_with_oracle(|_| ContainsOracle(b"never"), &mut store, &mut NoExploit);

        assert_eq!(summary.anomalies, 0);
        assert!(summary.report.is_none());
        assert!(summary.secret.is_none());
        assert!(store.reports.is_empty());
        assert_eq!(store.results.len(), fuzzer.workers() * 2);
        // Baseline plus the campaign; no refinement probes.
        assert_eq!(fuzzer.executor().calls().len(), 1 + fuzzer.workers() * 2);
    }

    #[test]
    fn corrupted_percent_leads_to_format_string_report() {
        let mut config = run_config(VulnerabilityProfile::FormatString, 40);
        config.alphabet = Alphabet::from(&b"a%"[..]);
        let fuzzer = Fuzzer::new(config, GreetingExecutor);
        let mut store = MemoryResultStore::default();
        let mut bridge = OutputScanBridge::new("flag{");
        let summary = fuzzer.run(&mut store, &mut bridge);

        assert_eq!(summary.baseline, ProcessOutput::new("Hello", ""));
        assert!(summary.anomalies > 0);
        assert_eq!(store.anomalies.len(), summary.anomalies);
        assert!(store
            .anomalies
            .iter()
            .all(|a| a.verdict == Verdict::MarkerCorrupted && a.probe().contains(&b'%')));

        let report = summary.report.expect("report");
        assert!(report.format_string_suspected);
        assert!(!report.format_string_indices().is_empty());
        assert_eq!(store.reports.len(), 1);
        assert!(store.reports[0].contains("Format string vulnerability detected"));
        assert!(summary.secret.is_none());
    }

    #[test]
    fn shell_target_end_to_end() {
        let mut config = run_config(VulnerabilityProfile::AutomatedFuzzing, 2);
        config.command = vec!["sh".to_string(), "-c".to_string(), "cat >/dev/null; echo Hello".to_string()];
        let executor = CommandExecutor::new(CommandExecutorConfig {
            command: config.command.clone(),
            timeout: config.timeout,
            working_dir: None,
        });
        let fuzzer = Fuzzer::new(config, executor);
        let mut store = MemoryResultStore::default();
        let summary = fuzzer.run(&mut store, &mut NoExploit);

        assert_eq!(summary.baseline.stdout, "Hello");
        assert_eq!(summary.executions, fuzzer.workers() * 2);
        assert_eq!(summary.anomalies, 0);
    }

    #[test]
    fn progress_reporter_drains_all_events() {
        let (tx, rx) = sync_channel(2);
        let reporter = thread::spawn(move || report_progress(rx, 5));
        for worker in 0..5 {
            tx.send(ProbeEvent {
                worker,
                anomalous: worker % 2 == 0,
            })
            .unwrap();
        }
        drop(tx);
        assert_eq!(
            reporter.join().unwrap(),
            ProgressTally {
                processed: 5,
                anomalies: 3,
            }
        );
    }

    #[test]
    fn progress_reporter_with_no_events() {
        let (tx, rx) = sync_channel::<ProbeEvent>(1);
        drop(tx);
        assert_eq!(report_progress(rx, 0), ProgressTally::default());
    }
}
