//! TrialRunner - runs a generator against a fresh Source per trial
//!
//! This is the boundary a test framework drives: "run this generator for
//! trial N of seed S", and "replay these bytes through the same generator".
//! Choosing trial counts, shrinking and reporting all happen outside.

use crate::buffer::SegmentedBuffer;
use crate::config::RunnerConfig;
use crate::entropy::SeededEntropy;
use crate::error::Draw;
use crate::generators::{Generator, GeneratorRegistry};
use crate::source::{Source, TrialRecord};

use log::debug;
use std::sync::Arc;

/// Outcome of one run of a generator.
#[derive(Debug)]
pub struct Trial<T> {
    pub value: Draw<T>,
    pub record: TrialRecord,
}

impl<T> Trial<T> {
    pub fn is_ok(&self) -> bool {
        self.value.is_ok()
    }
}

/// Builds one independent Source per trial. Only the configuration and the
/// generator registry are shared between trials, and neither is mutated.
#[derive(Debug, Clone)]
pub struct TrialRunner {
    config: RunnerConfig,
    registry: Arc<GeneratorRegistry>,
}

impl TrialRunner {
    pub fn new(config: RunnerConfig) -> TrialRunner {
        TrialRunner::with_registry(config, Arc::new(GeneratorRegistry::with_defaults()))
    }

    pub fn with_registry(config: RunnerConfig, registry: Arc<GeneratorRegistry>) -> TrialRunner {
        TrialRunner { config, registry }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// An empty Source fed by the entropy stream of `trial`.
    pub fn source_for_trial(&self, trial: u64) -> Source {
        let entropy = SeededEntropy::new(
            self.config.seed,
            trial,
            self.config.source.entropy_block_size,
        );
        self.source(SegmentedBuffer::new()).with_entropy(entropy)
    }

    fn source(&self, buffer: SegmentedBuffer) -> Source {
        Source::new(buffer)
            .with_config(self.config.source.clone())
            .with_registry(Arc::clone(&self.registry))
    }

    /// Runs `generator` for trial `trial` of the configured seed.
    pub fn run_trial<T, G>(&self, trial: u64, generator: &G) -> Trial<T>
    where
        G: Generator<T> + ?Sized,
    {
        debug!("starting trial {} of seed {}", trial, self.config.seed);
        let mut source = self.source_for_trial(trial);
        let value = generator.generate(&mut source);
        let record = source.finish();
        log_outcome(trial, &value, &record);
        Trial { value, record }
    }

    /// Runs `generator` over exactly `bytes`, with no further entropy.
    pub fn replay<T, G>(&self, bytes: &[u8], generator: &G) -> Trial<T>
    where
        G: Generator<T> + ?Sized,
    {
        debug!("replaying {} byte(s)", bytes.len());
        let mut source = self.source(SegmentedBuffer::from_bytes(bytes.to_vec()));
        let value = generator.generate(&mut source);
        let record = source.finish();
        if let Err(err) = &value {
            debug!("replay failed: {}", err);
        }
        Trial { value, record }
    }
}

fn log_outcome<T>(trial: u64, value: &Draw<T>, record: &TrialRecord) {
    match value {
        Ok(_) => debug!(
            "trial {} finished: {} byte(s) consumed, {} interval(s)",
            trial,
            record.consumed,
            record.intervals.len()
        ),
        Err(err) if err.is_overrun() => {
            debug!("trial {} overran after {} byte(s)", trial, record.consumed)
        }
        Err(err) => debug!("trial {} failed: {}", trial, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::error::DrawError;

    fn sized_list(source: &mut Source) -> Draw<Vec<i32>> {
        source.get_list(|s| s.get_i32(-100..=100), 0..=10)
    }

    #[test]
    fn same_trial_is_deterministic() {
        let runner = TrialRunner::new(RunnerConfig::with_seed(11));
        let a = runner.run_trial(3, &sized_list);
        let b = runner.run_trial(3, &sized_list);
        assert_eq!(a.value.unwrap(), b.value.unwrap());
        assert_eq!(a.record.bytes, b.record.bytes);
        assert_eq!(a.record.intervals.shape(), b.record.intervals.shape());
    }

    #[test]
    fn replay_reproduces_the_trial() {
        let runner = TrialRunner::new(RunnerConfig::with_seed(5));
        let trial = runner.run_trial(0, &sized_list);
        let replayed = runner.replay(trial.record.consumed_bytes(), &sized_list);
        assert_eq!(replayed.value.unwrap(), trial.value.unwrap());
        assert_eq!(replayed.record.intervals.shape(), trial.record.intervals.shape());
    }

    #[test]
    fn replay_of_too_few_bytes_overruns() {
        let runner = TrialRunner::new(RunnerConfig::default());
        let trial = runner.replay(&[1, 2], &|s: &mut Source| s.get_i64(..));
        assert_eq!(trial.value, Err(DrawError::Overrun { needed: 6 }));
        trial.record.intervals.validate().unwrap();
    }

    #[test]
    fn runner_config_reaches_the_source() {
        let config = RunnerConfig {
            seed: 1,
            source: SourceConfig {
                default_max_size: 2,
                ..SourceConfig::default()
            },
        };
        let runner = TrialRunner::new(config);
        for trial in 0..20 {
            let value = runner
                .run_trial(trial, &|s: &mut Source| s.get_list(|s| s.get_u8(..), ..))
                .value
                .unwrap();
            assert!(value.len() <= 2);
        }
    }

    #[test]
    fn small_blocks_are_extended_on_demand() {
        let mut config = RunnerConfig::with_seed(9);
        config.source.entropy_block_size = 3;
        let runner = TrialRunner::new(config);
        let trial = runner.run_trial(0, &|s: &mut Source| s.get_bytes(10));
        assert_eq!(trial.value.unwrap().len(), 10);
        assert_eq!(trial.record.consumed, 10);
    }

    #[test]
    fn parallel_trials_are_independent() {
        let runner = TrialRunner::new(RunnerConfig::with_seed(77));
        let sequential: Vec<Vec<u8>> = (0..4)
            .map(|trial| runner.run_trial(trial, &sized_list).record.bytes)
            .collect();

        let parallel: Vec<Vec<u8>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|trial| {
                    let runner = &runner;
                    scope.spawn(move || runner.run_trial(trial, &sized_list).record.bytes)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(sequential, parallel);
    }
}
