//! Pipeline driver: chains the processing stages and aggregates their exit codes.
//!
//! Mirrors the source `_pipeline.py`: steps run in order, each receiving the
//! output directories of the steps that ran before it; a [`StopPipeline`]
//! raised by any step aborts the remaining steps immediately.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::StopPipeline;

/// Exit status of a processing step, and of the pipeline as a whole.
///
/// Ordered so that aggregating steps with `max()` yields the worst outcome:
/// `COMPLETED < INCOMPLETE < ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum ExitCode {
    /// The step ran to completion; its output is fully usable.
    Completed = 0,
    /// The step ran but did not process everything (e.g. upstream was incomplete).
    Incomplete = 1,
    /// The step failed outright.
    Error = 2,
}

/// A single stage in the pipeline.
///
/// `run` receives the output directories produced by the steps that already
/// ran (keyed by step name) and returns its own output directory (if it
/// produced one) along with its [`ExitCode`].
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable, human-readable name used as the key in `previous_steps_output`.
    fn name(&self) -> &str;

    /// Run this step.
    async fn run(
        &self,
        config: &Config,
        previous_steps_output: &HashMap<String, PathBuf>,
    ) -> Result<(Option<PathBuf>, ExitCode), StopPipeline>;
}

/// Chains a sequence of [`Step`]s, running them in order and aggregating
/// their exit codes.
pub struct Pipeline {
    config: Config,
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    /// Build a pipeline over the given configuration with no steps yet.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            steps: Vec::new(),
        }
    }

    /// Append a step to the end of the pipeline.
    pub fn add_step(mut self, step: Box<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Run every step in order.
    ///
    /// If a step raises [`StopPipeline`], remaining steps are skipped and
    /// [`ExitCode::Error`] is returned. Otherwise the worst exit code across
    /// all steps is returned.
    pub async fn run(&self) -> ExitCode {
        let mut total_code = ExitCode::Completed;
        let mut outputs: HashMap<String, PathBuf> = HashMap::new();

        for step in &self.steps {
            match step.run(&self.config, &outputs).await {
                Ok((output, code)) => {
                    if let Some(path) = output {
                        outputs.insert(step.name().to_string(), path);
                    }
                    total_code = total_code.max(code);
                }
                Err(stop) => {
                    tracing::error!(
                        step = step.name(),
                        reason = %stop.reason,
                        "pipeline stopped"
                    );
                    return ExitCode::Error;
                }
            }
        }
        total_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedStep {
        step_name: &'static str,
        code: ExitCode,
        output: Option<PathBuf>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Step for FixedStep {
        fn name(&self) -> &str {
            self.step_name
        }

        async fn run(
            &self,
            _config: &Config,
            _previous_steps_output: &HashMap<String, PathBuf>,
        ) -> Result<(Option<PathBuf>, ExitCode), StopPipeline> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.output.clone(), self.code))
        }
    }

    struct StoppingStep;

    #[async_trait]
    impl Step for StoppingStep {
        fn name(&self) -> &str {
            "stopping"
        }

        async fn run(
            &self,
            _config: &Config,
            _previous_steps_output: &HashMap<String, PathBuf>,
        ) -> Result<(Option<PathBuf>, ExitCode), StopPipeline> {
            Err(StopPipeline::new("no articles matched the query"))
        }
    }

    #[test]
    fn exit_code_ordering_is_completed_lt_incomplete_lt_error() {
        assert!(ExitCode::Completed < ExitCode::Incomplete);
        assert!(ExitCode::Incomplete < ExitCode::Error);
    }

    #[tokio::test]
    async fn aggregates_worst_exit_code_across_steps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(Config::default())
            .add_step(Box::new(FixedStep {
                step_name: "download",
                code: ExitCode::Completed,
                output: Some(PathBuf::from("/tmp/download")),
                calls: calls.clone(),
            }))
            .add_step(Box::new(FixedStep {
                step_name: "extract",
                code: ExitCode::Incomplete,
                output: Some(PathBuf::from("/tmp/extract")),
                calls: calls.clone(),
            }));

        let code = pipeline.run().await;
        assert_eq!(code, ExitCode::Incomplete);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_pipeline_aborts_remaining_steps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(Config::default())
            .add_step(Box::new(StoppingStep))
            .add_step(Box::new(FixedStep {
                step_name: "never-runs",
                code: ExitCode::Completed,
                output: None,
                calls: calls.clone(),
            }));

        let code = pipeline.run().await;
        assert_eq!(code, ExitCode::Error);
        assert_eq!(
            calls.load(Ordering::SeqCst),
            0,
            "step after StopPipeline must not run"
        );
    }

    #[tokio::test]
    async fn empty_pipeline_completes() {
        let pipeline = Pipeline::new(Config::default());
        assert_eq!(pipeline.run().await, ExitCode::Completed);
    }
}
