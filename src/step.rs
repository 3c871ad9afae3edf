//! Detect / decide / apply convergence steps.

use async_trait::async_trait;
use std::fmt::Debug;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::error::Result;
use crate::report::{RunReport, StepStatus};

/// What a step does with the state it detected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Already converged (or the operator declined); nothing runs
    Skip(String),
    Repair,
    Install,
}

/// How an `apply` failure affects the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Later steps depend on this one; abort the run
    Fatal,
    /// Log, record, and carry on partially provisioned
    Advisory,
}

/// One idempotent unit of provisioning.
///
/// `apply` must be safe to run any number of times. Errors that are fatal by
/// nature (see [`crate::error::ProvisionError::is_fatal`]) abort the run from
/// any phase; other errors follow [`ProvisioningStep::failure_policy`].
#[async_trait]
pub trait ProvisioningStep: Send + Sync {
    type State: Debug + Send + Sync;

    fn id(&self) -> &'static str;

    fn failure_policy(&self) -> FailurePolicy;

    async fn detect(&self, ctx: &mut RunContext<'_>) -> Result<Self::State>;

    fn decide(&self, state: &Self::State, ctx: &RunContext<'_>) -> Result<Decision>;

    /// Perform the decided action and describe what was done
    async fn apply(
        &self,
        decision: &Decision,
        state: &Self::State,
        ctx: &mut RunContext<'_>,
    ) -> Result<String>;
}

/// Drive one step through detect → decide → apply and record the outcome.
pub async fn converge<S: ProvisioningStep>(
    step: &S,
    ctx: &mut RunContext<'_>,
    report: &mut RunReport,
) -> Result<StepStatus> {
    let id = step.id();
    info!("▶️  {}", id);

    let outcome = drive(step, ctx).await;

    match outcome {
        Ok((status, detail)) => {
            info!("  {} → {:?}: {}", id, status, detail);
            report.record(id, status, detail);
            Ok(status)
        }
        Err(e) if e.is_fatal() || step.failure_policy() == FailurePolicy::Fatal => {
            report.record(id, StepStatus::Failed, e.to_string());
            Err(e)
        }
        Err(e) => {
            warn!("⚠️  {} failed (continuing): {}", id, e);
            report.record(id, StepStatus::Failed, e.to_string());
            Ok(StepStatus::Failed)
        }
    }
}

async fn drive<S: ProvisioningStep>(
    step: &S,
    ctx: &mut RunContext<'_>,
) -> Result<(StepStatus, String)> {
    let state = step.detect(ctx).await?;
    info!("  state: {:?}", state);
    match step.decide(&state, ctx)? {
        Decision::Skip(reason) => Ok((StepStatus::Skipped, reason)),
        decision => {
            let detail = step.apply(&decision, &state, ctx).await?;
            Ok((StepStatus::Applied, detail))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionConfig;
    use crate::error::{DriverError, ProvisionError, RuntimeError};
    use crate::fakes::{MemoryFetcher, ScriptedOperator, ScriptedRunner};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        present: bool,
        policy: FailurePolicy,
        fail_with: Option<fn() -> ProvisionError>,
        applied: AtomicUsize,
    }

    impl Counting {
        fn new(present: bool) -> Self {
            Self {
                present,
                policy: FailurePolicy::Advisory,
                fail_with: None,
                applied: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProvisioningStep for Counting {
        type State = bool;

        fn id(&self) -> &'static str {
            "counting"
        }

        fn failure_policy(&self) -> FailurePolicy {
            self.policy
        }

        async fn detect(&self, _ctx: &mut RunContext<'_>) -> Result<bool> {
            Ok(self.present)
        }

        fn decide(&self, present: &bool, _ctx: &RunContext<'_>) -> Result<Decision> {
            Ok(if *present {
                Decision::Skip("present".into())
            } else {
                Decision::Install
            })
        }

        async fn apply(
            &self,
            _decision: &Decision,
            _state: &bool,
            _ctx: &mut RunContext<'_>,
        ) -> Result<String> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok("installed".into()),
            }
        }
    }

    fn toolkit_down() -> ProvisionError {
        RuntimeError::ToolkitFailed {
            reason: "repo down".into(),
        }
        .into()
    }

    fn script_exploded() -> ProvisionError {
        anyhow::anyhow!("script exploded").into()
    }

    fn repair_declined() -> ProvisionError {
        DriverError::RepairDeclined.into()
    }

    async fn run(step: &Counting) -> (Result<StepStatus>, RunReport) {
        let runner = ScriptedRunner::new();
        let operator = ScriptedOperator::accept_all();
        let fetcher = MemoryFetcher::new();
        let config = ProvisionConfig::default();
        let mut ctx = RunContext::new(&runner, &operator, &fetcher, &config).unwrap();
        let mut report = RunReport::new();
        let status = converge(step, &mut ctx, &mut report).await;
        (status, report)
    }

    #[tokio::test]
    async fn skip_never_applies() {
        let step = Counting::new(true);
        let (status, report) = run(&step).await;
        assert_eq!(status.unwrap(), StepStatus::Skipped);
        assert_eq!(step.applied.load(Ordering::SeqCst), 0);
        assert_eq!(report.steps[0].detail, "present");
    }

    #[tokio::test]
    async fn advisory_failure_is_recorded_and_swallowed() {
        let mut step = Counting::new(false);
        step.fail_with = Some(toolkit_down);
        let (status, report) = run(&step).await;
        assert_eq!(status.unwrap(), StepStatus::Failed);
        assert_eq!(report.status_of("counting"), Some(StepStatus::Failed));
    }

    #[tokio::test]
    async fn fatal_policy_propagates() {
        let mut step = Counting::new(false);
        step.policy = FailurePolicy::Fatal;
        step.fail_with = Some(script_exploded);
        let (status, report) = run(&step).await;
        assert!(status.is_err());
        assert_eq!(report.status_of("counting"), Some(StepStatus::Failed));
    }

    #[tokio::test]
    async fn fatal_error_propagates_despite_advisory_policy() {
        let mut step = Counting::new(false);
        step.fail_with = Some(repair_declined);
        let (status, _) = run(&step).await;
        assert!(status.is_err());
    }
}
