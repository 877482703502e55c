//! Scan orchestration.
//!
//! Runs every eligible module as its own task under a per-attempt timeout
//! and a retry budget, then hands the collected results and errors to the
//! aggregator.

use crate::analysis::aggregate;
use crate::config::{ApiKeys, Config};
use crate::models::{ErrorKind, ModuleError, PartialResult, Query, Report, ScanStatus};
use crate::modules::{Module, ScanContext};
use crate::net::{AnonymityRouter, RateLimiter};
use crate::registry::ModuleRegistry;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeout, retry and cancellation settings, fixed for the orchestrator's lifetime.
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    pub module_timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub cancel_grace: Duration,
    pub require_anonymity: bool,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            module_timeout: Duration::from_secs(30),
            retries: 1,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
            cancel_grace: Duration::from_secs(2),
            require_anonymity: false,
        }
    }
}

impl ScanPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            module_timeout: config.scan.module_timeout(),
            retries: config.scan.retries,
            backoff_base: config.scan.backoff_base(),
            backoff_max: config.scan.backoff_max(),
            cancel_grace: config.scan.cancel_grace(),
            require_anonymity: config.anonymity.require,
        }
    }

    /// Delay before retry number `attempt + 1`: base doubled per attempt, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    fn should_retry(&self, error: &ModuleError, attempt: u32) -> bool {
        error.retryable
            && !matches!(error.kind, ErrorKind::InvalidTarget | ErrorKind::AuthFailure)
            && attempt < self.retries
    }
}

/// Lifecycle of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl From<ScanStatus> for ScanState {
    fn from(status: ScanStatus) -> Self {
        match status {
            ScanStatus::Completed => ScanState::Completed,
            ScanStatus::PartiallyCompleted => ScanState::PartiallyCompleted,
            ScanStatus::Failed => ScanState::Failed,
        }
    }
}

pub struct Orchestrator {
    registry: Arc<ModuleRegistry>,
    limiter: Arc<RateLimiter>,
    router: Arc<AnonymityRouter>,
    keys: Arc<ApiKeys>,
    policy: ScanPolicy,
    state: Mutex<ScanState>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        limiter: Arc<RateLimiter>,
        router: Arc<AnonymityRouter>,
        keys: Arc<ApiKeys>,
        policy: ScanPolicy,
    ) -> Self {
        Self {
            registry,
            limiter,
            router,
            keys,
            policy,
            state: Mutex::new(ScanState::Pending),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ScanState) {
        debug!("Scan state -> {:?}", state);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Signal every in-flight module to stop.
    pub fn cancel_scan(&self) {
        if !self.cancel.is_cancelled() {
            info!("Cancelling scan");
        }
        self.cancel.cancel();
    }

    /// Run all eligible modules and aggregate their outcomes.
    ///
    /// Always produces a report, even when every module failed or the
    /// scan was cancelled.
    pub async fn start_scan(&self, query: Query) -> Report {
        self.set_state(ScanState::Running);

        let modules = self.registry.modules_for(query.query_type()).to_vec();
        info!(
            "Starting {} scan of '{}' with {} modules",
            query.query_type(),
            query.value(),
            modules.len()
        );

        let cancel = self.cancel.child_token();
        let ctx = ScanContext::new(
            self.limiter.clone(),
            self.router.clone(),
            self.keys.clone(),
            cancel.clone(),
        )
        .requiring_anonymity(self.policy.require_anonymity || query.flag("anonymous"));
        let query = Arc::new(query);

        let mut aborts = Vec::with_capacity(modules.len());
        let mut running = FuturesUnordered::new();
        for module in modules {
            let name = module.name();
            debug!("Launching module '{}'", name);
            let task = tokio::spawn(run_module(
                module,
                query.clone(),
                ctx.clone(),
                self.policy.clone(),
            ));
            aborts.push(task.abort_handle());
            running.push(async move { (name, task.await) });
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();
        let mut grace_deadline: Option<Instant> = None;

        loop {
            let grace_elapsed = async move {
                match grace_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                next = running.next() => match next {
                    Some((name, outcome)) => record(name, outcome, &mut results, &mut errors),
                    None => break,
                },
                _ = cancel.cancelled(), if grace_deadline.is_none() => {
                    info!("Waiting up to {:?} for modules to stop", self.policy.cancel_grace);
                    grace_deadline = Some(Instant::now() + self.policy.cancel_grace);
                }
                _ = grace_elapsed => {
                    warn!("Grace period elapsed, aborting {} modules", running.len());
                    break;
                }
            }
        }

        // Aborted tasks still report through their join handle
        for abort in &aborts {
            abort.abort();
        }
        while let Some((name, outcome)) = running.next().await {
            record(name, outcome, &mut results, &mut errors);
        }

        let report = aggregate(&query, results, errors);
        self.set_state(report.status().into());
        info!(
            "Scan {}: {}/{} modules succeeded",
            report.status(),
            report.succeeded_modules().len(),
            report.eligible_modules()
        );
        report
    }
}

fn record(
    name: &str,
    outcome: Result<Result<PartialResult, ModuleError>, JoinError>,
    results: &mut Vec<PartialResult>,
    errors: &mut Vec<ModuleError>,
) {
    match outcome {
        Ok(Ok(result)) => {
            debug!("Module '{}' finished with {} fields", name, result.fields.len());
            results.push(result);
        }
        Ok(Err(error)) => {
            warn!("Module '{}' failed: {}", name, error.message);
            errors.push(error);
        }
        Err(e) if e.is_panic() => {
            warn!("Module '{}' panicked", name);
            errors.push(ModuleError::unknown(name, "module panicked"));
        }
        Err(_) => errors.push(ModuleError::cancelled(name)),
    }
}

/// One module's attempts, with timeout and backoff between retries.
async fn run_module(
    module: Arc<dyn Module>,
    query: Arc<Query>,
    ctx: ScanContext,
    policy: ScanPolicy,
) -> Result<PartialResult, ModuleError> {
    let name = module.name();
    let mut attempt = 0;

    loop {
        ctx.checkpoint(name)?;
        let started = Instant::now();

        let outcome = match tokio::time::timeout(policy.module_timeout, module.investigate(&query, &ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Module '{}' timed out after {:?}", name, policy.module_timeout);
                Err(ModuleError::timeout(name, policy.module_timeout))
            }
        };

        match outcome {
            Ok(mut result) => {
                result.module_name = name.to_string();
                if result.source_latency_ms == 0 {
                    result.source_latency_ms = started.elapsed().as_millis() as u64;
                }
                return Ok(result);
            }
            Err(mut error) => {
                error.module_name = name.to_string();
                if !policy.should_retry(&error, attempt) || ctx.is_cancelled() {
                    return Err(error);
                }

                let delay = policy.backoff_for(attempt);
                info!("Retrying '{}' in {:?} ({})", name, delay, error.message);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancellation().cancelled() => return Err(ModuleError::cancelled(name)),
                }
                attempt += 1;
            }
        }
    }
}
