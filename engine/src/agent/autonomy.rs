//! Autonomy loops
//!
//! Both loops repeat the same round: plan for the goal with recent logs as
//! context, enqueue the planned tasks, then execute as many tasks as were
//! planned (at least one), so planning never outpaces execution.
//!
//! - [`AgentCore::autonomy_cycle`] runs a bounded number of rounds and stops
//!   early once two consecutive rounds leave nothing to do.
//! - [`AgentCore::full_autonomy_loop`] runs until its [`StopToken`] is
//!   cancelled or the persisted `running` flag is cleared, and records a
//!   reflection over recent logs under `state.reflection` every few rounds.
//! - [`AutonomyController`] runs the continuous loop on a background task
//!   and allows at most one at a time.
//!
//! Both loops set `running = true` before their first round and end when
//! it is cleared, so `agenti stop` from another process reaches either.
//!
//! Stopping is cooperative: the token is checked between rounds and wakes
//! the inter-round wait, but a shell command already running finishes
//! (bounded by its own timeout).

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::core::{AgentCore, PhaseGuard, Result};
use super::reflection::reflect;
use crate::store::Mode;
use sdk::errors::EngineError;

/// Upper bound on rounds in one bounded cycle
pub const MAX_CYCLE_STEPS: usize = 50;

/// Consecutive empty rounds after which a bounded cycle gives up
const STALL_ROUNDS: usize = 2;

/// Continuous-loop rounds between persisted reflections
const REFLECT_EVERY: usize = 5;

/// Log entries scored by a persisted reflection
const REFLECTION_WINDOW: usize = 10;

/// Cooperative cancellation handle shared between a loop and its owner
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake any waiting loop
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration` unless cancelled first. Returns true if cancelled.
    pub async fn sleep_or_cancel(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
            _ = self.cancelled() => true,
        }
    }
}

/// Which loop holds the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Bounded,
    Continuous,
}

/// Loop state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopPhase {
    Idle,
    Running(RunKind),
    Stopped,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPhase::Idle => f.write_str("idle"),
            LoopPhase::Running(RunKind::Bounded) => f.write_str("running (bounded)"),
            LoopPhase::Running(RunKind::Continuous) => f.write_str("running (continuous)"),
            LoopPhase::Stopped => f.write_str("stopped"),
        }
    }
}

/// Why a loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The requested number of rounds ran
    StepsExhausted,
    /// Consecutive rounds added nothing and the queue stayed empty
    Stalled,
    /// The stop token was cancelled
    Cancelled,
    /// The persisted `running` flag was cleared
    StopRequested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::StepsExhausted => f.write_str("steps exhausted"),
            StopReason::Stalled => f.write_str("stalled"),
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::StopRequested => f.write_str("stop requested"),
        }
    }
}

/// Totals for one loop run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub rounds: usize,
    pub executed: usize,
    pub tasks_added: usize,
    pub stop_reason: StopReason,
    pub used_fallback_rounds: usize,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            rounds: 0,
            executed: 0,
            tasks_added: 0,
            stop_reason: StopReason::StepsExhausted,
            used_fallback_rounds: 0,
        }
    }

    fn absorb(&mut self, round: &RoundOutcome) {
        self.rounds += 1;
        self.tasks_added += round.added;
        self.executed += round.executed;
        if round.used_fallback {
            self.used_fallback_rounds += 1;
        }
    }
}

struct RoundOutcome {
    added: usize,
    executed: usize,
    used_fallback: bool,
    queue_len: usize,
}

impl RoundOutcome {
    fn is_empty(&self) -> bool {
        self.added == 0 && self.queue_len == 0
    }
}

fn clamp_steps(steps: usize) -> usize {
    let clamped = steps.clamp(1, MAX_CYCLE_STEPS);
    if clamped != steps {
        warn!(requested = steps, used = clamped, "cycle steps out of range, clamped");
    }
    clamped
}

impl AgentCore {
    /// Run at most `steps` plan/enqueue/execute rounds towards `goal`.
    ///
    /// `steps` is clamped into `1..=50`. Memory records `mode = "cycling"`
    /// and `running = true` while the cycle runs, then `mode = "idle"` and
    /// `running = false`. Clearing `running` from outside ends the cycle at
    /// its next round.
    pub async fn autonomy_cycle(
        &self,
        steps: usize,
        goal: &str,
        token: &StopToken,
    ) -> Result<CycleReport> {
        let steps = clamp_steps(steps);
        let _guard = self.enter_phase(RunKind::Bounded)?;

        self.store.update(|m| {
            m.state.mode = Some(Mode::Cycling);
            m.state.goal = Some(goal.to_string());
            m.state.running = Some(true);
        })?;
        info!(steps, goal, "autonomy cycle started");

        let result = self.run_bounded(steps, goal, token).await;
        self.store.update(|m| {
            m.state.mode = Some(Mode::Idle);
            m.state.running = Some(false);
        })?;

        let report = result?;
        info!(
            rounds = report.rounds,
            executed = report.executed,
            reason = %report.stop_reason,
            "autonomy cycle finished"
        );
        Ok(report)
    }

    async fn run_bounded(&self, steps: usize, goal: &str, token: &StopToken) -> Result<CycleReport> {
        let mut report = CycleReport::new();
        let mut empty_rounds = 0;

        report.stop_reason = loop {
            if report.rounds >= steps {
                break StopReason::StepsExhausted;
            }
            if let Some(reason) = self.stop_signal(token) {
                break reason;
            }

            let round = self.run_round(goal, token).await?;
            report.absorb(&round);

            if round.is_empty() {
                empty_rounds += 1;
                if empty_rounds >= STALL_ROUNDS {
                    break StopReason::Stalled;
                }
            } else {
                empty_rounds = 0;
            }
        };

        Ok(report)
    }

    /// Run rounds towards `goal` until stopped.
    ///
    /// Persists `mode = "autonomous"` and `running = true` on entry, and
    /// `mode = "stopped"`, `running = false` on exit. The token and the
    /// persisted flag are checked at the top of every iteration.
    pub async fn full_autonomy_loop(&self, goal: &str, token: &StopToken) -> Result<CycleReport> {
        let guard = self.enter_phase(RunKind::Continuous)?;
        self.mark_continuous(goal)?;
        self.run_continuous(guard, goal, token).await
    }

    /// Record the continuous loop as running. Done before the first round,
    /// and by the controller before spawning, so a stop persisted after
    /// this point is never overwritten.
    pub(crate) fn mark_continuous(&self, goal: &str) -> Result<()> {
        self.store.update(|m| {
            m.state.mode = Some(Mode::Autonomous);
            m.state.goal = Some(goal.to_string());
            m.state.running = Some(true);
        })?;
        info!(goal, "continuous autonomy loop started");
        Ok(())
    }

    pub(crate) async fn run_continuous(
        &self,
        _guard: PhaseGuard,
        goal: &str,
        token: &StopToken,
    ) -> Result<CycleReport> {
        let result = self.continuous_rounds(goal, token).await;
        self.store.update(|m| {
            m.state.mode = Some(Mode::Stopped);
            m.state.running = Some(false);
        })?;

        let report = result?;
        info!(
            rounds = report.rounds,
            executed = report.executed,
            reason = %report.stop_reason,
            "continuous autonomy loop stopped"
        );
        Ok(report)
    }

    async fn continuous_rounds(&self, goal: &str, token: &StopToken) -> Result<CycleReport> {
        let mut report = CycleReport::new();
        let iteration_delay = Duration::from_millis(self.autonomy.iteration_delay_ms);
        let idle_delay = Duration::from_millis(self.autonomy.idle_delay_ms);

        report.stop_reason = loop {
            if let Some(reason) = self.stop_signal(token) {
                break reason;
            }

            let round = self.run_round(goal, token).await?;
            report.absorb(&round);

            if report.rounds % REFLECT_EVERY == 0 {
                self.record_reflection()?;
            }

            let idle = round.added == 0 && round.executed == 0;
            let delay = if idle { idle_delay } else { iteration_delay };
            if token.sleep_or_cancel(delay).await {
                break StopReason::Cancelled;
            }
        };

        Ok(report)
    }

    /// The token first, then the persisted `running` flag
    fn stop_signal(&self, token: &StopToken) -> Option<StopReason> {
        if token.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if !self.store.load().state.is_running() {
            Some(StopReason::StopRequested)
        } else {
            None
        }
    }

    fn record_reflection(&self) -> Result<()> {
        self.store.update(|m| {
            let reflection = reflect(&m.logs, REFLECTION_WINDOW);
            debug!(
                success_rate = reflection.success_rate,
                bias = %reflection.bias,
                "recording reflection"
            );
            match serde_json::to_value(&reflection) {
                Ok(mut value) => {
                    if let Some(record) = value.as_object_mut() {
                        record.insert(
                            "timestamp".to_string(),
                            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true).into(),
                        );
                    }
                    m.state.extra.insert("reflection".to_string(), value);
                }
                Err(e) => warn!(error = %e, "failed to encode reflection"),
            }
        })?;
        Ok(())
    }

    async fn run_round(&self, goal: &str, token: &StopToken) -> Result<RoundOutcome> {
        let memory = self.store.load();
        let context = memory.recent_logs(self.planner.context_window());
        let outcome = self.planner.plan(goal, context).await;

        let added = outcome.plan.tasks.len();
        let mut queue_len = memory.tasks.len();
        if added > 0 {
            let tasks = outcome.plan.tasks;
            let (_, saved) = self.store.update(|m| m.tasks.extend(tasks))?;
            queue_len = saved.tasks.len();
        }

        let mut executed = 0;
        while executed < added.max(1) && !token.is_cancelled() {
            match self.executor.execute_next_task().await? {
                Some((entry, saved)) => {
                    debug!(task = %entry.task, "round executed task");
                    executed += 1;
                    queue_len = saved.tasks.len();
                }
                None => {
                    queue_len = 0;
                    break;
                }
            }
        }

        Ok(RoundOutcome {
            added,
            executed,
            used_fallback: outcome.used_fallback,
            queue_len,
        })
    }
}

struct ActiveLoop {
    token: StopToken,
    handle: JoinHandle<Result<CycleReport>>,
}

/// Supervises one background continuous loop
pub struct AutonomyController {
    agent: Arc<AgentCore>,
    active: Mutex<Option<ActiveLoop>>,
}

impl AutonomyController {
    pub fn new(agent: Arc<AgentCore>) -> Self {
        Self {
            agent,
            active: Mutex::new(None),
        }
    }

    pub fn agent(&self) -> &Arc<AgentCore> {
        &self.agent
    }

    /// Spawn the continuous loop for `goal` on the tokio runtime.
    ///
    /// Fails with `LoopAlreadyRunning` while a loop started by this
    /// controller, or any other loop on the same agent, is still active.
    pub fn start(&self, goal: &str) -> Result<StopToken> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if active.as_ref().is_some_and(|a| !a.handle.is_finished()) {
            return Err(EngineError::LoopAlreadyRunning);
        }

        let guard = self.agent.enter_phase(RunKind::Continuous)?;
        self.agent.mark_continuous(goal)?;
        let token = StopToken::new();
        let agent = Arc::clone(&self.agent);
        let loop_token = token.clone();
        let goal = goal.to_string();

        let handle = tokio::spawn(async move {
            agent.run_continuous(guard, &goal, &loop_token).await
        });

        *active = Some(ActiveLoop {
            token: token.clone(),
            handle,
        });
        Ok(token)
    }

    /// Cancel the running loop, then persist the stop.
    ///
    /// The in-memory token is cancelled first so the loop reacts even if the
    /// write fails.
    pub fn stop(&self) -> Result<()> {
        if let Some(active) = self
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
        {
            active.token.cancel();
        }
        self.agent.request_stop()
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|a| !a.handle.is_finished())
    }

    /// Wait for the loop to finish and return its report
    pub async fn join(&self) -> Result<CycleReport> {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let Some(active) = active else {
            return Err(EngineError::LoopNotRunning);
        };

        match active.handle.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::LoopFailed(e.to_string())),
        }
    }
}
