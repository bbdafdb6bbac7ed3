//! Agent Core
//!
//! `AgentCore` is the single entry point a presentation layer needs. It
//! owns the store handle and wires the classifier, planner and executor
//! together:
//!
//! ```text
//! enqueue ─► Classifier ─► Store.tasks ─► Executor ─► Store.logs
//!                              ▲                          │
//!                              └──── Planner ◄────────────┘
//! ```
//!
//! The bounded and continuous loops live in [`super::autonomy`].

use sdk::errors::EngineError;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::autonomy::{LoopPhase, RunKind};
use crate::config::{AutonomyConfig, Config};
use crate::executor::{Executor, ShellRunner};
use crate::llm::{build_provider, LLMProvider};
use crate::planner::{Planner, PlannerSettings};
use crate::store::{LockError, LogEntry, Memory, Mode, PidLock, Store};
use crate::task::Classifier;

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, EngineError>;

pub struct AgentCore {
    pub(super) store: Arc<Store>,
    pub(super) classifier: Classifier,
    pub(super) planner: Arc<Planner>,
    pub(super) executor: Executor,
    pub(super) autonomy: AutonomyConfig,
    phase: Arc<Mutex<LoopPhase>>,
}

impl AgentCore {
    /// Build an agent from configuration, using the configured provider
    pub fn from_config(config: &Config) -> Self {
        Self::with_provider(config, build_provider(&config.llm))
    }

    /// Build an agent from configuration with an explicit provider
    pub fn with_provider(config: &Config, provider: Arc<dyn LLMProvider>) -> Self {
        let store = Arc::new(Store::from_config(config));
        let classifier =
            Classifier::with_extra_executables(config.classifier.extra_executables.iter().cloned());
        let planner = Arc::new(Planner::with_settings(
            provider,
            classifier.clone(),
            PlannerSettings::from_config(config),
        ));
        let executor = Executor::new(
            Arc::clone(&store),
            Arc::clone(&planner),
            ShellRunner::from_config(&config.executor),
        );

        Self {
            store,
            classifier,
            planner,
            executor,
            autonomy: config.autonomy.clone(),
            phase: Arc::new(Mutex::new(LoopPhase::Idle)),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Classify `raw` and append it to the queue.
    ///
    /// Returns `false` when the input was dropped (empty or fence-only); in
    /// that case nothing is written.
    pub fn enqueue(&self, raw: &str) -> Result<bool> {
        if self.classifier.classify(raw).is_none() {
            debug!("input rejected, nothing enqueued");
            return Ok(false);
        }

        let (task, memory) = self
            .store
            .update(|m| self.classifier.classify_and_enqueue(raw, m))?;
        if let Some(task) = &task {
            info!(task = %task, queued = memory.tasks.len(), "task enqueued");
        }
        Ok(task.is_some())
    }

    /// Run the oldest queued task; `None` when the queue is empty
    pub async fn execute_next_task(&self) -> Result<Option<(LogEntry, Memory)>> {
        self.executor.execute_next_task().await
    }

    /// Current persisted memory
    pub fn get_memory(&self) -> Memory {
        self.store.load()
    }

    /// Ask any running loop, bounded or continuous, to stop at its next
    /// iteration.
    ///
    /// Only the persisted flag is touched, so this also reaches a loop
    /// running in another process that shares the memory file.
    pub fn request_stop(&self) -> Result<()> {
        self.store.update(|m| {
            m.state.running = Some(false);
            m.state.mode = Some(Mode::Stopped);
        })?;
        info!("stop requested");
        Ok(())
    }

    /// Phase of the loop driven by this agent
    pub fn phase(&self) -> LoopPhase {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Path of the PID lock held while a loop runs on this memory file
    pub fn loop_lock_path(&self) -> std::path::PathBuf {
        self.store.sibling_path("pid")
    }

    /// Claim the loop slot. Fails if a loop is already running, in this
    /// process or any other process sharing the memory file.
    pub(crate) fn enter_phase(&self, kind: RunKind) -> Result<PhaseGuard> {
        let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        if matches!(*phase, LoopPhase::Running(_)) {
            return Err(EngineError::LoopAlreadyRunning);
        }

        let lock = match PidLock::try_acquire(&self.loop_lock_path()) {
            Ok(lock) => lock,
            Err(LockError::Held { pid, .. }) => {
                warn!(holder = pid, "another autonomy loop holds this memory file");
                return Err(EngineError::LoopAlreadyRunning);
            }
            Err(LockError::Contended { .. }) => return Err(EngineError::LoopAlreadyRunning),
            Err(e) => return Err(EngineError::Persistence(format!("loop lock: {}", e))),
        };

        *phase = LoopPhase::Running(kind);
        Ok(PhaseGuard {
            phase: Arc::clone(&self.phase),
            on_exit: match kind {
                RunKind::Bounded => LoopPhase::Idle,
                RunKind::Continuous => LoopPhase::Stopped,
            },
            _lock: lock,
        })
    }
}

/// Releases the loop slot and its PID lock when dropped
pub(crate) struct PhaseGuard {
    phase: Arc<Mutex<LoopPhase>>,
    on_exit: LoopPhase,
    _lock: PidLock,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = self.on_exit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::OfflineProvider;
    use crate::task::Task;
    use tempfile::TempDir;

    fn agent(temp: &TempDir) -> AgentCore {
        AgentCore::with_provider(&Config::with_data_dir(temp.path()), Arc::new(OfflineProvider))
    }

    #[test]
    fn test_enqueue_classifies() {
        let temp = TempDir::new().unwrap();
        let agent = agent(&temp);

        assert!(agent.enqueue("ls -la").unwrap());
        assert!(agent.enqueue("what is my ip").unwrap());
        assert_eq!(
            agent.get_memory().tasks,
            vec![Task::shell("ls -la"), Task::directive("what is my ip")]
        );
    }

    #[test]
    fn test_rejected_input_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let agent = agent(&temp);

        assert!(!agent.enqueue("   ").unwrap());
        assert!(!agent.enqueue("```bash\nls\n```").unwrap());
        assert!(!agent.store().path().exists());
    }

    #[test]
    fn test_request_stop_persists() {
        let temp = TempDir::new().unwrap();
        let agent = agent(&temp);

        agent.request_stop().unwrap();
        let state = agent.get_memory().state;
        assert_eq!(state.running, Some(false));
        assert_eq!(state.mode, Some(Mode::Stopped));
    }

    #[test]
    fn test_phase_guard_rejects_second_claim() {
        let temp = TempDir::new().unwrap();
        let agent = agent(&temp);

        let guard = agent.enter_phase(RunKind::Continuous).unwrap();
        assert_eq!(agent.phase(), LoopPhase::Running(RunKind::Continuous));
        assert!(matches!(
            agent.enter_phase(RunKind::Bounded),
            Err(EngineError::LoopAlreadyRunning)
        ));

        drop(guard);
        assert_eq!(agent.phase(), LoopPhase::Stopped);
        assert!(agent.enter_phase(RunKind::Bounded).is_ok());
    }

    #[test]
    fn test_loop_slot_is_shared_through_memory_file() {
        let temp = TempDir::new().unwrap();
        let first = agent(&temp);
        let second = agent(&temp);

        let guard = first.enter_phase(RunKind::Continuous).unwrap();
        assert!(first.loop_lock_path().exists());
        assert!(matches!(
            second.enter_phase(RunKind::Bounded),
            Err(EngineError::LoopAlreadyRunning)
        ));
        assert_eq!(second.phase(), LoopPhase::Idle);

        drop(guard);
        assert!(!first.loop_lock_path().exists());
        assert!(second.enter_phase(RunKind::Bounded).is_ok());
    }

    #[test]
    fn test_stale_loop_lock_is_taken_over() {
        let temp = TempDir::new().unwrap();
        let agent = agent(&temp);
        std::fs::write(agent.loop_lock_path(), "2147483646").unwrap();

        let _guard = agent.enter_phase(RunKind::Bounded).unwrap();
        assert_eq!(
            crate::store::lock::read_holder(&agent.loop_lock_path()).unwrap(),
            Some(std::process::id())
        );
    }
}
