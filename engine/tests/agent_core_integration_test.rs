//! Integration tests for the agent core and autonomy loops
//!
//! Validates queue semantics and loop termination end to end against a
//! real memory file:
//! - FIFO execution and per-task logging
//! - Offline planning for `llm:` directives
//! - Bounded cycles: step limit and stall detection
//! - Continuous loop: controller start/stop and persisted stop requests

#![cfg(unix)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use agenti_engine::agent::{AgentCore, AutonomyController, LoopPhase, StopReason, StopToken};
use agenti_engine::config::Config;
use agenti_engine::llm::{GenerationRequest, LLMProvider, OfflineProvider};
use agenti_engine::store::Mode;
use agenti_engine::task::Task;
use sdk::errors::EngineError;

/// Provider that replays scripted replies, repeating the last one
struct MockLLMProvider {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl MockLLMProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            last: Mutex::new(r#"{"answer": null, "tasks": []}"#.to_string()),
        }
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate(&self, _request: &GenerationRequest) -> agenti_engine::llm::Result<String> {
        let next = self.replies.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = next {
            *last = reply;
        }
        Ok(last.clone())
    }
}

fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::with_data_dir(temp.path());
    config.executor.shell = Some("/bin/sh".to_string());
    config.autonomy.iteration_delay_ms = 10;
    config.autonomy.idle_delay_ms = 10;
    config
}

fn offline_agent(temp: &TempDir) -> AgentCore {
    AgentCore::with_provider(&test_config(temp), Arc::new(OfflineProvider))
}

fn mock_agent(temp: &TempDir, replies: &[&str]) -> AgentCore {
    AgentCore::with_provider(&test_config(temp), Arc::new(MockLLMProvider::new(replies)))
}

#[tokio::test]
async fn test_echo_hello_end_to_end() {
    let temp = TempDir::new().unwrap();
    let agent = offline_agent(&temp);

    assert!(agent.enqueue("echo hello").unwrap());
    let (entry, memory) = agent.execute_next_task().await.unwrap().unwrap();

    assert!(entry.output.contains("hello"));
    assert_eq!(memory.state.last_task.as_deref(), Some("echo hello"));
    assert_eq!(memory.logs.len(), 1);
    assert!(agent.execute_next_task().await.unwrap().is_none());
}

#[tokio::test]
async fn test_llm_directive_offline_enqueues_follow_up() {
    let temp = TempDir::new().unwrap();
    let agent = offline_agent(&temp);

    assert!(agent.enqueue("llm: summarize").unwrap());
    let (entry, memory) = agent.execute_next_task().await.unwrap().unwrap();

    assert_eq!(entry.task, "llm: summarize");
    assert!(!entry.output.is_empty());
    assert!(!memory.tasks.is_empty());
    assert_eq!(memory.logs.len(), 1);
}

#[tokio::test]
async fn test_fifo_order() {
    let temp = TempDir::new().unwrap();
    let agent = offline_agent(&temp);

    for raw in ["echo a", "echo b", "echo c"] {
        agent.enqueue(raw).unwrap();
    }
    for expected in ["echo a", "echo b", "echo c"] {
        let (entry, _) = agent.execute_next_task().await.unwrap().unwrap();
        assert_eq!(entry.task, expected);
    }

    let tasks: Vec<String> = agent
        .get_memory()
        .logs
        .iter()
        .map(|e| e.task.clone())
        .collect();
    assert_eq!(tasks, vec!["echo a", "echo b", "echo c"]);
}

#[tokio::test]
async fn test_failing_command_is_logged_not_fatal() {
    let temp = TempDir::new().unwrap();
    let agent = offline_agent(&temp);

    agent.enqueue("ls /definitely/not/here").unwrap();
    let (entry, _) = agent.execute_next_task().await.unwrap().unwrap();
    assert!(!entry.output.contains("[exit status: 0]"));
    assert!(entry.output.contains("[exit status: "));
}

#[tokio::test]
async fn test_planned_tasks_from_model() {
    let temp = TempDir::new().unwrap();
    let agent = mock_agent(
        &temp,
        &[r#"Plan: {"answer": "checking", "tasks": ["echo planned", "count the files"]}"#],
    );

    agent.enqueue("llm: look around").unwrap();
    let (entry, memory) = agent.execute_next_task().await.unwrap().unwrap();

    assert_eq!(entry.output, "checking");
    assert_eq!(
        memory.tasks,
        vec![Task::shell("echo planned"), Task::directive("count the files")]
    );
}

#[tokio::test]
async fn test_cycle_respects_step_limit() {
    let temp = TempDir::new().unwrap();
    let agent = offline_agent(&temp);
    let token = StopToken::new();

    let report = agent.autonomy_cycle(3, "x", &token).await.unwrap();

    assert_eq!(report.rounds, 3);
    assert_eq!(report.stop_reason, StopReason::StepsExhausted);
    assert_eq!(report.used_fallback_rounds, 3);
    assert_eq!(report.executed, 3);

    let memory = agent.get_memory();
    assert_eq!(memory.logs.len(), 3);
    assert_eq!(memory.state.mode, Some(Mode::Idle));
    assert_eq!(memory.state.goal.as_deref(), Some("x"));
    assert_eq!(agent.phase(), LoopPhase::Idle);
}

#[tokio::test]
async fn test_cycle_stalls_after_two_empty_rounds() {
    let temp = TempDir::new().unwrap();
    let agent = mock_agent(&temp, &[]);
    let token = StopToken::new();

    let report = agent.autonomy_cycle(10, "nothing to do", &token).await.unwrap();

    assert_eq!(report.rounds, 2);
    assert_eq!(report.executed, 0);
    assert_eq!(report.stop_reason, StopReason::Stalled);
    assert_eq!(report.used_fallback_rounds, 0);
}

#[tokio::test]
async fn test_cycle_drains_queue_before_stalling() {
    let temp = TempDir::new().unwrap();
    let agent = mock_agent(&temp, &[]);
    agent.enqueue("echo one").unwrap();
    agent.enqueue("echo two").unwrap();

    let report = agent
        .autonomy_cycle(10, "drain", &StopToken::new())
        .await
        .unwrap();

    // Round 1 leaves one task queued, rounds 2 and 3 end empty
    assert_eq!(report.executed, 2);
    assert_eq!(report.rounds, 3);
    assert_eq!(report.stop_reason, StopReason::Stalled);
}

#[tokio::test]
async fn test_cycle_zero_steps_runs_once() {
    let temp = TempDir::new().unwrap();
    let agent = offline_agent(&temp);

    let report = agent
        .autonomy_cycle(0, "x", &StopToken::new())
        .await
        .unwrap();
    assert_eq!(report.rounds, 1);
}

#[tokio::test]
async fn test_cancelled_token_stops_cycle_immediately() {
    let temp = TempDir::new().unwrap();
    let agent = offline_agent(&temp);
    let token = StopToken::new();
    token.cancel();

    let report = agent.autonomy_cycle(5, "x", &token).await.unwrap();
    assert_eq!(report.rounds, 0);
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert!(agent.get_memory().logs.is_empty());
}

#[tokio::test]
async fn test_controller_start_stop() {
    let temp = TempDir::new().unwrap();
    let controller = AutonomyController::new(Arc::new(offline_agent(&temp)));

    controller.start("keep busy").unwrap();
    assert!(controller.is_running());
    assert!(matches!(
        controller.start("again"),
        Err(EngineError::LoopAlreadyRunning)
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.stop().unwrap();

    let report = tokio::time::timeout(Duration::from_secs(10), controller.join())
        .await
        .expect("loop did not stop")
        .unwrap();
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert!(!controller.is_running());

    let memory = controller.agent().get_memory();
    assert_eq!(memory.state.running, Some(false));
    assert_eq!(memory.state.mode, Some(Mode::Stopped));
    assert_eq!(controller.agent().phase(), LoopPhase::Stopped);

    // The slot is free again once the loop has finished
    controller.start("second run").unwrap();
    controller.stop().unwrap();
    controller.join().await.unwrap();
}

#[tokio::test]
async fn test_join_without_loop() {
    let temp = TempDir::new().unwrap();
    let controller = AutonomyController::new(Arc::new(offline_agent(&temp)));
    assert!(matches!(
        controller.join().await,
        Err(EngineError::LoopNotRunning)
    ));
}

#[tokio::test]
async fn test_persisted_stop_ends_continuous_loop() {
    let temp = TempDir::new().unwrap();
    let agent = Arc::new(mock_agent(&temp, &[]));
    let token = StopToken::new();

    let loop_agent = Arc::clone(&agent);
    let loop_token = token.clone();
    let handle = tokio::spawn(async move {
        loop_agent
            .full_autonomy_loop("wait", &loop_token)
            .await
    });

    // Wait until the loop has announced itself before asking it to stop
    tokio::time::timeout(Duration::from_secs(5), async {
        while !agent.get_memory().state.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("loop never started");

    assert!(matches!(
        agent.autonomy_cycle(1, "x", &StopToken::new()).await,
        Err(EngineError::LoopAlreadyRunning)
    ));

    agent.request_stop().unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not observe the stop request")
        .unwrap()
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::StopRequested);
    assert!(!token.is_cancelled());
    assert_eq!(agent.get_memory().state.mode, Some(Mode::Stopped));
}

#[tokio::test]
async fn test_stop_right_after_start_is_honored() {
    let temp = TempDir::new().unwrap();
    let controller = AutonomyController::new(Arc::new(offline_agent(&temp)));

    controller.start("g").unwrap();
    let state = controller.agent().get_memory().state;
    assert_eq!(state.running, Some(true));
    assert_eq!(state.mode, Some(Mode::Autonomous));

    controller.agent().request_stop().unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), controller.join())
        .await
        .expect("stop request was lost")
        .unwrap();
    assert_eq!(report.stop_reason, StopReason::StopRequested);
    assert_eq!(report.rounds, 0);
    assert_eq!(controller.agent().get_memory().state.running, Some(false));
}

#[tokio::test]
async fn test_second_agent_on_same_memory_file_is_rejected() {
    let temp = TempDir::new().unwrap();
    let first = AutonomyController::new(Arc::new(offline_agent(&temp)));
    let second = AutonomyController::new(Arc::new(offline_agent(&temp)));

    first.start("a").unwrap();
    assert!(matches!(
        second.start("b"),
        Err(EngineError::LoopAlreadyRunning)
    ));
    assert!(!second.is_running());
    assert_eq!(first.agent().get_memory().state.goal.as_deref(), Some("a"));

    first.stop().unwrap();
    first.join().await.unwrap();

    // Released once the first loop is gone
    second.start("b").unwrap();
    second.stop().unwrap();
    second.join().await.unwrap();
}

#[tokio::test]
async fn test_persisted_stop_ends_bounded_cycle() {
    let temp = TempDir::new().unwrap();
    let agent = Arc::new(mock_agent(
        &temp,
        &[r#"{"answer": null, "tasks": ["sleep 0.2"]}"#],
    ));

    let cycle_agent = Arc::clone(&agent);
    let handle = tokio::spawn(async move {
        cycle_agent
            .autonomy_cycle(50, "slow", &StopToken::new())
            .await
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while !agent.get_memory().state.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cycle never started");

    agent.request_stop().unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cycle did not observe the stop request")
        .unwrap()
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::StopRequested);
    assert!(report.rounds < 50);
    let state = agent.get_memory().state;
    assert_eq!(state.mode, Some(Mode::Idle));
    assert_eq!(state.running, Some(false));
}

#[tokio::test]
async fn test_earlier_stop_does_not_block_new_cycle() {
    let temp = TempDir::new().unwrap();
    let agent = offline_agent(&temp);
    agent.request_stop().unwrap();

    let report = agent
        .autonomy_cycle(2, "x", &StopToken::new())
        .await
        .unwrap();
    assert_eq!(report.rounds, 2);
    assert_eq!(report.stop_reason, StopReason::StepsExhausted);
}

#[tokio::test]
async fn test_round_drains_what_it_planned() {
    let temp = TempDir::new().unwrap();
    let agent = mock_agent(
        &temp,
        &[r#"{"answer": null, "tasks": ["echo a", "echo b", "echo c"]}"#],
    );

    let report = agent
        .autonomy_cycle(3, "fan out", &StopToken::new())
        .await
        .unwrap();

    assert_eq!(report.tasks_added, 9);
    assert_eq!(report.executed, 9);
    assert!(agent.get_memory().tasks.is_empty());
}

#[tokio::test]
async fn test_continuous_loop_records_reflection() {
    let temp = TempDir::new().unwrap();
    let controller = AutonomyController::new(Arc::new(offline_agent(&temp)));
    controller.start("reflect").unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while !controller
            .agent()
            .get_memory()
            .state
            .extra
            .contains_key("reflection")
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no reflection recorded");

    controller.stop().unwrap();
    controller.join().await.unwrap();

    let memory = controller.agent().get_memory();
    let reflection = &memory.state.extra["reflection"];
    assert_eq!(reflection["bias"], "reinforce");
    assert!(reflection["sample_size"].as_u64().unwrap() >= 5);
    assert!(reflection["timestamp"].is_string());
}
