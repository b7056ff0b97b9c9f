//! Supervisor and lifecycle behaviour with scripted agents

use async_trait::async_trait;
use ftba_broker::{Broker, BrokerError};
use ftba_core::{Direction, Message, MessageType, Payload, TradeProposal};
use ftba_runtime::{
    Agent, AgentConfig, AgentContext, AgentError, AgentState, Operation, Supervisor,
    SupervisorConfig, SupervisorError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

type Journal = Arc<Mutex<Vec<String>>>;

/// Behaviour of a scripted agent
#[derive(Clone)]
struct Script {
    subscribe: Vec<MessageType>,
    fail_setup: bool,
    fail_on: Option<MessageType>,
    handler_delay: Option<Duration>,
    cleanup_delay: Option<Duration>,
    interval_secs: f64,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            subscribe: Vec::new(),
            fail_setup: false,
            fail_on: None,
            handler_delay: None,
            cleanup_delay: None,
            interval_secs: 3600.0,
        }
    }
}

struct Scripted {
    id: String,
    script: Script,
    journal: Journal,
}

impl Scripted {
    fn log(&self, event: impl std::fmt::Display) {
        self.journal.lock().push(format!("{}:{}", self.id, event));
    }
}

#[async_trait]
impl Agent for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn setup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        self.log("setup");
        if self.script.fail_setup {
            anyhow::bail!("missing credentials");
        }
        ctx.subscribe(self.script.subscribe.clone())?;
        Ok(())
    }

    async fn process_cycle(&mut self, _ctx: &AgentContext) -> anyhow::Result<()> {
        self.log("cycle");
        Ok(())
    }

    async fn handle_message(&mut self, _ctx: &AgentContext, message: &Message) -> anyhow::Result<()> {
        let label = match message.payload() {
            Payload::AgentStatus(status) => format!("{}={}", status.agent_id, status.state),
            Payload::Custom { body, .. } => body["seq"].to_string(),
            Payload::TradeProposal(proposal) => proposal.symbol.clone(),
            _ => String::new(),
        };
        self.log(format!("msg:{}:{}", message.message_type(), label));

        if self.script.fail_on.as_ref() == Some(&message.message_type()) {
            anyhow::bail!("cannot process {}", message.message_type());
        }
        if let Some(delay) = self.script.handler_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &AgentContext) -> anyhow::Result<()> {
        self.log("cleanup");
        if let Some(delay) = self.script.cleanup_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

fn add(supervisor: &mut Supervisor, id: &str, script: Script, journal: &Journal) {
    let journal = journal.clone();
    let config = AgentConfig::new(id, "scripted").with_interval_secs(script.interval_secs);
    supervisor
        .add_agent(config, move |config| {
            let agent: Box<dyn Agent> = Box::new(Scripted {
                id: config.agent_id.clone(),
                script: script.clone(),
                journal: journal.clone(),
            });
            Ok(agent)
        })
        .unwrap();
}

fn entries(journal: &Journal, prefix: &str) -> Vec<String> {
    journal
        .lock()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .cloned()
        .collect()
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn proposal_message() -> Message {
    let proposal = TradeProposal::new("EUR/USD", Direction::Long, rust_decimal::Decimal::ONE, "t");
    Message::new("strategy", Payload::from(proposal))
}

fn tick(seq: u64) -> Message {
    Message::new(
        "producer",
        Payload::custom("work", serde_json::json!({ "seq": seq })),
    )
}

#[tokio::test]
async fn test_faulted_executor_leaves_risk_running() {
    let _ = env_logger::try_init();
    let broker = Arc::new(Broker::new());
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());
    let journal = Journal::default();

    add(
        &mut supervisor,
        "exec",
        Script {
            subscribe: vec![MessageType::TradeProposal],
            fail_on: Some(MessageType::TradeProposal),
            ..Default::default()
        },
        &journal,
    );
    add(
        &mut supervisor,
        "risk",
        Script {
            subscribe: vec![MessageType::TradeProposal],
            ..Default::default()
        },
        &journal,
    );
    add(
        &mut supervisor,
        "monitor",
        Script {
            subscribe: vec![MessageType::AgentStatus],
            ..Default::default()
        },
        &journal,
    );
    assert!(supervisor.start_all().await.is_complete());

    broker.publish(proposal_message());

    let fault = tokio::time::timeout(Duration::from_secs(2), supervisor.next_fault())
        .await
        .expect("fault should be reported")
        .unwrap();
    assert_eq!(fault.agent_id, "exec");
    assert_eq!(fault.operation, Operation::HandleMessage);
    assert!(fault.message_id.is_some());

    eventually("risk to handle the proposal", || {
        entries(&journal, "risk:msg").len() == 1
    })
    .await;
    eventually("monitor to see the fault", || {
        entries(&journal, "monitor:msg")
            .iter()
            .any(|e| e.ends_with("exec=FAULTED"))
    })
    .await;

    // Risk keeps consuming after the executor is gone
    broker.publish(proposal_message());
    eventually("risk to handle a second proposal", || {
        entries(&journal, "risk:msg").len() == 2
    })
    .await;

    let report = supervisor.status_report();
    let exec = report.agent("exec").unwrap();
    assert_eq!(exec.snapshot.state, AgentState::Faulted);
    assert!(
        exec.snapshot
            .last_fault
            .as_deref()
            .unwrap()
            .contains("cannot process TRADE_PROPOSAL")
    );
    assert_eq!(report.agent("risk").unwrap().snapshot.state, AgentState::Running);
    assert_eq!(report.faulted().len(), 1);
    assert_eq!(report.faults.len(), 1);
    assert!(report.to_string().contains("exec"));

    // Cleanup ran once for the faulted agent
    assert_eq!(entries(&journal, "exec:cleanup").len(), 1);

    let shutdown = supervisor.stop_all(Duration::from_secs(1)).await;
    assert_eq!(shutdown.faulted, vec!["exec".to_string()]);
    assert_eq!(shutdown.stopped.len(), 2);
    assert!(shutdown.is_clean());
}

#[tokio::test]
async fn test_setup_failure_does_not_block_startup() {
    let _ = env_logger::try_init();
    let broker = Arc::new(Broker::new());
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());
    let journal = Journal::default();

    add(&mut supervisor, "a", Script::default(), &journal);
    add(
        &mut supervisor,
        "b",
        Script {
            fail_setup: true,
            ..Default::default()
        },
        &journal,
    );
    add(&mut supervisor, "c", Script::default(), &journal);

    let report = supervisor.start_all().await;
    assert_eq!(report.started, vec!["a".to_string(), "c".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].agent_id(), "b");
    assert!(report.failed[0].to_string().contains("missing credentials"));

    assert_eq!(supervisor.agent_state("b"), Some(AgentState::Faulted));
    assert_eq!(supervisor.agent_state("a"), Some(AgentState::Running));
    assert!(!broker.is_registered("b"));
    assert_eq!(entries(&journal, "b:"), vec!["b:setup", "b:cleanup"]);

    let faults: Vec<_> = supervisor.fault_history().collect();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].operation, Operation::Setup);

    supervisor.stop_all(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_duplicate_agent_rejected_synchronously() {
    let broker = Arc::new(Broker::new());
    let mut supervisor = Supervisor::new(broker, SupervisorConfig::default());
    let journal = Journal::default();
    add(&mut supervisor, "a", Script::default(), &journal);

    let result = supervisor.add_agent(AgentConfig::new("a", "scripted"), |_| {
        let agent: Box<dyn Agent> = Box::new(Scripted {
            id: "a".to_string(),
            script: Script::default(),
            journal: Journal::default(),
        });
        Ok(agent)
    });
    assert!(matches!(
        result,
        Err(SupervisorError::Agent(AgentError::Broker(BrokerError::DuplicateAgent(ref id)))) if id == "a"
    ));
    assert_eq!(supervisor.agent_ids(), vec!["a".to_string()]);
}

#[tokio::test]
async fn test_stop_all_abandons_stuck_agent() {
    let _ = env_logger::try_init();
    let broker = Arc::new(Broker::new());
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());
    let journal = Journal::default();

    add(
        &mut supervisor,
        "stuck",
        Script {
            subscribe: vec![MessageType::custom("work")],
            handler_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        },
        &journal,
    );
    add(&mut supervisor, "quick", Script::default(), &journal);
    supervisor.start_all().await;

    broker.publish(tick(1));
    eventually("stuck agent to begin handling", || {
        entries(&journal, "stuck:msg").len() == 1
    })
    .await;

    let started = Instant::now();
    let report = supervisor.stop_all(Duration::from_millis(100)).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.abandoned, vec!["stuck".to_string()]);
    assert_eq!(report.stopped, vec!["quick".to_string()]);
    assert!(!report.is_clean());
    assert!(!broker.is_registered("stuck"));
    assert!(supervisor.status_report().agent("stuck").unwrap().snapshot.abandoned);
}

#[tokio::test]
async fn test_stop_all_while_agent_cleans_up_after_fault() {
    let _ = env_logger::try_init();
    let broker = Arc::new(Broker::new());
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());
    let journal = Journal::default();

    add(
        &mut supervisor,
        "failing",
        Script {
            subscribe: vec![MessageType::custom("work")],
            fail_on: Some(MessageType::custom("work")),
            cleanup_delay: Some(Duration::from_millis(300)),
            ..Default::default()
        },
        &journal,
    );
    add(&mut supervisor, "steady", Script::default(), &journal);
    assert!(supervisor.start_all().await.is_complete());

    broker.publish(tick(1));
    eventually("failing agent to start cleanup", || {
        entries(&journal, "failing:cleanup").len() == 1
    })
    .await;
    assert_eq!(supervisor.agent_state("failing"), Some(AgentState::Running));

    let report = supervisor.stop_all(Duration::from_secs(2)).await;

    assert!(report.is_clean(), "unexpected abandon: {:?}", report);
    assert_eq!(report.faulted, vec!["failing".to_string()]);
    assert_eq!(report.stopped, vec!["steady".to_string()]);
    assert_eq!(supervisor.agent_state("failing"), Some(AgentState::Faulted));
    assert_eq!(entries(&journal, "failing:cleanup").len(), 1);
    assert!(supervisor.fault_history().any(|f| f.agent_id == "failing"));
}

#[tokio::test]
async fn test_stop_all_leaves_every_agent_terminal() {
    let _ = env_logger::try_init();
    let broker = Arc::new(Broker::new());
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());
    let journal = Journal::default();

    add(&mut supervisor, "healthy", Script::default(), &journal);
    add(
        &mut supervisor,
        "no_setup",
        Script {
            fail_setup: true,
            ..Default::default()
        },
        &journal,
    );
    add(
        &mut supervisor,
        "mid_fault",
        Script {
            subscribe: vec![MessageType::custom("work")],
            fail_on: Some(MessageType::custom("work")),
            cleanup_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        },
        &journal,
    );
    add(
        &mut supervisor,
        "busy",
        Script {
            subscribe: vec![MessageType::custom("work")],
            handler_delay: Some(Duration::from_millis(100)),
            cleanup_delay: Some(Duration::from_millis(100)),
            ..Default::default()
        },
        &journal,
    );
    supervisor.start_all().await;
    add(&mut supervisor, "late", Script::default(), &journal);

    broker.publish(tick(1));
    eventually("both workers to receive the tick", || {
        entries(&journal, "mid_fault:msg").len() == 1 && entries(&journal, "busy:msg").len() == 1
    })
    .await;

    let report = supervisor.stop_all(Duration::from_secs(2)).await;
    assert!(report.abandoned.is_empty(), "unexpected abandon: {:?}", report);

    let mut reported: Vec<String> = report
        .stopped
        .iter()
        .chain(&report.faulted)
        .cloned()
        .collect();
    reported.sort();
    let mut all = supervisor.agent_ids();
    all.sort();
    assert_eq!(reported, all);

    for agent_id in &all {
        let state = supervisor.agent_state(agent_id).unwrap();
        assert!(state.is_terminal(), "{agent_id} left in {state}");
    }
    let mut faulted = report.faulted.clone();
    faulted.sort();
    assert_eq!(faulted, vec!["mid_fault".to_string(), "no_setup".to_string()]);
}

#[tokio::test]
async fn test_no_invocations_after_stop() {
    let broker = Arc::new(Broker::new());
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());
    let journal = Journal::default();

    add(
        &mut supervisor,
        "busy",
        Script {
            subscribe: vec![MessageType::custom("work")],
            interval_secs: 0.005,
            ..Default::default()
        },
        &journal,
    );
    supervisor.start_all().await;

    for seq in 0..20 {
        broker.publish(tick(seq));
    }
    eventually("some cycles", || entries(&journal, "busy:cycle").len() >= 3).await;

    let report = supervisor.stop_all(Duration::from_secs(1)).await;
    assert_eq!(report.stopped, vec!["busy".to_string()]);
    let frozen = journal.lock().len();
    assert_eq!(journal.lock().last().map(String::as_str), Some("busy:cleanup"));

    for seq in 20..40 {
        broker.publish(tick(seq));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(journal.lock().len(), frozen);
}

#[tokio::test]
async fn test_handler_sees_publish_order() {
    let broker = Arc::new(Broker::new());
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());
    let journal = Journal::default();

    add(
        &mut supervisor,
        "ordered",
        Script {
            subscribe: vec![MessageType::custom("work")],
            ..Default::default()
        },
        &journal,
    );
    supervisor.start_all().await;

    for seq in 0..200 {
        broker.publish(tick(seq));
    }
    eventually("all messages", || entries(&journal, "ordered:msg").len() == 200).await;

    let seen: Vec<u64> = entries(&journal, "ordered:msg")
        .iter()
        .map(|e| e.rsplit(':').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(seen, (0..200).collect::<Vec<_>>());

    supervisor.stop_all(Duration::from_secs(1)).await;
}

/// Flags any overlap between its own hooks
struct Exclusive {
    in_flight: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    messages: Arc<AtomicU64>,
}

impl Exclusive {
    async fn critical_section(&self) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_micros(200)).await;
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Agent for Exclusive {
    fn name(&self) -> &str {
        "exclusive"
    }

    async fn setup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        ctx.subscribe([MessageType::custom("work")])?;
        Ok(())
    }

    async fn process_cycle(&mut self, _ctx: &AgentContext) -> anyhow::Result<()> {
        self.critical_section().await;
        self.cycles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_message(&mut self, _ctx: &AgentContext, _message: &Message) -> anyhow::Result<()> {
        self.critical_section().await;
        self.messages.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &AgentContext) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cycle_and_handler_never_overlap() {
    let broker = Arc::new(Broker::new());
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());

    let overlapped = Arc::new(AtomicBool::new(false));
    let cycles = Arc::new(AtomicU64::new(0));
    let messages = Arc::new(AtomicU64::new(0));
    {
        let overlapped = overlapped.clone();
        let cycles = cycles.clone();
        let messages = messages.clone();
        supervisor
            .add_agent(
                AgentConfig::new("exclusive", "exclusive").with_interval_secs(0.001),
                move |_| {
                    let agent: Box<dyn Agent> = Box::new(Exclusive {
                        in_flight: Arc::new(AtomicBool::new(false)),
                        overlapped: overlapped.clone(),
                        cycles: cycles.clone(),
                        messages: messages.clone(),
                    });
                    Ok(agent)
                },
            )
            .unwrap();
    }
    supervisor.start_all().await;

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let broker = broker.clone();
            tokio::spawn(async move {
                for seq in 0..25 {
                    broker.publish(Message::new(
                        format!("p{p}"),
                        Payload::custom("work", serde_json::json!({ "seq": seq })),
                    ));
                    tokio::time::sleep(Duration::from_micros(300)).await;
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    eventually("all messages handled", || messages.load(Ordering::SeqCst) == 100).await;
    supervisor.stop_all(Duration::from_secs(1)).await;

    assert!(cycles.load(Ordering::SeqCst) > 0);
    assert!(!overlapped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_restart_on_fault_respects_limit() {
    let _ = env_logger::try_init();
    let broker = Arc::new(Broker::new());
    let config = SupervisorConfig {
        restart_on_fault: true,
        max_restarts: 1,
        ..Default::default()
    };
    let mut supervisor = Supervisor::new(broker.clone(), config);
    let journal = Journal::default();

    add(
        &mut supervisor,
        "flaky",
        Script {
            subscribe: vec![MessageType::TradeProposal],
            fail_on: Some(MessageType::TradeProposal),
            ..Default::default()
        },
        &journal,
    );
    supervisor.start_all().await;

    broker.publish(proposal_message());
    tokio::time::timeout(Duration::from_secs(2), supervisor.next_fault())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(supervisor.agent_state("flaky"), Some(AgentState::Running));
    assert!(broker.is_registered("flaky"));
    assert_eq!(entries(&journal, "flaky:setup").len(), 2);
    assert_eq!(supervisor.status_report().agent("flaky").unwrap().restarts, 1);

    // The fresh instance faults again; the limit keeps it down
    broker.publish(proposal_message());
    tokio::time::timeout(Duration::from_secs(2), supervisor.next_fault())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(supervisor.agent_state("flaky"), Some(AgentState::Faulted));
    assert_eq!(entries(&journal, "flaky:setup").len(), 2);
    assert_eq!(entries(&journal, "flaky:cleanup").len(), 2);

    supervisor.stop_all(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_run_until_records_faults() {
    let broker = Arc::new(Broker::new());
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());
    let journal = Journal::default();

    add(
        &mut supervisor,
        "exec",
        Script {
            subscribe: vec![MessageType::TradeProposal],
            fail_on: Some(MessageType::TradeProposal),
            ..Default::default()
        },
        &journal,
    );
    supervisor.start_all().await;
    broker.publish(proposal_message());

    supervisor
        .run_until(tokio::time::sleep(Duration::from_millis(200)))
        .await;

    let history: Vec<_> = supervisor.fault_history().collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].agent_id, "exec");
    supervisor.stop_all(Duration::from_secs(1)).await;
}
