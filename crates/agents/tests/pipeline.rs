//! Full trading pipeline over a supervised runtime and a simulated market

use ftba_agents::{
    ASSET_AVAILABILITY, AgentKind, AssetAvailability, MarketConfig, SimulatedGateway, TradingGateway,
    factory,
};
use ftba_broker::Broker;
use ftba_core::{Message, MessageId, MessageType, Payload, TradeExecution, TradeStatus};
use ftba_runtime::{AgentConfig, AgentState, Supervisor, SupervisorConfig};
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn market() -> Arc<SimulatedGateway> {
    Arc::new(SimulatedGateway::new(MarketConfig {
        volatility: 0.0,
        seed: Some(7),
        ..MarketConfig::default()
    }))
}

fn configs(ta_symbols: serde_json::Value) -> Vec<AgentConfig> {
    vec![
        AgentConfig::new("technical", AgentKind::TechnicalAnalysis.as_str())
            .with_interval_secs(0.05)
            .with_setting("symbols", ta_symbols)
            .with_setting("short_window", 2)
            .with_setting("long_window", 4)
            .with_setting("signal_threshold", 0.001),
        AgentConfig::new("fundamental", AgentKind::FundamentalAnalysis.as_str())
            .with_interval_secs(0.1)
            .with_setting("calendar", json!([])),
        AgentConfig::new("strategy", AgentKind::StrategyOptimization.as_str()).with_interval_secs(0.1),
        AgentConfig::new("risk", AgentKind::RiskManagement.as_str()).with_interval_secs(0.1),
        AgentConfig::new("execution", AgentKind::TradeExecution.as_str()).with_interval_secs(0.05),
    ]
}

async fn supervised(broker: &Arc<Broker>, gateway: Arc<dyn TradingGateway>, ta_symbols: serde_json::Value) -> Supervisor {
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());
    for config in configs(ta_symbols) {
        supervisor.add_agent(config, factory(gateway.clone())).unwrap();
    }
    supervisor
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crossover_reaches_execution() {
    let _ = env_logger::try_init();
    let sim = market();
    let broker = Arc::new(Broker::new());
    let observer = broker.register("observer").unwrap();
    broker
        .subscribe("observer", [MessageType::RiskAssessment, MessageType::TradeExecution])
        .unwrap();

    let mut supervisor = supervised(&broker, sim.clone(), json!(["EUR/USD"])).await;
    let startup = supervisor.start_all().await;
    assert!(startup.is_complete(), "startup failures: {:?}", startup.failed);

    // Let the averages fill at a flat price, then jump
    tokio::time::sleep(Duration::from_millis(400)).await;
    sim.set_price("EUR/USD", dec!(1.1000)).unwrap();

    let mut assessments: Vec<MessageId> = Vec::new();
    let (message, execution): (Arc<Message>, TradeExecution) = timeout(Duration::from_secs(5), async {
        loop {
            let message = observer.recv().await?;
            match message.payload() {
                Payload::RiskAssessment(assessment) if assessment.approved => {
                    assessments.push(message.id());
                }
                Payload::TradeExecution(execution) => {
                    let execution = execution.clone();
                    return Some((message.clone(), execution));
                }
                _ => {}
            }
        }
    })
    .await
    .expect("no execution within 5s")
    .expect("observer mailbox closed");

    assert_eq!(message.sender(), "execution");
    assert_eq!(execution.status, TradeStatus::Executed);
    assert_eq!(execution.symbol, "EUR/USD");
    assert!(assessments.contains(&message.correlation_id().unwrap()));

    let shutdown = supervisor.stop_all(Duration::from_secs(2)).await;
    assert!(shutdown.is_clean(), "unclean shutdown: {:?}", shutdown);
    assert_eq!(sim.connections(), 0);
}

#[tokio::test]
async fn test_bad_symbol_only_fails_its_agent() {
    let _ = env_logger::try_init();
    let sim = market();
    let broker = Arc::new(Broker::new());

    let mut supervisor = supervised(&broker, sim.clone(), json!(["XAU/USD"])).await;
    let startup = supervisor.start_all().await;

    assert_eq!(startup.failed.len(), 1);
    assert_eq!(startup.failed[0].agent_id(), "technical");
    assert_eq!(supervisor.agent_state("technical"), Some(AgentState::Faulted));
    assert_eq!(supervisor.agent_state("execution"), Some(AgentState::Running));
    assert!(!broker.is_registered("technical"));

    supervisor.stop_all(Duration::from_secs(2)).await;
    assert_eq!(sim.connections(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_only_recommended_symbols_signal() {
    let _ = env_logger::try_init();
    let sim = market();
    let broker = Arc::new(Broker::new());
    let observer = broker.register("observer").unwrap();
    broker
        .subscribe(
            "observer",
            [MessageType::TechnicalSignal, MessageType::custom(ASSET_AVAILABILITY)],
        )
        .unwrap();

    let every_day: serde_json::Map<String, serde_json::Value> = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]
        .into_iter()
        .map(|day| (day.to_string(), json!({"open": "00:00", "close": "24:00"})))
        .collect();
    let mut supervisor = Supervisor::new(broker.clone(), SupervisorConfig::default());
    let assets = AgentConfig::new("assets", AgentKind::AssetSelection.as_str())
        .with_interval_secs(0.05)
        .with_setting("primary_assets", json!(["GBP/USD"]))
        .with_setting("fallback_assets", json!(["USD/CHF"]))
        .with_setting("trading_hours", every_day);
    let technical = configs(json!(["EUR/USD", "GBP/USD"])).remove(0);
    for config in [assets, technical] {
        supervisor.add_agent(config, factory(sim.clone())).unwrap();
    }

    let startup = supervisor.start_all().await;
    assert!(startup.is_complete(), "startup failures: {:?}", startup.failed);

    tokio::time::sleep(Duration::from_millis(400)).await;
    sim.set_price("EUR/USD", dec!(1.1000)).unwrap();
    sim.set_price("GBP/USD", dec!(1.4000)).unwrap();

    let mut recommended = None;
    let signal = timeout(Duration::from_secs(5), async {
        loop {
            let message = observer.recv().await?;
            if let Some(availability) = AssetAvailability::from_payload(message.payload()).unwrap() {
                recommended.get_or_insert(availability.recommended);
                continue;
            }
            if let Payload::TechnicalSignal(signal) = message.payload() {
                return Some(signal.clone());
            }
        }
    })
    .await
    .expect("no signal within 5s")
    .expect("observer mailbox closed");

    assert_eq!(recommended, Some(vec!["GBP/USD".to_string()]));
    assert_eq!(signal.symbol, "GBP/USD");

    // The EUR/USD crossover happened in the same cycles and was dropped
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(observer.drain().iter().all(|message| match message.payload() {
        Payload::TechnicalSignal(signal) => signal.symbol != "EUR/USD",
        _ => true,
    }));

    let shutdown = supervisor.stop_all(Duration::from_secs(2)).await;
    assert!(shutdown.is_clean(), "unclean shutdown: {:?}", shutdown);
    assert_eq!(sim.connections(), 0);
}
