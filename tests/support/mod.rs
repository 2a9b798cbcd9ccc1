//! Shared helpers for orchestrator integration tests
#![allow(dead_code)] // Test utility module - not all helpers used in every test

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use herald::{
    AuditEvent, DeliveryState, EventSink, HeraldConfig, MockProvider, Orchestrator, Provider,
};
use parking_lot::Mutex;

/// Configuration with millisecond delays so retries do not slow tests down
pub fn fast_config() -> HeraldConfig {
    let mut config = HeraldConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.queue.breaker_pause_ms = 10;
    config.admission.capacity = 100;
    config
}

pub fn providers(list: &[&MockProvider]) -> Vec<Arc<dyn Provider>> {
    list.iter()
        .map(|provider| Arc::new((*provider).clone()) as Arc<dyn Provider>)
        .collect()
}

/// Build an orchestrator, panicking on configuration errors
pub fn orchestrator(config: HeraldConfig, list: &[&MockProvider]) -> Orchestrator {
    match Orchestrator::new(config, providers(list)) {
        Ok(orchestrator) => orchestrator,
        Err(e) => panic!("failed to build orchestrator: {e}"),
    }
}

/// Build an orchestrator that records every audit event
pub fn recorded_orchestrator(
    config: HeraldConfig,
    list: &[&MockProvider],
) -> (Orchestrator, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    match Orchestrator::with_event_sink(config, providers(list), recorder.clone()) {
        Ok(orchestrator) => (orchestrator, recorder),
        Err(e) => panic!("failed to build orchestrator: {e}"),
    }
}

/// Event sink keeping everything it receives
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<AuditEvent>>,
}

impl EventSink for Recorder {
    fn on_event(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

impl Recorder {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&AuditEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until message `id` reaches `state`
pub async fn wait_for_state(
    orchestrator: &Orchestrator,
    id: &str,
    state: DeliveryState,
    timeout: Duration,
) -> bool {
    wait_for(timeout, || {
        orchestrator.status_of(id).map(|status| status.state) == Some(state)
    })
    .await
}
