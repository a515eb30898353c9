//! Application-level state machine.
//!
//! Folds the multiset of per-server connection states into one of
//! {Starting, Running, Degraded, Stopping, Stopped}. Transitions outside the
//! DAG are rejected; self-transitions are silent no-ops. State lives in a
//! watch channel so `wait_for_stable_state` can await changes.

use std::time::Duration;

use mcpproxy_protocol::AppState;
use mcpproxy_protocol::ConnectionState;
use mcpproxy_protocol::Event;
use mcpproxy_protocol::EventPayload;
use mcpproxy_protocol::ProxyError;
use tokio::sync::watch;
use tracing::info;

use crate::event_bus::EventBus;

/// Pure aggregation rule over the states of enabled, non-quarantined
/// clients sampled at one instant.
pub fn aggregate_states(states: &[ConnectionState]) -> AppState {
    if states.is_empty() {
        return AppState::Running;
    }
    if states.iter().all(|state| *state == ConnectionState::Ready) {
        return AppState::Running;
    }
    // Some or none ready: the app itself is still up, just degraded.
    AppState::Degraded
}

pub struct AppStateMachine {
    tx: watch::Sender<AppState>,
    bus: EventBus,
}

impl AppStateMachine {
    pub fn new(bus: EventBus) -> Self {
        let (tx, _rx) = watch::channel(AppState::Starting);
        Self { tx, bus }
    }

    pub fn current(&self) -> AppState {
        *self.tx.borrow()
    }

    /// Attempt a transition. Returns `Ok(true)` when the state changed,
    /// `Ok(false)` for a self-transition (no event emitted), and an error
    /// for a transition outside the DAG.
    pub fn transition(&self, next: AppState) -> Result<bool, ProxyError> {
        let mut changed = Ok(false);
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                changed = Err(ProxyError::internal(format!(
                    "invalid app state transition {current} -> {next}"
                )));
                return false;
            }
            let old = *current;
            *current = next;
            changed = Ok(true);
            info!("app state: {old} -> {next}");
            self.bus
                .publish(Event::now("", EventPayload::AppStateChange { old, new: next }));
            true
        });
        changed
    }

    /// Re-evaluate the aggregate from a sample of per-server states. Only
    /// meaningful while the app is in a steady phase; stopping/stopped are
    /// never overridden by aggregation.
    pub fn update_state(&self, states: &[ConnectionState]) -> Result<bool, ProxyError> {
        let current = self.current();
        if matches!(current, AppState::Stopping | AppState::Stopped) {
            return Ok(false);
        }
        let target = aggregate_states(states);
        if current == target {
            return Ok(false);
        }
        self.transition(target)
    }

    /// Block until the state is stable ({Running, Stopped}) or the timeout
    /// elapses.
    pub async fn wait_for_stable_state(
        &self,
        timeout: Duration,
    ) -> Result<AppState, ProxyError> {
        let mut rx = self.tx.subscribe();
        let wait = async {
            loop {
                let current = *rx.borrow_and_update();
                if matches!(current, AppState::Running | AppState::Stopped) {
                    return current;
                }
                if rx.changed().await.is_err() {
                    return current;
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ProxyError::timeout("timed out waiting for a stable app state"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpproxy_protocol::ErrorKind;
    use mcpproxy_protocol::EventKind;
    use pretty_assertions::assert_eq;

    use ConnectionState::*;

    #[test]
    fn aggregation_matches_the_rule_table() {
        assert_eq!(aggregate_states(&[]), AppState::Running);
        assert_eq!(aggregate_states(&[Ready, Ready]), AppState::Running);
        assert_eq!(aggregate_states(&[Ready, Error]), AppState::Degraded);
        assert_eq!(aggregate_states(&[Error, Connecting]), AppState::Degraded);
        assert_eq!(aggregate_states(&[Disconnected]), AppState::Degraded);
    }

    #[tokio::test]
    async fn transitions_emit_events_and_self_transitions_do_not() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        let machine = AppStateMachine::new(bus);

        assert!(machine.transition(AppState::Degraded).expect("transition"));
        assert!(!machine.transition(AppState::Degraded).expect("self"));
        assert!(machine.transition(AppState::Running).expect("recover"));

        let first = sub.recv().await.expect("first event");
        assert_eq!(first.kind(), EventKind::AppStateChange);
        let second = sub.recv().await.expect("second event");
        match second.payload {
            EventPayload::AppStateChange { old, new } => {
                assert_eq!(old, AppState::Degraded);
                assert_eq!(new, AppState::Running);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn invalid_transitions_are_rejected() {
        let machine = AppStateMachine::new(EventBus::new());
        machine.transition(AppState::Stopping).expect("stopping");
        machine.transition(AppState::Stopped).expect("stopped");
        let err = machine
            .transition(AppState::Running)
            .expect_err("stopped cannot run");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn update_state_never_overrides_shutdown() {
        let machine = AppStateMachine::new(EventBus::new());
        machine.transition(AppState::Stopping).expect("stopping");
        assert!(!machine.update_state(&[Ready]).expect("update"));
        assert_eq!(machine.current(), AppState::Stopping);
    }

    #[tokio::test]
    async fn wait_for_stable_state_sees_late_transitions() {
        let machine = std::sync::Arc::new(AppStateMachine::new(EventBus::new()));
        let waiter = std::sync::Arc::clone(&machine);
        let handle = tokio::spawn(async move {
            waiter
                .wait_for_stable_state(Duration::from_secs(5))
                .await
                .expect("stable state")
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        machine.transition(AppState::Running).expect("running");
        assert_eq!(handle.await.expect("join"), AppState::Running);
    }
}
