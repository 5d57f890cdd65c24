//! Network state monitor.
//!
//! Holds a single connectivity boolean fed by platform online/offline events
//! via [`NetworkMonitor::report`]. Events are debounced so flapping links
//! settle before anyone reacts, then published on a `watch` channel. Purely
//! event-driven: no polling, no probes, no retries.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Debounce window applied to connectivity events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

pub struct NetworkMonitor {
    events: mpsc::UnboundedSender<bool>,
    state: watch::Receiver<bool>,
}

impl NetworkMonitor {
    /// Start a monitor seeded with the platform's current connectivity.
    pub fn new(initially_online: bool) -> Self {
        Self::with_debounce(initially_online, DEFAULT_DEBOUNCE)
    }

    /// Start a monitor with a custom debounce window.
    pub fn with_debounce(initially_online: bool, debounce: Duration) -> Self {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<bool>();
        let (state_tx, state_rx) = watch::channel(initially_online);

        tokio::spawn(async move {
            while let Some(first) = event_rx.recv().await {
                let mut settled = first;
                // Collapse bursts: keep absorbing events until the line has
                // been quiet for one debounce window.
                loop {
                    match tokio::time::timeout(debounce, event_rx.recv()).await {
                        Ok(Some(next)) => settled = next,
                        Ok(None) => {
                            publish(&state_tx, settled);
                            return;
                        }
                        Err(_) => break,
                    }
                }
                publish(&state_tx, settled);
            }
        });

        NetworkMonitor {
            events: event_tx,
            state: state_rx,
        }
    }

    /// Feed one platform connectivity event into the debouncer.
    pub fn report(&self, online: bool) {
        let _ = self.events.send(online);
    }

    /// Current settled connectivity.
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Change stream of settled connectivity values.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }
}

fn publish(state_tx: &watch::Sender<bool>, settled: bool) {
    let changed = state_tx.send_if_modified(|current| {
        if *current != settled {
            *current = settled;
            true
        } else {
            false
        }
    });
    if changed {
        info!(online = settled, "Connectivity changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DEBOUNCE: Duration = Duration::from_millis(20);

    async fn settle() {
        tokio::time::sleep(TEST_DEBOUNCE * 4).await;
    }

    #[tokio::test]
    async fn test_initial_state_is_constructor_argument() {
        let online = NetworkMonitor::with_debounce(true, TEST_DEBOUNCE);
        let offline = NetworkMonitor::with_debounce(false, TEST_DEBOUNCE);
        assert!(online.is_online());
        assert!(!offline.is_online());
    }

    #[tokio::test]
    async fn test_flapping_settles_on_last_reported_value() {
        let monitor = NetworkMonitor::with_debounce(true, TEST_DEBOUNCE);
        monitor.report(false);
        monitor.report(true);
        monitor.report(false);
        settle().await;
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscriber_sees_offline_to_online_transition() {
        let monitor = NetworkMonitor::with_debounce(false, TEST_DEBOUNCE);
        let mut stream = monitor.subscribe();

        monitor.report(true);
        stream.changed().await.expect("monitor task alive");
        assert!(*stream.borrow());
    }

    #[tokio::test]
    async fn test_redundant_events_do_not_notify() {
        let monitor = NetworkMonitor::with_debounce(true, TEST_DEBOUNCE);
        let mut stream = monitor.subscribe();

        monitor.report(true);
        settle().await;

        let woke = tokio::time::timeout(TEST_DEBOUNCE, stream.changed()).await;
        assert!(woke.is_err(), "no notification for an unchanged value");
        assert!(monitor.is_online());
    }
}
