use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::bot::SessionState;
use crate::config::BehaviorConfig;
use crate::platform::ChatClient;

#[derive(Debug, Clone, Copy)]
pub struct KeepAliveSettings {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub backoff: Duration,
}

impl From<&BehaviorConfig> for KeepAliveSettings {
    fn from(b: &BehaviorConfig) -> Self {
        Self {
            min_interval: Duration::from_secs(b.keep_alive_min_secs),
            max_interval: Duration::from_secs(b.keep_alive_max_secs),
            backoff: Duration::from_secs(b.keep_alive_backoff_secs),
        }
    }
}

/// Spawn the keep-alive loop on the current runtime.
pub fn spawn(
    client: Arc<dyn ChatClient>,
    state: Arc<SessionState>,
    behavior: &BehaviorConfig,
) -> JoinHandle<()> {
    let settings = KeepAliveSettings::from(behavior);
    tokio::spawn(run(client, state, settings, StdRng::from_entropy()))
}

/// Periodically fetch our own identity so the connection is not dropped as idle.
/// Exits once the session is stopped.
pub async fn run(
    client: Arc<dyn ChatClient>,
    state: Arc<SessionState>,
    settings: KeepAliveSettings,
    mut rng: StdRng,
) {
    while state.is_running() {
        let interval = rng.gen_range(settings.min_interval..=settings.max_interval);
        tokio::select! {
            _ = state.stopped() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if !client.is_connected() {
            continue;
        }
        if let Err(e) = client.get_me().await {
            debug!("Keep-alive failed: {}", e);
            tokio::select! {
                _ = state.stopped() => break,
                _ = tokio::time::sleep(settings.backoff) => {}
            }
        }
    }
    debug!("Keep-alive stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{Call, MockClient};
    use std::sync::atomic::Ordering;

    fn settings() -> KeepAliveSettings {
        KeepAliveSettings::from(&BehaviorConfig::default())
    }

    fn get_me_count(client: &MockClient) -> usize {
        client.calls().iter().filter(|c| **c == Call::GetMe).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_within_interval() {
        let client = Arc::new(MockClient::new());
        let state = Arc::new(SessionState::new());
        let task = tokio::spawn(run(
            client.clone(),
            state.clone(),
            settings(),
            StdRng::seed_from_u64(3),
        ));

        tokio::time::sleep(Duration::from_secs(199)).await;
        assert_eq!(get_me_count(&client), 0);

        tokio::time::sleep(Duration::from_secs(202)).await;
        assert!(get_me_count(&client) >= 1);

        state.stop();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_ping_when_disconnected() {
        let client = Arc::new(MockClient::new());
        client.connected.store(false, Ordering::SeqCst);
        let state = Arc::new(SessionState::new());
        let task = tokio::spawn(run(
            client.clone(),
            state.clone(),
            settings(),
            StdRng::seed_from_u64(4),
        ));

        tokio::time::sleep(Duration::from_secs(1000)).await;
        assert_eq!(get_me_count(&client), 0);

        state.stop();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_backs_off_and_keeps_going() {
        let client = Arc::new(MockClient::new());
        client.fail_get_me.store(true, Ordering::SeqCst);
        let state = Arc::new(SessionState::new());
        let task = tokio::spawn(run(
            client.clone(),
            state.clone(),
            settings(),
            StdRng::seed_from_u64(5),
        ));

        // Each round is at most 400s of sleep plus 30s of backoff.
        tokio::time::sleep(Duration::from_secs(2 * 430 + 1)).await;
        assert!(get_me_count(&client) >= 2);

        state.stop();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_sleep() {
        let client = Arc::new(MockClient::new());
        let state = Arc::new(SessionState::new());
        let task = tokio::spawn(run(
            client.clone(),
            state.clone(),
            settings(),
            StdRng::seed_from_u64(6),
        ));

        tokio::time::sleep(Duration::from_secs(10)).await;
        state.stop();
        let started = tokio::time::Instant::now();
        task.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(get_me_count(&client), 0);
    }
}
