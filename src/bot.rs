use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::handler::MessageHandler;
use crate::keepalive;
use crate::phrases::ResponseSource;
use crate::platform::telegram::TelegramClient;
use crate::platform::{ChatClient, ChatEvent};

/// Lifecycle of the orchestrator. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Connecting,
    LoggingIn,
    Ready,
    Stopped,
}

/// Run state shared between the orchestrator and its background tasks.
#[derive(Debug)]
pub struct SessionState {
    phase: watch::Sender<Phase>,
}

impl SessionState {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Created);
        Self { phase }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.phase() != Phase::Stopped
    }

    /// Move to `next`. Returns false if already stopped.
    pub fn advance(&self, next: Phase) -> bool {
        let mut moved = false;
        self.phase.send_if_modified(|current| {
            if *current == Phase::Stopped {
                return false;
            }
            moved = true;
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        moved
    }

    pub fn stop(&self) {
        self.phase.send_replace(Phase::Stopped);
    }

    /// Resolves once the state reaches `Stopped`.
    pub async fn stopped(&self) {
        let mut rx = self.phase.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|phase| *phase == Phase::Stopped).await;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the platform connection and drives the reply pipeline.
pub struct Bot {
    config: Config,
    source: Arc<dyn ResponseSource>,
    state: Arc<SessionState>,
    client: Mutex<Option<Arc<dyn ChatClient>>>,
}

impl Bot {
    pub fn new(config: Config, source: Arc<dyn ResponseSource>) -> Self {
        Self {
            config,
            source,
            state: Arc::new(SessionState::new()),
            client: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    fn attach_client(&self, client: Arc<dyn ChatClient>) {
        let mut slot = self.client.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(client);
    }

    /// Connect, log in if needed, and handle updates until `stop` is called.
    pub async fn start(&self) -> Result<()> {
        match self.run().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Failed to start: {}", e);
                Err(e)
            }
        }
    }

    async fn run(&self) -> Result<()> {
        if !self.state.advance(Phase::Connecting) {
            warn!("Bot was stopped before it started");
            return Ok(());
        }

        let client = Arc::new(TelegramClient::connect(&self.config.telegram).await?);
        self.attach_client(client.clone());

        if client.is_authorized().await? {
            info!("Already authorized");
        } else {
            self.state.advance(Phase::LoggingIn);
            client.login_interactive().await?;
        }

        let me = client.get_me().await?;
        info!("Authorized as {}", me);

        if !self.state.advance(Phase::Ready) {
            return Ok(());
        }

        let handler = Arc::new(MessageHandler::new(
            client.clone(),
            self.source.clone(),
            self.config.behavior.clone(),
        ));
        keepalive::spawn(client.clone(), self.state.clone(), &self.config.behavior);

        info!("Bot is running, press Ctrl+C to stop");

        loop {
            tokio::select! {
                _ = self.state.stopped() => break,
                event = client.next_event() => {
                    if let Some(event) = event? {
                        self.dispatch(&handler, event);
                    }
                }
            }
        }

        Ok(())
    }

    /// Each event gets its own task; replies to different peers may interleave.
    fn dispatch(&self, handler: &Arc<MessageHandler>, event: ChatEvent) {
        if self.state.phase() != Phase::Ready {
            return;
        }
        let handler = handler.clone();
        match event {
            ChatEvent::NewMessage(msg) => {
                tokio::spawn(async move { handler.handle_new_message(msg).await });
            }
            ChatEvent::MessageEdited(msg) => {
                tokio::spawn(async move { handler.handle_edit(msg).await });
            }
        }
    }

    /// Stop the bot and disconnect. Safe to call before `start` and more than once.
    pub async fn stop(&self) -> Result<()> {
        self.state.stop();
        let client = self
            .client
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(client) = client {
            client.disconnect().await?;
        }
        info!("Bot stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BehaviorConfig, LoggingConfig, PhrasesConfig, TelegramConfig};
    use crate::phrases::PhraseBank;
    use crate::platform::mock::{Call, MockClient};

    fn bot() -> Bot {
        let config = Config {
            telegram: TelegramConfig {
                api_id: 1,
                api_hash: "hash".into(),
                session_name: "test".into(),
                session_string: None,
            },
            behavior: BehaviorConfig::default(),
            logging: LoggingConfig::default(),
            phrases: PhrasesConfig::default(),
        };
        Bot::new(config, Arc::new(PhraseBank::builtin()))
    }

    #[test]
    fn test_state_is_terminal_once_stopped() {
        let state = SessionState::new();
        assert_eq!(state.phase(), Phase::Created);
        assert!(state.advance(Phase::Connecting));
        assert!(state.advance(Phase::Ready));
        assert!(state.is_running());

        state.stop();
        assert!(!state.advance(Phase::Ready));
        assert_eq!(state.phase(), Phase::Stopped);
        assert!(!state.is_running());
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_stop() {
        let state = Arc::new(SessionState::new());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.stopped().await })
        };
        state.stop();
        waiter.await.unwrap();

        // Already stopped: resolves immediately.
        state.stopped().await;
    }

    #[tokio::test]
    async fn test_stop_before_start_is_ok() {
        let bot = bot();
        bot.stop().await.unwrap();
        assert_eq!(bot.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_stop_twice_disconnects_once() {
        let bot = bot();
        let client = Arc::new(MockClient::new());
        bot.attach_client(client.clone());

        bot.stop().await.unwrap();
        bot.stop().await.unwrap();

        assert_eq!(client.calls(), vec![Call::Disconnect]);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_start_after_stop_does_not_connect() {
        let bot = bot();
        bot.stop().await.unwrap();
        bot.start().await.unwrap();
        assert_eq!(bot.phase(), Phase::Stopped);
    }
}
