use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use crate::config::{BehaviorConfig, MAX_TYPING_DELAY};
use crate::error::{BotError, Result};
use crate::phrases::ResponseSource;
use crate::platform::{ChatClient, IncomingMessage};

/// Sent when the response source fails.
pub const FALLBACK_REPLY: &str = "Сейчас мыслями на тренировке. Повтори вопрос.";

/// Sent (sometimes) when a peer edits a message.
pub const EDIT_REPLY: &str = "Поправляешь? Ясно...";

pub const REACTIONS: [&str; 8] = ["👍", "❤️", "😂", "😮", "😢", "👏", "🔥", "🎯"];

const PREVIEW_CHARS: usize = 80;

/// Draw a simulated typing delay uniformly from `[min_secs, max_secs]`.
pub fn sample_typing_delay<R: Rng + ?Sized>(
    rng: &mut R,
    min_secs: f64,
    max_secs: f64,
) -> Result<Duration> {
    // NaN and infinities fail these comparisons too.
    if !(min_secs >= 0.0 && min_secs <= max_secs && max_secs <= MAX_TYPING_DELAY) {
        return Err(BotError::Configuration(format!(
            "invalid typing delay bounds {min_secs}..{max_secs}"
        )));
    }
    Duration::try_from_secs_f64(rng.gen_range(min_secs..=max_secs))
        .map_err(|e| BotError::Configuration(format!("invalid typing delay: {e}")))
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn diagnostic_reply(err: &BotError) -> String {
    format!("Ошибка типа {}. Проверь логи.", err.kind())
}

/// Runs the reply pipeline for incoming and edited messages.
///
/// Handlers may run concurrently; the only shared mutable state is the RNG,
/// which is never held across an await.
pub struct MessageHandler {
    client: Arc<dyn ChatClient>,
    source: Arc<dyn ResponseSource>,
    behavior: BehaviorConfig,
    rng: Mutex<StdRng>,
}

impl MessageHandler {
    pub fn new(
        client: Arc<dyn ChatClient>,
        source: Arc<dyn ResponseSource>,
        behavior: BehaviorConfig,
    ) -> Self {
        Self::with_rng(client, source, behavior, StdRng::from_entropy())
    }

    pub fn with_rng(
        client: Arc<dyn ChatClient>,
        source: Arc<dyn ResponseSource>,
        behavior: BehaviorConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            client,
            source,
            behavior,
            rng: Mutex::new(rng),
        }
    }

    fn with_rng_mut<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        // A poisoned lock only means another handler panicked mid-draw.
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }

    /// Entry point for new messages. Never fails: errors are logged and
    /// answered with a best-effort diagnostic reply.
    pub async fn handle_new_message(&self, msg: IncomingMessage) {
        if msg.outgoing || msg.text.is_none() {
            return;
        }

        if let Err(err) = self.process(&msg).await {
            error!(
                chat_id = msg.chat_id,
                message_id = msg.message_id,
                "Failed to handle message: {:?}",
                err
            );
            if let Err(reply_err) = self.client.reply(&msg, &diagnostic_reply(&err)).await {
                debug!("Diagnostic reply failed as well: {}", reply_err);
            }
        }
    }

    async fn process(&self, msg: &IncomingMessage) -> Result<()> {
        let text = msg.text.as_deref().unwrap_or_default();

        let Some(sender) = self.client.resolve_sender(msg).await? else {
            debug!("Could not resolve sender of message {}", msg.message_id);
            return Ok(());
        };
        info!(
            "Message from {} ({}): {}",
            sender.display_name,
            sender.id,
            preview(text)
        );

        let delay = self.with_rng_mut(|rng| {
            sample_typing_delay(
                rng,
                self.behavior.typing_delay_min,
                self.behavior.typing_delay_max,
            )
        })?;
        debug!("Simulating typing for {:.1}s", delay.as_secs_f64());
        tokio::time::sleep(delay).await;

        let reply = self.generate_reply(text, &sender.display_name);
        self.send_reply(msg, &reply).await?;
        debug!("Reply sent: {}", preview(&reply));

        self.maybe_react(msg).await;

        self.client.mark_read(msg).await?;
        debug!("Message {} marked as read", msg.message_id);
        Ok(())
    }

    fn generate_reply(&self, text: &str, user_name: &str) -> String {
        match self.source.get_response(text, user_name) {
            Ok(reply) => reply,
            Err(err) => {
                warn!("Response source failed, using fallback: {}", err);
                FALLBACK_REPLY.to_string()
            }
        }
    }

    /// Send once; on a rate limit wait as told and resend the same text once more.
    async fn send_reply(&self, msg: &IncomingMessage, reply: &str) -> Result<()> {
        match self.client.reply(msg, reply).await {
            Err(BotError::RateLimited { seconds }) => {
                warn!("Rate limited, waiting {}s before retrying", seconds);
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                self.client.reply(msg, reply).await
            }
            other => other,
        }
    }

    /// Reactions are best-effort and never fail the pipeline.
    async fn maybe_react(&self, msg: &IncomingMessage) {
        let emoji = self.with_rng_mut(|rng| {
            if rng.gen_bool(self.behavior.reaction_probability) {
                REACTIONS.choose(rng).copied()
            } else {
                None
            }
        });
        let Some(emoji) = emoji else {
            return;
        };

        match self.client.send_reaction(msg, emoji).await {
            Ok(()) => debug!("Reacted with {}", emoji),
            Err(err) => debug!("Failed to react: {}", err),
        }
    }

    /// Occasionally tease a peer who edited their message.
    pub async fn handle_edit(&self, msg: IncomingMessage) {
        if msg.outgoing {
            return;
        }
        let reply = self.with_rng_mut(|rng| rng.gen_bool(self.behavior.edit_reply_probability));
        if !reply {
            return;
        }
        if let Err(err) = self.client.reply(&msg, EDIT_REPLY).await {
            warn!("Failed to answer an edit: {}", err);
        }
    }
}
