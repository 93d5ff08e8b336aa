use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use grammers_client::types::{Chat, Message};
use grammers_client::{
    Client, Config as ClientConfig, InitParams, InputMessage, InvocationError, SignInError, Update,
};
use grammers_session::{PackedChat, Session};
use grammers_tl_types as tl;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::error::{BotError, Result};
use crate::platform::{ChatClient, ChatEvent, Identity, IncomingMessage, Sender};

const DEVICE_MODEL: &str = "RotenbergBot";
const SYSTEM_VERSION: &str = "Linux";
const APP_VERSION: &str = "2.0.0";
const LANG_CODE: &str = "ru";

/// RPC errors that tell the caller to wait. The `_X` suffix carries the seconds.
const WAIT_ERRORS: [&str; 3] = ["FLOOD_WAIT", "FLOOD_PREMIUM_WAIT", "SLOWMODE_WAIT"];

fn rate_limit_wait(name: &str, value: Option<u32>) -> Option<u64> {
    WAIT_ERRORS
        .iter()
        .any(|prefix| name.starts_with(prefix))
        .then(|| value.map(u64::from).unwrap_or(1))
}

/// Map a library error into our error kinds.
fn map_invocation(err: InvocationError) -> BotError {
    if let InvocationError::Rpc(rpc) = &err {
        if let Some(seconds) = rate_limit_wait(&rpc.name, rpc.value) {
            return BotError::RateLimited { seconds };
        }
    }
    BotError::Delivery(err.to_string())
}

/// Service messages (joins, calls, pins) have no body. Media without a
/// caption is still answered, with empty text.
fn message_body(is_service: bool, text: &str) -> Option<String> {
    if is_service {
        None
    } else {
        Some(text.to_string())
    }
}

fn ensure_connected(connected: bool) -> Result<()> {
    if connected {
        Ok(())
    } else {
        Err(BotError::Delivery("client is disconnected".into()))
    }
}

/// Telegram user-account client over MTProto.
pub struct TelegramClient {
    client: Client,
    session_file: Option<PathBuf>,
    connected: AtomicBool,
    /// Peers seen in updates, so replies can be addressed by chat ID.
    chats: Mutex<HashMap<i64, PackedChat>>,
    senders: Mutex<HashMap<i64, Sender>>,
}

impl TelegramClient {
    /// Connect using the stored session (file or pre-shared string).
    pub async fn connect(config: &TelegramConfig) -> Result<Self> {
        let (session, session_file) = match &config.session_string {
            Some(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| BotError::Configuration(format!("SESSION_STRING is not valid base64: {e}")))?;
                let session = Session::load(&bytes)
                    .map_err(|e| BotError::Configuration(format!("SESSION_STRING is not a valid session: {e}")))?;
                (session, None)
            }
            None => {
                let path = config.session_path();
                (Session::load_file_or_create(&path)?, Some(path))
            }
        };

        info!("Connecting to Telegram...");
        let client = Client::connect(ClientConfig {
            session,
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            params: InitParams {
                device_model: DEVICE_MODEL.to_string(),
                system_version: SYSTEM_VERSION.to_string(),
                app_version: APP_VERSION.to_string(),
                lang_code: LANG_CODE.to_string(),
                system_lang_code: LANG_CODE.to_string(),
                // Surface FLOOD_WAIT to the caller instead of sleeping inside the library.
                flood_sleep_threshold: 0,
                ..Default::default()
            },
        })
        .await
        .map_err(|e| BotError::Platform(format!("failed to connect: {e}")))?;

        info!("Connected");
        Ok(Self {
            client,
            session_file,
            connected: AtomicBool::new(true),
            chats: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
        })
    }

    pub async fn is_authorized(&self) -> Result<bool> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| BotError::Platform(e.to_string()))
    }

    /// Phone number, then login code, then the 2FA password if the account has one.
    pub async fn login_interactive(&self) -> Result<()> {
        info!("Authorization required");

        let phone = prompt("Введите номер телефона (например, +79161234567): ").await?;
        let token = self
            .client
            .request_login_code(&phone)
            .await
            .map_err(|e| BotError::Authentication(format!("failed to request login code: {e}")))?;
        info!("Login code sent");

        let code = prompt("Введите код из Telegram: ").await?;
        match self.client.sign_in(&token, &code).await {
            Ok(_) => info!("Signed in"),
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().unwrap_or("нет").to_string();
                let password =
                    prompt(&format!("Включена 2FA (подсказка: {hint}). Введите пароль: ")).await?;
                self.client
                    .check_password(password_token, password.as_bytes())
                    .await
                    .map_err(|e| BotError::Authentication(e.to_string()))?;
                info!("Signed in with 2FA");
            }
            Err(e) => return Err(BotError::Authentication(e.to_string())),
        }

        self.save_session()?;
        Ok(())
    }

    /// Wait for the next update. Returns `None` for updates we do not handle.
    pub async fn next_event(&self) -> Result<Option<ChatEvent>> {
        let update = self
            .client
            .next_update()
            .await
            .map_err(|e| BotError::Platform(e.to_string()))?;

        let event = match update {
            Update::NewMessage(message) => self.convert(&message).map(ChatEvent::NewMessage),
            Update::MessageEdited(message) => self.convert(&message).map(ChatEvent::MessageEdited),
            _ => None,
        };
        Ok(event)
    }

    /// Only private chats are handled. Remembers the peer and sender for later calls.
    fn convert(&self, message: &Message) -> Option<IncomingMessage> {
        let chat = message.chat();
        if !matches!(chat, Chat::User(_)) {
            return None;
        }
        if let Ok(mut chats) = self.chats.lock() {
            chats.insert(chat.id(), chat.pack());
        }

        let sender_id = message.sender().map(|sender| {
            let id = sender.id();
            if let Ok(mut senders) = self.senders.lock() {
                senders.insert(
                    id,
                    Sender {
                        id,
                        display_name: sender.name().to_string(),
                    },
                );
            }
            id
        });

        let text = message_body(message.action().is_some(), message.text());

        Some(IncomingMessage {
            chat_id: chat.id(),
            message_id: message.id(),
            sender_id,
            text,
            outgoing: message.outgoing(),
        })
    }

    /// Peer for an outbound call. Fails once `disconnect` has run.
    fn packed_chat(&self, chat_id: i64) -> Result<PackedChat> {
        ensure_connected(self.connected.load(Ordering::SeqCst))?;
        self.chats
            .lock()
            .ok()
            .and_then(|chats| chats.get(&chat_id).copied())
            .ok_or_else(|| BotError::Delivery(format!("unknown chat {chat_id}")))
    }

    fn save_session(&self) -> Result<()> {
        if let Some(path) = &self.session_file {
            self.client.session().save_to_file(path)?;
            debug!("Session saved to {}", path.display());
        }
        Ok(())
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn resolve_sender(&self, msg: &IncomingMessage) -> Result<Option<Sender>> {
        let Some(sender_id) = msg.sender_id else {
            return Ok(None);
        };
        let senders = self
            .senders
            .lock()
            .map_err(|_| BotError::Platform("sender cache poisoned".into()))?;
        Ok(senders.get(&sender_id).cloned())
    }

    async fn reply(&self, msg: &IncomingMessage, text: &str) -> Result<()> {
        let chat = self.packed_chat(msg.chat_id)?;
        self.client
            .send_message(chat, InputMessage::text(text).reply_to(Some(msg.message_id)))
            .await
            .map_err(map_invocation)?;
        Ok(())
    }

    async fn send_reaction(&self, msg: &IncomingMessage, emoji: &str) -> Result<()> {
        let chat = self.packed_chat(msg.chat_id)?;
        let request = tl::functions::messages::SendReaction {
            big: false,
            add_to_recent: true,
            peer: chat.to_input_peer(),
            msg_id: msg.message_id,
            reaction: Some(vec![tl::enums::Reaction::Emoji(tl::types::ReactionEmoji {
                emoticon: emoji.to_string(),
            })]),
        };
        self.client.invoke(&request).await.map_err(map_invocation)?;
        Ok(())
    }

    async fn mark_read(&self, msg: &IncomingMessage) -> Result<()> {
        let chat = self.packed_chat(msg.chat_id)?;
        self.client.mark_as_read(chat).await.map_err(map_invocation)
    }

    async fn get_me(&self) -> Result<Identity> {
        let me = self
            .client
            .get_me()
            .await
            .map_err(|e| BotError::Platform(e.to_string()))?;
        Ok(Identity {
            id: me.id(),
            first_name: me.first_name().to_string(),
            username: me.username().map(str::to_string),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.save_session() {
            warn!("Failed to save session on disconnect: {}", e);
        }
        info!("Disconnected from Telegram");
        Ok(())
    }
}

/// Read one line from the terminal without blocking the runtime.
async fn prompt(message: &str) -> Result<String> {
    let message = message.to_string();
    let line = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut stdout = std::io::stdout();
        stdout.write_all(message.as_bytes())?;
        stdout.flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await
    .map_err(|e| BotError::Authentication(format!("prompt task failed: {e}")))??;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_errors_map_to_rate_limit() {
        assert_eq!(rate_limit_wait("FLOOD_WAIT", Some(17)), Some(17));
        assert_eq!(rate_limit_wait("FLOOD_PREMIUM_WAIT", Some(5)), Some(5));
        assert_eq!(rate_limit_wait("SLOWMODE_WAIT", Some(60)), Some(60));
        assert_eq!(rate_limit_wait("FLOOD_WAIT", None), Some(1));
    }

    #[test]
    fn test_other_rpc_errors_are_not_rate_limits() {
        assert_eq!(rate_limit_wait("USER_IS_BLOCKED", None), None);
        assert_eq!(rate_limit_wait("PEER_FLOOD", Some(3)), None);
    }

    #[test]
    fn test_media_without_caption_keeps_empty_body() {
        assert_eq!(message_body(false, ""), Some(String::new()));
        assert_eq!(message_body(false, "hi"), Some("hi".to_string()));
    }

    #[test]
    fn test_service_message_has_no_body() {
        assert_eq!(message_body(true, ""), None);
    }

    #[test]
    fn test_outbound_calls_fail_after_disconnect() {
        assert!(ensure_connected(true).is_ok());
        assert!(matches!(
            ensure_connected(false),
            Err(BotError::Delivery(_))
        ));
    }
}
