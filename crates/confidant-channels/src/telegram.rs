//! Telegram channel — private bot for a single authorized user, via `teloxide`.
//!
//! - Long polling (no webhook or public IP needed)
//! - Private chats only; group updates are ignored
//! - Anyone but the authorized user gets a refusal reply
//! - Text and photos (largest size, downloaded to the media directory)
//! - Markdown → Telegram HTML, with a plain-text fallback
//! - Replies longer than 4096 characters are split

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, ChatAction, FileId, MediaKind, MessageKind, ParseMode, UpdateKind};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use confidant_core::bus::queue::MessageBus;
use confidant_core::bus::types::{InboundMessage, OutboundMessage};
use confidant_core::types::MediaAttachment;

use crate::base::Channel;
use crate::formatting::{markdown_to_telegram_html, split_message};

const TELEGRAM_MAX_LEN: usize = 4096;
const POLL_TIMEOUT_SECS: u32 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

pub const UNAUTHORIZED_TEXT: &str =
    "❌ Lo siento, no estás autorizado para usar este bot.\nEste bot es de uso privado.";
const PHOTO_DOWNLOAD_ERROR_TEXT: &str =
    "❌ Error al descargar la imagen. Por favor, intenta de nuevo.";

/// Local file name for a downloaded photo, keeping the remote extension.
pub fn photo_file_name(file_id: &str, remote_path: &str) -> String {
    let ext = Path::new(remote_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg");
    format!("{}.{ext}", file_id.replace(['/', '\\'], "_"))
}

// ─────────────────────────────────────────────
// TelegramChannel
// ─────────────────────────────────────────────

pub struct TelegramChannel {
    bot: Bot,
    bus: Arc<MessageBus>,
    /// The only Telegram user id served. `None` refuses everyone.
    allowed_user: Option<i64>,
    media_dir: PathBuf,
    shutdown: Arc<Notify>,
}

impl TelegramChannel {
    pub fn new(
        token: &str,
        bus: Arc<MessageBus>,
        allowed_user: Option<i64>,
        media_dir: PathBuf,
    ) -> Self {
        Self {
            bot: Bot::new(token),
            bus,
            allowed_user,
            media_dir,
            shutdown: Arc::new(Notify::new()),
        }
    }

    fn is_authorized(&self, user_id: u64) -> bool {
        self.allowed_user
            .is_some_and(|allowed| i64::try_from(user_id).is_ok_and(|id| id == allowed))
    }

    async fn handle_update(&self, update: &Update) {
        let UpdateKind::Message(message) = &update.kind else {
            return;
        };
        let Some(user) = message.from.as_ref() else {
            return;
        };

        if !message.chat.is_private() {
            debug!(chat = message.chat.id.0, "ignoring non-private chat");
            return;
        }

        if !self.is_authorized(user.id.0) {
            warn!(
                user_id = user.id.0,
                username = user.username.as_deref().unwrap_or("-"),
                "unauthorized access attempt"
            );
            if let Err(e) = self.bot.send_message(message.chat.id, UNAUTHORIZED_TEXT).await {
                debug!(error = %e, "failed to send refusal");
            }
            return;
        }

        let chat_id = message.chat.id.0.to_string();
        let sender_id = user.id.0.to_string();

        let MessageKind::Common(common) = &message.kind else {
            return;
        };
        let mut inbound = match &common.media_kind {
            MediaKind::Text(text) => InboundMessage::new("telegram", &sender_id, &chat_id, &text.text),
            MediaKind::Photo(photo) => {
                let Some(largest) = photo.photo.last() else {
                    return;
                };
                let path = match self.download_photo(&largest.file.id.0).await {
                    Ok(path) => path,
                    Err(e) => {
                        error!(error = %format!("{e:#}"), "failed to download photo");
                        if let Err(e) = self
                            .bot
                            .send_message(message.chat.id, PHOTO_DOWNLOAD_ERROR_TEXT)
                            .await
                        {
                            debug!(error = %e, "failed to report download error");
                        }
                        return;
                    }
                };
                let caption = photo.caption.clone().unwrap_or_default();
                let mut inbound = InboundMessage::new("telegram", &sender_id, &chat_id, caption);
                inbound.media.push(MediaAttachment {
                    mime_type: "image/jpeg".into(),
                    path,
                    size: Some(largest.file.size as u64),
                });
                inbound
            }
            _ => {
                debug!("unsupported telegram message kind, ignoring");
                return;
            }
        };

        inbound
            .metadata
            .insert("message_id".into(), message.id.0.to_string());
        if let Some(username) = &user.username {
            inbound.metadata.insert("username".into(), username.clone());
        }
        inbound
            .metadata
            .insert("first_name".into(), user.first_name.clone());

        // Best effort; the indicator lapses by itself after a few seconds.
        if let Err(e) = self
            .bot
            .send_chat_action(message.chat.id, ChatAction::Typing)
            .await
        {
            debug!(error = %e, "typing indicator failed");
        }

        debug!(
            chat = %chat_id,
            photos = inbound.media.len(),
            chars = inbound.content.chars().count(),
            "telegram inbound message"
        );
        if let Err(e) = self.bus.publish_inbound(inbound).await {
            error!(error = %e, "failed to publish telegram message to bus");
        }
    }

    /// Download a file into the media directory and return its local path.
    async fn download_photo(&self, file_id: &str) -> anyhow::Result<String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .send()
            .await
            .context("get_file failed")?;

        tokio::fs::create_dir_all(&self.media_dir)
            .await
            .with_context(|| format!("cannot create {}", self.media_dir.display()))?;
        let local_path = self.media_dir.join(photo_file_name(file_id, &file.path));

        let mut dst = tokio::fs::File::create(&local_path).await?;
        let mut stream = self.bot.download_file_stream(&file.path);
        while let Some(chunk) = stream.next().await {
            dst.write_all(&chunk?).await?;
        }
        dst.flush().await?;

        debug!(path = %local_path.display(), "downloaded telegram photo");
        Ok(local_path.display().to_string())
    }
}

/// One outgoing Telegram message: its HTML rendering and the plain source.
#[derive(Debug, PartialEq)]
struct Chunk {
    html: String,
    plain: String,
}

/// Split the Markdown source first, then render each piece, so no HTML tag
/// spans two messages.
fn render_chunks(text: &str) -> Vec<Chunk> {
    split_message(text, TELEGRAM_MAX_LEN)
        .into_iter()
        .map(|plain| Chunk {
            html: markdown_to_telegram_html(&plain),
            plain,
        })
        .collect()
}

/// Send every chunk as HTML, falling back to plain text for a rejected chunk
/// only. `send(text, html)` performs one Telegram request.
async fn deliver_chunks<F, Fut>(chunks: &[Chunk], mut send: F) -> anyhow::Result<()>
where
    F: FnMut(String, bool) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    for (index, chunk) in chunks.iter().enumerate() {
        if let Err(e) = send(chunk.html.clone(), true).await {
            debug!(chunk = index, error = %e, "HTML chunk rejected, resending as plain text");
            send(chunk.plain.clone(), false)
                .await
                .with_context(|| format!("telegram send failed at chunk {index}"))?;
        }
    }
    Ok(())
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("starting telegram channel (long polling)");

        let commands = vec![
            BotCommand::new("start", "Mensaje de bienvenida"),
            BotCommand::new("help", "Ver ayuda completa"),
            BotCommand::new("stats", "Estadísticas del sistema"),
            BotCommand::new("clear", "Limpiar historial"),
            BotCommand::new("load", "Listar o cargar modelos"),
            BotCommand::new("unload", "Descargar el modelo actual"),
            BotCommand::new("exit", "Cerrar el bot"),
        ];
        if let Err(e) = self.bot.set_my_commands(commands).await {
            warn!(error = %e, "failed to set bot commands menu");
        }

        let mut offset: i32 = 0;
        loop {
            tokio::select! {
                updates = self.bot.get_updates().offset(offset).timeout(POLL_TIMEOUT_SECS).send() => {
                    match updates {
                        Ok(updates) => {
                            for update in &updates {
                                offset = (update.id.0 as i32).wrapping_add(1);
                                self.handle_update(update).await;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "telegram polling error");
                            tokio::time::sleep(POLL_RETRY_DELAY).await;
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("telegram channel shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        // Stored permit: a stop issued while an update is handled is not lost.
        self.shutdown.notify_one();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let chat_id: i64 = msg
            .chat_id
            .parse()
            .with_context(|| format!("invalid telegram chat_id: {}", msg.chat_id))?;
        let chat = ChatId(chat_id);

        let bot = &self.bot;
        deliver_chunks(&render_chunks(&msg.content), |text, html| async move {
            let request = bot.send_message(chat, text);
            if html {
                request.parse_mode(ParseMode::Html).await?;
            } else {
                request.await?;
            }
            Ok::<_, anyhow::Error>(())
        })
        .await?;

        debug!(chat_id, "telegram message sent");
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
