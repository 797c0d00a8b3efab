//! Telegram fetch interface
//!
//! The engine never talks to Telegram directly; it consumes this trait.
//! Production deployments wire in an MTProto-backed client, the CLI and the
//! tests use [`ExportFetcher`] over a JSON chat export.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{Chat, RawMessage};

/// One page of fetched messages plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct FetchPage {
    pub messages: Vec<RawMessage>,
    pub next_cursor: Option<String>,
}

/// Read access to a tenant's Telegram history.
///
/// Within one chat, messages come back in ascending `msg_id` order across
/// pages; the chunker depends on that.
#[async_trait]
pub trait TelegramFetcher: Send + Sync {
    async fn list_chats(&self, tenant_id: i64) -> Result<Vec<Chat>>;

    async fn fetch_messages(
        &self,
        tenant_id: i64,
        chat_id: i64,
        cursor: Option<String>,
    ) -> Result<FetchPage>;
}

/// JSON chat export shape accepted by [`ExportFetcher`].
#[derive(Debug, Deserialize)]
struct ExportFile {
    chats: Vec<Chat>,
    messages: Vec<RawMessage>,
}

/// Fetcher over a static chat export.
#[derive(Debug, Clone)]
pub struct ExportFetcher {
    chats: Vec<Chat>,
    messages: HashMap<i64, Vec<RawMessage>>,
    page_size: usize,
}

impl ExportFetcher {
    const DEFAULT_PAGE_SIZE: usize = 100;

    /// Build from in-memory data; messages are sorted per chat by `msg_id`.
    pub fn new(chats: Vec<Chat>, messages: Vec<RawMessage>) -> Self {
        let mut by_chat: HashMap<i64, Vec<RawMessage>> = HashMap::new();
        for message in messages {
            by_chat.entry(message.chat_id).or_default().push(message);
        }
        for chat_messages in by_chat.values_mut() {
            chat_messages.sort_by_key(|m| m.msg_id);
        }
        Self {
            chats,
            messages: by_chat,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    /// Load a JSON export file: `{"chats": [...], "messages": [...]}`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let export: ExportFile = serde_json::from_str(&content)
            .map_err(|e| Error::Internal(format!("failed to parse export file: {e}")))?;
        Ok(Self::new(export.chats, export.messages))
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl TelegramFetcher for ExportFetcher {
    async fn list_chats(&self, _tenant_id: i64) -> Result<Vec<Chat>> {
        Ok(self.chats.clone())
    }

    async fn fetch_messages(
        &self,
        _tenant_id: i64,
        chat_id: i64,
        cursor: Option<String>,
    ) -> Result<FetchPage> {
        let all = match self.messages.get(&chat_id) {
            Some(messages) => messages,
            None => {
                return Ok(FetchPage {
                    messages: Vec::new(),
                    next_cursor: None,
                })
            }
        };

        let offset = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| Error::Internal(format!("bad pagination cursor: {raw}")))?,
            None => 0,
        };

        let end = (offset + self.page_size).min(all.len());
        let page = all[offset..end].to_vec();
        let next_cursor = if end < all.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(FetchPage {
            messages: page,
            next_cursor,
        })
    }
}
