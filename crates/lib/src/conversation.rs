//! Conversation continuity: user id <-> Dify conversation id.
//!
//! The mapping lives for the process lifetime. The store is a trait so a persistent
//! backing can replace the in-memory map without touching the pipeline.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keyed lookup and assignment of conversation ids.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Conversation id stored for the user, if any.
    async fn get(&self, user_id: &str) -> Option<String>;

    /// Save or overwrite the user's conversation id (last writer wins).
    async fn save(&self, user_id: &str, conversation_id: &str);

    /// Generate a fresh conversation id for the user, store it and return it.
    async fn generate(&self, user_id: &str) -> String;

    /// Forget the user's conversation id.
    async fn delete(&self, user_id: &str);
}

/// In-memory store: user_id -> conversation_id behind a reader/writer lock.
pub struct InMemoryConversationStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of users with a stored conversation.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, user_id: &str) -> Option<String> {
        let found = self.inner.read().await.get(user_id).cloned();
        match &found {
            Some(id) => log::debug!("conversation: user {} -> {}", user_id, id),
            None => log::debug!("conversation: no id stored for user {}", user_id),
        }
        found
    }

    async fn save(&self, user_id: &str, conversation_id: &str) {
        self.inner
            .write()
            .await
            .insert(user_id.to_string(), conversation_id.to_string());
        log::debug!("conversation: saved {} for user {}", conversation_id, user_id);
    }

    async fn generate(&self, user_id: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.inner
            .write()
            .await
            .insert(user_id.to_string(), id.clone());
        log::info!("conversation: generated {} for user {}", id, user_id);
        id
    }

    async fn delete(&self, user_id: &str) {
        if self.inner.write().await.remove(user_id).is_some() {
            log::info!("conversation: deleted id for user {}", user_id);
        }
    }
}

/// Resolve the conversation id for one pipeline run.
///
/// An id supplied by the caller is adopted and written through. Otherwise the stored id is
/// used. With neither, `None` is returned and Dify opens a new conversation.
pub async fn resolve_conversation(
    store: &dyn ConversationStore,
    user_id: &str,
    requested: Option<&str>,
) -> Option<String> {
    match requested.filter(|id| !id.is_empty()) {
        Some(id) => {
            store.save(user_id, id).await;
            log::info!("conversation: request supplied {} for user {}", id, user_id);
            Some(id.to_string())
        }
        None => {
            let stored = store.get(user_id).await;
            if stored.is_none() {
                log::info!(
                    "conversation: none for user {}, dify will start a new one",
                    user_id
                );
            }
            stored
        }
    }
}
