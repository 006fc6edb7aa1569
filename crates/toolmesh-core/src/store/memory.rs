//! In-memory conversation store

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::types::{default_title, generate_message_id, Conversation, ConversationMessage};

use super::traits::{ConversationStore, StoreError, StoreResult};

struct Record {
    conversation: Conversation,
    messages: Vec<ConversationMessage>,
    ids: HashSet<String>,
    /// Monotonic activity counter; orders `list` without relying on clock resolution
    activity: u64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Record>,
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert_new(&mut self, id: String, title: Option<&str>, model_provider: Option<&str>) -> &mut Record {
        let now = Utc::now();
        let activity = self.tick();
        self.records.entry(id.clone()).or_insert_with(|| Record {
            conversation: Conversation {
                id,
                title: title.map(str::to_string).unwrap_or_else(default_title),
                model_provider: model_provider.map(str::to_string),
                created_at: now,
                updated_at: now,
                message_count: 0,
            },
            messages: Vec::new(),
            ids: HashSet::new(),
            activity,
        })
    }
}

/// Conversation store kept in process memory
#[derive(Default)]
pub struct MemoryConversationStore {
    inner: RwLock<Inner>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create(&self, title: Option<&str>, model_provider: Option<&str>) -> StoreResult<Conversation> {
        let mut inner = self.inner.write();
        let record = inner.insert_new(generate_message_id(), title, model_provider);
        Ok(record.conversation.clone())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Conversation>> {
        Ok(self.inner.read().records.get(id).map(|r| r.conversation.clone()))
    }

    async fn save(
        &self,
        conversation_id: &str,
        model_provider: Option<&str>,
        messages: &[ConversationMessage],
    ) -> StoreResult<usize> {
        let mut inner = self.inner.write();
        if !inner.records.contains_key(conversation_id) {
            inner.insert_new(conversation_id.to_string(), None, model_provider);
        }
        let activity = inner.tick();
        let record = inner
            .records
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;

        let mut added = 0;
        for message in messages {
            if record.ids.insert(message.id.clone()) {
                record.messages.push(message.clone());
                added += 1;
            }
        }

        if added > 0 {
            record.activity = activity;
            record.conversation.updated_at = Utc::now();
            record.conversation.message_count = record.messages.len();
            if let Some(provider) = model_provider {
                record.conversation.model_provider = Some(provider.to_string());
            }
        }
        Ok(added)
    }

    async fn load(&self, id: &str) -> StoreResult<Vec<ConversationMessage>> {
        Ok(self
            .inner
            .read()
            .records
            .get(id)
            .map(|r| r.messages.clone())
            .unwrap_or_default())
    }

    async fn list(&self) -> StoreResult<Vec<Conversation>> {
        let inner = self.inner.read();
        let mut records: Vec<&Record> = inner.records.values().collect();
        records.sort_by(|a, b| b.activity.cmp(&a.activity));
        Ok(records.into_iter().map(|r| r.conversation.clone()).collect())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        Ok(self.inner.write().records.remove(id).is_some())
    }

    async fn rename(&self, id: &str, title: &str) -> StoreResult<Conversation> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.conversation.title = title.to_string();
        record.conversation.updated_at = Utc::now();
        Ok(record.conversation.clone())
    }
}
