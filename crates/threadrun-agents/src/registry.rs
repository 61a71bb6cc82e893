use std::sync::Arc;

use dashmap::DashMap;
use threadrun_common::{ConversationKey, Result, Role, ThreadHandle};
use threadrun_db::ThreadStore;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::gateway::{AssistantGateway, hidden_metadata};

/// Maps each conversation to exactly one remote thread.
///
/// Each key owns a once-cell: the first caller for an unseen key performs the
/// creation while concurrent callers for the same key wait on the cell and
/// receive the winner's handle. A failed creation leaves the cell empty so
/// the next call retries.
pub struct ThreadRegistry {
    gateway: Arc<dyn AssistantGateway>,
    slots: DashMap<ConversationKey, Arc<OnceCell<ThreadHandle>>>,
    store: Option<Arc<dyn ThreadStore>>,
    greeting: Option<String>,
}

impl ThreadRegistry {
    pub fn new(gateway: Arc<dyn AssistantGateway>) -> Self {
        Self {
            gateway,
            slots: DashMap::new(),
            store: None,
            greeting: None,
        }
    }

    /// Seed every new thread with `greeting` as a hidden system message.
    pub fn with_greeting(mut self, greeting: Option<String>) -> Self {
        self.greeting = greeting.filter(|g| !g.trim().is_empty());
        self
    }

    /// Back the in-memory map with durable storage.
    pub fn with_store(mut self, store: Arc<dyn ThreadStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn resolve_or_create(&self, key: &ConversationKey) -> Result<ThreadHandle> {
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let thread = slot.get_or_try_init(|| self.create(key)).await?;
        Ok(thread.clone())
    }

    /// The handle for `key` if one exists, without contacting the service.
    pub fn lookup(&self, key: &ConversationKey) -> Result<Option<ThreadHandle>> {
        if let Some(thread) = self.slots.get(key).and_then(|slot| slot.get().cloned()) {
            return Ok(Some(thread));
        }
        match &self.store {
            Some(store) => store.load(key),
            None => Ok(None),
        }
    }

    /// Number of conversations with a resolved thread in this process.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn create(&self, key: &ConversationKey) -> Result<ThreadHandle> {
        if let Some(store) = &self.store {
            if let Some(thread) = store.load(key)? {
                debug!(thread = %thread, "restored thread from store");
                return Ok(thread);
            }
        }

        let thread = self.gateway.create_thread().await?;
        info!(thread = %thread, "created thread");

        if let Some(greeting) = &self.greeting {
            self.gateway
                .append_message(&thread, Role::System, greeting, hidden_metadata())
                .await?;
        }

        match &self.store {
            Some(store) => store.insert_if_absent(key, &thread),
            None => Ok(thread),
        }
    }
}
