//! Queue directory
//!
//! Maps queue names (and their URLs) to live stores. Deleting a queue closes
//! its store under the store's own lock, so operations racing with the
//! deletion observe a missing queue instead of a half-torn-down one.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::queue::{is_valid_queue_name, InvalidAttribute, QueueConfig, QueueInfo};
use crate::receipt::{fits_in_handle, MAX_ID_LEN};
use crate::store::{Capabilities, QueueStore};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid queue name: {0}")]
    InvalidName(String),

    #[error("Invalid queue attribute: {0}")]
    InvalidConfig(#[from] InvalidAttribute),

    #[error("Queue already exists with different attributes: {0}")]
    QueueAlreadyExists(String),

    #[error("Queue does not exist: {0}")]
    QueueDoesNotExist(String),

    #[error("Generated queue id is {0} bytes, maximum is {MAX_ID_LEN}")]
    IdTooLong(usize),
}

pub struct QueueRegistry {
    queues: DashMap<String, Arc<QueueStore>>,
    caps: Capabilities,
    base_url: String,
    account_id: String,
}

impl QueueRegistry {
    pub fn new(caps: Capabilities, base_url: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            queues: DashMap::new(),
            caps,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            account_id: account_id.into(),
        }
    }

    pub fn queue_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.account_id, name)
    }

    /// Create a queue, or return the existing one when its attributes are
    /// identical
    pub fn create_queue(&self, name: &str, config: QueueConfig) -> Result<QueueInfo, RegistryError> {
        if !is_valid_queue_name(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        config.validate()?;

        match self.queues.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                let info = existing.get().info();
                if info.config == config {
                    Ok(info.clone())
                } else {
                    Err(RegistryError::QueueAlreadyExists(name.to_string()))
                }
            }
            Entry::Vacant(slot) => {
                let id = self.caps.ids.new_queue_id();
                if !fits_in_handle(&id) {
                    return Err(RegistryError::IdTooLong(id.len()));
                }
                let info = QueueInfo {
                    id,
                    name: name.to_string(),
                    url: self.queue_url(name),
                    created_timestamp: self.caps.clock.now().timestamp(),
                    config,
                };
                info!(name = %name, url = %info.url, id = %info.id, "Creating queue");
                slot.insert(Arc::new(QueueStore::new(info.clone(), self.caps.clone())));
                Ok(info)
            }
        }
    }

    /// Look up a queue by name or by its full URL
    pub fn resolve(&self, name_or_url: &str) -> Result<Arc<QueueStore>, RegistryError> {
        self.queues
            .get(queue_name_from(name_or_url))
            .filter(|store| addresses(store, name_or_url))
            .map(|store| Arc::clone(store.value()))
            .ok_or_else(|| RegistryError::QueueDoesNotExist(name_or_url.to_string()))
    }

    /// Remove a queue and discard its messages
    pub fn delete_queue(&self, name_or_url: &str) -> Result<QueueInfo, RegistryError> {
        let (_, store) = self
            .queues
            .remove_if(queue_name_from(name_or_url), |_, store| {
                addresses(store, name_or_url)
            })
            .ok_or_else(|| RegistryError::QueueDoesNotExist(name_or_url.to_string()))?;

        let discarded = store.close();
        info!(name = %store.name(), discarded, "Deleted queue");
        Ok(store.info().clone())
    }

    /// URLs of all queues whose name starts with `prefix`, sorted
    pub fn list_queues(&self, prefix: Option<&str>) -> Vec<String> {
        let mut urls: Vec<String> = self
            .queues
            .iter()
            .filter(|q| prefix.map_or(true, |p| q.key().starts_with(p)))
            .map(|q| q.value().info().url.clone())
            .collect();
        urls.sort();
        urls
    }

    pub fn get_queue_url(&self, name: &str) -> Result<String, RegistryError> {
        self.queues
            .get(name)
            .map(|q| q.value().info().url.clone())
            .ok_or_else(|| RegistryError::QueueDoesNotExist(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

fn queue_name_from(name_or_url: &str) -> &str {
    name_or_url.rsplit('/').next().unwrap_or(name_or_url)
}

/// A bare name addresses the queue of that name; a URL must match exactly
fn addresses(store: &QueueStore, name_or_url: &str) -> bool {
    !name_or_url.contains('/') || store.info().url == name_or_url
}
