//! Serialised access to the singleton self-model.
//!
//! Both the conversation handler (partner-name detection) and the
//! consolidation engine write the self-model, possibly at the same time.
//! Every write here is read-modify-write under one lock: reload from the
//! store, mutate, save. Last-writer-wins at the store level is not enough.

use crate::store::SqliteStore;
use anyhow::Result;
use reveries_core::SelfModel;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SelfModelManager {
    store: Arc<SqliteStore>,
    /// Guards the reload-mutate-save sequence; also caches the last-saved
    /// model so readers never touch the store.
    current: Mutex<SelfModel>,
}

impl SelfModelManager {
    /// Load the persisted model, creating a blank one on first wake.
    pub async fn load_or_create(store: Arc<SqliteStore>) -> Result<Self> {
        let model = match store.load_self_model().await? {
            Some(m) => m,
            None => {
                tracing::info!("No self-model found, starting blank");
                let blank = SelfModel::default();
                store.save_self_model(&blank).await?;
                blank
            }
        };
        Ok(Self {
            store,
            current: Mutex::new(model),
        })
    }

    /// Snapshot of the current model.
    pub async fn current(&self) -> SelfModel {
        self.current.lock().await.clone()
    }

    /// Read-modify-write: reload from the store under the lock, apply `f`,
    /// persist, refresh the cache.
    pub async fn update<F>(&self, f: F) -> Result<SelfModel>
    where
        F: FnOnce(&mut SelfModel),
    {
        let mut guard = self.current.lock().await;
        let mut model = self.store.load_self_model().await?.unwrap_or_default();
        f(&mut model);
        model.updated_at = chrono::Utc::now().timestamp();
        self.store.save_self_model(&model).await?;
        *guard = model.clone();
        Ok(model)
    }

    /// Record a detected partner name. No-op if a name is already set.
    pub async fn detect_partner_name(&self, name: &str) -> Result<bool> {
        let mut taken = false;
        self.update(|m| taken = m.detect_partner_name(name)).await?;
        if taken {
            tracing::info!("Partner introduced themselves as {}", name);
        }
        Ok(taken)
    }

    /// Explicit rename, overwriting any detected name.
    pub async fn rename_partner(&self, name: &str) -> Result<()> {
        self.update(|m| m.rename_partner(name)).await?;
        Ok(())
    }
}
