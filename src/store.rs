// ===============================
// src/store.rs
// ===============================
//
// Single-slot persistence of the open deal (JSON file).
// - store()  : overwrite via temp file + rename, parent dir created on demand
// - load()   : None on first run, unreadable file, or stale deal
// - clear()  : remove the slot after a sell (missing file is fine)
//
// Failures are logged and never block trading.
//
use chrono::{Duration, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::domain::Deal;
use crate::error::{BotError, Result};

pub struct DealStore {
    path: PathBuf,
    max_age: Duration,
}

impl DealStore {
    pub fn new(path: impl AsRef<Path>, max_age: Duration) -> Self {
        Self { path: path.as_ref().to_path_buf(), max_age }
    }

    pub fn path(&self) -> &Path { &self.path }

    pub async fn store(&self, deal: &Deal) {
        match self.try_store(deal).await {
            Ok(()) => info!(path = %self.path.display(), asset = %deal.asset, price = deal.price, "deal stored"),
            Err(e) => warn!(%e, path = %self.path.display(), "failed to store deal"),
        }
    }

    pub async fn load(&self) -> Option<Deal> {
        match self.try_load().await {
            Ok(Some(deal)) => {
                let age = Utc::now().signed_duration_since(deal.timestamp);
                if age > self.max_age {
                    info!(asset = %deal.asset, age_h = age.num_hours(), "ignoring stale deal");
                    return None;
                }
                info!(asset = %deal.asset, amount = deal.amount, price = deal.price, "loaded deal");
                Some(deal)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(%e, path = %self.path.display(), "failed to load deal");
                None
            }
        }
    }

    pub async fn clear(&self) {
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(?e, path = %self.path.display(), "failed to clear deal"),
        }
    }

    async fn try_store(&self, deal: &Deal) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let raw = serde_json::to_vec_pretty(deal).map_err(|e| BotError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn try_load(&self) -> Result<Option<Deal>> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let deal = serde_json::from_slice(&raw).map_err(|e| BotError::Persistence(e.to_string()))?;
        Ok(Some(deal))
    }
}
