//! C5 — persisted rolling context (`spec.md` §4.5), grounded in the
//! `{version, updatedAt, count, entries}` envelope and atomic write-then-
//! rename pattern from the original Python `ContextManager`.

use crate::domain::context::{ContextEnvelope, LearningEntry, OptimizedStrategy, ReviewEntry, ReviewedSymbolRecord};
use crate::domain::ports::ContextStorePort;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

const REVIEW_CAP: usize = 20;
const STRATEGY_CAP: usize = 10;
const LEARNING_CAP: usize = 20;

pub struct JsonFileContextStore {
    dir: PathBuf,
    review_lock: Mutex<()>,
    strategy_lock: Mutex<()>,
    learning_lock: Mutex<()>,
    reviewed_lock: Mutex<()>,
}

impl JsonFileContextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            review_lock: Mutex::new(()),
            strategy_lock: Mutex::new(()),
            learning_lock: Mutex::new(()),
            reviewed_lock: Mutex::new(()),
        })
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    async fn load_envelope<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<ContextEnvelope<T>>(&bytes) {
                Ok(envelope) => envelope.entries,
                Err(e) => {
                    warn!("context store: failed to parse {}, treating as empty: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("context store: failed to read {}, treating as empty: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Writes to a sibling `.tmp` file then renames over the target — the
    /// rename is atomic on the same filesystem, so a crash mid-write never
    /// leaves a half-written context file.
    async fn save_envelope<T: serde::Serialize>(&self, path: &Path, entries: &[T]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let envelope = ContextEnvelope {
            version: "1.0".to_string(),
            updated_at: Utc::now(),
            count: entries.len(),
            entries,
        };
        let json = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ContextStorePort for JsonFileContextStore {
    async fn load_review_knowledge(&self) -> Vec<ReviewEntry> {
        let _guard = self.review_lock.lock().await;
        Self::load_envelope(&self.path("review_knowledge.json")).await
    }

    async fn add_review(&self, entry: ReviewEntry) {
        let _guard = self.review_lock.lock().await;
        let path = self.path("review_knowledge.json");
        let mut entries: Vec<ReviewEntry> = Self::load_envelope(&path).await;
        entries.push(entry);
        if entries.len() > REVIEW_CAP {
            let overflow = entries.len() - REVIEW_CAP;
            entries.drain(0..overflow);
        }
        if let Err(e) = self.save_envelope(&path, &entries).await {
            error!("failed to persist review knowledge: {}", e);
        }
    }

    async fn load_optimized_strategies(&self) -> Vec<OptimizedStrategy> {
        let _guard = self.strategy_lock.lock().await;
        Self::load_envelope(&self.path("optimized_strategies.json")).await
    }

    async fn add_strategy(&self, entry: OptimizedStrategy) {
        let _guard = self.strategy_lock.lock().await;
        let path = self.path("optimized_strategies.json");
        let mut entries: Vec<OptimizedStrategy> = Self::load_envelope(&path).await;
        entries.push(entry);
        if entries.len() > STRATEGY_CAP {
            let overflow = entries.len() - STRATEGY_CAP;
            entries.drain(0..overflow);
        }
        if let Err(e) = self.save_envelope(&path, &entries).await {
            error!("failed to persist optimized strategies: {}", e);
        }
    }

    async fn load_learning_results(&self) -> Vec<LearningEntry> {
        let _guard = self.learning_lock.lock().await;
        Self::load_envelope(&self.path("learning_results.json")).await
    }

    async fn add_learning(&self, entry: LearningEntry) {
        let _guard = self.learning_lock.lock().await;
        let path = self.path("learning_results.json");
        let mut entries: Vec<LearningEntry> = Self::load_envelope(&path).await;
        entries.push(entry);
        if entries.len() > LEARNING_CAP {
            let overflow = entries.len() - LEARNING_CAP;
            entries.drain(0..overflow);
        }
        if let Err(e) = self.save_envelope(&path, &entries).await {
            error!("failed to persist learning results: {}", e);
        }
    }

    async fn reviewed_symbols_today(&self) -> HashMap<String, ReviewedSymbolRecord> {
        let _guard = self.reviewed_lock.lock().await;
        let path = self.path("reviewed_symbols.json");
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    async fn mark_reviewed(&self, symbol: String, record: ReviewedSymbolRecord) {
        let _guard = self.reviewed_lock.lock().await;
        let path = self.path("reviewed_symbols.json");
        let mut map: HashMap<String, ReviewedSymbolRecord> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        map.insert(symbol, record);
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_vec_pretty(&map) {
            Ok(json) => {
                let tmp_path = path.with_extension("tmp");
                if tokio::fs::write(&tmp_path, json).await.is_ok() {
                    let _ = tokio::fs::rename(&tmp_path, &path).await;
                }
            }
            Err(e) => error!("failed to serialize reviewed symbols: {}", e),
        }
    }

    async fn clear_all(&self) {
        for file_name in ["review_knowledge.json", "optimized_strategies.json", "learning_results.json", "reviewed_symbols.json"] {
            let _ = tokio::fs::remove_file(self.path(file_name)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_review_entry() {
        let dir = tempdir();
        let store = JsonFileContextStore::new(dir.clone());
        store
            .add_review(ReviewEntry {
                symbol: "BTCUSDT".into(),
                score: 0.8,
                strengths: vec!["good entry timing".into()],
                weaknesses: vec![],
                lessons: vec![],
                improvements: vec![],
                summary: "solid trade".into(),
                reviewed_at: Utc::now(),
            })
            .await;

        let loaded = store.load_review_knowledge().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "BTCUSDT");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn evicts_oldest_review_past_cap() {
        let dir = tempdir();
        let store = JsonFileContextStore::new(dir.clone());
        for i in 0..(REVIEW_CAP + 5) {
            store
                .add_review(ReviewEntry {
                    symbol: format!("SYM{i}"),
                    score: 0.5,
                    strengths: vec![],
                    weaknesses: vec![],
                    lessons: vec![],
                    improvements: vec![],
                    summary: String::new(),
                    reviewed_at: Utc::now(),
                })
                .await;
        }
        let loaded = store.load_review_knowledge().await;
        assert_eq!(loaded.len(), REVIEW_CAP);
        assert_eq!(loaded[0].symbol, "SYM5");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn mark_reviewed_round_trips() {
        let dir = tempdir();
        let store = JsonFileContextStore::new(dir.clone());
        store
            .mark_reviewed(
                "ETHUSDT".to_string(),
                ReviewedSymbolRecord { reviewed_at: Utc::now(), trade_info: "closed +1.2%".into() },
            )
            .await;
        let map = store.reviewed_symbols_today().await;
        assert!(map.contains_key("ETHUSDT"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("tradeadvisor-ctx-test-{}", std::process::id()));
        p.push(uuid::Uuid::new_v4().to_string());
        p
    }
}
