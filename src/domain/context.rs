//! Context store data types (C5, `spec.md` §3 "Context state").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{version, updatedAt, count, <payload-array>}` envelope shared by all
/// three rolling context files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEnvelope<T> {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    pub count: usize,
    pub entries: Vec<T>,
}

impl<T> ContextEnvelope<T> {
    pub fn new(entries: Vec<T>) -> Self {
        Self { version: "1.0".to_string(), updated_at: Utc::now(), count: entries.len(), entries }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub symbol: String,
    pub score: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub lessons: Vec<String>,
    pub improvements: Vec<String>,
    pub summary: String,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedStrategy {
    pub name: String,
    pub rules: Vec<String>,
    pub entry_conditions: Vec<String>,
    pub exit_rules: Vec<String>,
    pub based_on_reviews: usize,
    pub optimization_points: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningEntry {
    pub topic: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Per-day dedup record: `{symbol: {reviewedAt, tradeInfo}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewedSymbolRecord {
    pub reviewed_at: DateTime<Utc>,
    pub trade_info: String,
}
