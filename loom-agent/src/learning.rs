use crate::classifier::IssueCategory;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;

const KEYWORDS_MAX: usize = 64;
const KEYWORD_MIN_CHARS: usize = 3;

/// Accumulated outcome statistics for one issue category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningPattern {
    pub category: IssueCategory,
    pub successes: u32,
    pub total_uses: u32,
    /// Always `successes / total_uses`.
    pub success_rate: f64,
    pub last_used: DateTime<Utc>,
    pub description: String,
    /// Signature used by `find_similar`.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl LearningPattern {
    fn new(category: IssueCategory) -> Self {
        Self {
            category,
            successes: 0,
            total_uses: 0,
            success_rate: 0.0,
            last_used: Utc::now(),
            description: String::new(),
            keywords: vec![],
        }
    }

    fn record(&mut self, success: bool, issue: &str, description: &str) {
        self.total_uses = self.total_uses.saturating_add(1);
        if success {
            self.successes = self.successes.saturating_add(1);
        }
        self.success_rate = f64::from(self.successes) / f64::from(self.total_uses);
        self.last_used = Utc::now();
        if !description.trim().is_empty() {
            self.description = description.trim().to_string();
        }
        for word in keywords(issue) {
            if self.keywords.len() >= KEYWORDS_MAX {
                break;
            }
            if !self.keywords.contains(&word) {
                self.keywords.push(word);
            }
        }
    }
}

/// Keyed pattern storage. Durability is up to the backend.
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn get(&self, category: IssueCategory) -> Result<Option<LearningPattern>>;
    async fn upsert(&self, pattern: LearningPattern) -> Result<()>;
    async fn read_all(&self) -> Result<Vec<LearningPattern>>;
}

#[derive(Debug, Default)]
pub struct InMemoryLearningStore {
    patterns: Mutex<BTreeMap<IssueCategory, LearningPattern>>,
}

impl InMemoryLearningStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LearningStore for InMemoryLearningStore {
    async fn get(&self, category: IssueCategory) -> Result<Option<LearningPattern>> {
        Ok(self.patterns.lock().await.get(&category).cloned())
    }

    async fn upsert(&self, pattern: LearningPattern) -> Result<()> {
        self.patterns.lock().await.insert(pattern.category, pattern);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<LearningPattern>> {
        Ok(self.patterns.lock().await.values().cloned().collect())
    }
}

/// Outcome memory shared by every OODA cycle in the process.
///
/// Updates are read-modify-write against the store, so they go through one async lock;
/// concurrent conversations can share an instance.
pub struct LearningMemory {
    store: Arc<dyn LearningStore>,
    write_lock: Mutex<()>,
}

impl LearningMemory {
    pub fn new(store: Arc<dyn LearningStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLearningStore::new()))
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(category = %category, success = success)
    )]
    pub async fn record_outcome(
        &self,
        category: IssueCategory,
        issue: &str,
        success: bool,
        description: &str,
    ) -> Result<LearningPattern> {
        let _guard = self.write_lock.lock().await;
        let mut pattern = self
            .store
            .get(category)
            .await?
            .unwrap_or_else(|| LearningPattern::new(category));
        pattern.record(success, issue, description);
        self.store.upsert(pattern.clone()).await?;
        tracing::debug!(
            success_rate = pattern.success_rate,
            total_uses = pattern.total_uses,
            "learning pattern updated"
        );
        Ok(pattern)
    }

    pub async fn get(&self, category: IssueCategory) -> Result<Option<LearningPattern>> {
        self.store.get(category).await
    }

    pub async fn patterns(&self) -> Result<Vec<LearningPattern>> {
        self.store.read_all().await
    }

    /// Patterns sharing at least one keyword with `issue`, best match first.
    pub async fn find_similar(&self, issue: &str) -> Result<Vec<LearningPattern>> {
        let wanted: BTreeSet<String> = keywords(issue).into_iter().collect();
        if wanted.is_empty() {
            return Ok(vec![]);
        }
        let mut scored: Vec<(usize, LearningPattern)> = self
            .store
            .read_all()
            .await?
            .into_iter()
            .map(|p| {
                let overlap = p.keywords.iter().filter(|k| wanted.contains(*k)).count();
                (overlap, p)
            })
            .filter(|(overlap, _)| *overlap > 0)
            .collect();
        scored.sort_by(|(oa, a), (ob, b)| {
            ob.cmp(oa)
                .then_with(|| b.success_rate.total_cmp(&a.success_rate))
        });
        Ok(scored.into_iter().map(|(_, p)| p).collect())
    }
}

fn keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= KEYWORD_MIN_CHARS)
    {
        if !out.contains(&word) {
            out.push(word);
        }
    }
    out
}
