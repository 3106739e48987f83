//! In-process brute-force vector backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{SearchRequest, VectorBackend};
use crate::error::VectorError;
use crate::filter::{Condition, Filter};
use crate::similarity;
use crate::types::{CollectionConfig, CollectionStats, SearchResult, VectorPoint};

#[derive(Debug)]
struct Collection {
    config: CollectionConfig,
    points: BTreeMap<String, VectorPoint>,
}

/// Backend holding collections in memory and scoring every point per search.
///
/// Filter support can be narrowed to exercise the store's client-side
/// fallback, and upserts can be made to fail after a number of calls.
#[derive(Debug)]
pub struct InMemoryVectorBackend {
    collections: RwLock<HashMap<String, Collection>>,
    text_filters: bool,
    available: AtomicBool,
    upsert_calls: AtomicUsize,
    fail_upserts_after: AtomicUsize,
    search_calls: AtomicUsize,
    last_search: RwLock<Option<SearchRequest>>,
}

impl Default for InMemoryVectorBackend {
    fn default() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            text_filters: true,
            available: AtomicBool::new(true),
            upsert_calls: AtomicUsize::new(0),
            fail_upserts_after: AtomicUsize::new(usize::MAX),
            search_calls: AtomicUsize::new(0),
            last_search: RwLock::new(None),
        }
    }
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `TextContains` filters as unsupported, like a remote index
    /// without full-text payload indexes.
    pub fn without_text_filters(mut self) -> Self {
        self.text_filters = false;
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Let `n` more upsert calls succeed, then fail the rest.
    pub fn fail_upserts_after(&self, n: usize) {
        let done = self.upsert_calls.load(Ordering::SeqCst);
        self.fail_upserts_after
            .store(done.saturating_add(n), Ordering::SeqCst);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// The most recent request passed to `search`.
    pub fn last_search(&self) -> Option<SearchRequest> {
        self.last_search
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of points stored in a collection.
    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map_or(0, |c| c.points.len())
    }

    fn check_available(&self) -> Result<(), VectorError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VectorError::Unavailable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionStats>, VectorError> {
        self.check_available()?;
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections.get(name).map(|c| CollectionStats {
            point_count: c.points.len() as u64,
            config: c.config,
        }))
    }

    async fn create_collection(
        &self,
        name: &str,
        config: &CollectionConfig,
    ) -> Result<bool, VectorError> {
        self.check_available()?;
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if collections.contains_key(name) {
            return Ok(false);
        }
        collections.insert(
            name.to_string(),
            Collection {
                config: *config,
                points: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool, VectorError> {
        self.check_available()?;
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(collections.remove(name).is_some())
    }

    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<(), VectorError> {
        self.check_available()?;
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.fail_upserts_after.load(Ordering::SeqCst) {
            return Err(VectorError::Unavailable("upsert failed".to_string()));
        }

        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        for point in points {
            if point.vector.len() != target.config.vector_size {
                return Err(VectorError::Rejected(format!(
                    "wrong vector size for point {}",
                    point.id
                )));
            }
        }
        for point in points {
            target.points.insert(point.id.clone(), point.clone());
        }
        debug!(collection = %collection, count = points.len(), "Upserted points");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<Vec<SearchResult>, VectorError> {
        self.check_available()?;
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_search
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(request.clone());

        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let target = collections
            .get(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        let mut hits: Vec<SearchResult> = target
            .points
            .values()
            .filter(|p| request.filter.as_ref().map_or(true, |f| f.matches(&p.payload)))
            .map(|p| SearchResult {
                id: p.id.clone(),
                score: similarity::score(target.config.distance, &request.vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|hit| request.score_threshold.map_or(true, |t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(request.limit);
        Ok(hits)
    }

    fn supports_filter(&self, filter: &Filter) -> bool {
        self.text_filters
            || !filter
                .conditions()
                .any(|c| matches!(c, Condition::TextContains { .. }))
    }
}
