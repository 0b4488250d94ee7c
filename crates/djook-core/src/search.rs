//! Person search: fan a target image out to one comparison per reference
//! person, join all of them, keep the names that matched.

use crate::comparer::{FaceComparer, RecognitionServiceError};
use crate::dataset::ReferenceDataset;
use crate::types::{
    ComparisonRequest, ComparisonResult, SearchResult, TargetImage, DEFAULT_SIMILARITY_THRESHOLD,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("comparison against {person:?} failed: {source}")]
    Recognition {
        person: String,
        #[source]
        source: RecognitionServiceError,
    },
    #[error("search cancelled")]
    Cancelled,
    #[error("comparison task failed: {0}")]
    TaskFailed(String),
}

/// Cooperative cancellation flag shared between a caller and a search.
///
/// Checked before each comparison is started; calls already in flight run
/// to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Tuning for [`PersonSearch`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Similarity (0–100) a face must reach to count as a match.
    pub similarity_threshold: f32,
    /// Comparisons in flight per search. 0 = one per reference person.
    pub max_concurrent_per_request: usize,
    /// Comparisons in flight across all searches. 0 = unbounded.
    pub max_concurrent_global: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_concurrent_per_request: 8,
            max_concurrent_global: 0,
        }
    }
}

/// Orchestrates one comparison per reference person for a target image.
///
/// Stateless across calls: the dataset is shared read-only and each search
/// owns its task group.
pub struct PersonSearch {
    dataset: Arc<ReferenceDataset>,
    comparer: Arc<dyn FaceComparer>,
    options: SearchOptions,
    global_limit: Option<Arc<Semaphore>>,
}

impl PersonSearch {
    pub fn new(
        dataset: Arc<ReferenceDataset>,
        comparer: Arc<dyn FaceComparer>,
        options: SearchOptions,
    ) -> Self {
        let global_limit = match options.max_concurrent_global {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        Self {
            dataset,
            comparer,
            options,
            global_limit,
        }
    }

    pub fn dataset(&self) -> &ReferenceDataset {
        &self.dataset
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Names of the reference persons whose face appears in `target`, in
    /// dataset order.
    ///
    /// Fails as a whole if any single comparison fails; a person whose
    /// comparison errored is never reported as absent.
    pub async fn search(
        &self,
        target: &TargetImage,
        cancel: Option<&CancelToken>,
    ) -> Result<SearchResult, SearchError> {
        let results = self.compare_all(target, cancel).await?;
        let matched = reduce_matches(&results);
        tracing::info!(
            persons = results.len(),
            matched = matched.len(),
            "person search complete"
        );
        Ok(matched)
    }

    /// Run every comparison and return the per-person results in dataset
    /// order, including persons with no match.
    pub async fn compare_all(
        &self,
        target: &TargetImage,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<ComparisonResult>, SearchError> {
        let cancel = cancel.cloned();
        if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(SearchError::Cancelled);
        }

        let count = self.dataset.len();
        if count == 0 {
            return Ok(Vec::new());
        }

        let per_request = match self.options.max_concurrent_per_request {
            0 => count,
            n => n.min(count),
        };
        let local_limit = Arc::new(Semaphore::new(per_request));

        let mut tasks = JoinSet::new();
        for (index, person) in self.dataset.iter().enumerate() {
            let request = ComparisonRequest {
                source_image: person.image.clone(),
                target_image: target.bytes().clone(),
                similarity_threshold: self.options.similarity_threshold,
            };
            let person_name = person.name.clone();
            let comparer = Arc::clone(&self.comparer);
            let local_limit = Arc::clone(&local_limit);
            let global_limit = self.global_limit.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let outcome = run_comparison(
                    comparer.as_ref(),
                    person_name,
                    request,
                    &local_limit,
                    global_limit.as_deref(),
                    cancel.as_ref(),
                )
                .await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<ComparisonResult>> = (0..count).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.map_err(|e| SearchError::TaskFailed(e.to_string()))?;
            match outcome {
                Ok(result) => slots[index] = Some(result),
                Err(err) => {
                    tasks.abort_all();
                    tracing::warn!(error = %err, "person search aborted");
                    return Err(err);
                }
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| SearchError::TaskFailed("comparison result missing".into())))
            .collect()
    }
}

/// Keep the names whose comparison produced at least one match, preserving
/// input order.
pub fn reduce_matches(results: &[ComparisonResult]) -> SearchResult {
    SearchResult::new(
        results
            .iter()
            .filter(|r| r.is_match())
            .map(|r| r.person_name.clone())
            .collect(),
    )
}

async fn run_comparison(
    comparer: &dyn FaceComparer,
    person_name: String,
    request: ComparisonRequest,
    local_limit: &Semaphore,
    global_limit: Option<&Semaphore>,
    cancel: Option<&CancelToken>,
) -> Result<ComparisonResult, SearchError> {
    // Semaphores are never closed.
    let _local = local_limit
        .acquire()
        .await
        .map_err(|_| SearchError::Cancelled)?;
    let _global = match global_limit {
        Some(limit) => Some(limit.acquire().await.map_err(|_| SearchError::Cancelled)?),
        None => None,
    };

    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(SearchError::Cancelled);
    }

    let started = Instant::now();
    match comparer.compare(request).await {
        Ok(matches) => {
            let result = ComparisonResult {
                person_name,
                matches,
            };
            tracing::debug!(
                person = %result.person_name,
                matches = result.matches.len(),
                best_similarity = ?result.best_similarity(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "comparison complete"
            );
            Ok(result)
        }
        Err(source) => {
            tracing::warn!(
                person = %person_name,
                error = %source,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "comparison failed"
            );
            Err(SearchError::Recognition {
                person: person_name,
                source,
            })
        }
    }
}
