//! Concurrent scorer execution under a shared deadline.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tokio::time::{Instant, timeout_at};
use tracing::warn;

use riskgate_core::error::ScorerError;
use riskgate_core::types::{Category, CategoryScore};

use crate::scorer::{Scorer, ScoringContext};

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}

fn join_failure(category: Category, err: JoinError) -> ScorerError {
    let reason = if err.is_panic() { panic_message(err.into_panic()) } else { "task cancelled".to_string() };
    ScorerError::Failed { category, reason }
}

/// Run `score` once per category, each on its own blocking task.
///
/// Every scorer gets the full `timeout`, measured from one shared start.
/// A scorer that misses the deadline or panics contributes
/// [`CategoryScore::unavailable`] with the error as its factor; the others
/// are unaffected. Results come back in [`Category::ALL`] order.
pub async fn run_scorers<F>(timeout: Duration, score: F) -> Vec<CategoryScore>
where
    F: Fn(Category) -> CategoryScore + Send + Sync + 'static,
{
    let score = Arc::new(score);
    let deadline = Instant::now() + timeout;
    let handles: Vec<_> = Category::ALL
        .iter()
        .map(|&category| {
            let score = Arc::clone(&score);
            (category, tokio::task::spawn_blocking(move || score(category)))
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (category, handle) in handles {
        let outcome = match timeout_at(deadline, handle).await {
            Ok(Ok(scored)) => Ok(scored),
            Ok(Err(join_err)) => Err(join_failure(category, join_err)),
            Err(_) => Err(ScorerError::Timeout { category, timeout_ms: timeout.as_millis() as u64 }),
        };
        results.push(match outcome {
            Ok(scored) => scored,
            Err(err) => {
                warn!(category = %err.category(), error = %err, "scorer unavailable");
                CategoryScore::unavailable(category, &err)
            }
        });
    }
    results
}

/// Run the five category scorers over a snapshot.
pub async fn score_all(ctx: Arc<ScoringContext>, timeout: Duration) -> Vec<CategoryScore> {
    run_scorers(timeout, move |category| Scorer::for_category(category).score(&ctx)).await
}
