//! Message routing: score every registered graph type against an inbound
//! message and the user's thread history, pick the winner.
//!
//! Scoring is fully deterministic. Ties resolve to the graph registered
//! first, a fixed tie-break kept for reproducibility. A graph with zero
//! matching signal can still win if every score is zero and it iterates
//! first.

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::threads::ThreadSummary;

/// External tunables consumed (never computed) by the router.
#[derive(Clone, Debug, PartialEq)]
pub struct RouterConfig {
    /// Points per matched plain selection word.
    pub word_points: f64,
    /// Points per matched keyword (a selection word starting with the
    /// reserved marker character).
    pub keyword_points: f64,
    /// Points per existing thread of the graph type.
    pub thread_points: f64,
    /// Bonus when the graph type's most recent thread is inside the window.
    pub recency_points: f64,
    /// How recently a thread must have been touched to earn the bonus.
    pub recency_window: Duration,
    /// Marker promoting a selection word to keyword weight.
    pub keyword_marker: char,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            word_points: 1.0,
            keyword_points: 3.0,
            thread_points: 0.5,
            recency_points: 2.0,
            recency_window: Duration::minutes(30),
            keyword_marker: '#',
        }
    }
}

impl RouterConfig {
    /// Defaults overridden by `FLOWLOOM_ROUTER_*` environment variables
    /// (loaded through dotenv when a `.env` file is present).
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            word_points: env_f64("FLOWLOOM_ROUTER_WORD_POINTS", defaults.word_points),
            keyword_points: env_f64("FLOWLOOM_ROUTER_KEYWORD_POINTS", defaults.keyword_points),
            thread_points: env_f64("FLOWLOOM_ROUTER_THREAD_POINTS", defaults.thread_points),
            recency_points: env_f64("FLOWLOOM_ROUTER_RECENCY_POINTS", defaults.recency_points),
            recency_window: std::env::var("FLOWLOOM_ROUTER_RECENCY_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .map(Duration::seconds)
                .unwrap_or(defaults.recency_window),
            keyword_marker: defaults.keyword_marker,
        }
    }
}

fn env_f64(key: &str, fallback: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

/// Multi-signal scorer over the registry's selection vocabulary.
#[derive(Clone, Debug, Default)]
pub struct Router {
    config: RouterConfig,
}

impl Router {
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Pick the graph type for `message`.
    ///
    /// `vocabulary` is `(graph name, selection words)` in registry
    /// registration order; `history` is the user's per-graph-type thread
    /// summary. Returns `None` only when the vocabulary is empty.
    #[instrument(skip(self, vocabulary, history))]
    pub fn route(
        &self,
        message: &str,
        vocabulary: &[(String, Vec<String>)],
        history: &FxHashMap<String, ThreadSummary>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let mut best: Option<(&str, f64)> = None;
        for (graph, words) in vocabulary {
            let score = self.score(message, words, history.get(graph), now);
            tracing::debug!(graph = %graph, score, "graph scored");
            // Strictly greater: ties keep the earlier-registered graph.
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((graph, score)),
            }
        }
        best.map(|(graph, _)| graph.to_string())
    }

    fn score(
        &self,
        message: &str,
        selection_words: &[String],
        history: Option<&ThreadSummary>,
        now: DateTime<Utc>,
    ) -> f64 {
        let message = message.to_lowercase();
        let mut score = 0.0;

        for word in selection_words {
            let (needle, points) = match word.strip_prefix(self.config.keyword_marker) {
                Some(rest) => (rest, self.config.keyword_points),
                None => (word.as_str(), self.config.word_points),
            };
            if !needle.is_empty() && message.contains(&needle.to_lowercase()) {
                score += points;
            }
        }

        if let Some(summary) = history {
            score += summary.count as f64 * self.config.thread_points;
            if now - summary.last_updated_at < self.config.recency_window {
                score += self.config.recency_points;
            }
        }

        score
    }
}
