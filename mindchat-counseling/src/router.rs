//! Session-level topic routing state machine.
//!
//! Each user turn is scored against the topic exemplar index and folded
//! into per-topic running totals. Once enough turns have elapsed and one
//! topic clears both the score and the margin thresholds, the router
//! commits to it: the commitment is terminal for the session and selects
//! a fixed prompt fragment from the catalog.
//!
//! Routing is advisory and fail-open: if the embedding model or the index
//! is unavailable the router disables itself for its remaining lifetime
//! (no re-probing, even if the dependency becomes available later) and
//! every call returns the caller's base prompt unchanged.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use mindchat_core::{ChatMessage, ChatRole, Config, RoutingSettings};
use serde::{Deserialize, Serialize};

use crate::catalog::TopicCatalog;
use crate::embedding::EmbeddingProvider;
use crate::retriever::{TopicIndex, TopicMatch};

const DEFAULT_INDEX_FILENAME: &str = "topic_index.sqlite3";

/// Per-conversation routing state, persisted by the conversation owner.
///
/// The router never mutates a state in place; `route` takes it by
/// reference and returns a replacement in [`RouteOutcome::update`] when
/// anything changed. Commitment is terminal: a `Committed` state never
/// transitions back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TopicState {
    Accumulating {
        #[serde(default)]
        scores: BTreeMap<String, f32>,
        #[serde(default)]
        turns: u32,
    },
    Committed {
        topic: String,
        scores: BTreeMap<String, f32>,
        turns: u32,
    },
}

impl Default for TopicState {
    fn default() -> Self {
        TopicState::Accumulating {
            scores: BTreeMap::new(),
            turns: 0,
        }
    }
}

impl TopicState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_topic(&self) -> Option<&str> {
        match self {
            TopicState::Accumulating { .. } => None,
            TopicState::Committed { topic, .. } => Some(topic),
        }
    }

    pub fn turns(&self) -> u32 {
        match self {
            TopicState::Accumulating { turns, .. } | TopicState::Committed { turns, .. } => *turns,
        }
    }

    pub fn scores(&self) -> &BTreeMap<String, f32> {
        match self {
            TopicState::Accumulating { scores, .. } | TopicState::Committed { scores, .. } => {
                scores
            }
        }
    }
}

/// Result of one routing call.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    /// Effective system prompt: the base prompt, augmented with the
    /// committed topic's fragment when one applies.
    pub prompt: Option<String>,
    /// Replacement state for the caller to persist, absent when nothing
    /// changed.
    pub update: Option<TopicState>,
}

/// Routes counseling topics and composes the session system prompt.
pub struct TopicRouter {
    routing: RoutingSettings,
    catalog: TopicCatalog,
    index: TopicIndex,
    disabled: OnceLock<String>,
}

impl TopicRouter {
    /// Build a router from application configuration: fastembed encoder,
    /// bundled (or overridden) exemplar index, builtin catalog.
    pub fn from_config(config: &Config) -> Self {
        let encoder = Arc::new(EmbeddingProvider::new(config));
        let counseling = &config.settings.counseling;
        let db_path = match &counseling.index_path {
            Some(path) => config.resolve_path(path),
            None => config
                .paths
                .resource_dir
                .join("counseling")
                .join(DEFAULT_INDEX_FILENAME),
        };
        let index = TopicIndex::new(db_path, counseling.collection.clone(), encoder);
        Self::new(counseling.routing.clone(), TopicCatalog::builtin(), index)
    }

    /// Build a router from explicit parts (tests, custom deployments).
    pub fn new(routing: RoutingSettings, catalog: TopicCatalog, index: TopicIndex) -> Self {
        Self {
            routing,
            catalog,
            index,
            disabled: OnceLock::new(),
        }
    }

    /// Why routing was disabled for this instance, if it was.
    pub fn disabled_reason(&self) -> Option<&str> {
        self.disabled.get().map(String::as_str)
    }

    /// Evaluate one conversation turn.
    ///
    /// Callers must serialize invocations per conversation: scoring is a
    /// running accumulation over the state returned by the previous turn.
    pub async fn route(
        &self,
        messages: &[ChatMessage],
        base_prompt: Option<&str>,
        state: &TopicState,
    ) -> RouteOutcome {
        let (scores, turns) = match state {
            // Terminal fast path: no embedding or index calls, no update.
            TopicState::Committed { topic, .. } => {
                let prompt = combine_prompts(base_prompt, self.catalog.fragment(topic));
                return RouteOutcome {
                    prompt,
                    update: None,
                };
            }
            TopicState::Accumulating { scores, turns } => (scores, *turns),
        };

        let Some(last_user) = last_user_message(messages) else {
            return self.unchanged(base_prompt);
        };

        if self.disabled.get().is_some() {
            return self.unchanged(base_prompt);
        }

        let matches = match self
            .index
            .query(
                last_user,
                self.routing.top_k,
                self.routing.distance_threshold,
            )
            .await
        {
            Ok(matches) => matches,
            Err(err) => {
                // Fail open. Log the disabling cause once; later calls
                // degrade silently.
                if self.disabled.set(err.to_string()).is_ok() {
                    tracing::warn!("Topic routing disabled: {}", err);
                }
                return self.unchanged(base_prompt);
            }
        };

        let updated_scores =
            accumulate_scores(scores, &matches, self.routing.distance_threshold);
        let next_turns = turns + 1;

        let mut selected = None;
        if next_turns >= self.routing.min_user_turns {
            selected = select_topic(
                &updated_scores,
                self.routing.score_threshold,
                self.routing.margin_threshold,
            );
            // A numerically qualifying topic without a prompt fragment
            // voids the commitment; evidence keeps accumulating.
            if let Some(topic) = &selected
                && self.catalog.fragment(topic).is_none()
            {
                selected = None;
            }
        }

        match selected {
            Some(topic) => {
                let prompt = combine_prompts(base_prompt, self.catalog.fragment(&topic));
                let update = TopicState::Committed {
                    topic,
                    scores: updated_scores,
                    turns: next_turns,
                };
                RouteOutcome {
                    prompt,
                    update: Some(update),
                }
            }
            None => {
                let changed = updated_scores != *scores || next_turns != turns;
                let update = changed.then(|| TopicState::Accumulating {
                    scores: updated_scores,
                    turns: next_turns,
                });
                RouteOutcome {
                    prompt: combine_prompts(base_prompt, None),
                    update,
                }
            }
        }
    }

    fn unchanged(&self, base_prompt: Option<&str>) -> RouteOutcome {
        RouteOutcome {
            prompt: combine_prompts(base_prompt, None),
            update: None,
        }
    }
}

/// The most recent user-authored message, trimmed. A blank latest user
/// message counts as absent; earlier user turns are not consulted.
fn last_user_message(messages: &[ChatMessage]) -> Option<&str> {
    let message = messages.iter().rev().find(|m| m.role == ChatRole::User)?;
    let content = message.content.trim();
    if content.is_empty() { None } else { Some(content) }
}

/// Linear distance → score conversion: 1.0 at distance 0, 0 at or past
/// the threshold. A non-positive threshold disables scoring entirely.
fn distance_to_score(distance: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return 0.0;
    }
    ((threshold - distance) / threshold).max(0.0)
}

/// Fold this turn's matches into a copy of the running totals. Topics not
/// matched this turn keep their prior score, so totals never decrease.
fn accumulate_scores(
    current: &BTreeMap<String, f32>,
    matches: &[TopicMatch],
    distance_threshold: f32,
) -> BTreeMap<String, f32> {
    let mut updated = current.clone();
    for m in matches {
        let increment = distance_to_score(m.distance, distance_threshold);
        if increment <= 0.0 {
            continue;
        }
        *updated.entry(m.topic.clone()).or_insert(0.0) += increment;
    }
    updated
}

/// Decision policy: the best topic wins only with both an absolute score
/// at or above `score_threshold` and a lead over the runner-up of at
/// least `margin_threshold`.
fn select_topic(
    scores: &BTreeMap<String, f32>,
    score_threshold: f32,
    margin_threshold: f32,
) -> Option<String> {
    let mut ranked: Vec<(&String, f32)> = scores.iter().map(|(t, s)| (t, *s)).collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let (top_topic, top_score) = ranked.first()?;
    let second_score = ranked.get(1).map(|(_, s)| *s).unwrap_or(0.0);
    if *top_score < score_threshold {
        return None;
    }
    if *top_score - second_score < margin_threshold {
        return None;
    }
    Some((*top_topic).clone())
}

/// Join the base prompt and a topic fragment with a blank line; either
/// side may be absent. Empty strings count as absent; a whitespace-only
/// base prompt passes through unchanged.
fn combine_prompts(base_prompt: Option<&str>, fragment: Option<&str>) -> Option<String> {
    let base = base_prompt.filter(|p| !p.is_empty());
    let fragment = fragment.filter(|f| !f.is_empty());
    match (base, fragment) {
        (Some(base), Some(fragment)) => Some(format!("{base}\n\n{fragment}")),
        (Some(base), None) => Some(base.to_string()),
        (None, Some(fragment)) => Some(fragment.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pairs: &[(&str, f32)]) -> Vec<TopicMatch> {
        pairs
            .iter()
            .map(|(topic, distance)| TopicMatch {
                topic: topic.to_string(),
                distance: *distance,
            })
            .collect()
    }

    #[test]
    fn test_distance_to_score_shape() {
        assert_eq!(distance_to_score(0.0, 1.1), 1.0);
        assert_eq!(distance_to_score(1.1, 1.1), 0.0);
        assert_eq!(distance_to_score(2.0, 1.1), 0.0);
        // monotonically decreasing in distance
        assert!(distance_to_score(0.2, 1.1) > distance_to_score(0.3, 1.1));
        // non-positive threshold disables scoring
        assert_eq!(distance_to_score(0.1, 0.0), 0.0);
        assert_eq!(distance_to_score(0.1, -1.0), 0.0);
    }

    #[test]
    fn test_accumulate_scores_is_monotone() {
        let first = accumulate_scores(&BTreeMap::new(), &matches(&[("anxiety", 0.3)]), 1.1);
        let second = accumulate_scores(&first, &matches(&[("anxiety", 0.2), ("sleep", 0.9)]), 1.1);
        assert!(second["anxiety"] > first["anxiety"]);
        assert!(second.contains_key("sleep"));

        // a turn that matches nothing leaves totals untouched
        let third = accumulate_scores(&second, &[], 1.1);
        assert_eq!(third, second);
    }

    #[test]
    fn test_accumulate_skips_zero_increments() {
        let scores = accumulate_scores(&BTreeMap::new(), &matches(&[("anxiety", 1.1)]), 1.1);
        assert!(scores.is_empty());
    }

    #[test]
    fn test_select_topic_thresholds() {
        let mut scores = BTreeMap::new();
        scores.insert("anxiety".to_string(), 1.2);
        scores.insert("sleep".to_string(), 0.8);

        // exactly-equal thresholds commit
        assert_eq!(
            select_topic(&scores, 1.2, 0.4),
            Some("anxiety".to_string())
        );
        // score one notch below does not
        assert_eq!(select_topic(&scores, 1.21, 0.4), None);
        // margin one notch below does not
        assert_eq!(select_topic(&scores, 1.2, 0.41), None);
    }

    #[test]
    fn test_select_topic_single_candidate_margin_vs_zero() {
        let mut scores = BTreeMap::new();
        scores.insert("anxiety".to_string(), 1.5);
        // runner-up score defaults to 0 when only one topic has scored
        assert_eq!(
            select_topic(&scores, 1.2, 0.4),
            Some("anxiety".to_string())
        );
        assert_eq!(select_topic(&BTreeMap::new(), 0.0, 0.0), None);
    }

    #[test]
    fn test_combine_prompts() {
        assert_eq!(
            combine_prompts(Some("base"), Some("fragment")),
            Some("base\n\nfragment".to_string())
        );
        assert_eq!(combine_prompts(Some("base"), None), Some("base".to_string()));
        assert_eq!(
            combine_prompts(None, Some("fragment")),
            Some("fragment".to_string())
        );
        assert_eq!(combine_prompts(None, None), None);
        assert_eq!(combine_prompts(Some(""), Some("")), None);
    }

    #[test]
    fn test_combine_prompts_whitespace_base_passes_through() {
        assert_eq!(combine_prompts(Some("  "), None), Some("  ".to_string()));
        assert_eq!(
            combine_prompts(Some("  "), Some("fragment")),
            Some("  \n\nfragment".to_string())
        );
    }

    #[test]
    fn test_last_user_message() {
        let messages = vec![
            ChatMessage::system("be kind"),
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("  second  "),
        ];
        assert_eq!(last_user_message(&messages), Some("second"));

        // a blank latest user turn counts as absent, earlier ones are not
        // consulted
        let blank_last = vec![ChatMessage::user("first"), ChatMessage::user("   ")];
        assert_eq!(last_user_message(&blank_last), None);

        assert_eq!(last_user_message(&[]), None);
        assert_eq!(
            last_user_message(&[ChatMessage::assistant("hello")]),
            None
        );
    }

    #[test]
    fn test_topic_state_serde_round_trip() {
        let mut scores = BTreeMap::new();
        scores.insert("anxiety".to_string(), 1.5);
        let state = TopicState::Committed {
            topic: "anxiety".to_string(),
            scores,
            turns: 2,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"phase\":\"committed\""));
        let decoded: TopicState = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, state);

        let fresh: TopicState =
            serde_json::from_str("{\"phase\":\"accumulating\"}").unwrap();
        assert_eq!(fresh, TopicState::new());
    }
}
