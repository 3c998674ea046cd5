//! Counseling routing configuration types.
//!
//! These types define the resolved settings used by `mindchat-counseling`.
//! They live here so the counseling crate can re-export them while the
//! settings loader stays in one place.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings for the counseling topic index and router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounselingSettings {
    /// Override the topic index database path. Defaults to
    /// `<resources>/counseling/topic_index.sqlite3`.
    #[serde(default)]
    pub index_path: Option<PathBuf>,
    /// Name of the exemplar collection (sqlite-vec virtual table).
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub routing: RoutingSettings,
}

impl Default for CounselingSettings {
    fn default() -> Self {
        Self {
            index_path: None,
            collection: default_collection(),
            routing: RoutingSettings::default(),
        }
    }
}

/// Decision-policy thresholds for topic routing.
///
/// Scores are derived from exemplar distances and accumulated per topic
/// across user turns; a topic is committed once it clears both the score
/// and the margin thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// User turns that must elapse before a decision may be made.
    #[serde(default = "default_min_user_turns")]
    pub min_user_turns: u32,
    /// Maximum exemplar distance admitted into scoring.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,
    /// Minimum accumulated score required to commit to a topic.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// Minimum lead over the runner-up required to commit.
    #[serde(default = "default_margin_threshold")]
    pub margin_threshold: f32,
    /// Maximum matches retained per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            min_user_turns: default_min_user_turns(),
            distance_threshold: default_distance_threshold(),
            score_threshold: default_score_threshold(),
            margin_threshold: default_margin_threshold(),
            top_k: default_top_k(),
        }
    }
}

fn default_collection() -> String {
    "counseling_topic".to_string()
}

fn default_min_user_turns() -> u32 {
    2
}

fn default_distance_threshold() -> f32 {
    1.1
}

fn default_score_threshold() -> f32 {
    1.2
}

fn default_margin_threshold() -> f32 {
    0.4
}

fn default_top_k() -> usize {
    3
}
