//! Fixed catalog mapping topic ids to system-prompt fragments.
//!
//! Consulted read-only by the router: a topic can only be committed when
//! it has a non-empty fragment here.

use std::collections::BTreeMap;

/// Topic id → prompt fragment mapping.
#[derive(Debug, Clone, Default)]
pub struct TopicCatalog {
    fragments: BTreeMap<String, String>,
}

impl TopicCatalog {
    /// The counseling topics shipped with the application.
    pub fn builtin() -> Self {
        let pairs: &[(&str, &str)] = &[
            (
                "anxiety",
                "The user appears to be struggling with anxiety. Acknowledge the \
                 physical and mental weight of persistent worry before anything \
                 else. Help them name what feels threatening, gently separate \
                 likely outcomes from feared ones, and suggest one small grounding \
                 step they could try today. Never dismiss a worry as irrational.",
            ),
            (
                "depression",
                "The user shows signs of a depressed mood. Keep your pace slow and \
                 your language warm. Validate that low energy and loss of interest \
                 are real symptoms, not character flaws. Favor very small, concrete \
                 actions over big plans, and reflect back any strength the user \
                 shows in simply describing how they feel.",
            ),
            (
                "work_stress",
                "The conversation centers on workplace stress. Help the user \
                 untangle what is within their control from what is not. Ask about \
                 workload, relationships with colleagues, and rest. Watch for signs \
                 of burnout and, where appropriate, encourage boundaries rather \
                 than endurance.",
            ),
            (
                "relationships",
                "The user is working through difficulties in a close relationship. \
                 Stay strictly non-judgmental toward everyone involved. Reflect the \
                 user's feelings, help them articulate unmet needs, and explore how \
                 they might express those needs without blame.",
            ),
            (
                "self_esteem",
                "The user is expressing harsh self-criticism or low self-worth. \
                 Notice and name the critical inner voice when it appears. Invite \
                 the user to consider how they would speak to a friend in the same \
                 situation, and highlight concrete evidence that contradicts their \
                 global negative self-judgments.",
            ),
            (
                "sleep",
                "The user is troubled by poor sleep. Ask about their evening \
                 routine, screen use, caffeine and what happens in their mind when \
                 they lie awake. Offer one modest sleep-hygiene adjustment at a \
                 time, and connect sleep quality to the daytime feelings they have \
                 described.",
            ),
        ];

        Self {
            fragments: pairs
                .iter()
                .map(|(topic, fragment)| (topic.to_string(), fragment.to_string()))
                .collect(),
        }
    }

    /// A catalog from an explicit mapping (tests, alternate deployments).
    pub fn from_map(fragments: BTreeMap<String, String>) -> Self {
        Self { fragments }
    }

    /// The prompt fragment for a topic. Blank fragments count as absent,
    /// so a topic listed with an empty string can never be committed.
    pub fn fragment(&self, topic: &str) -> Option<&str> {
        self.fragments
            .get(topic)
            .map(String::as_str)
            .filter(|fragment| !fragment.trim().is_empty())
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_topics_have_fragments() {
        let catalog = TopicCatalog::builtin();
        assert!(!catalog.is_empty());
        for topic in ["anxiety", "depression", "sleep"] {
            assert!(catalog.fragment(topic).is_some(), "missing {topic}");
        }
        assert!(catalog.fragment("unknown_topic").is_none());
    }

    #[test]
    fn test_blank_fragment_counts_as_absent() {
        let mut map = BTreeMap::new();
        map.insert("ghost".to_string(), "   ".to_string());
        map.insert("real".to_string(), "Some guidance.".to_string());
        let catalog = TopicCatalog::from_map(map);
        assert!(catalog.fragment("ghost").is_none());
        assert_eq!(catalog.fragment("real"), Some("Some guidance."));
    }
}
