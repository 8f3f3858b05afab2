//! Emergency classification for override reasons.
//!
//! The coordinator treats this as a black box with a boolean contract: pure,
//! no side effects, returns in bounded time. The shipped implementation is a
//! keyword matcher; anything honoring the trait (an external inference call
//! included) can replace it.

pub trait Classifier: Send + Sync {
    fn classify(&self, reason: &str) -> bool;
}

pub const DEFAULT_EMERGENCY_KEYWORDS: &[&str] = &[
    "生病",
    "緊急",
    "火災",
    "意外",
    "醫院",
    "聯絡家人",
    "天然災害",
    "安全問題",
    "有人受傷",
];

pub const DEFAULT_ROUTINE_PHRASES: &[&str] = &[
    "無聊",
    "想看",
    "想玩",
    "沒事做",
    "工作結束了",
    "想休息",
];

/// Case-insensitive substring matcher with a default-deny fall through:
/// a reason matching no list is not an emergency.
pub struct KeywordClassifier {
    emergency_keywords: Vec<String>,
    routine_phrases: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(emergency_keywords: Vec<String>, routine_phrases: Vec<String>) -> Self {
        Self {
            emergency_keywords,
            routine_phrases,
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_EMERGENCY_KEYWORDS
                .iter()
                .map(|keyword| keyword.to_string())
                .collect(),
            DEFAULT_ROUTINE_PHRASES
                .iter()
                .map(|phrase| phrase.to_string())
                .collect(),
        )
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, reason: &str) -> bool {
        let reason = reason.to_lowercase();

        if self
            .emergency_keywords
            .iter()
            .any(|keyword| reason.contains(&keyword.to_lowercase()))
        {
            return true;
        }

        if self
            .routine_phrases
            .iter()
            .any(|phrase| reason.contains(&phrase.to_lowercase()))
        {
            tracing::debug!("Override reason matched a routine phrase");
            return false;
        }

        // Default deny: anything unrecognized is not an emergency.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_keyword_grants() {
        let classifier = KeywordClassifier::default();
        assert!(classifier.classify("我生病了需要去醫院"));
        assert!(classifier.classify("家裡火災"));
    }

    #[test]
    fn routine_phrase_denies() {
        let classifier = KeywordClassifier::default();
        assert!(!classifier.classify("只是覺得無聊"));
        assert!(!classifier.classify("工作結束了想休息"));
    }

    #[test]
    fn unmatched_reason_denies_by_default() {
        let classifier = KeywordClassifier::default();
        assert!(!classifier.classify("I left my keys inside"));
    }

    #[test]
    fn matching_ignores_ascii_case() {
        let classifier = KeywordClassifier::new(vec!["Fire".to_string()], Vec::new());
        assert!(classifier.classify("FIRE in the kitchen"));
    }

    #[test]
    fn emergency_keyword_wins_over_routine_phrase() {
        let classifier = KeywordClassifier::default();
        assert!(classifier.classify("本來無聊，但現在家裡有緊急狀況"));
    }
}
