//! Heuristic request classification
//!
//! Pure, zero-latency scoring of a query into a tier ceiling plus an
//! independent crisis check. No network, no shared state.
//!
//! Tier signals:
//! - Word count
//! - Short factual / greeting patterns (pull toward Local)
//! - Research and analysis keywords (push toward Premium)
//! - Code blocks and multi-sentence structure
//! - Momentum from the caller's last few queries
//!
//! Local needs a positive signal: an exact greeting or a short factual
//! opener. Length alone never makes a query Local, and uncertain Local
//! assignments are upgraded to Free. Nothing is ever downgraded to Local
//! for lack of information.

use super::{Classification, CrisisPatternSet, Tier};
use crate::config::ClassifierConfig;
use std::sync::Arc;

/// Greetings and acknowledgements (exact match on normalized text)
const SIMPLE_EXACT: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "bye", "goodbye", "ok", "okay", "yes", "no",
    "good morning", "good night", "good evening",
];

/// Short factual question openers (contains)
const SIMPLE_QUESTIONS: &[&str] = &[
    "what is the",
    "what's the",
    "who is",
    "who was",
    "when is",
    "when was",
    "where is",
    "how are you",
    "what time",
    "what day",
    "define ",
];

/// Research / analysis indicators (contains)
const RESEARCH_INDICATORS: &[&str] = &[
    "analyze",
    "analyse",
    "analysis",
    "compare",
    "evaluate",
    "research",
    "in depth",
    "in-depth",
    "comprehensive",
    "step by step",
    "explain in detail",
    "pros and cons",
    "trade-off",
    "tradeoff",
    "summarize",
    "summarise",
    "strategy",
    "literature",
    "evidence",
    "write a plan",
];

/// Score at or above which a query is Premium
const PREMIUM_SCORE: i32 = 3;
/// Longest query a factual opener still marks as locally answerable
const SHORT_QUESTION_WORDS: usize = 8;

/// Score at or below which a query is Local
const LOCAL_SCORE: i32 = -2;

/// Request classifier over a fixed crisis pattern set
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    crisis: Arc<CrisisPatternSet>,
    confidence_threshold: f32,
}

impl RequestClassifier {
    /// Create a classifier with an explicit confidence threshold
    pub fn new(crisis: Arc<CrisisPatternSet>, confidence_threshold: f32) -> Self {
        Self {
            crisis,
            confidence_threshold,
        }
    }

    /// Create a classifier from the `[classifier]` config section
    pub fn from_config(crisis: Arc<CrisisPatternSet>, config: &ClassifierConfig) -> Self {
        Self::new(crisis, config.confidence_threshold())
    }

    /// The crisis pattern set backing this classifier
    pub fn crisis_patterns(&self) -> &Arc<CrisisPatternSet> {
        &self.crisis
    }

    /// Classify a query
    ///
    /// `recent_context` holds the caller's previous queries, oldest first.
    /// Callers must reject empty text before classification; if it slips
    /// through anyway it is classified `Free` with zero confidence.
    pub fn classify(&self, text: &str, recent_context: &[String]) -> Classification {
        let is_crisis = self.crisis.is_match(text);

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Classification {
                tier: Tier::Free,
                is_crisis,
                confidence: 0.0,
                reason: "empty query",
            };
        }

        let lower = super::normalize_text(trimmed);
        let mut score: i32 = 0;

        let word_count = trimmed.split_whitespace().count();
        score += length_score(word_count);

        let unpunctuated = lower.trim_end_matches(['!', '.', '?']);
        let simple_exact = SIMPLE_EXACT.iter().any(|p| unpunctuated == *p);
        if simple_exact {
            score -= 3;
        }

        let simple_question = SIMPLE_QUESTIONS.iter().any(|q| lower.contains(q));
        if simple_question {
            score -= 2;
        }
        let local_signal =
            simple_exact || (simple_question && word_count <= SHORT_QUESTION_WORDS);

        if RESEARCH_INDICATORS.iter().any(|c| lower.contains(c)) {
            score += 3;
        }

        if trimmed.contains("```") {
            score += 3;
        }

        if count_sentences(trimmed) >= 3 {
            score += 1;
        }

        score += momentum_score(recent_context);

        let (tier, confidence, reason) = score_to_tier(score);

        if tier == Tier::Local && !local_signal {
            tracing::debug!(
                score = score,
                word_count = word_count,
                "No local-answerable signal, defaulting up to free"
            );
            return Classification {
                tier: Tier::Free,
                is_crisis,
                confidence,
                reason: "no local-answerable signal, defaulting up",
            };
        }

        if tier == Tier::Local && confidence < self.confidence_threshold {
            tracing::debug!(
                score = score,
                confidence = confidence,
                threshold = self.confidence_threshold,
                "Low-confidence local classification, defaulting up to free"
            );
            return Classification {
                tier: Tier::Free,
                is_crisis,
                confidence,
                reason: "low confidence, defaulting up",
            };
        }

        Classification {
            tier,
            is_crisis,
            confidence,
            reason,
        }
    }
}

fn length_score(word_count: usize) -> i32 {
    match word_count {
        0..=8 => -2,
        9..=25 => 0,
        26..=80 => 1,
        _ => 2,
    }
}

fn count_sentences(text: &str) -> usize {
    text.chars()
        .filter(|c| matches!(c, '.' | '?' | '!'))
        .count()
        .max(1)
}

fn momentum_score(recent_context: &[String]) -> i32 {
    let limit = recent_context.len().min(3);
    let recent = &recent_context[recent_context.len() - limit..];

    let complex_count = recent
        .iter()
        .filter(|m| {
            let lower = m.to_lowercase();
            RESEARCH_INDICATORS.iter().any(|c| lower.contains(c)) || m.contains("```")
        })
        .count();

    if complex_count >= 2 { 2 } else { 0 }
}

fn score_to_tier(score: i32) -> (Tier, f32, &'static str) {
    if score <= LOCAL_SCORE {
        let confidence = ((-score) as f32 / 5.0).min(1.0);
        (Tier::Local, confidence, "short factual or conversational query")
    } else if score >= PREMIUM_SCORE {
        let confidence = (score as f32 / 6.0).min(1.0);
        (Tier::Premium, confidence, "research or analysis indicators")
    } else {
        // Mid-range scores are inherently ambiguous; Free is the floor
        let confidence = 1.0 - (score.unsigned_abs() as f32 / 3.0);
        (Tier::Free, confidence, "general query")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RequestClassifier {
        RequestClassifier::new(Arc::new(CrisisPatternSet::builtin().unwrap()), 0.4)
    }

    #[test]
    fn test_crisis_phrase_sets_flag() {
        let c = classifier().classify("I want to die", &[]);
        assert!(c.is_crisis);
    }

    #[test]
    fn test_crisis_flag_independent_of_tier() {
        let long = format!(
            "Please analyze and compare these research papers in depth. {} Also I want to die.",
            "word ".repeat(40)
        );
        let c = classifier().classify(&long, &[]);
        assert!(c.is_crisis);
        assert_eq!(c.tier, Tier::Premium);
    }

    #[test]
    fn test_short_factual_question_is_local() {
        let c = classifier().classify("What's the capital of France?", &[]);
        assert_eq!(c.tier, Tier::Local);
        assert!(!c.is_crisis);
        assert!(c.confidence >= 0.4);
    }

    #[test]
    fn test_greeting_is_local() {
        let c = classifier().classify("Hello!", &[]);
        assert_eq!(c.tier, Tier::Local);
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_research_request_is_premium() {
        let c = classifier().classify(
            "Can you analyze the evidence for cognitive behavioural therapy and compare it with other approaches?",
            &[],
        );
        assert_eq!(c.tier, Tier::Premium);
    }

    #[test]
    fn test_medium_general_query_is_free() {
        let c = classifier().classify(
            "I have been feeling a bit stressed at work lately and would like a few ideas to relax",
            &[],
        );
        assert_eq!(c.tier, Tier::Free);
    }

    #[test]
    fn test_low_confidence_local_defaults_up_to_free() {
        // Scores -4 (confidence 0.8); a stricter threshold upgrades it
        let strict = RequestClassifier::new(Arc::new(CrisisPatternSet::builtin().unwrap()), 0.9);
        let c = strict.classify("What's the capital of France?", &[]);
        assert_eq!(c.tier, Tier::Free);
        assert_eq!(c.reason, "low confidence, defaulting up");
    }

    #[test]
    fn test_short_query_without_local_signal_is_free() {
        for input in ["How can I sleep better?", "tell me something nice", "Any tips?"] {
            let c = classifier().classify(input, &[]);
            assert_eq!(c.tier, Tier::Free, "{input:?} should be Free");
            assert_eq!(c.reason, "no local-answerable signal, defaulting up");
        }
    }

    #[test]
    fn test_long_question_with_factual_opener_is_not_local() {
        let c = classifier().classify(
            "Who is the best person to talk to when I feel lonely at work every day?",
            &[],
        );
        assert_eq!(c.tier, Tier::Free);
    }

    #[test]
    fn test_greeting_inside_research_request_is_premium() {
        let c = classifier().classify(
            "Hi, can you analyze and compare the evidence for CBT versus DBT in depth for my situation?",
            &[],
        );
        assert_eq!(c.tier, Tier::Premium);
    }

    #[test]
    fn test_ambiguous_never_local() {
        let inputs = [
            "I am not sure what to ask but something feels off today honestly",
            "Could you help me think through a decision I need to make this week?",
        ];
        for input in inputs {
            let c = classifier().classify(input, &[]);
            assert_ne!(c.tier, Tier::Local, "{input:?} should not be Local");
        }
    }

    #[test]
    fn test_code_block_pushes_up() {
        let c = classifier().classify("fix this ```let x = 1;```", &[]);
        assert_ne!(c.tier, Tier::Local);
    }

    #[test]
    fn test_momentum_from_recent_context() {
        let query = "Ok. And the second option then? What about that one?";
        let without = classifier().classify(query, &[]);

        let context = vec![
            "Please analyze my sleep journal".to_string(),
            "Compare it with last month's research notes".to_string(),
        ];
        let with = classifier().classify(query, &context);

        assert_eq!(without.tier, Tier::Free);
        assert_eq!(with.tier, Tier::Premium);
    }

    #[test]
    fn test_empty_text_is_free_with_zero_confidence() {
        let c = classifier().classify("   ", &[]);
        assert_eq!(c.tier, Tier::Free);
        assert_eq!(c.confidence, 0.0);
        assert!(!c.is_crisis);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier();
        let a = c.classify("What is the weather like?", &[]);
        let b = c.classify("What is the weather like?", &[]);
        assert_eq!(a, b);
    }
}
