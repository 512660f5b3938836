//! Keyword triage for patient queries.
//!
//! Priority is the first tier (URGENT, HIGH, MEDIUM) with any keyword present,
//! else LOW. The safety score adds 0.2 for every safety keyword present and
//! caps at 1.0. Escalation fires on either signal: an URGENT priority or a
//! safety score above 0.6. The two keyword lists overlap ("suicide",
//! "overdose", "emergency") but are not the same, so a query can escalate on
//! priority alone ("heart attack") or on safety alone ("I want to die").
//!
//! Every function here is total and deterministic.

use serde::{Deserialize, Serialize};

use crate::models::QueryPriority;

static URGENT_KEYWORDS: &[&str] = &[
    "emergency", "severe pain", "chest pain", "difficulty breathing", "unconscious",
    "seizure", "stroke", "heart attack", "bleeding heavily", "suicide", "overdose",
    "anaphylaxis", "allergic reaction", "can't breathe", "collapsed", "trauma",
    "accident", "head injury", "broken bone", "fracture", "poisoning",
];

static HIGH_KEYWORDS: &[&str] = &[
    "infection", "fever", "vomiting", "diarrhea", "dehydration", "pregnant",
    "pregnancy", "blood", "dizzy", "dizziness", "fainting", "chronic pain",
    "worsening", "deteriorating", "not improving", "getting worse", "medication",
    "side effect", "reaction", "rash", "swelling",
];

static MEDIUM_KEYWORDS: &[&str] = &[
    "persistent", "ongoing", "recurring", "chronic", "weeks", "days",
    "uncomfortable", "pain", "ache", "sore", "tired", "fatigue", "weakness",
    "concerned", "worried", "anxiety", "stress", "depression", "mental health",
];

/// Phrases are matched independently, so a statement of intent such as
/// "thinking about suicide and have a plan" accumulates several hits.
static SAFETY_KEYWORDS: &[&str] = &[
    "suicide", "suicid", "thinking about suicide", "have a plan", "want to die",
    "end it all", "take my own life", "self-harm", "hurt myself", "end my life",
    "kill myself", "overdose", "too many pills", "harm others", "hurt someone",
    "violent", "abuse", "domestic violence", "assault", "emergency", "urgent",
    "critical", "life-threatening", "dying", "death", "fatal", "severe", "extreme",
];

/// Score added per safety keyword hit.
pub const SAFETY_INCREMENT: f64 = 0.2;

/// Safety scores strictly above this escalate.
pub const ESCALATION_SAFETY_THRESHOLD: f64 = 0.6;

/// Classifier output for one piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triage {
    pub priority: QueryPriority,
    pub safety_score: f64,
}

impl Triage {
    /// Escalate when either the priority is URGENT or the safety score exceeds 0.6.
    pub fn should_escalate(&self) -> bool {
        self.safety_score > ESCALATION_SAFETY_THRESHOLD || self.priority == QueryPriority::Urgent
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

pub fn calculate_priority(text: &str) -> QueryPriority {
    let lowered = text.to_lowercase();

    if contains_any(&lowered, URGENT_KEYWORDS) {
        QueryPriority::Urgent
    } else if contains_any(&lowered, HIGH_KEYWORDS) {
        QueryPriority::High
    } else if contains_any(&lowered, MEDIUM_KEYWORDS) {
        QueryPriority::Medium
    } else {
        QueryPriority::Low
    }
}

/// Number of distinct safety keywords present in `text`.
pub fn safety_hits(text: &str) -> usize {
    let lowered = text.to_lowercase();
    SAFETY_KEYWORDS.iter().filter(|k| lowered.contains(*k)).count()
}

/// 0.0 (no concern) to 1.0 (highest concern).
pub fn calculate_safety_score(text: &str) -> f64 {
    let steps = (1.0 / SAFETY_INCREMENT).round();
    // Divide rather than multiply so three hits land on exactly 0.6.
    (safety_hits(text) as f64).min(steps) / steps
}

pub fn classify(text: &str) -> Triage {
    Triage {
        priority: calculate_priority(text),
        safety_score: calculate_safety_score(text),
    }
}

pub fn should_escalate(text: &str) -> bool {
    classify(text).should_escalate()
}
