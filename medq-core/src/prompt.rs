//! System-prompt selection and attached-document digests.
//!
//! The suggestion generator asks a `PromptRouter` which instruction to send
//! ahead of the patient's text. `TopicRouter` picks a specialised diabetes
//! prompt when the text mentions the topic; `FixedPrompt` always answers with
//! the same instruction. Any `Fn(&str) -> String` closure is a router too.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::ExtractedDocuments;

pub const GENERAL_PROMPT: &str = "\
You are an AI medical assistant providing information to help doctors review patient queries.

Your role is to:
1. Provide factual, evidence-based information
2. Highlight areas of uncertainty
3. Suggest possible approaches or considerations
4. Flag any potential urgent concerns
5. NEVER provide definitive diagnoses or treatment recommendations

Your suggestions will be reviewed by a qualified medical professional before being shared with patients.

Format your response in a structured way with clear sections.";

pub const DIABETES_PROMPT: &str = "\
You are an AI medical assistant specializing in diabetes care.

Your responsibilities:
1. Provide evidence-based information related to diabetes symptoms, management, and complications.
2. Highlight areas of uncertainty or where clinical follow-up is needed.
3. Suggest considerations for evaluating glycemic control, medication adherence, lifestyle, and complications.
4. Flag urgent concerns such as signs of ketoacidosis, hypoglycemia, or rapidly progressing neuropathy.
5. DO NOT provide definitive diagnoses or treatment plans.

All outputs will be reviewed by a qualified medical professional.
Respond in a clear, structured format with headings like: Overview, Considerations, Urgent Concerns, Suggested Next Steps, and Notes.";

pub const TYPE_1_PROMPT: &str = "\
You are an AI assistant focusing on Type 1 diabetes.

- Discuss insulin therapy, hypoglycemia risk, and glucose monitoring.
- Mention autoimmune causes if relevant.
- NEVER give treatment advice.
Respond with: Overview, Key Concerns, Possible Follow-ups, and Notes.";

pub const TYPE_2_PROMPT: &str = "\
You are an AI assistant focusing on Type 2 diabetes.

- Discuss insulin resistance, lifestyle interventions, oral medications.
- Mention monitoring and complications such as neuropathy.
- NEVER give treatment advice.
Respond with: Overview, Key Concerns, Possible Follow-ups, and Notes.";

static DIABETES_KEYWORDS: &[&str] = &[
    "sugar", "glucose", "thirsty", "blurred vision", "numb feet", "neuropathy",
    "insulin", "metformin", "blood sugar", "hba1c", "ketoacidosis", "hypoglycemia",
];

static TYPE_1_KEYWORDS: &[&str] = &["type 1", "insulin-dependent", "autoimmune", "juvenile"];

static TYPE_2_KEYWORDS: &[&str] = &[
    "type 2", "metformin", "lifestyle", "adult-onset", "insulin resistance",
];

/// Placeholder emitted for a document with no lab-style lines.
pub const NO_METRICS: &str = "No key diabetes metrics detected.";

/// A number followed by a common lab unit, e.g. "7.2 %", "140 mg/dl", "5.5 mmol/l".
static LAB_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d+(?:\.\d+)?\s*(?:mg/dl|mmol/l|mmol/mol|g/dl|meq/l|u/l|iu/l|%)")
        .expect("lab value pattern is valid")
});

// ============================================================================
// Routing
// ============================================================================

/// Chooses the system instruction for a query's text.
pub trait PromptRouter: Send + Sync {
    fn system_prompt(&self, text: &str) -> String;
}

impl<F> PromptRouter for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn system_prompt(&self, text: &str) -> String {
        self(text)
    }
}

/// Keyword topic routing: Type 1, then Type 2, then general diabetes, else general.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicRouter;

impl PromptRouter for TopicRouter {
    fn system_prompt(&self, text: &str) -> String {
        let lowered = text.to_lowercase();

        let prompt = if mentions(&lowered, TYPE_1_KEYWORDS) {
            TYPE_1_PROMPT
        } else if mentions(&lowered, TYPE_2_KEYWORDS) {
            TYPE_2_PROMPT
        } else if is_diabetes_related(text) {
            DIABETES_PROMPT
        } else {
            GENERAL_PROMPT
        };
        prompt.to_string()
    }
}

/// Always the same instruction, whatever the text.
#[derive(Debug, Clone)]
pub struct FixedPrompt(pub String);

impl Default for FixedPrompt {
    fn default() -> Self {
        Self(GENERAL_PROMPT.to_string())
    }
}

impl PromptRouter for FixedPrompt {
    fn system_prompt(&self, _text: &str) -> String {
        self.0.clone()
    }
}

/// Whether the text mentions diabetes in general, whatever the type.
pub fn is_diabetes_related(text: &str) -> bool {
    mentions(&text.to_lowercase(), DIABETES_KEYWORDS)
}

fn mentions(lowered: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| lowered.contains(k))
}

// ============================================================================
// Document digest
// ============================================================================

fn is_metric_line(line: &str) -> bool {
    line.contains("glucose")
        || line.contains("mg/dl")
        || line.contains("mmol/l")
        || line.contains("a1c")
        || (line.contains("insulin") && (line.contains("units") || line.contains("dose")))
        || LAB_VALUE.is_match(line)
}

/// Keep only the lines of `file_text` that carry lab-style markers (lowercased, trimmed).
pub fn extract_metrics(file_text: &str) -> String {
    let lowered = file_text.to_lowercase();
    let metrics: Vec<&str> = lowered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && is_metric_line(line))
        .collect();

    if metrics.is_empty() {
        NO_METRICS.to_string()
    } else {
        metrics.join("\n")
    }
}

/// Section appended to the user message, or `None` when no document has text.
pub fn document_digest(documents: &ExtractedDocuments) -> Option<String> {
    let sections: Vec<String> = documents
        .iter()
        .filter(|(_, content)| !content.trim().is_empty())
        .map(|(filename, content)| format!("\n--- {} ---\n{}\n", filename, extract_metrics(content)))
        .collect();

    if sections.is_empty() {
        return None;
    }

    Some(format!("\n\nAttached Files Analysis:\n{}", sections.concat()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_router_precedence() {
        let router = TopicRouter;
        assert_eq!(router.system_prompt("My type 1 insulin pump"), TYPE_1_PROMPT);
        assert_eq!(router.system_prompt("Started metformin last week"), TYPE_2_PROMPT);
        assert_eq!(router.system_prompt("My blood sugar is high"), DIABETES_PROMPT);
        assert_eq!(router.system_prompt("I sprained my ankle"), GENERAL_PROMPT);
        assert!(!is_diabetes_related("I sprained my ankle"));
    }

    #[test]
    fn test_topic_router_is_case_insensitive() {
        assert_eq!(TopicRouter.system_prompt("HbA1c came back at 8"), DIABETES_PROMPT);
        assert!(is_diabetes_related("GLUCOSE"));
    }

    #[test]
    fn test_closure_router() {
        let router = |text: &str| format!("echo:{}", text.len());
        assert_eq!(router.system_prompt("abc"), "echo:3");
    }

    #[test]
    fn test_fixed_prompt_ignores_text() {
        let router = FixedPrompt::default();
        assert_eq!(router.system_prompt("type 1"), GENERAL_PROMPT);
    }

    #[test]
    fn test_extract_metrics_keeps_lab_lines_only() {
        let text = "Patient: Jane Doe\n\
                    Fasting Glucose: 142 mg/dL\n\
                    HbA1c 7.9 %\n\
                    Insulin glargine 20 units nightly\n\
                    Insulin discussed\n\
                    Creatinine 1.1 mg/dl\n\
                    Follow up in 3 months";
        let digest = extract_metrics(text);
        let lines: Vec<&str> = digest.lines().collect();
        assert_eq!(
            lines,
            vec![
                "fasting glucose: 142 mg/dl",
                "hba1c 7.9 %",
                "insulin glargine 20 units nightly",
                "creatinine 1.1 mg/dl",
            ]
        );
    }

    #[test]
    fn test_extract_metrics_lab_token_without_keyword() {
        assert_eq!(extract_metrics("Potassium 4.1 mEq/L"), "potassium 4.1 meq/l");
    }

    #[test]
    fn test_extract_metrics_nothing_found() {
        assert_eq!(extract_metrics("Discharge summary, no labs"), NO_METRICS);
    }

    #[test]
    fn test_document_digest_formats_each_file() {
        let mut docs = ExtractedDocuments::new();
        docs.insert("labs.txt".into(), "Glucose 180 mg/dL".into());
        docs.insert("letter.txt".into(), "Dear doctor".into());
        docs.insert("blank.txt".into(), "   ".into());

        let digest = document_digest(&docs).unwrap();
        assert!(digest.starts_with("\n\nAttached Files Analysis:\n"));
        assert!(digest.contains("--- labs.txt ---\nglucose 180 mg/dl\n"));
        assert!(digest.contains(&format!("--- letter.txt ---\n{}\n", NO_METRICS)));
        assert!(!digest.contains("blank.txt"));
    }

    #[test]
    fn test_document_digest_none_without_text() {
        assert!(document_digest(&ExtractedDocuments::new()).is_none());
        let mut docs = ExtractedDocuments::new();
        docs.insert("empty.txt".into(), String::new());
        assert!(document_digest(&docs).is_none());
    }
}
