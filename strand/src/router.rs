//! Intent router: classify a request into a workflow domain.
//!
//! Primary path asks the LLM for a JSON classification; when the LLM is
//! unavailable or its confidence falls below the threshold, keyword
//! heuristics over the lowercase task decide instead. A caller-supplied
//! domain override bypasses classification entirely at the orchestrator.

use std::sync::Arc;

use crate::json_extract::extract_json;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::state::{Classification, Complexity, Domain};

/// Default confidence below which the keyword fallback takes over.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

// File extensions stay specific enough not to collide with data suffixes
// (".c" would match ".csv").
const CODING_KEYWORDS: &[&str] = &[
    "fix", "implement", "refactor", "debug", "bug", "compile", "function", "class", "script",
    ".py", ".rs", ".js", ".tsx", ".go", ".java", ".cpp", ".rb",
];
const RESEARCH_KEYWORDS: &[&str] = &[
    "research", "summarize", "summarise", "find out", "investigate", "compare", "explain",
    "look up",
];
const DATA_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "dataset", ".csv", ".parquet", "statistics", "plot", "chart",
    "dataframe",
];

/// Classifies tasks into domains.
pub struct IntentRouter {
    llm: Arc<dyn LlmClient>,
    confidence_threshold: f64,
}

impl IntentRouter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Classifies the task. Never fails: low confidence and LLM errors fall
    /// back to keyword heuristics.
    pub async fn classify(&self, task: &str) -> Classification {
        match self.classify_with_llm(task).await {
            Some(c) if c.confidence >= self.confidence_threshold => {
                tracing::info!(domain = %c.domain, confidence = c.confidence, "task classified");
                c
            }
            Some(c) => {
                tracing::info!(
                    domain = %c.domain,
                    confidence = c.confidence,
                    "low classification confidence; using keyword fallback"
                );
                keyword_fallback(task)
            }
            None => {
                tracing::warn!("llm classification failed; using keyword fallback");
                keyword_fallback(task)
            }
        }
    }

    async fn classify_with_llm(&self, task: &str) -> Option<Classification> {
        let prompt = format!(
            "Classify this task into exactly one domain.\n\
             \n\
             Task: {task}\n\
             \n\
             Domains:\n\
             - coding: writing, fixing, or refactoring code; working with source files\n\
             - research: gathering, summarizing, or comparing information\n\
             - data: analyzing datasets, statistics, CSV/parquet files\n\
             - general: everything else (file organization, system tasks, conversation)\n\
             \n\
             Respond with ONLY JSON:\n\
             {{\n\
               \"domain\": \"coding|research|data|general\",\n\
               \"confidence\": 0.0,\n\
               \"reasoning\": \"one sentence\",\n\
               \"estimated_complexity\": \"simple|moderate|complex|very_complex\",\n\
               \"requires_sub_agents\": false\n\
             }}"
        );
        let messages = [
            ChatMessage::system("You are a task classification expert. Respond with only JSON."),
            ChatMessage::user(prompt),
        ];
        let options = ChatOptions::default()
            .with_temperature(0.2)
            .with_max_tokens(300);
        let reply = self.llm.chat_completion(&messages, &options).await.ok()?;
        let value = extract_json(&reply.content).ok()?;

        let domain: Domain = value.get("domain")?.as_str()?.parse().ok()?;
        let confidence = value
            .get("confidence")
            .and_then(|c| c.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let complexity = value
            .get("estimated_complexity")
            .and_then(|c| c.as_str())
            .and_then(|s| s.parse::<Complexity>().ok())
            .unwrap_or(Complexity::Moderate);
        Some(Classification {
            domain,
            confidence,
            reasoning: value
                .get("reasoning")
                .and_then(|r| r.as_str())
                .unwrap_or("")
                .to_string(),
            estimated_complexity: complexity,
            requires_sub_agents: value
                .get("requires_sub_agents")
                .and_then(|r| r.as_bool())
                .unwrap_or(false),
        })
    }
}

/// Keyword heuristics over the lowercase task.
fn keyword_fallback(task: &str) -> Classification {
    let lower = task.to_lowercase();
    let hit = |keys: &[&str]| keys.iter().any(|k| lower.contains(k));

    let (domain, reasoning) = if hit(CODING_KEYWORDS) {
        (Domain::Coding, "matched coding keywords")
    } else if hit(DATA_KEYWORDS) {
        (Domain::Data, "matched data keywords")
    } else if hit(RESEARCH_KEYWORDS) {
        (Domain::Research, "matched research keywords")
    } else {
        (Domain::General, "no domain keywords matched")
    };
    Classification {
        domain,
        confidence: 0.5,
        reasoning: format!("keyword fallback: {reasoning}"),
        estimated_complexity: Complexity::Moderate,
        requires_sub_agents: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn classification_json(domain: &str, confidence: f64) -> String {
        format!(
            "{{\"domain\": \"{domain}\", \"confidence\": {confidence}, \
             \"reasoning\": \"test\", \"estimated_complexity\": \"simple\", \
             \"requires_sub_agents\": false}}"
        )
    }

    /// **Scenario**: confident LLM classification is used as-is.
    #[tokio::test]
    async fn confident_classification_wins() {
        let llm = Arc::new(MockLlm::fixed(classification_json("coding", 0.9)));
        let router = IntentRouter::new(llm);
        let c = router.classify("fix the bug in main.rs").await;
        assert_eq!(c.domain, Domain::Coding);
        assert!((c.confidence - 0.9).abs() < f64::EPSILON);
    }

    /// **Scenario**: low confidence falls back to keywords.
    #[tokio::test]
    async fn low_confidence_uses_keywords() {
        let llm = Arc::new(MockLlm::fixed(classification_json("research", 0.3)));
        let router = IntentRouter::new(llm);
        let c = router.classify("analyze sales.csv for trends").await;
        assert_eq!(c.domain, Domain::Data);
        assert!(c.reasoning.contains("keyword fallback"));
    }

    /// **Scenario**: unusable LLM output falls back to keywords.
    #[tokio::test]
    async fn unparseable_reply_uses_keywords() {
        let llm = Arc::new(MockLlm::fixed("I think this is about code."));
        let router = IntentRouter::new(llm);
        let c = router.classify("implement a parser in lexer.rs").await;
        assert_eq!(c.domain, Domain::Coding);
    }

    /// **Scenario**: LLM failure falls back to keywords; general when nothing
    /// matches.
    #[tokio::test]
    async fn llm_failure_falls_back() {
        let llm = MockLlm::fixed("unused");
        llm.push_unavailable("down");
        let router = IntentRouter::new(Arc::new(llm));
        let c = router.classify("tidy up my desktop folder").await;
        assert_eq!(c.domain, Domain::General);
    }

    #[test]
    fn keyword_fallback_research() {
        let c = keyword_fallback("summarize the latest papers on routing");
        assert_eq!(c.domain, Domain::Research);
    }
}
