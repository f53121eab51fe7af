//! Prompt assembly and answer generation over retrieved chunks.

use crate::config::GenerationConfig;
use crate::error::RagError;
use crate::models::{Answer, Citation, ConversationTurn, RetrievedContext, Role, ScoredRecord};
use crate::traits::{ChatModel, GenerationOptions};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Returned instead of a model answer when no chunk clears the relevance floor.
pub const NO_RELEVANT_CONTEXT_ANSWER: &str =
    "I could not find information relevant to your question in the indexed documents.";

/// A prompt together with the chunks that made it into the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPlan {
    pub prompt: String,
    pub citations: Vec<Citation>,
    /// Retrieved hits left out because the context budget ran out.
    pub dropped: usize,
}

/// Lays out context most relevant first. Chunks that do not fit in
/// `budget_chars` are dropped from the tail. A leading chunk that alone exceeds
/// the budget is cut to fit so the model always sees the best hit.
pub fn plan_prompt(
    question: &str,
    history: &[ConversationTurn],
    context: &RetrievedContext,
    budget_chars: usize,
) -> PromptPlan {
    let mut included: Vec<(&ScoredRecord, String)> = Vec::new();
    let mut used = 0usize;

    for hit in &context.hits {
        let length = hit.record.text.chars().count();
        if used + length <= budget_chars {
            used += length;
            included.push((hit, hit.record.text.clone()));
        } else if included.is_empty() && budget_chars > 0 {
            used = budget_chars;
            included.push((hit, hit.record.text.chars().take(budget_chars).collect()));
        } else {
            break;
        }
    }

    let mut documents = String::new();
    for (position, (hit, text)) in included.iter().enumerate() {
        let _ = write!(
            documents,
            "\nDocument {}:\nSource: {}\n{}\nContent: {}\n",
            position + 1,
            hit.record.source,
            hit.record.pages,
            text
        );
    }

    let mut prompt = String::from(
        "You are a helpful assistant that answers questions based on the provided documents.\n",
    );
    if !history.is_empty() {
        prompt.push_str("\nCONVERSATION SO FAR:\n");
        for turn in history {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            let _ = writeln!(prompt, "{speaker}: {}", turn.content);
        }
    }
    let _ = write!(
        prompt,
        "\nCONTEXT:\n{documents}\nQUESTION:\n{question}\n\n\
         Answer using only the information in the documents above. \
         If the answer cannot be determined from them, say so politely.\n"
    );

    let citations = included
        .iter()
        .map(|(hit, _)| Citation {
            chunk_id: hit.record.chunk_id.clone(),
            document_id: hit.record.document_id.clone(),
            source: hit.record.source.clone(),
            pages: hit.record.pages,
            score: hit.score,
        })
        .collect();

    PromptPlan {
        prompt,
        citations,
        dropped: context.hits.len() - included.len(),
    }
}

#[derive(Clone)]
pub struct AnswerGenerator {
    chat: Arc<dyn ChatModel>,
    config: GenerationConfig,
}

impl AnswerGenerator {
    pub fn new(chat: Arc<dyn ChatModel>, config: GenerationConfig) -> Self {
        Self { chat, config }
    }

    pub fn chat_model(&self) -> &Arc<dyn ChatModel> {
        &self.chat
    }

    pub fn options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        history: &[ConversationTurn],
        context: &RetrievedContext,
    ) -> Result<Answer, RagError> {
        let plan = plan_prompt(question, history, context, self.config.context_budget_chars);
        if plan.dropped > 0 {
            debug!(
                included = plan.citations.len(),
                dropped = plan.dropped,
                "context budget reached"
            );
        }

        let options = self.options();
        let text = self
            .config
            .retry
            .run("chat generation", || self.chat.generate(&plan.prompt, &options))
            .await
            .map_err(|error| {
                warn!(%error, model = self.chat.model_id(), "generation failed");
                RagError::Generation(error.to_string())
            })?;

        Ok(Answer {
            text: text.trim().to_string(),
            citations: plan.citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndexRecord, PageRange};
    use crate::retry::RetryPolicy;
    use crate::testing::RecordingChat;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn hit(chunk_id: &str, text: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            record: IndexRecord {
                chunk_id: chunk_id.to_string(),
                document_id: "doc".to_string(),
                source: "manual.pdf".to_string(),
                text: text.to_string(),
                pages: PageRange { start: 2, end: 3 },
                vector: Vec::new(),
                embedding_model_id: "m".to_string(),
                ingested_at: Utc::now(),
                metadata: BTreeMap::new(),
            },
            score,
        }
    }

    fn context(hits: Vec<ScoredRecord>) -> RetrievedContext {
        RetrievedContext { hits }
    }

    fn config() -> GenerationConfig {
        GenerationConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn least_relevant_chunks_are_dropped_first() {
        let retrieved = context(vec![
            hit("a", &"a".repeat(40), 0.9),
            hit("b", &"b".repeat(40), 0.8),
            hit("c", &"c".repeat(40), 0.7),
        ]);

        let plan = plan_prompt("q?", &[], &retrieved, 100);
        let cited: Vec<_> = plan.citations.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(cited, vec!["a", "b"]);
        assert_eq!(plan.dropped, 1);
        assert!(plan.prompt.contains(&"b".repeat(40)));
        assert!(!plan.prompt.contains(&"c".repeat(40)));
    }

    #[test]
    fn oversized_best_chunk_is_truncated_not_dropped() {
        let retrieved = context(vec![hit("a", &"x".repeat(50), 0.9), hit("b", "tail", 0.5)]);

        let plan = plan_prompt("q?", &[], &retrieved, 10);
        assert_eq!(plan.citations.len(), 1);
        assert!(plan.prompt.contains(&format!("Content: {}\n", "x".repeat(10))));
        assert!(!plan.prompt.contains(&"x".repeat(11)));
    }

    #[test]
    fn prompt_carries_history_pages_and_question() {
        let history = vec![
            ConversationTurn { role: Role::User, content: "Hi".to_string() },
            ConversationTurn { role: Role::Assistant, content: "Hello!".to_string() },
        ];
        let plan = plan_prompt("Where?", &history, &context(vec![hit("a", "In Paris.", 0.9)]), 1_000);

        assert!(plan.prompt.contains("User: Hi\nAssistant: Hello!\n"));
        assert!(plan.prompt.contains("Source: manual.pdf\nPages 2-3\nContent: In Paris."));
        assert!(plan.prompt.contains("QUESTION:\nWhere?"));
    }

    #[tokio::test]
    async fn citations_come_from_included_chunks_only() {
        let chat = Arc::new(RecordingChat::replying("  Paris.  "));
        let generator = AnswerGenerator::new(
            chat.clone(),
            GenerationConfig {
                context_budget_chars: 12,
                ..config()
            },
        );
        let retrieved = context(vec![hit("a", "In Paris.", 0.9), hit("b", "Elsewhere.", 0.4)]);

        let answer = generator.generate("Where?", &[], &retrieved).await.unwrap();
        assert_eq!(answer.text, "Paris.");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].chunk_id, "a");
        assert_eq!(chat.prompts().len(), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_within_the_attempt_limit() {
        let chat = Arc::new(RecordingChat::replying("ok").failing_transiently_first(1));
        let generator = AnswerGenerator::new(chat.clone(), config());

        let answer = generator.generate("q", &[], &context(vec![hit("a", "t", 0.9)])).await;
        assert!(answer.is_ok());
        assert_eq!(chat.prompts().len(), 2);
    }

    #[tokio::test]
    async fn persistent_failure_surfaces_as_generation_error() {
        let chat = Arc::new(RecordingChat::replying("never").always_failing());
        let generator = AnswerGenerator::new(chat.clone(), config());

        let result = generator.generate("q", &[], &context(vec![hit("a", "t", 0.9)])).await;
        assert!(matches!(result, Err(RagError::Generation(_))));
        assert_eq!(chat.prompts().len(), 2);
    }
}
