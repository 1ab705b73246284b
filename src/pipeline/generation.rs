//! Draft, critique and refine stages.

use super::prompts::{self, NO_ANSWER_SENTINEL};
use super::PipelineError;
use crate::llm::{CallOptions, ChatMessage, ModelHandle};
use crate::session::models::{Role, Turn};

#[derive(Debug, Clone)]
pub struct Drafter {
    model: ModelHandle,
    persona: Option<String>,
}

impl Drafter {
    pub fn new(model: ModelHandle, persona: Option<String>) -> Self {
        Self { model, persona }
    }

    pub async fn draft(
        &self,
        document: &str,
        question: &str,
        history: &[Turn],
    ) -> Result<String, PipelineError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(prompts::draft_instruction(
            document,
            self.persona.as_deref(),
        )));
        messages.extend(history.iter().map(|turn| match turn.role {
            Role::User => ChatMessage::user(turn.content.clone()),
            Role::Assistant => ChatMessage::assistant(turn.content.clone()),
        }));
        messages.push(ChatMessage::user(question));

        self.model
            .ask(
                messages,
                CallOptions {
                    temperature: Some(0.2),
                    ..CallOptions::default()
                },
            )
            .await
            .map_err(|source| PipelineError::oracle("draft", source))
    }
}

/// Reviews a draft with a model other than the drafting one.
#[derive(Debug, Clone)]
pub struct Critic {
    model: ModelHandle,
}

impl Critic {
    pub fn new(model: ModelHandle) -> Self {
        Self { model }
    }

    pub async fn critique(
        &self,
        document: &str,
        question: &str,
        draft: &str,
    ) -> Result<String, PipelineError> {
        self.model
            .ask(
                prompts::critique(document, question, draft),
                CallOptions {
                    temperature: Some(0.3),
                    ..CallOptions::default()
                },
            )
            .await
            .map_err(|source| PipelineError::oracle("critique", source))
    }
}

#[derive(Debug, Clone)]
pub struct Refiner {
    model: ModelHandle,
}

impl Refiner {
    pub fn new(model: ModelHandle) -> Self {
        Self { model }
    }

    pub async fn refine(
        &self,
        question: &str,
        draft: &str,
        critique: &str,
    ) -> Result<String, PipelineError> {
        self.model
            .ask(
                prompts::refine(question, draft, critique),
                CallOptions {
                    temperature: Some(0.3),
                    ..CallOptions::default()
                },
            )
            .await
            .map_err(|source| PipelineError::oracle("refine", source))
    }
}

/// The draft stage said the document holds no answer.
pub fn is_no_answer(draft: &str) -> bool {
    draft.trim().trim_matches('"').trim() == NO_ANSWER_SENTINEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_detection() {
        assert!(is_no_answer(NO_ANSWER_SENTINEL));
        assert!(is_no_answer(&format!("  \"{NO_ANSWER_SENTINEL}\"\n")));
        assert!(!is_no_answer("Section 2 describes the method."));
    }
}
