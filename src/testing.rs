//! Scripted oracle for pipeline tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::llm::{ChatRequest, ChatResponse, LlmError, ModelHandle, Oracle, RetryPolicy};
use crate::pipeline::StageModels;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Semantic,
    Relevance,
    Metadata,
    Draft,
    Critique,
    Refine,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Semantic,
        Stage::Relevance,
        Stage::Metadata,
        Stage::Draft,
        Stage::Critique,
        Stage::Refine,
    ];

    fn model(self) -> &'static str {
        match self {
            Stage::Semantic => "test-semantic",
            Stage::Relevance => "test-relevance",
            Stage::Metadata => "test-metadata",
            Stage::Draft => "test-draft",
            Stage::Critique => "test-critique",
            Stage::Refine => "test-refine",
        }
    }
}

enum Script {
    Reply(String),
    Fail,
}

#[derive(Default)]
struct State {
    scripts: HashMap<&'static str, Script>,
    calls: HashMap<String, Vec<ChatRequest>>,
}

/// Answers by model name, one model per stage, and records every request.
#[derive(Clone, Default)]
pub struct ScriptedOracle {
    state: Arc<Mutex<State>>,
}

impl ScriptedOracle {
    /// Every gate passes and every stage answers.
    pub fn happy() -> Self {
        Self::default()
            .reply(Stage::Semantic, "YES")
            .reply(Stage::Relevance, "YES")
            .reply(
                Stage::Metadata,
                r#"{"instructor_name": "Dr. Ada Byron", "institution_name": null,
                    "course_title": "Information Theory", "department": null}"#,
            )
            .reply(Stage::Draft, "Draft answer.")
            .reply(Stage::Critique, "Add headings.")
            .reply(Stage::Refine, "Refined answer with headings.")
    }

    pub fn reply(self, stage: Stage, text: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(stage.model(), Script::Reply(text.to_string()));
        self
    }

    pub fn fail(self, stage: Stage) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(stage.model(), Script::Fail);
        self
    }

    pub fn stage_models(&self) -> StageModels {
        let oracle: Arc<dyn Oracle> = Arc::new(self.clone());
        let bind = |stage: Stage| ModelHandle::new(oracle.clone(), stage.model(), RetryPolicy::none());
        StageModels {
            semantic: bind(Stage::Semantic),
            relevance: bind(Stage::Relevance),
            metadata: bind(Stage::Metadata),
            draft: bind(Stage::Draft),
            critique: bind(Stage::Critique),
            refine: bind(Stage::Refine),
        }
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(stage.model())
            .map_or(0, Vec::len)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().map(Vec::len).sum()
    }

    pub fn last_request(&self, stage: Stage) -> Option<ChatRequest> {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(stage.model())
            .and_then(|requests| requests.last().cloned())
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .entry(request.model.clone())
            .or_default()
            .push(request.clone());
        match state.scripts.get(request.model.as_str()) {
            Some(Script::Reply(text)) => Ok(ChatResponse {
                content: text.clone(),
                model: request.model.clone(),
            }),
            Some(Script::Fail) => Err(LlmError::Api {
                status: 400,
                message: format!("scripted failure for {}", request.model),
            }),
            None => Err(LlmError::Empty),
        }
    }
}
