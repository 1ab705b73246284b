use async_trait::async_trait;

use super::classifier::{looks_academic, parse_yes_no};
use super::safety::{self, SafetyFinding};
use super::{prompts, PipelineError};
use crate::doc_processor::prefix;
use crate::llm::{CallOptions, ModelHandle};

/// Why an exchange was turned away. Refusals are normal replies, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Forbidden topic or personal data in the message.
    Unsafe,
    NotAcademic,
    OffTopic,
}

impl Refusal {
    pub fn message(&self) -> &'static str {
        match self {
            Refusal::Unsafe => "I'm sorry, but I can't help with that request.",
            Refusal::NotAcademic => {
                "The uploaded file does not appear to be an academic or instructional document, \
                 so I can't answer questions about it."
            }
            Refusal::OffTopic => "I can only answer questions related to the uploaded document.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Refuse(Refusal),
}

pub struct GateContext<'a> {
    pub question: &'a str,
    pub document: &'a str,
}

#[async_trait]
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, ctx: &GateContext<'_>) -> Result<Verdict, PipelineError>;
}

pub struct SafetyGate;

#[async_trait]
impl Gate for SafetyGate {
    fn name(&self) -> &'static str {
        "safety"
    }

    async fn evaluate(&self, ctx: &GateContext<'_>) -> Result<Verdict, PipelineError> {
        Ok(match safety::screen(ctx.question) {
            Some(SafetyFinding::Forbidden(rule)) => {
                tracing::info!(rule, "message matched a forbidden pattern");
                Verdict::Refuse(Refusal::Unsafe)
            }
            Some(SafetyFinding::Pii(kind)) => {
                tracing::info!(kind, "message contains personal data");
                Verdict::Refuse(Refusal::Unsafe)
            }
            None => Verdict::Pass,
        })
    }
}

/// Cheap lexicon check that keeps obviously non-academic files away from the models.
pub struct StructuralGate {
    pub threshold: usize,
}

#[async_trait]
impl Gate for StructuralGate {
    fn name(&self) -> &'static str {
        "structural"
    }

    async fn evaluate(&self, ctx: &GateContext<'_>) -> Result<Verdict, PipelineError> {
        if looks_academic(ctx.document, self.threshold) {
            Ok(Verdict::Pass)
        } else {
            Ok(Verdict::Refuse(Refusal::NotAcademic))
        }
    }
}

pub struct SemanticGate {
    model: ModelHandle,
    prefix_chars: usize,
}

impl SemanticGate {
    pub fn new(model: ModelHandle, prefix_chars: usize) -> Self {
        Self {
            model,
            prefix_chars,
        }
    }
}

#[async_trait]
impl Gate for SemanticGate {
    fn name(&self) -> &'static str {
        "semantic"
    }

    async fn evaluate(&self, ctx: &GateContext<'_>) -> Result<Verdict, PipelineError> {
        let reply = self
            .model
            .ask(
                prompts::academic_check(prefix(ctx.document, self.prefix_chars)),
                yes_no_options(),
            )
            .await
            .map_err(|source| PipelineError::oracle(self.name(), source))?;
        tracing::debug!(reply = reply.trim(), "academic classifier replied");
        Ok(if parse_yes_no(&reply) {
            Verdict::Pass
        } else {
            Verdict::Refuse(Refusal::NotAcademic)
        })
    }
}

pub struct RelevanceGate {
    model: ModelHandle,
}

impl RelevanceGate {
    pub fn new(model: ModelHandle) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Gate for RelevanceGate {
    fn name(&self) -> &'static str {
        "relevance"
    }

    async fn evaluate(&self, ctx: &GateContext<'_>) -> Result<Verdict, PipelineError> {
        let reply = self
            .model
            .ask(
                prompts::relevance_check(ctx.document, ctx.question),
                yes_no_options(),
            )
            .await
            .map_err(|source| PipelineError::oracle(self.name(), source))?;
        tracing::debug!(reply = reply.trim(), "relevance classifier replied");
        Ok(if parse_yes_no(&reply) {
            Verdict::Pass
        } else {
            Verdict::Refuse(Refusal::OffTopic)
        })
    }
}

fn yes_no_options() -> CallOptions {
    CallOptions {
        temperature: Some(0.0),
        max_tokens: Some(3),
        json: false,
    }
}
