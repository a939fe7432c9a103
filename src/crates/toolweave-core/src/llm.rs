//! LLM-backed units
//!
//! The runtime knows nothing about model vendors. A model is anything that
//! implements [`Llm`]; an [`Agent`] composes one with a prompt builder and
//! an answer processor and is an ordinary [`Tool`] from then on.

use crate::context::{Args, Context};
use crate::error::Result;
use crate::tool::{Tool, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use toolweave_checkpoint::EventKind;

/// Author of a prompt message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Ordered conversation sent to a model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub messages: Vec<Message>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message {
            role: Role::System,
            content: content.into(),
        });
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message {
            role: Role::User,
            content: content.into(),
        });
        self
    }

    pub fn assistant(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message {
            role: Role::Assistant,
            content: content.into(),
        });
        self
    }

    /// Total characters across all messages
    pub fn char_len(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// Text completion backend
pub trait Llm: Send + Sync {
    fn completion(&self, prompt: &Prompt) -> Result<String>;

    /// Largest prompt the model accepts, in tokens
    fn context_length(&self) -> usize;
}

type PromptFn = dyn Fn(&Context, &Args) -> Result<Prompt> + Send + Sync;
type AnswerFn = dyn Fn(&Context, String) -> Result<Value> + Send + Sync;

/// A unit that asks a model and post-processes the answer
pub struct Agent {
    spec: ToolSpec,
    llm: Arc<dyn Llm>,
    prompt: Box<PromptFn>,
    answer: Box<AnswerFn>,
}

impl Agent {
    /// Agent returning the raw completion text
    pub fn new<P>(spec: ToolSpec, llm: Arc<dyn Llm>, prompt: P) -> Self
    where
        P: Fn(&Context, &Args) -> Result<Prompt> + Send + Sync + 'static,
    {
        Self {
            spec,
            llm,
            prompt: Box::new(prompt),
            answer: Box::new(|_, text| Ok(Value::String(text))),
        }
    }

    /// Replace the answer processor
    pub fn with_answer<A>(mut self, answer: A) -> Self
    where
        A: Fn(&Context, String) -> Result<Value> + Send + Sync + 'static,
    {
        self.answer = Box::new(answer);
        self
    }

    pub fn llm(&self) -> &Arc<dyn Llm> {
        &self.llm
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("spec", &self.spec).finish()
    }
}

impl Tool for Agent {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run(&self, ctx: &Context, args: Args) -> Result<Value> {
        let prompt = (self.prompt)(ctx, &args)?;
        ctx.record(
            EventKind::custom("llm_call"),
            json!({
                "messages": prompt.messages.len(),
                "chars": prompt.char_len(),
                "context_length": self.llm.context_length(),
            }),
        );
        let text = self.llm.completion(&prompt)?;
        (self.answer)(ctx, text)
    }
}
