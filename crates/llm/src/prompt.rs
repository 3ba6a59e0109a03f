//! Prompt Building
//!
//! Constructs chat prompts for the history assistant from the turn's
//! transcript and the context captured when the request was composed.

use serde::{Deserialize, Serialize};
use std::fmt;
use weaver_core::{ContextFact, ContextKind, ContextSnapshot, ReplyRequest};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Prompt builder for the voice assistant
#[derive(Debug, Default)]
pub struct PromptBuilder {
    messages: Vec<Message>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages for one reply request
    pub fn for_request(instructions: &str, request: &ReplyRequest) -> Vec<Message> {
        Self::new()
            .system_prompt(instructions)
            .with_context(&request.context)
            .user_message(&request.transcript)
            .build()
    }

    /// Assistant instructions
    pub fn system_prompt(mut self, instructions: &str) -> Self {
        if !instructions.trim().is_empty() {
            self.messages.push(Message::system(instructions));
        }
        self
    }

    /// One system message per context fact
    pub fn with_context(mut self, snapshot: &ContextSnapshot) -> Self {
        for fact in snapshot.facts() {
            if fact.payload.trim().is_empty() {
                continue;
            }
            self.messages.push(Message::system(context_message(fact)));
        }
        self
    }

    /// Add current user message
    pub fn user_message(mut self, message: &str) -> Self {
        self.messages.push(Message::user(message));
        self
    }

    /// Build final message list
    pub fn build(self) -> Vec<Message> {
        self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// How a fact is framed for the model
pub fn context_message(fact: &ContextFact) -> String {
    if fact.kind == ContextKind::VISUAL {
        format!(
            "The current visual context (what the user sees) is: {}. \
             Use this information to better understand the user's request.",
            fact.payload
        )
    } else {
        format!("Additional context ({}): {}", fact.kind, fact.payload)
    }
}
