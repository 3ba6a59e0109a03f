//! Agent persona and conversation behaviour

use serde::{Deserialize, Serialize};

/// Assistant instructions used as the system prompt
pub const DEFAULT_INSTRUCTIONS: &str = "You are the WorldWeaver voice assistant. \
You help answer questions about history for students. \
Keep your responses concise and helpful. \
Respond with a friendly, creative tone. \
Make the information digestible.";

/// Spoken right after the agent joins the room
pub const DEFAULT_GREETING: &str = "World Weaver agent connected. How can I help you?";

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Greeting announced after the first successful join
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// System instructions for reply generation
    #[serde(default = "default_instructions")]
    pub instructions: String,

    /// Interrupt the current turn when the user starts a new utterance.
    /// When disabled, new speech during Thinking/Speaking is dropped.
    #[serde(default = "default_true")]
    pub barge_in_enabled: bool,
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}
fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            instructions: default_instructions(),
            barge_in_enabled: true,
        }
    }
}
