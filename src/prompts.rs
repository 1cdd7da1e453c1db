//! System prompts for the two remote calls.
//!
//! Callers can override either prompt via
//! [`crate::config::WorkflowConfig::extraction_prompt`] and
//! [`crate::config::WorkflowConfig::summary_prompt`]; the constants here are
//! used only when no override is provided.

/// System instruction sent with every page image.
pub const EXTRACTION_SYSTEM_PROMPT: &str =
    "You extract clean digital text from handwritten images.";

/// System instruction sent with the summary request.
pub const SUMMARY_SYSTEM_PROMPT: &str = "You summarize long text clearly and concisely.";

/// Build the user message for the summary request.
pub fn summary_user_prompt(text: &str) -> String {
    format!("Summarize this content:\n\n{}", text)
}
