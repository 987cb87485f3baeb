//! Errors surfaced by a generation run.
//!
//! Every variant carries the message shown to the user. The underlying cause
//! of a failed external call is logged where it is caught and not kept here.

/// Failure of a `generate_book` call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Rejected before any external call was made.
    #[error("{0}")]
    Validation(String),

    /// Another generation run is still in flight.
    #[error("A storybook is already being generated. Please wait for it to finish.")]
    Busy,

    /// The story request failed or broke the story contract.
    #[error("Failed to generate the story. The AI may be experiencing issues. Please try a different topic or try again later.")]
    StoryGeneration { reason: String },

    /// One illustration request failed. `page` is 0 for the cover.
    #[error("Failed to generate an illustration. The AI may be experiencing issues. Please try again later.")]
    Illustration { page: u32, reason: String },
}

impl GenerationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_distinguish_story_and_illustration() {
        let story = GenerationError::StoryGeneration { reason: "x".into() };
        let image = GenerationError::Illustration { page: 3, reason: "y".into() };
        assert!(story.to_string().contains("story"));
        assert!(image.to_string().contains("illustration"));
    }
}
