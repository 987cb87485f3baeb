use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;

use crate::core::state::{StoryResult, STORY_PAGE_COUNT};
use crate::services::llm::LlmClient;

/// Turns a topic into a title, a character description and ten pages.
#[async_trait]
pub trait StoryGenerator: Send + Sync {
    async fn generate_story(&self, topic: &str) -> Result<StoryResult>;
}

const SYSTEM_PROMPT: &str = "You are a creative storyteller for children. Your task is to generate a complete picture book story based on a user's idea. \
First, create a detailed, consistent description of the main character(s). \
Then, write a title and a 10-page story. \
For each page, provide a short, simple story text (2-3 sentences) and a detailed visual prompt for an illustrator. \
The visual prompt should describe the scene, the character's actions, and emotions, and must NOT repeat the character's physical description. \
Ensure the character description is detailed enough to be used for consistent image generation. \
Respond only in the requested JSON format.";

pub struct LlmStoryGenerator {
    llm: Box<dyn LlmClient>,
}

impl LlmStoryGenerator {
    pub fn new(llm: Box<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn user_prompt(topic: &str) -> String {
        format!(
            "Create a children's story about: {}\n\n\
            Return a single JSON object:\n\
            {{ \"title\": \"...\", \"characterDescription\": \"...\", \
            \"pages\": [ {{ \"pageNumber\": 1, \"text\": \"...\", \"imagePrompt\": \"...\" }} ] }}\n\
            The \"pages\" array must contain exactly {} entries numbered 1 to {}.",
            topic, STORY_PAGE_COUNT, STORY_PAGE_COUNT
        )
    }
}

#[async_trait]
impl StoryGenerator for LlmStoryGenerator {
    async fn generate_story(&self, topic: &str) -> Result<StoryResult> {
        let reply = self
            .llm
            .chat(SYSTEM_PROMPT, &Self::user_prompt(topic), true)
            .await?;
        debug!("Story reply: {} characters", reply.len());
        parse_story(&reply)
    }
}

/// Parses and validates a model reply into a `StoryResult`.
pub fn parse_story(reply: &str) -> Result<StoryResult> {
    let clean_json = strip_code_blocks(reply);
    let story: StoryResult = serde_json::from_str(&clean_json)
        .with_context(|| format!("Failed to parse story JSON: {}", clean_json))?;
    story
        .validated()
        .map_err(|e| anyhow!("AI did not generate a valid story: {}", e))
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::fixtures::story;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct MockLlmClient {
        reply: String,
        prompts: Arc<Mutex<Vec<(String, bool)>>>,
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn chat(&self, _system: &str, user: &str, json: bool) -> Result<String> {
            self.prompts.lock().unwrap().push((user.to_string(), json));
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
    }

    #[tokio::test]
    async fn test_generate_story_sends_topic_and_parses_reply() -> Result<()> {
        let reply = format!("```json\n{}\n```", serde_json::to_string(&story(10))?);
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let generator = LlmStoryGenerator::new(Box::new(MockLlmClient {
            reply,
            prompts: prompts.clone(),
        }));

        let result = generator.generate_story("a curious squirrel").await?;
        assert_eq!(result.pages.len(), 10);

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.starts_with("Create a children's story about: a curious squirrel"));
        assert!(prompts[0].1, "story request should ask for JSON");
        Ok(())
    }

    #[test]
    fn test_parse_story_rejects_nine_pages() {
        let reply = serde_json::to_string(&story(9)).unwrap();
        let err = parse_story(&reply).unwrap_err();
        assert!(err.to_string().contains("expected 10 pages, got 9"));
    }

    #[test]
    fn test_parse_story_rejects_malformed_json() {
        assert!(parse_story("{ \"title\": ").is_err());
        assert!(parse_story("{}").is_err());
    }
}
