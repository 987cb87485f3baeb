use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::core::state::StoryResult;
use crate::services::image::ImageGenerator;
use crate::services::story::StoryGenerator;

pub struct MockStoryGenerator {
    pub story: Option<StoryResult>,
    pub topics: Arc<Mutex<Vec<String>>>,
}

impl MockStoryGenerator {
    pub fn returning(story: StoryResult) -> Self {
        Self { story: Some(story), topics: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn failing() -> Self {
        Self { story: None, topics: Arc::new(Mutex::new(Vec::new())) }
    }
}

#[async_trait]
impl StoryGenerator for MockStoryGenerator {
    async fn generate_story(&self, topic: &str) -> Result<StoryResult> {
        self.topics.lock().unwrap().push(topic.to_string());
        self.story.clone().ok_or_else(|| anyhow!("Mock story error"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCall {
    pub scene: String,
    pub style: String,
    pub character: String,
}

pub struct MockImageGenerator {
    /// Zero-based index of the call that fails, if any.
    pub fail_on_call: Option<usize>,
    pub calls: Arc<Mutex<Vec<ImageCall>>>,
}

impl MockImageGenerator {
    pub fn new() -> Self {
        Self { fail_on_call: None, calls: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn failing_on(call: usize) -> Self {
        Self { fail_on_call: Some(call), ..Self::new() }
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    async fn generate_image(
        &self,
        scene_prompt: &str,
        style_prompt: &str,
        character_description: &str,
    ) -> Result<String> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(ImageCall {
                scene: scene_prompt.to_string(),
                style: style_prompt.to_string(),
                character: character_description.to_string(),
            });
            calls.len() - 1
        };
        if self.fail_on_call == Some(index) {
            return Err(anyhow!("No image was generated."));
        }
        Ok(format!("data:image/png;base64,image{}", index))
    }
}
