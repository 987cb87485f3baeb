use anyhow::anyhow;
use async_trait::async_trait;
use log::{error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::config::{Capability, Config};
use crate::core::error::GenerationError;
use crate::core::state::{Book, BookPage, ImageStyle, StoryResult, STORY_PAGE_COUNT};
use crate::services::image::{create_image_generator, ImageGenerator};
use crate::services::llm::create_llm;
use crate::services::story::{LlmStoryGenerator, StoryGenerator};

/// Where a generation run currently stands.
///
/// A run moves `Idle -> GeneratingStory -> RenderingCover -> RenderingPage(1..=10)`
/// and ends in `Done` or `Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GenerationPhase {
    #[default]
    Idle,
    GeneratingStory,
    RenderingCover,
    RenderingPage(u32),
    Done,
    Failed,
}

impl GenerationPhase {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub const fn is_running(&self) -> bool {
        matches!(
            self,
            Self::GeneratingStory | Self::RenderingCover | Self::RenderingPage(_)
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: GenerationPhase) -> bool {
        use GenerationPhase::*;
        match (*self, next) {
            (_, Failed) => self.is_running(),
            (Idle | Done | Failed, GeneratingStory) => true,
            (GeneratingStory, RenderingCover) => true,
            (RenderingCover, RenderingPage(1)) => true,
            (RenderingPage(n), RenderingPage(m)) => m == n + 1 && m as usize <= STORY_PAGE_COUNT,
            (RenderingPage(n), Done) => n as usize == STORY_PAGE_COUNT,
            _ => false,
        }
    }
}

/// One progress notification, emitted before each blocking step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: GenerationPhase,
    pub message: String,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub struct WorkflowManager {
    story: Box<dyn StoryGenerator>,
    images: Box<dyn ImageGenerator>,
    capability: Capability,
    max_topic_length: usize,
    in_flight: AtomicBool,
    phase: Mutex<GenerationPhase>,
}

/// Clears the in-flight flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl WorkflowManager {
    pub fn new(
        config: &Config,
        capability: Capability,
        story: Box<dyn StoryGenerator>,
        images: Box<dyn ImageGenerator>,
    ) -> Self {
        Self {
            story,
            images,
            capability,
            max_topic_length: config.max_topic_length,
            in_flight: AtomicBool::new(false),
            phase: Mutex::new(GenerationPhase::Idle),
        }
    }

    /// Builds the workflow from configuration. Missing credentials do not fail
    /// here: the workflow is created disabled and rejects every run.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let capability = Capability::detect(config);
        if let Capability::Disabled { reason } = &capability {
            warn!("Story generation disabled: {}", reason);
            return Ok(Self::new(config, capability, Box::new(Unavailable), Box::new(Unavailable)));
        }

        let story = LlmStoryGenerator::new(create_llm(config)?);
        let images = create_image_generator(config)?;
        Ok(Self::new(config, capability, Box::new(story), images))
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn phase(&self) -> GenerationPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the phase to `Idle` once a run has terminated.
    pub fn reset(&self) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if phase.is_terminal() {
            *phase = GenerationPhase::Idle;
        }
    }

    /// Checks everything that can be rejected without calling out.
    pub fn validate_topic<'t>(&self, topic: &'t str) -> Result<&'t str, GenerationError> {
        if let Capability::Disabled { reason } = &self.capability {
            return Err(GenerationError::validation(format!(
                "Story generation is disabled: {}",
                reason
            )));
        }
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(GenerationError::validation("Please enter a topic for your story."));
        }
        let length = topic.chars().count();
        if length > self.max_topic_length {
            return Err(GenerationError::validation(format!(
                "Please keep the topic under {} characters (got {}).",
                self.max_topic_length, length
            )));
        }
        Ok(topic)
    }

    /// Generates a complete book: the story, then the cover, then pages 1..=10,
    /// one request at a time. Any failure discards everything produced so far.
    pub async fn generate_book(
        &self,
        topic: &str,
        style: &ImageStyle,
        progress: Option<&UnboundedSender<ProgressEvent>>,
    ) -> Result<Book, GenerationError> {
        let topic = self.validate_topic(topic)?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GenerationError::Busy);
        }
        let _guard = RunGuard(&self.in_flight);

        match self.run(topic, style, progress).await {
            Ok(book) => {
                self.set_phase(GenerationPhase::Done);
                info!("Storybook \"{}\" complete with {} pages", book.title, book.pages.len());
                Ok(book)
            }
            Err(e) => {
                self.set_phase(GenerationPhase::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        topic: &str,
        style: &ImageStyle,
        progress: Option<&UnboundedSender<ProgressEvent>>,
    ) -> Result<Book, GenerationError> {
        self.advance(
            GenerationPhase::GeneratingStory,
            "Brewing up a fantastic story...".to_string(),
            progress,
        );
        let story = self.request_story(topic).await?;
        let character = story.character_description.as_str();

        let mut pages = Vec::with_capacity(STORY_PAGE_COUNT + 1);

        self.advance(
            GenerationPhase::RenderingCover,
            format!("Painting the cover for \"{}\"...", story.title),
            progress,
        );
        let cover_prompt = format!(
            "Book cover for a story titled \"{}\". {}",
            story.title, character
        );
        let cover_ref = self.request_image(0, &cover_prompt, style, character).await?;
        pages.push(BookPage {
            page_number: 0,
            text: story.title.clone(),
            image_ref: cover_ref,
            is_cover: true,
        });

        for page in &story.pages {
            self.advance(
                GenerationPhase::RenderingPage(page.page_number),
                format!(
                    "Illustrating page {} of {}...",
                    page.page_number, STORY_PAGE_COUNT
                ),
                progress,
            );
            let image_ref = self
                .request_image(page.page_number, &page.illustration_prompt, style, character)
                .await?;
            pages.push(BookPage {
                page_number: page.page_number,
                text: page.narrative_text.clone(),
                image_ref,
                is_cover: false,
            });
        }

        Ok(Book { title: story.title, pages })
    }

    async fn request_story(&self, topic: &str) -> Result<StoryResult, GenerationError> {
        let story = self.story.generate_story(topic).await.map_err(|e| {
            error!("Error generating story: {:#}", e);
            GenerationError::StoryGeneration { reason: format!("{:#}", e) }
        })?;

        story.validated().map_err(|reason| {
            error!("Story rejected: {}", reason);
            GenerationError::StoryGeneration { reason }
        })
    }

    async fn request_image(
        &self,
        page: u32,
        scene: &str,
        style: &ImageStyle,
        character: &str,
    ) -> Result<String, GenerationError> {
        let illustration_error = |reason: String| {
            error!("Error generating image for page {}: {}", page, reason);
            GenerationError::Illustration { page, reason }
        };

        let image_ref = self
            .images
            .generate_image(scene, &style.style_prompt_fragment, character)
            .await
            .map_err(|e| illustration_error(format!("{:#}", e)))?;

        if image_ref.trim().is_empty() {
            return Err(illustration_error("No image was generated.".to_string()));
        }
        Ok(image_ref)
    }

    fn advance(
        &self,
        next: GenerationPhase,
        message: String,
        progress: Option<&UnboundedSender<ProgressEvent>>,
    ) {
        {
            let current = self.phase();
            debug_assert!(
                current.can_advance_to(next),
                "illegal phase change {:?} -> {:?}",
                current,
                next
            );
        }
        self.set_phase(next);
        info!("{}", message);
        if let Some(tx) = progress {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(ProgressEvent { phase: next, message });
        }
    }

    fn set_phase(&self, next: GenerationPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

/// Stand-in collaborator for a workflow without credentials.
struct Unavailable;

#[async_trait]
impl StoryGenerator for Unavailable {
    async fn generate_story(&self, _topic: &str) -> anyhow::Result<StoryResult> {
        Err(anyhow!("Story generation is not configured"))
    }
}

#[async_trait]
impl ImageGenerator for Unavailable {
    async fn generate_image(&self, _scene: &str, _style: &str, _character: &str) -> anyhow::Result<String> {
        Err(anyhow!("Image generation is not configured"))
    }
}
