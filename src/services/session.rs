use log::warn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::watch;

use crate::core::config::Capability;
use crate::core::error::GenerationError;
use crate::core::state::{Book, ImageStyle, SessionState};
use crate::core::styles::find_style;
use crate::services::workflow::{ProgressEvent, WorkflowManager};

/// One user's session: the form inputs, the last finished book or error,
/// and the workflow that produces books.
///
/// The session record is published on a watch channel, so a front end can
/// follow `is_loading` and `progress_message` while a run is in flight.
pub struct Session {
    workflow: WorkflowManager,
    styles: Vec<ImageStyle>,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(workflow: WorkflowManager, styles: Vec<ImageStyle>) -> Self {
        let initial = SessionState {
            selected_style: styles.first().cloned(),
            ..Default::default()
        };
        let (state, _) = watch::channel(initial);
        Self { workflow, styles, state }
    }

    /// Snapshot of the session record.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn styles(&self) -> &[ImageStyle] {
        &self.styles
    }

    pub fn book(&self) -> Option<Book> {
        self.state.borrow().book.clone()
    }

    /// The capability detected once at startup and held by the workflow.
    pub fn capability(&self) -> &Capability {
        self.workflow.capability()
    }

    pub fn set_topic(&self, topic: impl Into<String>) {
        let topic = topic.into();
        self.state.send_modify(|state| state.topic = topic);
    }

    /// Selects a style by id. Unknown ids leave the selection unchanged.
    pub fn select_style(&self, id: &str) -> bool {
        match find_style(&self.styles, id) {
            Some(style) => {
                let style = style.clone();
                self.state.send_modify(|state| state.selected_style = Some(style));
                true
            }
            None => {
                warn!("Unknown style id: {}", id);
                false
            }
        }
    }

    /// Runs one generation with the current topic and style.
    ///
    /// The previous book and error are discarded before the run starts. On
    /// success the new book is published; on failure only the error message is.
    pub async fn generate(
        &self,
        progress: Option<&UnboundedSender<ProgressEvent>>,
    ) -> Result<Book, GenerationError> {
        let mut started = None;
        self.state.send_if_modified(|state| {
            let outcome = self.begin(state);
            let modified = match &outcome {
                Ok(_) => true,
                Err(GenerationError::Busy) => false,
                Err(err) => {
                    state.error = Some(err.to_string());
                    true
                }
            };
            started = Some(outcome);
            modified
        });
        let (topic, style) = started.unwrap_or(Err(GenerationError::Busy))?;

        let (tx, mut rx) = unbounded_channel();
        let run = async move {
            let result = self.workflow.generate_book(&topic, &style, Some(&tx)).await;
            drop(tx);
            result
        };
        let track = async {
            while let Some(event) = rx.recv().await {
                self.state
                    .send_modify(|state| state.progress_message = event.message.clone());
                if let Some(outer) = progress {
                    let _ = outer.send(event);
                }
            }
        };
        let (result, ()) = tokio::join!(run, track);

        self.state.send_modify(|state| {
            state.is_loading = false;
            state.progress_message.clear();
            match &result {
                Ok(book) => state.book = Some(book.clone()),
                Err(err) => state.error = Some(err.to_string()),
            }
        });
        result
    }

    /// Checks the inputs and marks the record as loading.
    fn begin(&self, state: &mut SessionState) -> Result<(String, ImageStyle), GenerationError> {
        if state.is_loading {
            return Err(GenerationError::Busy);
        }
        let style = state
            .selected_style
            .clone()
            .ok_or_else(|| GenerationError::validation("Please choose an illustration style."))?;
        self.workflow.validate_topic(&state.topic)?;

        state.is_loading = true;
        state.error = None;
        state.book = None;
        Ok((state.topic.clone(), style))
    }

    pub fn dismiss_error(&self) {
        self.state.send_modify(|state| state.error = None);
    }

    /// Discards the topic, book and error. Only valid between runs.
    pub fn start_over(&self) {
        let reset = self.state.send_if_modified(|state| {
            if state.is_loading {
                return false;
            }
            state.topic.clear();
            state.book = None;
            state.error = None;
            state.progress_message.clear();
            true
        });
        if reset {
            self.workflow.reset();
        } else {
            warn!("Start over ignored while a generation is in progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::state::fixtures::story;
    use crate::core::state::StoryResult;
    use crate::core::styles::builtin_styles;
    use crate::services::mocks::{MockImageGenerator, MockStoryGenerator};
    use crate::services::story::StoryGenerator;
    use crate::services::workflow::GenerationPhase;
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn session_with(images: MockImageGenerator) -> Session {
        let workflow = WorkflowManager::new(
            &Config::default(),
            Capability::Enabled,
            Box::new(MockStoryGenerator::returning(story(10))),
            Box::new(images),
        );
        Session::new(workflow, builtin_styles())
    }

    #[test]
    fn test_first_style_selected_by_default() {
        let session = session_with(MockImageGenerator::new());
        assert_eq!(*session.capability(), Capability::Enabled);
        assert_eq!(session.state().selected_style.unwrap().id, "watercolor");
        assert!(session.select_style("anime"));
        assert!(!session.select_style("oil"));
        assert_eq!(session.state().selected_style.unwrap().id, "anime");
    }

    #[tokio::test]
    async fn test_successful_generation_publishes_book() {
        let session = session_with(MockImageGenerator::new());
        session.set_topic("a brave fox");

        let book = session.generate(None).await.unwrap();

        assert_eq!(book.pages.len(), 11);
        let state = session.state();
        assert!(!state.is_loading);
        assert!(state.error.is_none());
        assert!(state.progress_message.is_empty());
        assert_eq!(state.book, Some(book));
    }

    #[tokio::test]
    async fn test_failure_leaves_no_book() {
        let session = session_with(MockImageGenerator::failing_on(5));
        session.set_topic("a brave fox");

        let err = session.generate(None).await.unwrap_err();

        assert!(matches!(err, GenerationError::Illustration { page: 5, .. }));
        let state = session.state();
        assert!(state.book.is_none());
        assert!(!state.is_loading);
        assert_eq!(state.error.as_deref(), Some(err.to_string().as_str()));

        session.dismiss_error();
        assert!(session.state().error.is_none());
    }

    #[tokio::test]
    async fn test_validation_error_is_recorded() {
        let session = session_with(MockImageGenerator::new());
        session.set_topic("   ");

        let err = session.generate(None).await.unwrap_err();

        assert_eq!(err, GenerationError::validation("Please enter a topic for your story."));
        assert_eq!(
            session.state().error.as_deref(),
            Some("Please enter a topic for your story.")
        );
        assert!(!session.state().is_loading);
    }

    #[tokio::test]
    async fn test_new_run_discards_previous_book() {
        let images = MockImageGenerator::failing_on(13);
        let session = session_with(images);
        session.set_topic("a brave fox");
        session.generate(None).await.unwrap();

        // Second run fails on its third image request (call index 13 overall).
        assert!(session.generate(None).await.is_err());
        assert!(session.book().is_none());
    }

    #[tokio::test]
    async fn test_record_tracks_run_in_flight() {
        struct GatedStory(Arc<Notify>);

        #[async_trait::async_trait]
        impl StoryGenerator for GatedStory {
            async fn generate_story(&self, _topic: &str) -> anyhow::Result<StoryResult> {
                self.0.notified().await;
                Ok(story(10))
            }
        }

        let release = Arc::new(Notify::new());
        let workflow = WorkflowManager::new(
            &Config::default(),
            Capability::Enabled,
            Box::new(GatedStory(release.clone())),
            Box::new(MockImageGenerator::new()),
        );
        let session = Session::new(workflow, builtin_styles());
        session.set_topic("a brave fox");
        let mut watcher = session.subscribe();

        let observe = async {
            let seen = watcher
                .wait_for(|s| s.is_loading && !s.progress_message.is_empty())
                .await
                .unwrap()
                .clone();
            assert_eq!(seen.progress_message, "Brewing up a fantastic story...");
            assert!(seen.book.is_none());

            assert_eq!(session.generate(None).await.unwrap_err(), GenerationError::Busy);
            session.start_over();
            assert_eq!(session.state().topic, "a brave fox");

            release.notify_one();
        };
        let (result, ()) = tokio::join!(session.generate(None), observe);

        assert_eq!(result.unwrap().pages.len(), 11);
        let state = session.state();
        assert!(!state.is_loading);
        assert!(state.progress_message.is_empty());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_start_over_behaves_like_first_run() {
        let images = MockImageGenerator::new();
        let calls = images.calls.clone();
        let session = session_with(images);
        let (tx, mut rx) = unbounded_channel();

        session.set_topic("a brave fox");
        let first = session.generate(Some(&tx)).await.unwrap();
        let mut first_events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            first_events.push(ev);
        }
        let first_calls = calls.lock().unwrap().clone();

        session.start_over();
        let state = session.state();
        assert!(state.topic.is_empty());
        assert!(state.book.is_none());
        assert!(state.error.is_none());
        assert_eq!(session.workflow.phase(), GenerationPhase::Idle);

        calls.lock().unwrap().clear();
        session.set_topic("a brave fox");
        let second = session.generate(Some(&tx)).await.unwrap();
        let mut second_events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            second_events.push(ev);
        }

        assert_eq!(first_events, second_events);
        assert_eq!(first_calls, *calls.lock().unwrap());
        assert_eq!(first, second);
    }
}
