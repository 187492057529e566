// Session controller event loop.
//
// Owns the session state and every side effect around it: the debounced
// question fetch, the relay calls (spawned so the loop never blocks on the
// network), and the update stream back to the front end. Responses from
// spawned calls come back through an internal event channel and are folded
// into the state via the pure reducer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::protocol::{
    GenerateImageResponse, QuestionsResponse, RefineResponse, SessionCommand, SessionUpdate,
    VariationsResponse,
};
use crate::session::client::{ClientError, RelayClient};
use crate::session::debounce::Debounce;
use crate::session::state::{reduce, Action, SessionState};

// ---------------------------------------------------------------------------
// Internal events
// ---------------------------------------------------------------------------

/// Completed relay calls, delivered back to the event loop by spawned tasks.
enum RelayEvent {
    Questions {
        /// Matches the fetch generation issued when the call was spawned.
        /// Stale generations are discarded so an old response can never
        /// overwrite a newer question set.
        generation: u64,
        result: Result<QuestionsResponse, ClientError>,
    },
    Refined {
        result: Result<RefineResponse, ClientError>,
    },
    Image {
        result: Result<GenerateImageResponse, ClientError>,
    },
    Variations {
        result: Result<VariationsResponse, ClientError>,
    },
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

pub struct SessionController {
    state: SessionState,
    relay: Arc<RelayClient>,
    updates: mpsc::Sender<SessionUpdate>,
    events: mpsc::Sender<RelayEvent>,
    /// Monotonically increasing counter identifying the current question
    /// fetch. Incremented each time a fetch is spawned; responses carrying
    /// an older generation are discarded in `handle_event`.
    generation: u64,
}

impl SessionController {
    fn new(
        relay: RelayClient,
        updates: mpsc::Sender<SessionUpdate>,
        events: mpsc::Sender<RelayEvent>,
    ) -> Self {
        Self {
            state: SessionState::new(),
            relay: Arc::new(relay),
            updates,
            events,
            generation: 0,
        }
    }

    fn apply(&mut self, action: Action) {
        self.state = reduce(&self.state, action);
    }

    async fn handle_command(&mut self, cmd: SessionCommand, debounce: &mut Debounce) {
        match cmd {
            SessionCommand::EditPrompt(text) => {
                self.apply(Action::PromptChanged(text));
                // Only a non-empty prompt schedules a question fetch; an
                // edit inside the quiet period replaces the deadline.
                if self.state.prompt.trim().is_empty() {
                    debounce.cancel();
                } else {
                    debounce.arm();
                }
            }
            SessionCommand::EditAnswer { index, text } => {
                if index >= self.state.questions.len() {
                    warn!("Ignoring answer for out-of-range question index {index}");
                }
                self.apply(Action::AnswerChanged { index, text });
            }
            SessionCommand::Refine { index } => {
                self.start_refine(index).await;
            }
            SessionCommand::Submit => {
                self.start_generate();
            }
            SessionCommand::Variations => {
                self.start_variations().await;
            }
            SessionCommand::Quit => {
                // Handled in the run loop.
            }
        }
    }

    /// Spawn the debounced question fetch for the current prompt.
    fn fetch_questions(&mut self) {
        if self.state.prompt.trim().is_empty() {
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let prompt = self.state.prompt.clone();
        let relay = Arc::clone(&self.relay);
        let events = self.events.clone();

        debug!("Fetching questions (gen: {generation})");
        tokio::spawn(async move {
            let result = relay.generate_questions(&prompt).await;
            let _ = events.send(RelayEvent::Questions { generation, result }).await;
        });
    }

    /// Spawn a refinement using only the question/answer pair at `index`.
    async fn start_refine(&mut self, index: usize) {
        let Some(pair) = self.state.pair_at(index) else {
            warn!("Refine requested for out-of-range question index {index}");
            let _ = self
                .updates
                .send(SessionUpdate::Failed {
                    operation: "refine-prompt",
                    message: format!("no question at index {index}"),
                })
                .await;
            return;
        };

        let original = self.state.prompt.clone();
        let relay = Arc::clone(&self.relay);
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = relay.refine_prompt(&original, vec![pair]).await;
            let _ = events.send(RelayEvent::Refined { result }).await;
        });
    }

    /// Spawn an image generation for the current prompt.
    fn start_generate(&mut self) {
        let prompt = self.state.prompt.clone();
        let relay = Arc::clone(&self.relay);
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = relay.generate_image(&prompt).await;
            let _ = events.send(RelayEvent::Image { result }).await;
        });
    }

    /// Spawn a variation request for the currently displayed image.
    async fn start_variations(&mut self) {
        let Some(image) = self.state.image_url.clone() else {
            warn!("Variations requested with no image displayed");
            let _ = self
                .updates
                .send(SessionUpdate::Failed {
                    operation: "generate-image-variations",
                    message: "no image to request variations for".into(),
                })
                .await;
            return;
        };

        let relay = Arc::clone(&self.relay);
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = relay.image_variations(&image).await;
            let _ = events.send(RelayEvent::Variations { result }).await;
        });
    }

    async fn handle_event(&mut self, event: RelayEvent, debounce: &mut Debounce) {
        match event {
            RelayEvent::Questions { generation, result } => {
                if generation != self.generation {
                    debug!(
                        "Discarding stale question response (event gen: {generation}, current gen: {})",
                        self.generation
                    );
                    return;
                }
                match result {
                    Ok(response) => {
                        self.apply(Action::QuestionsLoaded(response.questions.clone()));
                        let _ = self
                            .updates
                            .send(SessionUpdate::QuestionsChanged(response.questions))
                            .await;
                    }
                    Err(e) => self.report_failure("generate-questions", e).await,
                }
            }
            RelayEvent::Refined { result } => match result {
                Ok(response) => {
                    self.apply(Action::PromptRefined(response.refined_prompt.clone()));
                    let _ = self
                        .updates
                        .send(SessionUpdate::PromptChanged(response.refined_prompt))
                        .await;
                    let _ = self
                        .updates
                        .send(SessionUpdate::QuestionsChanged(Vec::new()))
                        .await;
                    // The replaced prompt re-arms the debounced fetch, so a
                    // fresh question set follows after the quiet period.
                    debounce.arm();
                }
                Err(e) => self.report_failure("refine-prompt", e).await,
            },
            RelayEvent::Image { result } => match result {
                Ok(response) => {
                    self.apply(Action::ImageGenerated(response.image_url.clone()));
                    let _ = self
                        .updates
                        .send(SessionUpdate::ImageChanged(response.image_url))
                        .await;
                }
                Err(e) => self.report_failure("generate-image", e).await,
            },
            RelayEvent::Variations { result } => match result {
                Ok(response) => {
                    self.apply(Action::VariationsLoaded(response.image_urls));
                    if let Some(url) = self.state.image_url.clone() {
                        let _ = self.updates.send(SessionUpdate::ImageChanged(url)).await;
                    }
                }
                Err(e) => self.report_failure("generate-image-variations", e).await,
            },
        }
    }

    async fn report_failure(&self, operation: &'static str, e: ClientError) {
        warn!("{operation} failed: {e}");
        let _ = self
            .updates
            .send(SessionUpdate::Failed {
                operation,
                message: e.to_string(),
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

/// Run the session controller until `Quit` arrives or the command channel
/// closes. Listens on three sources with `tokio::select!`: front-end
/// commands, the debounce deadline, and completed relay calls.
pub async fn run(
    config: &SessionConfig,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    update_tx: mpsc::Sender<SessionUpdate>,
) -> anyhow::Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let mut controller = SessionController::new(
        RelayClient::new(config.relay_url.clone()),
        update_tx,
        event_tx,
    );
    let mut debounce = Debounce::new(Duration::from_millis(config.debounce_ms));

    info!("Session controller started (relay: {})", config.relay_url);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Quit) | None => break,
                    Some(cmd) => controller.handle_command(cmd, &mut debounce).await,
                }
            }

            _ = debounce.wait(), if debounce.is_armed() => {
                debounce.cancel();
                controller.fetch_questions();
            }

            // The controller keeps a sender clone, so this channel never
            // closes while the loop runs.
            Some(event) = event_rx.recv() => {
                controller.handle_event(event, &mut debounce).await;
            }
        }
    }

    info!("Session controller exiting");
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
