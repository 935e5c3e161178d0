//! Six-stage adventure generation pipeline.
//!
//! ```text
//! Outline ─> CoverPrompts ─> DungeonLayout ─> FullExpansion ─> IllustrationPrompts ─> ContentReview
//!  1 call      1 call         1 call/episode   continuation/ep   1 call/episode        continuation/ep
//! ```
//!
//! Each stage takes the [`Adventure`] by value and hands it back, so exactly
//! one stage holds it at a time. Stages run strictly in order; the first
//! failure stops the run, is reported through the [`ProgressReporter`] and
//! is returned as a [`StageError`] naming the stage. The aggregate is saved
//! through the [`AdventureStore`] after every stage (and between
//! continuation calls) so a crash leaves the latest state on disk.

mod prompts;
mod stages;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use questforge_common::Adventure;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info};

use crate::client::TextGenerator;
use crate::errors::{RenderError, StageError, StageFailure};
use crate::progress::{NoopReporter, ProgressReporter};

/// Stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Outline,
    CoverPrompts,
    DungeonLayout,
    FullExpansion,
    IllustrationPrompts,
    ContentReview,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Outline,
        Stage::CoverPrompts,
        Stage::DungeonLayout,
        Stage::FullExpansion,
        Stage::IllustrationPrompts,
        Stage::ContentReview,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Outline => "Generating table of contents",
            Stage::CoverPrompts => "Creating cover pages",
            Stage::DungeonLayout => "Designing dungeons",
            Stage::FullExpansion => "Expanding adventure content",
            Stage::IllustrationPrompts => "Creating illustrations",
            Stage::ContentReview => "Reviewing content",
        }
    }

    /// Viewer-facing line sent when the stage starts.
    pub fn announcement(&self) -> &'static str {
        match self {
            Stage::Outline => "🎲 Generating table of contents...",
            Stage::CoverPrompts => "🎨 Creating cover pages...",
            Stage::DungeonLayout => "🗺️ Designing dungeon layouts...",
            Stage::FullExpansion => "📚 Expanding adventure content...",
            Stage::IllustrationPrompts => "🖼️ Creating illustration prompts...",
            Stage::ContentReview => "⚖️ Reviewing and adjusting content...",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Durable checkpoint target for the adventure aggregate.
pub trait AdventureStore: Send + Sync {
    fn save(&self, adventure: &Adventure) -> Result<(), RenderError>;
}

/// Drives one adventure through every stage.
pub struct Pipeline {
    client: Arc<dyn TextGenerator>,
    reporter: Arc<dyn ProgressReporter>,
    store: Option<Arc<dyn AdventureStore>>,
    max_continuations: usize,
    deadline: Option<Duration>,
}

impl Pipeline {
    pub fn new(client: Arc<dyn TextGenerator>) -> Self {
        Self {
            client,
            reporter: Arc::new(NoopReporter),
            store: None,
            max_continuations: 40,
            deadline: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn AdventureStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_max_continuations(mut self, max: usize) -> Self {
        self.max_continuations = max;
        self
    }

    /// Overall time bound, checked before each stage starts.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run every stage in order.
    ///
    /// On failure the reporter's `failed` hook receives a message naming the
    /// stage before the error is returned. Success is left for the caller to
    /// report, since rendering still follows.
    pub async fn run(&self, adventure: Adventure) -> Result<Adventure, StageError> {
        let deadline = self.deadline.map(|d| Instant::now() + d);
        self.reporter.started();

        let mut adventure = adventure;
        for stage in Stage::ALL {
            adventure = match self.run_stage(stage, adventure, deadline).await {
                Ok(next) => next,
                Err(e) => {
                    error!(stage = %stage, error = %e, "pipeline stopped");
                    self.reporter.failed(&format!("❌ {e}"));
                    return Err(e);
                }
            };
        }

        info!(episodes = adventure.episodes.len(), "pipeline finished");
        Ok(adventure)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        adventure: Adventure,
        deadline: Option<Instant>,
    ) -> Result<Adventure, StageError> {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StageError::new(stage, StageFailure::DeadlineExceeded));
        }

        info!(stage = %stage, "stage started");
        self.reporter.report(stage.announcement());

        let adventure = match stage {
            Stage::Outline => self.outline(adventure).await?,
            Stage::CoverPrompts => self.cover_prompts(adventure).await?,
            Stage::DungeonLayout => self.dungeon_layout(adventure).await?,
            Stage::FullExpansion => self.full_expansion(adventure).await?,
            Stage::IllustrationPrompts => self.illustration_prompts(adventure).await?,
            Stage::ContentReview => self.content_review(adventure).await?,
        };

        self.checkpoint(stage, &adventure)?;
        Ok(adventure)
    }

    fn checkpoint(&self, stage: Stage, adventure: &Adventure) -> Result<(), StageError> {
        match &self.store {
            Some(store) => store.save(adventure).map_err(|e| StageError::new(stage, e)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::client::testing::ScriptedGenerator;
    use crate::errors::GenerationError;
    use crate::progress::testing::RecordingReporter;

    const OUTLINE: &str = "\
## Episode: 1 - Salt
Summary: Smugglers in the harbor.
Tagline: Nothing stays buried.
Location: Saltmere docks.
Characters: Mara, Osk

## Episode: 2 - Ash
Summary: The warehouse burns.
Tagline: Smoke tells stories.
Location: The old quarter.
Characters: Ivo
";

    const ILLUSTRATIONS: &str = "\
## Illustration: 1 - Salt - Docks
Description: Fog over the piers.
Style: Ink wash
Type: Map
";

    #[derive(Default)]
    struct RecordingStore {
        saves: Mutex<Vec<Adventure>>,
    }

    impl AdventureStore for RecordingStore {
        fn save(&self, adventure: &Adventure) -> Result<(), RenderError> {
            self.saves.lock().unwrap().push(adventure.clone());
            Ok(())
        }
    }

    struct FailingStore;

    impl AdventureStore for FailingStore {
        fn save(&self, _adventure: &Adventure) -> Result<(), RenderError> {
            Err(RenderError::io(
                "/readonly/adventure.json",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ))
        }
    }

    fn full_script() -> Vec<&'static str> {
        vec![
            OUTLINE,                      // outline
            ILLUSTRATIONS,                // covers
            "one page 1",                 // layout ep 1
            "one page 2",                 // layout ep 2
            "full 1a, continue",          // expansion ep 1
            "full 1b",                    //
            "full 2",                     // expansion ep 2
            ILLUSTRATIONS,                // illustrations ep 1
            ILLUSTRATIONS,                // illustrations ep 2
            "clean 1",                    // review ep 1
            "clean 2 part, continue",     // review ep 2
            "clean 2 end",                //
        ]
    }

    #[test]
    fn stage_names_and_order() {
        let names: Vec<_> = Stage::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(names[0], "Generating table of contents");
        assert_eq!(names[2], "Designing dungeons");
        assert_eq!(names[5], "Reviewing content");
    }

    #[tokio::test]
    async fn full_run_fills_every_field() {
        let scripted = Arc::new(ScriptedGenerator::replies(full_script()));
        let store = Arc::new(RecordingStore::default());
        let reporter = Arc::new(RecordingReporter::default());
        let pipeline = Pipeline::new(scripted.clone())
            .with_store(store.clone())
            .with_reporter(reporter.clone());

        let adventure = pipeline.run(Adventure::new("smugglers")).await.unwrap();

        assert_eq!(scripted.call_count(), 12);
        assert_eq!(adventure.table_of_contents, OUTLINE);
        assert_eq!(adventure.covers.len(), 1);
        assert_eq!(adventure.episodes.len(), 2);
        assert_eq!(adventure.episodes[0].one_page, "one page 1");
        assert_eq!(adventure.episodes[1].illustrations.len(), 1);
        // review replaces the expanded text
        assert_eq!(adventure.episodes[0].full_text, "clean 1");
        assert_eq!(adventure.episodes[1].full_text, "clean 2 part, continue\n\nclean 2 end");

        let events = reporter.events();
        assert_eq!(events[0], "started");
        assert!(events.contains(&"report: 📚 Expanding adventure content...".to_string()));
        assert!(!events.iter().any(|e| e.starts_with("failed")));
        assert!(store.saves.lock().unwrap().len() >= Stage::ALL.len());
    }

    #[tokio::test]
    async fn only_later_episodes_get_previous_context() {
        let scripted = Arc::new(ScriptedGenerator::replies(full_script()));
        Pipeline::new(scripted.clone())
            .run(Adventure::new("smugglers"))
            .await
            .unwrap();
        let calls = scripted.calls();
        assert!(!calls[2].1.contains("previous adventure"));
        assert!(calls[3].1.contains("previous adventure"));
        assert!(calls[3].1.contains("## Episode: 1 - Salt"));
    }

    #[tokio::test]
    async fn layout_failure_stops_before_expansion() {
        let scripted = Arc::new(ScriptedGenerator::new([
            Ok(OUTLINE.to_string()),
            Ok(ILLUSTRATIONS.to_string()),
            Ok("one page 1".to_string()),
            Err(GenerationError::Remote {
                status: 400,
                message: "prompt too long".into(),
            }),
            Ok("should never be requested".to_string()),
        ]));
        let reporter = Arc::new(RecordingReporter::default());
        let pipeline = Pipeline::new(scripted.clone()).with_reporter(reporter.clone());

        let err = pipeline.run(Adventure::new("smugglers")).await.unwrap_err();

        assert_eq!(err.stage, Stage::DungeonLayout);
        assert_eq!(scripted.call_count(), 4);
        let last = reporter.events().last().cloned().unwrap();
        assert!(last.starts_with("failed: "), "{last}");
        assert!(last.contains("Designing dungeons"), "{last}");
    }

    #[tokio::test]
    async fn expansion_checkpoints_partial_text() {
        let scripted = Arc::new(ScriptedGenerator::new([
            Ok(OUTLINE.to_string()),
            Ok(ILLUSTRATIONS.to_string()),
            Ok("one page 1".to_string()),
            Ok("one page 2".to_string()),
            Ok("page one of episode one, continue".to_string()),
            Err(GenerationError::Transport("reset".into())),
        ]));
        let store = Arc::new(RecordingStore::default());
        let err = Pipeline::new(scripted)
            .with_store(store.clone())
            .run(Adventure::new("smugglers"))
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::FullExpansion);
        let saves = store.saves.lock().unwrap();
        let last = saves.last().unwrap();
        assert_eq!(last.episodes[0].full_text, "page one of episode one, continue");
    }

    #[tokio::test]
    async fn unparseable_outline_warns_and_continues() {
        let scripted = Arc::new(ScriptedGenerator::replies([
            "I'd love to help! What genre?",
            ILLUSTRATIONS,
        ]));
        let reporter = Arc::new(RecordingReporter::default());
        let adventure = Pipeline::new(scripted.clone())
            .with_reporter(reporter.clone())
            .run(Adventure::new("???"))
            .await
            .unwrap();

        assert!(adventure.episodes.is_empty());
        assert_eq!(scripted.call_count(), 2);
        assert!(reporter.events().iter().any(|e| e.contains("No episodes")));
    }

    #[tokio::test]
    async fn checkpoint_failure_is_a_stage_failure() {
        let scripted = Arc::new(ScriptedGenerator::replies([OUTLINE]));
        let err = Pipeline::new(scripted)
            .with_store(Arc::new(FailingStore))
            .run(Adventure::new("smugglers"))
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Outline);
        assert!(matches!(err.source, StageFailure::Checkpoint(_)));
    }

    #[tokio::test]
    async fn elapsed_deadline_stops_before_next_stage() {
        let scripted = Arc::new(ScriptedGenerator::replies(full_script()));
        let err = Pipeline::new(scripted.clone())
            .with_deadline(Duration::ZERO)
            .run(Adventure::new("smugglers"))
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Outline);
        assert!(matches!(err.source, StageFailure::DeadlineExceeded));
        assert_eq!(scripted.call_count(), 0);
    }
}
