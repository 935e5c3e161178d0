//! Background task that owns one generation session from start to cleanup.

use std::path::PathBuf;
use std::sync::Arc;

use questforge_common::{Adventure, GenerationState};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::api::SharedState;
use super::session::Progress;
use crate::pipeline::Pipeline;
use crate::progress::ProgressReporter;
use crate::render::{self, DirectoryStore};

/// Start the session's pipeline on its own task.
pub fn spawn_session(state: SharedState, progress: Arc<Progress>, adventure: Adventure) -> JoinHandle<()> {
    tokio::spawn(run_session(state, progress, adventure))
}

/// Run the pipeline, package the result, linger, then clean the session up
/// and write the history file.
///
/// The pipeline itself runs on an inner task so a panic inside a stage ends
/// as an `error` state on this session instead of taking anything else down.
pub async fn run_session(state: SharedState, progress: Arc<Progress>, adventure: Adventure) {
    let session_id = progress.session_id().to_string();
    let out_dir = state.outputs_dir.join(&session_id);

    let reporter: Arc<dyn ProgressReporter> = progress.clone();
    let pipeline = Pipeline::new(state.generator.clone())
        .with_reporter(reporter)
        .with_store(Arc::new(DirectoryStore::new(&out_dir)))
        .with_max_continuations(state.generation.max_continuations)
        .with_deadline(state.generation.deadline());

    info!(session_id = %session_id, "generation started");
    let handle = tokio::spawn(async move { pipeline.run(adventure).await });

    match handle.await {
        Ok(Ok(adventure)) => package(&progress, adventure, out_dir).await,
        Ok(Err(e)) => warn!(session_id = %session_id, error = %e, "generation failed"),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "generation task aborted");
            progress.fail(&format!("❌ Generation stopped unexpectedly: {e}"));
        }
    }

    tokio::time::sleep(state.linger).await;
    if state.registry.cleanup(&session_id)
        && let Err(e) = state.registry.persist().await
    {
        warn!(session_id = %session_id, error = %e, "failed to persist history after cleanup");
    }
}

async fn package(progress: &Progress, adventure: Adventure, dir: PathBuf) {
    let packaged = tokio::task::spawn_blocking(move || {
        render::write_layout(&adventure, &dir)?;
        render::archive_directory(&dir)
    })
    .await;

    let archive = match packaged {
        Ok(Ok(archive)) => archive,
        Ok(Err(e)) => {
            error!(session_id = %progress.session_id(), error = %e, "packaging failed");
            progress.fail(&format!("❌ Failed to package adventure: {e}"));
            return;
        }
        Err(e) => {
            error!(session_id = %progress.session_id(), error = %e, "packaging task aborted");
            progress.fail(&format!("❌ Failed to package adventure: {e}"));
            return;
        }
    };

    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    info!(session_id = %progress.session_id(), archive = %archive.display(), "adventure packaged");
    progress.report(&format!("📦 Download your adventure: /outputs/{name}"));
    progress.completed(GenerationState::Completed.announcement());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::tempdir;

    use super::*;
    use crate::client::TextGenerator;
    use crate::client::testing::ScriptedGenerator;
    use crate::errors::GenerationError;
    use crate::web::api::tests::test_state;

    const ID: &str = "9d2b7c44-1f0e-4e6a-b8a3-5c2d1e0f7a96";

    struct PanickingGenerator;

    #[async_trait]
    impl TextGenerator for PanickingGenerator {
        async fn send(&self, _system: &str, _user: &str) -> Result<String, GenerationError> {
            panic!("generator blew up");
        }
    }

    #[tokio::test]
    async fn successful_run_is_packaged_then_demoted() {
        let dir = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::replies(["no outline here", "no covers"]));
        let state = test_state(dir.path(), generator);
        let progress = state.registry.create(ID).unwrap();

        run_session(state.clone(), progress.clone(), Adventure::new("a heist")).await;

        assert_eq!(progress.state(), GenerationState::Completed);
        assert!(dir.path().join("outputs").join(format!("{ID}.tar.gz")).exists());
        let messages = state.registry.messages(ID).unwrap();
        assert!(messages.iter().any(|m| m.message.starts_with("⚠️")));
        assert!(
            messages
                .iter()
                .any(|m| m.message == format!("📦 Download your adventure: /outputs/{ID}.tar.gz"))
        );
        assert_eq!(state.registry.active_count(), 0);
        assert!(!state.registry.get(ID).unwrap().is_active());
    }

    #[tokio::test]
    async fn finished_session_history_is_written_to_disk() {
        let dir = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::replies(["no outline here", "no covers"]));
        let state = test_state(dir.path(), generator);
        let progress = state.registry.create(ID).unwrap();

        run_session(state.clone(), progress, Adventure::new("a heist")).await;

        let saved = std::fs::read_to_string(dir.path().join("history.json")).unwrap();
        assert!(saved.contains(ID), "{saved}");
        assert!(saved.contains("Download your adventure"));
    }

    #[tokio::test]
    async fn stage_failure_ends_in_error_without_archive() {
        let dir = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::new([Err(GenerationError::Remote {
            status: 401,
            message: "invalid x-api-key".into(),
        })]));
        let state = test_state(dir.path(), generator);
        let progress = state.registry.create(ID).unwrap();

        run_session(state.clone(), progress.clone(), Adventure::new("a heist")).await;

        assert_eq!(progress.state(), GenerationState::Error);
        let error = progress.error().unwrap();
        assert!(error.contains("Generating table of contents"), "{error}");
        assert!(!dir.path().join("outputs").join(format!("{ID}.tar.gz")).exists());
    }

    #[tokio::test]
    async fn panic_inside_pipeline_becomes_error_state() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), Arc::new(PanickingGenerator));
        let progress = state.registry.create(ID).unwrap();
        let done = progress.subscribe_done();

        tokio::time::timeout(
            Duration::from_secs(5),
            run_session(state.clone(), progress.clone(), Adventure::new("a heist")),
        )
        .await
        .unwrap();

        assert_eq!(progress.state(), GenerationState::Error);
        assert!(progress.error().unwrap().contains("stopped unexpectedly"));
        assert!(*done.borrow());
    }
}
