use questforge_common::{Adventure, parse_episodes, parse_illustrations};
use tracing::{info, warn};

use super::{Pipeline, Stage, prompts};
use crate::continuation::{ContinuationLoop, Step};
use crate::errors::StageError;

impl Pipeline {
    pub(super) async fn outline(&self, mut adventure: Adventure) -> Result<Adventure, StageError> {
        let instructions = prompts::outline_instructions(&adventure.setting_details());
        let response = self
            .client
            .send(&instructions, &prompts::outline_request(&adventure.request))
            .await
            .map_err(|e| StageError::new(Stage::Outline, e))?;
        self.reporter.output(&response);

        adventure.episodes = parse_episodes(&response);
        adventure.table_of_contents = response;

        if adventure.episodes.is_empty() {
            warn!("outline response contained no episodes");
            self.reporter
                .report("⚠️ No episodes could be parsed from the table of contents");
        } else {
            info!(episodes = adventure.episodes.len(), "outline parsed");
        }
        Ok(adventure)
    }

    /// One call for the whole series, seeded with the table of contents.
    pub(super) async fn cover_prompts(&self, mut adventure: Adventure) -> Result<Adventure, StageError> {
        let response = self
            .client
            .send(
                &prompts::illustration_instructions(),
                &prompts::cover_request(&adventure.table_of_contents),
            )
            .await
            .map_err(|e| StageError::new(Stage::CoverPrompts, e))?;

        adventure.covers = parse_illustrations(&response);
        if adventure.covers.is_empty() {
            warn!("cover response contained no illustrations");
            self.reporter.report("⚠️ No cover illustrations could be parsed");
        }
        Ok(adventure)
    }

    pub(super) async fn dungeon_layout(&self, mut adventure: Adventure) -> Result<Adventure, StageError> {
        let stage = Stage::DungeonLayout;
        let instructions = prompts::one_page_instructions(&adventure.setting_details());

        for i in 0..adventure.episodes.len() {
            self.reporter
                .report(&format!("Designing: {}", adventure.episodes[i].title));
            let previous = i.checked_sub(1).map(|p| &adventure.episodes[p]);
            let request = prompts::one_page_request(&adventure.episodes[i], previous, &adventure.request);

            let response = self
                .client
                .send(&instructions, &request)
                .await
                .map_err(|e| StageError::new(stage, e))?;
            self.reporter.output(&response);

            adventure.episodes[i].one_page = response;
            self.checkpoint(stage, &adventure)?;
        }
        Ok(adventure)
    }

    pub(super) async fn full_expansion(&self, mut adventure: Adventure) -> Result<Adventure, StageError> {
        let stage = Stage::FullExpansion;
        let instructions = prompts::expansion_instructions(&adventure.style_details());

        for i in 0..adventure.episodes.len() {
            let previous = i.checked_sub(1).map(|p| &adventure.episodes[p]);
            let seed = prompts::expansion_request(&adventure.episodes[i].one_page, previous);
            let title = adventure.episodes[i].title.clone();
            adventure.episodes[i].full_text.clear();

            let text = self
                .continue_episode(stage, &instructions, seed, &title, |partial| {
                    adventure.episodes[i].full_text = partial.to_string();
                    self.checkpoint(stage, &adventure)
                })
                .await?;
            adventure.episodes[i].full_text = text;
        }
        Ok(adventure)
    }

    pub(super) async fn illustration_prompts(
        &self,
        mut adventure: Adventure,
    ) -> Result<Adventure, StageError> {
        let stage = Stage::IllustrationPrompts;
        let instructions = prompts::illustration_instructions();

        for i in 0..adventure.episodes.len() {
            let request = prompts::episode_illustration_request(&adventure.episodes[i].full_text);
            let response = self
                .client
                .send(&instructions, &request)
                .await
                .map_err(|e| StageError::new(stage, e))?;

            let illustrations = parse_illustrations(&response);
            if illustrations.is_empty() {
                warn!(episode = %adventure.episodes[i].title, "no illustrations parsed");
                self.reporter.report(&format!(
                    "⚠️ No illustrations could be parsed for {}",
                    adventure.episodes[i].title
                ));
            }
            adventure.episodes[i].illustrations = illustrations;
            self.checkpoint(stage, &adventure)?;
        }
        Ok(adventure)
    }

    /// Rewrites each episode; the reviewed text replaces the expanded text
    /// only once the episode's review has finished.
    pub(super) async fn content_review(&self, mut adventure: Adventure) -> Result<Adventure, StageError> {
        let stage = Stage::ContentReview;
        let instructions = prompts::review_instructions();

        for i in 0..adventure.episodes.len() {
            let seed = prompts::review_request(&adventure.episodes[i].full_text);
            let title = adventure.episodes[i].title.clone();
            let reviewed = self
                .continue_episode(stage, &instructions, seed, &title, |_| Ok(()))
                .await?;
            adventure.episodes[i].full_text = reviewed;
            self.checkpoint(stage, &adventure)?;
        }
        Ok(adventure)
    }

    /// Drive a continuation loop for one episode, handing each partial
    /// accumulation to `on_partial`.
    async fn continue_episode<F>(
        &self,
        stage: Stage,
        instructions: &str,
        seed: String,
        title: &str,
        mut on_partial: F,
    ) -> Result<String, StageError>
    where
        F: FnMut(&str) -> Result<(), StageError>,
    {
        let mut run = ContinuationLoop::new(self.client.as_ref(), instructions, seed, self.max_continuations);
        loop {
            self.reporter
                .report(&format!("Working on: {} section {}", title, run.iterations() + 1));
            let step = run.step().await.map_err(|e| StageError::new(stage, e))?;
            self.reporter.output(run.accumulated());
            on_partial(run.accumulated())?;
            if step == Step::Finished {
                return Ok(run.into_text());
            }
        }
    }
}
