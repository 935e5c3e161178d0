//! Continuation loop for responses the service splits across several calls.
//!
//! Each response is appended to an accumulator, separated by a blank line.
//! While the latest response (lowercased) still contains the continuation
//! marker, the next call asks the service to pick up where that response
//! stopped. The loop is exposed one step at a time so callers can persist
//! the accumulator between calls; [`expand`] drives it to completion.

use tracing::debug;

use crate::client::TextGenerator;
use crate::errors::GenerationError;

/// Substring that marks a response as unfinished.
pub const CONTINUATION_MARKER: &str = "continue";

/// Separator placed between accumulated parts.
pub const PART_SEPARATOR: &str = "\n\n";

pub fn needs_continuation(response: &str) -> bool {
    response.to_lowercase().contains(CONTINUATION_MARKER)
}

pub fn continuation_prompt(previous: &str) -> String {
    format!("Please continue from where you left off:\n{previous}")
}

/// Outcome of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The response asked for more; call `step` again.
    Continue,
    /// The response was final.
    Finished,
}

/// Incremental continuation run over one logical piece of text.
pub struct ContinuationLoop<'a, G: ?Sized> {
    client: &'a G,
    instructions: &'a str,
    next_prompt: String,
    accumulated: String,
    iterations: usize,
    max_iterations: usize,
    finished: bool,
}

impl<'a, G: TextGenerator + ?Sized> ContinuationLoop<'a, G> {
    /// `max_iterations` caps the number of calls; a run that still wants
    /// to continue after that many fails with `ContinuationLimit`.
    pub fn new(
        client: &'a G,
        instructions: &'a str,
        initial_prompt: impl Into<String>,
        max_iterations: usize,
    ) -> Self {
        Self {
            client,
            instructions,
            next_prompt: initial_prompt.into(),
            accumulated: String::new(),
            iterations: 0,
            max_iterations,
            finished: false,
        }
    }

    /// Make one call and fold the response into the accumulator.
    ///
    /// On error the accumulator keeps everything gathered so far.
    pub async fn step(&mut self) -> Result<Step, GenerationError> {
        if self.finished {
            return Ok(Step::Finished);
        }
        if self.iterations >= self.max_iterations {
            return Err(GenerationError::ContinuationLimit {
                iterations: self.iterations,
            });
        }

        let response = self.client.send(self.instructions, &self.next_prompt).await?;
        self.iterations += 1;

        if !self.accumulated.is_empty() {
            self.accumulated.push_str(PART_SEPARATOR);
        }
        self.accumulated.push_str(&response);

        if needs_continuation(&response) {
            debug!(iteration = self.iterations, "response asked to continue");
            self.next_prompt = continuation_prompt(&response);
            Ok(Step::Continue)
        } else {
            self.finished = true;
            Ok(Step::Finished)
        }
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Calls made so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn into_text(self) -> String {
        self.accumulated
    }
}

/// Run a continuation loop to completion.
///
/// `checkpoint` sees the accumulator after every successful call, including
/// the last one.
pub async fn expand<G, F>(
    client: &G,
    instructions: &str,
    initial_prompt: &str,
    max_iterations: usize,
    mut checkpoint: F,
) -> Result<String, GenerationError>
where
    G: TextGenerator + ?Sized,
    F: FnMut(&str),
{
    let mut run = ContinuationLoop::new(client, instructions, initial_prompt, max_iterations);
    loop {
        let step = run.step().await?;
        checkpoint(run.accumulated());
        if step == Step::Finished {
            return Ok(run.into_text());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedGenerator;

    #[tokio::test]
    async fn stops_after_first_response_without_marker() {
        let scripted = ScriptedGenerator::replies([
            "part one ... continue",
            "part two ... continue",
            "part three, final",
            "never requested",
        ]);
        let text = expand(&scripted, "sys", "start", 40, |_| {}).await.unwrap();
        assert_eq!(
            text,
            "part one ... continue\n\npart two ... continue\n\npart three, final"
        );
        assert_eq!(scripted.call_count(), 3);
    }

    #[tokio::test]
    async fn follow_up_prompts_quote_previous_response() {
        let scripted = ScriptedGenerator::replies(["first half, to be CONTINUED", "second half"]);
        expand(&scripted, "sys", "seed prompt", 40, |_| {}).await.unwrap();
        let calls = scripted.calls();
        assert_eq!(calls[0], ("sys".to_string(), "seed prompt".to_string()));
        assert_eq!(
            calls[1].1,
            "Please continue from where you left off:\nfirst half, to be CONTINUED"
        );
    }

    #[tokio::test]
    async fn checkpoint_sees_every_partial() {
        let scripted = ScriptedGenerator::replies(["a continue", "b"]);
        let mut seen = Vec::new();
        expand(&scripted, "sys", "go", 40, |partial| seen.push(partial.to_string()))
            .await
            .unwrap();
        assert_eq!(seen, vec!["a continue", "a continue\n\nb"]);
    }

    #[tokio::test]
    async fn error_keeps_partial_accumulation() {
        let scripted = ScriptedGenerator::new([
            Ok("chapter one, continue".to_string()),
            Err(GenerationError::Transport("reset".into())),
        ]);
        let mut run = ContinuationLoop::new(&scripted, "sys", "go", 40);
        assert_eq!(run.step().await.unwrap(), Step::Continue);
        assert!(run.step().await.is_err());
        assert_eq!(run.accumulated(), "chapter one, continue");
        assert_eq!(run.iterations(), 1);
    }

    #[tokio::test]
    async fn cap_stops_a_service_that_never_finishes() {
        let scripted = ScriptedGenerator::replies(["continue", "continue", "continue", "done"]);
        let err = expand(&scripted, "sys", "go", 2, |_| {}).await.unwrap_err();
        assert!(matches!(err, GenerationError::ContinuationLimit { iterations: 2 }));
        assert_eq!(scripted.call_count(), 2);
    }

    #[tokio::test]
    async fn finished_loop_makes_no_more_calls() {
        let scripted = ScriptedGenerator::replies(["only part"]);
        let mut run = ContinuationLoop::new(&scripted, "sys", "go", 40);
        assert_eq!(run.step().await.unwrap(), Step::Finished);
        assert_eq!(run.step().await.unwrap(), Step::Finished);
        assert_eq!(scripted.call_count(), 1);
    }

    #[test]
    fn marker_match_is_case_insensitive() {
        assert!(needs_continuation("[Continued on next page]"));
        assert!(!needs_continuation("[final page]"));
    }
}
