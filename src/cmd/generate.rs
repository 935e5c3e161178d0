//! Local adventure generation: `questforge generate`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use questforge::client::{AnthropicClient, Retrying, TextGenerator};
use questforge::config::{GenerationConfig, QuestConfig};
use questforge::pipeline::Pipeline;
use questforge::progress::ProgressReporter;
use questforge::render::{self, DirectoryStore};
use questforge::ui::SpinnerReporter;
use questforge_common::Adventure;
use tracing::info;

/// Prompt file read when no prompt is given on the command line.
pub const PROMPT_FILE: &str = "PROMPT.md";

pub struct GenerateArgs {
    pub prompt: Option<String>,
    pub setting: Option<PathBuf>,
    pub style: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// Build the retrying Anthropic client, failing early without an API key.
pub fn build_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>> {
    let api_key = config
        .api_key
        .clone()
        .context("No API key configured. Set ANTHROPIC_API_KEY (or CLAUDE_API_KEY).")?;
    let client = AnthropicClient::new(api_key, config).context("Failed to build HTTP client")?;
    Ok(Arc::new(Retrying::new(client, config.max_attempts)))
}

fn read_optional(path: Option<&Path>, what: &str) -> Result<Option<String>> {
    path.map(|p| {
        std::fs::read_to_string(p).with_context(|| format!("Failed to read {} file {}", what, p.display()))
    })
    .transpose()
}

fn resolve_prompt(prompt: Option<String>) -> Result<String> {
    let prompt = match prompt {
        Some(prompt) => prompt,
        None => std::fs::read_to_string(PROMPT_FILE)
            .with_context(|| format!("No prompt given and {} could not be read", PROMPT_FILE))?,
    };
    let prompt = prompt.trim().to_string();
    if prompt.is_empty() {
        bail!("The adventure prompt is empty");
    }
    Ok(prompt)
}

pub async fn cmd_generate(config: &QuestConfig, args: GenerateArgs, verbose: bool) -> Result<()> {
    let prompt = resolve_prompt(args.prompt)?;
    let setting = read_optional(args.setting.as_deref(), "setting")?;
    let style = read_optional(args.style.as_deref(), "style")?;
    let generator = build_generator(&config.generation)?;

    let out_dir = args.output.unwrap_or_else(|| {
        PathBuf::from(format!("adventure-{}", chrono::Local::now().format("%Y%m%d-%H%M%S")))
    });
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let reporter = Arc::new(SpinnerReporter::new(verbose));
    let pipeline = Pipeline::new(generator)
        .with_reporter(reporter.clone())
        .with_store(Arc::new(DirectoryStore::new(&out_dir)))
        .with_max_continuations(config.generation.max_continuations)
        .with_deadline(config.generation.deadline());

    info!(output = %out_dir.display(), "generating adventure");
    let adventure = Adventure::new(prompt).with_setting(setting).with_style(style);
    let adventure = pipeline
        .run(adventure)
        .await
        .context("Adventure generation failed")?;

    render::write_layout(&adventure, &out_dir).context("Failed to write adventure")?;
    let archive = render::archive_directory(&out_dir).context("Failed to archive adventure")?;
    reporter.completed(&format!(
        "✨ Adventure written to {} ({})",
        out_dir.display(),
        archive.display()
    ));
    Ok(())
}
