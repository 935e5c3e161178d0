//! Markdown layout and archive output.
//!
//! ```text
//! <dir>/
//! ├── adventure.json
//! ├── 00_Contents/
//! │   ├── Contents.md
//! │   └── Caption_01.md ...
//! ├── 01_Episode/
//! │   ├── Episode.md
//! │   ├── OnePage.md
//! │   └── Caption_01.md ...
//! └── 02_Episode/ ...
//! ```

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use questforge_common::{Adventure, Illustration};
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::RenderError;
use crate::pipeline::AdventureStore;

pub const SNAPSHOT_FILE: &str = "adventure.json";

const PAGE_BREAK_MARKER: &str = "[continued on next page]";

/// Insert a `\newpage` directive after every page-break marker.
pub fn with_page_breaks(text: &str) -> String {
    text.replace(PAGE_BREAK_MARKER, "[continued on next page]\n\\newpage\n")
}

fn caption(illustration: &Illustration) -> String {
    format!(
        "Description: {}\nStyle: {}\nIs Map: {}\n",
        illustration.description, illustration.style, illustration.is_map
    )
}

fn write_file(path: &Path, contents: &str) -> Result<(), RenderError> {
    fs::write(path, contents).map_err(|e| RenderError::io(path, e))
}

fn create_dir(path: &Path) -> Result<(), RenderError> {
    fs::create_dir_all(path).map_err(|e| RenderError::io(path, e))
}

fn write_captions(dir: &Path, illustrations: &[Illustration]) -> Result<(), RenderError> {
    for (i, illustration) in illustrations.iter().enumerate() {
        write_file(&dir.join(format!("Caption_{:02}.md", i + 1)), &caption(illustration))?;
    }
    Ok(())
}

/// Write the folder-per-episode markdown layout plus a JSON snapshot.
///
/// Safe to call repeatedly on the same directory; files are overwritten.
pub fn write_layout(adventure: &Adventure, dir: &Path) -> Result<(), RenderError> {
    let contents_dir = dir.join("00_Contents");
    create_dir(&contents_dir)?;
    write_file(&contents_dir.join("Contents.md"), &adventure.table_of_contents)?;
    write_captions(&contents_dir, &adventure.covers)?;

    for (i, episode) in adventure.episodes.iter().enumerate() {
        let episode_dir = dir.join(format!("{:02}_Episode", i + 1));
        create_dir(&episode_dir)?;
        if !episode.full_text.is_empty() {
            write_file(&episode_dir.join("Episode.md"), &with_page_breaks(&episode.full_text))?;
        }
        if !episode.one_page.is_empty() {
            write_file(&episode_dir.join("OnePage.md"), &episode.one_page)?;
        }
        write_captions(&episode_dir, &episode.illustrations)?;
    }

    let snapshot = serde_json::to_string_pretty(adventure)?;
    write_file(&dir.join(SNAPSHOT_FILE), &snapshot)?;
    debug!(dir = %dir.display(), episodes = adventure.episodes.len(), "layout written");
    Ok(())
}

/// Bundle `dir` into a sibling `<dir>.tar.gz` and return its path.
///
/// Entries are stored under the directory's own name.
pub fn archive_directory(dir: &Path) -> Result<PathBuf, RenderError> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| RenderError::Archive {
            path: dir.to_path_buf(),
            message: "directory has no name".to_string(),
        })?;
    let archive_path = dir.with_file_name(format!("{name}.tar.gz"));

    let file = File::create(&archive_path).map_err(|e| RenderError::io(&archive_path, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let archive_err = |message: String| RenderError::Archive {
        path: archive_path.clone(),
        message,
    };

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| archive_err(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| archive_err(e.to_string()))?;
        builder
            .append_path_with_name(entry.path(), Path::new(&name).join(relative))
            .map_err(|e| RenderError::io(entry.path(), e))?;
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|e| RenderError::io(&archive_path, e))?;
    debug!(archive = %archive_path.display(), "archive written");
    Ok(archive_path)
}

/// Checkpoints the pipeline by rewriting the layout under one directory.
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AdventureStore for DirectoryStore {
    fn save(&self, adventure: &Adventure) -> Result<(), RenderError> {
        write_layout(adventure, &self.dir)
    }
}
