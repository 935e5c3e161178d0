use serde::{Deserialize, Serialize};

/// The complete multi-episode document.
///
/// Built by the outline stage and then handed, by value, from stage to stage.
/// Nothing here enforces a single writer; the pipeline does that by moving
/// the aggregate through each stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Adventure {
    /// The request text the adventure was generated from.
    pub request: String,
    /// Campaign setting notes appended to outline and dungeon instructions.
    #[serde(default)]
    pub setting: Option<String>,
    /// Writing style notes appended to expansion instructions.
    #[serde(default)]
    pub style: Option<String>,
    /// Raw outline response, kept verbatim for the contents page.
    #[serde(default)]
    pub table_of_contents: String,
    /// Front-matter art descriptors.
    #[serde(default)]
    pub covers: Vec<Illustration>,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

impl Adventure {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            ..Self::default()
        }
    }

    pub fn with_setting(mut self, setting: Option<String>) -> Self {
        self.setting = setting.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_style(mut self, style: Option<String>) -> Self {
        self.style = style.filter(|s| !s.trim().is_empty());
        self
    }

    /// Fenced setting block for stage instructions, empty when no setting was given.
    pub fn setting_details(&self) -> String {
        match &self.setting {
            Some(setting) => format!(
                "\nThis adventure takes place in an established campaign setting.\n\
                 For details about the campaign setting, refer to the following details.\n\
                 Focus on writing the story of the adventure (above) in the provided setting (below).\n\
                 ```\nBEGIN SETTING DETAILS\n{}\nEND SETTING DETAILS\n```\n",
                setting.trim()
            ),
            None => String::new(),
        }
    }

    /// Fenced writing style block, empty when no style was given.
    pub fn style_details(&self) -> String {
        match &self.style {
            Some(style) => format!(
                "\n```\nBEGIN WRITING STYLE DETAILS\n{}\nEND WRITING STYLE DETAILS\n```\n",
                style.trim()
            ),
            None => String::new(),
        }
    }
}

/// One episode of the series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub title: String,
    pub summary: String,
    pub tagline: String,
    pub location: String,
    pub characters: Vec<String>,
    /// One-page dungeon outline, filled by the layout stage.
    #[serde(default)]
    pub one_page: String,
    /// Fully expanded text, filled by expansion and replaced by review.
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub illustrations: Vec<Illustration>,
}

impl Episode {
    /// Outline block in the same shape the outline grammar uses.
    pub fn outline_text(&self) -> String {
        format!(
            "## {}\nSummary: {}\nTagline: {}\nLocation: {}\nCharacters: {}\n",
            self.title,
            self.summary,
            self.tagline,
            self.location,
            self.characters.join(", ")
        )
    }
}

/// An image prompt, either a map or a scene.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Illustration {
    pub description: String,
    pub style: String,
    pub is_map: bool,
}

impl Illustration {
    pub fn category(&self) -> &'static str {
        if self.is_map { "Area map" } else { "Illustration" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_setting_and_style_are_dropped() {
        let adventure = Adventure::new("a heist")
            .with_setting(Some("   ".to_string()))
            .with_style(None);
        assert!(adventure.setting.is_none());
        assert!(adventure.setting_details().is_empty());
        assert!(adventure.style_details().is_empty());
    }

    #[test]
    fn setting_details_are_fenced() {
        let adventure = Adventure::new("a heist").with_setting(Some("Port city of Vell".into()));
        let details = adventure.setting_details();
        assert!(details.contains("BEGIN SETTING DETAILS\nPort city of Vell\nEND SETTING DETAILS"));
    }

    #[test]
    fn outline_text_joins_characters() {
        let episode = Episode {
            title: "Episode: 1 - Salt".into(),
            summary: "A smuggling ring.".into(),
            tagline: "Nothing stays buried.".into(),
            location: "The docks".into(),
            characters: vec!["Mara".into(), "Osk".into()],
            ..Episode::default()
        };
        let text = episode.outline_text();
        assert!(text.starts_with("## Episode: 1 - Salt\n"));
        assert!(text.contains("Characters: Mara, Osk\n"));
    }

    #[test]
    fn adventure_json_tolerates_missing_stage_fields() {
        let json = r#"{"request":"r","episodes":[{"title":"t","summary":"s","tagline":"g","location":"l","characters":[]}]}"#;
        let adventure: Adventure = serde_json::from_str(json).unwrap();
        assert_eq!(adventure.episodes.len(), 1);
        assert!(adventure.episodes[0].full_text.is_empty());
    }
}
