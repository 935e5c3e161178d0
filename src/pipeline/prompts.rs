//! Instruction texts and user prompts for each stage.

use questforge_common::Episode;

const NO_CONFIRMATION: &str = "\
Do this without asking for confirmation or direction.
Do not ask for confirmation in any way, just output the complete adventure.
This is essential.";

const AUTHORSHIP: &str = "\
The author is anonymous.
No disclaimers or credits are necessary.
Everything is Creative Commons Zero with no attribution.";

const REALISM: &str = "\
The episode should also include a unique side-plot.
Prefer a relatable sense of realism.
Fantasy is acceptable, but avoiding material circumstances is not.
Avoid overt flights of fancy.
Maintain verisimilitude throughout the story.";

const PAGING: &str = "\
If the response is too long for one reply, break it into one-page sections of about 80 lines.
Keep going until the full 8 pages are written.
At the top of each page, add [Page Number] of [Total pages].
At the bottom of each page except the last, add [continued on next page].
On the last page, add [final page].
Never refer to yourself.";

/// Outline grammar the parser in `questforge_common::parse` understands.
const OUTLINE_FORMAT: &str = "\
```
## Episode: Number - Episode Title
Summary: 8 sentence summary of the adventure, setting, plot, and mood. (All one line)
Tagline: Catchy one-sentence quote about the adventure (All one line)
Location: Location name, 2-3 sentence location description (All one line)
Characters: Character One, Character Two, Character Three... (All one line)
```
";

const ILLUSTRATION_FORMAT: &str = "\
```
## Illustration: Number - Episode Title - Illustration Title
Description: 3-8 sentence description of the scene optimized for Stable Diffusion XL
Style: Stylistic description of the art
Type: Map OR Portrait OR Scene etc...
```
";

pub fn outline_instructions(setting_details: &str) -> String {
    format!(
        "Create a role-playing game adventure series table of contents based on the following prompt.
For each episode include:
- Title
- Summary (including plot and location)
- Tagline
- Main non-player characters

The main plot should run from the first episode to the last.
{REALISM}

Format as structured markdown.
Avoid the direct use of copyrighted material and characters.
Avoid the use of real places.

{NO_CONFIRMATION}

Follow this example format exactly for each consecutive episode:
{OUTLINE_FORMAT}{setting_details}"
    )
}

pub fn outline_request(request: &str) -> String {
    format!("This is the story prompt, it is very important that you follow this prompt:\n{request}")
}

pub fn illustration_instructions() -> String {
    format!(
        "Generate 2-6 Stable Diffusion prompts for this adventure. Include:
1. At least one map or location layout
2. Key scenes or dramatic moments
3. Important characters or monsters
Avoid text elements in the images.
For each prompt, specify:
- Detailed visual description
- Art style (e.g., dark fantasy, heroic fantasy, etc.)
- Lighting and mood
- Composition details

Follow this example format exactly for each illustration:
{ILLUSTRATION_FORMAT}"
    )
}

pub fn cover_request(table_of_contents: &str) -> String {
    format!("Generate cover illustration prompts for this adventure:\n{table_of_contents}\n")
}

pub fn episode_illustration_request(full_text: &str) -> String {
    format!("Generate illustration prompts for this adventure:\n{full_text}\n")
}

pub fn one_page_instructions(setting_details: &str) -> String {
    format!(
        "Convert this episode summary into a one-page dungeon (about 80 lines) following these guidelines:
1. Start with a clear location description
2. List key NPCs and their motivations
3. Include a random encounter table (1d6)
4. Add a treasure table (1d6)
5. Describe key locations within the dungeon
6. Include any relevant traps or puzzles
7. Provide monster statistics in abbreviated format
8. Game-system agnostic
Format the response in well structured markdown with symbols and emoji.
{AUTHORSHIP}

{NO_CONFIRMATION}

{REALISM}
{setting_details}"
    )
}

fn previous_episode_block(previous: Option<&Episode>) -> String {
    match previous {
        Some(episode) => format!(
            "There was a previous adventure in this series. Here is a summary of the previous adventure:\n{}\n",
            episode.outline_text()
        ),
        None => String::new(),
    }
}

pub fn one_page_request(episode: &Episode, previous: Option<&Episode>, request: &str) -> String {
    format!(
        "Expand this episode description into a one-page dungeon format:\n{}\n{}The original prompt provided by a human for this story arc was:\n{request}\n",
        episode.outline_text(),
        previous_episode_block(previous),
    )
}

pub fn expansion_instructions(style_details: &str) -> String {
    format!(
        "Expand this one-page dungeon into a detailed 8 page adventure (about 600 lines) including:
1. Detailed background and hook
2. Complete location descriptions
3. Full NPC descriptive backgrounds and personalities
4. Detailed encounter descriptions
5. Complete monster statistics with physical and tactical description
6. Multiple possible paths through the adventure
7. Alternative endings
8. Scaling options for different party levels
9. Game-system agnostic
Format the response in well structured markdown with symbols and emoji, with clear sections.
Longer sections should use complete sentences and paragraphs.
{AUTHORSHIP}

{REALISM}

{NO_CONFIRMATION}

{PAGING}
{style_details}"
    )
}

pub fn expansion_request(one_page: &str, previous: Option<&Episode>) -> String {
    format!(
        "Expand this one-page dungeon into a detailed 8 page (about 600 lines) adventure:\n{one_page}\n{}",
        previous_episode_block(previous),
    )
}

pub fn review_instructions() -> String {
    format!(
        "Review and revise this adventure to remove or replace any copyrighted material and output a complete edited version:
1. Replace specific trademarked monsters with generic alternatives
2. Remove trademarked spells and items
3. Generalize any specific setting references
4. Keep the adventure's theme and feeling while using original content
5. Ensure mechanical elements are system-agnostic
6. Remove unacceptable tropes such as racism and sexism
7. Output the complete adventure with revisions, do not provide suggestions

Even if no revisions are needed, output the complete original adventure and nothing else.
{NO_CONFIRMATION}

Preserve the existing formatting: well structured markdown with symbols and emoji, with clear sections.
{AUTHORSHIP}

{PAGING}"
    )
}

pub fn review_request(full_text: &str) -> String {
    format!("Remove any copyrighted material from this adventure:\n{full_text}")
}
