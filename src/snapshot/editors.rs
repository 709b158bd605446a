//! Reversible editors built on `SnapshotStack`.
//!
//! Each editor owns its own stack; image-description parsing, dimension edits and
//! prompt regeneration never share undo history.

use super::SnapshotStack;
use serde::{Deserialize, Serialize};

const TAG_DIMENSIONS: &str = "dimensions";
const TAG_REGENERATE: &str = "regenerate";
const TAG_PROMPT_EDIT: &str = "prompt-edit";
const TAG_PARSE: &str = "parse";
const TAG_FIELD_EDIT: &str = "field-edit";

/// Output dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Aspect ratio string reduced by the greatest common divisor (e.g. "16:9").
    pub fn aspect_ratio(&self) -> String {
        let divisor = gcd(self.width, self.height).max(1);
        format!("{}:{}", self.width / divisor, self.height / divisor)
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Edits output dimensions with undo.
#[derive(Debug)]
pub struct DimensionEditor {
    current: Dimensions,
    history: SnapshotStack<Dimensions>,
}

impl DimensionEditor {
    pub fn new(initial: Dimensions) -> Self {
        Self {
            current: initial,
            history: SnapshotStack::new(),
        }
    }

    pub fn current(&self) -> Dimensions {
        self.current
    }

    /// Set new dimensions. Setting the current value is a no-op and records nothing.
    pub fn set_dimensions(&mut self, dimensions: Dimensions) {
        if dimensions == self.current {
            return;
        }
        let description = format!(
            "{}x{} -> {}x{}",
            self.current.width, self.current.height, dimensions.width, dimensions.height
        );
        self.history
            .push_snapshot(self.current, Some(TAG_DIMENSIONS), Some(&description));
        self.current = dimensions;
    }

    /// Swap width and height.
    pub fn swap_orientation(&mut self) {
        let swapped = Dimensions::new(self.current.height, self.current.width);
        self.set_dimensions(swapped);
    }

    /// Restore the previous dimensions. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(snapshot) => {
                self.current = snapshot.state;
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }
}

/// Tracks a prompt through AI regenerations and manual edits.
#[derive(Debug)]
pub struct PromptRegenerator {
    current: String,
    history: SnapshotStack<String>,
}

impl PromptRegenerator {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            current: prompt.into(),
            history: SnapshotStack::new(),
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Replace the prompt with a regenerated version.
    pub fn regenerate(&mut self, regenerated: impl Into<String>) {
        self.replace(regenerated.into(), TAG_REGENERATE, "regenerated prompt");
    }

    /// Replace the prompt with a manual edit.
    pub fn edit(&mut self, text: impl Into<String>) {
        self.replace(text.into(), TAG_PROMPT_EDIT, "manual edit");
    }

    fn replace(&mut self, next: String, tag: &str, description: &str) {
        if next == self.current {
            return;
        }
        let previous = std::mem::replace(&mut self.current, next);
        self.history
            .push_snapshot(previous, Some(tag), Some(description));
    }

    /// Undo the most recent change of any kind.
    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(snapshot) => {
                self.current = snapshot.state;
                true
            }
            None => false,
        }
    }

    /// Restore the prompt as it was before the most recent regeneration, discarding
    /// any edits made since.
    pub fn undo_regeneration(&mut self) -> bool {
        match self.history.undo_by_tag(TAG_REGENERATE) {
            Some(snapshot) => {
                self.current = snapshot.state;
                true
            }
            None => false,
        }
    }
}

/// Form fields that an image description can populate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionFields {
    pub title: String,
    pub genre: String,
    pub mood: String,
    pub notes: String,
}

/// Applies parsed image descriptions over user-entered fields with undo.
#[derive(Debug)]
pub struct DescriptionParser {
    fields: DescriptionFields,
    history: SnapshotStack<DescriptionFields>,
}

impl DescriptionParser {
    pub fn new(fields: DescriptionFields) -> Self {
        Self {
            fields,
            history: SnapshotStack::new(),
        }
    }

    pub fn fields(&self) -> &DescriptionFields {
        &self.fields
    }

    /// Merge a parsed description into the fields. Empty parsed values leave the
    /// existing field untouched.
    pub fn apply_parsed(&mut self, parsed: &DescriptionFields) {
        let mut next = self.fields.clone();
        merge_non_empty(&mut next.title, &parsed.title);
        merge_non_empty(&mut next.genre, &parsed.genre);
        merge_non_empty(&mut next.mood, &parsed.mood);
        merge_non_empty(&mut next.notes, &parsed.notes);
        self.commit(next, TAG_PARSE, "parsed image description");
    }

    /// Edit a single field by name. Unknown names are ignored.
    pub fn edit_field(&mut self, name: &str, value: &str) {
        let mut next = self.fields.clone();
        let slot = match name {
            "title" => &mut next.title,
            "genre" => &mut next.genre,
            "mood" => &mut next.mood,
            "notes" => &mut next.notes,
            _ => return,
        };
        *slot = value.to_string();
        self.commit(next, TAG_FIELD_EDIT, name);
    }

    fn commit(&mut self, next: DescriptionFields, tag: &str, description: &str) {
        if next == self.fields {
            return;
        }
        let previous = std::mem::replace(&mut self.fields, next);
        self.history
            .push_snapshot(previous, Some(tag), Some(description));
    }

    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(snapshot) => {
                self.fields = snapshot.state;
                true
            }
            None => false,
        }
    }

    /// Restore the fields as they were before the most recent parse.
    pub fn revert_parse(&mut self) -> bool {
        match self.history.undo_by_tag(TAG_PARSE) {
            Some(snapshot) => {
                self.fields = snapshot.state;
                true
            }
            None => false,
        }
    }
}

fn merge_non_empty(target: &mut String, value: &str) {
    let trimmed = value.trim();
    if !trimmed.is_empty() {
        *target = trimmed.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_editor_undo_restores_previous() {
        let mut editor = DimensionEditor::new(Dimensions::new(1920, 1080));
        editor.set_dimensions(Dimensions::new(1024, 1024));
        editor.swap_orientation(); // square: no-op
        assert_eq!(editor.current(), Dimensions::new(1024, 1024));

        assert!(editor.undo());
        assert_eq!(editor.current(), Dimensions::new(1920, 1080));
        assert!(!editor.undo());
    }

    #[test]
    fn test_dimension_swap_orientation() {
        let mut editor = DimensionEditor::new(Dimensions::new(1920, 1080));
        editor.swap_orientation();
        assert_eq!(editor.current(), Dimensions::new(1080, 1920));
        assert_eq!(editor.current().aspect_ratio(), "9:16");
    }

    #[test]
    fn test_aspect_ratio_reduces() {
        assert_eq!(Dimensions::new(1920, 1080).aspect_ratio(), "16:9");
        assert_eq!(Dimensions::new(0, 0).aspect_ratio(), "0:0");
    }

    #[test]
    fn test_prompt_undo_regeneration_discards_later_edits() {
        let mut prompt = PromptRegenerator::new("a castle");
        prompt.edit("a castle at dusk");
        prompt.regenerate("a gothic castle at dusk, volumetric fog");
        prompt.edit("a gothic castle at dusk, volumetric fog, ravens");

        assert!(prompt.undo_regeneration());
        assert_eq!(prompt.current(), "a castle at dusk");

        assert!(prompt.undo());
        assert_eq!(prompt.current(), "a castle");
        assert!(!prompt.undo_regeneration());
    }

    #[test]
    fn test_prompt_identical_edit_records_nothing() {
        let mut prompt = PromptRegenerator::new("same");
        prompt.edit("same");
        assert!(!prompt.undo());
    }

    #[test]
    fn test_description_revert_parse_restores_manual_fields() {
        let mut parser = DescriptionParser::new(DescriptionFields {
            title: "Untitled".to_string(),
            ..Default::default()
        });
        parser.edit_field("genre", "roguelike");
        parser.apply_parsed(&DescriptionFields {
            title: "Neon Drift".to_string(),
            genre: String::new(),
            mood: "tense".to_string(),
            notes: "top-down".to_string(),
        });
        assert_eq!(parser.fields().title, "Neon Drift");
        assert_eq!(parser.fields().genre, "roguelike");

        parser.edit_field("notes", "isometric");
        assert!(parser.revert_parse());
        assert_eq!(parser.fields().title, "Untitled");
        assert_eq!(parser.fields().genre, "roguelike");
        assert!(parser.fields().mood.is_empty());
    }

    #[test]
    fn test_description_unknown_field_ignored() {
        let mut parser = DescriptionParser::new(DescriptionFields::default());
        parser.edit_field("color", "red");
        assert!(!parser.undo());
    }
}
