//! Code actions and editing commands provided by the bridge itself.

use crate::documents::{offset_at, utf16_len, TextDocument};
use lsp_types::{Command, Position, Range, TextEdit};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;

/// Command inserting a reference link with a link target at the end.
pub const INSERT_LINK: &str = "esbonio.insert.link";

/// Command inserting an anonymous inline link.
pub const INSERT_INLINE_LINK: &str = "esbonio.insert.inlineLink";

/// An explicit link target line such as `.. _name: https://example.com`.
static LINK_TARGET: OnceLock<regex::Regex> = OnceLock::new();

fn link_target() -> &'static regex::Regex {
    LINK_TARGET.get_or_init(|| {
        regex::Regex::new(r"\.\. _\S+: \S+$")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Display width used for section underlines.
///
/// Each UTF-16 code unit above U+00FF counts as two columns, everything
/// else as one. A character outside the BMP therefore counts four.
pub fn multibyte_width(text: &str) -> usize {
    text.encode_utf16()
        .map(|unit| if unit > 0xFF { 2 } else { 1 })
        .sum()
}

/// Whether `range` selects a whole line.
fn is_line_range(range: &Range) -> bool {
    let (start, end) = (range.start, range.end);
    (start.line + 1 == end.line && start.character == 0 && end.character == 0)
        || (start.line == end.line && start.character == 0)
}

fn is_whole_document(document: &TextDocument, range: &Range) -> bool {
    range.start == Position::new(0, 0) && offset_at(&document.text, range.end) >= document.text.len()
}

fn workspace_edit(uri: &str, edits: Vec<TextEdit>) -> Value {
    json!({ "changes": { uri: edits } })
}

/// Section underline actions for levels 1 to 3.
pub fn section_actions(document: &TextDocument, range: &Range, characters: &[String; 3]) -> Vec<Value> {
    if !is_line_range(range) {
        return Vec::new();
    }

    let width = multibyte_width(document.line(range.start.line));
    let at = Position::new(range.start.line + 1, range.start.character);

    characters
        .iter()
        .enumerate()
        .map(|(level, character)| {
            let underline = format!("{}\n", character.repeat(width));
            json!({
                "title": format!("Section builder (level{})", level + 1),
                "edit": workspace_edit(&document.uri, vec![TextEdit::new(Range::new(at, at), underline)]),
            })
        })
        .collect()
}

fn link_action(title: &str, command: &str, arguments: Value) -> Value {
    let command = Command::new(title.to_string(), command.to_string(), Some(vec![arguments]));
    json!({ "title": title, "command": command })
}

/// Link insertion actions for a cursor or a single-line selection.
pub fn link_actions(document: &TextDocument, range: &Range) -> Vec<Value> {
    let (start, end) = (range.start, range.end);
    if start.line != end.line {
        return Vec::new();
    }

    if start.character == end.character {
        let arguments = json!({ "uri": document.uri, "position": start });
        return vec![
            link_action("Insert Link (cursor)", INSERT_LINK, arguments.clone()),
            link_action("Insert Inline Link (cursor)", INSERT_INLINE_LINK, arguments),
        ];
    }

    if is_whole_document(document, range) {
        return Vec::new();
    }

    let arguments = json!({ "uri": document.uri, "range": range });
    vec![
        link_action("Insert Link (selected)", INSERT_LINK, arguments.clone()),
        link_action("Insert Inline Link (selected)", INSERT_INLINE_LINK, arguments),
    ]
}

/// Everything the bridge offers for `range`.
pub fn code_actions(document: &TextDocument, range: &Range, characters: &[String; 3]) -> Vec<Value> {
    let mut actions = section_actions(document, range, characters);
    actions.extend(link_actions(document, range));
    actions
}

/// Arguments of the link commands.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkArguments {
    pub uri: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub range: Option<Range>,
    #[serde(default)]
    pub position: Option<Position>,
}

impl LinkArguments {
    /// The range to replace and the link label.
    ///
    /// A selection provides its own text as label; a cursor needs `label`.
    fn target<'a>(&'a self, document: &'a TextDocument) -> Option<(Range, &'a str, &'a str)> {
        let url = self.url.as_deref().filter(|url| !url.is_empty())?;
        let range = match (self.range, self.position) {
            (Some(range), _) => range,
            (None, Some(position)) => Range::new(position, position),
            (None, None) => return None,
        };

        let label = if range.start == range.end {
            self.label.as_deref()?
        } else {
            document.text_in(range)
        };
        if label.is_empty() {
            return None;
        }
        Some((range, label, url))
    }
}

/// Workspace edit for `esbonio.insert.inlineLink`.
pub fn inline_link_edit(document: &TextDocument, args: &LinkArguments) -> Option<Value> {
    let (range, label, url) = args.target(document)?;
    let link = format!("`{label} <{url}>`__");
    Some(workspace_edit(&document.uri, vec![TextEdit::new(range, link)]))
}

/// Workspace edit for `esbonio.insert.link`.
///
/// Replaces the target with a reference and appends the link target as
/// the last line, separated by a blank line unless the document already
/// ends in link targets.
pub fn link_edit(document: &TextDocument, args: &LinkArguments) -> Option<Value> {
    let (range, label, url) = args.target(document)?;

    let last_line = document.line_count().saturating_sub(1);
    let mut line_text = document.line(last_line);
    let last_character = utf16_len(line_text);

    let mut prefix = String::new();
    if line_text.is_empty() {
        line_text = match last_line.checked_sub(1) {
            Some(previous) => document.line(previous),
            None => "",
        };
    } else {
        prefix.push('\n');
    }
    if !link_target().is_match(line_text) {
        prefix.push('\n');
    }

    let reference = format!("`{label}`_");
    let definition = format!("{prefix}.. _{label}: {url}\n");
    let end = Position::new(last_line, last_character);

    Some(workspace_edit(
        &document.uri,
        vec![
            TextEdit::new(range, reference),
            TextEdit::new(Range::new(end, end), definition),
        ],
    ))
}
