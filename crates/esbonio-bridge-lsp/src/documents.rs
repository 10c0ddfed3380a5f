//! Open document tracking.
//!
//! The bridge keeps the text of every open reStructuredText document so it
//! can compute code actions locally and re-open documents on a new server
//! after a restart. Positions are LSP positions: zero-based lines and
//! UTF-16 code unit offsets.

use lsp_types::{Position, Range, TextDocumentContentChangeEvent};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Language ids the bridge attaches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSelector {
    languages: Vec<&'static str>,
}

impl DocumentSelector {
    pub fn new(enabled_in_py_files: bool) -> Self {
        let mut languages = vec!["rst", "restructuredtext"];
        if enabled_in_py_files {
            languages.push("python");
        }
        Self { languages }
    }

    pub fn matches(&self, language_id: &str) -> bool {
        self.languages.contains(&language_id)
    }
}

impl Default for DocumentSelector {
    fn default() -> Self {
        Self::new(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocument {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

impl TextDocument {
    /// Text of `line`, without its line terminator.
    pub fn line(&self, line: u32) -> &str {
        let text = self.text.split('\n').nth(line as usize).unwrap_or("");
        text.strip_suffix('\r').unwrap_or(text)
    }

    /// Number of lines; a trailing newline starts an empty last line.
    pub fn line_count(&self) -> u32 {
        self.text.split('\n').count() as u32
    }

    /// Text covered by `range`.
    pub fn text_in(&self, range: Range) -> &str {
        let start = offset_at(&self.text, range.start);
        let end = offset_at(&self.text, range.end).max(start);
        &self.text[start..end]
    }

    /// Apply one `didChange` content change.
    pub fn apply(&mut self, change: &TextDocumentContentChangeEvent) {
        match change.range {
            Some(range) => {
                let start = offset_at(&self.text, range.start);
                let end = offset_at(&self.text, range.end).max(start);
                self.text.replace_range(start..end, &change.text);
            }
            None => self.text = change.text.clone(),
        }
    }

    /// `textDocument/didOpen` parameters reopening this document.
    pub fn did_open_params(&self) -> Value {
        json!({
            "textDocument": {
                "uri": self.uri,
                "languageId": self.language_id,
                "version": self.version,
                "text": self.text,
            }
        })
    }
}

/// Byte offset of an LSP position, clamped to the line and the text.
pub fn offset_at(text: &str, position: Position) -> usize {
    let mut line_start = 0;
    for _ in 0..position.line {
        match text[line_start..].find('\n') {
            Some(i) => line_start += i + 1,
            None => return text.len(),
        }
    }

    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |i| line_start + i);
    let line = &text[line_start..line_end];
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut units = 0u32;
    for (index, ch) in line.char_indices() {
        if units >= position.character {
            return line_start + index;
        }
        units += ch.len_utf16() as u32;
    }
    line_start + line.len()
}

/// Length of `text` in UTF-16 code units.
pub fn utf16_len(text: &str) -> u32 {
    text.encode_utf16().count() as u32
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidOpenParams {
    text_document: TextDocument,
}

#[derive(Debug, Deserialize)]
struct VersionedIdentifier {
    uri: String,
    version: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidChangeParams {
    text_document: VersionedIdentifier,
    content_changes: Vec<TextDocumentContentChangeEvent>,
}

#[derive(Debug, Deserialize)]
struct Identifier {
    uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifierParams {
    text_document: Identifier,
}

/// Documents the editor opened that match the selector.
#[derive(Debug, Default)]
pub struct DocumentStore {
    selector: DocumentSelector,
    documents: HashMap<String, TextDocument>,
}

impl DocumentStore {
    pub fn new(selector: DocumentSelector) -> Self {
        Self {
            selector,
            documents: HashMap::new(),
        }
    }

    pub fn set_selector(&mut self, selector: DocumentSelector) {
        self.selector = selector;
    }

    pub fn get(&self, uri: &str) -> Option<&TextDocument> {
        self.documents.get(uri)
    }

    pub fn is_tracked(&self, uri: &str) -> bool {
        self.documents.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// All tracked documents, sorted by uri.
    pub fn documents(&self) -> Vec<&TextDocument> {
        let mut documents: Vec<_> = self.documents.values().collect();
        documents.sort_by(|a, b| a.uri.cmp(&b.uri));
        documents
    }

    /// Handle `didOpen`. Returns whether the document is tracked.
    pub fn open(&mut self, params: &Value) -> bool {
        let Ok(params) = serde_json::from_value::<DidOpenParams>(params.clone()) else {
            tracing::warn!("Malformed didOpen parameters");
            return false;
        };
        let document = params.text_document;
        if !self.selector.matches(&document.language_id) {
            tracing::debug!(uri = %document.uri, language = %document.language_id, "Ignoring document");
            return false;
        }
        self.documents.insert(document.uri.clone(), document);
        true
    }

    /// Handle `didChange`. Returns whether the document is tracked.
    pub fn change(&mut self, params: &Value) -> bool {
        let Ok(params) = serde_json::from_value::<DidChangeParams>(params.clone()) else {
            tracing::warn!("Malformed didChange parameters");
            return false;
        };
        let Some(document) = self.documents.get_mut(&params.text_document.uri) else {
            return false;
        };
        for change in &params.content_changes {
            document.apply(change);
        }
        document.version = params.text_document.version;
        true
    }

    /// Handle `didClose`. Returns whether the document was tracked.
    pub fn close(&mut self, params: &Value) -> bool {
        match Self::uri_of(params) {
            Some(uri) => self.documents.remove(&uri).is_some(),
            None => false,
        }
    }

    /// `textDocument.uri` of any text document notification.
    pub fn uri_of(params: &Value) -> Option<String> {
        serde_json::from_value::<IdentifierParams>(params.clone())
            .ok()
            .map(|params| params.text_document.uri)
    }
}
