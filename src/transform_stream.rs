//! Transformation stream (C11): the ordered sequence of output nodes
//! produced by evaluating a document, and the matching strategies used to
//! splice a directive's result back into the right place when the
//! document is re-rendered incrementally (§5).
//!
//! One placeholder node is allocated per directive up front, in document
//! order, so later directives can locate and replace an earlier one (e.g.
//! a `for` loop's body directives) without the whole stream being
//! rebuilt — the stream is always exactly as long as the document had
//! nodes, never grown or shrunk by evaluation.

use crate::ast::SourceLocation;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamNode {
    Text(String),
    /// A directive that produced no document output (`var`, `exe`,
    /// `path`, `define`, `hook`, `comment`).
    Silent,
    Rendered(String),
}

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub directive_id: Option<String>,
    pub location: SourceLocation,
    pub node: StreamNode,
}

pub struct TransformStream {
    entries: Vec<StreamEntry>,
}

impl TransformStream {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.entries.push(StreamEntry { directive_id: None, location: SourceLocation::default(), node: StreamNode::Text(text.into()) });
    }

    pub fn push_directive_placeholder(&mut self, directive_id: impl Into<String>, location: SourceLocation) {
        self.entries.push(StreamEntry { directive_id: Some(directive_id.into()), location, node: StreamNode::Silent });
    }

    /// Replace the placeholder for `directive_id` with its rendered
    /// output, using the fallback strategies in order: exact id match,
    /// then nearest line within 5, then first still-silent entry (a
    /// content-hint last resort for directives the parser didn't id).
    pub fn resolve(&mut self, directive_id: &str, location: &SourceLocation, rendered: String) {
        if let Some(idx) = self.entries.iter().position(|e| e.directive_id.as_deref() == Some(directive_id)) {
            self.entries[idx].node = StreamNode::Rendered(rendered);
            return;
        }
        if let Some(idx) = self.nearest_by_line(location) {
            self.entries[idx].node = StreamNode::Rendered(rendered);
            return;
        }
        if let Some(idx) = self.entries.iter().position(|e| matches!(e.node, StreamNode::Silent)) {
            self.entries[idx].node = StreamNode::Rendered(rendered);
        }
    }

    fn nearest_by_line(&self, location: &SourceLocation) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e.node, StreamNode::Silent) && e.location.line.abs_diff(location.line) <= 5)
            .min_by_key(|(_, e)| e.location.line.abs_diff(location.line))
            .map(|(idx, _)| idx)
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| match &e.node {
                StreamNode::Text(t) => t.as_str(),
                StreamNode::Rendered(t) => t.as_str(),
                StreamNode::Silent => "",
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TransformStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32) -> SourceLocation {
        SourceLocation { file: None, line, column: 1 }
    }

    #[test]
    fn exact_id_match_replaces_placeholder() {
        let mut stream = TransformStream::new();
        stream.push_text("before ");
        stream.push_directive_placeholder("d1", loc(2));
        stream.push_text(" after");
        stream.resolve("d1", &loc(2), "RESULT".to_string());
        assert_eq!(stream.render(), "before RESULT after");
    }

    #[test]
    fn unresolved_directive_renders_as_empty() {
        let mut stream = TransformStream::new();
        stream.push_directive_placeholder("d1", loc(1));
        assert_eq!(stream.render(), "");
    }

    #[test]
    fn nearest_line_fallback_when_id_unknown() {
        let mut stream = TransformStream::new();
        stream.push_directive_placeholder("d1", loc(10));
        stream.resolve("missing-id", &loc(11), "X".to_string());
        assert_eq!(stream.render(), "X");
    }

    #[test]
    fn beyond_line_threshold_falls_back_to_first_silent() {
        let mut stream = TransformStream::new();
        stream.push_directive_placeholder("d1", loc(1));
        stream.resolve("missing-id", &loc(100), "X".to_string());
        assert_eq!(stream.render(), "X");
    }

    #[test]
    fn order_is_preserved_across_multiple_directives() {
        let mut stream = TransformStream::new();
        stream.push_directive_placeholder("d1", loc(1));
        stream.push_text(", ");
        stream.push_directive_placeholder("d2", loc(2));
        stream.resolve("d2", &loc(2), "second".to_string());
        stream.resolve("d1", &loc(1), "first".to_string());
        assert_eq!(stream.render(), "first, second");
    }
}
