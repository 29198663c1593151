//! Text storage the controller edits.

use std::fmt;

/// Text that a [`SyncController`](crate::SyncController) keeps in sync.
///
/// All offsets are in Unicode scalar values (chars), not bytes or UTF-16.
/// The controller only calls these with offsets inside the text.
pub trait TextTarget {
    /// Total length in chars.
    fn len_chars(&self) -> usize;

    /// The whole text.
    fn contents(&self) -> String;

    /// Insert text at char offset.
    fn insert(&mut self, text: &str, char_offset: usize);

    /// Delete `len` chars starting at char offset.
    fn delete(&mut self, char_offset: usize, len: usize);
}

/// A plain `String` buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTarget {
    text: String,
}

impl StringTarget {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    fn byte_offset(&self, char_offset: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_offset)
            .map_or(self.text.len(), |(i, _)| i)
    }
}

impl fmt::Display for StringTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl TextTarget for StringTarget {
    fn len_chars(&self) -> usize {
        self.text.chars().count()
    }

    fn contents(&self) -> String {
        self.text.clone()
    }

    fn insert(&mut self, text: &str, char_offset: usize) {
        let at = self.byte_offset(char_offset);
        self.text.insert_str(at, text);
    }

    fn delete(&mut self, char_offset: usize, len: usize) {
        let start = self.byte_offset(char_offset);
        let end = self.byte_offset(char_offset + len);
        self.text.replace_range(start..end, "");
    }
}

impl TextTarget for ropey::Rope {
    fn len_chars(&self) -> usize {
        ropey::Rope::len_chars(self)
    }

    fn contents(&self) -> String {
        self.to_string()
    }

    fn insert(&mut self, text: &str, char_offset: usize) {
        ropey::Rope::insert(self, char_offset, text);
    }

    fn delete(&mut self, char_offset: usize, len: usize) {
        self.remove(char_offset..char_offset + len);
    }
}
