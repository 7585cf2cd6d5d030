use std::path::PathBuf;

use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The smallest span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn from_memory(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            origin: SourceFileOrigin::Memory,
        }
    }

    pub fn from_path(path: PathBuf, contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            origin: SourceFileOrigin::File(path),
        }
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        self.contents
            .get(span.start..span.end.min(self.contents.len()))
            .unwrap_or_default()
    }

    /// One based line number of a byte offset
    pub fn row_for_position(&self, position: usize) -> usize {
        let position = position.min(self.contents.len());
        self.contents.as_bytes()[..position]
            .iter()
            .filter(|b| **b == b'\n')
            .count()
            + 1
    }

    /// One based column of a byte offset
    pub fn column_for_position(&self, position: usize) -> usize {
        let position = position.min(self.contents.len());
        let line_start = self.contents[..position]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);

        self.contents[line_start..position].chars().count() + 1
    }

    /// Renders the line containing `span` with the spanned text underlined
    pub fn highlight_span(&self, span: Span) -> String {
        let start = span.start.min(self.contents.len());
        let line_start = self.contents[..start]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let line_end = self.contents[start..]
            .find('\n')
            .map(|i| start + i)
            .unwrap_or(self.contents.len());

        let line = &self.contents[line_start..line_end];
        let row = self.row_for_position(start).to_string();
        let padding = " ".repeat(self.contents[line_start..start].chars().count());
        let underline_len = self
            .value_of_span(Span::new(start, span.end.min(line_end)))
            .chars()
            .count()
            .max(1);

        format!(
            "{} {} {line}\n{} {} {padding}{}",
            row.blue(),
            "|".blue(),
            " ".repeat(row.len()),
            "|".blue(),
            "^".repeat(underline_len).red()
        )
    }
}

#[derive(Debug, Clone)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_and_columns_are_one_based() {
        let source = SourceFile::from_memory("bb0:\n  return %0\n");
        let position = source.contents.find("return").unwrap_or_default();

        assert_eq!(source.row_for_position(0), 1);
        assert_eq!(source.row_for_position(position), 2);
        assert_eq!(source.column_for_position(position), 3);
    }

    #[test]
    fn highlight_underlines_span() {
        let source = SourceFile::from_memory("sil @f : $Foo\n");
        let start = source.contents.find("Foo").unwrap_or_default();
        let rendered = strip_ansi_escapes::strip_str(source.highlight_span(Span::new(start, start + 3)));

        assert!(rendered.contains("sil @f : $Foo"));
        assert!(rendered.ends_with("^^^"));
    }
}
