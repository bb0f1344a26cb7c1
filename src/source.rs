use core::cmp;
use core::fmt::{self, Debug, Formatter};
use std::rc::Rc;

use anyhow::anyhow;

struct SourceInternal {
    path: String,
    contents: String,
    lines: Vec<(u32, u32)>,
}

/// A manifest file shared by every span produced from it.
///
/// The external parser constructs one `Source` per file; the evaluation core
/// only ever reads it to render diagnostics.
#[derive(Clone)]
pub struct Source {
    src: Rc<SourceInternal>,
}

impl cmp::PartialEq for Source {
    fn eq(&self, other: &Source) -> bool {
        Rc::ptr_eq(&self.src, &other.src)
    }
}

impl cmp::Eq for Source {}

impl Debug for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.src.path.fmt(f)
    }
}

impl Source {
    pub fn from_contents(path: impl Into<String>, contents: impl Into<String>) -> Source {
        let contents = contents.into();
        let mut lines = vec![];
        let mut prev_ch = ' ';
        let mut prev_pos = 0u32;
        let mut start = 0u32;
        for (i, ch) in contents.char_indices() {
            if ch == '\n' {
                let end = match prev_ch {
                    '\r' => prev_pos,
                    _ => i as u32,
                };
                lines.push((start, end));
                start = i as u32 + 1;
            }
            prev_ch = ch;
            prev_pos = i as u32;
        }
        if (start as usize) < contents.len() {
            lines.push((start, contents.len() as u32));
        } else {
            lines.push((start, start));
        }
        Source {
            src: Rc::new(SourceInternal {
                path: path.into(),
                contents,
                lines,
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.src.path
    }

    pub fn contents(&self) -> &str {
        &self.src.contents
    }

    pub fn line(&self, line: u32) -> &str {
        let idx = line.saturating_sub(1) as usize;
        if idx < self.src.lines.len() {
            let (start, end) = self.src.lines[idx];
            &self.src.contents[start as usize..end as usize]
        } else {
            ""
        }
    }

    /// A span covering the whole file. The parser emits precise spans; this
    /// is the fallback for callers that synthesize trees programmatically.
    pub fn span(&self) -> Span {
        Span {
            source: self.clone(),
            line: 1,
            col: 1,
            start: 0,
            end: self.src.contents.len() as u32,
        }
    }

    pub fn message(&self, line: u32, col: u32, kind: &str, msg: &str) -> String {
        if line as usize > self.src.lines.len() {
            return format!("{}: invalid line {} specified", self.src.path, line);
        }

        let line_str = format!("{line}");
        let line_num_width = line_str.len() + 1;
        let col_spaces = (col as usize).saturating_sub(1);

        format!(
            "\n--> {}:{}:{}\n{:<line_num_width$}|\n{:<line_num_width$}| {}\n{:<line_num_width$}| {:<col_spaces$}^\n{}: {}",
            self.src.path,
            line,
            col,
            "",
            line,
            self.line(line),
            "",
            "",
            kind,
            msg
        )
    }

    pub fn error(&self, line: u32, col: u32, msg: &str) -> anyhow::Error {
        anyhow!(self.message(line, col, "error", msg))
    }
}

/// A range of characters in a [`Source`], carried by every AST node.
#[derive(Clone, PartialEq, Eq)]
pub struct Span {
    pub source: Source,
    pub line: u32,
    pub col: u32,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(source: &Source, line: u32, col: u32, start: u32, end: u32) -> Span {
        Span {
            source: source.clone(),
            line,
            col,
            start,
            end,
        }
    }

    pub fn text(&self) -> &str {
        let contents = self.source.contents();
        let start = (self.start as usize).min(contents.len());
        let end = (self.end as usize).min(contents.len());
        &contents[start..end]
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn message(&self, kind: &str, msg: &str) -> String {
        self.source.message(self.line, self.col, kind, msg)
    }

    pub fn error(&self, msg: impl AsRef<str>) -> anyhow::Error {
        self.source.error(self.line, self.col, msg.as_ref())
    }

    /// Short `file:line` form used when an error cites a prior definition.
    pub fn location(&self) -> String {
        format!("{}:{}", self.source.path(), self.line)
    }
}

impl Debug for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let t = self.text().escape_debug().to_string();
        let max = 32;
        let (txt, trailer) = if t.len() > max {
            (&t[0..max], "...")
        } else {
            (t.as_str(), "")
        };
        f.write_fmt(format_args!(
            "{}:{}:{}:{}, \"{}{}\"",
            self.line, self.col, self.start, self.end, txt, trailer
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_table() {
        let source = Source::from_contents("test.dcl", "abc\ndef\r\nghi");
        assert_eq!(source.line(1), "abc");
        assert_eq!(source.line(2), "def");
        assert_eq!(source.line(3), "ghi");
        assert_eq!(source.line(4), "");
    }

    #[test]
    fn error_carets_offending_line() {
        let source = Source::from_contents("test.dcl", "$x = 1\n$y = ?\n");
        let err = source.error(2, 6, "invalid expression");
        let text = format!("{err}");
        assert!(text.contains("--> test.dcl:2:6"));
        assert!(text.contains("$y = ?"));
        assert!(text.contains("error: invalid expression"));
    }

    #[test]
    fn whole_file_span() {
        let source = Source::from_contents("test.dcl", "notify { 'a': }");
        let span = source.span();
        assert_eq!(span.text(), "notify { 'a': }");
        assert_eq!(span.location(), "test.dcl:1");
    }
}
