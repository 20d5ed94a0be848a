//! Error types for every stage of the toolchain: lexing/parsing, cross-file
//! resolution, and filesystem plumbing.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A lexical or syntactic error, without location context.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unexpected end of input")]
    EndOfBuffer,
    #[error("unrecognized token")]
    UnknownToken,
    #[error("expected {0}")]
    Unexpected(String),
    #[error("invalid syntax: {0}")]
    InvalidSyntax(String),
    #[error("duplicate identifier `{0}`")]
    DuplicateIdentifier(String),
    #[error("duplicate field number {0}")]
    DuplicateFieldNumber(i32),
    #[error("field `{0}` is reserved")]
    ReservedName(String),
    #[error("invalid number literal")]
    InvalidNumber,
    #[error("invalid string literal")]
    InvalidString,
}

/// A parse error annotated with its source position, rendered with the
/// offending line and a caret.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseErrorWithLocation {
    pub path: PathBuf,
    /// Byte offset of the failing token.
    pub offset: usize,
    /// 1-based line.
    pub line: usize,
    /// 1-based byte column.
    pub col: usize,
    pub line_text: String,
    pub error: ParseError,
}

impl fmt::Display for ParseErrorWithLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{}:{}:{}: {}",
            self.path.display(),
            self.line,
            self.col,
            self.error
        )?;
        writeln!(f, "    {}", self.line_text)?;
        write!(f, "    {}^", " ".repeat(self.col.saturating_sub(1)))
    }
}

impl std::error::Error for ParseErrorWithLocation {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// A cross-file resolution error. These are fatal to the run.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("{}: imported file `{import}` not found under the proto root", .importer.display())]
    TargetFileNotFound { importer: PathBuf, import: String },
    #[error("{}: type `{name}` not found (referenced from scope `{scope}`)", .file.display())]
    TypeNotFound {
        file: PathBuf,
        name: String,
        scope: String,
    },
    #[error("{}: extend target `{base}` not found", .file.display())]
    ExtendSourceNotFound { file: PathBuf, base: String },
}

/// Any failure of a generation run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("proto root `{}` not found", .0.display())]
    CannotFindRoot(PathBuf),
    #[error("`{}` and `{}` share no common root", .from.display(), .to.display())]
    NoCommonRoot { from: PathBuf, to: PathBuf },
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
    Parse(Vec<ParseErrorWithLocation>),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_render_includes_caret() {
        let error = ParseErrorWithLocation {
            path: PathBuf::from("demo.proto"),
            offset: 19,
            line: 2,
            col: 9,
            line_text: "message {".to_string(),
            error: ParseError::Unexpected("an identifier".to_string()),
        };
        let rendered = error.to_string();
        assert!(rendered.starts_with("demo.proto:2:9: expected an identifier"));
        assert!(rendered.ends_with("    message {\n            ^"));
    }
}
