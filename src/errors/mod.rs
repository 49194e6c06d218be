//! Error types, diagnostics, and result aliases.
//!
//! ClassAd evaluation has three failure channels and only one of them lives
//! here as a Rust error:
//!
//! * [`EvalFailure`]: an evaluation could not be carried out at all. It aborts
//!   the whole top-level call.
//! * `Value::Error` and `Value::Undefined` are ordinary values, produced and
//!   consumed by the evaluator (see [`crate::evaluator::Value`]).
//!
//! Building records and parsing source text report [`ClassAdError`], rendered
//! through `miette` with a stable [`ErrorCode`].

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::ast::ExprId;
use crate::lexer::token::SourceLocation;

/// Edit distance between two names, compared case-insensitively.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            row[j + 1] = (prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// Find the closest candidate to `name`, if any is within `max_distance` edits.
pub fn find_similar<'c, I>(name: &str, candidates: I, max_distance: usize) -> Option<&'c str>
where
    I: IntoIterator<Item = &'c str>,
{
    candidates
        .into_iter()
        .map(|candidate| (edit_distance(name, candidate), candidate))
        .filter(|(distance, _)| *distance <= max_distance)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Syntax Errors (E01xx)
    E0101, // Unexpected token
    E0102, // Unexpected character
    E0103, // Unterminated string
    E0104, // Invalid escape sequence
    E0105, // Malformed number
    E0106, // Nesting too deep

    // Record Construction Errors (E02xx)
    E0201, // Missing attribute name
    E0202, // Invalid attribute name
    E0203, // Absent or freed expression
    E0204, // Target is not a record

    // Evaluation Failures (E03xx)
    E0301, // Evaluation depth exceeded
    E0302, // Dangling expression id
    E0303, // Attribute evaluated on a non-record

    // Tooling (E09xx)
    E0901, // I/O error
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            ErrorCode::E0101 => "E0101",
            ErrorCode::E0102 => "E0102",
            ErrorCode::E0103 => "E0103",
            ErrorCode::E0104 => "E0104",
            ErrorCode::E0105 => "E0105",
            ErrorCode::E0106 => "E0106",
            ErrorCode::E0201 => "E0201",
            ErrorCode::E0202 => "E0202",
            ErrorCode::E0203 => "E0203",
            ErrorCode::E0204 => "E0204",
            ErrorCode::E0301 => "E0301",
            ErrorCode::E0302 => "E0302",
            ErrorCode::E0303 => "E0303",
            ErrorCode::E0901 => "E0901",
        };
        f.write_str(code)
    }
}

/// Errors raised while parsing source text or building records
#[derive(Error, Debug, Diagnostic)]
pub enum ClassAdError {
    #[error("unexpected token")]
    #[diagnostic(code(E0101), help("{help}"))]
    UnexpectedToken {
        #[source_code]
        src: String,
        #[label("expected {expected}, found {found}")]
        span: SourceSpan,
        expected: String,
        found: String,
        help: String,
    },

    #[error("unexpected character")]
    #[diagnostic(code(E0102), help("{help}"))]
    UnexpectedCharacter {
        #[source_code]
        src: String,
        #[label("unexpected: '{ch}'")]
        span: SourceSpan,
        ch: char,
        help: String,
    },

    #[error("unterminated string")]
    #[diagnostic(code(E0103), help("add the closing double quote"))]
    UnterminatedString {
        #[source_code]
        src: String,
        #[label("string started here but never closed")]
        span: SourceSpan,
    },

    #[error("invalid escape sequence")]
    #[diagnostic(code(E0104), help("valid escapes are \\n \\t \\r \\\\ \\\" \\' and \\0"))]
    InvalidEscapeSequence {
        #[source_code]
        src: String,
        #[label("invalid escape: {sequence}")]
        span: SourceSpan,
        sequence: String,
    },

    #[error("malformed number")]
    #[diagnostic(code(E0105))]
    MalformedNumber {
        #[source_code]
        src: String,
        #[label("'{literal}' is not a valid number")]
        span: SourceSpan,
        literal: String,
    },

    #[error("expression nested too deeply")]
    #[diagnostic(code(E0106), help("nesting is limited to {limit} levels"))]
    NestingTooDeep {
        #[source_code]
        src: String,
        #[label("nesting limit reached here")]
        span: SourceSpan,
        limit: usize,
    },

    #[error("missing attribute name")]
    #[diagnostic(code(E0201))]
    MissingAttributeName,

    #[error("invalid attribute name '{name}'")]
    #[diagnostic(
        code(E0202),
        help("attribute names start with a letter or '_' and continue with letters, digits or '_'")
    )]
    InvalidAttributeName { name: String },

    #[error("expression {id} is absent or has been freed")]
    #[diagnostic(code(E0203))]
    BadExpression { id: ExprId },

    #[error("expression {id} is not a record")]
    #[diagnostic(code(E0204))]
    NotARecord { id: ExprId },

    #[error("I/O error: {message}")]
    #[diagnostic(code(E0901))]
    Io { message: String },
}

impl ClassAdError {
    /// Create an UnexpectedToken error
    pub fn unexpected_token(
        src: impl Into<String>,
        location: &SourceLocation,
        expected: impl Into<String>,
        found: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        ClassAdError::UnexpectedToken {
            src: src.into(),
            span: location.span(),
            expected: expected.into(),
            found: found.into(),
            help: help.into(),
        }
    }

    /// Create an UnexpectedCharacter error
    pub fn unexpected_character(
        src: impl Into<String>,
        location: &SourceLocation,
        ch: char,
    ) -> Self {
        let help = match ch {
            '\'' => "strings use double quotes \"...\"".to_string(),
            ':' => "'?' and ':' must appear together, as in c ? a : b".to_string(),
            '#' => "comments start with // or /*".to_string(),
            _ => format!("'{}' is not valid ClassAd syntax", ch),
        };
        ClassAdError::UnexpectedCharacter {
            src: src.into(),
            span: location.span(),
            ch,
            help,
        }
    }

    pub fn unterminated_string(src: impl Into<String>, location: &SourceLocation) -> Self {
        ClassAdError::UnterminatedString {
            src: src.into(),
            span: location.span(),
        }
    }

    pub fn invalid_escape_sequence(
        src: impl Into<String>,
        location: &SourceLocation,
        sequence: impl Into<String>,
    ) -> Self {
        ClassAdError::InvalidEscapeSequence {
            src: src.into(),
            span: location.span(),
            sequence: sequence.into(),
        }
    }

    pub fn malformed_number(
        src: impl Into<String>,
        location: &SourceLocation,
        literal: impl Into<String>,
    ) -> Self {
        ClassAdError::MalformedNumber {
            src: src.into(),
            span: location.span(),
            literal: literal.into(),
        }
    }

    pub fn nesting_too_deep(src: impl Into<String>, location: &SourceLocation, limit: usize) -> Self {
        ClassAdError::NestingTooDeep {
            src: src.into(),
            span: location.span(),
            limit,
        }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        ClassAdError::Io {
            message: message.into(),
        }
    }

    /// The stable code of this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ClassAdError::UnexpectedToken { .. } => ErrorCode::E0101,
            ClassAdError::UnexpectedCharacter { .. } => ErrorCode::E0102,
            ClassAdError::UnterminatedString { .. } => ErrorCode::E0103,
            ClassAdError::InvalidEscapeSequence { .. } => ErrorCode::E0104,
            ClassAdError::MalformedNumber { .. } => ErrorCode::E0105,
            ClassAdError::NestingTooDeep { .. } => ErrorCode::E0106,
            ClassAdError::MissingAttributeName => ErrorCode::E0201,
            ClassAdError::InvalidAttributeName { .. } => ErrorCode::E0202,
            ClassAdError::BadExpression { .. } => ErrorCode::E0203,
            ClassAdError::NotARecord { .. } => ErrorCode::E0204,
            ClassAdError::Io { .. } => ErrorCode::E0901,
        }
    }

    /// Get a simple error message (without source context)
    pub fn message(&self) -> String {
        match self {
            ClassAdError::UnexpectedToken {
                expected, found, ..
            } => format!("unexpected token: expected {}, found {}", expected, found),
            ClassAdError::UnexpectedCharacter { ch, .. } => {
                format!("unexpected character: '{}'", ch)
            }
            ClassAdError::InvalidEscapeSequence { sequence, .. } => {
                format!("invalid escape sequence: {}", sequence)
            }
            ClassAdError::MalformedNumber { literal, .. } => {
                format!("malformed number: {}", literal)
            }
            other => other.to_string(),
        }
    }
}

/// An evaluation that could not be carried out.
///
/// Distinct from the `error` and `undefined` values: those are results, this
/// aborts the top-level call that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum EvalFailure {
    #[error("evaluation exceeded the nesting limit of {limit}")]
    #[diagnostic(code(E0301), help("raise the limit with EvalConfig::max_depth"))]
    DepthExceeded { limit: usize },

    #[error("expression {id} is not allocated")]
    #[diagnostic(code(E0302))]
    DanglingExpression { id: ExprId },

    #[error("cannot evaluate attributes of {id}: not a record")]
    #[diagnostic(code(E0303))]
    NotARecord { id: ExprId },
}

impl EvalFailure {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            EvalFailure::DepthExceeded { .. } => ErrorCode::E0301,
            EvalFailure::DanglingExpression { .. } => ErrorCode::E0302,
            EvalFailure::NotARecord { .. } => ErrorCode::E0303,
        }
    }
}

/// Abort on a broken AST invariant.
///
/// Reaching this means an arena slot is missing or malformed behind an
/// ownership edge, which construction never produces. It is the only panic
/// in library code.
#[cold]
#[track_caller]
pub fn invariant_violated(what: &str) -> ! {
    tracing::error!(what, "classad invariant violated");
    panic!("classad invariant violated: {}", what)
}

/// Result type for parsing and record construction
pub type ClassAdResult<T> = Result<T, ClassAdError>;

/// Result type for evaluation
pub type EvalResult<T> = Result<T, EvalFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::E0101.to_string(), "E0101");
        assert_eq!(ErrorCode::E0303.to_string(), "E0303");
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("member", "member"), 0);
        assert_eq!(edit_distance("membr", "member"), 1);
        assert_eq!(edit_distance("STRCAT", "strcat"), 0);
        assert_eq!(edit_distance("", "abc"), 3);
    }

    #[test]
    fn test_find_similar() {
        let names = ["member", "size", "strcat"];
        assert_eq!(find_similar("membr", names, 2), Some("member"));
        assert_eq!(find_similar("siz", names, 2), Some("size"));
        assert_eq!(find_similar("xyzzy", names, 2), None);
    }

    #[test]
    fn test_construction_error_codes() {
        assert_eq!(
            ClassAdError::MissingAttributeName.error_code(),
            ErrorCode::E0201
        );
        let err = ClassAdError::InvalidAttributeName {
            name: "1abc".into(),
        };
        assert_eq!(err.error_code(), ErrorCode::E0202);
        assert!(err.message().contains("1abc"));
    }

    #[test]
    fn test_eval_failure_codes() {
        let failure = EvalFailure::DepthExceeded { limit: 8 };
        assert_eq!(failure.error_code(), ErrorCode::E0301);
        assert!(failure.to_string().contains('8'));
    }

    #[test]
    #[should_panic(expected = "invariant violated")]
    fn test_invariant_violation_panics() {
        invariant_violated("operation without operands");
    }
}
