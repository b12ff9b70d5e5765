//! Diagnostic messages used in the RENPSM compiler.
//!
//! These can be converted to [`Diagnostic`]s in order to present them to the user.
//!
//! [`Diagnostic`]: codespan_reporting::diagnostic::Diagnostic

use std::sync::Arc;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use itertools::Itertools;
use renpsm_runtime::raster;

use crate::files::FileId;
use crate::source::{FileRange, Span};
use crate::surface::lexer;
use crate::symbol::Symbol;

/// Global diagnostic messages
#[derive(Debug, Clone)]
pub enum Message {
    Lexer(lexer::Error),
    Parse(ParseMessage),
    Unroll(UnrollMessage),
    Lower(LowerMessage),
    Summary(SummaryMessage),
    /// Setting up, running or saving an in-process simulation failed.
    Runtime(Arc<renpsm_runtime::Error>),
    /// A compile-time capacity was exceeded.
    LimitExceeded {
        span: Span,
        what: &'static str,
        limit: usize,
    },
}

impl From<lexer::Error> for Message {
    fn from(error: lexer::Error) -> Self {
        Message::Lexer(error)
    }
}

impl From<ParseMessage> for Message {
    fn from(message: ParseMessage) -> Self {
        Message::Parse(message)
    }
}

impl From<UnrollMessage> for Message {
    fn from(message: UnrollMessage) -> Self {
        Message::Unroll(message)
    }
}

impl From<LowerMessage> for Message {
    fn from(message: LowerMessage) -> Self {
        Message::Lower(message)
    }
}

impl From<SummaryMessage> for Message {
    fn from(message: SummaryMessage) -> Self {
        Message::Summary(message)
    }
}

impl From<renpsm_runtime::Error> for Message {
    fn from(error: renpsm_runtime::Error) -> Self {
        Message::Runtime(Arc::new(error))
    }
}

impl Message {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            Message::Lexer(error) => error.to_diagnostic(),
            Message::Parse(message) => message.to_diagnostic(),
            Message::Unroll(message) => message.to_diagnostic(),
            Message::Lower(message) => message.to_diagnostic(),
            Message::Summary(message) => message.to_diagnostic(),
            Message::Runtime(error) => runtime_diagnostic(error),
            Message::LimitExceeded { span, what, limit } => Diagnostic::error()
                .with_message(format!("too many {what}"))
                .with_labels(label_for_span(span).into_iter().collect())
                .with_notes(vec![format!("the limit is {limit}")]),
        }
    }
}

fn runtime_diagnostic(error: &renpsm_runtime::Error) -> Diagnostic<FileId> {
    let diagnostic = Diagnostic::error().with_message(error.to_string());
    match error {
        renpsm_runtime::Error::Raster(raster::Error::Create { .. }) => diagnostic,
        renpsm_runtime::Error::Raster(_) => diagnostic.with_notes(vec![
            "help: pass `--no-map` to run a model that never checks for collisions".to_owned(),
        ]),
        renpsm_runtime::Error::CapacityTooLarge { .. } => {
            diagnostic.with_notes(vec!["help: lower the `--capacity`".to_owned()])
        }
        _ => diagnostic,
    }
}

/// Messages produced during parsing
#[derive(Debug, Clone)]
pub enum ParseMessage {
    UnexpectedToken {
        range: FileRange,
        found: &'static str,
        expected: Vec<&'static str>,
    },
    UnexpectedEof {
        range: FileRange,
        expected: Vec<&'static str>,
    },
    InvalidLiteral {
        range: FileRange,
    },
    DuplicateDefinition {
        range: FileRange,
        name: Symbol,
        first: Span,
    },
}

impl ParseMessage {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            ParseMessage::UnexpectedToken {
                range,
                found,
                expected,
            } => Diagnostic::error()
                .with_message(format!("unexpected token `{found}`"))
                .with_labels(vec![
                    Label::primary(range.file_id(), *range).with_message("unexpected token")
                ])
                .with_notes(expected_note(expected)),
            ParseMessage::UnexpectedEof { range, expected } => Diagnostic::error()
                .with_message("unexpected end of file")
                .with_labels(vec![
                    Label::primary(range.file_id(), *range).with_message("unexpected end of file")
                ])
                .with_notes(expected_note(expected)),
            ParseMessage::InvalidLiteral { range } => Diagnostic::error()
                .with_message("invalid numeric literal")
                .with_labels(vec![Label::primary(range.file_id(), *range)
                    .with_message("does not fit in a 64-bit number")]),
            ParseMessage::DuplicateDefinition { range, name, first } => {
                let mut labels = vec![Label::primary(range.file_id(), *range)
                    .with_message("redefined here")];
                labels.extend(first.range().map(|first| {
                    Label::secondary(first.file_id(), first).with_message("first defined here")
                }));
                Diagnostic::error()
                    .with_message(format!("`{name}` is defined more than once"))
                    .with_labels(labels)
            }
        }
    }
}

/// Messages produced while unrolling
#[derive(Debug, Clone)]
pub enum UnrollMessage {
    UnknownEntry {
        name: Symbol,
        suggestion: Option<Symbol>,
    },
    UnknownDefinition {
        span: Span,
        name: Symbol,
        suggestion: Option<Symbol>,
    },
    NonLiteralBound {
        span: Span,
        var: Symbol,
    },
    SetIteratorOnCall {
        span: Span,
    },
}

impl UnrollMessage {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            UnrollMessage::UnknownEntry { name, suggestion } => Diagnostic::error()
                .with_message(format!("cannot find entry definition `{name}`"))
                .with_notes(suggestion_note(suggestion)),
            UnrollMessage::UnknownDefinition {
                span,
                name,
                suggestion,
            } => Diagnostic::error()
                .with_message(format!("cannot find definition `{name}`"))
                .with_labels(labels(span, "unknown definition"))
                .with_notes(suggestion_note(suggestion)),
            UnrollMessage::NonLiteralBound { span, var } => Diagnostic::error()
                .with_message(format!("bounds of `{var}` are not integer constants"))
                .with_labels(labels(span, "in this instruction"))
                .with_notes(vec![
                    "range bounds must fold to integers when the loop is unrolled".to_owned(),
                ]),
            UnrollMessage::SetIteratorOnCall { span } => Diagnostic::error()
                .with_message("set iterators cannot be applied to a call")
                .with_labels(labels(span, "in this call")),
        }
    }
}

/// Messages produced while lowering the ground program
#[derive(Debug, Clone)]
pub enum LowerMessage {
    TooManyRegions {
        span: Span,
        max: usize,
    },
    InvalidLabel {
        span: Span,
    },
    LabelOutOfRange {
        span: Span,
        label: i64,
        capacity: usize,
    },
    UnknownRegion {
        span: Span,
        label: i64,
    },
    UnknownVariable {
        span: Span,
        name: Symbol,
        arity: usize,
    },
    UnknownFunction {
        span: Span,
        name: Symbol,
    },
    WrongArity {
        span: Span,
        name: Symbol,
        expected: usize,
        found: usize,
    },
    InvalidProteinGuard {
        span: Span,
    },
    MultipleSetIterators {
        span: Span,
    },
    MissingSetIterator {
        span: Span,
        name: Symbol,
    },
    InvalidLayout {
        message: String,
    },
}

impl LowerMessage {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            LowerMessage::TooManyRegions { span, max } => Diagnostic::error()
                .with_message(format!("more than {max} region labels are declared"))
                .with_labels(labels(span, "declared here"))
                .with_notes(vec![
                    "region membership is packed into the high bits of a membrane word"
                        .to_owned(),
                ]),
            LowerMessage::InvalidLabel { span } => Diagnostic::error()
                .with_message("membrane labels must be non-negative integer constants")
                .with_labels(labels(span, "in this instruction")),
            LowerMessage::LabelOutOfRange {
                span,
                label,
                capacity,
            } => Diagnostic::error()
                .with_message(format!("membrane label {label} is out of range"))
                .with_labels(labels(span, "in this instruction"))
                .with_notes(vec![format!("the membrane capacity is {capacity}")]),
            LowerMessage::UnknownRegion { span, label } => Diagnostic::error()
                .with_message(format!("region {label} is not declared"))
                .with_labels(labels(span, "iterated over here"))
                .with_notes(vec!["regions are declared with `@mu`".to_owned()]),
            LowerMessage::UnknownVariable { span, name, arity } => Diagnostic::error()
                .with_message(format!("`{name}` with {arity} indices is never written"))
                .with_labels(labels(span, "read here")),
            LowerMessage::UnknownFunction { span, name } => Diagnostic::error()
                .with_message(format!("cannot find function `{name}`"))
                .with_labels(labels(span, "called here")),
            LowerMessage::WrongArity {
                span,
                name,
                expected,
                found,
            } => Diagnostic::error()
                .with_message(format!(
                    "`{name}` takes {expected} arguments but {found} were supplied"
                ))
                .with_labels(labels(span, "called here")),
            LowerMessage::InvalidProteinGuard { span } => Diagnostic::error()
                .with_message("invalid protein guard")
                .with_labels(labels(span, "in this rule"))
                .with_notes(vec![
                    "expected an integer or a protein object with a constant first index"
                        .to_owned(),
                ]),
            LowerMessage::MultipleSetIterators { span } => Diagnostic::error()
                .with_message("a rule can iterate over at most one region")
                .with_labels(labels(span, "in this rule")),
            LowerMessage::MissingSetIterator { span, name } => Diagnostic::error()
                .with_message(format!("`{name}` needs an argument iterating over a region"))
                .with_labels(labels(span, "called here"))
                .with_notes(vec![format!("for example `{name}(X{{h}} : h in 2)`")]),
            LowerMessage::InvalidLayout { message } => Diagnostic::error()
                .with_message("invalid storage layout")
                .with_notes(vec![message.clone()]),
        }
    }
}

/// Messages produced while summarizing a benchmark log
#[derive(Debug, Clone)]
pub enum SummaryMessage {
    MalformedLine {
        range: FileRange,
        expected: &'static str,
    },
    WallTimeWithoutThreads {
        range: FileRange,
    },
    NoSamples,
}

impl SummaryMessage {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            SummaryMessage::MalformedLine { range, expected } => Diagnostic::error()
                .with_message("malformed benchmark line")
                .with_labels(vec![Label::primary(range.file_id(), *range)])
                .with_notes(vec![format!("expected `{expected}`")]),
            SummaryMessage::WallTimeWithoutThreads { range } => Diagnostic::error()
                .with_message("wall time reported before any thread count")
                .with_labels(vec![Label::primary(range.file_id(), *range)]),
            SummaryMessage::NoSamples => {
                Diagnostic::error().with_message("the log contains no wall times")
            }
        }
    }
}

pub fn label_for_span(span: &Span) -> Option<Label<FileId>> {
    let range = span.range()?;
    Some(Label::primary(range.file_id(), range))
}

fn labels(span: &Span, message: &str) -> Vec<Label<FileId>> {
    (label_for_span(span).into_iter())
        .map(|label| label.with_message(message))
        .collect()
}

fn suggestion_note(suggestion: &Option<Symbol>) -> Vec<String> {
    (suggestion.iter())
        .map(|name| format!("help: a definition with a similar name exists: `{name}`"))
        .collect()
}

fn expected_note(expected: &[&'static str]) -> Vec<String> {
    let quoted = expected.iter().map(|token| format!("`{token}`")).collect::<Vec<_>>();
    format_expected(&quoted).into_iter().collect()
}

fn format_expected(expected: &[impl std::fmt::Display]) -> Option<String> {
    expected.split_last().map(|items| match items {
        (last, []) => format!("expected {last}"),
        (last, expected) => format!("expected {} or {last}", expected.iter().format(", ")),
    })
}
