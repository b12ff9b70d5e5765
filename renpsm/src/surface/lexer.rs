use codespan_reporting::diagnostic::{Diagnostic, Label};
use logos::{Filter, Logos};

use crate::files::FileId;
use crate::source::{BytePos, ByteRange, FileRange};

#[derive(Clone, Debug, PartialEq, Logos)]
pub enum Token<'source> {
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Name(&'source str),
    #[regex(r"[0-9]+")]
    IntLiteral(&'source str),
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+")]
    RealLiteral(&'source str),

    #[token("call")]
    KeywordCall,
    #[token("def")]
    KeywordDef,
    #[token("in")]
    KeywordIn,

    #[token("@")]
    At,
    #[token("'")]
    Apostrophe,
    #[token("&&")]
    AmpersandAmpersand,
    #[token("!")]
    Bang,
    #[token("!=")]
    BangEquals,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("==")]
    EqualsEquals,
    #[token(">=")]
    GreaterEquals,
    #[token(">")]
    Greater,
    #[token("<=")]
    LessEquals,
    #[token("<")]
    Less,
    #[token("/")]
    ForwardSlash,
    #[token("->")]
    HyphenGreater,
    #[token("<-")]
    LessHyphen,
    #[token("-")]
    Minus,
    #[token("%")]
    Percent,
    #[token("||")]
    PipePipe,
    #[token("+")]
    Plus,
    #[token("?")]
    Question,
    #[token(";")]
    Semicolon,
    #[token("*")]
    Star,
    #[token("{")]
    OpenBrace,
    #[token("}")]
    CloseBrace,
    #[token("[")]
    OpenBracket,
    #[token("]")]
    CloseBracket,
    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,

    #[token("/*", block_comment)]
    UnclosedComment(BytePos),

    #[error]
    #[regex(r"\p{Whitespace}", logos::skip)]
    #[regex(r"//[^\n]*", logos::skip)]
    Error,
}

/// Skips to the first `*/`. Comments do not nest.
fn block_comment<'source>(lexer: &mut logos::Lexer<'source, Token<'source>>) -> Filter<BytePos> {
    match lexer.remainder().find("*/") {
        Some(len) => {
            lexer.bump(len + "*/".len());
            Filter::Skip
        }
        None => {
            let start = lexer.span().start as BytePos;
            lexer.bump(lexer.remainder().len());
            Filter::Emit(start)
        }
    }
}

pub type Spanned<Tok, Loc> = (Loc, Tok, Loc);

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    UnclosedComment { range: FileRange },
    UnexpectedCharacter { range: FileRange },
}

impl Error {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            Error::UnexpectedCharacter { range } => Diagnostic::error()
                .with_message("unexpected character")
                .with_labels(vec![Label::primary(range.file_id(), *range)]),
            Error::UnclosedComment { range } => Diagnostic::error()
                .with_message("unclosed block comment")
                .with_labels(vec![
                    Label::primary(range.file_id(), *range).with_message("comment starts here")
                ])
                .with_notes(vec!["help: close the comment with `*/`".to_owned()]),
        }
    }
}

/// Tokens with their byte offsets. Sources must be shorter than 4GiB.
pub fn tokens(
    file_id: FileId,
    source: &str,
) -> impl Iterator<Item = Result<Spanned<Token<'_>, BytePos>, Error>> {
    let range = move |start, end| FileRange::new(file_id, ByteRange::new(start, end));

    Token::lexer(source).spanned().map(move |(token, span)| {
        let (start, end) = (span.start as BytePos, span.end as BytePos);
        match token {
            Token::UnclosedComment(start) => Err(Error::UnclosedComment {
                range: range(start, start + "/*".len() as BytePos),
            }),
            Token::Error => Err(Error::UnexpectedCharacter {
                range: range(start, end),
            }),
            token => Ok((start, token, end)),
        }
    })
}

impl<'source> Token<'source> {
    pub fn description(&self) -> &'static str {
        match self {
            Token::Name(_) => "name",
            Token::IntLiteral(_) => "integer literal",
            Token::RealLiteral(_) => "real literal",
            Token::KeywordCall => "call",
            Token::KeywordDef => "def",
            Token::KeywordIn => "in",
            Token::At => "@",
            Token::Apostrophe => "'",
            Token::AmpersandAmpersand => "&&",
            Token::Bang => "!",
            Token::BangEquals => "!=",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Equals => "=",
            Token::EqualsEquals => "==",
            Token::GreaterEquals => ">=",
            Token::Greater => ">",
            Token::LessEquals => "<=",
            Token::Less => "<",
            Token::ForwardSlash => "/",
            Token::HyphenGreater => "->",
            Token::LessHyphen => "<-",
            Token::Minus => "-",
            Token::Percent => "%",
            Token::PipePipe => "||",
            Token::Plus => "+",
            Token::Question => "?",
            Token::Semicolon => ";",
            Token::Star => "*",
            Token::OpenBrace => "{",
            Token::CloseBrace => "}",
            Token::OpenBracket => "[",
            Token::CloseBracket => "]",
            Token::OpenParen => "(",
            Token::CloseParen => ")",
            Token::UnclosedComment(_) => "unclosed comment",
            Token::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Result<Token<'_>, Error>> {
        let file_id = FileId::try_from(1).unwrap();
        tokens(file_id, source)
            .map(|result| result.map(|(_, token, _)| token))
            .collect()
    }

    #[test]
    fn rule_tokens() {
        let tokens = lex("Y{i} <- X{1} + 2.5 : 1 <= i <= 2; // trailing");
        let tokens = tokens.into_iter().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(
            tokens,
            [
                Token::Name("Y"),
                Token::OpenBrace,
                Token::Name("i"),
                Token::CloseBrace,
                Token::LessHyphen,
                Token::Name("X"),
                Token::OpenBrace,
                Token::IntLiteral("1"),
                Token::CloseBrace,
                Token::Plus,
                Token::RealLiteral("2.5"),
                Token::Colon,
                Token::IntLiteral("1"),
                Token::LessEquals,
                Token::Name("i"),
                Token::LessEquals,
                Token::IntLiteral("2"),
                Token::Semicolon,
            ],
        );
    }

    #[test]
    fn keywords_need_word_boundaries() {
        let tokens = lex("call caller in inside def");
        assert_eq!(
            tokens,
            [
                Ok(Token::KeywordCall),
                Ok(Token::Name("caller")),
                Ok(Token::KeywordIn),
                Ok(Token::Name("inside")),
                Ok(Token::KeywordDef),
            ],
        );
    }

    #[test]
    fn block_comments_are_skipped() {
        assert_eq!(lex("a /* b * / c */ d").len(), 2);
        assert_eq!(lex("a /* b /* c */ d */ e").len(), 5);
    }

    #[test]
    fn errors() {
        assert!(matches!(
            lex("a $ b")[1],
            Err(Error::UnexpectedCharacter { .. })
        ));
        let file_id = FileId::try_from(1).unwrap();
        assert_eq!(
            lex("a /* b")[1],
            Err(Error::UnclosedComment {
                range: FileRange::new(file_id, ByteRange::new(2, 4)),
            }),
        );
    }
}
