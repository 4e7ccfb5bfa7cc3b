use std::fmt::{Display, Formatter};

use logos::Logos;

#[derive(Logos, Debug, PartialEq, Eq, Clone, Copy)]
#[logos(subpattern decimal = r"[0-9]+")]
#[logos(subpattern unit = r"(?:ms|[smhdwy])")]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\r\n]*")]
pub enum Token {
    #[token("and", ignore(ascii_case))]
    OpAnd,

    #[token("atan2", ignore(ascii_case))]
    OpAtan2,

    #[token("bool", ignore(ascii_case))]
    Bool,

    #[token("by", ignore(ascii_case))]
    By,

    #[token("group_left", ignore(ascii_case))]
    GroupLeft,

    #[token("group_right", ignore(ascii_case))]
    GroupRight,

    #[token("ignoring", ignore(ascii_case))]
    Ignoring,

    #[token("offset", ignore(ascii_case))]
    Offset,

    #[token("on", ignore(ascii_case))]
    On,

    #[token("or", ignore(ascii_case))]
    OpOr,

    #[token("unless", ignore(ascii_case))]
    OpUnless,

    #[token("without", ignore(ascii_case))]
    Without,

    #[regex("(?&decimal)(?&unit)(?:(?&decimal)(?&unit))*", priority = 5)]
    Duration,

    #[regex(r"(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+)?")]
    #[regex("0[xX][0-9a-fA-F]+")]
    #[regex("[Nn][Aa][Nn]")]
    #[regex("[Ii][Nn][Ff]")]
    Number,

    #[regex(r"[_a-zA-Z][_a-zA-Z0-9:]*")]
    Identifier,

    #[regex("'(?s:[^'\\\\]|\\\\.)*'")]
    #[regex("`[^`]*`")]
    #[regex("\"(?s:[^\"\\\\]|\\\\.)*\"")]
    StringLiteral,

    #[token("@")]
    At,

    #[token("{")]
    LeftBrace,

    #[token("}")]
    RightBrace,

    #[token("[")]
    LeftBracket,

    #[token("]")]
    RightBracket,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token("(")]
    LeftParen,

    #[token(")")]
    RightParen,

    #[token("=")]
    Equal,

    #[token("==")]
    OpEqual,

    #[token("!=")]
    OpNotEqual,

    #[token("<")]
    OpLessThan,

    #[token("<=")]
    OpLessThanOrEqual,

    #[token(">")]
    OpGreaterThan,

    #[token(">=")]
    OpGreaterThanOrEqual,

    #[token("+")]
    OpPlus,

    #[token("-")]
    OpMinus,

    #[token("/")]
    OpDiv,

    #[token("*")]
    OpMul,

    #[token("^")]
    OpPow,

    #[token("%")]
    OpMod,

    #[token("=~")]
    RegexEqual,

    #[token("!~")]
    RegexNotEqual,

    /// Marker for end of stream.
    Eof,
}

impl Token {
    pub fn is_operator(&self) -> bool {
        use Token::*;
        matches!(
            self,
            OpAtan2
                | OpMul
                | OpDiv
                | OpMod
                | OpPlus
                | OpMinus
                | OpLessThan
                | OpGreaterThan
                | OpLessThanOrEqual
                | OpGreaterThanOrEqual
                | OpEqual
                | OpNotEqual
                | OpPow
                | OpAnd
                | OpOr
                | OpUnless
        )
    }

    /// Keywords that may also be used as label or metric names.
    pub fn is_ident_like(&self) -> bool {
        use Token::*;
        matches!(
            self,
            Identifier
                | By
                | Bool
                | GroupLeft
                | GroupRight
                | Ignoring
                | On
                | Offset
                | Without
                | OpAnd
                | OpAtan2
                | OpOr
                | OpUnless
        )
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::By => "by",
            Self::Bool => "bool",
            Self::GroupLeft => "group_left",
            Self::GroupRight => "group_right",
            Self::Ignoring => "ignoring",
            Self::On => "on",
            Self::Offset => "offset",
            Self::Without => "without",
            Self::StringLiteral => "<string literal>",
            Self::Identifier => "<identifier>",

            Self::At => "@",
            Self::LeftBrace => "{",
            Self::RightBrace => "}",
            Self::LeftBracket => "[",
            Self::RightBracket => "]",
            Self::Colon => ":",
            Self::Comma => ",",
            Self::LeftParen => "(",
            Self::RightParen => ")",
            Self::Equal => "=",

            Self::OpAnd => "and",
            Self::OpAtan2 => "atan2",
            Self::OpOr => "or",
            Self::OpUnless => "unless",
            Self::OpMul => "*",
            Self::OpDiv => "/",
            Self::OpMod => "%",
            Self::OpPlus => "+",
            Self::OpMinus => "-",
            Self::OpLessThan => "<",
            Self::OpGreaterThan => ">",
            Self::OpLessThanOrEqual => "<=",
            Self::OpGreaterThanOrEqual => ">=",
            Self::OpEqual => "==",
            Self::OpNotEqual => "!=",
            Self::OpPow => "^",
            Self::RegexEqual => "=~",
            Self::RegexNotEqual => "!~",

            Self::Duration => "<duration>",
            Self::Number => "<number>",

            Self::Eof => "<eof>",
        })
    }
}
