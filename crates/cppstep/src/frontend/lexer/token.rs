//! Token definitions for the C++ subset lexer

use std::fmt;

use crate::common::Span;
use logos::Logos;

/// Token with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

fn unescape_char(slice: &str) -> char {
    // slice includes the surrounding quotes
    let inner = &slice[1..slice.len() - 1];
    if let Some(esc) = inner.strip_prefix('\\') {
        match esc {
            "n" => '\n',
            "t" => '\t',
            "0" => '\0',
            "\\" => '\\',
            "'" => '\'',
            "\"" => '"',
            _ => esc.chars().next().unwrap_or('?'),
        }
    } else {
        inner.chars().next().unwrap_or('?')
    }
}

fn unescape_string(slice: &str) -> String {
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// All token kinds in the subset
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")] // Skip whitespace
#[logos(skip r"//[^\n]*")] // Skip line comments
#[logos(skip r"/\*[^*]*\*+(?:[^/*][^*]*\*+)*/")] // Skip block comments
pub enum TokenKind {
    // === Keywords ===
    #[token("bool")]
    Bool,
    #[token("break")]
    Break,
    #[token("char")]
    Char,
    #[token("class")]
    Class,
    #[token("const")]
    Const,
    #[token("continue")]
    Continue,
    #[token("delete")]
    Delete,
    #[token("double")]
    Double,
    #[token("else")]
    Else,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("if")]
    If,
    #[token("int")]
    Int,
    #[token("new")]
    New,
    #[token("operator")]
    Operator,
    #[token("private")]
    Private,
    #[token("public")]
    Public,
    #[token("return")]
    Return,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("virtual")]
    Virtual,
    #[token("void")]
    Void,
    #[token("while")]
    While,

    // === Identifiers ===
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    /// Opaque native-body marker, e.g. `@ostream_insert_int`. Only valid as
    /// the entire body of a library function.
    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    OpaqueMarker(String),

    // === Literals ===
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    DoubleLiteral(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntLiteral(i64),

    #[regex(r"'(\\.|[^\\'])'", |lex| unescape_char(lex.slice()))]
    CharLiteral(char),

    #[regex(r#""(\\.|[^\\"])*""#, |lex| unescape_string(lex.slice()))]
    StringLiteral(String),

    // === Operators ===
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("->")]
    Arrow,
    #[token("::")]
    ColonColon,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("=")]
    Eq,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("!")]
    Not,
    #[token("&")]
    Amp,
    #[token("~")]
    Tilde,

    // === Punctuation ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,

    /// End of input (synthesized, never produced by logos)
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier(name) => write!(f, "identifier '{name}'"),
            TokenKind::OpaqueMarker(name) => write!(f, "'@{name}'"),
            TokenKind::IntLiteral(v) => write!(f, "integer literal '{v}'"),
            TokenKind::DoubleLiteral(v) => write!(f, "floating literal '{v}'"),
            TokenKind::CharLiteral(c) => write!(f, "character literal '{c}'"),
            TokenKind::StringLiteral(_) => write!(f, "string literal"),
            TokenKind::Eof => write!(f, "end of input"),
            other => {
                let text = match other {
                    TokenKind::Bool => "bool",
                    TokenKind::Break => "break",
                    TokenKind::Char => "char",
                    TokenKind::Class => "class",
                    TokenKind::Const => "const",
                    TokenKind::Continue => "continue",
                    TokenKind::Delete => "delete",
                    TokenKind::Double => "double",
                    TokenKind::Else => "else",
                    TokenKind::False => "false",
                    TokenKind::For => "for",
                    TokenKind::If => "if",
                    TokenKind::Int => "int",
                    TokenKind::New => "new",
                    TokenKind::Operator => "operator",
                    TokenKind::Private => "private",
                    TokenKind::Public => "public",
                    TokenKind::Return => "return",
                    TokenKind::This => "this",
                    TokenKind::True => "true",
                    TokenKind::Virtual => "virtual",
                    TokenKind::Void => "void",
                    TokenKind::While => "while",
                    TokenKind::Shl => "<<",
                    TokenKind::Shr => ">>",
                    TokenKind::PlusPlus => "++",
                    TokenKind::MinusMinus => "--",
                    TokenKind::Arrow => "->",
                    TokenKind::ColonColon => "::",
                    TokenKind::EqEq => "==",
                    TokenKind::NotEq => "!=",
                    TokenKind::LessEq => "<=",
                    TokenKind::GreaterEq => ">=",
                    TokenKind::AndAnd => "&&",
                    TokenKind::OrOr => "||",
                    TokenKind::Plus => "+",
                    TokenKind::Minus => "-",
                    TokenKind::Star => "*",
                    TokenKind::Slash => "/",
                    TokenKind::Percent => "%",
                    TokenKind::Eq => "=",
                    TokenKind::Less => "<",
                    TokenKind::Greater => ">",
                    TokenKind::Not => "!",
                    TokenKind::Amp => "&",
                    TokenKind::Tilde => "~",
                    TokenKind::LParen => "(",
                    TokenKind::RParen => ")",
                    TokenKind::LBrace => "{",
                    TokenKind::RBrace => "}",
                    TokenKind::LBracket => "[",
                    TokenKind::RBracket => "]",
                    TokenKind::Comma => ",",
                    TokenKind::Semicolon => ";",
                    TokenKind::Colon => ":",
                    TokenKind::Dot => ".",
                    _ => "?",
                };
                write!(f, "'{text}'")
            }
        }
    }
}
