use std::{
    collections::{BTreeMap, VecDeque},
    str::Chars,
};

use itertools::{peek_nth, PeekNth};
use once_cell::sync::Lazy;
use strum::EnumString;

use crate::source::{SourceFile, Span};

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    /// Byte offset the lexer stops at
    end: usize,
    line_number: usize,
    chars: PeekNth<Chars<'source>>,
    peek_buffer: VecDeque<Token>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Zero based line the token starts on
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // sil_global
    Identifier,       // bb0, Builtin, τ_0_0
    LocalName,        // %0, %self
    GlobalName,       // @main, @owned, @convention

    /* Literals */
    IntegerLiteral, // 42, 0x2A
    StringLiteral,  // "hello, world"

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    LessThan,     // <
    GreaterThan,  // >
    Semicolon,    // ;
    Comma,        // ,

    /* Other */
    Colon,        // :
    Dollar,       // $
    Hash,         // #
    Bang,         // !
    Dot,          // .
    Equals,       // =
    DoubleEquals, // ==
    Arrow,        // ->
    Ampersand,    // &
    Asterisk,     // *
    Plus,         // +
    Minus,        // -

    /* Errors */
    Unknown,            // ~
    UnterminatedString, // "abc
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Sil,
    SilStage,
    SilGlobal,
    SilVtable,
    SilWitnessTable,
    SilDefaultWitnessTable,
    SilCoverageMap,
    SilScope,
    Import,
    Class,
    Struct,
    Enum,
    Protocol,
    Extension,
    Typealias,
    Case,
    Var,
    Let,
    Undef,
    Where,
}

impl Keyword {
    /// Keywords which start a top level declaration
    pub fn starts_declaration(self) -> bool {
        matches!(
            self,
            Keyword::Sil
                | Keyword::SilStage
                | Keyword::SilGlobal
                | Keyword::SilVtable
                | Keyword::SilWitnessTable
                | Keyword::SilDefaultWitnessTable
                | Keyword::SilCoverageMap
                | Keyword::SilScope
                | Keyword::Import
                | Keyword::Class
                | Keyword::Struct
                | Keyword::Enum
                | Keyword::Protocol
                | Keyword::Extension
        )
    }
}

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('[', TokenKind::OpenBracket),
        (']', TokenKind::CloseBracket),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
        (';', TokenKind::Semicolon),
        (',', TokenKind::Comma),
        (':', TokenKind::Colon),
        ('$', TokenKind::Dollar),
        ('#', TokenKind::Hash),
        ('!', TokenKind::Bang),
        ('.', TokenKind::Dot),
        ('=', TokenKind::Equals),
        ('&', TokenKind::Ampersand),
        ('*', TokenKind::Asterisk),
        ('+', TokenKind::Plus),
        ('-', TokenKind::Minus),
    ])
});

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Characters of `@name`, which also covers mangled symbol names
fn is_symbol_char(c: char) -> bool {
    is_word_char(c) || c == '$'
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self::with_range(source, Span::new(0, source.contents.len()))
    }

    /// Lexes only the bytes of `range`
    pub fn with_range(source: &'source SourceFile, range: Span) -> Self {
        let start = range.start.min(source.contents.len());
        let end = range.end.clamp(start, source.contents.len());

        Self {
            source,
            chars: peek_nth(source.contents[start..end].chars()),
            position: start,
            end,
            line_number: source.row_for_position(start) - 1,
            peek_buffer: VecDeque::new(),
        }
    }

    pub fn is_eof(&self) -> bool {
        self.peek_buffer.is_empty() && self.position >= self.end
    }

    pub fn source(&self) -> &'source SourceFile {
        self.source
    }

    /// Byte offset just past the last consumed character
    pub fn position(&self) -> usize {
        self.position
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();

        if c == '\n' {
            self.line_number += 1;
        }

        Some(c)
    }

    fn ignore_whitespace(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if !c.is_whitespace() {
                break;
            }

            self.advance();
        }
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.advance();
        }
    }

    fn token(&self, kind: TokenKind, start: usize, line: usize) -> Token {
        Token {
            kind,
            span: self.new_span(start),
            line,
        }
    }

    fn read_string(&mut self) -> Token {
        let start_position = self.position;
        let line = self.line_number;

        // Consume opening quote
        self.advance();

        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.advance();

            // Skip whatever is escaped, including quotes
            if c == '\\' {
                self.advance();
                continue;
            }

            if c == '"' {
                return self.token(TokenKind::StringLiteral, start_position, line);
            }
        }

        self.token(TokenKind::UnterminatedString, start_position, line)
    }

    // Keyword or identifier
    fn read_word(&mut self) -> Token {
        let start_position = self.position;
        let line = self.line_number;

        while self.chars.peek().is_some_and(|c| is_word_char(*c)) {
            self.advance();
        }

        let span = self.new_span(start_position);
        let kind = match self.source.value_of_span(span).parse() {
            Ok(keyword) => TokenKind::Keyword(keyword),
            Err(_) => TokenKind::Identifier,
        };

        Token { kind, span, line }
    }

    // %name or @name
    fn read_prefixed_name(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;
        let line = self.line_number;

        // Consume sigil
        self.advance();

        while self.chars.peek().is_some_and(|c| is_symbol_char(*c)) {
            self.advance();
        }

        self.token(kind, start_position, line)
    }

    fn read_number(&mut self) -> Token {
        let start_position = self.position;
        let line = self.line_number;

        let is_hex = self.chars.peek() == Some(&'0')
            && self.chars.peek_nth(1).is_some_and(|c| *c == 'x' || *c == 'X');

        if is_hex {
            self.advance();
            self.advance();

            while self.chars.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
        } else {
            while self.chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        self.token(TokenKind::IntegerLiteral, start_position, line)
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;
        let line = self.line_number;

        self.advance();

        self.token(kind, start_position, line)
    }

    fn read_double(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;
        let line = self.line_number;

        self.advance();
        self.advance();

        self.token(kind, start_position, line)
    }

    fn new_span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.position,
        }
    }

    pub fn peek(&mut self) -> Option<Token> {
        self.peek_nth(0)
    }

    /// Looks `n` tokens past the next one without consuming anything
    pub fn peek_nth(&mut self, n: usize) -> Option<Token> {
        while self.peek_buffer.len() <= n {
            let token = self.lex_token()?;
            self.peek_buffer.push_back(token);
        }

        self.peek_buffer.get(n).copied()
    }

    pub fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.peek_buffer.pop_front() {
            return Some(token);
        }

        self.lex_token()
    }

    fn lex_token(&mut self) -> Option<Token> {
        while let Some(c) = self.chars.peek().copied() {
            let token = match c {
                // Ignore whitespace
                c if c.is_whitespace() => {
                    self.ignore_whitespace();
                    continue;
                }
                // Ignore comments
                '/' if self.chars.peek_nth(1).is_some_and(|c| *c == '/') => {
                    self.ignore_line();
                    continue;
                }

                // String literals
                '"' => self.read_string(),

                // Integer literals
                n if n.is_ascii_digit() => self.read_number(),

                // Local values (%0)
                '%' if self.chars.peek_nth(1).is_some_and(|c| is_word_char(*c)) => {
                    self.read_prefixed_name(TokenKind::LocalName)
                }
                // Global names and attributes (@main)
                '@' if self.chars.peek_nth(1).is_some_and(|c| is_symbol_char(*c)) => {
                    self.read_prefixed_name(TokenKind::GlobalName)
                }

                // Identifiers and keywords
                a if is_word_start(a) => self.read_word(),

                // Arrow (->)
                '-' if self.chars.peek_nth(1).is_some_and(|c| *c == '>') => {
                    self.read_double(TokenKind::Arrow)
                }
                // Double equals (==)
                '=' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::DoubleEquals)
                }

                c => match SINGLE_TOKENS.get(&c) {
                    Some(kind) => self.read_single(*kind),
                    None => self.read_single(TokenKind::Unknown),
                },
            };

            return Some(token);
        }

        None
    }
}

/// Decodes the contents of a string literal token, quotes included. Accepts
/// `\" \\ \' \n \t \r \0` and `\u{..}`.
pub fn unescape(literal: &str) -> Option<String> {
    let inner = literal.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next()? {
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'u' => {
                if chars.next()? != '{' {
                    return None;
                }

                let digits = chars.by_ref().take_while(|c| *c != '}').collect::<String>();
                out.push(char::from_u32(u32::from_str_radix(&digits, 16).ok()?)?);
            }
            _ => return None,
        }
    }

    Some(out)
}

/// Value of an integer literal token, decimal or `0x` hexadecimal
pub fn integer_value(literal: &str) -> Option<u128> {
    match literal
        .strip_prefix("0x")
        .or_else(|| literal.strip_prefix("0X"))
    {
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => literal.parse().ok(),
    }
}
