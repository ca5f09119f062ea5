//! Token-aware scanning shared by the native text operations
//!
//! The lexer only knows enough about each language to keep comments and string
//! literals out of the way of bracket matching, renaming and whitespace edits.

use crate::types::Diagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    Str,
    Comment,
    Whitespace,
    Newline,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub line: usize,
    pub column: usize,
    /// False for a string or block comment that runs off the end of the input
    pub closed: bool,
}

impl Token<'_> {
    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == c.len_utf8() && self.text.starts_with(c)
    }

    pub fn is_word(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Identifier | TokenKind::Number | TokenKind::Str
        )
    }

    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::Newline | TokenKind::Comment
        )
    }

    pub fn opener(&self) -> Option<char> {
        match self.text {
            "(" | "[" | "{" if self.kind == TokenKind::Punct => self.text.chars().next(),
            _ => None,
        }
    }

    pub fn closer(&self) -> Option<char> {
        match self.text {
            ")" | "]" | "}" if self.kind == TokenKind::Punct => self.text.chars().next(),
            _ => None,
        }
    }
}

/// How statements are laid out when code is re-flowed onto new lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Braces and semicolons delimit statements
    Braces,
    /// Newlines terminate statements; never join or split lines
    NewlineSignificant,
    /// Parenthesized s-expressions
    SExpression,
    /// Structured data handled by its own parser
    Data,
}

#[derive(Debug)]
pub struct Syntax {
    pub language: &'static str,
    pub line_comments: &'static [&'static str],
    pub block_comment: Option<(&'static str, &'static str)>,
    pub quotes: &'static [char],
    /// Quote characters whose literals may span lines
    pub multiline_quotes: &'static [char],
    /// Extra characters allowed inside identifiers
    pub ident_extra: &'static str,
    /// Extra characters allowed to start an identifier
    pub ident_start_extra: &'static str,
    pub keywords: &'static [&'static str],
    pub function_keywords: &'static [&'static str],
    pub declaration_keywords: &'static [&'static str],
    pub branch_keywords: &'static [&'static str],
    pub layout: Layout,
    pub default_indent: &'static str,
}

impl Syntax {
    pub fn is_keyword(&self, word: &str) -> bool {
        self.keywords.contains(&word)
    }
}

pub static RHAI: Syntax = Syntax {
    language: "rhai",
    line_comments: &["//"],
    block_comment: Some(("/*", "*/")),
    quotes: &['"', '\'', '`'],
    multiline_quotes: &['`'],
    ident_extra: "",
    ident_start_extra: "",
    keywords: &[
        "let", "const", "fn", "if", "else", "while", "loop", "for", "in", "do", "until",
        "return", "throw", "try", "catch", "import", "export", "as", "private", "true",
        "false", "break", "continue", "switch", "this", "global",
    ],
    function_keywords: &["fn"],
    declaration_keywords: &["let", "const", "fn"],
    branch_keywords: &["if", "while", "loop", "for", "do", "catch", "switch", "&&", "||", "?"],
    layout: Layout::Braces,
    default_indent: "    ",
};

pub static GO: Syntax = Syntax {
    language: "go",
    line_comments: &["//"],
    block_comment: Some(("/*", "*/")),
    quotes: &['"', '\'', '`'],
    multiline_quotes: &['`'],
    ident_extra: "",
    ident_start_extra: "",
    keywords: &[
        "break", "case", "chan", "const", "continue", "default", "defer", "else",
        "fallthrough", "for", "func", "go", "goto", "if", "import", "interface", "map",
        "package", "range", "return", "select", "struct", "switch", "type", "var", "true",
        "false", "nil", "iota",
    ],
    function_keywords: &["func"],
    declaration_keywords: &["var", "const", "func", "type"],
    branch_keywords: &["if", "for", "case", "&&", "||", "select"],
    layout: Layout::NewlineSignificant,
    default_indent: "\t",
};

pub static WAT: Syntax = Syntax {
    language: "wat",
    line_comments: &[";;"],
    block_comment: Some(("(;", ";)")),
    quotes: &['"'],
    multiline_quotes: &[],
    ident_extra: "$._-!#%&*+/:<=>?@\\^|~",
    ident_start_extra: "$",
    keywords: &[
        "module", "func", "param", "result", "local", "global", "export", "import",
        "memory", "data", "table", "elem", "type", "start", "mut", "loop", "block", "if",
        "then", "else", "end", "br", "br_if", "br_table", "call", "call_indirect",
        "return", "drop", "select", "unreachable", "nop",
    ],
    function_keywords: &["func"],
    declaration_keywords: &["func", "local", "param", "global"],
    branch_keywords: &["if", "br_if", "br_table", "loop"],
    layout: Layout::SExpression,
    default_indent: "  ",
};

pub static JSON: Syntax = Syntax {
    language: "json",
    line_comments: &[],
    block_comment: None,
    quotes: &['"'],
    multiline_quotes: &[],
    ident_extra: "",
    ident_start_extra: "",
    keywords: &["true", "false", "null"],
    function_keywords: &[],
    declaration_keywords: &[],
    branch_keywords: &[],
    layout: Layout::Data,
    default_indent: "  ",
};

pub static YAML: Syntax = Syntax {
    language: "yaml",
    line_comments: &["#"],
    block_comment: None,
    quotes: &['"', '\''],
    multiline_quotes: &[],
    ident_extra: "-",
    ident_start_extra: "",
    keywords: &["true", "false", "null", "yes", "no"],
    function_keywords: &[],
    declaration_keywords: &[],
    branch_keywords: &[],
    layout: Layout::Data,
    default_indent: "  ",
};

/// Lexical profile for `language`; unknown languages get the brace profile
pub fn syntax_for(language: &str) -> &'static Syntax {
    match language.to_ascii_lowercase().as_str() {
        "go" | "golang" => &GO,
        "wat" | "wasm" | "wast" => &WAT,
        "json" => &JSON,
        "yaml" | "yml" => &YAML,
        _ => &RHAI,
    }
}

pub fn tokenize<'a>(source: &'a str, syntax: &Syntax) -> Vec<Token<'a>> {
    Lexer {
        source,
        syntax,
        pos: 0,
        line: 1,
        column: 1,
    }
    .run()
}

struct Lexer<'a, 's> {
    source: &'a str,
    syntax: &'s Syntax,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a, '_> {
    fn run(mut self) -> Vec<Token<'a>> {
        let mut tokens = Vec::new();
        while self.pos < self.source.len() {
            tokens.push(self.next_token());
        }
        tokens
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_str(&mut self, s: &str) {
        for _ in s.chars() {
            self.bump();
        }
    }

    fn is_ident_start(&self, c: char) -> bool {
        c.is_alphabetic() || c == '_' || self.syntax.ident_start_extra.contains(c)
    }

    fn is_ident_char(&self, c: char) -> bool {
        c.is_alphanumeric() || c == '_' || self.syntax.ident_extra.contains(c)
    }

    fn next_token(&mut self) -> Token<'a> {
        let start = self.pos;
        let (line, column) = (self.line, self.column);
        let (kind, closed) = self.scan();
        Token {
            kind,
            text: &self.source[start..self.pos],
            line,
            column,
            closed,
        }
    }

    fn scan(&mut self) -> (TokenKind, bool) {
        let rest = self.rest();
        let Some(c) = self.peek() else {
            return (TokenKind::Whitespace, true);
        };

        if c == '\n' {
            self.bump();
            return (TokenKind::Newline, true);
        }
        if c.is_whitespace() {
            while matches!(self.peek(), Some(w) if w.is_whitespace() && w != '\n') {
                self.bump();
            }
            return (TokenKind::Whitespace, true);
        }

        if let Some((open, close)) = self.syntax.block_comment {
            if rest.starts_with(open) {
                self.bump_str(open);
                let closed = match self.rest().find(close) {
                    Some(offset) => {
                        let body = &self.rest()[..offset + close.len()];
                        self.bump_str(body);
                        true
                    }
                    None => {
                        let body = self.rest();
                        self.bump_str(body);
                        false
                    }
                };
                return (TokenKind::Comment, closed);
            }
        }

        if self.syntax.line_comments.iter().any(|p| rest.starts_with(p)) {
            while matches!(self.peek(), Some(ch) if ch != '\n') {
                self.bump();
            }
            return (TokenKind::Comment, true);
        }

        if self.syntax.quotes.contains(&c) {
            return (TokenKind::Str, self.scan_string(c));
        }

        if c.is_ascii_digit() {
            while matches!(self.peek(), Some(ch) if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_')
            {
                self.bump();
            }
            return (TokenKind::Number, true);
        }

        if self.is_ident_start(c) {
            self.bump();
            while matches!(self.peek(), Some(ch) if self.is_ident_char(ch)) {
                self.bump();
            }
            return (TokenKind::Identifier, true);
        }

        self.bump();
        (TokenKind::Punct, true)
    }

    fn scan_string(&mut self, quote: char) -> bool {
        let multiline = self.syntax.multiline_quotes.contains(&quote);
        self.bump();
        while let Some(c) = self.peek() {
            if c == '\n' && !multiline {
                return false;
            }
            self.bump();
            if c == '\\' && !multiline {
                self.bump();
            } else if c == quote {
                return true;
            }
        }
        false
    }
}

/// Split a token stream into physical lines, dropping the newline tokens
pub fn split_lines<'t, 'a>(tokens: &'t [Token<'a>]) -> Vec<&'t [Token<'a>]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.kind == TokenKind::Newline {
            lines.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    lines.push(&tokens[start..]);
    lines
}

/// Bracket balance and literal termination problems, in source order
pub fn structural_errors(tokens: &[Token<'_>]) -> Vec<Diagnostic> {
    let mut errors = Vec::new();
    let mut stack: Vec<&Token<'_>> = Vec::new();

    for token in tokens {
        if !token.closed {
            let what = if token.kind == TokenKind::Str {
                "unterminated string literal"
            } else {
                "unterminated block comment"
            };
            errors.push(
                Diagnostic::error(what)
                    .at(Some(token.line), Some(token.column))
                    .with_rule("unterminated"),
            );
            continue;
        }
        if token.opener().is_some() {
            stack.push(token);
        } else if let Some(close) = token.closer() {
            match stack.pop() {
                Some(open) if matching(open.text) == Some(close) => {}
                Some(open) => errors.push(
                    Diagnostic::error(format!(
                        "mismatched '{}': expected '{}' to close '{}' from line {}",
                        close,
                        matching(open.text).unwrap_or('?'),
                        open.text,
                        open.line
                    ))
                    .at(Some(token.line), Some(token.column))
                    .with_rule("unbalanced-brackets"),
                ),
                None => errors.push(
                    Diagnostic::error(format!("unexpected closing '{close}'"))
                        .at(Some(token.line), Some(token.column))
                        .with_rule("unbalanced-brackets"),
                ),
            }
        }
    }

    for open in stack {
        errors.push(
            Diagnostic::error(format!("unclosed '{}'", open.text))
                .at(Some(open.line), Some(open.column))
                .with_rule("unbalanced-brackets"),
        );
    }
    errors
}

fn matching(open: &str) -> Option<char> {
    match open {
        "(" => Some(')'),
        "[" => Some(']'),
        "{" => Some('}'),
        _ => None,
    }
}

/// 1-based line of a byte offset
pub fn line_of(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())]
        .bytes()
        .filter(|b| *b == b'\n')
        .count()
        + 1
}
