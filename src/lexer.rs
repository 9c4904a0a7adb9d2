use crate::ast::Position;
use crate::error::ScanError;
use log::{debug, warn};
use miette::NamedSource;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default bound on how many fragment files may be open at once.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// A file loaded for scanning. Shared between its context and every token
/// captured from it so diagnostics can point back into the right source.
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    pub fn read(path: &Path) -> Result<Self, ScanError> {
        let text = fs::read_to_string(path).map_err(|e| ScanError::Io {
            path: path.to_string_lossy().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(path, text))
    }

    pub fn named(&self) -> NamedSource<String> {
        NamedSource::new(self.path.to_string_lossy().to_string(), self.text.clone())
    }
}

/// Structural punctuation of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Comma,
}

/// The pieces that frame an invocation: `$(`, `/` and `)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Open,
    Separator,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Emitted once when a context begins scanning.
    Start,
    Punct(Punct),
    /// Opening or closing quote of a document string.
    Quote,
    /// One character of text, with escapes already applied.
    StrChar(char),
    /// A path component inside an invocation.
    InvocationSyllable,
    InvocationDelimiter(Delimiter),
    /// Whitespace or a comment. Never returned by [`Lexer::scan`].
    Discarded,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub position: Position,
    pub source: Arc<SourceFile>,
    /// Depth of the context stack that produced the token; the root file is 1.
    pub depth: usize,
}

impl Token {
    pub fn span_len(&self) -> usize {
        self.lexeme.len().max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Start,
    InString,
    InEscape,
    InInvocation,
    InComment,
}

impl ScanState {
    fn describe(&self) -> &'static str {
        match self {
            ScanState::Start => "token",
            ScanState::InString => "string",
            ScanState::InEscape => "escape sequence",
            ScanState::InInvocation => "invocation",
            ScanState::InComment => "comment",
        }
    }
}

/// Whether a context scans document structure or plain fragment text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    Document,
    Fragment,
}

/// Scanning state for one open file.
#[derive(Debug)]
pub struct ScanContext {
    source: Arc<SourceFile>,
    mode: ContextMode,
    depth: usize,
    cursor: usize,
    line: usize,
    column: usize,
    state: ScanState,
    resume_state: ScanState,
    matched: Option<TokenKind>,
    last_matched: Option<TokenKind>,
    lexeme: String,
    token_start: Position,
    state_start: Position,
}

impl ScanContext {
    pub fn new(source: Arc<SourceFile>, mode: ContextMode, depth: usize) -> Self {
        let origin = Position::new(1, 1, 0);
        Self {
            source,
            mode,
            depth,
            cursor: 0,
            line: 1,
            column: 1,
            state: ScanState::Start,
            resume_state: ScanState::Start,
            matched: Some(TokenKind::Start),
            last_matched: None,
            lexeme: String::new(),
            token_start: origin,
            state_start: origin,
        }
    }

    pub fn path(&self) -> &Path {
        &self.source.path
    }

    pub fn at_end_of_file(&self) -> bool {
        self.cursor >= self.source.text.len()
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column, self.cursor)
    }

    fn peek_char(&self) -> Option<char> {
        self.source.text[self.cursor..].chars().next()
    }

    /// Consumes one character into the current lexeme.
    fn scan_next_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        if self.lexeme.is_empty() {
            self.token_start = self.position();
        }
        self.cursor += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.lexeme.push(c);
        Some(c)
    }

    /// The state plain text returns to after an escape or invocation.
    fn text_state(&self) -> ScanState {
        match self.mode {
            ContextMode::Document => ScanState::InString,
            ContextMode::Fragment => ScanState::Start,
        }
    }

    fn enter(&mut self, state: ScanState) {
        self.state = state;
        self.state_start = self.token_start;
    }

    /// Captures the `Start` token a fresh context begins with, if it is
    /// still pending.
    fn take_start(&mut self) -> Option<Token> {
        if self.matched == Some(TokenKind::Start) {
            self.capture_token()
        } else {
            None
        }
    }

    fn capture_token(&mut self) -> Option<Token> {
        let kind = self.matched.take()?;
        self.last_matched = Some(kind);
        Some(Token {
            kind,
            lexeme: std::mem::take(&mut self.lexeme),
            position: self.token_start,
            source: Arc::clone(&self.source),
            depth: self.depth,
        })
    }

    fn discard_token(&mut self) {
        self.matched = None;
        self.lexeme.clear();
    }

    /// Drops any in-progress match and returns to the start state.
    fn discard_context(&mut self) {
        self.discard_token();
        self.state = ScanState::Start;
        self.resume_state = ScanState::Start;
    }

    /// Called on the parent when a nested context is pushed on top of it.
    fn suspend(&mut self) {
        self.resume_state = self.state;
    }

    /// Called on the parent once the nested context above it is exhausted.
    fn restore(&mut self) {
        self.state = self.resume_state;
        self.discard_token();
    }

    fn unterminated(&self) -> ScanError {
        ScanError::UnterminatedToken {
            src: self.source.named(),
            span: (self.state_start.offset, 1).into(),
            state: self.state.describe().to_string(),
        }
    }

    fn unexpected(&self, found: char) -> ScanError {
        ScanError::UnexpectedCharacter {
            src: self.source.named(),
            span: (self.token_start.offset, found.len_utf8()).into(),
            found,
        }
    }
}

fn is_syllable_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn in_text(ctx: &ScanContext) -> bool {
    match ctx.mode {
        ContextMode::Document => ctx.state == ScanState::InString,
        ContextMode::Fragment => ctx.state == ScanState::Start,
    }
}

fn opens_invocation(ctx: &ScanContext, c: char) -> bool {
    c == '$' && ctx.peek_char() == Some('(')
}

// == Matchers ==
//
// Each matcher inspects the character just consumed and the context state.
// Returning `true` claims the character; `ctx.matched` is left `None` when
// more characters are needed to complete the token.

fn match_str_char(ctx: &mut ScanContext, c: char) -> bool {
    if ctx.state == ScanState::InEscape {
        let escaped = match c {
            'n' => '\n',
            't' => '\t',
            '"' | '\\' | '$' => c,
            _ => return false,
        };
        ctx.state = ctx.text_state();
        ctx.matched = Some(TokenKind::StrChar(escaped));
        return true;
    }
    if !in_text(ctx) || opens_invocation(ctx, c) {
        return false;
    }
    match c {
        '\\' => {
            ctx.state = ScanState::InEscape;
            ctx.matched = None;
        }
        '"' if ctx.mode == ContextMode::Document => {
            ctx.state = ScanState::Start;
            ctx.matched = Some(TokenKind::Quote);
        }
        _ => ctx.matched = Some(TokenKind::StrChar(c)),
    }
    true
}

fn match_invocation_syllable(ctx: &mut ScanContext, c: char) -> bool {
    if ctx.state != ScanState::InInvocation || !is_syllable_char(c) {
        return false;
    }
    ctx.matched = match ctx.peek_char() {
        Some(next) if is_syllable_char(next) => None,
        _ => Some(TokenKind::InvocationSyllable),
    };
    true
}

fn match_invocation_delimiter(ctx: &mut ScanContext, c: char) -> bool {
    if in_text(ctx) && opens_invocation(ctx, c) {
        ctx.scan_next_char();
        ctx.enter(ScanState::InInvocation);
        ctx.matched = Some(TokenKind::InvocationDelimiter(Delimiter::Open));
        return true;
    }
    if ctx.state != ScanState::InInvocation {
        return false;
    }
    match c {
        '/' => ctx.matched = Some(TokenKind::InvocationDelimiter(Delimiter::Separator)),
        ')' => {
            ctx.state = ctx.text_state();
            ctx.matched = Some(TokenKind::InvocationDelimiter(Delimiter::Close));
        }
        _ => return false,
    }
    true
}

fn match_start(ctx: &mut ScanContext, c: char) -> bool {
    if ctx.state == ScanState::InComment {
        ctx.matched = match ctx.peek_char() {
            None | Some('\n') => {
                ctx.state = ScanState::Start;
                Some(TokenKind::Discarded)
            }
            Some(_) => None,
        };
        return true;
    }
    if ctx.mode != ContextMode::Document || ctx.state != ScanState::Start {
        return false;
    }
    let punct = |p| Some(TokenKind::Punct(p));
    ctx.matched = match c {
        '{' => punct(Punct::LBrace),
        '}' => punct(Punct::RBrace),
        '[' => punct(Punct::LBracket),
        ']' => punct(Punct::RBracket),
        ':' => punct(Punct::Colon),
        ',' => punct(Punct::Comma),
        '"' => {
            ctx.enter(ScanState::InString);
            Some(TokenKind::Quote)
        }
        '/' if ctx.peek_char() == Some('/') => {
            ctx.scan_next_char();
            ctx.state = ScanState::InComment;
            match ctx.peek_char() {
                None | Some('\n') => {
                    ctx.state = ScanState::Start;
                    Some(TokenKind::Discarded)
                }
                Some(_) => None,
            }
        }
        c if c.is_whitespace() => match ctx.peek_char() {
            Some(next) if next.is_whitespace() => None,
            _ => Some(TokenKind::Discarded),
        },
        _ => return false,
    };
    true
}

/// A pull-based scanner over a stack of file contexts. Invocations are
/// followed by pushing the invoked file with [`Lexer::context_switch`]; once
/// it is exhausted scanning resumes in the enclosing file.
#[derive(Debug)]
pub struct Lexer {
    stack: Vec<ScanContext>,
    root: Arc<SourceFile>,
    max_depth: usize,
}

impl Lexer {
    pub fn new(path: &Path) -> Result<Self, ScanError> {
        Self::with_max_depth(path, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(path: &Path, max_depth: usize) -> Result<Self, ScanError> {
        Ok(Self::from_source(SourceFile::read(path)?, max_depth))
    }

    pub fn from_source(source: SourceFile, max_depth: usize) -> Self {
        let root = Arc::new(source);
        let mut context = ScanContext::new(Arc::clone(&root), ContextMode::Document, 1);
        // The root context's start token carries nothing for the parser.
        context.take_start();
        Self {
            stack: vec![context],
            root,
            max_depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Returns the next token, or an `Eof` token once every context is
    /// exhausted. An error is fatal to the file that produced it, but the
    /// stack keeps unwinding on later calls.
    pub fn scan(&mut self) -> Result<Token, ScanError> {
        while let Some(ctx) = self.stack.last_mut() {
            if ctx.at_end_of_file() {
                if ctx.state != ScanState::Start {
                    let err = ctx.unterminated();
                    warn!(
                        target: "cvdoc::lexer",
                        "Unterminated {} at end of {}.",
                        ctx.state.describe(),
                        ctx.path().display()
                    );
                    ctx.discard_context();
                    return Err(err);
                }
                match ctx.capture_token() {
                    Some(token) => return Ok(token),
                    None => {
                        self.pop_context();
                        continue;
                    }
                }
            }

            let Some(c) = ctx.scan_next_char() else {
                continue;
            };

            let claimed = match_str_char(ctx, c)
                || match_invocation_syllable(ctx, c)
                || match_invocation_delimiter(ctx, c)
                || match_start(ctx, c);

            if !claimed {
                let err = ctx.unexpected(c);
                ctx.discard_token();
                if matches!(ctx.state, ScanState::InInvocation | ScanState::InEscape) {
                    ctx.state = ctx.text_state();
                }
                return Err(err);
            }

            match ctx.matched {
                None => {}
                Some(TokenKind::Discarded) => ctx.discard_token(),
                Some(_) => {
                    if let Some(token) = ctx.capture_token() {
                        return Ok(token);
                    }
                }
            }
        }
        Ok(self.eof_token())
    }

    /// Kind of the most recently matched token in the active context.
    pub fn peek(&self) -> Option<TokenKind> {
        self.stack.last().and_then(|ctx| ctx.last_matched)
    }

    /// Pushes a fragment context for `path`; the following tokens come from
    /// that file until it is exhausted.
    pub fn context_switch(&mut self, path: &Path) -> Result<(), ScanError> {
        let key = canonical(path);
        if self.stack.iter().any(|ctx| canonical(ctx.path()) == key) {
            let mut cycle: Vec<String> = self
                .stack
                .iter()
                .skip_while(|ctx| canonical(ctx.path()) != key)
                .map(|ctx| ctx.path().to_string_lossy().to_string())
                .collect();
            cycle.push(path.to_string_lossy().to_string());
            return Err(ScanError::CircularInvocation {
                cycle: cycle.join(" -> "),
            });
        }
        if self.stack.len() >= self.max_depth {
            return Err(ScanError::InvocationTooDeep {
                path: path.to_string_lossy().to_string(),
                limit: self.max_depth,
            });
        }

        let source = Arc::new(SourceFile::read(path)?);
        if let Some(parent) = self.stack.last_mut() {
            parent.suspend();
        }
        let depth = self.stack.len() + 1;
        debug!(target: "cvdoc::lexer", "Entering {} at depth {depth}.", path.display());
        let mut context = ScanContext::new(source, ContextMode::Fragment, depth);
        context.take_start();
        self.stack.push(context);
        Ok(())
    }

    /// Scans every remaining token up to and including `Eof`.
    pub fn lex(&mut self) -> Result<Vec<Token>, ScanError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.scan()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn pop_context(&mut self) {
        if let Some(ctx) = self.stack.pop() {
            debug!(target: "cvdoc::lexer", "Leaving {}.", ctx.path().display());
        }
        if let Some(parent) = self.stack.last_mut() {
            parent.restore();
        }
    }

    fn eof_token(&self) -> Token {
        let text = &self.root.text;
        let (line, column) = text.chars().fold((1, 1), |(line, column), c| {
            if c == '\n' {
                (line + 1, 1)
            } else {
                (line, column + 1)
            }
        });
        Token {
            kind: TokenKind::Eof,
            lexeme: String::new(),
            position: Position::new(line, column, text.len()),
            source: Arc::clone(&self.root),
            depth: 0,
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_str(input: &str) -> Result<Vec<TokenKind>, ScanError> {
        let mut lexer = Lexer::from_source(SourceFile::new("test.cv", input), DEFAULT_MAX_DEPTH);
        Ok(lexer.lex()?.into_iter().map(|t| t.kind).collect())
    }

    fn assert_tokens(input: &str, expected: Vec<TokenKind>) {
        assert_eq!(lex_str(input).unwrap(), expected);
    }

    fn chars(s: &str) -> Vec<TokenKind> {
        s.chars().map(TokenKind::StrChar).collect()
    }

    #[test]
    fn test_eof() {
        assert_tokens("", vec![TokenKind::Eof]);
        assert_tokens("   \n\t", vec![TokenKind::Eof]);
    }

    #[test]
    fn test_punctuation() {
        assert_tokens(
            "{ } [ ] : ,",
            vec![
                TokenKind::Punct(Punct::LBrace),
                TokenKind::Punct(Punct::RBrace),
                TokenKind::Punct(Punct::LBracket),
                TokenKind::Punct(Punct::RBracket),
                TokenKind::Punct(Punct::Colon),
                TokenKind::Punct(Punct::Comma),
                TokenKind::Eof,
            ],
        );
    }

    #[test]
    fn test_string_chars_and_escapes() {
        let mut expected = vec![TokenKind::Quote];
        expected.extend(chars("a\"b\n$"));
        expected.push(TokenKind::Quote);
        expected.push(TokenKind::Eof);
        assert_tokens(r#""a\"b\n\$""#, expected);
    }

    #[test]
    fn test_comments_are_discarded() {
        assert_tokens(
            "// leading\n{ // trailing\n}// at eof",
            vec![
                TokenKind::Punct(Punct::LBrace),
                TokenKind::Punct(Punct::RBrace),
                TokenKind::Eof,
            ],
        );
    }

    #[test]
    fn test_invocation_tokens() {
        let mut lexer =
            Lexer::from_source(SourceFile::new("test.cv", r#""x$(a/b.txt)y""#), DEFAULT_MAX_DEPTH);
        let tokens = lexer.lex().unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Quote,
                TokenKind::StrChar('x'),
                TokenKind::InvocationDelimiter(Delimiter::Open),
                TokenKind::InvocationSyllable,
                TokenKind::InvocationDelimiter(Delimiter::Separator),
                TokenKind::InvocationSyllable,
                TokenKind::InvocationDelimiter(Delimiter::Close),
                TokenKind::StrChar('y'),
                TokenKind::Quote,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[3].lexeme, "a");
        assert_eq!(tokens[5].lexeme, "b.txt");
    }

    #[test]
    fn test_dollar_without_paren_is_text() {
        let mut expected = vec![TokenKind::Quote];
        expected.extend(chars("$5"));
        expected.extend([TokenKind::Quote, TokenKind::Eof]);
        assert_tokens(r#""$5""#, expected);
    }

    #[test]
    fn test_positions() {
        let mut lexer =
            Lexer::from_source(SourceFile::new("test.cv", "{\n  \"a\"\n}"), DEFAULT_MAX_DEPTH);
        let tokens = lexer.lex().unwrap();
        assert_eq!(tokens[0].position, Position::new(1, 1, 0));
        assert_eq!(tokens[1].position, Position::new(2, 3, 4));
        assert_eq!(tokens[2].position, Position::new(2, 4, 5));
        assert_eq!(tokens[4].position, Position::new(3, 1, 8));
    }

    #[test]
    fn test_unterminated_string_is_reported_then_unwinds() {
        let mut lexer = Lexer::from_source(SourceFile::new("test.cv", "\"abc"), DEFAULT_MAX_DEPTH);
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::Quote);
        for c in "abc".chars() {
            assert_eq!(lexer.scan().unwrap().kind, TokenKind::StrChar(c));
        }
        assert!(matches!(
            lexer.scan(),
            Err(ScanError::UnterminatedToken { ref state, .. }) if state == "string"
        ));
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::Eof);
        assert_eq!(lexer.depth(), 0);
    }

    #[test]
    fn test_unknown_escape_is_rejected() {
        let mut lexer = Lexer::from_source(SourceFile::new("test.cv", r#""a\qb""#), DEFAULT_MAX_DEPTH);
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::Quote);
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::StrChar('a'));
        assert!(matches!(
            lexer.scan(),
            Err(ScanError::UnexpectedCharacter { found: 'q', .. })
        ));
        // scanning resumes inside the string
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::StrChar('b'));
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::Quote);
    }

    #[test]
    fn test_unexpected_character() {
        let err = lex_str("{ x }").unwrap_err();
        assert!(matches!(err, ScanError::UnexpectedCharacter { found: 'x', .. }));
    }

    #[test]
    fn test_peek_reports_last_match() {
        let mut lexer = Lexer::from_source(SourceFile::new("test.cv", "[ ]"), DEFAULT_MAX_DEPTH);
        assert_eq!(lexer.peek(), Some(TokenKind::Start));
        lexer.scan().unwrap();
        assert_eq!(lexer.peek(), Some(TokenKind::Punct(Punct::LBracket)));
    }
}
