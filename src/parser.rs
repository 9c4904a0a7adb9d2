use crate::ast::*;
use crate::error::{CompileError, ParserError};
use crate::lexer::{Delimiter, Lexer, Punct, SourceFile, Token, TokenKind, DEFAULT_MAX_DEPTH};
use std::mem::discriminant;
use std::path::Path;

/// Key lifted out of an item's props into [`Item::reference`].
pub const REFERENCE_KEY: &str = "ref";

/// A recursive descent parser for CV documents, pulling tokens from a
/// [`Lexer`] one at a time and splicing invoked fragments as it goes.
#[derive(Debug)]
pub struct Parser {
    lexer: Lexer,
    current: Token,
}

/// Parses every item of the document at `path`.
pub fn parse_all(path: &Path) -> Result<Vec<Item>, CompileError> {
    Parser::new(path)?.parse_document()
}

/// Lifts a `"ref"` prop into the item. Only the first one, holding a
/// string, becomes the reference; anything else is kept as a fault.
fn attach_reference(item: &mut Item, prop: Prop, seen: bool) {
    let position = prop.position;
    if seen {
        item.reference_faults
            .push(ReferenceFault::Repeated { position });
        return;
    }
    match prop.value {
        PropValue::Str(text) => item.reference = Some(text),
        other => item.reference_faults.push(ReferenceFault::NotAString {
            shape: other.shape(),
            position,
        }),
    }
}

impl Parser {
    pub fn new(path: &Path) -> Result<Self, CompileError> {
        Self::with_max_depth(path, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(path: &Path, max_depth: usize) -> Result<Self, CompileError> {
        Self::from_lexer(Lexer::with_max_depth(path, max_depth)?)
    }

    pub fn from_source(source: SourceFile) -> Result<Self, CompileError> {
        Self::from_lexer(Lexer::from_source(source, DEFAULT_MAX_DEPTH))
    }

    fn from_lexer(mut lexer: Lexer) -> Result<Self, CompileError> {
        let current = lexer.scan()?;
        Ok(Self { lexer, current })
    }

    // === Main Parsing Methods ===

    /// Document ::= "{" [ Section { "," Section } [ "," ] ] "}"
    pub fn parse_document(&mut self) -> Result<Vec<Item>, CompileError> {
        let mut items = Vec::new();
        self.expect(TokenKind::Punct(Punct::LBrace), "'{'")?;
        if !self.check(TokenKind::Punct(Punct::RBrace)) {
            loop {
                self.parse_section(&mut items)?;
                if !self.match_token(TokenKind::Punct(Punct::Comma))? {
                    break;
                }
                if self.check(TokenKind::Punct(Punct::RBrace)) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Punct(Punct::RBrace), "'}'")?;
        if !self.check(TokenKind::Eof) {
            return self.err_unexpected("end of file");
        }
        Ok(items)
    }

    /// Section ::= Text ":" "[" [ Item { "," Item } [ "," ] ] "]"
    fn parse_section(&mut self, items: &mut Vec<Item>) -> Result<(), CompileError> {
        let section = self.parse_text()?;
        self.expect(TokenKind::Punct(Punct::Colon), "':' after section name")?;
        self.expect(TokenKind::Punct(Punct::LBracket), "'[' to open the section")?;
        if !self.check(TokenKind::Punct(Punct::RBracket)) {
            loop {
                items.push(self.parse_item(section.clone())?);
                if !self.match_token(TokenKind::Punct(Punct::Comma))? {
                    break;
                }
                if self.check(TokenKind::Punct(Punct::RBracket)) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Punct(Punct::RBracket), "']' to close the section")
    }

    /// Item ::= "{" [ Prop { "," Prop } [ "," ] ] "}"
    fn parse_item(&mut self, section: Text) -> Result<Item, CompileError> {
        let start = self.current.clone();
        self.expect(TokenKind::Punct(Punct::LBrace), "'{' to open an item")?;
        let mut item = Item::new(section, start.position, start.source.path.clone());
        let mut seen_reference = false;
        if !self.check(TokenKind::Punct(Punct::RBrace)) {
            loop {
                let prop = self.parse_prop()?;
                if prop.key.get_string() == REFERENCE_KEY {
                    attach_reference(&mut item, prop, seen_reference);
                    seen_reference = true;
                } else {
                    item.properties.push(prop);
                }
                if !self.match_token(TokenKind::Punct(Punct::Comma))? {
                    break;
                }
                if self.check(TokenKind::Punct(Punct::RBrace)) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Punct(Punct::RBrace), "'}' to close the item")?;
        Ok(item)
    }

    /// Prop ::= Text ":" Value
    fn parse_prop(&mut self) -> Result<Prop, CompileError> {
        let key = self.parse_text()?;
        self.expect(TokenKind::Punct(Punct::Colon), "':' after prop key")?;
        let value = self.parse_value()?;
        Ok(Prop::new(key, value))
    }

    /// Value ::= Text | Sequence | Mapping
    fn parse_value(&mut self) -> Result<PropValue, CompileError> {
        match self.current.kind {
            TokenKind::Quote => self.parse_text().map(PropValue::Str),
            TokenKind::Punct(Punct::LBracket) => self.parse_sequence().map(PropValue::Seq),
            TokenKind::Punct(Punct::LBrace) => self.parse_mapping().map(PropValue::Map),
            _ => self.err_unexpected("a string, sequence or mapping"),
        }
    }

    /// Sequence ::= "[" [ Text { "," Text } [ "," ] ] "]"
    fn parse_sequence(&mut self) -> Result<Vec<Text>, CompileError> {
        self.expect(TokenKind::Punct(Punct::LBracket), "'['")?;
        let mut values = Vec::new();
        if !self.check(TokenKind::Punct(Punct::RBracket)) {
            loop {
                values.push(self.parse_text()?);
                if !self.match_token(TokenKind::Punct(Punct::Comma))? {
                    break;
                }
                if self.check(TokenKind::Punct(Punct::RBracket)) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Punct(Punct::RBracket), "']'")?;
        Ok(values)
    }

    /// Mapping ::= "{" [ Text ":" Text { "," Text ":" Text } [ "," ] ] "}"
    fn parse_mapping(&mut self) -> Result<Vec<(Text, Text)>, CompileError> {
        self.expect(TokenKind::Punct(Punct::LBrace), "'{'")?;
        let mut pairs = Vec::new();
        if !self.check(TokenKind::Punct(Punct::RBrace)) {
            loop {
                let key = self.parse_text()?;
                self.expect(TokenKind::Punct(Punct::Colon), "':' after mapping key")?;
                let value = self.parse_text()?;
                pairs.push((key, value));
                if !self.match_token(TokenKind::Punct(Punct::Comma))? {
                    break;
                }
                if self.check(TokenKind::Punct(Punct::RBrace)) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Punct(Punct::RBrace), "'}'")?;
        Ok(pairs)
    }

    /// Text ::= '"' { Char | Invocation } '"'
    fn parse_text(&mut self) -> Result<Text, CompileError> {
        let position = self.current.position;
        self.expect(TokenKind::Quote, "a string")?;
        let mut text = Text::default().at(position);
        loop {
            match self.current.kind {
                TokenKind::StrChar(c) => {
                    text.push_char(c);
                    self.advance()?;
                }
                TokenKind::InvocationDelimiter(Delimiter::Open) => {
                    let segment = self.parse_invocation()?;
                    text.segments.push(segment);
                }
                TokenKind::Quote => {
                    self.advance()?;
                    return Ok(text);
                }
                _ => return self.err_unexpected("string contents or a closing '\"'"),
            }
        }
    }

    /// Invocation ::= "$(" Syllable { "/" Syllable } ")"
    ///
    /// The invoked file is pushed onto the lexer as soon as the closing
    /// delimiter is seen; every token deeper than the invocation belongs to
    /// its text.
    fn parse_invocation(&mut self) -> Result<Segment, CompileError> {
        self.expect(
            TokenKind::InvocationDelimiter(Delimiter::Open),
            "'$(' to open an invocation",
        )?;
        let mut syllables = Vec::new();
        loop {
            if !self.check(TokenKind::InvocationSyllable) {
                return self.err_unexpected("a path component");
            }
            syllables.push(self.current.lexeme.clone());
            self.advance()?;
            if !self.match_token(TokenKind::InvocationDelimiter(Delimiter::Separator))? {
                break;
            }
        }
        if !self.check(TokenKind::InvocationDelimiter(Delimiter::Close)) {
            return self.err_unexpected("')' to close the invocation");
        }

        let target = syllables.join("/");
        let close = self.current.clone();
        let base = close.source.path.parent().unwrap_or_else(|| Path::new("."));
        self.lexer.context_switch(&base.join(&target))?;
        self.advance()?;

        let mut text = Text::default();
        while self.current.depth > close.depth {
            match self.current.kind {
                TokenKind::StrChar(c) => {
                    text.push_char(c);
                    self.advance()?;
                }
                TokenKind::InvocationDelimiter(Delimiter::Open) => {
                    let nested = self.parse_invocation()?;
                    text.segments.push(nested);
                }
                _ => return self.err_unexpected("fragment text"),
            }
        }
        // A fragment file's final line break is not part of its text.
        let mut text = text.get_string();
        if text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }
        Ok(Segment::Invocation { target, text })
    }

    // === Token Helper Methods ===

    fn advance(&mut self) -> Result<(), CompileError> {
        if self.current.kind != TokenKind::Eof {
            self.current = self.lexer.scan()?;
        }
        Ok(())
    }

    fn check(&self, kind: TokenKind) -> bool {
        discriminant(&self.current.kind) == discriminant(&kind)
            && match (self.current.kind, kind) {
                (TokenKind::Punct(a), TokenKind::Punct(b)) => a == b,
                (TokenKind::InvocationDelimiter(a), TokenKind::InvocationDelimiter(b)) => a == b,
                _ => true,
            }
    }

    fn match_token(&mut self, kind: TokenKind) -> Result<bool, CompileError> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<(), CompileError> {
        if self.check(kind) {
            self.advance()
        } else {
            self.err_unexpected(expected)
        }
    }

    fn err_unexpected<T>(&self, expected: &str) -> Result<T, CompileError> {
        let token = &self.current;
        let span = (token.position.offset, token.span_len()).into();
        let err = if token.kind == TokenKind::Eof {
            ParserError::UnexpectedEof {
                src: token.source.named(),
                span: (token.position.offset.saturating_sub(1), 0).into(),
                expected: expected.to_string(),
            }
        } else {
            ParserError::UnexpectedToken {
                src: token.source.named(),
                span,
                expected: expected.to_string(),
            }
        };
        Err(err.into())
    }
}
