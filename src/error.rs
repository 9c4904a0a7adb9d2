use crate::ast::{ItemKind, Position, ReferenceFault, Shape};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CompileError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parser(#[from] ParserError),
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ScanError {
    #[error("Unterminated token at end of file")]
    #[diagnostic(
        code(lexer::unterminated_token),
        help("A string or invocation was still open when the file ended.")
    )]
    UnterminatedToken {
        #[source_code]
        src: NamedSource<String>,
        #[label("{state} started here and never closed")]
        span: SourceSpan,
        state: String,
    },

    #[error("Unexpected character '{found}'")]
    #[diagnostic(code(lexer::unexpected_character))]
    UnexpectedCharacter {
        #[source_code]
        src: NamedSource<String>,
        #[label("not valid here")]
        span: SourceSpan,
        found: char,
    },

    #[error("Circular invocation detected: {cycle}")]
    #[diagnostic(
        code(lexer::circular_invocation),
        help("A fragment cannot invoke itself, directly or through other fragments.")
    )]
    CircularInvocation { cycle: String },

    #[error("Invocation of '{path}' exceeds the nesting limit of {limit}")]
    #[diagnostic(code(lexer::invocation_too_deep))]
    InvocationTooDeep { path: String, limit: usize },

    #[error("Cannot read '{path}': {reason}")]
    #[diagnostic(code(lexer::io))]
    Io { path: String, reason: String },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ParserError {
    #[error("Unexpected token")]
    #[diagnostic(
        code(parser::unexpected_token),
        help("The parser found a token it did not expect in this position.")
    )]
    UnexpectedToken {
        #[source_code]
        src: NamedSource<String>,
        #[label("Expected {expected}, but found this")]
        span: SourceSpan,
        expected: String,
    },

    #[error("Unexpected end of file")]
    #[diagnostic(
        code(parser::unexpected_eof),
        help("The file ended unexpectedly. The parser expected more tokens.")
    )]
    UnexpectedEof {
        #[source_code]
        src: NamedSource<String>,
        #[label("File ended unexpectedly here")]
        span: SourceSpan,
        expected: String,
    },
}

/// Non-fatal findings of the semantic analyzer. Each one rejects the item or
/// reference it names; analysis carries on with the next unit of work.
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum SemanticError {
    // == Keys and shapes ==
    #[error("Invalid prop key {key} in item {item}.")]
    #[diagnostic(code(semantic::unknown_key))]
    UnknownKey { key: String, item: String },

    #[error("Duplicate prop key {key} in item {item}, previously found {previous} other(s), first at {first}.")]
    #[diagnostic(code(semantic::duplicate_key))]
    DuplicateKey {
        key: String,
        item: String,
        previous: usize,
        first: Position,
    },

    #[error("Prop key {key} in item {item} expected a value of type {expected} instead of {found}.")]
    #[diagnostic(code(semantic::shape_mismatch))]
    ShapeMismatch {
        key: String,
        item: String,
        expected: Shape,
        found: Shape,
    },

    #[error("Item {item} has an undeterminable type due to an invalid combination of props.")]
    #[diagnostic(
        code(semantic::undeterminable_kind),
        help("Every item must carry exactly the required props of one kind, plus any of its optional props.")
    )]
    UndeterminableKind { item: String },

    // == Labels ==
    #[error("Duplicate label {label} in item {item}, previously found {previous} other(s).")]
    #[diagnostic(code(semantic::duplicate_label))]
    DuplicateLabel {
        label: String,
        item: String,
        previous: usize,
    },

    #[error("Label key {label} in item {item} cannot contain an invocation.")]
    #[diagnostic(code(semantic::invocation_in_label))]
    InvocationInLabelKey { label: String, item: String },

    #[error("Label value of {label} in item {item} cannot contain an invocation.")]
    #[diagnostic(code(semantic::invocation_in_label))]
    InvocationInLabelValue { label: String, item: String },

    // == Registration ==
    #[error("Item {item} cannot belong to a nameless section.")]
    #[diagnostic(code(semantic::nameless_section))]
    NamelessSection { item: String },

    #[error("Section name of item {item} cannot contain an invocation.")]
    #[diagnostic(code(semantic::invocation_in_section))]
    InvocationInSection { item: String },

    #[error("Type mismatch between item {item} and section \"{section}\", which has previously accepted items of type {bound}.")]
    #[diagnostic(code(semantic::section_kind_mismatch))]
    SectionKindMismatch {
        item: String,
        section: String,
        bound: ItemKind,
    },

    // == References ==
    #[error("Item {item} has an unusable reference: {fault}.")]
    #[diagnostic(
        code(semantic::unusable_reference),
        help("An item carries at most one \"ref\" key, and its value is a string.")
    )]
    UnusableReference { item: String, fault: ReferenceFault },

    #[error("Reference of item {item} cannot contain an invocation.")]
    #[diagnostic(code(semantic::invocation_in_reference))]
    InvocationInReference { item: String },

    #[error("Item {item} is not of the form \"<FILE_BASENAME_PATH>::<ITEM_IDENTIFIER>\".")]
    #[diagnostic(code(semantic::malformed_reference))]
    MalformedReference { item: String },

    #[error("Reference of item {item} has a blank file or identifier part.")]
    #[diagnostic(code(semantic::blank_reference_part))]
    BlankReferencePart { item: String },

    #[error("\"{identifier}\" referenced by item {item} is not a valid identifier.")]
    #[diagnostic(
        code(semantic::invalid_identifier),
        help("Identifiers start with a letter or '_' and continue with letters, digits, '_' or '-'.")
    )]
    InvalidIdentifier { identifier: String, item: String },

    #[error("Reference \"{file}::{identifier}\" of item {item} does not point to an existing file.")]
    #[diagnostic(code(semantic::missing_file))]
    MissingFile {
        file: String,
        identifier: String,
        item: String,
    },

    #[error("File reference \"{file}\" of item {item} points to an invalid file.")]
    #[diagnostic(code(semantic::invalid_file))]
    InvalidFile { file: String, item: String },

    #[error("Referenced file \"{file}\" of item {item} could not be parsed.")]
    #[diagnostic(code(semantic::unreadable_file))]
    UnreadableFile {
        file: String,
        item: String,
        #[source]
        #[diagnostic_source]
        cause: CompileError,
    },

    #[error("Item {item} does not exist in referenced file \"{file}\".")]
    #[diagnostic(code(semantic::missing_identifier))]
    MissingIdentifier { file: String, item: String },

    #[error("Identifier of item {item} cannot contain an invocation.")]
    #[diagnostic(code(semantic::invocation_in_identifier))]
    InvocationInIdentifier { item: String },

    #[error("Item {item} in a referenced file has no identifier.")]
    #[diagnostic(code(semantic::blank_identifier))]
    BlankIdentifier { item: String },

    #[error("Duplicate identifier \"{identifier}\" in file \"{file}\" at {position}, first defined at {first}.")]
    #[diagnostic(code(semantic::duplicate_identifier))]
    DuplicateIdentifier {
        identifier: String,
        file: String,
        position: Position,
        first: Position,
    },
}

/// Semantic findings collected over an analysis run, each one logged as it
/// is reported.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    reported: Vec<SemanticError>,
}

impl Diagnostics {
    pub fn report(&mut self, err: SemanticError) {
        match std::error::Error::source(&err) {
            Some(cause) => log::error!(target: "cvdoc::semantic", "{err} Caused by: {cause}"),
            None => log::error!(target: "cvdoc::semantic", "{err}"),
        }
        self.reported.push(err);
    }

    pub fn len(&self) -> usize {
        self.reported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }

    pub fn as_slice(&self) -> &[SemanticError] {
        &self.reported
    }

    pub fn take(&mut self) -> Vec<SemanticError> {
        std::mem::take(&mut self.reported)
    }
}
