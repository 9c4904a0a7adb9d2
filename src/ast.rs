use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::PathBuf;

/// A location in a source file. `line` and `column` are 1-based, `offset` is
/// the byte offset used for diagnostic spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} position {}", self.line, self.column)
    }
}

/// One piece of a textual field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Text spliced in from the fragment file named by `target`.
    Invocation { target: String, text: String },
}

/// A string-or-invocation value. Any textual field in a document may embed
/// invocations, which the parser has already expanded by the time the value
/// reaches the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Text {
    pub segments: Vec<Segment>,
    pub position: Position,
}

impl Text {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Literal(value.into())],
            position: Position::default(),
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn contains_invocation(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Invocation { .. }))
    }

    /// The literal text with every invocation replaced by its resolved text.
    pub fn get_string(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Invocation { text, .. } => out.push_str(text),
            }
        }
        out
    }

    pub fn is_blank(&self) -> bool {
        self.get_string().trim().is_empty()
    }

    /// Appends a literal char, merging with a trailing literal segment.
    pub(crate) fn push_char(&mut self, c: char) {
        if let Some(Segment::Literal(s)) = self.segments.last_mut() {
            s.push(c);
        } else {
            self.segments.push(Segment::Literal(c.to_string()));
        }
    }
}

impl Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => write!(f, "{s}")?,
                Segment::Invocation { target, .. } => write!(f, "$({target})")?,
            }
        }
        write!(f, "\"")
    }
}

/// The value shapes a property can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Str,
    Seq,
    Map,
}

impl Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Str => write!(f, "string"),
            Shape::Seq => write!(f, "sequence"),
            Shape::Map => write!(f, "mapping"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    Str(Text),
    Seq(Vec<Text>),
    /// Pairs are kept in source order and may repeat keys; the analyzer
    /// reports duplicates instead of the parser dropping them.
    Map(Vec<(Text, Text)>),
}

impl PropValue {
    pub fn shape(&self) -> Shape {
        match self {
            PropValue::Str(_) => Shape::Str,
            PropValue::Seq(_) => Shape::Seq,
            PropValue::Map(_) => Shape::Map,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prop {
    pub key: Text,
    pub value: PropValue,
    pub position: Position,
}

impl Prop {
    pub fn new(key: Text, value: PropValue) -> Self {
        let position = key.position;
        Self {
            key,
            value,
            position,
        }
    }

    pub fn kind(&self) -> Shape {
        self.value.shape()
    }
}

/// The closed set of structural item categories, in classification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    CvParagraph,
    CvSkills,
    CvEntries,
    CvHonors,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::CvParagraph,
        ItemKind::CvSkills,
        ItemKind::CvEntries,
        ItemKind::CvHonors,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::CvParagraph => "CVPARAGRAPH",
            ItemKind::CvSkills => "CVSKILLS",
            ItemKind::CvEntries => "CVENTRIES",
            ItemKind::CvHonors => "CVHONORS",
        }
    }
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A `"ref"` entry that could not be lifted into [`Item::reference`]. The
/// item keeps parsing; the fault rejects it later, on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFault {
    /// A second `"ref"` key in the same item.
    Repeated { position: Position },
    /// A `"ref"` whose value is not a string.
    NotAString { shape: Shape, position: Position },
}

impl Display for ReferenceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceFault::Repeated { position } => {
                write!(f, "repeated \"ref\" key at {position}")
            }
            ReferenceFault::NotAString { shape, position } => {
                write!(f, "\"ref\" at {position} holds a {shape} instead of a string")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub section: Text,
    pub reference: Option<Text>,
    pub reference_faults: Vec<ReferenceFault>,
    pub kind: Option<ItemKind>,
    pub labels: Option<BTreeMap<String, String>>,
    pub properties: Vec<Prop>,
    pub position: Position,
    /// The document the item was parsed from.
    pub path: PathBuf,
}

impl Item {
    pub fn new(section: Text, position: Position, path: PathBuf) -> Self {
        Self {
            section,
            reference: None,
            reference_faults: Vec::new(),
            kind: None,
            labels: None,
            properties: Vec::new(),
            position,
            path,
        }
    }

    pub fn is_analyzed(&self) -> bool {
        self.kind.is_some() && self.labels.is_some()
    }
}

impl Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.section)?;
        if let Some(reference) = &self.reference {
            write!(f, " -> {reference}")?;
        }
        write!(
            f,
            " at {}:{}:{}",
            self.path.display(),
            self.position.line,
            self.position.column
        )
    }
}
