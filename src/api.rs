use crate::analyzer::SemanticAnalyzer;
use crate::ast::Item;
use crate::error::{CompileError, SemanticError};
use crate::lexer::DEFAULT_MAX_DEPTH;
use crate::parser::Parser;
use crate::resolver::{FileLoader, ReferenceResolver};
use crate::serialization::{to_value, Value};
use log::info;
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};

/// Settings for one compilation.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory that `<basename>::<id>` references resolve against.
    /// Defaults to the directory of the root document.
    pub base_dir: Option<PathBuf>,
    /// Upper bound on open files while following invocations.
    pub max_invocation_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            base_dir: None,
            max_invocation_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// The outcome of compiling a document: every item that survived analysis,
/// plus the diagnostics of those that did not.
#[derive(Debug)]
pub struct Compilation {
    pub items: Vec<Item>,
    pub diagnostics: Vec<SemanticError>,
    pub rejected: usize,
}

impl Serialize for Compilation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl Compilation {
    /// True when no item was rejected and nothing was reported.
    pub fn is_clean(&self) -> bool {
        self.rejected == 0 && self.diagnostics.is_empty()
    }

    pub fn items_in<'a>(&'a self, section: &'a str) -> impl Iterator<Item = &'a Item> + 'a {
        self.items
            .iter()
            .filter(move |item| item.section.get_string() == section)
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(&self.items)
    }

    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self)
    }

    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self)
    }
}

/// Parses the document at `path` and analyzes every item in it, resolving
/// references along the way.
///
/// # Errors
///
/// Returns a `CompileError` if the root document cannot be scanned or
/// parsed. Problems with individual items are not errors; they are
/// collected in [`Compilation::diagnostics`].
pub fn compile(path: &Path, options: &Options) -> Result<Compilation, CompileError> {
    let items = Parser::with_max_depth(path, options.max_invocation_depth)?.parse_document()?;

    let base_dir = options.base_dir.clone().unwrap_or_else(|| {
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let resolver = ReferenceResolver::new(base_dir)
        .with_loader(FileLoader::new(options.max_invocation_depth));
    let mut analyzer = SemanticAnalyzer::with_resolver(resolver);

    let total = items.len();
    let items: Vec<Item> = items
        .into_iter()
        .filter_map(|item| analyzer.process(item))
        .collect();
    let rejected = total - items.len();
    info!(
        "Compiled {}: {} item(s) accepted, {rejected} rejected.",
        path.display(),
        items.len()
    );

    Ok(Compilation {
        items,
        diagnostics: analyzer.take_diagnostics(),
        rejected,
    })
}
