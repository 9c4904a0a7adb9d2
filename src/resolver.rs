use crate::ast::Item;
use crate::error::{CompileError, Diagnostics, SemanticError};
use crate::lexer::DEFAULT_MAX_DEPTH;
use crate::parser::Parser;
use log::debug;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Separates the file part from the identifier part of a reference.
pub const REFERENCE_SEPARATOR: &str = "::";

/// Where referenced documents come from.
pub trait ItemLoader {
    fn exists(&self, path: &Path) -> bool;
    fn load(&mut self, path: &Path) -> Result<Vec<Item>, CompileError>;
}

/// Loads referenced documents from disk with the [`Parser`].
#[derive(Debug, Clone)]
pub struct FileLoader {
    max_depth: usize,
}

impl FileLoader {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl Default for FileLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ItemLoader for FileLoader {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn load(&mut self, path: &Path) -> Result<Vec<Item>, CompileError> {
        Parser::with_max_depth(path, self.max_depth)?.parse_document()
    }
}

pub trait IdentifierVerifier {
    fn verify(&self, identifier: &str) -> bool;
}

/// Accepts an ASCII letter or `_`, followed by ASCII alphanumerics, `_` or `-`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxVerifier;

impl IdentifierVerifier for SyntaxVerifier {
    fn verify(&self, identifier: &str) -> bool {
        let mut chars = identifier.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// Items of a parsed file, keyed by normalized identifier.
    Valid(HashMap<String, Item>),
    /// The file could not be parsed; later references fail fast.
    Invalid,
}

fn normalize(identifier: &str) -> String {
    identifier.trim().to_string()
}

/// Resolves `<basename>::<identifier>` references against `<basename>.json`
/// files under `base_dir`, parsing each file at most once.
pub struct ReferenceResolver {
    base_dir: PathBuf,
    loader: Box<dyn ItemLoader>,
    verifier: Box<dyn IdentifierVerifier>,
    cache: HashMap<PathBuf, CacheEntry>,
}

impl ReferenceResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            loader: Box::new(FileLoader::default()),
            verifier: Box::new(SyntaxVerifier),
            cache: HashMap::new(),
        }
    }

    pub fn with_loader(mut self, loader: impl ItemLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_verifier(mut self, verifier: impl IdentifierVerifier + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn cached(&self, path: &Path) -> Option<&CacheEntry> {
        self.cache.get(path)
    }

    pub fn file_path(&self, basename: &str) -> PathBuf {
        self.base_dir.join(format!("{basename}.json"))
    }

    /// Returns a copy of the referenced item carrying `item`'s section,
    /// position and path, or `None` after reporting why it cannot be
    /// resolved. The copy is unanalyzed.
    pub fn fetch(&mut self, item: &Item, diagnostics: &mut Diagnostics) -> Option<Item> {
        let Some(reference) = &item.reference else {
            diagnostics.report(SemanticError::MalformedReference {
                item: item.to_string(),
            });
            return None;
        };
        if reference.contains_invocation() {
            diagnostics.report(SemanticError::InvocationInReference {
                item: item.to_string(),
            });
            return None;
        }

        let raw = reference.get_string();
        let parts: Vec<&str> = raw.split(REFERENCE_SEPARATOR).collect();
        let [file, identifier] = parts.as_slice() else {
            diagnostics.report(SemanticError::MalformedReference {
                item: item.to_string(),
            });
            return None;
        };
        let (file, identifier) = (file.trim(), normalize(identifier));
        if file.is_empty() || identifier.is_empty() {
            diagnostics.report(SemanticError::BlankReferencePart {
                item: item.to_string(),
            });
            return None;
        }
        if !self.verifier.verify(&identifier) {
            diagnostics.report(SemanticError::InvalidIdentifier {
                identifier,
                item: item.to_string(),
            });
            return None;
        }

        let path = self.file_path(file);
        if !self.loader.exists(&path) {
            diagnostics.report(SemanticError::MissingFile {
                file: path.to_string_lossy().to_string(),
                identifier,
                item: item.to_string(),
            });
            return None;
        }

        if self.cache.contains_key(&path) {
            debug!(target: "cvdoc::semantic", "Cache hit for item {item}.");
        } else {
            debug!(target: "cvdoc::semantic", "Cache miss for item {item}.");
            self.populate(&path, item, diagnostics);
        }

        match self.cache.get(&path) {
            Some(CacheEntry::Valid(items)) => match items.get(&identifier) {
                Some(cached) => Some(Item {
                    section: item.section.clone(),
                    reference: cached.reference.clone(),
                    reference_faults: Vec::new(),
                    kind: None,
                    labels: None,
                    properties: cached.properties.clone(),
                    position: item.position,
                    path: item.path.clone(),
                }),
                None => {
                    diagnostics.report(SemanticError::MissingIdentifier {
                        file: path.to_string_lossy().to_string(),
                        item: item.to_string(),
                    });
                    None
                }
            },
            Some(CacheEntry::Invalid) | None => {
                diagnostics.report(SemanticError::InvalidFile {
                    file: path.to_string_lossy().to_string(),
                    item: item.to_string(),
                });
                None
            }
        }
    }

    /// Parses `path` once and caches its items by identifier. Items that
    /// cannot be addressed are reported and skipped; the first of several
    /// items sharing an identifier wins.
    fn populate(&mut self, path: &Path, requester: &Item, diagnostics: &mut Diagnostics) {
        let file = path.to_string_lossy().to_string();
        let parsed = match self.loader.load(path) {
            Ok(parsed) => parsed,
            Err(cause) => {
                diagnostics.report(SemanticError::UnreadableFile {
                    file,
                    item: requester.to_string(),
                    cause,
                });
                self.cache.insert(path.to_path_buf(), CacheEntry::Invalid);
                return;
            }
        };

        let mut items: HashMap<String, Item> = HashMap::new();
        for parsed_item in parsed {
            if !parsed_item.reference_faults.is_empty() {
                for fault in &parsed_item.reference_faults {
                    diagnostics.report(SemanticError::UnusableReference {
                        item: parsed_item.to_string(),
                        fault: *fault,
                    });
                }
                continue;
            }
            let identifier = match &parsed_item.reference {
                Some(id) if id.contains_invocation() => {
                    diagnostics.report(SemanticError::InvocationInIdentifier {
                        item: parsed_item.to_string(),
                    });
                    continue;
                }
                Some(id) => normalize(&id.get_string()),
                None => String::new(),
            };
            if identifier.is_empty() {
                diagnostics.report(SemanticError::BlankIdentifier {
                    item: parsed_item.to_string(),
                });
                continue;
            }
            if !self.verifier.verify(&identifier) {
                diagnostics.report(SemanticError::InvalidIdentifier {
                    identifier,
                    item: parsed_item.to_string(),
                });
                continue;
            }
            match items.entry(identifier) {
                Entry::Occupied(first) => {
                    diagnostics.report(SemanticError::DuplicateIdentifier {
                        identifier: first.key().clone(),
                        file: file.clone(),
                        position: parsed_item.position,
                        first: first.get().position,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(parsed_item);
                }
            }
        }
        debug!(target: "cvdoc::semantic", "Cached {} item(s) from {file}.", items.len());
        self.cache.insert(path.to_path_buf(), CacheEntry::Valid(items));
    }
}
