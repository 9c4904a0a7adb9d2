use crate::ast::{Item, ItemKind, Position, Prop, PropValue};
use crate::error::{Diagnostics, SemanticError};
use crate::resolver::ReferenceResolver;
use crate::schema;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

/// Validates, classifies and registers items for one compilation.
///
/// The namespace registry (section name to kind) and the reference cache
/// live as long as the analyzer; a fresh analyzer starts from empty ones.
pub struct SemanticAnalyzer {
    registry: HashMap<String, ItemKind>,
    resolver: ReferenceResolver,
    diagnostics: Diagnostics,
}

impl SemanticAnalyzer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_resolver(ReferenceResolver::new(base_dir))
    }

    pub fn with_resolver(resolver: ReferenceResolver) -> Self {
        Self {
            registry: HashMap::new(),
            resolver,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn section_kind(&self, section: &str) -> Option<ItemKind> {
        self.registry.get(section).copied()
    }

    pub fn registry(&self) -> &HashMap<String, ItemKind> {
        &self.registry
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn diagnostics(&self) -> &[SemanticError] {
        self.diagnostics.as_slice()
    }

    pub fn take_diagnostics(&mut self) -> Vec<SemanticError> {
        self.diagnostics.take()
    }

    /// Resolves `item` first when it is a reference, then analyzes it. An
    /// item whose `"ref"` entries are unusable is rejected outright.
    pub fn process(&mut self, item: Item) -> Option<Item> {
        if !item.reference_faults.is_empty() {
            for fault in &item.reference_faults {
                self.diagnostics.report(SemanticError::UnusableReference {
                    item: item.to_string(),
                    fault: *fault,
                });
            }
            return None;
        }
        if item.reference.is_some() {
            let fetched = self.fetch(&item)?;
            self.analyze_item(fetched)
        } else {
            self.analyze_item(item)
        }
    }

    pub fn fetch(&mut self, item: &Item) -> Option<Item> {
        self.resolver.fetch(item, &mut self.diagnostics)
    }

    /// Runs key, value, label and registration checks in that order. Every
    /// stage runs even after a failure so that one pass reports everything
    /// wrong with the item. Returns the item with its kind and labels set,
    /// or `None` if anything was reported.
    pub fn analyze_item(&mut self, mut item: Item) -> Option<Item> {
        item.kind = None;
        item.labels = None;
        let reported_before = self.diagnostics.len();

        let (props, kind) = self.analyze_prop_keys(&item);
        let props = self.analyze_prop_vals(&item, props);
        let labels = self.analyze_prop_labels(&item, &props);

        let valid = self.diagnostics.len() == reported_before;
        self.analyze_item_registration(item, kind, labels, valid)
    }

    fn analyze_prop_keys<'i>(&mut self, item: &'i Item) -> (Vec<&'i Prop>, Option<ItemKind>) {
        let mut accepted = Vec::new();
        let mut valid_keys = BTreeSet::new();
        let mut seen: HashMap<String, (usize, Position)> = HashMap::new();

        for prop in &item.properties {
            let key = prop.key.get_string();
            let known = schema::is_valid_key(&key);
            if !known {
                self.diagnostics.report(SemanticError::UnknownKey {
                    key: prop.key.to_string(),
                    item: item.to_string(),
                });
            }

            if let Some((count, first)) = seen.get_mut(&key) {
                self.diagnostics.report(SemanticError::DuplicateKey {
                    key: prop.key.to_string(),
                    item: item.to_string(),
                    previous: *count,
                    first: *first,
                });
                *count += 1;
                continue;
            }
            seen.insert(key.clone(), (1, prop.position));

            if known {
                valid_keys.insert(key);
                accepted.push(prop);
            }
        }

        let kind = schema::classify(&valid_keys);
        if kind.is_none() {
            self.diagnostics.report(SemanticError::UndeterminableKind {
                item: item.to_string(),
            });
        }
        (accepted, kind)
    }

    fn analyze_prop_vals<'i>(&mut self, item: &Item, props: Vec<&'i Prop>) -> Vec<&'i Prop> {
        let mut accepted = Vec::new();
        for prop in props {
            let Some(expected) = schema::shape_of(&prop.key.get_string()) else {
                continue;
            };
            if prop.kind() == expected {
                accepted.push(prop);
            } else {
                self.diagnostics.report(SemanticError::ShapeMismatch {
                    key: prop.key.to_string(),
                    item: item.to_string(),
                    expected,
                    found: prop.kind(),
                });
            }
        }
        accepted
    }

    fn analyze_prop_labels(&mut self, item: &Item, props: &[&Prop]) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for prop in props {
            if prop.key.get_string() != schema::LABELS {
                continue;
            }
            let PropValue::Map(pairs) = &prop.value else {
                continue;
            };
            for (key, value) in pairs {
                let name = key.get_string();
                let first = match seen.get_mut(&name) {
                    Some(count) => {
                        self.diagnostics.report(SemanticError::DuplicateLabel {
                            label: key.to_string(),
                            item: item.to_string(),
                            previous: *count,
                        });
                        *count += 1;
                        false
                    }
                    None => {
                        seen.insert(name.clone(), 1);
                        true
                    }
                };

                let key_invokes = key.contains_invocation();
                let value_invokes = value.contains_invocation();
                if key_invokes {
                    self.diagnostics.report(SemanticError::InvocationInLabelKey {
                        label: key.to_string(),
                        item: item.to_string(),
                    });
                }
                if value_invokes {
                    self.diagnostics.report(SemanticError::InvocationInLabelValue {
                        label: key.to_string(),
                        item: item.to_string(),
                    });
                }
                if first && !key_invokes && !value_invokes {
                    labels.insert(name, value.get_string());
                }
            }
        }
        labels
    }

    fn analyze_item_registration(
        &mut self,
        mut item: Item,
        kind: Option<ItemKind>,
        labels: BTreeMap<String, String>,
        mut valid: bool,
    ) -> Option<Item> {
        let section = item.section.get_string();
        if section.trim().is_empty() {
            valid = false;
            self.diagnostics.report(SemanticError::NamelessSection {
                item: item.to_string(),
            });
        }
        if item.section.contains_invocation() {
            valid = false;
            self.diagnostics.report(SemanticError::InvocationInSection {
                item: item.to_string(),
            });
        }
        if let (Some(bound), Some(kind)) = (self.section_kind(&section), kind) {
            if bound != kind {
                valid = false;
                self.diagnostics.report(SemanticError::SectionKindMismatch {
                    item: item.to_string(),
                    section: section.clone(),
                    bound,
                });
            }
        }

        let kind = kind.filter(|_| valid)?;
        debug!(target: "cvdoc::semantic", "Registered item {item} in section \"{section}\".");
        self.registry.insert(section, kind);
        item.kind = Some(kind);
        item.labels = Some(labels);
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ReferenceFault, Segment, Shape, Text};

    fn invocation(text: &str) -> Text {
        Text {
            segments: vec![Segment::Invocation {
                target: "frag.txt".to_string(),
                text: text.to_string(),
            }],
            position: Position::default(),
        }
    }

    fn item(section: &str, props: Vec<(&str, PropValue)>) -> Item {
        let mut item = Item::new(Text::literal(section), Position::new(1, 1, 0), "cv.json".into());
        item.properties = props
            .into_iter()
            .map(|(key, value)| Prop::new(Text::literal(key), value))
            .collect();
        item
    }

    fn s(value: &str) -> PropValue {
        PropValue::Str(Text::literal(value))
    }

    fn analyzer() -> SemanticAnalyzer {
        SemanticAnalyzer::new(".")
    }

    #[test]
    fn test_paragraph_is_classified() {
        let mut analyzer = analyzer();
        let analyzed = analyzer
            .analyze_item(item("about", vec![("paragraph", s("Hello"))]))
            .unwrap();
        assert_eq!(analyzed.kind, Some(ItemKind::CvParagraph));
        assert_eq!(analyzed.labels, Some(BTreeMap::new()));
        assert!(analyzer.diagnostics().is_empty());
        assert_eq!(analyzer.section_kind("about"), Some(ItemKind::CvParagraph));
    }

    #[test]
    fn test_duplicate_key_reported_once() {
        let mut analyzer = analyzer();
        let result = analyzer.analyze_item(item(
            "about",
            vec![("paragraph", s("a")), ("paragraph", s("b"))],
        ));
        assert!(result.is_none());
        let duplicates: Vec<_> = analyzer
            .diagnostics()
            .iter()
            .filter(|d| matches!(d, SemanticError::DuplicateKey { .. }))
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert!(matches!(
            duplicates[0],
            SemanticError::DuplicateKey { previous: 1, .. }
        ));
        // the repeat is excluded, so the item still classifies
        assert!(!analyzer
            .diagnostics()
            .iter()
            .any(|d| matches!(d, SemanticError::UndeterminableKind { .. })));
    }

    #[test]
    fn test_triple_key_counts_prior_occurrences() {
        let mut analyzer = analyzer();
        analyzer.analyze_item(item(
            "about",
            vec![("paragraph", s("a")), ("paragraph", s("b")), ("paragraph", s("c"))],
        ));
        let previous: Vec<usize> = analyzer
            .diagnostics()
            .iter()
            .filter_map(|d| match d {
                SemanticError::DuplicateKey { previous, .. } => Some(*previous),
                _ => None,
            })
            .collect();
        assert_eq!(previous, vec![1, 2]);
    }

    #[test]
    fn test_unknown_key_makes_item_unclassifiable() {
        let mut analyzer = analyzer();
        let result = analyzer.analyze_item(item("about", vec![("colour", s("red"))]));
        assert!(result.is_none());
        assert!(matches!(
            analyzer.diagnostics(),
            [
                SemanticError::UnknownKey { key, item: first },
                SemanticError::UndeterminableKind { item: second },
            ] if key == "\"colour\""
                && first == "\"about\" at cv.json:1:1"
                && second == first
        ));
        assert!(analyzer.registry().is_empty());
    }

    #[test]
    fn test_shape_mismatch() {
        let mut analyzer = analyzer();
        let result = analyzer.analyze_item(item(
            "about",
            vec![("paragraph", PropValue::Seq(vec![Text::literal("x")]))],
        ));
        assert!(result.is_none());
        assert!(analyzer.diagnostics().iter().any(|d| matches!(
            d,
            SemanticError::ShapeMismatch {
                key,
                expected: Shape::Str,
                found: Shape::Seq,
                ..
            } if key == "\"paragraph\""
        )));
    }

    #[test]
    fn test_labels_are_collected() {
        let mut analyzer = analyzer();
        let labels = PropValue::Map(vec![
            (Text::literal("lang"), Text::literal("en")),
            (Text::literal("tier"), Text::literal("1")),
        ]);
        let analyzed = analyzer
            .analyze_item(item("about", vec![("paragraph", s("x")), ("labels", labels)]))
            .unwrap();
        let labels = analyzed.labels.unwrap();
        assert_eq!(labels.get("lang").map(String::as_str), Some("en"));
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_label_invocations_are_rejected() {
        let mut analyzer = analyzer();
        let labels = PropValue::Map(vec![
            (Text::literal("lang"), invocation("en")),
            (invocation("tier"), Text::literal("1")),
        ]);
        let result =
            analyzer.analyze_item(item("about", vec![("paragraph", s("x")), ("labels", labels)]));
        assert!(result.is_none());
        let diagnostics = analyzer.diagnostics();
        assert!(diagnostics
            .iter()
            .any(|d| matches!(d, SemanticError::InvocationInLabelValue { .. })));
        assert!(diagnostics
            .iter()
            .any(|d| matches!(d, SemanticError::InvocationInLabelKey { .. })));
    }

    #[test]
    fn test_duplicate_label_value_invocation_still_reported() {
        let mut analyzer = analyzer();
        let labels = PropValue::Map(vec![
            (Text::literal("lang"), Text::literal("en")),
            (Text::literal("lang"), invocation("fr")),
        ]);
        analyzer.analyze_item(item("about", vec![("paragraph", s("x")), ("labels", labels)]));
        let diagnostics = analyzer.diagnostics();
        assert!(diagnostics
            .iter()
            .any(|d| matches!(d, SemanticError::DuplicateLabel { previous: 1, .. })));
        assert!(diagnostics
            .iter()
            .any(|d| matches!(d, SemanticError::InvocationInLabelValue { .. })));
    }

    #[test]
    fn test_section_rules() {
        let mut analyzer = analyzer();
        assert!(analyzer
            .analyze_item(item("  ", vec![("paragraph", s("x"))]))
            .is_none());
        let mut invoked = item("about", vec![("paragraph", s("x"))]);
        invoked.section = invocation("about");
        assert!(analyzer.analyze_item(invoked).is_none());
        assert!(matches!(
            analyzer.diagnostics(),
            [
                SemanticError::NamelessSection { .. },
                SemanticError::InvocationInSection { .. }
            ]
        ));
        assert!(analyzer.registry().is_empty());
    }

    #[test]
    fn test_registry_consistency() {
        let mut analyzer = analyzer();
        let a = analyzer.analyze_item(item("S", vec![("paragraph", s("a"))]));
        let b = analyzer.analyze_item(item("S", vec![("paragraph", s("b"))]));
        let c = analyzer.analyze_item(item(
            "S",
            vec![("category", s("Languages")), ("content", s("Rust"))],
        ));
        assert!(a.is_some() && b.is_some());
        assert!(c.is_none());
        assert_eq!(analyzer.section_kind("S"), Some(ItemKind::CvParagraph));
        assert!(matches!(
            analyzer.diagnostics(),
            [SemanticError::SectionKindMismatch {
                bound: ItemKind::CvParagraph,
                ..
            }]
        ));
    }

    #[test]
    fn test_reanalysis_clears_previous_kind() {
        let mut analyzer = analyzer();
        let mut stale = item("about", vec![("colour", s("red"))]);
        stale.kind = Some(ItemKind::CvHonors);
        stale.labels = Some(BTreeMap::new());
        assert!(analyzer.analyze_item(stale).is_none());
    }

    #[test]
    fn test_value_and_label_diagnostics_name_the_item() {
        let mut analyzer = analyzer();
        let mut about = item(
            "about",
            vec![
                ("paragraph", PropValue::Seq(vec![Text::literal("x")])),
                (
                    "labels",
                    PropValue::Map(vec![
                        (Text::literal("k"), Text::literal("v")),
                        (Text::literal("k"), invocation("w")),
                        (invocation("j"), Text::literal("v")),
                    ]),
                ),
            ],
        );
        about.position = Position::new(7, 3, 0);
        assert!(analyzer.analyze_item(about).is_none());

        let messages: Vec<String> = analyzer
            .diagnostics()
            .iter()
            .filter(|d| {
                matches!(
                    d,
                    SemanticError::ShapeMismatch { .. }
                        | SemanticError::DuplicateLabel { .. }
                        | SemanticError::InvocationInLabelKey { .. }
                        | SemanticError::InvocationInLabelValue { .. }
                )
            })
            .map(ToString::to_string)
            .collect();
        assert_eq!(messages.len(), 4);
        for message in &messages {
            assert!(
                message.contains("\"about\" at cv.json:7:3"),
                "{message} does not name its item"
            );
        }
    }

    #[test]
    fn test_unusable_reference_rejects_only_that_item() {
        let mut analyzer = analyzer();
        let mut faulty = item("about", vec![("paragraph", s("x"))]);
        faulty.reference_faults.push(ReferenceFault::Repeated {
            position: Position::new(1, 20, 19),
        });
        assert!(analyzer.process(faulty).is_none());
        assert!(matches!(
            analyzer.diagnostics(),
            [SemanticError::UnusableReference { .. }]
        ));
        assert!(analyzer.registry().is_empty());

        assert!(analyzer
            .process(item("about", vec![("paragraph", s("y"))]))
            .is_some());
    }
}
