//! Property tables for every item kind, and the classifier that infers an
//! item's kind from the keys it carries.

use crate::ast::{ItemKind, Shape};
use std::collections::BTreeSet;

pub const PARAGRAPH: &str = "paragraph";
pub const CATEGORY: &str = "category";
pub const CONTENT: &str = "content";
pub const TITLE: &str = "title";
pub const SUBTITLE: &str = "subtitle";
pub const BTAG: &str = "btag";
pub const TTAG: &str = "ttag";
pub const LTAG: &str = "ltag";
pub const RTAG: &str = "rtag";
pub const DETAILS: &str = "details";
pub const LABELS: &str = "labels";

/// Every recognized key with the one value shape it accepts.
const KEY_SHAPES: [(&str, Shape); 11] = [
    (PARAGRAPH, Shape::Str),
    (CATEGORY, Shape::Str),
    (CONTENT, Shape::Str),
    (TITLE, Shape::Str),
    (SUBTITLE, Shape::Str),
    (BTAG, Shape::Str),
    (TTAG, Shape::Str),
    (LTAG, Shape::Str),
    (RTAG, Shape::Str),
    (DETAILS, Shape::Seq),
    (LABELS, Shape::Map),
];

/// Optional on every kind.
const GLOBAL_OPTIONAL: [&str; 1] = [LABELS];

pub fn required_keys(kind: ItemKind) -> &'static [&'static str] {
    match kind {
        ItemKind::CvParagraph => &[PARAGRAPH],
        ItemKind::CvSkills => &[CATEGORY, CONTENT],
        ItemKind::CvEntries => &[TITLE, SUBTITLE, BTAG, TTAG],
        ItemKind::CvHonors => &[TITLE, SUBTITLE, LTAG, RTAG],
    }
}

pub fn optional_keys(kind: ItemKind) -> Vec<&'static str> {
    let specific: &[&str] = match kind {
        ItemKind::CvEntries => &[DETAILS],
        _ => &[],
    };
    GLOBAL_OPTIONAL.iter().chain(specific).copied().collect()
}

pub fn is_valid_key(key: &str) -> bool {
    shape_of(key).is_some()
}

/// The value shape registered for `key`, if it is a known key.
pub fn shape_of(key: &str) -> Option<Shape> {
    KEY_SHAPES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, shape)| *shape)
}

/// Jaccard coefficient of `keys` against each kind, in classification order.
///
/// Optional keys of a kind are removed from `keys` before comparing, so a
/// coefficient of exactly 1.0 means: every required key present, no key
/// foreign to the kind present, optional keys in any combination.
pub fn similarity_coefficients(keys: &BTreeSet<String>) -> Vec<(ItemKind, f64)> {
    ItemKind::ALL
        .iter()
        .map(|&kind| (kind, coefficient(kind, keys)))
        .collect()
}

fn coefficient(kind: ItemKind, keys: &BTreeSet<String>) -> f64 {
    let optional = optional_keys(kind);
    let present: BTreeSet<&str> = keys
        .iter()
        .map(String::as_str)
        .filter(|key| !optional.contains(key))
        .collect();
    let required: BTreeSet<&str> = required_keys(kind).iter().copied().collect();

    let union = required.union(&present).count();
    if union == 0 {
        return 1.0;
    }
    required.intersection(&present).count() as f64 / union as f64
}

/// The first kind, in [`ItemKind::ALL`] order, that `keys` matches exactly.
pub fn classify(keys: &BTreeSet<String>) -> Option<ItemKind> {
    similarity_coefficients(keys)
        .into_iter()
        .find(|(_, coefficient)| *coefficient == 1.0)
        .map(|(kind, _)| kind)
}
