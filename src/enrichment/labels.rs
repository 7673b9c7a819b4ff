//! Stored label format and broad label categories.
//!
//! Labels are persisted as `{"version": 1, "labels": [...]}`. Rows written
//! before the envelope existed hold a bare array and read as version 0.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const LABEL_FORMAT_VERSION: u32 = 1;

/// Context words that mark a photo of a screen or printed page. Faces found
/// in such photos are not counted.
pub const DISQUALIFIERS: &[&str] = &[
    "web site",
    "website",
    "monitor",
    "screen",
    "computer screen",
    "screenshot",
    "comic book",
    "menu",
    "display",
];

/// Labels below this confidence never decide a category.
pub const MIN_CATEGORY_CONFIDENCE: f32 = 0.2;

const CAT_WORDS: &[&str] = &["cat", "tabby", "siamese", "kitty", "kitten"];

const DOG_WORDS: &[&str] = &[
    "dog", "terrier", "spaniel", "retriever", "shepherd", "hound", "setter", "collie",
    "mastiff", "schnauzer", "poodle", "corgi", "bulldog", "pug", "beagle", "husky",
    "malamute", "dalmatian", "chihuahua", "pinscher", "dane", "spitz", "keeshond", "chow",
    "samoyed", "pekinese", "shih-tzu", "papillon", "whippet", "rottweiler", "boxer",
    "pomeranian", "labrador", "dachshund", "sheepdog", "bull", "griffon", "pointer",
    "weimaraner", "vizsla", "bernard", "newfoundland", "pyrenees", "leonberg", "basenji",
    "affenpinscher", "maltese", "lhasa", "hairless", "ridgeback", "saluki", "wolfhound",
    "deerhound", "elkhound", "komondor", "kuvasz", "schipperke", "groenendael", "malinois",
    "briard", "kelpie", "shiba", "akita",
];

const BIRD_WORDS: &[&str] = &[
    "bird", "eagle", "owl", "penguin", "parrot", "sparrow", "robin", "finch", "hawk",
];

const SCREENSHOT_WORDS: &[&str] = &[
    "crossword puzzle",
    "web site",
    "menu",
    "monitor",
    "screen",
    "comic book",
];

/// Clothing and roles that imply a person in frame. Phones catch mirror selfies.
const PEOPLE_WORDS: &[&str] = &[
    "groom",
    "ballplayer",
    "scuba diver",
    "bikini",
    "maillot",
    "swimming trunks",
    "uniform",
    "academic gown",
    "trench coat",
    "kimono",
    "miniskirt",
    "sarong",
    "lab coat",
    "sweatshirt",
    "poncho",
    "apron",
    "cloak",
    "vestment",
    "bow tie",
    "cardigan",
    "cellular telephone",
    "hand-held computer",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Cat,
    Dog,
    Bird,
    Screenshot,
    People,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Cat => "cat",
            Category::Dog => "dog",
            Category::Bird => "bird",
            Category::Screenshot => "screenshot",
            Category::People => "people",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `word` occurs in `text` delimited by non-word characters on both
/// sides. Both are expected in lowercase.
fn has_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn has_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| has_word(text, w))
}

/// Broad category for a single label, matched on whole words so that
/// "hotdog" is not a dog.
pub fn category_of(label: &str) -> Option<Category> {
    let text = label.trim().to_lowercase();

    if has_any(&text, CAT_WORDS) {
        return Some(Category::Cat);
    }
    // A bare "cardigan" is the corgi breed; the garment comes with context.
    if text == "cardigan" {
        return Some(Category::Dog);
    }
    if has_any(&text, DOG_WORDS) {
        if has_word(&text, "prairie") && has_word(&text, "dog") {
            return None;
        }
        return Some(Category::Dog);
    }
    if has_any(&text, BIRD_WORDS) {
        return Some(Category::Bird);
    }
    if has_any(&text, SCREENSHOT_WORDS) {
        return Some(Category::Screenshot);
    }
    if has_any(&text, PEOPLE_WORDS) {
        return Some(Category::People);
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSet {
    pub version: u32,
    pub labels: Vec<Label>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Stored {
    Versioned { version: u32, labels: Vec<Label> },
    Legacy(Vec<Label>),
}

impl LabelSet {
    pub fn new(labels: Vec<Label>) -> Self {
        Self {
            version: LABEL_FORMAT_VERSION,
            labels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        match serde_json::from_str::<Stored>(json)? {
            Stored::Legacy(labels) => Ok(Self { version: 0, labels }),
            Stored::Versioned { version, labels } if version <= LABEL_FORMAT_VERSION => {
                Ok(Self { version, labels })
            }
            Stored::Versioned { version, .. } => Err(Error::LabelFormat(format!(
                "unsupported label format version {}",
                version
            ))),
        }
    }

    /// Parse the `labels_json` column; NULL means no labels were stored.
    pub fn from_column(value: Option<&str>) -> Result<Option<Self>> {
        value.map(Self::from_json).transpose()
    }

    /// Whether any label above `min_confidence` names a screen-like context.
    pub fn is_disqualifying(&self, min_confidence: f32) -> bool {
        self.labels.iter().any(|l| {
            l.confidence > min_confidence && DISQUALIFIERS.contains(&l.text.to_lowercase().as_str())
        })
    }

    /// Distinct categories of labels at or above
    /// [`MIN_CATEGORY_CONFIDENCE`], strongest label first.
    pub fn categories(&self) -> Vec<Category> {
        let mut sorted: Vec<&Label> = self
            .labels
            .iter()
            .filter(|l| l.confidence >= MIN_CATEGORY_CONFIDENCE)
            .collect();
        sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut categories = Vec::new();
        for category in sorted.into_iter().filter_map(|l| category_of(&l.text)) {
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        categories
    }

    /// Label texts, highest confidence first.
    pub fn texts(&self) -> Vec<&str> {
        let mut sorted: Vec<&Label> = self.labels.iter().collect();
        sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        sorted.into_iter().map(|l| l.text.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(text: &str, confidence: f32) -> Label {
        Label { text: text.into(), confidence }
    }

    #[test]
    fn test_versioned_roundtrip() {
        let set = LabelSet::new(vec![label("Dog", 0.9), label("Grass", 0.6)]);
        let json = set.to_json().unwrap();
        assert!(json.contains("\"version\":1"));
        assert_eq!(LabelSet::from_json(&json).unwrap(), set);
    }

    #[test]
    fn test_legacy_array_reads_as_v0() {
        let set = LabelSet::from_json(r#"[{"text":"Cat","confidence":0.8}]"#).unwrap();
        assert_eq!(set.version, 0);
        assert_eq!(set.labels, vec![label("Cat", 0.8)]);
    }

    #[test]
    fn test_unknown_version_and_garbage_are_errors() {
        let err = LabelSet::from_json(r#"{"version":9,"labels":[]}"#).unwrap_err();
        assert!(matches!(err, Error::LabelFormat(_)));
        assert!(LabelSet::from_json("{not json").is_err());
        assert!(LabelSet::from_json(r#"{"labels":"nope"}"#).is_err());
    }

    #[test]
    fn test_from_column() {
        assert_eq!(LabelSet::from_column(None).unwrap(), None);
        assert!(LabelSet::from_column(Some("[]")).unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_disqualifying_context() {
        let screen = LabelSet::new(vec![label("Person", 0.9), label("Computer Screen", 0.5)]);
        assert!(screen.is_disqualifying(0.4));

        let weak = LabelSet::new(vec![label("Website", 0.3)]);
        assert!(!weak.is_disqualifying(0.4));

        let beach = LabelSet::new(vec![label("Beach", 0.95)]);
        assert!(!beach.is_disqualifying(0.4));
        assert_eq!(
            LabelSet::new(vec![label("a", 0.2), label("b", 0.7)]).texts(),
            vec!["b", "a"]
        );
    }

    #[test]
    fn test_category_whole_words() {
        assert_eq!(category_of("Golden Retriever"), Some(Category::Dog));
        assert_eq!(category_of("hotdog"), None);
        assert_eq!(category_of("prairie dog"), None);
        assert_eq!(category_of("Cardigan"), Some(Category::Dog));
        assert_eq!(category_of("cardigan sweater"), Some(Category::People));
        assert_eq!(category_of("tiger cat"), Some(Category::Cat));
        assert_eq!(category_of("catamaran"), None);
        assert_eq!(category_of("Shih-Tzu"), Some(Category::Dog));
        assert_eq!(category_of("bullfrog"), None);
        assert_eq!(category_of("web site"), Some(Category::Screenshot));
        assert_eq!(category_of("scuba diver"), Some(Category::People));
        assert_eq!(category_of("bald eagle"), Some(Category::Bird));
        assert_eq!(category_of("Beach"), None);
    }

    #[test]
    fn test_label_set_categories() {
        let set = LabelSet::new(vec![
            label("Beach", 0.9),
            label("beagle", 0.5),
            label("tabby", 0.7),
            label("pug", 0.6),
            label("owl", 0.1),
        ]);
        assert_eq!(set.categories(), vec![Category::Cat, Category::Dog]);
        assert_eq!(Category::Dog.to_string(), "dog");
        assert!(LabelSet::new(vec![]).categories().is_empty());
    }
}
