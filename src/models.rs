use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One `<page>` of the XML export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub page_id: u32,
    pub namespace: i64,
    /// Normalized title
    pub title: String,
    /// Raw wikitext of the page's revision
    pub body: String,
}

/// A `(work, character name)` pair. Equality is by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharacterCandidate {
    pub work: String,
    pub name: String,
}

impl CharacterCandidate {
    pub fn new(work: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            work: work.into(),
            name: name.into(),
        }
    }
}

/// The final, deduplicated result. Ordered so output is reproducible.
pub type CandidateSet = BTreeSet<CharacterCandidate>;

/// Contents of `page_meta.json`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    pub main_id_to_title: BTreeMap<u32, String>,
    pub character_list_page_ids: BTreeSet<u32>,
}
