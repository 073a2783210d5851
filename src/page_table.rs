use crate::config::{NS_CATEGORY, NS_MAIN, PROGRESS_INTERVAL};
use crate::heuristics::Heuristics;
use crate::models::PageMeta;
use crate::sql::{DumpRow, SqlDump};
use crate::title::normalize_title;
use anyhow::Result;
use indicatif::ProgressBar;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Title maps built from the `page` table.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TitleIndex {
    main_title_by_id: FxHashMap<u32, String>,
    category_title_by_id: FxHashMap<u32, String>,
    character_list_page_ids: FxHashSet<u32>,
}

#[derive(Clone, Copy)]
struct PageColumns {
    id: usize,
    namespace: usize,
    title: usize,
}

impl PageColumns {
    fn min_len(&self) -> usize {
        self.id.max(self.namespace).max(self.title) + 1
    }
}

impl TitleIndex {
    pub fn build(path: &Path, heuristics: &Heuristics) -> Result<Self> {
        let dump = SqlDump::open(path)?;
        let schema = dump.schema();
        let cols = PageColumns {
            id: schema.position_or("page_id", 0),
            namespace: schema.position_or("page_namespace", 1),
            title: schema.position_or("page_title", 2),
        };

        info!(path = %path.display(), "Indexing page table");

        let mut index = Self::default();
        let mut skipped = 0u64;
        let mut seen = 0u64;
        let pb = ProgressBar::new_spinner();

        let mut rows = dump.rows();
        for row in rows.by_ref() {
            let row = row?;
            seen += 1;
            if !index.add_row(&row, cols, heuristics) {
                skipped += 1;
            }
            if seen % PROGRESS_INTERVAL == 0 {
                pb.set_message(format!("{} page rows", seen));
                pb.tick();
            }
        }

        pb.finish_and_clear();

        debug!(
            skipped,
            malformed_statements = rows.malformed_statements(),
            "Page rows dropped"
        );
        info!(
            main = index.main_title_by_id.len(),
            categories = index.category_title_by_id.len(),
            character_lists = index.character_list_page_ids.len(),
            "Page table indexed"
        );

        Ok(index)
    }

    /// Returns false when the row is unusable.
    fn add_row(&mut self, row: &DumpRow, cols: PageColumns, heuristics: &Heuristics) -> bool {
        if row.len() < cols.min_len() {
            return false;
        }
        let (Some(id), Some(ns)) = (
            row.get(cols.id).and_then(|v| v.as_u32()),
            row.get(cols.namespace).and_then(|v| v.as_i64()),
        ) else {
            return false;
        };
        let Some(raw_title) = row.get(cols.title).and_then(|v| v.to_text()) else {
            return false;
        };

        match ns {
            NS_MAIN => {
                let title = normalize_title(&raw_title);
                if heuristics.is_character_list_title(&title) {
                    self.character_list_page_ids.insert(id);
                }
                self.main_title_by_id.insert(id, title);
            }
            NS_CATEGORY => {
                self.category_title_by_id
                    .insert(id, normalize_title(&raw_title));
            }
            _ => {}
        }
        true
    }

    pub fn from_parts(
        main_title_by_id: FxHashMap<u32, String>,
        category_title_by_id: FxHashMap<u32, String>,
        heuristics: &Heuristics,
    ) -> Self {
        let character_list_page_ids = main_title_by_id
            .iter()
            .filter(|(_, title)| heuristics.is_character_list_title(title))
            .map(|(&id, _)| id)
            .collect();
        Self {
            main_title_by_id,
            category_title_by_id,
            character_list_page_ids,
        }
    }

    pub fn main_title(&self, page_id: u32) -> Option<&str> {
        self.main_title_by_id.get(&page_id).map(String::as_str)
    }

    pub fn category_title(&self, page_id: u32) -> Option<&str> {
        self.category_title_by_id.get(&page_id).map(String::as_str)
    }

    pub fn category_titles(&self) -> &FxHashMap<u32, String> {
        &self.category_title_by_id
    }

    pub fn character_list_page_ids(&self) -> &FxHashSet<u32> {
        &self.character_list_page_ids
    }

    pub fn is_character_list(&self, page_id: u32) -> bool {
        self.character_list_page_ids.contains(&page_id)
    }

    /// (main titles, category titles, character-list pages)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.main_title_by_id.len(),
            self.category_title_by_id.len(),
            self.character_list_page_ids.len(),
        )
    }

    pub fn page_meta(&self) -> PageMeta {
        PageMeta {
            main_id_to_title: self
                .main_title_by_id
                .iter()
                .map(|(&id, title)| (id, title.clone()))
                .collect(),
            character_list_page_ids: self.character_list_page_ids.iter().copied().collect(),
        }
    }
}
