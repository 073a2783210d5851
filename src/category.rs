//! Transitive closure of a seed category over the `categorylinks` graph.
//!
//! Two generations of the `categorylinks` table exist in the wild:
//!
//! - **Gen 1** stores the parent category inline as `cl_to` (a title).
//! - **Gen 2** stores `cl_target_id`, an id into the `linktarget` table
//!   which in turn holds `(lt_namespace, lt_title)`.
//!
//! The generation is detected once from the dump's column list and carried
//! as [`SchemaGen`]; everything downstream matches on it.
//!
//! The dump is streamed twice: the first pass collects `subcat` edges (small)
//! and the second collects `page` rows under the closure (large), so memory is
//! bounded by the category graph, not by the number of memberships.

use crate::config::{NS_CATEGORY, PROGRESS_INTERVAL};
use crate::error::DumpError;
use crate::sql::{DumpRow, SqlDump, SqlValue, TableSchema};
use crate::title::{canonical_title, is_invisible, normalize_title};
use anyhow::Result;
use indicatif::ProgressBar;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// How the parent category of a row is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaGen {
    /// Column index of `cl_to`.
    Gen1 { target_title: usize },
    /// Column index of `cl_target_id`.
    Gen2 { target_id: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryLinksLayout {
    pub from: usize,
    pub kind: usize,
    pub generation: SchemaGen,
}

impl CategoryLinksLayout {
    pub fn detect(schema: &TableSchema) -> Result<Self> {
        let from = schema.position_or("cl_from", 0);
        let kind = schema.position_or("cl_type", 5);

        let generation = if let Some(idx) = schema.position("cl_to") {
            SchemaGen::Gen1 { target_title: idx }
        } else if let Some(idx) = schema.position("cl_target_id") {
            SchemaGen::Gen2 { target_id: idx }
        } else if schema.columns.is_empty() {
            SchemaGen::Gen1 { target_title: 1 }
        } else {
            return Err(DumpError::MissingColumn {
                table: schema.table.clone(),
                column: "cl_to or cl_target_id",
            }
            .into());
        };

        Ok(Self {
            from,
            kind,
            generation,
        })
    }

    fn target(&self) -> usize {
        match self.generation {
            SchemaGen::Gen1 { target_title } => target_title,
            SchemaGen::Gen2 { target_id } => target_id,
        }
    }

    fn min_len(&self) -> usize {
        self.from.max(self.kind).max(self.target()) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Page,
    Subcat,
    File,
}

impl LinkKind {
    /// `cl_type` as a string or as MediaWiki's numeric constant.
    pub fn from_value(value: &SqlValue) -> Option<Self> {
        if let SqlValue::Int(n) = value {
            return match n {
                0 => Some(LinkKind::Page),
                1 => Some(LinkKind::Subcat),
                2 => Some(LinkKind::File),
                _ => None,
            };
        }
        match value.as_str()?.trim() {
            "page" | "0" => Some(LinkKind::Page),
            "subcat" | "1" => Some(LinkKind::Subcat),
            "file" | "2" => Some(LinkKind::File),
            _ => None,
        }
    }
}

/// Categories that descend from the seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClosureSet {
    Titles(FxHashSet<String>),
    PageIds(FxHashSet<u32>),
}

impl ClosureSet {
    pub fn len(&self) -> usize {
        match self {
            ClosureSet::Titles(s) => s.len(),
            ClosureSet::PageIds(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Closure plus the pages filed directly under any category in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryClosure {
    pub closure: ClosureSet,
    pub member_page_ids: FxHashSet<u32>,
}

/// `true` for link-target titles known to be dump corruption.
pub fn is_garbage_title(title: &str) -> bool {
    let t = title.trim();
    if t.is_empty() || t.chars().all(is_invisible) {
        return true;
    }
    if t.contains("_+_") || t.contains("data-mw-") {
        return true;
    }
    let len = t.chars().count();
    let wrapped = |q: char| len >= 2 && t.starts_with(q) && t.ends_with(q);
    (wrapped('"') && len <= 40) || (wrapped('\'') && len <= 30)
}

/// Page id of the seed category: exact canonical match, else the shortest
/// title starting with the seed whose canonical length equals the seed's.
pub fn resolve_seed_page_id(seed: &str, category_titles: &FxHashMap<u32, String>) -> Option<u32> {
    let want = canonical_title(seed);
    if want.is_empty() {
        return None;
    }

    let mut ids: Vec<u32> = category_titles.keys().copied().collect();
    ids.sort_unstable();

    let mut prefixed: Option<(usize, u32)> = None;
    for id in ids {
        let canon = canonical_title(&category_titles[&id]);
        if canon == want {
            return Some(id);
        }
        if canon.starts_with(&want) {
            let len = canon.chars().count();
            if prefixed.is_none_or(|(best, _)| len < best) {
                prefixed = Some((len, id));
            }
        }
    }

    let want_len = want.chars().count();
    prefixed
        .filter(|&(len, _)| len == want_len)
        .map(|(_, id)| id)
}

/// Fixed point over titles: `edges` are `(child category page id, parent title)`.
pub fn closure_by_title(
    seed: &str,
    edges: &[(u32, String)],
    category_titles: &FxHashMap<u32, String>,
) -> FxHashSet<String> {
    let mut closure = FxHashSet::default();
    closure.insert(normalize_title(seed));

    loop {
        let before = closure.len();
        for (child, parent) in edges {
            if closure.contains(parent) {
                if let Some(title) = category_titles.get(child) {
                    if !closure.contains(title) {
                        closure.insert(title.clone());
                    }
                }
            }
        }
        if closure.len() == before {
            return closure;
        }
    }
}

/// Fixed point over page ids: `edges` are `(child page id, parent page id)`.
pub fn closure_by_page_id(seed_id: u32, edges: &[(u32, u32)]) -> FxHashSet<u32> {
    let mut closure = FxHashSet::default();
    closure.insert(seed_id);

    loop {
        let before = closure.len();
        for &(child, parent) in edges {
            if closure.contains(&parent) {
                closure.insert(child);
            }
        }
        if closure.len() == before {
            return closure;
        }
    }
}

/// Normalized category titles of the `linktarget` table, keyed by `lt_id`.
pub fn load_link_targets(path: &Path, seed: &str) -> Result<FxHashMap<u64, String>> {
    let dump = SqlDump::open(path)?;
    let schema = dump.schema();
    let id_col = schema.position_or("lt_id", 0);
    let ns_col = schema.position_or("lt_namespace", 1);
    let title_col = schema.position_or("lt_title", 2);
    let min_len = id_col.max(ns_col).max(title_col) + 1;

    let seed_canon = canonical_title(seed);
    let seed_title = normalize_title(seed);
    let mut targets = FxHashMap::default();
    let mut garbage = 0u64;
    let mut recovered = 0u64;

    for row in dump.rows() {
        let row = row?;
        if row.len() < min_len {
            continue;
        }
        let Some(lt_id) = row.get(id_col).and_then(SqlValue::as_i64) else {
            continue;
        };
        if row.get(ns_col).and_then(SqlValue::as_i64) != Some(NS_CATEGORY) {
            continue;
        }
        let raw = row.get(title_col).and_then(SqlValue::to_text).unwrap_or_default();

        let title = if is_garbage_title(&raw) {
            garbage += 1;
            let mentions_seed = [id_col, title_col]
                .iter()
                .filter_map(|&i| row.get(i).and_then(SqlValue::to_text))
                .any(|cell| canonical_title(&cell) == seed_canon);
            if !mentions_seed {
                continue;
            }
            recovered += 1;
            seed_title.clone()
        } else {
            normalize_title(&raw)
        };

        if !title.is_empty() {
            targets.insert(lt_id as u64, title);
        }
    }

    debug!(garbage, recovered, "Link-target titles filtered");
    info!(targets = targets.len(), "Link-target table loaded");
    Ok(targets)
}

impl CategoryClosure {
    /// Streams `categorylinks` (and `linktarget` for gen 2) and computes the
    /// closure of `seed`. An unresolvable seed yields an empty member set;
    /// callers must check it.
    pub fn compute(
        categorylinks: &Path,
        linktarget: Option<&Path>,
        category_titles: &FxHashMap<u32, String>,
        seed: &str,
    ) -> Result<Self> {
        let layout = CategoryLinksLayout::detect(SqlDump::open(categorylinks)?.schema())?;
        info!(generation = ?layout.generation, path = %categorylinks.display(), "Computing category closure");

        let result = match layout.generation {
            SchemaGen::Gen1 { .. } => {
                Self::compute_gen1(categorylinks, layout, category_titles, seed)?
            }
            SchemaGen::Gen2 { .. } => {
                let Some(lt_path) = linktarget else {
                    return Err(DumpError::LinkTargetRequired(categorylinks.to_path_buf()).into());
                };
                let targets = load_link_targets(lt_path, seed)?;
                Self::compute_gen2(categorylinks, layout, &targets, category_titles, seed)?
            }
        };

        if result.member_page_ids.is_empty() {
            warn!(seed, "Category closure has no member pages");
        }
        info!(
            categories = result.closure.len(),
            pages = result.member_page_ids.len(),
            "Category closure computed"
        );
        Ok(result)
    }

    fn compute_gen1(
        path: &Path,
        layout: CategoryLinksLayout,
        category_titles: &FxHashMap<u32, String>,
        seed: &str,
    ) -> Result<Self> {
        let mut edges: Vec<(u32, String)> = Vec::new();
        scan_links(path, layout, LinkKind::Subcat, |from, target| {
            if let Some(parent) = target.to_text() {
                edges.push((from, normalize_title(&parent)));
            }
        })?;

        let titles = closure_by_title(seed, &edges, category_titles);
        debug!(edges = edges.len(), closure = titles.len(), "Gen 1 fixed point");
        drop(edges);

        let mut members = FxHashSet::default();
        scan_links(path, layout, LinkKind::Page, |from, target| {
            if let Some(parent) = target.to_text() {
                if titles.contains(&normalize_title(&parent)) {
                    members.insert(from);
                }
            }
        })?;

        Ok(Self {
            closure: ClosureSet::Titles(titles),
            member_page_ids: members,
        })
    }

    fn compute_gen2(
        path: &Path,
        layout: CategoryLinksLayout,
        targets: &FxHashMap<u64, String>,
        category_titles: &FxHashMap<u32, String>,
        seed: &str,
    ) -> Result<Self> {
        let mut lt_edges: Vec<(u32, u64)> = Vec::new();
        scan_links(path, layout, LinkKind::Subcat, |from, target| {
            if let Some(id) = target.as_i64().filter(|&id| id > 0) {
                lt_edges.push((from, id as u64));
            }
        })?;

        let resolver = TargetResolver::new(targets, category_titles, seed, &lt_edges);

        let closure = match resolver.seed_page_id {
            Some(seed_id) => {
                let edges: Vec<(u32, u32)> = lt_edges
                    .iter()
                    .filter_map(|&(child, lt)| resolver.page_id(lt).map(|p| (child, p)))
                    .collect();
                ClosureSet::PageIds(closure_by_page_id(seed_id, &edges))
            }
            None => {
                warn!(seed, "Seed category page id unresolved, falling back to titles");
                let edges: Vec<(u32, String)> = lt_edges
                    .iter()
                    .filter_map(|&(child, lt)| resolver.title(lt).map(|t| (child, t.to_string())))
                    .collect();
                ClosureSet::Titles(closure_by_title(seed, &edges, category_titles))
            }
        };
        drop(lt_edges);

        let mut members = FxHashSet::default();
        scan_links(path, layout, LinkKind::Page, |from, target| {
            let Some(lt) = target.as_i64().filter(|&id| id > 0) else {
                return;
            };
            let lt = lt as u64;
            let inside = match &closure {
                ClosureSet::PageIds(ids) => resolver.page_id(lt).is_some_and(|p| ids.contains(&p)),
                ClosureSet::Titles(titles) => resolver.title(lt).is_some_and(|t| titles.contains(t)),
            };
            if inside {
                members.insert(from);
            }
        })?;

        Ok(Self {
            closure,
            member_page_ids: members,
        })
    }
}

/// Gen 2 join from link-target ids to category titles and page ids.
struct TargetResolver<'a> {
    targets: &'a FxHashMap<u64, String>,
    to_page: FxHashMap<u64, u32>,
    inferred_seed: Option<(u64, String)>,
    seed_page_id: Option<u32>,
}

impl<'a> TargetResolver<'a> {
    fn new(
        targets: &'a FxHashMap<u64, String>,
        category_titles: &FxHashMap<u32, String>,
        seed: &str,
        edges: &[(u32, u64)],
    ) -> Self {
        let mut title_to_page: FxHashMap<&str, u32> = FxHashMap::default();
        for (&id, title) in category_titles {
            title_to_page
                .entry(title.as_str())
                .and_modify(|p| *p = (*p).min(id))
                .or_insert(id);
        }

        let mut to_page: FxHashMap<u64, u32> = targets
            .iter()
            .filter_map(|(&lt, title)| title_to_page.get(title.as_str()).map(|&p| (lt, p)))
            .collect();

        let seed_title = normalize_title(seed);
        let seed_page_id = resolve_seed_page_id(seed, category_titles);

        let mut inferred_seed = None;
        if !targets.values().any(|t| *t == seed_title) {
            if let Some(lt) = most_referenced_missing(targets, edges) {
                warn!(
                    lt_id = lt,
                    seed = %seed_title,
                    "Seed missing from link targets; assuming the most referenced unknown target is the seed"
                );
                if let Some(p) = seed_page_id {
                    to_page.insert(lt, p);
                }
                inferred_seed = Some((lt, seed_title));
            }
        }

        Self {
            targets,
            to_page,
            inferred_seed,
            seed_page_id,
        }
    }

    fn page_id(&self, lt: u64) -> Option<u32> {
        self.to_page.get(&lt).copied()
    }

    fn title(&self, lt: u64) -> Option<&str> {
        match &self.inferred_seed {
            Some((id, title)) if *id == lt => Some(title.as_str()),
            _ => self.targets.get(&lt).map(String::as_str),
        }
    }
}

/// Link-target id referenced most often by subcat edges but absent from the
/// table. Ties go to the smallest id.
fn most_referenced_missing(targets: &FxHashMap<u64, String>, edges: &[(u32, u64)]) -> Option<u64> {
    let mut counts: FxHashMap<u64, usize> = FxHashMap::default();
    for &(_, lt) in edges {
        if !targets.contains_key(&lt) {
            *counts.entry(lt).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(lt, _)| lt)
}

/// Calls `f(cl_from, target cell)` for every row of `kind`.
fn scan_links<F>(path: &Path, layout: CategoryLinksLayout, kind: LinkKind, mut f: F) -> Result<()>
where
    F: FnMut(u32, &SqlValue),
{
    let dump = SqlDump::open(path)?;
    let min_len = layout.min_len();
    let target_col = layout.target();
    let pb = ProgressBar::new_spinner();
    let mut seen = 0u64;
    let mut skipped = 0u64;

    for row in dump.rows() {
        let row: DumpRow = row?;
        seen += 1;
        if seen % PROGRESS_INTERVAL == 0 {
            pb.set_message(format!("{} categorylinks rows ({:?})", seen, kind));
            pb.tick();
        }
        if row.len() < min_len {
            skipped += 1;
            continue;
        }
        if row.get(layout.kind).and_then(LinkKind::from_value) != Some(kind) {
            continue;
        }
        let (Some(from), Some(target)) = (
            row.get(layout.from).and_then(SqlValue::as_u32),
            row.get(target_col),
        ) else {
            skipped += 1;
            continue;
        };
        f(from, target);
    }

    pb.finish_and_clear();
    debug!(rows = seen, skipped, kind = ?kind, "categorylinks pass done");
    Ok(())
}
