//! Run orchestration: SQL phase (title index and category closure), XML
//! phase (producer thread, bounded queue, worker pool) and the final merge.

use crate::cache::{self, CacheKey};
use crate::category::CategoryClosure;
use crate::config::{
    CATEGORY_WORK_LABEL, IN_FLIGHT_WINDOW, NS_MAIN, PROGRESS_INTERVAL, QUEUE_CAPACITY,
};
use crate::dumps::DumpPaths;
use crate::filter::{is_plausible_name, ExcludeList};
use crate::heuristics::Heuristics;
use crate::models::{CandidateSet, CharacterCandidate, PageRecord};
use crate::output::{self, CsvCounts};
use crate::page_table::TitleIndex;
use crate::parser::WikiReader;
use crate::section::{extract_candidates, locate_character_section, mine_page};
use crate::stats::ExtractionStats;
use anyhow::{anyhow, Context, Result};
use indicatif::ProgressBar;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use rustc_hash::FxHashSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Settings for one `extract` run.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub seed: String,
    pub use_cache: bool,
    pub write_pages: bool,
}

#[derive(Debug)]
pub struct ExtractSummary {
    pub index_duration: Duration,
    pub extract_duration: Duration,
    pub from_cache: bool,
    pub closure_categories: usize,
    pub closure_members: usize,
    pub category_candidates: usize,
    pub total_candidates: usize,
    pub counts: CsvCounts,
    pub stats: Arc<ExtractionStats>,
}

#[derive(Debug)]
pub struct MinePagesSummary {
    pub pages: usize,
    pub total_candidates: usize,
    pub counts: CsvCounts,
    pub stats: Arc<ExtractionStats>,
}

/// Read-only state every worker sees. Built once before the pool starts.
pub struct WorkerContext {
    heuristics: Heuristics,
    character_list_page_ids: FxHashSet<u32>,
    closure_members: FxHashSet<u32>,
    pages_dir: Option<PathBuf>,
}

impl WorkerContext {
    pub fn new(
        heuristics: Heuristics,
        character_list_page_ids: FxHashSet<u32>,
        closure_members: FxHashSet<u32>,
        pages_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            heuristics,
            character_list_page_ids,
            closure_members,
            pages_dir,
        }
    }

    pub fn heuristics(&self) -> &Heuristics {
        &self.heuristics
    }
}

/// What a worker hands back for one page. The body stays with the worker.
struct PageOutcome {
    page_id: u32,
    title: String,
    is_character_list: bool,
    names: Vec<String>,
}

/// Mines one page. A panic inside the miners costs this page only.
fn process_page(ctx: &WorkerContext, page: PageRecord, stats: &ExtractionStats) -> PageOutcome {
    let is_character_list = ctx.character_list_page_ids.contains(&page.page_id);
    let heuristics = &ctx.heuristics;

    let mined = panic::catch_unwind(AssertUnwindSafe(|| {
        if is_character_list {
            return (false, mine_page(&page.body, true, heuristics));
        }
        match locate_character_section(&page.body, heuristics) {
            Some(section) => (true, extract_candidates(section, heuristics)),
            None => (false, Vec::new()),
        }
    }));

    let (has_section, names) = match mined {
        Ok(mined) => mined,
        Err(_) => {
            warn!(page_id = page.page_id, title = %page.title, "Page extraction panicked, skipping page");
            stats.inc_page_failures();
            (false, Vec::new())
        }
    };

    if is_character_list {
        stats.inc_character_list_pages();
    }
    if has_section {
        stats.inc_section_pages();
    }

    if let Some(dir) = &ctx.pages_dir {
        if is_character_list || has_section || ctx.closure_members.contains(&page.page_id) {
            match output::write_page_body(dir, page.page_id, &page.body) {
                Ok(()) => stats.inc_pages_written(),
                Err(e) => warn!(page_id = page.page_id, error = %e, "Failed to write page body"),
            }
        }
    }

    PageOutcome {
        page_id: page.page_id,
        title: page.title,
        is_character_list,
        names,
    }
}

/// Folds one page's names into the result under its work title.
fn merge_outcome(
    result: &mut CandidateSet,
    outcome: PageOutcome,
    heuristics: &Heuristics,
    stats: &ExtractionStats,
) {
    if outcome.names.is_empty() {
        return;
    }
    let work = if outcome.is_character_list {
        heuristics.work_title(&outcome.title)
    } else {
        outcome.title.as_str()
    };

    stats.add_candidates_mined(outcome.names.len() as u64);
    let mut rejected = 0u64;
    for name in outcome.names {
        if is_plausible_name(&name, heuristics) {
            result.insert(CharacterCandidate::new(work, name));
        } else {
            rejected += 1;
        }
    }
    if rejected > 0 {
        debug!(page_id = outcome.page_id, rejected, "Implausible names dropped");
        stats.add_candidates_rejected(rejected);
    }
}

/// Streams pages through a bounded queue into a worker pool and merges the
/// per-page names as they complete.
///
/// The producer blocks once `QUEUE_CAPACITY` pages are queued; the dispatcher
/// waits for a completion whenever `IN_FLIGHT_WINDOW` pages are outstanding.
/// A source error stops the run after in-flight pages drain.
pub fn mine_stream<I>(
    pages: I,
    ctx: Arc<WorkerContext>,
    workers: usize,
    stats: Arc<ExtractionStats>,
) -> Result<CandidateSet>
where
    I: Iterator<Item = Result<PageRecord>> + Send + 'static,
{
    let (page_tx, page_rx) = mpsc::sync_channel::<PageRecord>(QUEUE_CAPACITY);
    let producer_stats = Arc::clone(&stats);
    let producer = thread::Builder::new()
        .name("xml-producer".into())
        .spawn(move || -> Result<()> {
            for page in pages {
                let page = page?;
                producer_stats.inc_pages_read();
                if page.namespace != NS_MAIN {
                    continue;
                }
                if page_tx.send(page).is_err() {
                    break;
                }
            }
            Ok(())
        })
        .context("Failed to spawn XML producer thread")?;

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("page-worker-{}", i))
        .build()
        .context("Failed to build worker pool")?;

    let (done_tx, done_rx) = mpsc::channel::<PageOutcome>();
    let heuristics = ctx.heuristics();
    let mut result = CandidateSet::new();
    let mut in_flight = 0usize;
    let mut merged = 0u64;
    let pb = ProgressBar::new_spinner();

    let mut merge = |outcome: PageOutcome, result: &mut CandidateSet| {
        merge_outcome(result, outcome, heuristics, &stats);
        merged += 1;
        if merged % PROGRESS_INTERVAL == 0 {
            pb.set_message(format!("{} pages, {} candidates", merged, result.len()));
            pb.tick();
        }
    };

    for page in page_rx {
        if in_flight >= IN_FLIGHT_WINDOW {
            let outcome = done_rx.recv().context("Worker pool stopped responding")?;
            in_flight -= 1;
            merge(outcome, &mut result);
        }

        let task_ctx = Arc::clone(&ctx);
        let task_stats = Arc::clone(&stats);
        let tx = done_tx.clone();
        pool.spawn(move || {
            let outcome = process_page(&task_ctx, page, &task_stats);
            // The dispatcher only hangs up after every outcome is received.
            let _ = tx.send(outcome);
        });
        in_flight += 1;

        while let Ok(outcome) = done_rx.try_recv() {
            in_flight -= 1;
            merge(outcome, &mut result);
        }
    }

    drop(done_tx);
    while in_flight > 0 {
        let Ok(outcome) = done_rx.recv() else {
            break;
        };
        in_flight -= 1;
        merge(outcome, &mut result);
    }
    pb.finish_and_clear();

    producer
        .join()
        .map_err(|_| anyhow!("XML producer thread panicked"))??;

    info!(
        pages = merged,
        candidates = result.len(),
        failures = stats.failures(),
        "XML pages mined"
    );
    Ok(result)
}

/// `("category", title)` for every closure member with a plausible main title.
pub fn category_candidates(
    closure: &CategoryClosure,
    titles: &TitleIndex,
    heuristics: &Heuristics,
) -> CandidateSet {
    closure
        .member_page_ids
        .iter()
        .filter_map(|&id| titles.main_title(id))
        .filter(|title| is_plausible_name(title, heuristics))
        .map(|title| CharacterCandidate::new(CATEGORY_WORK_LABEL, title))
        .collect()
}

fn build_index(
    paths: &DumpPaths,
    heuristics: &Heuristics,
    seed: &str,
) -> Result<(TitleIndex, CategoryClosure)> {
    let titles = TitleIndex::build(&paths.page, heuristics)?;
    let closure = CategoryClosure::compute(
        &paths.categorylinks,
        paths.linktarget.as_deref(),
        titles.category_titles(),
        seed,
    )?;
    Ok((titles, closure))
}

/// SQL phase with the index cache in front of it. Returns whether the cache
/// was used.
fn load_or_build_index(
    config: &ExtractConfig,
    paths: &DumpPaths,
    heuristics: &Heuristics,
) -> Result<(TitleIndex, CategoryClosure, bool)> {
    let key = CacheKey::new(
        &paths.sql_dumps(),
        &config.seed,
        &heuristics.config.character_list_title_pattern,
    )?;
    let cache_path = cache::cache_path(&config.output_dir);

    if config.use_cache {
        if let Some((titles, closure)) = cache::try_load(&cache_path, &key)? {
            return Ok((titles, closure, true));
        }
        info!("Building index (cache miss or invalid)");
    } else {
        info!("Cache disabled, building fresh index");
    }

    let (titles, closure) = build_index(paths, heuristics, &config.seed)?;
    if let Err(e) = cache::save(&config.output_dir, &key, &titles, &closure) {
        warn!(error = %e, "Failed to save index cache");
    }
    Ok((titles, closure, false))
}

/// Full run: dumps in `data_dir`, CSVs, page bodies and metadata in
/// `output_dir`.
pub fn run_extraction(
    config: &ExtractConfig,
    heuristics: &Heuristics,
    exclude: &ExcludeList,
) -> Result<ExtractSummary> {
    let paths = DumpPaths::discover(&config.data_dir)?;
    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            config.output_dir.display()
        )
    })?;

    let start_indexing = Instant::now();
    let (titles, closure, from_cache) = load_or_build_index(config, &paths, heuristics)?;
    let index_duration = start_indexing.elapsed();
    info!(
        duration_secs = index_duration.as_secs_f64(),
        from_cache, "Indexing complete"
    );

    let mut candidates = category_candidates(&closure, &titles, heuristics);
    let category_count = candidates.len();
    info!(candidates = category_count, "Category candidates collected");

    output::write_page_meta(&config.output_dir, &titles.page_meta())?;

    let pages_dir = if config.write_pages {
        let dir = output::pages_dir(&config.output_dir);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create pages directory: {}", dir.display()))?;
        Some(dir)
    } else {
        None
    };

    let (main, categories, lists) = titles.stats();
    debug!(main, categories, character_lists = lists, "Title index ready");
    let closure_categories = closure.closure.len();
    let closure_members = closure.member_page_ids.len();

    let ctx = Arc::new(WorkerContext::new(
        heuristics.clone(),
        titles.character_list_page_ids().clone(),
        closure.member_page_ids,
        pages_dir,
    ));
    drop(titles);

    info!(workers = config.workers.max(1), "Starting XML pass");
    let start_extracting = Instant::now();
    let stats = Arc::new(ExtractionStats::new());
    let reader = WikiReader::open(&paths.articles)?;
    let mined = mine_stream(reader, ctx, config.workers, Arc::clone(&stats))?;
    candidates.extend(mined);
    let extract_duration = start_extracting.elapsed();
    info!(
        duration_secs = extract_duration.as_secs_f64(),
        "Extraction complete"
    );

    let counts = output::write_candidates(&config.output_dir, &candidates, exclude)?;

    Ok(ExtractSummary {
        index_duration,
        extract_duration,
        from_cache,
        closure_categories,
        closure_members,
        category_candidates: category_count,
        total_candidates: candidates.len(),
        counts,
        stats,
    })
}

/// Re-mines `pages/` using `page_meta.json` from an earlier run, without
/// touching the dumps.
pub fn mine_page_files(
    output_dir: &Path,
    workers: usize,
    heuristics: &Heuristics,
    exclude: &ExcludeList,
) -> Result<MinePagesSummary> {
    let meta = output::read_page_meta(&output::page_meta_path(output_dir))?;
    let files = output::list_page_files(&output::pages_dir(output_dir))?;
    info!(pages = files.len(), "Mining saved page bodies");

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .context("Failed to build worker pool")?;
    let stats = Arc::new(ExtractionStats::new());

    let outcomes: Vec<PageOutcome> = pool.install(|| {
        files
            .par_iter()
            .filter_map(|(page_id, path)| {
                let body = match fs::read_to_string(path) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable page file");
                        return None;
                    }
                };
                stats.inc_pages_read();
                let is_character_list = meta.character_list_page_ids.contains(page_id);
                let title = meta
                    .main_id_to_title
                    .get(page_id)
                    .cloned()
                    .unwrap_or_else(|| page_id.to_string());

                let names = match panic::catch_unwind(AssertUnwindSafe(|| {
                    mine_page(&body, is_character_list, heuristics)
                })) {
                    Ok(names) => names,
                    Err(_) => {
                        warn!(page_id, title = %title, "Page extraction panicked, skipping page");
                        stats.inc_page_failures();
                        return None;
                    }
                };
                if is_character_list {
                    stats.inc_character_list_pages();
                }
                Some(PageOutcome {
                    page_id: *page_id,
                    title,
                    is_character_list,
                    names,
                })
            })
            .collect()
    });

    let mut candidates = CandidateSet::new();
    for outcome in outcomes {
        merge_outcome(&mut candidates, outcome, heuristics, &stats);
    }

    let counts = output::write_candidates(output_dir, &candidates, exclude)?;
    Ok(MinePagesSummary {
        pages: files.len(),
        total_candidates: candidates.len(),
        counts,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::ClosureSet;
    use rustc_hash::FxHashMap;

    fn page(id: u32, ns: i64, title: &str, body: &str) -> PageRecord {
        PageRecord {
            page_id: id,
            namespace: ns,
            title: title.to_string(),
            body: body.to_string(),
        }
    }

    fn context(list_ids: &[u32], pages_dir: Option<PathBuf>) -> Arc<WorkerContext> {
        Arc::new(WorkerContext::new(
            Heuristics::default(),
            list_ids.iter().copied().collect(),
            FxHashSet::default(),
            pages_dir,
        ))
    }

    fn pairs(set: &CandidateSet) -> Vec<(&str, &str)> {
        set.iter()
            .map(|c| (c.work.as_str(), c.name.as_str()))
            .collect()
    }

    #[test]
    fn test_mine_stream_merges_work_titles() {
        let pages = vec![
            Ok(page(1, 0, "Xの登場人物", "; 名前一\n; 名前二\n")),
            Ok(page(2, 0, "作品", "== 登場人物 ==\n=== 見出し ===\n本文\n")),
            Ok(page(3, 0, "無関係", "本文だけ\n")),
            Ok(page(4, 14, "Category:登場人物", "== 登場人物 ==\n=== 除外 ===\n")),
        ];
        let stats = Arc::new(ExtractionStats::new());
        let result = mine_stream(pages.into_iter(), context(&[1], None), 2, Arc::clone(&stats))
            .unwrap();

        assert_eq!(
            pairs(&result),
            vec![("X", "名前一"), ("X", "名前二"), ("作品", "見出し")]
        );
        assert_eq!(stats.pages(), 4);
        assert_eq!(stats.character_lists(), 1);
        assert_eq!(stats.sections(), 1);
    }

    #[test]
    fn test_mine_stream_drops_implausible_names() {
        let pages = vec![Ok(page(
            1,
            0,
            "作品",
            "== 登場人物 ==\n; 9mm弾\n; 徹甲弾\n; M16\n; 主人公A\n",
        ))];
        let stats = Arc::new(ExtractionStats::new());
        let result =
            mine_stream(pages.into_iter(), context(&[], None), 1, Arc::clone(&stats)).unwrap();
        assert_eq!(pairs(&result), vec![("作品", "主人公A")]);
        assert_eq!(stats.rejected(), 3);
    }

    #[test]
    fn test_mine_stream_source_error_fails_run() {
        let pages = vec![
            Ok(page(1, 0, "作品", "== 登場人物 ==\n; 名前\n")),
            Err(anyhow!("truncated dump")),
        ];
        let stats = Arc::new(ExtractionStats::new());
        let err = mine_stream(pages.into_iter(), context(&[], None), 1, stats).unwrap_err();
        assert!(err.to_string().contains("truncated dump"));
    }

    #[test]
    fn test_mine_stream_writes_relevant_pages() {
        let dir = tempfile::TempDir::new().unwrap();
        let pages = vec![
            Ok(page(1, 0, "Xの登場人物", "; 名前一\n")),
            Ok(page(2, 0, "作品", "== 登場人物 ==\n=== 見出し ===\n")),
            Ok(page(3, 0, "無関係", "本文だけ\n")),
        ];
        let stats = Arc::new(ExtractionStats::new());
        mine_stream(
            pages.into_iter(),
            context(&[1], Some(dir.path().to_path_buf())),
            2,
            Arc::clone(&stats),
        )
        .unwrap();

        assert!(dir.path().join("1.txt").exists());
        assert!(dir.path().join("2.txt").exists());
        assert!(!dir.path().join("3.txt").exists());
        assert_eq!(stats.written(), 2);
    }

    #[test]
    fn test_many_pages_pass_through_the_window() {
        let pages: Vec<Result<PageRecord>> = (1..=300)
            .map(|i| {
                Ok(page(
                    i,
                    0,
                    &format!("作品{}", i),
                    "== 登場人物 ==\n; 名前\n",
                ))
            })
            .collect();
        let stats = Arc::new(ExtractionStats::new());
        let result = mine_stream(pages.into_iter(), context(&[], None), 4, stats).unwrap();
        assert_eq!(result.len(), 300);
    }

    #[test]
    fn test_mine_pages_summary_is_debug() {
        let summary = MinePagesSummary {
            pages: 2,
            total_candidates: 1,
            counts: CsvCounts::default(),
            stats: Arc::new(ExtractionStats::new()),
        };
        assert!(format!("{:?}", summary).contains("pages_read: 0"));
    }

    #[test]
    fn test_category_candidates() {
        let mut main = FxHashMap::default();
        main.insert(1, "碇シンジ".to_string());
        main.insert(2, "9mm弾".to_string());
        main.insert(3, "綾波レイ".to_string());
        let titles = TitleIndex::from_parts(main, FxHashMap::default(), &Heuristics::default());
        let closure = CategoryClosure {
            closure: ClosureSet::PageIds([10].into_iter().collect()),
            member_page_ids: [1, 2, 99].into_iter().collect(),
        };

        let result = category_candidates(&closure, &titles, &Heuristics::default());
        assert_eq!(pairs(&result), vec![("category", "碇シンジ")]);
    }
}
