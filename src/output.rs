use crate::config::{
    CANDIDATES_FILE, CSV_BUFFER_SIZE, EXCLUDED_CANDIDATES_FILE, PAGES_DIR, PAGE_META_FILE,
};
use crate::filter::ExcludeList;
use crate::models::{CandidateSet, PageMeta};
use crate::title::display_title;
use anyhow::{Context, Result};
use csv::Writer;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Rows written to each candidate CSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsvCounts {
    pub accepted: usize,
    pub excluded: usize,
}

pub fn pages_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(PAGES_DIR)
}

pub fn page_meta_path(output_dir: &Path) -> PathBuf {
    output_dir.join(PAGE_META_FILE)
}

/// Splits candidates on the exclude list and writes both CSVs, sorted, with
/// the work column in display form.
pub fn write_candidates(
    output_dir: &Path,
    candidates: &CandidateSet,
    exclude: &ExcludeList,
) -> Result<CsvCounts> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let (mut excluded, mut accepted): (Vec<_>, Vec<_>) = candidates
        .iter()
        .map(|c| (display_title(&c.work), c.name.as_str()))
        .partition(|(_, name)| exclude.is_excluded(name));
    accepted.sort_unstable();
    excluded.sort_unstable();

    write_rows(&output_dir.join(CANDIDATES_FILE), &accepted)?;
    write_rows(&output_dir.join(EXCLUDED_CANDIDATES_FILE), &excluded)?;

    let counts = CsvCounts {
        accepted: accepted.len(),
        excluded: excluded.len(),
    };
    info!(
        accepted = counts.accepted,
        excluded = counts.excluded,
        dir = %output_dir.display(),
        "Candidate CSVs written"
    );
    Ok(counts)
}

fn write_rows(path: &Path, rows: &[(String, &str)]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = Writer::from_writer(BufWriter::with_capacity(CSV_BUFFER_SIZE, file));
    writer.write_record(["work", "name"])?;
    for (work, name) in rows {
        writer.write_record([work.as_str(), *name])?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

pub fn write_page_meta(output_dir: &Path, meta: &PageMeta) -> Result<()> {
    let path = page_meta_path(output_dir);
    let file =
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, meta)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    info!(
        titles = meta.main_id_to_title.len(),
        character_lists = meta.character_list_page_ids.len(),
        "Page metadata written"
    );
    Ok(())
}

pub fn read_page_meta(path: &Path) -> Result<PageMeta> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open page metadata: {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse page metadata: {}", path.display()))
}

pub fn write_page_body(dir: &Path, page_id: u32, body: &str) -> Result<()> {
    let path = dir.join(format!("{}.txt", page_id));
    fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))
}

/// `<page_id>.txt` files of a pages directory, ordered by id. Other files are
/// ignored.
pub fn list_page_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut files: Vec<(u32, PathBuf)> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list pages directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
        .filter_map(|path| {
            let id = path.file_stem()?.to_str()?.parse().ok()?;
            Some((id, path))
        })
        .collect();
    files.sort_unstable_by_key(|(id, _)| *id);
    Ok(files)
}
