//! Toujo: fictional-character name mining from Japanese Wikipedia dumps
//!
//! The pipeline reads the SQL table dumps and the pages-articles XML export
//! and produces `(work, character name)` candidates for later classification:
//!
//! 1. **SQL pass** -- Index the `page` table into title maps and find
//!    character-list pages, then compute the closure of the seed category over
//!    `categorylinks` (either dump schema generation)
//! 2. **XML pass** -- Stream pages on a producer thread through a bounded
//!    queue into a rayon pool that locates character sections and mines names
//! 3. **Merge** -- Resolve work titles, drop implausible names, union with the
//!    category-derived candidates and write the CSVs
//!
//! # Architecture
//!
//! - **Streaming everywhere** -- SQL `INSERT` statements are tokenized one at a
//!   time and the XML export one `<page>` at a time
//! - **Bounded memory** -- Queue capacity and an in-flight window cap what the
//!   producer and the dispatcher can hold
//! - **Normalized titles** -- Every title goes through [`title::normalize_title`]
//!   before it is used as a key
//! - **Index caching** -- The SQL pass result is cached with bincode and reused
//!   while the dumps are unchanged
//!
//! # Key Modules
//!
//! - [`sql`] -- gzip SQL dump reader and `INSERT` tokenizer
//! - [`page_table`] -- Title index built from the `page` table
//! - [`category`] -- Category closure over both `categorylinks` generations
//! - [`parser`] -- Streaming XML page reader with bzip2 decompression
//! - [`template`] -- Ordered template and markup stripping passes
//! - [`section`] -- Character-section location and name extraction
//! - [`extract`] -- Producer/worker orchestration and merge
//! - [`filter`] -- Plausibility check and exclude list
//! - [`output`] -- Candidate CSVs, page bodies and `page_meta.json`
//! - [`cache`] -- Index persistence keyed on dump fingerprints
//!
//! # Example Usage
//!
//! ```bash
//! # Dumps in /data, results in /out, 8 workers
//! toujo -v extract --data-dir /data --output-dir /out --workers 8
//!
//! # Re-mine saved page bodies after tuning the heuristics
//! toujo mine-pages --output-dir /out --heuristics heuristics.json
//! ```

pub mod cache;
pub mod category;
pub mod config;
pub mod dumps;
pub mod error;
pub mod extract;
pub mod filter;
pub mod heuristics;
pub mod models;
pub mod output;
pub mod page_table;
pub mod parser;
pub mod section;
pub mod sql;
pub mod stats;
pub mod template;
pub mod title;
