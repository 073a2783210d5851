use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the producer, the workers and the merge loop
#[derive(Debug, Default)]
pub struct ExtractionStats {
    pub pages_read: AtomicU64,
    pub character_list_pages: AtomicU64,
    pub section_pages: AtomicU64,
    pub pages_written: AtomicU64,
    pub candidates_mined: AtomicU64,
    pub candidates_rejected: AtomicU64,
    pub page_failures: AtomicU64,
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pages_read(&self) {
        self.pages_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_character_list_pages(&self) {
        self.character_list_pages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_section_pages(&self) {
        self.section_pages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pages_written(&self) {
        self.pages_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_candidates_mined(&self, count: u64) {
        self.candidates_mined.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_candidates_rejected(&self, count: u64) {
        self.candidates_rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_page_failures(&self) {
        self.page_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pages(&self) -> u64 {
        self.pages_read.load(Ordering::Relaxed)
    }

    pub fn character_lists(&self) -> u64 {
        self.character_list_pages.load(Ordering::Relaxed)
    }

    pub fn sections(&self) -> u64 {
        self.section_pages.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.pages_written.load(Ordering::Relaxed)
    }

    pub fn mined(&self) -> u64 {
        self.candidates_mined.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.candidates_rejected.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.page_failures.load(Ordering::Relaxed)
    }
}
