use crate::config::{NS_MAIN, READ_BUFFER_SIZE};
use crate::models::PageRecord;
use crate::title::normalize_title;
use anyhow::{anyhow, Context, Result};
use bzip2::read::MultiBzDecoder;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Streams `<page>` elements out of a MediaWiki XML export.
///
/// Only the current page is held in memory; the event buffer is reused
/// between pages.
pub struct WikiReader {
    reader: Reader<Box<dyn BufRead + Send>>,
    buf: Vec<u8>,
    pages_without_id: u64,
    done: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Id,
    Namespace,
    Text,
}

#[derive(Default)]
struct PartialPage {
    id: Option<u32>,
    namespace: Option<i64>,
    title: Option<String>,
    body: Option<String>,
    in_revision: bool,
}

impl PartialPage {
    fn into_record(self) -> Option<PageRecord> {
        Some(PageRecord {
            page_id: self.id?,
            namespace: self.namespace.unwrap_or(NS_MAIN),
            title: normalize_title(self.title.as_deref().unwrap_or_default()),
            body: self.body.unwrap_or_default(),
        })
    }
}

impl WikiReader {
    /// Opens a plain `.xml` export or a (multistream) `.xml.bz2` one.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open XML dump: {}", path.display()))?;
        let is_bz2 = path.extension().is_some_and(|ext| ext == "bz2");

        let inner: Box<dyn BufRead + Send> = if is_bz2 {
            Box::new(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                MultiBzDecoder::new(file),
            ))
        } else {
            Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file))
        };
        Ok(Self::from_reader(inner))
    }

    pub fn from_reader(inner: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader: Reader::from_reader(inner),
            buf: Vec::with_capacity(8192),
            pages_without_id: 0,
            done: false,
        }
    }

    /// Pages dropped because they carried no `<id>`.
    pub fn pages_without_id(&self) -> u64 {
        self.pages_without_id
    }

    fn next_page(&mut self) -> Result<Option<PageRecord>> {
        let mut page: Option<PartialPage> = None;
        let mut field: Option<Field> = None;
        let mut text = String::new();

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(e) => {
                    let pos = self.reader.buffer_position();
                    return Err(anyhow!(e).context(format!("Malformed XML near byte {}", pos)));
                }
            };

            match event {
                Event::Start(ref e) => {
                    let Some(current) = page.as_mut() else {
                        if e.local_name().as_ref() == b"page" {
                            page = Some(PartialPage::default());
                        }
                        continue;
                    };
                    field = match e.local_name().as_ref() {
                        b"revision" => {
                            current.in_revision = true;
                            None
                        }
                        b"title" if !current.in_revision => Some(Field::Title),
                        b"ns" if !current.in_revision => Some(Field::Namespace),
                        // Revision and contributor ids must not replace the page id.
                        b"id" if !current.in_revision && current.id.is_none() => Some(Field::Id),
                        b"text" if current.in_revision => Some(Field::Text),
                        _ => None,
                    };
                    text.clear();
                }
                Event::Empty(ref e) => {
                    if let Some(current) = page.as_mut() {
                        if current.in_revision && e.local_name().as_ref() == b"text" {
                            current.body = Some(String::new());
                        }
                    }
                }
                Event::Text(ref e) => {
                    if field.is_some() {
                        match e.unescape() {
                            Ok(s) => text.push_str(&s),
                            Err(_) => text.push_str(&String::from_utf8_lossy(e)),
                        }
                    }
                }
                Event::CData(ref e) => {
                    if field.is_some() {
                        text.push_str(&String::from_utf8_lossy(e));
                    }
                }
                Event::End(ref e) => {
                    let Some(current) = page.as_mut() else {
                        continue;
                    };
                    match e.local_name().as_ref() {
                        b"page" => {
                            if let Some(record) = page.take().and_then(PartialPage::into_record) {
                                return Ok(Some(record));
                            }
                            self.pages_without_id += 1;
                        }
                        b"revision" => current.in_revision = false,
                        _ => {
                            if let Some(f) = field.take() {
                                let value = std::mem::take(&mut text);
                                match f {
                                    Field::Title => current.title = Some(value),
                                    Field::Id => current.id = value.trim().parse().ok(),
                                    Field::Namespace => {
                                        current.namespace = value.trim().parse().ok()
                                    }
                                    Field::Text => current.body = Some(value),
                                }
                            }
                        }
                    }
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

impl Iterator for WikiReader {
    type Item = Result<PageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_page() {
            Ok(Some(page)) => Some(Ok(page)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
