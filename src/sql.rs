//! Streaming reader for MediaWiki SQL table dumps (`*.sql.gz`).
//!
//! A dump is a `CREATE TABLE` block followed by very long
//! `INSERT INTO `t` VALUES (...),(...);` statements, one per line. The reader
//! keeps at most one statement in memory. Column positions are looked up by
//! name from the `CREATE TABLE` block because dump generations reorder and
//! rename columns.

use crate::config::READ_BUFFER_SIZE;
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use memchr::{memchr2, memmem};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One cell of an `INSERT` tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    /// Numeric literal that does not fit an `i64` (decimals, floats).
    Number(String),
    Text(String),
}

impl SqlValue {
    /// Integer view; quoted integers (`'14'`) are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(n) => Some(*n),
            SqlValue::Text(s) | SqlValue::Number(s) => s.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|n| u32::try_from(n).ok())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) | SqlValue::Number(s) => Some(s),
            _ => None,
        }
    }

    /// Any non-null cell rendered as text.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Int(n) => Some(n.to_string()),
            SqlValue::Number(s) | SqlValue::Text(s) => Some(s.clone()),
        }
    }
}

/// An ordered tuple of cells from one `INSERT` row.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpRow(pub Vec<SqlValue>);

impl DumpRow {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&SqlValue> {
        self.0.get(idx)
    }

    pub fn cells(&self) -> &[SqlValue] {
        &self.0
    }
}

/// Column names declared by the dump's `CREATE TABLE` block.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Position by name, else the historical fixed offset.
    pub fn position_or(&self, column: &str, fallback: usize) -> usize {
        self.position(column).unwrap_or(fallback)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.position(column).is_some()
    }
}

/// An opened dump positioned just before its first `INSERT` statement.
pub struct SqlDump {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    schema: TableSchema,
    pending: Option<Vec<u8>>,
}

impl SqlDump {
    /// Opens `path` (gzip when it ends in `.gz`) and reads the schema block.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open SQL dump: {}", path.display()))?;

        let reader: Box<dyn BufRead + Send> =
            if path.extension().is_some_and(|ext| ext == "gz") {
                Box::new(BufReader::with_capacity(
                    READ_BUFFER_SIZE,
                    MultiGzDecoder::new(file),
                ))
            } else {
                Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file))
            };

        let mut dump = Self {
            path: path.to_path_buf(),
            reader,
            schema: TableSchema::default(),
            pending: None,
        };
        dump.read_schema()?;

        debug!(
            path = %dump.path.display(),
            table = %dump.schema.table,
            columns = dump.schema.columns.len(),
            "Opened SQL dump"
        );

        Ok(dump)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(self) -> SqlRows {
        SqlRows {
            path: self.path,
            reader: self.reader,
            pending: self.pending,
            line: Vec::new(),
            queue: VecDeque::new(),
            malformed: 0,
            done: false,
        }
    }

    fn read_schema(&mut self) -> Result<()> {
        let mut line = Vec::new();
        let mut in_create = false;

        loop {
            line.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut line)
                .with_context(|| format!("Failed to read SQL dump: {}", self.path.display()))?;
            if n == 0 {
                return Ok(());
            }

            if line.starts_with(b"INSERT INTO") {
                self.pending = Some(std::mem::take(&mut line));
                return Ok(());
            }

            if line.starts_with(b"CREATE TABLE") {
                in_create = true;
                self.schema.table = backtick_name(&line).unwrap_or_default();
                continue;
            }

            if in_create {
                let trimmed = line.trim_ascii_start();
                if trimmed.starts_with(b")") {
                    in_create = false;
                } else if trimmed.starts_with(b"`") {
                    if let Some(col) = backtick_name(trimmed) {
                        self.schema.columns.push(col);
                    }
                }
            }
        }
    }
}

/// Rows of every `INSERT` statement, in file order.
pub struct SqlRows {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    pending: Option<Vec<u8>>,
    line: Vec<u8>,
    queue: VecDeque<DumpRow>,
    malformed: u64,
    done: bool,
}

impl SqlRows {
    /// Statements whose tuple list could not be fully tokenized.
    pub fn malformed_statements(&self) -> u64 {
        self.malformed
    }

    fn fill(&mut self) -> Result<()> {
        while self.queue.is_empty() && !self.done {
            let stmt = match self.pending.take() {
                Some(stmt) => stmt,
                None => {
                    self.line.clear();
                    let n = self
                        .reader
                        .read_until(b'\n', &mut self.line)
                        .with_context(|| {
                            format!("Failed to read SQL dump: {}", self.path.display())
                        })?;
                    if n == 0 {
                        self.done = true;
                        break;
                    }
                    if !self.line.starts_with(b"INSERT INTO") {
                        continue;
                    }
                    std::mem::take(&mut self.line)
                }
            };

            if !parse_insert(&stmt, &mut self.queue) {
                self.malformed += 1;
            }
        }
        Ok(())
    }
}

impl Iterator for SqlRows {
    type Item = Result<DumpRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.fill() {
            self.done = true;
            return Some(Err(e));
        }
        self.queue.pop_front().map(Ok)
    }
}

fn backtick_name(line: &[u8]) -> Option<String> {
    let start = memchr::memchr(b'`', line)? + 1;
    let len = memchr::memchr(b'`', &line[start..])?;
    Some(String::from_utf8_lossy(&line[start..start + len]).into_owned())
}

/// Tokenizes the tuple list of one `INSERT` statement into `out`.
///
/// Returns false when the statement is malformed; rows before the damage are
/// still pushed.
pub fn parse_insert(stmt: &[u8], out: &mut VecDeque<DumpRow>) -> bool {
    let Some(values_at) = memmem::find(stmt, b" VALUES ") else {
        return false;
    };
    let mut cur = Cursor {
        buf: stmt,
        pos: values_at + b" VALUES ".len(),
    };

    loop {
        cur.skip_ws();
        if !cur.eat(b'(') {
            return false;
        }
        let Some(row) = cur.tuple() else {
            return false;
        };
        out.push_back(row);

        cur.skip_ws();
        match cur.bump() {
            Some(b',') => continue,
            Some(b';') | None => return true,
            Some(_) => return false,
        }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\n' | b'\r' | b'\t')) {
            self.pos += 1;
        }
    }

    /// Values up to and including the closing `)`.
    fn tuple(&mut self) -> Option<DumpRow> {
        let mut cells = Vec::new();
        loop {
            self.skip_ws();
            cells.push(self.value()?);
            self.skip_ws();
            match self.bump()? {
                b',' => continue,
                b')' => return Some(DumpRow(cells)),
                _ => return None,
            }
        }
    }

    fn value(&mut self) -> Option<SqlValue> {
        match self.peek()? {
            b'\'' => {
                self.pos += 1;
                self.quoted().map(SqlValue::Text)
            }
            b'N' if self.buf[self.pos..].starts_with(b"NULL") => {
                self.pos += 4;
                Some(SqlValue::Null)
            }
            _ => {
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if b == b',' || b == b')' {
                        break;
                    }
                    self.pos += 1;
                }
                let raw = std::str::from_utf8(&self.buf[start..self.pos]).ok()?.trim();
                if raw.is_empty() {
                    return None;
                }
                Some(match raw.parse::<i64>() {
                    Ok(n) => SqlValue::Int(n),
                    Err(_) => SqlValue::Number(raw.to_string()),
                })
            }
        }
    }

    /// Body of a single-quoted string; the opening quote is already consumed.
    fn quoted(&mut self) -> Option<String> {
        let mut bytes = Vec::new();
        loop {
            let rest = &self.buf[self.pos..];
            let hit = memchr2(b'\'', b'\\', rest)?;
            bytes.extend_from_slice(&rest[..hit]);
            self.pos += hit;

            match self.bump()? {
                b'\\' => {
                    let escaped = self.bump()?;
                    bytes.push(match escaped {
                        b'0' => 0,
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'b' => 0x08,
                        b'Z' => 0x1a,
                        other => other,
                    });
                }
                _ => {
                    if self.peek() == Some(b'\'') {
                        self.pos += 1;
                        bytes.push(b'\'');
                    } else {
                        break;
                    }
                }
            }
        }

        Some(match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}
