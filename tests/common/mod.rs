#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::BTreeMap,
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::{Result, anyhow, bail, ensure};
use report_mirror::{
    refresh::{RefreshError, Refresher},
    replace::{Connector, LoadSession},
};
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// `original/` under the workspace, created on first use.
    pub fn source_dir(&self) -> PathBuf {
        let dir = self.path().join("original");
        std::fs::create_dir_all(&dir).expect("create source dir");
        dir
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.path().join("source")
    }

    pub fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }
}

#[derive(Debug, Clone)]
pub enum Fixture {
    Text(&'static str),
    Number(f64),
    Date(u16, u8, u8),
    Blank,
}

/// Writes a single-sheet workbook with a header row followed by `rows`.
pub fn write_workbook(path: &Path, headers: &[&str], rows: &[Vec<Fixture>]) {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let sheet = workbook.add_worksheet();
    for (col, header) in headers.iter().enumerate() {
        sheet
            .write_string(0, col as u16, *header)
            .expect("write header");
    }
    for (row_idx, row) in rows.iter().enumerate() {
        let r = row_idx as u32 + 1;
        for (col, value) in row.iter().enumerate() {
            let c = col as u16;
            match value {
                Fixture::Text(text) => {
                    sheet.write_string(r, c, *text).expect("write text");
                }
                Fixture::Number(number) => {
                    sheet.write_number(r, c, *number).expect("write number");
                }
                Fixture::Date(y, m, d) => {
                    let date = ExcelDateTime::from_ymd(*y, *m, *d).expect("valid date");
                    sheet
                        .write_datetime_with_format(r, c, &date, &date_format)
                        .expect("write date");
                }
                Fixture::Blank => {}
            }
        }
    }
    workbook.save(path).expect("save workbook");
}

/// The `Order Report.xlsx` scenario: order id text, float amount, date.
pub fn order_rows(count: usize) -> Vec<Vec<Fixture>> {
    const IDS: [&str; 10] = [
        "A-1", "A-2", "A-3", "A-4", "A-5", "A-6", "A-7", "A-8", "A-9", "A-10",
    ];
    (0..count)
        .map(|idx| {
            vec![
                Fixture::Text(IDS[idx % IDS.len()]),
                Fixture::Number(10.5 + idx as f64),
                Fixture::Date(2024, 1, (idx % 28) as u8 + 1),
            ]
        })
        .collect()
}

pub const ORDER_HEADERS: [&str; 3] = ["Order #", "Amount ($)", "Date"];

/// Refresher fake that records every call and fails for chosen file names.
#[derive(Debug, Default)]
pub struct RecordingRefresher {
    pub refreshed: RefCell<Vec<PathBuf>>,
    failing: Vec<String>,
}

impl RecordingRefresher {
    pub fn failing_on(names: &[&str]) -> Self {
        Self {
            refreshed: RefCell::new(Vec::new()),
            failing: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn refreshed_names(&self) -> Vec<String> {
        self.refreshed
            .borrow()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }
}

impl Refresher for RecordingRefresher {
    fn refresh(&self, path: &Path) -> Result<(), RefreshError> {
        self.refreshed.borrow_mut().push(path.to_path_buf());
        let name = path.file_name().unwrap().to_string_lossy();
        if self.failing.iter().any(|f| *f == name) {
            return Err(RefreshError::Engine {
                path: path.to_path_buf(),
                message: "connection credentials rejected".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<(String, String)>,
    pub rows: Vec<Vec<String>>,
    pub public_select: bool,
}

impl MemoryTable {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn column_types(&self) -> Vec<&str> {
        self.columns.iter().map(|(_, ty)| ty.as_str()).collect()
    }
}

#[derive(Debug, Default)]
pub struct DbState {
    pub tables: BTreeMap<String, MemoryTable>,
    pub statements: Vec<String>,
    pub sessions: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub fail_on: Option<String>,
}

/// Transactional in-memory stand-in for the database.
///
/// Each session works on a snapshot of the committed tables; commit publishes
/// the snapshot, rollback discards it.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Rc<RefCell<DbState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes any statement containing `needle` fail.
    pub fn fail_on(&self, needle: &str) {
        self.state.borrow_mut().fail_on = Some(needle.to_string());
    }

    pub fn clear_failure(&self) {
        self.state.borrow_mut().fail_on = None;
    }

    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.state.borrow().tables.get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.state.borrow().tables.keys().cloned().collect()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.borrow().statements.clone()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let state = self.state.borrow();
        (state.sessions, state.commits, state.rollbacks)
    }
}

pub struct MemorySession {
    state: Rc<RefCell<DbState>>,
    working: BTreeMap<String, MemoryTable>,
}

impl Connector for MemoryDatabase {
    type Session = MemorySession;

    fn open(&self) -> Result<MemorySession> {
        let mut state = self.state.borrow_mut();
        state.sessions += 1;
        Ok(MemorySession {
            state: Rc::clone(&self.state),
            working: state.tables.clone(),
        })
    }
}

impl MemorySession {
    fn record(&self, statement: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.statements.push(statement.to_string());
        if let Some(needle) = &state.fail_on
            && statement.contains(needle.as_str())
        {
            bail!("injected failure on `{statement}`");
        }
        Ok(())
    }
}

fn strip<'a>(statement: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    statement.strip_prefix(prefix)?.strip_suffix(suffix)
}

impl LoadSession for MemorySession {
    fn execute(&mut self, statement: &str) -> Result<()> {
        self.record(statement)?;
        if let Some(name) = strip(statement, "DROP TABLE IF EXISTS ", ";") {
            self.working.remove(name);
        } else if let Some(rest) = strip(statement, "CREATE TABLE ", ");") {
            let (name, defs) = rest
                .split_once(" (")
                .ok_or_else(|| anyhow!("malformed CREATE"))?;
            ensure!(!self.working.contains_key(name), "relation {name} already exists");
            let mut columns: Vec<(String, String)> = Vec::new();
            for def in defs.split(", ") {
                let (col, ty) = def
                    .split_once(' ')
                    .ok_or_else(|| anyhow!("malformed column {def}"))?;
                ensure!(
                    matches!(ty, "text" | "float" | "int" | "timestamp"),
                    "type {ty} does not exist"
                );
                ensure!(
                    columns.iter().all(|(existing, _)| existing != col),
                    "column {col} specified more than once"
                );
                columns.push((col.to_string(), ty.to_string()));
            }
            self.working.insert(
                name.to_string(),
                MemoryTable {
                    columns,
                    ..MemoryTable::default()
                },
            );
        } else if let Some(name) = strip(statement, "GRANT SELECT ON TABLE ", " TO PUBLIC;") {
            self.working
                .get_mut(name)
                .ok_or_else(|| anyhow!("relation {name} does not exist"))?
                .public_select = true;
        } else if let Some(rest) = strip(statement, "ALTER TABLE ", ";") {
            let (from, to) = rest
                .split_once(" RENAME TO ")
                .ok_or_else(|| anyhow!("malformed ALTER"))?;
            ensure!(!self.working.contains_key(to), "relation {to} already exists");
            let table = self
                .working
                .remove(from)
                .ok_or_else(|| anyhow!("relation {from} does not exist"))?;
            self.working.insert(to.to_string(), table);
        } else {
            bail!("unsupported statement `{statement}`");
        }
        Ok(())
    }

    fn copy_in(&mut self, statement: &str, payload: &mut dyn Read) -> Result<u64> {
        self.record(statement)?;
        let name = strip(statement, "COPY ", " FROM STDIN WITH (FORMAT csv, HEADER true);")
            .ok_or_else(|| anyhow!("malformed COPY"))?;
        let table = self
            .working
            .get_mut(name)
            .ok_or_else(|| anyhow!("relation {name} does not exist"))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(payload);
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let expected: Vec<String> = table.columns.iter().map(|(n, _)| n.clone()).collect();
        ensure!(header == expected, "COPY header {header:?} != {expected:?}");
        let mut loaded = 0u64;
        for record in reader.records() {
            let record = record?;
            ensure!(record.len() == table.columns.len(), "row width mismatch");
            table.rows.push(record.iter().map(str::to_string).collect());
            loaded += 1;
        }
        Ok(loaded)
    }

    fn commit(self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.commits += 1;
        state.tables = self.working;
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        self.state.borrow_mut().rollbacks += 1;
        Ok(())
    }
}
