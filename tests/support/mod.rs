#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use report_sheets::ServerConfig;
use report_sheets::model::UploadDescriptor;
use report_sheets::state::AppState;
use report_sheets::utils::cell_address;
use tempfile::{TempDir, tempdir};
use umya_spreadsheet::{self, Spreadsheet, Worksheet};

pub fn write_workbook_to_path<F>(path: &Path, f: F)
where
    F: FnOnce(&mut Spreadsheet),
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create dir");
    }
    let mut book = umya_spreadsheet::new_file();
    f(&mut book);
    umya_spreadsheet::writer::xlsx::write(&book, path).expect("write workbook");
}

/// Serialized xlsx bytes of a workbook built by `f`.
pub fn workbook_bytes<F>(f: F) -> Vec<u8>
where
    F: FnOnce(&mut Spreadsheet),
{
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("fixture.xlsx");
    write_workbook_to_path(&path, f);
    std::fs::read(&path).expect("read workbook")
}

/// One sheet per name, in order, each carrying its own name in A1.
pub fn sheets_workbook(names: &[&str]) -> Vec<u8> {
    workbook_bytes(|book| {
        let first = book.get_sheet_by_name_mut("Sheet1").expect("default sheet");
        first.set_name(names[0]);
        first.get_cell_mut("A1").set_value(names[0]);
        for name in &names[1..] {
            let sheet = book.new_sheet(*name).expect("new sheet");
            sheet.get_cell_mut("A1").set_value(*name);
        }
    })
}

/// Single-sheet workbook named `name`, filled by `f`.
pub fn single_sheet<F>(name: &str, f: F) -> Vec<u8>
where
    F: FnOnce(&mut Worksheet),
{
    workbook_bytes(|book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").expect("default sheet");
        sheet.set_name(name);
        f(sheet);
    })
}

/// Zero-based cell setters.
pub fn set_text(sheet: &mut Worksheet, row: u32, col: u32, value: &str) {
    sheet
        .get_cell_mut(cell_address(row, col).as_str())
        .set_value(value);
}

pub fn set_number(sheet: &mut Worksheet, row: u32, col: u32, value: f64) {
    sheet
        .get_cell_mut(cell_address(row, col).as_str())
        .set_value_number(value);
}

pub fn merge(sheet: &mut Worksheet, start: (u32, u32), end: (u32, u32)) {
    let range = format!(
        "{}:{}",
        cell_address(start.0, start.1),
        cell_address(end.0, end.1)
    );
    sheet.add_merge_cells(range);
}

pub struct TestWorkspace {
    _tempdir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let tempdir = tempdir().expect("tempdir");
        let root = tempdir.path().to_path_buf();
        Self {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage_root(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig::with_storage_root(self.storage_root())
    }

    pub fn config_with<F>(&self, configure: F) -> ServerConfig
    where
        F: FnOnce(&mut ServerConfig),
    {
        let mut config = self.config();
        configure(&mut config);
        config
    }

    pub fn app_state(&self) -> Arc<AppState> {
        app_state_with_config(self.config())
    }

    pub fn workbook_path(&self, descriptor: &UploadDescriptor) -> PathBuf {
        self.storage_root()
            .join(&descriptor.report_type)
            .join(format!("{}.xlsx", descriptor.id))
    }
}

pub fn app_state_with_config(config: ServerConfig) -> Arc<AppState> {
    Arc::new(AppState::new(Arc::new(config)).expect("app state"))
}
