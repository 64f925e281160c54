use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const DEFAULT_STORAGE_ROOT: &str = "uploads";
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8079";
const DEFAULT_CACHE_CAPACITY: usize = 8;
const DEFAULT_HISTORY_LIMIT: usize = 5;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_SCAN_MAX_ROWS: u32 = 200;
const DEFAULT_SCAN_MAX_COLS: u32 = 60;
const DEFAULT_MARKER_SYNONYMS: &[&str] = &["total", "tong", "tong cong"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding persisted uploads, one sub-directory per report type
    pub storage_root: PathBuf,
    pub http_bind_address: SocketAddr,
    /// Parsed workbooks kept in memory
    pub cache_capacity: usize,
    /// Uploads retained per report type, latest included
    pub history_limit: usize,
    pub max_upload_bytes: usize,
    /// Row bound for every heuristic scan
    pub scan_max_rows: u32,
    /// Column bound for every heuristic scan
    pub scan_max_cols: u32,
    /// Extra normalized total-marker synonyms, merged with the defaults
    pub marker_synonyms: Vec<String>,
    /// Per report type default-sheet overrides
    pub preferred_sheets: BTreeMap<String, String>,
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            storage_root: cli_storage_root,
            http_bind: cli_http_bind,
            cache_capacity: cli_cache_capacity,
            history_limit: cli_history_limit,
            max_upload_bytes: cli_max_upload_bytes,
            scan_max_rows: cli_scan_max_rows,
            scan_max_cols: cli_scan_max_cols,
            marker_synonyms: cli_marker_synonyms,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            storage_root: file_storage_root,
            http_bind: file_http_bind,
            cache_capacity: file_cache_capacity,
            history_limit: file_history_limit,
            max_upload_bytes: file_max_upload_bytes,
            scan_max_rows: file_scan_max_rows,
            scan_max_cols: file_scan_max_cols,
            marker_synonyms: file_marker_synonyms,
            preferred_sheets: file_preferred_sheets,
        } = file_config;

        let storage_root = cli_storage_root
            .or(file_storage_root)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));

        let http_bind_address = match cli_http_bind.or(file_http_bind) {
            Some(addr) => addr,
            None => DEFAULT_HTTP_BIND
                .parse()
                .context("default bind address is invalid")?,
        };

        let mut marker_synonyms: Vec<String> = DEFAULT_MARKER_SYNONYMS
            .iter()
            .map(|s| (*s).to_string())
            .chain(
                cli_marker_synonyms
                    .or(file_marker_synonyms)
                    .unwrap_or_default(),
            )
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        marker_synonyms.sort();
        marker_synonyms.dedup();

        Ok(Self {
            storage_root,
            http_bind_address,
            cache_capacity: cli_cache_capacity
                .or(file_cache_capacity)
                .unwrap_or(DEFAULT_CACHE_CAPACITY),
            history_limit: cli_history_limit
                .or(file_history_limit)
                .unwrap_or(DEFAULT_HISTORY_LIMIT),
            max_upload_bytes: cli_max_upload_bytes
                .or(file_max_upload_bytes)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            scan_max_rows: cli_scan_max_rows
                .or(file_scan_max_rows)
                .unwrap_or(DEFAULT_SCAN_MAX_ROWS),
            scan_max_cols: cli_scan_max_cols
                .or(file_scan_max_cols)
                .unwrap_or(DEFAULT_SCAN_MAX_COLS),
            marker_synonyms,
            preferred_sheets: file_preferred_sheets.unwrap_or_default(),
        })
    }

    /// Configuration rooted at `storage_root` with every other knob at its default.
    pub fn with_storage_root(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            http_bind_address: SocketAddr::from(([127, 0, 0, 1], 8079)),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            scan_max_rows: DEFAULT_SCAN_MAX_ROWS,
            scan_max_cols: DEFAULT_SCAN_MAX_COLS,
            marker_synonyms: DEFAULT_MARKER_SYNONYMS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            preferred_sheets: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.cache_capacity > 0, "cache_capacity must be at least 1");
        anyhow::ensure!(self.history_limit > 0, "history_limit must be at least 1");
        anyhow::ensure!(
            self.max_upload_bytes > 0,
            "max_upload_bytes must be greater than zero"
        );
        anyhow::ensure!(self.scan_max_rows > 0, "scan_max_rows must be at least 1");
        anyhow::ensure!(self.scan_max_cols > 0, "scan_max_cols must be at least 1");
        anyhow::ensure!(
            !self.marker_synonyms.is_empty(),
            "at least one total-marker synonym is required"
        );
        Ok(())
    }

    pub fn ensure_storage_root(&self) -> Result<()> {
        if !self.storage_root.exists() {
            fs::create_dir_all(&self.storage_root).with_context(|| {
                format!("failed to create storage root {:?}", self.storage_root)
            })?;
        }
        anyhow::ensure!(
            self.storage_root.is_dir(),
            "storage root {:?} is not a directory",
            self.storage_root
        );
        Ok(())
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "report-sheets",
    about = "Spreadsheet report ingestion and windowed viewing server",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "REPORT_SHEETS_STORAGE_ROOT",
        value_name = "DIR",
        help = "Directory where uploaded workbooks are stored"
    )]
    pub storage_root: Option<PathBuf>,

    #[arg(
        long,
        env = "REPORT_SHEETS_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "REPORT_SHEETS_CACHE_CAPACITY",
        value_name = "N",
        help = "Maximum number of parsed workbooks kept in memory"
    )]
    pub cache_capacity: Option<usize>,

    #[arg(
        long,
        env = "REPORT_SHEETS_HISTORY_LIMIT",
        value_name = "N",
        help = "Uploads retained per report type"
    )]
    pub history_limit: Option<usize>,

    #[arg(
        long,
        env = "REPORT_SHEETS_MAX_UPLOAD_BYTES",
        value_name = "BYTES",
        help = "Largest accepted upload"
    )]
    pub max_upload_bytes: Option<usize>,

    #[arg(
        long,
        env = "REPORT_SHEETS_SCAN_MAX_ROWS",
        value_name = "N",
        help = "Rows scanned when looking for total markers and labels"
    )]
    pub scan_max_rows: Option<u32>,

    #[arg(
        long,
        env = "REPORT_SHEETS_SCAN_MAX_COLS",
        value_name = "N",
        help = "Columns scanned when looking for total markers and labels"
    )]
    pub scan_max_cols: Option<u32>,

    #[arg(
        long,
        env = "REPORT_SHEETS_MARKER_SYNONYMS",
        value_name = "WORD",
        value_delimiter = ',',
        help = "Additional total-marker synonyms"
    )]
    pub marker_synonyms: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    storage_root: Option<PathBuf>,
    http_bind: Option<SocketAddr>,
    cache_capacity: Option<usize>,
    history_limit: Option<usize>,
    max_upload_bytes: Option<usize>,
    scan_max_rows: Option<u32>,
    scan_max_cols: Option<u32>,
    marker_synonyms: Option<Vec<String>>,
    preferred_sheets: Option<BTreeMap<String, String>>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_file() {
        let config = ServerConfig::from_args(CliArgs::default()).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("uploads"));
        assert_eq!(config.cache_capacity, 8);
        assert_eq!(config.scan_max_rows, 200);
        assert_eq!(config.scan_max_cols, 60);
        assert!(config.marker_synonyms.contains(&"tong".to_string()));
        config.validate().unwrap();
    }

    #[test]
    fn cli_overrides_file_and_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "storage_root: /srv/reports\nscan_max_rows: 50\nhistory_limit: 2\n\
             marker_synonyms: [grand total]\npreferred_sheets:\n  payroll: Luong\n",
        )
        .unwrap();

        let config = ServerConfig::from_args(CliArgs {
            config: Some(path),
            scan_max_rows: Some(75),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(config.storage_root, PathBuf::from("/srv/reports"));
        assert_eq!(config.scan_max_rows, 75);
        assert_eq!(config.history_limit, 2);
        assert!(config.marker_synonyms.contains(&"grand total".to_string()));
        assert!(config.marker_synonyms.contains(&"total".to_string()));
        assert_eq!(
            config.preferred_sheets.get("payroll").map(String::as_str),
            Some("Luong")
        );
    }

    #[test]
    fn zero_bounds_fail_validation() {
        let mut config = ServerConfig::with_storage_root("/tmp/x");
        config.scan_max_rows = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(&path, "x=1").unwrap();
        let err = ServerConfig::from_args(CliArgs {
            config: Some(path),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("unsupported config extension"));
    }
}
