//! Source and cache constants shared across the pipeline stages.

// Default public sources (overridable through configuration)
pub const DEFAULT_CATALOG_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/demonstracoes_contabeis/";
pub const DEFAULT_REGISTRY_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/operadoras_de_plano_de_saude_ativas/";

pub const DEFAULT_CACHE_DIR: &str = "ansdata";
pub const DEFAULT_DATABASE_PATH: &str = "expenses.db";
pub const DEFAULT_CONFIG_PATH: &str = "expense_pipeline.toml";

/// Most recent quarterly archives considered per run.
pub const DEFAULT_MAX_ARTIFACTS: usize = 3;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 1000;
pub const DEFAULT_SERVER_PORT: u16 = 5000;

pub const ARCHIVE_EXTENSION: &str = ".zip";
pub const REGISTRY_EXTENSION: &str = ".csv";

// Derived files written into the cache directory
pub const CONSOLIDATED_CSV: &str = "consolidated_detail.csv";
pub const CONSOLIDATED_ZIP: &str = "consolidated_detail.zip";
pub const CONSOLIDATED_FINGERPRINT: &str = "consolidated_detail.sha256";
pub const ENRICHED_CSV: &str = "enriched.csv";
pub const AGGREGATED_CSV: &str = "aggregated.csv";
pub const RUN_REPORT_JSON: &str = "run_report.json";
pub const RUN_LOCK_FILE: &str = ".run.lock";

pub const OUTPUT_DELIMITER: u8 = b';';

/// Accounting class code column; codes starting with this prefix are expense/claims accounts.
pub const ACCOUNT_CLASS_COLUMN: &str = "CD_CONTA_CONTABIL";
pub const EXPENSE_ACCOUNT_PREFIX: char = '4';

/// Tax id used when a record has no registry match.
pub const UNKNOWN_TAX_ID: &str = "00000000000000";
pub const TAX_ID_WIDTH: usize = 14;

// Store tables
pub const DETAIL_TABLE: &str = "expense_detail";
pub const AGGREGATE_TABLE: &str = "expense_aggregates";
