//! Command-line interface for mongo-transfer
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and CLI overrides
//! - Building run requests from arguments
//! - Staging import files into the uploads directory

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{Config, LogLevel};
use crate::error::{ConfigError, Result};
use crate::model::WritePolicy;
use crate::transfer::{
    ExportRequest, ImportRequest, SyncRequest, UploadedFile, parse_collection_list,
};

/// Extract database name from MongoDB connection URI
///
/// Format: mongodb://[username:password@]host[:port][/database][?options]
fn extract_database_from_uri(uri: &str) -> Option<String> {
    let after_scheme = uri.split("://").nth(1)?;
    let path_part = after_scheme.split('/').nth(1)?;
    let db_name = path_part.split('?').next().unwrap_or("");
    if db_name.is_empty() {
        None
    } else {
        Some(db_name.to_string())
    }
}

/// Export, import and sync MongoDB databases
#[derive(Parser, Debug)]
#[command(
    name = "mongo-transfer",
    version,
    about = "Export, import and sync MongoDB collections",
    long_about = "Snapshot a database into a compressed archive, restore an archive under a
write policy (replace, merge, append), or copy collections directly between two servers."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Connection timeout in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,

    /// Documents per write batch
    #[arg(long, value_name = "N", global = true)]
    pub batch_size: Option<usize>,

    /// Show a progress bar
    #[arg(long, global = true)]
    pub progress: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export a database into a .tar.zst archive
    Export {
        /// MongoDB connection URI
        #[arg(long, value_name = "URI")]
        uri: String,

        /// Database to export (defaults to the URI's database)
        #[arg(long = "db", value_name = "NAME")]
        database: Option<String>,

        /// Comma-separated collections (default: all)
        #[arg(long, value_name = "LIST")]
        collections: Option<String>,
    },

    /// Import an archive or a collection file
    Import {
        /// MongoDB connection URI
        #[arg(long, value_name = "URI")]
        uri: String,

        /// Target database (defaults to the URI's database)
        #[arg(long = "db", value_name = "NAME")]
        database: Option<String>,

        /// Archive (.tar.zst, .tzst) or collection file (.json, .bson)
        #[arg(long, short = 'f', value_name = "FILE")]
        file: PathBuf,

        /// Write policy: replace, merge or append
        #[arg(long, value_name = "MODE", default_value = "merge")]
        mode: WritePolicy,
    },

    /// Copy collections between two databases
    Sync {
        /// Source connection URI
        #[arg(long, value_name = "URI")]
        source_uri: String,

        /// Target connection URI
        #[arg(long, value_name = "URI")]
        target_uri: String,

        /// Source database (defaults to the source URI's database)
        #[arg(long, value_name = "NAME")]
        source_db: Option<String>,

        /// Target database (defaults to the target URI's database)
        #[arg(long, value_name = "NAME")]
        target_db: Option<String>,

        /// Write policy: replace, merge or append
        #[arg(long, value_name = "MODE", default_value = "merge")]
        mode: WritePolicy,

        /// Comma-separated collections (default: all)
        #[arg(long, value_name = "LIST")]
        collections: Option<String>,
    },

    /// Resolve a finished export in the exports directory
    Download {
        /// Archive file name as reported by export
        #[arg(value_name = "FILENAME")]
        filename: String,
    },

    /// Show or validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },
}

/// CLI interface handler
pub struct CliInterface {
    args: CliArgs,
    config: Config,
}

impl CliInterface {
    /// Parse process arguments and load configuration
    pub fn new() -> Result<Self> {
        let args = CliArgs::parse();
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Build from already parsed arguments and configuration
    pub fn from_parts(args: CliArgs, config: Config) -> Self {
        Self { args, config }
    }

    /// Load configuration from file and merge with arguments
    fn load_config(args: &CliArgs) -> Result<Config> {
        let mut config = Config::load_from_file(args.config_file.as_deref())?;

        if let Err(e) = config.validate() {
            eprintln!("Warning: Configuration validation failed: {}", e);
            eprintln!("Using default configuration instead.");
            config = Config::default();
        }

        Self::apply_args_to_config(&mut config, args);
        config.validate()?;
        Ok(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Whether results should be printed with colors
    pub fn color_output(&self) -> bool {
        !self.args.no_color
    }

    /// Overrides configuration values with CLI arguments where provided
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            config.logging.level
        };

        if let Some(timeout) = args.timeout {
            config.connection.timeout = timeout;
        }
        if let Some(batch_size) = args.batch_size {
            config.transfer.batch_size = batch_size;
        }
        if args.progress {
            config.transfer.show_progress = true;
        }
    }

    /// Database from an explicit flag, else from the URI path
    fn resolve_database(explicit: &Option<String>, uri: &str, flag: &str) -> Result<String> {
        explicit
            .clone()
            .or_else(|| extract_database_from_uri(uri))
            .ok_or_else(|| ConfigError::MissingField(flag.to_string()).into())
    }

    /// Export request from `export` arguments
    pub fn export_request(&self) -> Result<Option<ExportRequest>> {
        let Commands::Export {
            uri,
            database,
            collections,
        } = &self.args.command
        else {
            return Ok(None);
        };

        Ok(Some(ExportRequest {
            connection_target: uri.clone(),
            database_name: Self::resolve_database(database, uri, "--db")?,
            collections: collections.clone(),
        }))
    }

    /// Import request from `import` arguments.
    ///
    /// The file is copied into the uploads directory first; the engine
    /// deletes the copy, never the user's file.
    pub fn import_request(&self) -> Result<Option<ImportRequest>> {
        let Commands::Import {
            uri,
            database,
            file,
            mode,
        } = &self.args.command
        else {
            return Ok(None);
        };

        let database_name = Self::resolve_database(database, uri, "--db")?;
        let upload = self.stage_upload(file)?;
        Ok(Some(ImportRequest {
            connection_target: uri.clone(),
            database_name,
            import_mode: *mode,
            upload,
        }))
    }

    /// Sync request from `sync` arguments
    pub fn sync_request(&self) -> Result<Option<SyncRequest>> {
        let Commands::Sync {
            source_uri,
            target_uri,
            source_db,
            target_db,
            mode,
            collections,
        } = &self.args.command
        else {
            return Ok(None);
        };

        Ok(Some(SyncRequest {
            source_database_name: Self::resolve_database(source_db, source_uri, "--source-db")?,
            target_database_name: Self::resolve_database(target_db, target_uri, "--target-db")?,
            source_connection_target: source_uri.clone(),
            target_connection_target: target_uri.clone(),
            sync_mode: *mode,
            collections: parse_collection_list(collections.as_deref()),
        }))
    }

    /// Copy `file` into the uploads directory under a unique name
    fn stage_upload(&self, file: &Path) -> Result<UploadedFile> {
        let original_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "file".to_string(),
                value: file.display().to_string(),
            })?
            .to_string();
        let size = std::fs::metadata(file)
            .map_err(|_| ConfigError::FileNotFound(file.display().to_string()))?
            .len();

        let original = UploadedFile {
            path: file.to_path_buf(),
            original_name,
            size,
        };
        original.validate(&self.config.upload)?;

        let uploads_dir = &self.config.paths.uploads_dir;
        std::fs::create_dir_all(uploads_dir)?;
        let staged = uploads_dir.join(staged_name(
            &original.original_name,
            &self.config.upload.allowed_extensions,
        ));
        std::fs::copy(file, &staged)?;

        Ok(UploadedFile {
            path: staged,
            ..original
        })
    }

    /// Handle the `config` subcommand
    pub fn handle_config_command(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.validate_config_file();
        }
        if show || !validate {
            self.show_config()?;
        }
        Ok(())
    }

    fn validate_config_file(&self) {
        let path = self.get_config_path();
        println!("Validating configuration file: {}", path.display());

        if !path.exists() {
            println!("Configuration file does not exist, defaults apply");
            return;
        }

        match Config::from_file(&path) {
            Ok(config) => match config.validate() {
                Ok(()) => println!("Configuration is valid"),
                Err(e) => println!("Configuration validation failed: {}", e),
            },
            Err(e) => println!("Failed to load configuration: {}", e),
        }
    }

    fn show_config(&self) -> Result<()> {
        println!("# Configuration file: {}", self.get_config_path().display());
        println!();
        println!("{}", self.config.to_toml()?);
        Ok(())
    }

    /// Configuration file path (from args or default)
    fn get_config_path(&self) -> PathBuf {
        self.args
            .config_file
            .clone()
            .unwrap_or_else(Config::default_config_path)
    }
}

/// Unique staging name keeping the file's recognised extension
fn staged_name(original_name: &str, allowed_extensions: &[String]) -> String {
    let lower = original_name.to_lowercase();
    let ext = allowed_extensions
        .iter()
        .find(|ext| lower.ends_with(&ext.to_lowercase()))
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();
    format!(
        "{}-{}{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple(),
        ext
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(argv: &[&str]) -> CliInterface {
        let args = CliArgs::try_parse_from(argv).unwrap();
        let mut config = Config::default();
        CliInterface::apply_args_to_config(&mut config, &args);
        CliInterface::from_parts(args, config)
    }

    #[test]
    fn test_extract_database_from_uri() {
        assert_eq!(
            extract_database_from_uri("mongodb://localhost:27017/mydb"),
            Some("mydb".to_string())
        );
        assert_eq!(
            extract_database_from_uri("mongodb://localhost:27017/mydb?retryWrites=true"),
            Some("mydb".to_string())
        );
        assert_eq!(extract_database_from_uri("mongodb://localhost:27017"), None);
        assert_eq!(extract_database_from_uri("mongodb://localhost:27017/"), None);
    }

    #[test]
    fn test_export_args() {
        let cli = cli(&[
            "mongo-transfer",
            "export",
            "--uri",
            "mongodb://localhost/shop",
            "--collections",
            "users,orders",
        ]);
        let request = cli.export_request().unwrap().unwrap();
        assert_eq!(request.database_name, "shop");
        assert_eq!(request.collections.as_deref(), Some("users,orders"));
        assert!(cli.sync_request().unwrap().is_none());
    }

    #[test]
    fn test_explicit_db_wins_over_uri() {
        let cli = cli(&[
            "mongo-transfer",
            "export",
            "--uri",
            "mongodb://localhost/shop",
            "--db",
            "other",
        ]);
        assert_eq!(cli.export_request().unwrap().unwrap().database_name, "other");
    }

    #[test]
    fn test_missing_database() {
        let cli = cli(&["mongo-transfer", "export", "--uri", "mongodb://localhost"]);
        assert!(cli.export_request().is_err());
    }

    #[test]
    fn test_sync_args_and_mode() {
        let cli = cli(&[
            "mongo-transfer",
            "sync",
            "--source-uri",
            "mongodb://a/src",
            "--target-uri",
            "mongodb://b/dst",
            "--mode",
            "APPEND",
            "--collections",
            " users, ,orders",
        ]);
        let request = cli.sync_request().unwrap().unwrap();
        assert_eq!(request.source_database_name, "src");
        assert_eq!(request.target_database_name, "dst");
        assert_eq!(request.sync_mode, WritePolicy::Append);
        assert_eq!(
            request.collections,
            Some(vec!["users".to_string(), "orders".to_string()])
        );
    }

    #[test]
    fn test_default_mode_is_merge() {
        let args = CliArgs::try_parse_from([
            "mongo-transfer",
            "import",
            "--uri",
            "mongodb://a/db",
            "--file",
            "backup.tar.zst",
        ])
        .unwrap();
        match args.command {
            Commands::Import { mode, .. } => assert_eq!(mode, WritePolicy::Merge),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let result = CliArgs::try_parse_from([
            "mongo-transfer",
            "sync",
            "--source-uri",
            "a",
            "--target-uri",
            "b",
            "--mode",
            "upsert",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = cli(&[
            "mongo-transfer",
            "--vv",
            "--timeout",
            "5",
            "--batch-size",
            "50",
            "--progress",
            "download",
            "x.tar.zst",
        ]);
        assert_eq!(cli.config().logging.level, LogLevel::Trace);
        assert_eq!(cli.config().connection.timeout, 5);
        assert_eq!(cli.config().transfer.batch_size, 50);
        assert!(cli.config().transfer.show_progress);
    }

    #[test]
    fn test_import_stages_a_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("users.json");
        std::fs::write(&source, "[]").unwrap();

        let args = CliArgs::try_parse_from([
            "mongo-transfer",
            "import",
            "--uri",
            "mongodb://a/db",
            "--file",
            source.to_str().unwrap(),
        ])
        .unwrap();
        let mut config = Config::default();
        config.paths.uploads_dir = dir.path().join("uploads");
        let cli = CliInterface::from_parts(args, config);

        let request = cli.import_request().unwrap().unwrap();
        assert_eq!(request.upload.original_name, "users.json");
        assert_eq!(request.upload.size, 2);
        assert!(request.upload.path.starts_with(dir.path().join("uploads")));
        assert!(request.upload.path.to_str().unwrap().ends_with(".json"));
        assert!(source.exists());
    }

    #[test]
    fn test_import_rejects_before_staging() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("backup.zip");
        std::fs::write(&source, "PK").unwrap();

        let args = CliArgs::try_parse_from([
            "mongo-transfer",
            "import",
            "--uri",
            "mongodb://a/db",
            "--file",
            source.to_str().unwrap(),
        ])
        .unwrap();
        let mut config = Config::default();
        config.paths.uploads_dir = dir.path().join("uploads");
        let cli = CliInterface::from_parts(args, config);

        assert!(cli.import_request().is_err());
        assert!(!dir.path().join("uploads").exists());
    }

    #[test]
    fn test_staged_name_keeps_double_extension() {
        let exts = vec![".tar.zst".to_string(), ".json".to_string()];
        assert!(staged_name("Backup.TAR.ZST", &exts).ends_with(".tar.zst"));
        assert!(staged_name("x.json", &exts).ends_with(".json"));
    }
}
