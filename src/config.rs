//! Emulator configuration.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Default account name for development storage.
pub const DEFAULT_ACCOUNT: &str = "devstoreaccount1";

/// Default blob service port.
pub const DEFAULT_BLOB_PORT: u16 = 10000;

/// API version reported in responses.
pub const DEFAULT_API_VERSION: &str = "2021-10-04";

/// Default interval between extent garbage collection sweeps, in seconds.
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 600;

/// File name of the metadata snapshot inside the workspace.
pub const METADATA_FILE_NAME: &str = "__blobstorage__.json";

/// Directory name of the extent files inside the workspace.
pub const EXTENT_DIR_NAME: &str = "__blobstorage__";

/// Command-line arguments for the emulator.
#[derive(Parser, Debug, Clone)]
#[command(name = "azurite-core")]
#[command(about = "Local blob storage emulator with lease, block and conditional semantics")]
#[command(version)]
pub struct Args {
    /// Host address to bind to.
    #[arg(long = "blob-host", alias = "host", default_value = "127.0.0.1")]
    pub host: String,

    /// Port for blob service.
    #[arg(long, default_value_t = DEFAULT_BLOB_PORT)]
    pub blob_port: u16,

    /// Location for workspace data.
    #[arg(long, short = 'l')]
    pub location: Option<PathBuf>,

    /// Enable loose mode (skip block id length validation).
    #[arg(long)]
    pub loose: bool,

    /// Seconds between extent garbage collection sweeps (0 disables).
    #[arg(long, default_value_t = DEFAULT_GC_INTERVAL_SECS)]
    pub gc_interval: u64,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's')]
    pub silent: bool,

    /// In-memory mode (no persistence).
    #[arg(long)]
    pub in_memory: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            blob_port: DEFAULT_BLOB_PORT,
            location: None,
            loose: false,
            gc_interval: DEFAULT_GC_INTERVAL_SECS,
            debug: false,
            silent: false,
            in_memory: true,
        }
    }
}

/// Emulator configuration derived from command-line arguments.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host address to bind to.
    pub host: String,
    /// Port for blob service.
    pub blob_port: u16,
    /// Location for workspace data.
    pub location: Option<PathBuf>,
    /// Skip block id length validation.
    pub loose: bool,
    /// In-memory mode (no persistence).
    pub in_memory: bool,
    /// Interval between GC sweeps; `None` disables GC.
    pub gc_interval: Option<Duration>,
    /// Enable debug logging.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            blob_port: DEFAULT_BLOB_PORT,
            location: None,
            loose: false,
            in_memory: true,
            gc_interval: Some(Duration::from_secs(DEFAULT_GC_INTERVAL_SECS)),
            debug: false,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let in_memory = args.in_memory || args.location.is_none();
        Self {
            host: args.host,
            blob_port: args.blob_port,
            location: args.location,
            loose: args.loose,
            in_memory,
            gc_interval: (args.gc_interval > 0).then(|| Duration::from_secs(args.gc_interval)),
            debug: args.debug,
        }
    }
}

impl Config {
    /// Returns the bind address for the blob service.
    pub fn blob_bind_address(&self) -> String {
        format!("{}:{}", self.host, self.blob_port)
    }

    /// Path of the metadata snapshot file, if persistence is enabled.
    pub fn metadata_path(&self) -> Option<PathBuf> {
        self.persistent_location()
            .map(|location| location.join(METADATA_FILE_NAME))
    }

    /// Directory holding extent files, if persistence is enabled.
    pub fn extent_path(&self) -> Option<PathBuf> {
        self.persistent_location()
            .map(|location| location.join(EXTENT_DIR_NAME))
    }

    fn persistent_location(&self) -> Option<&PathBuf> {
        if self.in_memory {
            None
        } else {
            self.location.as_ref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_enables_persistence() {
        let args = Args::parse_from(["azurite-core", "--location", "/tmp/ws", "--gc-interval", "0"]);
        let config = Config::from(args);

        assert!(!config.in_memory);
        assert_eq!(config.gc_interval, None);
        assert_eq!(
            config.metadata_path(),
            Some(PathBuf::from("/tmp/ws").join(METADATA_FILE_NAME))
        );
    }

    #[test]
    fn test_in_memory_without_location() {
        let config = Config::from(Args::parse_from(["azurite-core"]));
        assert!(config.in_memory);
        assert_eq!(config.extent_path(), None);
    }
}
