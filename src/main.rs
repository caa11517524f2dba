use std::process::ExitCode;
use tracing::{error, info, info_span};
use txbatch::config::{ConfigSource, StoreConfig, DEFAULT_CONFIG_PATH};
use txbatch::logging::{self, LoggingConfig};
use txbatch::ConnectionHandle;

/// Opens the configured store and prints the tables it contains.
///
/// Usage: `txbatch [config file]` (`.env` when omitted)
fn main() -> ExitCode {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    match run(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "txbatch failed");
            eprintln!("txbatch: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(path: &str) -> txbatch::Result<()> {
    let source = ConfigSource::load(path)?;
    let log_config = LoggingConfig::from_source(&source)?;
    logging::init(&log_config)?;

    let span = info_span!("module", name = %log_config.module);
    let _entered = span.enter();

    let store = StoreConfig::from_source(&source)?;
    info!(config = path, "Starting txbatch...");

    let handle = ConnectionHandle::from_config(&store);
    handle.open()?;

    let schema = handle.schema()?;
    let mut tables: Vec<_> = schema.tables.values().collect();
    tables.sort_by(|a, b| a.name.cmp(&b.name));

    println!("{}: {} table(s)", handle.dsn(), tables.len());
    for table in tables {
        let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        println!("  {} ({})", table.name, columns.join(", "));
    }

    handle.close()
}
