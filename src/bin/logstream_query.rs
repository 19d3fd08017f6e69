//! logstream-query: read-only event log inspector
//!
//! Replays the segments under the configured log directory and prints the
//! matching records as JSON lines on stdout. Never writes to the log, so it
//! is safe to run next to a live bus.
//!
//! ## Usage
//! ```text
//! logstream-query all
//! logstream-query sent
//! logstream-query unsent
//! logstream-query unfinished
//! logstream-query execution <EXECUTION_ID> [HISTORY_DEPTH]
//! ```
//!
//! ## Configuration
//! - LOGSTREAM_CONFIG: Path to config file (default: logstream.yaml)
//! - LOGSTREAM__EVENT_LOG__DIR: Log directory override
//! - LOGSTREAM_LOG: Log filter for diagnostics on stderr (default: info)

use tracing::info;

use logstream::config::Config;
use logstream::event::EventRecord;
use logstream::log::LogReader;
use logstream::utils::bootstrap::init_tracing;

const USAGE: &str =
    "usage: logstream-query <all|sent|unsent|unfinished|execution ID [HISTORY_DEPTH]>";

fn print_records(records: &[EventRecord]) -> Result<(), serde_json::Error> {
    for record in records {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let config = Config::load(None)?;
    let reader = LogReader::from_config(&config.event_log);
    info!(dir = %reader.dir().display(), command = %command, "Querying event log");

    match command.as_str() {
        "all" => print_records(&reader.query_all().await?)?,
        "sent" => print_records(&reader.query_sent().await?)?,
        "unsent" => print_records(&reader.query_unsent().await?)?,
        "unfinished" => {
            for (execution_id, records) in reader.query_unfinished_executions().await? {
                let line = serde_json::json!({
                    "executionId": execution_id,
                    "events": records,
                });
                println!("{line}");
            }
        }
        "execution" => {
            let Some(execution_id) = args.get(1) else {
                eprintln!("{USAGE}");
                std::process::exit(2);
            };
            let depth = match args.get(2) {
                Some(depth) => depth.parse()?,
                None => config.bus.execution_history_depth,
            };
            print_records(&reader.query_by_execution_id(execution_id, depth).await?)?;
        }
        other => {
            eprintln!("unknown command '{other}'\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}
