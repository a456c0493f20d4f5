//! Dump command implementation.

use std::path::Path;

use burrowdb_core::LogCursor;
use tracing::debug;

/// Runs the dump command: prints one line per record, oldest first (or
/// newest first with `backward`).
pub fn run(
    path: &Path,
    limit: Option<usize>,
    backward: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log = super::open_log(path)?;
    debug!(first = %log.first_lsn(), last = %log.last_lsn(), "log opened");

    let mut cursor = LogCursor::new(&log);
    let max_records = limit.unwrap_or(usize::MAX);
    let mut printed = 0usize;

    let mut step = if backward {
        cursor.last()?
    } else {
        cursor.first()?
    };
    while let Some((lsn, record)) = step {
        if printed >= max_records {
            break;
        }
        println!("{lsn} {}", record.describe());
        printed += 1;
        step = if backward {
            cursor.prev()?
        } else {
            cursor.next()?
        };
    }

    println!();
    println!("{printed} records");
    Ok(())
}
