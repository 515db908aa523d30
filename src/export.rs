//! Export
//!
//! Writes the records matching a query as JSON, for backups and hand-offs
//! to other tools.

use std::io::Write;

use serde_json::Value;

use crate::engine::Engine;
use crate::error::Result;
use crate::query::Query;

/// Write the matching records as one pretty-printed JSON array
///
/// Returns the number of records written.
pub fn to_json<W: Write>(engine: &Engine, query: &Query, mut writer: W) -> Result<usize> {
    let result = engine.list(query)?;
    serde_json::to_writer_pretty(&mut writer, &result.records)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(result.records.len())
}

/// Write the matching records one compact JSON object per line
pub fn to_json_lines<W: Write>(engine: &Engine, query: &Query, mut writer: W) -> Result<usize> {
    let result = engine.list(query)?;
    for record in &result.records {
        write_line(&mut writer, record)?;
    }
    writer.flush()?;
    Ok(result.records.len())
}

fn write_line<W: Write>(writer: &mut W, record: &Value) -> Result<()> {
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")?;
    Ok(())
}
