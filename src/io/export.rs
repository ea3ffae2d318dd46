//! Export column tables to CSV and reports to JSON.
//!
//! Columns of different lengths are written as empty trailing cells, which
//! `ingest::read_table` reads back as the same ragged columns.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::AppError;
use crate::io::ingest::read_table;
use crate::io::table::ColumnTable;

/// Write `table` as CSV to `path`.
pub fn write_table_csv(path: &Path, table: &ColumnTable) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create CSV '{}': {e}", path.display())))?;
    write_table_to(file, table)
}

/// Write `table` as CSV to any writer.
pub fn write_table_to<W: Write>(writer: W, table: &ColumnTable) -> Result<(), AppError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(table.names())
        .map_err(|e| AppError::new(2, format!("Failed to write CSV header: {e}")))?;

    for row in 0..table.row_count() {
        let record: Vec<String> = table
            .columns()
            .iter()
            .map(|c| c.values.get(row).map(|v| format_cell(*v)).unwrap_or_default())
            .collect();
        wtr.write_record(&record)
            .map_err(|e| AppError::new(2, format!("Failed to write CSV row {}: {e}", row + 2)))?;
    }
    wtr.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush CSV: {e}")))?;
    Ok(())
}

fn format_cell(v: f64) -> String {
    if v.is_nan() { "NaN".to_string() } else { v.to_string() }
}

/// Load `path` if it exists, otherwise start an empty table.
pub fn load_or_create(path: &Path) -> Result<ColumnTable, AppError> {
    if path.exists() {
        read_table(path)
    } else {
        Ok(ColumnTable::new())
    }
}

/// Write any serializable report as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::new(2, format!("Failed to serialize JSON report: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| AppError::new(2, format!("Failed to write JSON '{}': {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ingest::read_table_from;

    #[test]
    fn ragged_table_survives_a_csv_round_trip() {
        let mut table = ColumnTable::new();
        table.set_column("H", vec![-1.5, 0.0, 2.25]);
        table.set_column("M", vec![0.1]);

        let mut buf = Vec::new();
        write_table_to(&mut buf, &table).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(text, "H,M\n-1.5,0.1\n0,\n2.25,\n");

        let back = read_table_from(buf.as_slice()).unwrap();
        assert_eq!(back, table);
    }
}
