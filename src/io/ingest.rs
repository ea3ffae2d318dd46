//! CSV ingest.
//!
//! Turns a header-row CSV of numeric columns into a `ColumnTable`, and picks
//! the four loop series (up-x, up-y, down-x, down-y) out of it.
//!
//! Design goals:
//! - **Ragged columns**: empty trailing cells are allowed, branches may differ in length
//! - **Strict numbers**: a non-numeric cell is an input error (exit code 2) naming line and column
//! - **No fitting logic here**

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::domain::{Branch, BranchData, LoopDataset};
use crate::error::{AppError, LoopError};
use crate::io::table::{Column, ColumnTable};

/// Load a CSV file into a column table.
pub fn read_table(path: &Path) -> Result<ColumnTable, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_table_from(file)
}

/// Parse CSV from any reader.
pub fn read_table_from<R: Read>(reader: R) -> Result<ColumnTable, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    if headers.is_empty() {
        return Err(AppError::new(2, "CSV has no header row."));
    }

    let mut columns: Vec<Column> = headers
        .iter()
        .map(|name| Column {
            name: name.trim_start_matches('\u{feff}').to_string(),
            values: Vec::new(),
        })
        .collect();

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        let record = result.map_err(|e| AppError::new(2, format!("CSV parse error on line {line}: {e}")))?;
        for (col, column) in columns.iter_mut().enumerate() {
            let cell = record.get(col).unwrap_or("");
            column.values.push(parse_cell(cell).ok_or_else(|| {
                AppError::new(
                    2,
                    format!("Line {line}, column '{}': '{cell}' is not a number.", column.name),
                )
            })?);
        }
    }

    for column in &mut columns {
        trim_trailing_missing(&mut column.values);
    }
    Ok(ColumnTable::from_columns(columns))
}

/// Empty cells are missing values (NaN).
fn parse_cell(cell: &str) -> Option<f64> {
    if cell.is_empty() {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok()
}

fn trim_trailing_missing(values: &mut Vec<f64>) {
    while values.last().is_some_and(|v| v.is_nan()) {
        values.pop();
    }
}

/// Which table columns hold the loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopColumns {
    /// up-x, up-y, down-x, down-y; `None` selects the first four columns.
    pub names: Option<[String; 4]>,
    /// Optional per-sample Y uncertainty columns for the up and down branch.
    pub sigma: Option<[String; 2]>,
}

/// Build a `LoopDataset` from the selected columns of `table`.
pub fn extract_loop(table: &ColumnTable, columns: &LoopColumns) -> Result<LoopDataset, AppError> {
    let series: Vec<Vec<f64>> = match &columns.names {
        Some(names) => names
            .iter()
            .map(|name| column_values(table, name))
            .collect::<Result<_, _>>()?,
        None => {
            if table.len() < 4 {
                return Err(AppError::new(
                    2,
                    format!("Need at least 4 columns for a loop, found {}.", table.len()),
                ));
            }
            (0..4)
                .filter_map(|i| table.column_at(i).map(|c| c.values.clone()))
                .collect()
        }
    };

    let mut iter = series.into_iter();
    let (Some(up_x), Some(up_y), Some(down_x), Some(down_y)) =
        (iter.next(), iter.next(), iter.next(), iter.next())
    else {
        return Err(AppError::new(2, "Need 4 loop columns."));
    };
    let mut dataset = LoopDataset::new(up_x, up_y, down_x, down_y)?;

    if let Some([up_sigma, down_sigma]) = &columns.sigma {
        dataset.up = with_sigma(Branch::Up, &dataset.up, column_values(table, up_sigma)?)?;
        dataset.down = with_sigma(Branch::Down, &dataset.down, column_values(table, down_sigma)?)?;
    }

    log::info!(
        "loaded loop: {} up samples, {} down samples",
        dataset.up.len(),
        dataset.down.len()
    );
    Ok(dataset)
}

fn column_values(table: &ColumnTable, name: &str) -> Result<Vec<f64>, AppError> {
    table.get(name).map(<[f64]>::to_vec).ok_or_else(|| {
        AppError::new(
            2,
            format!(
                "Missing column '{name}' (available: {}).",
                table.names().join(", ")
            ),
        )
    })
}

fn with_sigma(branch: Branch, data: &BranchData, sigma: Vec<f64>) -> Result<BranchData, LoopError> {
    if sigma.len() != data.len() {
        return Err(LoopError::LengthMismatch {
            branch,
            x_len: data.len(),
            y_len: sigma.len(),
        });
    }
    Ok(BranchData {
        sigma: Some(sigma),
        ..data.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\u{feff}H_up,M_up,H_dw,M_dw,err\n\
        -2,-1,2,1,0.1\n\
        0,0.5,0,0.5,0.1\n\
        2,1,,,0.2\n";

    #[test]
    fn ragged_branches_are_trimmed() {
        let table = read_table_from(CSV.as_bytes()).unwrap();
        assert_eq!(table.names()[0], "H_up");
        assert_eq!(table.get("H_dw"), Some(&[2.0, 0.0][..]));

        let ds = extract_loop(&table, &LoopColumns::default()).unwrap();
        assert_eq!(ds.up.len(), 3);
        assert_eq!(ds.down.len(), 2);
    }

    #[test]
    fn named_columns_and_sigma() {
        let table = read_table_from(CSV.as_bytes()).unwrap();
        let cols = LoopColumns {
            names: Some(["H_up".into(), "M_up".into(), "H_up".into(), "M_up".into()]),
            sigma: Some(["err".into(), "err".into()]),
        };
        let ds = extract_loop(&table, &cols).unwrap();
        assert_eq!(ds.down.sigma.as_ref().unwrap()[2], 0.2);
    }

    #[test]
    fn bad_cell_and_missing_column_exit_2() {
        let err = read_table_from("a,b\n1,x\n".as_bytes()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("Line 2"));

        let table = read_table_from("a,b,c,d\n1,2,3,4\n".as_bytes()).unwrap();
        let cols = LoopColumns {
            names: Some(["a".into(), "b".into(), "c".into(), "zz".into()]),
            sigma: None,
        };
        assert_eq!(extract_loop(&table, &cols).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn ragged_branch_length_mismatch_is_rejected() {
        let table = read_table_from("a,b,c,d\n1,2,3,4\n5,,7,8\n".as_bytes()).unwrap();
        let err = extract_loop(&table, &LoopColumns::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
