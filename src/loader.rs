//! Contact spreadsheet loading.
//!
//! Files come from spreadsheet exports of varying locale, so parsing tries a fixed
//! list of delimiter/encoding strategies and keeps the first that yields a
//! well-formed table.

use crate::error::{DispatchError, DispatchResult};
use crate::types::{ContactRow, ContactTable, PHONE_COLUMN};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Latin1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub delimiter: u8,
    pub encoding: Encoding,
}

pub const STRATEGIES: [Strategy; 3] = [
    Strategy {
        delimiter: b';',
        encoding: Encoding::Utf8,
    },
    Strategy {
        delimiter: b',',
        encoding: Encoding::Utf8,
    },
    Strategy {
        delimiter: b';',
        encoding: Encoding::Latin1,
    },
];

const CANDIDATE_DELIMITERS: [char; 2] = [';', ','];

pub async fn load(path: impl AsRef<Path>) -> DispatchResult<ContactTable> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| DispatchError::Load(format!("cannot read {}: {}", path.display(), err)))?;
    parse(&bytes)
}

pub fn parse(bytes: &[u8]) -> DispatchResult<ContactTable> {
    let mut failures = Vec::new();
    let mut parsed = None;
    for strategy in STRATEGIES {
        match parse_with(bytes, strategy) {
            Ok(table) => {
                debug!(
                    delimiter = %(strategy.delimiter as char),
                    encoding = ?strategy.encoding,
                    rows = table.rows.len(),
                    "contact file parsed"
                );
                parsed = Some(table);
                break;
            }
            Err(reason) => failures.push(format!(
                "'{}'/{:?}: {}",
                strategy.delimiter as char, strategy.encoding, reason
            )),
        }
    }

    let Some(table) = parsed else {
        return Err(DispatchError::Load(format!(
            "file is not a readable delimited table ({})",
            failures.join("; ")
        )));
    };

    if table.rows.is_empty() {
        return Err(DispatchError::Load("file has no data rows".to_string()));
    }
    if !table.has_column(PHONE_COLUMN) {
        return Err(DispatchError::Load(format!(
            "file must contain a '{}' column, found: {}",
            PHONE_COLUMN,
            table.columns.join(", ")
        )));
    }
    Ok(table)
}

fn decode(bytes: &[u8], encoding: Encoding) -> Result<String, String> {
    let text = match encoding {
        Encoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|err| err.to_string())?,
        Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
    };
    Ok(text
        .strip_prefix('\u{feff}')
        .map(str::to_string)
        .unwrap_or(text))
}

pub fn normalize_column(name: &str) -> String {
    name.trim().to_lowercase()
}

fn parse_with(bytes: &[u8], strategy: Strategy) -> Result<ContactTable, String> {
    let text = decode(bytes, strategy.encoding)?;

    let header_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    if header_line.trim().is_empty() {
        return Err("missing header row".to_string());
    }
    let delimiter = strategy.delimiter as char;
    if !header_line.contains(delimiter)
        && CANDIDATE_DELIMITERS
            .iter()
            .any(|c| *c != delimiter && header_line.contains(*c))
    {
        return Err(format!("header is not '{}'-delimited", delimiter));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(strategy.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|err| err.to_string())?
        .iter()
        .map(normalize_column)
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|err| err.to_string())?;
        if record.len() > columns.len() {
            return Err(format!(
                "record {} has {} fields, but the header has {}",
                index + 1,
                record.len(),
                columns.len()
            ));
        }
        // Short records get empty trailing cells.
        let values: HashMap<String, String> = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let value = record.get(i).unwrap_or_default().trim().to_string();
                (column.clone(), value)
            })
            .collect();
        rows.push(ContactRow::new(index, values));
    }

    Ok(ContactTable { columns, rows })
}

/// First `limit` rows for operator review, cells ordered like `columns`.
pub fn preview(table: &ContactTable, limit: usize) -> Vec<Vec<String>> {
    table
        .rows
        .iter()
        .take(limit)
        .map(|row| {
            table
                .columns
                .iter()
                .map(|c| row.get(c).unwrap_or_default().to_string())
                .collect()
        })
        .collect()
}
