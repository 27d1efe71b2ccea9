//! CSV reader/writer (spec §4.7). Reading normalizes CRLF/CR to LF before
//! tokenization; writing always emits LF-terminated, UTF-8 output with
//! RFC-4180 quoting via the `csv` crate.

use crate::error::{codes, Diagnostic};
use crate::exec::table::Table;
use crate::value::{Type, Value};

const MAX_COERCION_SAMPLES: usize = 5;

#[derive(Debug, Clone)]
pub struct CoercionDiagnostic {
    pub column: String,
    pub expected_type: Type,
    pub failure_count: usize,
    pub sample_rows: Vec<usize>,
    pub sample_values: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CsvReadResult {
    pub table: Table,
    pub coercion_diagnostics: Vec<CoercionDiagnostic>,
}

fn normalize_newlines(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Reads CSV text into a [Table]. `columns`, if given, pins an expected
/// column order/type set: a header mismatch is a schema-mismatch failure;
/// otherwise every column is read as STRING and left untyped.
pub fn read_csv(content: &str, columns: Option<&[(String, Type)]>) -> Result<CsvReadResult, Diagnostic> {
    let normalized = normalize_newlines(content);
    let mut reader = ::csv::ReaderBuilder::new().has_headers(false).from_reader(normalized.as_bytes());
    let mut records = reader.records();

    let header = records
        .next()
        .ok_or_else(|| Diagnostic::new(codes::SANS_RUNTIME_INPUT_NOT_FOUND, "CSV source has no header line"))?
        .map_err(|e| Diagnostic::new(codes::SANS_RUNTIME_INPUT_NOT_FOUND, format!("malformed CSV header: {e}")))?;

    let header_names: Vec<String> = header.iter().map(|h| h.to_string()).collect();

    if let Some(expected) = columns {
        let expected_names: Vec<&str> = expected.iter().map(|(n, _)| n.as_str()).collect();
        if header_names.iter().map(|s| s.as_str()).collect::<Vec<_>>() != expected_names {
            return Err(Diagnostic::new(
                codes::SANS_RUNTIME_DATASOURCE_SCHEMA_MISMATCH,
                format!(
                    "expected columns [{}], found [{}]",
                    expected_names.join(","),
                    header_names.join(",")
                ),
            ));
        }
    }

    let types: Vec<Type> = match columns {
        Some(cols) => cols.iter().map(|(_, t)| *t).collect(),
        None => header_names.iter().map(|_| Type::String).collect(),
    };

    let mut table = Table::new(header_names.clone());
    let mut diag_by_col: std::collections::BTreeMap<usize, CoercionDiagnostic> = std::collections::BTreeMap::new();

    for (row_idx, record) in records.enumerate() {
        let record = record
            .map_err(|e| Diagnostic::new(codes::SANS_RUNTIME_INPUT_NOT_FOUND, format!("malformed CSV row: {e}")))?;
        let mut row = Vec::with_capacity(header_names.len());
        for (col_idx, ty) in types.iter().enumerate() {
            let raw = record.get(col_idx).unwrap_or("");
            match Value::from_csv_token(raw, *ty) {
                Ok(v) => row.push(v),
                Err(reason) => {
                    let entry = diag_by_col.entry(col_idx).or_insert_with(|| CoercionDiagnostic {
                        column: header_names[col_idx].clone(),
                        expected_type: *ty,
                        failure_count: 0,
                        sample_rows: Vec::new(),
                        sample_values: Vec::new(),
                        reason: reason.clone(),
                    });
                    entry.failure_count += 1;
                    if entry.sample_rows.len() < MAX_COERCION_SAMPLES {
                        entry.sample_rows.push(row_idx + 1);
                        entry.sample_values.push(raw.to_string());
                    }
                    row.push(Value::Null);
                }
            }
        }
        table.rows.push(row);
    }

    Ok(CsvReadResult { table, coercion_diagnostics: diag_by_col.into_values().collect() })
}

/// Writes a [Table] as LF-terminated, UTF-8, comma-delimited CSV with
/// RFC-4180 quoting. Deterministic for a given table.
pub fn write_csv(table: &Table) -> Vec<u8> {
    let mut writer = ::csv::WriterBuilder::new()
        .terminator(::csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(&table.columns).expect("in-memory writer never fails");
    for row in &table.rows {
        let fields: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writer.write_record(&fields).expect("in-memory writer never fails");
    }
    writer.into_inner().expect("in-memory writer never fails")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_crlf_normalized_rows() {
        let r = read_csv("a,b\r\n1,2\r\n", None).unwrap();
        assert_eq!(r.table.columns, vec!["a", "b"]);
        assert_eq!(r.table.rows.len(), 1);
    }

    #[test]
    fn empty_token_is_null() {
        let r = read_csv("a,b\n1,\n", None).unwrap();
        assert_eq!(r.table.rows[0][1], Value::Null);
    }

    #[test]
    fn typed_coercion_failure_is_recorded() {
        let r = read_csv("a\nnot_a_number\n", Some(&[("a".to_string(), Type::Int)])).unwrap();
        assert_eq!(r.coercion_diagnostics.len(), 1);
        assert_eq!(r.coercion_diagnostics[0].reason, "invalid_int");
        assert_eq!(r.coercion_diagnostics[0].sample_rows, vec![1]);
    }

    #[test]
    fn schema_mismatch_is_refused() {
        let err = read_csv("x,y\n1,2\n", Some(&[("a".to_string(), Type::Int)])).unwrap_err();
        assert_eq!(err.code, codes::SANS_RUNTIME_DATASOURCE_SCHEMA_MISMATCH);
    }

    #[test]
    fn write_round_trips_through_read() {
        let r = read_csv("a,b\n1,hello\n2,world\n", None).unwrap();
        let bytes = write_csv(&r.table);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "a,b\n1,hello\n2,world\n");
    }
}
