//! Per-table evidence collection for the artifact bundle's `evidence.json`
//! (ported from `evidence.py`, spec §4.8). Evidence is a cheap, bounded
//! summary of each output table's columns — not a row dump — so the bundle
//! stays small even for large tables.

use std::collections::BTreeMap;

use serde_json::{json, Value as Json};

use crate::decimal::Decimal;
use crate::exec::table::Table;
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
pub struct EvidenceConfig {
    pub unique_cap: usize,
    pub topk: usize,
    pub include_top_values: bool,
    pub sample_cap: usize,
}

pub const DEFAULT_EVIDENCE_CONFIG: EvidenceConfig =
    EvidenceConfig { unique_cap: 2048, topk: 5, include_top_values: true, sample_cap: 100_000 };

/// Normalizes a decimal's string form for display/sort-key purposes: strips
/// a leading `+`, supplies a leading `0` for a bare `.123`/`-.123`, and
/// strips a trailing `.` or trailing zero fraction digits. `"-0"` collapses
/// to `"0"`.
fn normalize_decimal_string(raw: &str) -> String {
    let mut s = raw.trim().to_string();
    if let Some(stripped) = s.strip_prefix('+') {
        s = stripped.to_string();
    }
    let negative = s.starts_with('-');
    let body = if negative { &s[1..] } else { &s[..] };
    let body = if let Some(rest) = body.strip_prefix('.') { format!("0.{rest}") } else { body.to_string() };
    let mut body = body;
    if body.contains('.') {
        while body.ends_with('0') {
            body.pop();
        }
        if body.ends_with('.') {
            body.pop();
        }
    }
    if body.is_empty() {
        body = "0".to_string();
    }
    let result = if negative && body != "0" { format!("-{body}") } else { body };
    if result == "-0" {
        "0".to_string()
    } else {
        result
    }
}

fn decimal_to_string(d: &Decimal) -> String {
    normalize_decimal_string(&d.to_normalized_string())
}

/// Normalizes a value into a `(sort_key, display_string, type_tag)` triple
/// used for uniqueness tracking and top-value ranking.
fn normalize_value(v: &Value) -> (String, String, &'static str) {
    match v {
        Value::Null => ("".to_string(), "".to_string(), "null"),
        Value::Bool(b) => (b.to_string(), b.to_string(), "bool"),
        Value::Int(i) => (i.to_string(), i.to_string(), "int"),
        Value::Decimal(d) => {
            let s = decimal_to_string(d);
            (s.clone(), s, "decimal")
        }
        Value::String(s) => (s.clone(), s.clone(), "string"),
    }
}

struct ColumnCollector {
    null_count: usize,
    non_null_count: usize,
    uniques: BTreeMap<String, (String, &'static str, usize)>,
    unique_count_capped: bool,
    unique_cap: usize,
    constant_candidate: Option<(String, &'static str)>,
    constant_broken: bool,
    type_tags_seen: std::collections::BTreeSet<&'static str>,
}

impl ColumnCollector {
    fn new(unique_cap: usize) -> Self {
        ColumnCollector {
            null_count: 0,
            non_null_count: 0,
            uniques: BTreeMap::new(),
            unique_count_capped: false,
            unique_cap,
            constant_candidate: None,
            constant_broken: false,
            type_tags_seen: std::collections::BTreeSet::new(),
        }
    }

    fn observe(&mut self, v: &Value) {
        if v.is_null() {
            self.null_count += 1;
            self.constant_broken = true;
            return;
        }
        self.non_null_count += 1;
        let (sort_key, display, tag) = normalize_value(v);
        self.type_tags_seen.insert(tag);

        if !self.constant_broken {
            match &self.constant_candidate {
                None => self.constant_candidate = Some((sort_key.clone(), tag)),
                Some((k, t)) if *k == sort_key && *t == tag => {}
                Some(_) => self.constant_broken = true,
            }
        }

        if !self.unique_count_capped {
            if self.uniques.contains_key(&sort_key) || self.uniques.len() < self.unique_cap {
                let entry = self.uniques.entry(sort_key).or_insert((display, tag, 0));
                entry.2 += 1;
            } else {
                self.unique_count_capped = true;
            }
        }
    }

    fn type_hint(&self) -> &'static str {
        if self.non_null_count == 0 {
            return "null";
        }
        if self.type_tags_seen.len() == 1 {
            return self.type_tags_seen.iter().next().unwrap();
        }
        "unknown"
    }

    fn to_json(&self, topk: usize, include_top_values: bool) -> Json {
        let unique_count = if self.unique_count_capped {
            Json::String(format!(">={}+1", self.unique_cap))
        } else {
            Json::from(self.uniques.len())
        };

        let constant_value = if !self.constant_broken && self.non_null_count > 0 {
            self.constant_candidate.as_ref().map(|(_, _)| {
                self.uniques.values().next().map(|(display, _, _)| display.clone()).unwrap_or_default()
            })
        } else {
            None
        };

        let mut out = json!({
            "null_count": self.null_count,
            "non_null_count": self.non_null_count,
            "unique_count": unique_count,
            "type_hint": self.type_hint(),
        });

        if let Some(cv) = constant_value {
            out["constant_value"] = Json::String(cv);
        }

        if include_top_values && !self.unique_count_capped {
            let mut entries: Vec<(&String, &(String, &'static str, usize))> = self.uniques.iter().collect();
            entries.sort_by(|a, b| {
                let ((_, _, ca), ka) = (a.1, a.0);
                let ((_, _, cb), kb) = (b.1, b.0);
                cb.cmp(ca).then_with(|| ka.cmp(kb)).then_with(|| a.1 .1.cmp(b.1 .1))
            });
            let top: Vec<Json> = entries
                .into_iter()
                .take(topk)
                .map(|(_, (display, tag, count))| json!({"value": display, "type": tag, "count": count}))
                .collect();
            out["top_values"] = Json::Array(top);
        }

        out
    }
}

/// Deterministic stride sampling: if `row_count <= sample_cap`, all rows are
/// used; otherwise every `step`-th row is taken, `step = max(1, row_count /
/// sample_cap)`, always including row 0.
fn sample_indices(row_count: usize, sample_cap: usize) -> (Vec<usize>, Option<usize>) {
    if row_count <= sample_cap {
        return ((0..row_count).collect(), None);
    }
    let step = std::cmp::max(1, row_count / sample_cap);
    let indices: Vec<usize> = (0..row_count).step_by(step).collect();
    (indices, Some(step))
}

pub fn collect_table_evidence(table: &Table, config: &EvidenceConfig) -> Json {
    let row_count = table.row_count();
    let (indices, step) = sample_indices(row_count, config.sample_cap);

    let mut collectors: Vec<ColumnCollector> =
        table.columns.iter().map(|_| ColumnCollector::new(config.unique_cap)).collect();

    for &idx in &indices {
        let row = &table.rows[idx];
        for (c, collector) in collectors.iter_mut().enumerate() {
            collector.observe(&row[c]);
        }
    }

    let mut columns = serde_json::Map::new();
    for (name, collector) in table.columns.iter().zip(collectors.iter()) {
        columns.insert(name.clone(), collector.to_json(config.topk, config.include_top_values));
    }

    let mut out = json!({
        "row_count": row_count,
        "columns": columns,
    });

    if let Some(step) = step {
        out["sample"] = json!({
            "strategy": "stride",
            "cap": config.sample_cap,
            "size": indices.len(),
            "step": step,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_table(values: Vec<Option<i64>>) -> Table {
        let mut t = Table::new(vec!["a".to_string()]);
        for v in values {
            t.rows.push(vec![match v {
                Some(i) => Value::Int(i.into()),
                None => Value::Null,
            }]);
        }
        t
    }

    #[test]
    fn constant_column_reports_constant_value() {
        let t = int_table(vec![Some(7), Some(7), Some(7)]);
        let e = collect_table_evidence(&t, &DEFAULT_EVIDENCE_CONFIG);
        assert_eq!(e["columns"]["a"]["constant_value"], "7");
    }

    #[test]
    fn null_breaks_constant_detection() {
        let t = int_table(vec![Some(7), None, Some(7)]);
        let e = collect_table_evidence(&t, &DEFAULT_EVIDENCE_CONFIG);
        assert!(e["columns"]["a"].get("constant_value").is_none());
        assert_eq!(e["columns"]["a"]["null_count"], 1);
    }

    #[test]
    fn unique_count_caps_and_marks_overflow() {
        let values: Vec<Option<i64>> = (0..5).map(Some).collect();
        let t = int_table(values);
        let cfg = EvidenceConfig { unique_cap: 2, ..DEFAULT_EVIDENCE_CONFIG };
        let e = collect_table_evidence(&t, &cfg);
        assert_eq!(e["columns"]["a"]["unique_count"], ">=2+1");
        assert!(e["columns"]["a"].get("top_values").is_none());
    }

    #[test]
    fn top_values_sorted_by_count_desc_then_key() {
        let t = int_table(vec![Some(1), Some(2), Some(2), Some(3)]);
        let e = collect_table_evidence(&t, &DEFAULT_EVIDENCE_CONFIG);
        let top = e["columns"]["a"]["top_values"].as_array().unwrap();
        assert_eq!(top[0]["value"], "2");
        assert_eq!(top[0]["count"], 2);
    }

    #[test]
    fn decimal_normalization_strips_trailing_zeros() {
        assert_eq!(normalize_decimal_string("1.500"), "1.5");
        assert_eq!(normalize_decimal_string(".5"), "0.5");
        assert_eq!(normalize_decimal_string("-0.0"), "0");
    }

    #[test]
    fn sample_indices_under_cap_returns_all_rows() {
        let (idx, step) = sample_indices(10, 100);
        assert_eq!(idx.len(), 10);
        assert_eq!(step, None);
    }

    #[test]
    fn sample_indices_over_cap_strides_deterministically() {
        let (idx, step) = sample_indices(1000, 100);
        assert_eq!(step, Some(10));
        assert_eq!(idx[0], 0);
        assert!(idx.len() <= 100);
    }
}
