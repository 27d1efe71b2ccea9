//! Pure, in-memory operator executors (spec §4.6 "Operator contracts").
//!
//! Datasource loading and `save` touch the filesystem and are driven
//! directly by [crate::exec::Engine]; every operator here is a table-in,
//! table-out (or table-in, scalar-out) function with no I/O.

use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as Json;

use crate::ast::parser::parse_expr;
use crate::decimal::Decimal;
use crate::error::{codes, Diagnostic, Loc};
use crate::exec::eval::{eval, EvalCtx, FormatDef, FormatRegistry};
use crate::exec::table::Table;
use crate::value::Value;

pub fn identity(src: &Table) -> Table {
    src.clone()
}

pub fn compute(
    src: &Table,
    assignments: &[(String, String)],
    scalars: &HashMap<String, Value>,
    formats: &FormatRegistry,
    loc: &Loc,
) -> Result<Table, Diagnostic> {
    let mut out = src.clone();
    for (target, _) in assignments {
        out.ensure_column(target);
    }
    let parsed: Vec<(usize, crate::ast::expr::Expr)> = assignments
        .iter()
        .map(|(target, expr_text)| -> Result<_, Diagnostic> {
            let idx = out.col_index(target).unwrap();
            let e = parse_expr(expr_text, &loc.file, loc.line_start)?;
            Ok((idx, e))
        })
        .collect::<Result<_, _>>()?;

    let columns = out.columns.clone();
    for row in out.rows.iter_mut() {
        for (idx, expr) in &parsed {
            let v = {
                let ctx = EvalCtx { columns: &columns, row: row.as_slice(), scalars, formats };
                eval(expr, &ctx)?
            };
            row[*idx] = v;
        }
    }
    Ok(out)
}

pub fn filter(
    src: &Table,
    expr_text: &str,
    scalars: &HashMap<String, Value>,
    formats: &FormatRegistry,
    loc: &Loc,
) -> Result<Table, Diagnostic> {
    let expr = parse_expr(expr_text, &loc.file, loc.line_start)?;
    let mut out = Table::new(src.columns.clone());
    for row in &src.rows {
        let ctx = EvalCtx { columns: &src.columns, row, scalars, formats };
        if eval(&expr, &ctx)?.is_truthy() {
            out.rows.push(row.clone());
        }
    }
    Ok(out)
}

pub fn select(src: &Table, mode: &str, columns: &[String], loc: &Loc) -> Result<Table, Diagnostic> {
    let keep: Vec<usize> = match mode {
        "keep" => columns
            .iter()
            .map(|c| {
                src.col_index(c).ok_or_else(|| {
                    Diagnostic::new(codes::SANS_RUNTIME_MISSING_COLUMN, format!("no such column '{c}'"))
                        .with_loc(loc.clone())
                })
            })
            .collect::<Result<_, _>>()?,
        "drop" => {
            let drop_set: HashSet<&String> = columns.iter().collect();
            (0..src.columns.len()).filter(|i| !drop_set.contains(&src.columns[*i])).collect()
        }
        other => {
            return Err(Diagnostic::new(
                codes::SANS_RUNTIME_UNSUPPORTED_EXPR_NODE,
                format!("unknown select mode '{other}'"),
            )
            .with_loc(loc.clone()))
        }
    };
    let out_columns: Vec<String> = keep.iter().map(|&i| src.columns[i].clone()).collect();
    let mut out = Table::new(out_columns);
    for row in &src.rows {
        out.rows.push(keep.iter().map(|&i| row[i].clone()).collect());
    }
    Ok(out)
}

pub fn rename(src: &Table, pairs: &[(String, String)], loc: &Loc) -> Result<Table, Diagnostic> {
    let mut targets = HashSet::new();
    for (_, to) in pairs {
        if !targets.insert(to.clone()) {
            return Err(Diagnostic::new(
                codes::SANS_RUNTIME_DUPLICATE_RENAME_TARGET,
                format!("duplicate rename target '{to}'"),
            )
            .with_loc(loc.clone()));
        }
    }
    let map: HashMap<&str, &str> = pairs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    let columns = src
        .columns
        .iter()
        .map(|c| map.get(c.as_str()).map(|t| t.to_string()).unwrap_or_else(|| c.clone()))
        .collect();
    Ok(Table { columns, rows: src.rows.clone() })
}

pub fn sort(src: &Table, by: &[(String, bool)], nodupkey: bool, loc: &Loc) -> Result<Table, Diagnostic> {
    let idxs: Vec<(usize, bool)> = by
        .iter()
        .map(|(c, desc)| {
            src.col_index(c)
                .map(|i| (i, *desc))
                .ok_or_else(|| Diagnostic::new(codes::SANS_RUNTIME_MISSING_COLUMN, format!("no such column '{c}'")).with_loc(loc.clone()))
        })
        .collect::<Result<_, _>>()?;

    let mut indices: Vec<usize> = (0..src.rows.len()).collect();
    let mut sort_err = None;
    indices.sort_by(|&a, &b| {
        if sort_err.is_some() {
            return std::cmp::Ordering::Equal;
        }
        for &(col, desc) in &idxs {
            let va = &src.rows[a][col];
            let vb = &src.rows[b][col];
            let ord = match (va.is_null(), vb.is_null()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => if desc { std::cmp::Ordering::Greater } else { std::cmp::Ordering::Less },
                (false, true) => if desc { std::cmp::Ordering::Less } else { std::cmp::Ordering::Greater },
                (false, false) => match va.compare(vb) {
                    Ok(o) => o,
                    Err(e) => {
                        sort_err = Some(e);
                        std::cmp::Ordering::Equal
                    }
                },
            };
            let ord = if desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    if let Some(e) = sort_err {
        return Err(e.with_loc(loc.clone()));
    }

    let mut out = Table::new(src.columns.clone());
    let mut seen_keys: HashSet<String> = HashSet::new();
    for i in indices {
        if nodupkey {
            let key = idxs.iter().map(|(c, _)| src.rows[i][*c].to_string()).collect::<Vec<_>>().join("\u{1}");
            if !seen_keys.insert(key) {
                continue;
            }
        }
        out.rows.push(src.rows[i].clone());
    }
    Ok(out)
}

pub fn aggregate(
    src: &Table,
    class: &[String],
    var: &[String],
    stats: &[String],
    loc: &Loc,
) -> Result<Table, Diagnostic> {
    let class_idx: Vec<usize> = class
        .iter()
        .map(|c| src.col_index(c).ok_or_else(|| missing_col(c, loc)))
        .collect::<Result<_, _>>()?;
    let var_idx: Vec<usize> = var
        .iter()
        .map(|c| src.col_index(c).ok_or_else(|| missing_col(c, loc)))
        .collect::<Result<_, _>>()?;

    let mut groups: BTreeMap<Vec<String>, Vec<usize>> = BTreeMap::new();
    for (i, row) in src.rows.iter().enumerate() {
        let key: Vec<String> = class_idx.iter().map(|&c| row[c].to_string()).collect();
        groups.entry(key).or_default().push(i);
    }
    if class_idx.is_empty() {
        groups.entry(Vec::new()).or_default().extend(0..src.rows.len());
    }

    let mut columns = class.to_vec();
    for v in var {
        for s in stats {
            columns.push(format!("{v}_{s}"));
        }
    }
    let mut out = Table::new(columns);

    for (key, row_idxs) in &groups {
        let mut out_row = Vec::new();
        if class_idx.is_empty() {
            // single implicit group: no key columns
        } else {
            for k in key {
                out_row.push(Value::String(k.clone()));
            }
        }
        for &v in &var_idx {
            let values: Vec<&Value> = row_idxs.iter().map(|&i| &src.rows[i][v]).collect();
            for stat in stats {
                out_row.push(compute_stat(stat, &values, loc)?);
            }
        }
        out.rows.push(out_row);
    }
    Ok(out)
}

fn missing_col(c: &str, loc: &Loc) -> Diagnostic {
    Diagnostic::new(codes::SANS_RUNTIME_MISSING_COLUMN, format!("no such column '{c}'")).with_loc(loc.clone())
}

fn compute_stat(stat: &str, values: &[&Value], loc: &Loc) -> Result<Value, Diagnostic> {
    let non_null: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
    Ok(match stat {
        "n" => Value::Int((values.len() as i64).into()),
        "nmiss" => Value::Int(((values.len() - non_null.len()) as i64).into()),
        "count" => Value::Int((non_null.len() as i64).into()),
        "sum" => {
            if non_null.is_empty() {
                Value::Null
            } else {
                sum_decimal(&non_null, loc)?
            }
        }
        "mean" => {
            if non_null.is_empty() {
                Value::Null
            } else {
                let s = sum_decimal(&non_null, loc)?;
                let s = as_decimal(&s);
                let n = Decimal::from_i64(non_null.len() as i64);
                Value::Decimal(s.div(&n, 10).unwrap_or_else(Decimal::zero))
            }
        }
        "min" | "max" => {
            if non_null.is_empty() {
                Value::Null
            } else {
                let mut best = non_null[0];
                for v in &non_null[1..] {
                    let ord = v.compare(best).map_err(|e| e.with_loc(loc.clone()))?;
                    let take = if stat == "min" { ord.is_lt() } else { ord.is_gt() };
                    if take {
                        best = v;
                    }
                }
                best.clone()
            }
        }
        other => {
            return Err(Diagnostic::new(
                codes::SANS_RUNTIME_UNSUPPORTED_EXPR_NODE,
                format!("unsupported aggregate stat '{other}'"),
            )
            .with_loc(loc.clone()))
        }
    })
}

fn sum_decimal(values: &[&Value], loc: &Loc) -> Result<Value, Diagnostic> {
    let mut acc = Decimal::zero();
    for v in values {
        acc = acc.add(&as_decimal_checked(v, loc)?);
    }
    Ok(Value::Decimal(acc))
}

fn as_decimal(v: &Value) -> Decimal {
    match v {
        Value::Decimal(d) => d.clone(),
        Value::Int(i) => Decimal::from_bigint(i),
        _ => Decimal::zero(),
    }
}

fn as_decimal_checked(v: &Value, loc: &Loc) -> Result<Decimal, Diagnostic> {
    match v {
        Value::Decimal(d) => Ok(d.clone()),
        Value::Int(i) => Ok(Decimal::from_bigint(i)),
        other => Err(Diagnostic::new(
            codes::SANS_RUNTIME_TYPE,
            format!("aggregate over non-numeric value of type {}", other.type_tag()),
        )
        .with_loc(loc.clone())),
    }
}

pub fn transpose(src: &Table, by: &[String], id: &str, var: &[String], loc: &Loc) -> Result<Table, Diagnostic> {
    let by_idx: Vec<usize> = by.iter().map(|c| src.col_index(c).ok_or_else(|| missing_col(c, loc))).collect::<Result<_, _>>()?;
    let id_idx = src.col_index(id).ok_or_else(|| missing_col(id, loc))?;
    let var_idx: Vec<usize> = var.iter().map(|c| src.col_index(c).ok_or_else(|| missing_col(c, loc))).collect::<Result<_, _>>()?;

    let mut group_order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, usize> = HashMap::new();
    let mut id_values: Vec<String> = Vec::new();
    let mut id_seen: HashSet<String> = HashSet::new();
    let mut cells: HashMap<(usize, String, usize), Value> = HashMap::new();

    for row in &src.rows {
        let key: Vec<String> = by_idx.iter().map(|&c| row[c].to_string()).collect();
        let group_idx = *groups.entry(key.clone()).or_insert_with(|| {
            group_order.push(key.clone());
            group_order.len() - 1
        });
        let id_val = row[id_idx].to_string();
        if id_seen.insert(id_val.clone()) {
            id_values.push(id_val.clone());
        }
        for (vi, &v) in var_idx.iter().enumerate() {
            cells.insert((group_idx, id_val.clone(), vi), row[v].clone());
        }
    }

    let mut columns = by.to_vec();
    for id_val in &id_values {
        if var.len() <= 1 {
            columns.push(id_val.clone());
        } else {
            for v in var {
                columns.push(format!("{id_val}_{v}"));
            }
        }
    }
    let mut out = Table::new(columns);
    for (gi, key) in group_order.iter().enumerate() {
        let mut out_row: Vec<Value> = key.iter().map(|k| Value::String(k.clone())).collect();
        for id_val in &id_values {
            for vi in 0..var_idx.len() {
                out_row.push(cells.get(&(gi, id_val.clone(), vi)).cloned().unwrap_or(Value::Null));
            }
        }
        out.rows.push(out_row);
    }
    Ok(out)
}

pub fn assert_rows(
    src: &Table,
    expr_text: &str,
    message: Option<&str>,
    scalars: &HashMap<String, Value>,
    formats: &FormatRegistry,
    loc: &Loc,
) -> Result<(), Diagnostic> {
    let expr = parse_expr(expr_text, &loc.file, loc.line_start)?;
    for row in &src.rows {
        let ctx = EvalCtx { columns: &src.columns, row, scalars, formats };
        if !eval(&expr, &ctx)?.is_truthy() {
            let msg = message.map(|m| m.to_string()).unwrap_or_else(|| format!("assertion failed: {expr_text}"));
            return Err(Diagnostic::new(codes::SANS_RUNTIME_ASSERT, msg).with_loc(loc.clone()));
        }
    }
    Ok(())
}

pub fn register_format(formats: &mut FormatRegistry, params: &Json) -> Result<(), Diagnostic> {
    let name = params["name"].as_str().unwrap_or_default().to_string();
    let mapping: BTreeMap<String, String> = params["mapping"]
        .as_object()
        .into_iter()
        .flat_map(|m| m.iter())
        .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
        .collect();
    let other = params.get("other").and_then(|o| o.as_str()).map(|s| s.to_string());
    formats.register(name, FormatDef { mapping, other });
    Ok(())
}

static AGG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(count|sum|avg|min|max)\s*\(\s*(.+?)\s*\)$").unwrap());

pub fn sql_select(
    base_table: (&str, &Table),
    joins: &[(String, String, Table, String)], // (kind, table_name, table, on)
    select_list: &[String],
    where_clause: Option<&str>,
    group_by: &[String],
    scalars: &HashMap<String, Value>,
    formats: &FormatRegistry,
    loc: &Loc,
) -> Result<Table, Diagnostic> {
    let (base_name, base) = base_table;
    let mut columns: Vec<String> = base.columns.iter().map(|c| format!("{base_name}.{c}")).collect();
    let mut rows: Vec<Vec<Value>> = base.rows.clone();

    for (kind, name, table, on) in joins {
        let (left_col, right_col) = on
            .split_once('=')
            .map(|(a, b)| (a.trim().to_string(), b.trim().to_string()))
            .ok_or_else(|| unsupported_sql("join ON clause must be an equality", loc))?;
        let left_idx = columns.iter().position(|c| c == &left_col).ok_or_else(|| unsupported_sql(&format!("unknown join column '{left_col}'"), loc))?;
        let right_idx = table.col_index(right_col.rsplit('.').next().unwrap_or(&right_col)).ok_or_else(|| unsupported_sql(&format!("unknown join column '{right_col}'"), loc))?;

        let mut probe: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, r) in table.rows.iter().enumerate() {
            probe.entry(r[right_idx].to_string()).or_default().push(i);
        }

        let right_columns: Vec<String> = table.columns.iter().map(|c| format!("{name}.{c}")).collect();
        let mut new_rows = Vec::new();
        let mut matched_probe_rows: HashSet<usize> = HashSet::new();
        for row in &rows {
            let key = row[left_idx].to_string();
            if let Some(idxs) = probe.get(&key) {
                for &pi in idxs {
                    matched_probe_rows.insert(pi);
                    let mut combined = row.clone();
                    combined.extend(table.rows[pi].iter().cloned());
                    new_rows.push(combined);
                }
            } else if kind == "left" || kind == "full" {
                let mut combined = row.clone();
                combined.extend(table.columns.iter().map(|_| Value::Null));
                new_rows.push(combined);
            }
        }
        if kind == "right" || kind == "full" {
            for (pi, prow) in table.rows.iter().enumerate() {
                if !matched_probe_rows.contains(&pi) {
                    let mut combined: Vec<Value> = columns.iter().map(|_| Value::Null).collect();
                    combined.extend(prow.iter().cloned());
                    new_rows.push(combined);
                }
            }
        }
        columns.extend(right_columns);
        rows = new_rows;
    }

    let rows = if let Some(w) = where_clause {
        let expr = parse_expr(w, &loc.file, loc.line_start)?;
        rows.into_iter()
            .map(|r| {
                let ctx = EvalCtx { columns: &columns, row: &r, scalars, formats };
                eval(&expr, &ctx).map(|v| (v.is_truthy(), r))
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|(keep, r)| keep.then_some(r))
            .collect()
    } else {
        rows
    };

    let has_aggregate = select_list.iter().any(|s| AGG_RE.is_match(s));
    if group_by.is_empty() && !has_aggregate {
        return project_rows(&columns, &rows, select_list, loc);
    }

    let group_idx: Vec<usize> = resolve_columns(&columns, group_by, loc)?;
    let mut groups: BTreeMap<Vec<String>, Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        let key: Vec<String> = group_idx.iter().map(|&c| row[c].to_string()).collect();
        groups.entry(key).or_default().push(i);
    }
    if group_idx.is_empty() {
        groups.entry(Vec::new()).or_default().extend(0..rows.len());
    }

    let out_columns: Vec<String> = select_list.iter().map(|s| s.rsplit(" as ").next().unwrap_or(s).trim().to_string()).collect();
    let mut out = Table::new(out_columns);
    for (_, idxs) in &groups {
        let mut out_row = Vec::new();
        for entry in select_list {
            if let Some(caps) = AGG_RE.captures(entry) {
                let func = caps[1].to_ascii_lowercase();
                let arg = &caps[2];
                let values: Vec<Value> = if arg.trim() == "*" {
                    idxs.iter().map(|_| Value::Bool(true)).collect()
                } else {
                    let ci = resolve_column(&columns, arg.trim(), loc)?;
                    idxs.iter().map(|&i| rows[i][ci].clone()).collect()
                };
                let refs: Vec<&Value> = values.iter().collect();
                out_row.push(compute_stat(&sql_stat_name(&func), &refs, loc)?);
            } else {
                let ci = resolve_column(&columns, entry.trim(), loc)?;
                out_row.push(rows[idxs[0]][ci].clone());
            }
        }
        out.rows.push(out_row);
    }
    Ok(out)
}

fn sql_stat_name(func: &str) -> String {
    match func {
        "avg" => "mean".to_string(),
        other => other.to_string(),
    }
}

fn project_rows(columns: &[String], rows: &[Vec<Value>], select_list: &[String], loc: &Loc) -> Result<Table, Diagnostic> {
    let idxs = resolve_columns(columns, select_list, loc)?;
    let out_columns: Vec<String> = select_list.iter().map(|s| s.rsplit('.').next().unwrap_or(s).to_string()).collect();
    let mut out = Table::new(out_columns);
    for row in rows {
        out.rows.push(idxs.iter().map(|&i| row[i].clone()).collect());
    }
    Ok(out)
}

fn resolve_columns(columns: &[String], names: &[String], loc: &Loc) -> Result<Vec<usize>, Diagnostic> {
    names.iter().map(|n| resolve_column(columns, n, loc)).collect()
}

fn resolve_column(columns: &[String], name: &str, loc: &Loc) -> Result<usize, Diagnostic> {
    if let Some(i) = columns.iter().position(|c| c == name) {
        return Ok(i);
    }
    let matches: Vec<usize> = columns.iter().enumerate().filter(|(_, c)| c.rsplit('.').next() == Some(name)).map(|(i, _)| i).collect();
    match matches.as_slice() {
        [i] => Ok(*i),
        [] => Err(missing_col(name, loc)),
        _ => Err(Diagnostic::new(codes::SANS_RUNTIME_SQL_AMBIGUOUS_COLUMN, format!("column '{name}' is ambiguous")).with_loc(loc.clone())),
    }
}

fn unsupported_sql(msg: &str, loc: &Loc) -> Diagnostic {
    Diagnostic::new(codes::SANS_PARSE_SQL_UNSUPPORTED_FORM, msg.to_string()).with_loc(loc.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Loc;

    fn t(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table { columns: columns.iter().map(|s| s.to_string()).collect(), rows }
    }

    fn loc() -> Loc {
        Loc::single("t.sans", 1)
    }

    #[test]
    fn compute_appends_new_column_in_order() {
        let src = t(&["a", "b"], vec![vec![Value::Int(1.into()), Value::Int(2.into())]]);
        let out = compute(&src, &[("c".to_string(), "a + b".to_string())], &HashMap::new(), &FormatRegistry::default(), &loc()).unwrap();
        assert_eq!(out.columns, vec!["a", "b", "c"]);
        assert_eq!(out.rows[0][2], Value::Int(3.into()));
    }

    #[test]
    fn filter_keeps_truthy_rows_only() {
        let src = t(&["a"], vec![vec![Value::Int(1.into())], vec![Value::Int(5.into())]]);
        let out = filter(&src, "a > 2", &HashMap::new(), &FormatRegistry::default(), &loc()).unwrap();
        assert_eq!(out.rows.len(), 1);
    }

    #[test]
    fn sort_nulls_first_ascending() {
        let src = t(
            &["a"],
            vec![vec![Value::Int(2.into())], vec![Value::Null], vec![Value::Int(1.into())]],
        );
        let out = sort(&src, &[("a".to_string(), false)], false, &loc()).unwrap();
        assert_eq!(out.rows[0][0], Value::Null);
        assert_eq!(out.rows[1][0], Value::Int(1.into()));
        assert_eq!(out.rows[2][0], Value::Int(2.into()));
    }

    #[test]
    fn sort_nulls_last_descending() {
        let src = t(&["a"], vec![vec![Value::Null], vec![Value::Int(1.into())]]);
        let out = sort(&src, &[("a".to_string(), true)], false, &loc()).unwrap();
        assert_eq!(out.rows[0][0], Value::Int(1.into()));
        assert_eq!(out.rows[1][0], Value::Null);
    }

    #[test]
    fn aggregate_skips_nulls_in_sum() {
        let src = t(&["g", "v"], vec![
            vec![Value::String("a".into()), Value::Int(1.into())],
            vec![Value::String("a".into()), Value::Null],
        ]);
        let out = aggregate(&src, &["g".to_string()], &["v".to_string()], &["sum".to_string(), "nmiss".to_string()], &loc()).unwrap();
        assert_eq!(out.rows[0][1], Value::Decimal(Decimal::from_i64(1)));
        assert_eq!(out.rows[0][2], Value::Int(1.into()));
    }

    #[test]
    fn rename_rejects_duplicate_target() {
        let src = t(&["a", "b"], vec![]);
        let err = rename(&src, &[("a".to_string(), "x".to_string()), ("b".to_string(), "x".to_string())], &loc()).unwrap_err();
        assert_eq!(err.code, codes::SANS_RUNTIME_DUPLICATE_RENAME_TARGET);
    }

    #[test]
    fn assert_rows_sees_a_scalar_bound_by_let_scalar() {
        let src = t(&["a"], vec![vec![Value::Int(5.into())]]);
        let mut scalars = HashMap::new();
        scalars.insert("floor".to_string(), Value::Int(1.into()));
        assert_rows(&src, "a > floor", None, &scalars, &FormatRegistry::default(), &loc()).unwrap();
        let err = assert_rows(&src, "a > ceiling", None, &scalars, &FormatRegistry::default(), &loc()).unwrap_err();
        assert_eq!(err.code, codes::SANS_RUNTIME_MISSING_COLUMN);
    }

    #[test]
    fn compute_resolves_put_against_a_live_format_registry() {
        let src = t(&["sev"], vec![vec![Value::Int(1.into())], vec![Value::Int(9.into())]]);
        let mut formats = FormatRegistry::default();
        formats.register(
            "sevfmt".to_string(),
            FormatDef { mapping: BTreeMap::from([("1".to_string(), "MILD".to_string())]), other: Some(String::new()) },
        );
        let out = compute(
            &src,
            &[("sev_m".to_string(), "put(sev, \"sevfmt\")".to_string())],
            &HashMap::new(),
            &formats,
            &loc(),
        )
        .unwrap();
        assert_eq!(out.rows[0][1], Value::String("MILD".to_string()));
        assert_eq!(out.rows[1][1], Value::String(String::new()));
    }

    #[test]
    fn sql_inner_join_resolves_unambiguous_bare_column() {
        let t1 = t(&["id", "val"], vec![vec![Value::Int(1.into()), Value::Int(10.into())]]);
        let t2 = t(&["id", "extra"], vec![vec![Value::Int(1.into()), Value::String("x".into())]]);
        let out = sql_select(
            ("t1", &t1),
            &[("inner".to_string(), "t2".to_string(), t2, "t1.id = t2.id".to_string())],
            &["t1.val".to_string(), "t2.extra".to_string()],
            None,
            &[],
            &HashMap::new(),
            &FormatRegistry::default(),
            &loc(),
        )
        .unwrap();
        assert_eq!(out.rows[0], vec![Value::Int(10.into()), Value::String("x".into())]);
    }

    #[test]
    fn sql_ambiguous_bare_column_is_refused() {
        let t1 = t(&["id", "val"], vec![vec![Value::Int(1.into()), Value::Int(10.into())]]);
        let t2 = t(&["id", "extra"], vec![vec![Value::Int(1.into()), Value::String("x".into())]]);
        let err = sql_select(
            ("t1", &t1),
            &[("inner".to_string(), "t2".to_string(), t2, "t1.id = t2.id".to_string())],
            &["id".to_string()],
            None,
            &[],
            &HashMap::new(),
            &FormatRegistry::default(),
            &loc(),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::SANS_RUNTIME_SQL_AMBIGUOUS_COLUMN);
    }
}
