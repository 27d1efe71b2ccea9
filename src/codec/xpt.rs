//! SAS Transport (XPT) reader/writer (spec §4.7). No crate in the
//! dependency stack understands this format, so it is built directly on
//! byte-level I/O: fixed 80-byte header records, IBM-780 8-byte floats for
//! numerics, space-padded fixed-width character fields.

use crate::error::{codes, Diagnostic};
use crate::exec::table::Table;
use crate::value::Value;

const RECORD_LEN: usize = 80;
pub const CHAR_WIDTH_CAP: usize = 200;

const LIBRARY_HEADER: &[u8] = b"HEADER RECORD*******LIBRARY HEADER RECORD!!!!!!!000000000000000000000000000000  ";
const MEMBER_HEADER: &[u8] = b"HEADER RECORD*******MEMBER  HEADER RECORD!!!!!!!000000000000000001600000000140  ";
const DESCRIPTOR_HEADER: &[u8] = b"HEADER RECORD*******NAMESTR HEADER RECORD!!!!!!!000000000000000000000000000000  ";
const OBS_HEADER: &[u8] = b"HEADER RECORD*******OBS     HEADER RECORD!!!!!!!000000000000000000000000000000  ";
const NAMESTR_LEN: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XptVarKind {
    Numeric,
    Character(usize),
}

impl XptVarKind {
    fn width(&self) -> usize {
        match self {
            XptVarKind::Numeric => 8,
            XptVarKind::Character(w) => *w,
        }
    }
}

pub struct XptReadResult {
    pub table: Table,
    pub var_kinds: Vec<XptVarKind>,
}

fn pad_record(buf: &mut Vec<u8>, record: &[u8]) {
    buf.extend_from_slice(record);
}

fn pad_to_record_boundary(buf: &mut Vec<u8>) {
    let rem = buf.len() % RECORD_LEN;
    if rem != 0 {
        buf.extend(std::iter::repeat(b' ').take(RECORD_LEN - rem));
    }
}

fn f64_to_ibm(v: f64) -> [u8; 8] {
    if v == 0.0 {
        return [0u8; 8];
    }
    let sign = v.is_sign_negative();
    let mut mag = v.abs();
    let mut exp: i32 = 64;
    while mag >= 1.0 {
        mag /= 16.0;
        exp += 1;
    }
    while mag < 0.0625 {
        mag *= 16.0;
        exp -= 1;
    }
    let mantissa = (mag * (1u64 << 56) as f64).round() as u64;
    let mantissa_bytes = mantissa.to_be_bytes();
    let mut out = [0u8; 8];
    out[0] = if sign { 0x80 | (exp as u8 & 0x7f) } else { exp as u8 & 0x7f };
    out[1..8].copy_from_slice(&mantissa_bytes[1..8]);
    out
}

fn ibm_to_f64(bytes: &[u8]) -> f64 {
    if bytes.iter().all(|b| *b == 0) {
        return 0.0;
    }
    let sign = bytes[0] & 0x80 != 0;
    let exp = (bytes[0] & 0x7f) as i32 - 64;
    let mut mantissa_bytes = [0u8; 8];
    mantissa_bytes[1..8].copy_from_slice(&bytes[1..8]);
    let mantissa = u64::from_be_bytes(mantissa_bytes);
    let frac = mantissa as f64 / (1u64 << 56) as f64;
    let val = frac * 16f64.powi(exp);
    if sign {
        -val
    } else {
        val
    }
}

/// The canonical missing-numeric marker: first byte `.`, remaining bytes
/// zero (standard SAS "plain missing" encoding).
const MISSING_NUMERIC: [u8; 8] = [b'.', 0, 0, 0, 0, 0, 0, 0];

fn encode_numeric(v: &Value, loc_col: &str) -> Result<[u8; 8], Diagnostic> {
    match v {
        Value::Null => Ok(MISSING_NUMERIC),
        Value::Int(i) => {
            let f: f64 = i.to_string().parse().map_err(|_| {
                Diagnostic::new(codes::SANS_RUNTIME_TYPE, format!("column '{loc_col}' integer too large for XPT"))
            })?;
            Ok(f64_to_ibm(f))
        }
        Value::Decimal(d) => {
            let f: f64 = d.to_normalized_string().parse().map_err(|_| {
                Diagnostic::new(codes::SANS_RUNTIME_TYPE, format!("column '{loc_col}' decimal not representable in XPT"))
            })?;
            Ok(f64_to_ibm(f))
        }
        Value::Bool(b) => Ok(f64_to_ibm(if *b { 1.0 } else { 0.0 })),
        Value::String(_) => Err(Diagnostic::new(
            codes::SANS_RUNTIME_TYPE,
            format!("column '{loc_col}' is declared numeric but holds a string value"),
        )),
    }
}

fn decode_numeric(bytes: &[u8]) -> Value {
    if bytes == MISSING_NUMERIC {
        return Value::Null;
    }
    let f = ibm_to_f64(bytes);
    if f.fract() == 0.0 && f.abs() < 1e15 {
        Value::Int((f as i64).into())
    } else {
        crate::decimal::Decimal::parse(&format!("{f}")).map(Value::Decimal).unwrap_or(Value::Null)
    }
}

fn encode_char(v: &Value, width: usize, loc_col: &str) -> Result<Vec<u8>, Diagnostic> {
    if width > CHAR_WIDTH_CAP {
        return Err(Diagnostic::new(
            codes::SANS_RUNTIME_TYPE,
            format!("column '{loc_col}' character width {width} exceeds the {CHAR_WIDTH_CAP}-byte cap"),
        ));
    }
    let s = match v {
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let mut bytes = s.into_bytes();
    if bytes.len() > width {
        bytes.truncate(width);
    } else {
        bytes.resize(width, b' ');
    }
    Ok(bytes)
}

fn decode_char(bytes: &[u8]) -> Value {
    let s = String::from_utf8_lossy(bytes);
    let trimmed = s.trim_end();
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::String(trimmed.to_string())
    }
}

fn fixed_name(s: &str, width: usize) -> Vec<u8> {
    let mut b = s.as_bytes().to_vec();
    b.truncate(width);
    b.resize(width, b' ');
    b
}

fn encode_namestr(name: &str, kind: XptVarKind, index: u16) -> Vec<u8> {
    let mut rec = vec![0u8; NAMESTR_LEN];
    let (ntype, width): (u16, u16) = match kind {
        XptVarKind::Numeric => (1, 8),
        XptVarKind::Character(w) => (2, w as u16),
    };
    rec[0..2].copy_from_slice(&ntype.to_be_bytes());
    rec[2..4].copy_from_slice(&0u16.to_be_bytes()); // nhfun
    rec[4..6].copy_from_slice(&width.to_be_bytes());
    rec[6..8].copy_from_slice(&index.to_be_bytes());
    rec[8..16].copy_from_slice(&fixed_name(name, 8));
    rec[16..56].copy_from_slice(&fixed_name("", 40)); // label
    rec
}

fn decode_namestr(rec: &[u8]) -> (String, XptVarKind) {
    let ntype = u16::from_be_bytes([rec[0], rec[1]]);
    let width = u16::from_be_bytes([rec[4], rec[5]]) as usize;
    let name = String::from_utf8_lossy(&rec[8..16]).trim_end().to_string();
    let kind = if ntype == 2 { XptVarKind::Character(width) } else { XptVarKind::Numeric };
    (name, kind)
}

/// Writes a table to byte-deterministic XPT bytes. `var_kinds` must align
/// 1:1 with `table.columns`.
pub fn write_xpt(table: &Table, var_kinds: &[XptVarKind]) -> Result<Vec<u8>, Diagnostic> {
    if var_kinds.len() != table.columns.len() {
        return Err(Diagnostic::new(codes::SANS_RUNTIME_TYPE, "XPT variable kind list does not match column count"));
    }
    let mut buf = Vec::new();
    pad_record(&mut buf, LIBRARY_HEADER);
    pad_record(&mut buf, MEMBER_HEADER);
    pad_record(&mut buf, DESCRIPTOR_HEADER);

    for (i, (name, kind)) in table.columns.iter().zip(var_kinds.iter()).enumerate() {
        buf.extend(encode_namestr(name, *kind, (i + 1) as u16));
    }
    pad_to_record_boundary(&mut buf);

    pad_record(&mut buf, OBS_HEADER);
    for row in &table.rows {
        for (v, kind) in row.iter().zip(var_kinds.iter()) {
            match kind {
                XptVarKind::Numeric => buf.extend(encode_numeric(v, "?")?),
                XptVarKind::Character(w) => buf.extend(encode_char(v, *w, "?")?),
            }
        }
    }
    pad_to_record_boundary(&mut buf);
    Ok(buf)
}

/// Parses XPT bytes back into a [Table]. Rejects corrupt headers (missing
/// magic markers).
pub fn read_xpt(bytes: &[u8]) -> Result<XptReadResult, Diagnostic> {
    let corrupt = || Diagnostic::new(codes::SANS_RUNTIME_INPUT_NOT_FOUND, "corrupt XPT header");

    if bytes.len() < RECORD_LEN * 4 {
        return Err(corrupt());
    }
    let lib = &bytes[0..RECORD_LEN];
    if !lib.starts_with(b"HEADER RECORD*******LIBRARY") {
        return Err(corrupt());
    }
    let member = &bytes[RECORD_LEN..RECORD_LEN * 2];
    if !member.starts_with(b"HEADER RECORD*******MEMBER") {
        return Err(corrupt());
    }
    let descriptor = &bytes[RECORD_LEN * 2..RECORD_LEN * 3];
    if !descriptor.starts_with(b"HEADER RECORD*******NAMESTR") {
        return Err(corrupt());
    }

    let mut offset = RECORD_LEN * 3;
    let mut columns: Vec<(String, XptVarKind)> = Vec::new();
    loop {
        if offset + NAMESTR_LEN > bytes.len() {
            return Err(corrupt());
        }
        let chunk = &bytes[offset..offset + NAMESTR_LEN];
        if chunk.iter().all(|b| *b == b' ' || *b == 0) {
            offset += NAMESTR_LEN;
            break;
        }
        columns.push(decode_namestr(chunk));
        offset += NAMESTR_LEN;
        if offset >= bytes.len() {
            return Err(corrupt());
        }
    }
    // advance to next 80-byte boundary past the namestr block
    let rem = offset % RECORD_LEN;
    if rem != 0 {
        offset += RECORD_LEN - rem;
    }

    if offset + RECORD_LEN > bytes.len() || !bytes[offset..offset + RECORD_LEN].starts_with(b"HEADER RECORD*******OBS") {
        return Err(corrupt());
    }
    offset += RECORD_LEN;

    let row_width: usize = columns.iter().map(|(_, k)| k.width()).sum();
    if row_width == 0 {
        return Ok(XptReadResult {
            table: Table::new(columns.iter().map(|(n, _)| n.clone()).collect()),
            var_kinds: columns.iter().map(|(_, k)| *k).collect(),
        });
    }

    let mut table = Table::new(columns.iter().map(|(n, _)| n.clone()).collect());
    while offset + row_width <= bytes.len() {
        let row_bytes = &bytes[offset..offset + row_width];
        if row_bytes.iter().all(|b| *b == b' ') {
            break;
        }
        let mut row = Vec::with_capacity(columns.len());
        let mut col_off = 0;
        for (_, kind) in &columns {
            let w = kind.width();
            let field = &row_bytes[col_off..col_off + w];
            row.push(match kind {
                XptVarKind::Numeric => decode_numeric(field),
                XptVarKind::Character(_) => decode_char(field),
            });
            col_off += w;
        }
        table.rows.push(row);
        offset += row_width;
    }

    Ok(XptReadResult { table, var_kinds: columns.into_iter().map(|(_, k)| k).collect() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ibm_float_round_trips() {
        for v in [0.0, 1.0, -1.0, 10.0, 0.5, 123456.75, -0.0009765625] {
            let bytes = f64_to_ibm(v);
            let back = ibm_to_f64(&bytes);
            assert!((back - v).abs() < 1e-6, "{v} -> {back}");
        }
    }

    #[test]
    fn numeric_and_character_round_trip() {
        let mut table = Table::new(vec!["n".to_string(), "c".to_string()]);
        table.rows.push(vec![Value::Int(10.into()), Value::String("ABC".to_string())]);
        table.rows.push(vec![Value::Null, Value::String("DE".to_string())]);
        table.rows.push(vec![Value::Int(20.into()), Value::Null]);

        let kinds = vec![XptVarKind::Numeric, XptVarKind::Character(4)];
        let bytes = write_xpt(&table, &kinds).unwrap();
        let result = read_xpt(&bytes).unwrap();

        assert_eq!(result.table.columns, vec!["n", "c"]);
        assert_eq!(result.table.rows[0][0], Value::Int(10.into()));
        assert_eq!(result.table.rows[0][1], Value::String("ABC".to_string()));
        assert_eq!(result.table.rows[1][0], Value::Null);
    }

    #[test]
    fn write_is_byte_deterministic() {
        let mut table = Table::new(vec!["n".to_string()]);
        table.rows.push(vec![Value::Int(7.into())]);
        let kinds = vec![XptVarKind::Numeric];
        let a = write_xpt(&table, &kinds).unwrap();
        let b = write_xpt(&table, &kinds).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn corrupt_header_is_rejected() {
        let err = read_xpt(b"not an xpt file").unwrap_err();
        assert_eq!(err.code, codes::SANS_RUNTIME_INPUT_NOT_FOUND);
    }

    #[test]
    fn character_width_over_cap_is_refused() {
        let mut table = Table::new(vec!["c".to_string()]);
        table.rows.push(vec![Value::String("x".to_string())]);
        let kinds = vec![XptVarKind::Character(201)];
        let err = write_xpt(&table, &kinds).unwrap_err();
        assert_eq!(err.code, codes::SANS_RUNTIME_TYPE);
    }
}
