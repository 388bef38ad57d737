//! Row serialization for MoonSQL
//!
//! A row is encoded as a 2-byte column count, a null bitmap (one bit per
//! column, bit i set means column i is NULL), then a packed payload:
//! INT as 8 little-endian bytes, BOOLEAN as 1 byte, VARCHAR as a 2-byte
//! length prefix followed by UTF-8 bytes. Decoding is driven by the schema.

use crate::catalog::{DataType, Schema};
use crate::error::{Error, Result};
use crate::storage::tuple::{Row, Value};

/// Encode a row under the given schema. The row must already be validated:
/// one value per column, each matching its column type.
pub fn encode_row(schema: &Schema, row: &Row) -> Result<Vec<u8>> {
    let n = schema.column_count();
    if row.len() != n {
        return Err(Error::Internal(format!(
            "cannot encode row with {} values under a {}-column schema",
            row.len(),
            n
        )));
    }

    let bitmap_len = n.div_ceil(8);
    let mut bytes = Vec::with_capacity(2 + bitmap_len);
    bytes.extend_from_slice(&(n as u16).to_le_bytes());
    bytes.resize(2 + bitmap_len, 0u8);

    for (i, (value, column)) in row.values().iter().zip(schema.columns()).enumerate() {
        match value {
            Value::Null => {
                bytes[2 + i / 8] |= 1 << (i % 8);
            }
            Value::Integer(v) => {
                if column.data_type != DataType::Int {
                    return Err(type_confusion(&column.name, value, &column.data_type));
                }
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            Value::Boolean(v) => {
                if column.data_type != DataType::Boolean {
                    return Err(type_confusion(&column.name, value, &column.data_type));
                }
                bytes.push(*v as u8);
            }
            Value::String(v) => {
                let max = match column.data_type {
                    DataType::Varchar(max) => max,
                    _ => return Err(type_confusion(&column.name, value, &column.data_type)),
                };
                let encoded = v.as_bytes();
                if encoded.len() > max as usize {
                    return Err(Error::Internal(format!(
                        "value for column '{}' is {} bytes, exceeds VARCHAR({})",
                        column.name,
                        encoded.len(),
                        max
                    )));
                }
                bytes.extend_from_slice(&(encoded.len() as u16).to_le_bytes());
                bytes.extend_from_slice(encoded);
            }
        }
    }

    Ok(bytes)
}

fn type_confusion(column: &str, value: &Value, data_type: &DataType) -> Error {
    Error::Internal(format!(
        "cannot encode {} value into {} column '{}'",
        value.type_name(),
        data_type,
        column
    ))
}

/// Decode a record under the given schema.
pub fn decode_row(schema: &Schema, bytes: &[u8]) -> Result<Row> {
    let n = schema.column_count();
    let bitmap_len = n.div_ceil(8);

    if bytes.len() < 2 + bitmap_len {
        return Err(Error::DecodeError {
            reason: "record shorter than its header".to_string(),
        });
    }

    let stored_count = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    if stored_count != n {
        return Err(Error::DecodeError {
            reason: format!("record has {} columns, schema has {}", stored_count, n),
        });
    }

    let bitmap = &bytes[2..2 + bitmap_len];
    let mut cursor = 2 + bitmap_len;
    let mut values = Vec::with_capacity(n);

    for (i, column) in schema.columns().iter().enumerate() {
        let is_null = bitmap[i / 8] & (1 << (i % 8)) != 0;
        if is_null {
            values.push(Value::Null);
            continue;
        }

        match column.data_type {
            DataType::Int => {
                let end = cursor + 8;
                let slice = bytes.get(cursor..end).ok_or_else(|| truncated(&column.name))?;
                values.push(Value::Integer(i64::from_le_bytes(
                    slice.try_into().expect("slice length checked"),
                )));
                cursor = end;
            }
            DataType::Boolean => {
                let byte = *bytes.get(cursor).ok_or_else(|| truncated(&column.name))?;
                values.push(Value::Boolean(byte != 0));
                cursor += 1;
            }
            DataType::Varchar(max) => {
                let end = cursor + 2;
                let slice = bytes.get(cursor..end).ok_or_else(|| truncated(&column.name))?;
                let len = u16::from_le_bytes(slice.try_into().expect("slice length checked"));
                if len > max {
                    return Err(Error::DecodeError {
                        reason: format!(
                            "VARCHAR length {} exceeds declared maximum {} in column '{}'",
                            len, max, column.name
                        ),
                    });
                }
                cursor = end;
                let end = cursor + len as usize;
                let slice = bytes.get(cursor..end).ok_or_else(|| truncated(&column.name))?;
                let text = std::str::from_utf8(slice).map_err(|_| Error::DecodeError {
                    reason: format!("invalid UTF-8 in column '{}'", column.name),
                })?;
                values.push(Value::String(text.to_string()));
                cursor = end;
            }
        }
    }

    if cursor != bytes.len() {
        return Err(Error::DecodeError {
            reason: format!("{} trailing bytes after last column", bytes.len() - cursor),
        });
    }

    Ok(Row::new(values))
}

fn truncated(column: &str) -> Error {
    Error::DecodeError {
        reason: format!("record truncated in column '{}'", column),
    }
}
