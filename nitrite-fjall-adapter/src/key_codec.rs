//! Order-preserving key encoding.
//!
//! Fjall compares keys as raw bytes, so keys are written in a form whose
//! byte order equals the order of [Value]. Every encoded value starts
//! with a tag byte of `kind_rank + 1`, which orders values of different
//! kinds by rank and leaves `0x00` free as a terminator.
//!
//! | kind | body |
//! |---|---|
//! | null | none |
//! | bool | `0x00` / `0x01` |
//! | i64 | 8 bytes big-endian, sign bit flipped |
//! | f64 | 8 bytes big-endian of the `total_cmp` order key |
//! | string, bytes | `0x00` escaped as `0x00 0xFF`, ended by `0x00 0x00` |
//! | array | encoded items, ended by `0x00` |
//! | map | `0x01`, escaped field name, encoded value per entry, ended by `0x00` |

use crate::wrapper::{FjallValueError, FjallValueResult};
use nitrite::common::Value;
use std::collections::BTreeMap;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;
const ENTRY: u8 = 0x01;
const SIGN_BIT: u64 = 1 << 63;

/// Encodes `value` so that byte order matches value order.
pub(crate) fn encode_key(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    write_value(value, &mut out);
    out
}

/// Decodes a key written by [encode_key].
pub(crate) fn decode_key(bytes: &[u8]) -> FjallValueResult<Value> {
    let mut reader = Reader { bytes, pos: 0 };
    let value = reader.read_value()?;
    if reader.pos != bytes.len() {
        return Err(FjallValueError::DeserializationError(format!(
            "{} trailing bytes after key",
            bytes.len() - reader.pos
        )));
    }
    Ok(value)
}

fn tag(value: &Value) -> u8 {
    value.kind_rank() + 1
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    out.push(tag(value));
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push(*b as u8),
        Value::I64(i) => out.extend_from_slice(&((*i as u64) ^ SIGN_BIT).to_be_bytes()),
        Value::F64(f) => out.extend_from_slice(&f64_order_bits(*f).to_be_bytes()),
        Value::String(s) => write_escaped(s.as_bytes(), out),
        Value::Bytes(b) => write_escaped(b, out),
        Value::Array(items) => {
            for item in items {
                write_value(item, out);
            }
            out.push(TERMINATOR);
        }
        Value::Map(fields) => {
            for (name, item) in fields {
                out.push(ENTRY);
                write_escaped(name.as_bytes(), out);
                write_value(item, out);
            }
            out.push(TERMINATOR);
        }
    }
}

fn write_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for b in bytes {
        out.push(*b);
        if *b == TERMINATOR {
            out.push(ESCAPE);
        }
    }
    out.push(TERMINATOR);
    out.push(TERMINATOR);
}

/// Maps the bits of `f` so unsigned comparison agrees with `f64::total_cmp`.
fn f64_order_bits(f: f64) -> u64 {
    let bits = f.to_bits();
    if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    }
}

fn f64_from_order_bits(bits: u64) -> f64 {
    if bits & SIGN_BIT != 0 {
        f64::from_bits(bits ^ SIGN_BIT)
    } else {
        f64::from_bits(!bits)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn read_byte(&mut self) -> FjallValueResult<u8> {
        match self.bytes.get(self.pos) {
            Some(b) => {
                self.pos += 1;
                Ok(*b)
            }
            None => Err(truncated()),
        }
    }

    fn peek(&self) -> FjallValueResult<u8> {
        self.bytes.get(self.pos).copied().ok_or_else(truncated)
    }

    fn read_u64(&mut self) -> FjallValueResult<u64> {
        let end = self.pos + 8;
        let slice = self.bytes.get(self.pos..end).ok_or_else(truncated)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(slice);
        self.pos = end;
        Ok(u64::from_be_bytes(buf))
    }

    fn read_escaped(&mut self) -> FjallValueResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let b = self.read_byte()?;
            if b != TERMINATOR {
                out.push(b);
                continue;
            }
            match self.read_byte()? {
                TERMINATOR => return Ok(out),
                ESCAPE => out.push(TERMINATOR),
                other => {
                    return Err(FjallValueError::DeserializationError(format!(
                        "invalid escape byte {:#04x}",
                        other
                    )))
                }
            }
        }
    }

    fn read_string(&mut self) -> FjallValueResult<String> {
        let bytes = self.read_escaped()?;
        String::from_utf8(bytes).map_err(|e| FjallValueError::InvalidUtf8(e.to_string()))
    }

    fn read_value(&mut self) -> FjallValueResult<Value> {
        let tag = self.read_byte()?;
        let value = match tag.wrapping_sub(1) {
            0 => Value::Null,
            1 => Value::Bool(self.read_byte()? != 0),
            2 => Value::I64((self.read_u64()? ^ SIGN_BIT) as i64),
            3 => Value::F64(f64_from_order_bits(self.read_u64()?)),
            4 => Value::String(self.read_string()?),
            5 => Value::Bytes(self.read_escaped()?),
            6 => {
                let mut items = Vec::new();
                while self.peek()? != TERMINATOR {
                    items.push(self.read_value()?);
                }
                self.pos += 1;
                Value::Array(items)
            }
            7 => {
                let mut fields = BTreeMap::new();
                loop {
                    match self.read_byte()? {
                        TERMINATOR => break,
                        ENTRY => {
                            let name = self.read_string()?;
                            let item = self.read_value()?;
                            fields.insert(name, item);
                        }
                        other => {
                            return Err(FjallValueError::DeserializationError(format!(
                                "invalid map entry marker {:#04x}",
                                other
                            )))
                        }
                    }
                }
                Value::Map(fields)
            }
            _ => {
                return Err(FjallValueError::DeserializationError(format!(
                    "unknown key tag {:#04x}",
                    tag
                )))
            }
        };
        Ok(value)
    }
}

fn truncated() -> FjallValueError {
    FjallValueError::DeserializationError("truncated key".to_string())
}
