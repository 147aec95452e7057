//! Order-preserving tuple encoding.
//!
//! # Format
//!
//! Each component is a one-byte type code followed by its payload:
//!
//! | type   | code          | payload                                        |
//! |--------|---------------|------------------------------------------------|
//! | Null   | `0x00`        | none (`0x00 0xFF` when nested)                 |
//! | Bytes  | `0x01`        | bytes, `0x00` escaped as `0x00 0xFF`, then `0x00` |
//! | Text   | `0x02`        | UTF-8, escaped like bytes, then `0x00`         |
//! | Tuple  | `0x05`        | nested components, then `0x00`                 |
//! | Int    | `0x15`        | 8 bytes big-endian, sign bit flipped           |
//! | Float  | `0x21`        | 8 bytes big-endian, see [`float_to_key`]        |
//! | Bool   | `0x26`/`0x27` | none                                           |
//!
//! Type codes increase with the component type rank, so comparing two
//! encodings byte by byte gives the same answer as comparing the tuples.

use crate::core::{Component, Result, StoreError, Tuple};

const NULL: u8 = 0x00;
const BYTES: u8 = 0x01;
const TEXT: u8 = 0x02;
const NESTED: u8 = 0x05;
const INT: u8 = 0x15;
const FLOAT: u8 = 0x21;
const FALSE: u8 = 0x26;
const TRUE: u8 = 0x27;

const ESCAPE: u8 = 0xFF;
const SIGN_BIT: u64 = 1 << 63;

pub fn encode_tuple(tuple: &Tuple) -> Vec<u8> {
    let mut buf = Vec::with_capacity(tuple.len() * 9);
    for component in tuple.components() {
        encode_component(component, &mut buf, false);
    }
    buf
}

pub fn decode_tuple(bytes: &[u8]) -> Result<Tuple> {
    let mut reader = Reader { bytes, pos: 0 };
    let mut components = Vec::new();
    while !reader.is_at_end() {
        components.push(reader.component()?);
    }
    Ok(Tuple::from(components))
}

fn encode_component(component: &Component, buf: &mut Vec<u8>, nested: bool) {
    match component {
        Component::Null => {
            buf.push(NULL);
            if nested {
                buf.push(ESCAPE);
            }
        }
        Component::Bytes(b) => {
            buf.push(BYTES);
            write_escaped(b, buf);
        }
        Component::Text(s) => {
            buf.push(TEXT);
            write_escaped(s.as_bytes(), buf);
        }
        Component::Tuple(t) => {
            buf.push(NESTED);
            for inner in t.components() {
                encode_component(inner, buf, true);
            }
            buf.push(NULL);
        }
        Component::Int(i) => {
            buf.push(INT);
            buf.extend_from_slice(&((*i as u64) ^ SIGN_BIT).to_be_bytes());
        }
        Component::Float(f) => {
            buf.push(FLOAT);
            buf.extend_from_slice(&float_to_key(*f).to_be_bytes());
        }
        Component::Bool(false) => buf.push(FALSE),
        Component::Bool(true) => buf.push(TRUE),
    }
}

fn write_escaped(bytes: &[u8], buf: &mut Vec<u8>) {
    for &b in bytes {
        buf.push(b);
        if b == NULL {
            buf.push(ESCAPE);
        }
    }
    buf.push(NULL);
}

/// Negative floats have every bit flipped, non-negative ones only the sign
/// bit, which makes unsigned comparison agree with `f64::total_cmp`.
fn float_to_key(f: f64) -> u64 {
    let bits = f.to_bits();
    if bits & SIGN_BIT != 0 { !bits } else { bits ^ SIGN_BIT }
}

fn key_to_float(key: u64) -> f64 {
    let bits = if key & SIGN_BIT != 0 { key ^ SIGN_BIT } else { !key };
    f64::from_bits(bits)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn next(&mut self) -> Result<u8> {
        let b = self
            .peek(0)
            .ok_or_else(|| StoreError::Encoding(format!("truncated input at byte {}", self.pos)))?;
        self.pos += 1;
        Ok(b)
    }

    fn fixed8(&mut self) -> Result<u64> {
        let end = self.pos + 8;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            StoreError::Encoding(format!("expected 8 bytes at byte {}", self.pos))
        })?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(slice);
        self.pos = end;
        Ok(u64::from_be_bytes(raw))
    }

    fn escaped(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let b = self.next()?;
            if b != NULL {
                out.push(b);
                continue;
            }
            if self.peek(0) == Some(ESCAPE) {
                self.pos += 1;
                out.push(NULL);
            } else {
                return Ok(out);
            }
        }
    }

    fn component(&mut self) -> Result<Component> {
        let code = self.next()?;
        match code {
            NULL => Ok(Component::Null),
            BYTES => Ok(Component::Bytes(self.escaped()?)),
            TEXT => {
                let raw = self.escaped()?;
                String::from_utf8(raw)
                    .map(Component::Text)
                    .map_err(|e| StoreError::Encoding(format!("invalid UTF-8 in text: {}", e)))
            }
            NESTED => self.nested().map(Component::Tuple),
            INT => Ok(Component::Int((self.fixed8()? ^ SIGN_BIT) as i64)),
            FLOAT => Ok(Component::Float(key_to_float(self.fixed8()?))),
            FALSE => Ok(Component::Bool(false)),
            TRUE => Ok(Component::Bool(true)),
            other => Err(StoreError::Encoding(format!(
                "unknown type code 0x{:02x} at byte {}",
                other,
                self.pos - 1
            ))),
        }
    }

    fn nested(&mut self) -> Result<Tuple> {
        let mut components = Vec::new();
        loop {
            match (self.peek(0), self.peek(1)) {
                (None, _) => {
                    return Err(StoreError::Encoding("unterminated nested tuple".into()));
                }
                (Some(NULL), Some(ESCAPE)) => {
                    self.pos += 2;
                    components.push(Component::Null);
                }
                (Some(NULL), _) => {
                    self.pos += 1;
                    return Ok(Tuple::from(components));
                }
                _ => components.push(self.component()?),
            }
        }
    }
}
