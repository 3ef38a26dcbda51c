use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 32;

/// Decodes a single complete bencode value from `data`.
///
/// # Errors
///
/// Fails on truncated input, malformed integers or length prefixes,
/// non-string dictionary keys, nesting deeper than 32 levels, and on any
/// bytes left over after the value.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut dec = Decoder { data, pos: 0 };
    let value = dec.value(0)?;
    if dec.pos != data.len() {
        return Err(BencodeError::TrailingData(data.len() - dec.pos));
    }
    Ok(value)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }
        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => Ok(Value::Bytes(self.byte_string()?)),
            c => Err(BencodeError::UnexpectedByte(c)),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;
        let end = self.find(b'e')?;
        let digits = &self.data[self.pos..end];
        self.pos = end + 1;
        Ok(Value::Int(parse_canonical_int(digits)?))
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let colon = self.find(b':')?;
        let len = parse_length(&self.data[self.pos..colon])?;
        let start = colon + 1;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or(BencodeError::UnexpectedEof)?;
        self.pos = end;
        Ok(Bytes::copy_from_slice(&self.data[start..end]))
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut map = BTreeMap::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::NonStringKey);
            }
            let key = self.byte_string()?;
            let value = self.value(depth + 1)?;
            map.insert(key, value);
        }
        self.pos += 1;
        Ok(Value::Dict(map))
    }

    fn find(&self, byte: u8) -> Result<usize, BencodeError> {
        self.data[self.pos..]
            .iter()
            .position(|&b| b == byte)
            .map(|off| self.pos + off)
            .ok_or(BencodeError::UnexpectedEof)
    }
}

fn parse_canonical_int(digits: &[u8]) -> Result<i64, BencodeError> {
    let body = digits.strip_prefix(b"-").unwrap_or(digits);
    if body.is_empty() || !body.iter().all(u8::is_ascii_digit) {
        return Err(BencodeError::InvalidInteger);
    }
    // i0e is the only integer allowed to start with a zero digit
    if (body.len() > 1 && body[0] == b'0') || digits == b"-0" {
        return Err(BencodeError::InvalidInteger);
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(BencodeError::InvalidInteger)
}

fn parse_length(digits: &[u8]) -> Result<usize, BencodeError> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(BencodeError::InvalidLength);
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(BencodeError::InvalidLength)
}
