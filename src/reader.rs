//! The decoder.
//!
//! [`JbReader`] is a cursor over an immutable byte slice. It never decodes more than the unit it
//! is positioned on: sizes, types and strings are computed on demand and cached for the current
//! position only. Moving the cursor, through [`set_pos`](JbReader::set_pos) and friends, drops
//! every cached value.
//!
//! Dictionary references are resolved through the local dictionary (embedded in the record being
//! read, shared by all readers of that record) and the global dictionary.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};

use crate::dictionary::{Dictionary, SharedDictionary};
use crate::error::{Error, Result};
use crate::marker::*;
use crate::unicode::{next_piece, Piece};
use crate::value::Value;
use crate::MAX_DEPTH;

/// The local dictionary of a record, shared by every reader and cursor over that record.
pub type LocalDictionary<'a> = Rc<RefCell<Dictionary<'a>>>;

/// A value computed for one reader position.
#[derive(Clone, Debug)]
pub(crate) struct Memo<T>(Option<(usize, T)>);

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Memo(None)
    }
}

impl<T: Clone> Memo<T> {
    pub(crate) fn get(&self, pos: usize) -> Option<T> {
        match &self.0 {
            Some((p, v)) if *p == pos => Some(v.clone()),
            _ => None,
        }
    }

    pub(crate) fn set(&mut self, pos: usize, v: T) -> T {
        self.0 = Some((pos, v.clone()));
        v
    }

    pub(crate) fn clear(&mut self) {
        self.0 = None;
    }
}

/// A decoded reference unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reference {
    Null,
    Local(usize),
    Global(usize),
}

#[derive(Clone, Debug)]
pub struct JbReader<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
    local: Option<LocalDictionary<'a>>,
    global: Option<SharedDictionary>,
    marker: Memo<Marker>,
    payload_size: Memo<usize>,
    string: Memo<Rc<str>>,
}

impl<'a> JbReader<'a> {
    /// Read `buf` without any dictionaries.
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_dictionaries(buf, None, None)
    }

    pub fn with_dictionaries(
        buf: &'a [u8],
        local: Option<LocalDictionary<'a>>,
        global: Option<SharedDictionary>,
    ) -> Self {
        Self {
            buf,
            pos: 0,
            end: buf.len(),
            local,
            global,
            marker: Memo::default(),
            payload_size: Memo::default(),
            string: Memo::default(),
        }
    }

    /// A new reader over `start..end` of the same buffer, sharing the dictionaries.
    pub fn view(&self, start: usize, end: usize) -> JbReader<'a> {
        let mut reader = Self::with_dictionaries(self.buf, self.local.clone(), self.global.clone());
        reader.move_to(start, end.min(self.buf.len()));
        reader
    }

    /// Rebind the reader to another record, keeping the instance. The cursor moves to the start
    /// of `buf`.
    pub fn reset(
        &mut self,
        buf: &'a [u8],
        local: Option<LocalDictionary<'a>>,
        global: Option<SharedDictionary>,
    ) {
        self.buf = buf;
        self.local = local;
        self.global = global;
        self.move_to(0, buf.len());
    }

    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.move_to(pos, self.end);
    }

    pub fn set_end(&mut self, end: usize) {
        self.move_to(self.pos, end.min(self.buf.len()));
    }

    /// The only place the cursor moves. Cached values belong to the old position and are
    /// dropped.
    fn move_to(&mut self, pos: usize, end: usize) {
        self.pos = pos;
        self.end = end;
        self.marker.clear();
        self.payload_size.clear();
        self.string.clear();
    }

    /// True while the cursor is on a unit, meaning `pos` is inside `[0, end)`.
    pub fn is_readable(&self) -> bool {
        self.pos < self.end
    }

    pub fn local_dictionary(&self) -> Option<&LocalDictionary<'a>> {
        self.local.as_ref()
    }

    pub fn set_local_dictionary(&mut self, local: Option<LocalDictionary<'a>>) {
        self.local = local;
        self.string.clear();
    }

    pub fn global_dictionary(&self) -> Option<&SharedDictionary> {
        self.global.as_ref()
    }

    pub fn set_global_dictionary(&mut self, global: Option<SharedDictionary>) {
        self.global = global;
        self.string.clear();
    }

    /// The lead-in byte at the cursor, or the undefined marker if the cursor is out of range.
    pub fn lead_in(&self) -> u8 {
        if self.is_readable() {
            self.buf[self.pos]
        } else {
            UNDEFINED
        }
    }

    fn marker(&mut self) -> Marker {
        if let Some(marker) = self.marker.get(self.pos) {
            return marker;
        }
        let marker = Marker::from_u8(self.lead_in());
        self.marker.set(self.pos, marker)
    }

    pub fn unit_type(&mut self) -> UnitType {
        self.marker().unit_type()
    }

    pub fn unit_header_size(&mut self) -> usize {
        self.marker().header_size()
    }

    pub fn unit_payload_size(&mut self) -> Result<usize> {
        if !self.is_readable() {
            return Ok(0);
        }
        if let Some(size) = self.payload_size.get(self.pos) {
            return Ok(size);
        }
        let size = unit_payload_size(&self.buf[..self.end], self.pos)?;
        Ok(self.payload_size.set(self.pos, size))
    }

    pub fn unit_size(&mut self) -> Result<usize> {
        Ok(self.unit_header_size() + self.unit_payload_size()?)
    }

    /// Move past the current unit. Returns whether the cursor is still on a unit afterwards.
    pub fn next_unit(&mut self) -> Result<bool> {
        if !self.is_readable() {
            return Ok(false);
        }
        let size = self.unit_size()?;
        let next = self.pos + size;
        if next > self.end {
            return Err(Error::too_short("skip unit", self.end - self.pos, size));
        }
        self.set_pos(next);
        Ok(self.is_readable())
    }

    /// Move onto the first child of the structure at the cursor and return the structure's end
    /// offset. An empty structure leaves the cursor at that end offset.
    pub fn enter_struct(&mut self) -> Result<usize> {
        let found = self.unit_type();
        if !found.is_struct() {
            return Err(Error::UnexpectedType {
                expected: "Struct",
                found,
            });
        }
        let header = self.unit_header_size();
        let size = self.unit_size()?;
        let struct_end = self.pos + size;
        if struct_end > self.end {
            return Err(Error::too_short(
                "enter struct",
                self.end - self.pos,
                size,
            ));
        }
        let first = self.pos + header;
        self.set_pos(first);
        Ok(struct_end)
    }

    /// The kind of the structure at the cursor, if there is one.
    pub fn struct_kind(&mut self) -> Option<StructKind> {
        match self.unit_type() {
            UnitType::Struct(kind) => Some(kind),
            _ => None,
        }
    }

    /// The variant of the structure at the cursor. `None` when the structure carries no variant
    /// field or the cursor isn't on a structure.
    pub fn struct_variant(&mut self) -> Result<Option<u32>> {
        match self.marker() {
            Marker::Struct {
                size_width,
                variant_width,
                ..
            } if variant_width > 0 => {
                let at = self.pos + 1 + size_width as usize;
                let v = read_uint(&self.buf[..self.end], at, variant_width, "decode struct variant")?;
                Ok(Some(v as u32))
            }
            _ => Ok(None),
        }
    }

    /// The `n` bytes of payload following the header of the current unit.
    fn payload(&mut self, n: usize) -> Result<&'a [u8]> {
        let start = self.pos + self.unit_header_size();
        let available = self.end.saturating_sub(start);
        if available < n {
            return Err(Error::too_short("get unit payload", available, n));
        }
        Ok(&self.buf[start..start + n])
    }

    /// The whole payload of the current unit.
    fn whole_payload(&mut self) -> Result<&'a [u8]> {
        let size = self.unit_payload_size()?;
        self.payload(size)
    }

    /// Decode an integer of any width. Returns `alternative` if the unit isn't an integer.
    pub fn decode_i64(&mut self, alternative: i64) -> Result<i64> {
        Ok(match self.marker() {
            Marker::TinyInt(v) => v as i64,
            Marker::Int8 => self.payload(1)?[0] as i8 as i64,
            Marker::Int16 => LittleEndian::read_i16(self.payload(2)?) as i64,
            Marker::Int32 => LittleEndian::read_i32(self.payload(4)?) as i64,
            Marker::Int64 => LittleEndian::read_i64(self.payload(8)?),
            _ => alternative,
        })
    }

    /// Decode an integer. Returns `alternative` if the unit isn't an integer or doesn't fit
    /// into 32 bits.
    pub fn decode_i32(&mut self, alternative: i32) -> Result<i32> {
        if self.unit_type() != UnitType::Int {
            return Ok(alternative);
        }
        let v = self.decode_i64(alternative as i64)?;
        Ok(i32::try_from(v).unwrap_or(alternative))
    }

    /// Decode a float of any width. Integers are converted. Returns `alternative` for anything
    /// else.
    pub fn decode_f64(&mut self, alternative: f64) -> Result<f64> {
        Ok(match self.marker() {
            Marker::TinyFloat(v) => v as f64,
            Marker::Float16 => f16_to_f64(LittleEndian::read_u16(self.payload(2)?)),
            Marker::Float32 => LittleEndian::read_f32(self.payload(4)?) as f64,
            Marker::Float64 => LittleEndian::read_f64(self.payload(8)?),
            Marker::Float128 => f128_to_f64(LittleEndian::read_u128(self.payload(16)?)),
            Marker::TinyInt(_) | Marker::Int8 | Marker::Int16 | Marker::Int32 | Marker::Int64 => {
                self.decode_i64(0)? as f64
            }
            _ => alternative,
        })
    }

    pub fn decode_f32(&mut self, alternative: f32) -> Result<f32> {
        match self.unit_type() {
            UnitType::Float | UnitType::Int => Ok(self.decode_f64(alternative as f64)? as f32),
            _ => Ok(alternative),
        }
    }

    /// Decode a timestamp in milliseconds since the UNIX epoch.
    pub fn decode_timestamp(&mut self, alternative: i64) -> Result<i64> {
        match self.marker() {
            Marker::Timestamp => Ok(LittleEndian::read_i48(self.payload(6)?)),
            _ => Ok(alternative),
        }
    }

    pub fn read_bool(&mut self, alternative: bool) -> bool {
        match self.marker() {
            Marker::True => true,
            Marker::False => false,
            _ => alternative,
        }
    }

    pub fn decode_ref(&mut self) -> Result<Reference> {
        let (index, global) = match self.marker() {
            Marker::NullRef => return Ok(Reference::Null),
            Marker::TinyRef { index, global } => (index as usize, global),
            Marker::Ref8 { global } => (self.payload(1)?[0] as usize + REF_BIAS, global),
            Marker::Ref16 { global } => {
                (LittleEndian::read_u16(self.payload(2)?) as usize + REF_BIAS, global)
            }
            Marker::Ref32 { global } => {
                (LittleEndian::read_u32(self.payload(4)?) as usize + REF_BIAS, global)
            }
            _ => {
                return Err(Error::UnexpectedType {
                    expected: "Ref",
                    found: self.unit_type(),
                })
            }
        };
        Ok(if global {
            Reference::Global(index)
        } else {
            Reference::Local(index)
        })
    }

    /// Decode a reference and look it up. The null reference yields `None`.
    pub fn decode_ref_string(&mut self) -> Result<Option<String>> {
        match self.decode_ref()? {
            Reference::Null => Ok(None),
            Reference::Local(index) => self.resolve(index, false).map(Some),
            Reference::Global(index) => self.resolve(index, true).map(Some),
        }
    }

    fn resolve(&self, index: usize, global: bool) -> Result<String> {
        if global {
            let dict = self
                .global
                .as_ref()
                .ok_or(Error::MissingDictionary("global"))?;
            dict.get_loaded(index)
                .map(String::from)
                .ok_or(Error::BadReference {
                    dictionary: "global",
                    index,
                })
        } else {
            let dict = self.local.as_ref().ok_or(Error::MissingDictionary("local"))?;
            let mut dict = dict.borrow_mut();
            dict.get(index)?
                .map(String::from)
                .ok_or(Error::BadReference {
                    dictionary: "local",
                    index,
                })
        }
    }

    /// Decode the string at the cursor, resolving embedded dictionary references.
    pub fn decode_string(&mut self) -> Result<String> {
        Ok(self.decode_shared_string()?.to_string())
    }

    pub(crate) fn decode_shared_string(&mut self) -> Result<Rc<str>> {
        if let Some(s) = self.string.get(self.pos) {
            return Ok(s);
        }
        let found = self.unit_type();
        if found != UnitType::String {
            return Err(Error::UnexpectedType {
                expected: "String",
                found,
            });
        }
        let payload = self.whole_payload()?;
        let s = decode_pieces(payload, |index, global| self.resolve(index, global))?;
        Ok(self.string.set(self.pos, Rc::from(s)))
    }

    /// Decode a map key. Keys are references, but plain strings are accepted too.
    pub fn decode_key(&mut self) -> Result<String> {
        match self.unit_type() {
            UnitType::String => self.decode_string(),
            UnitType::Ref => self.decode_ref_string()?.ok_or_else(|| {
                Error::BadEncode(format!("Null reference used as map key at {}", self.pos))
            }),
            found => Err(Error::UnexpectedType {
                expected: "map key",
                found,
            }),
        }
    }

    /// Fully decode the unit at the cursor. The cursor doesn't move.
    pub fn decode_value(&mut self) -> Result<Value> {
        self.decode_value_at(0)
    }

    fn decode_value_at(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(Error::ParseLimit("Depth limit exceeded".to_string()));
        }
        let found = self.unit_type();
        Ok(match found {
            UnitType::Null => Value::Null,
            UnitType::Undefined => {
                if !self.is_readable() {
                    return Err(Error::too_short("decode value", 0, 1));
                }
                Value::Undefined
            }
            UnitType::Bool => Value::Bool(self.read_bool(false)),
            UnitType::Int => Value::Int(self.decode_i64(0)?),
            UnitType::Float => Value::Float(self.decode_f64(0.0)?),
            UnitType::Timestamp => Value::Timestamp(self.decode_timestamp(0)?),
            UnitType::Ref => match self.decode_ref_string()? {
                Some(s) => Value::Str(s),
                None => Value::Null,
            },
            UnitType::String => Value::Str(self.decode_string()?),
            UnitType::Struct(StructKind::Array) => Value::Array(self.read_array_at(depth)?),
            UnitType::Struct(StructKind::Map) => Value::Map(self.read_map_at(depth)?),
            UnitType::Reserved => {
                return Err(Error::BadEncode(format!(
                    "Reserved lead-in byte 0x{:02x} at {}",
                    self.lead_in(),
                    self.pos
                )))
            }
            found => {
                return Err(Error::UnexpectedType {
                    expected: "value",
                    found,
                })
            }
        })
    }

    /// Decode the array at the cursor. The cursor doesn't move.
    pub fn read_array(&mut self) -> Result<Vec<Value>> {
        self.read_array_at(0)
    }

    fn read_array_at(&mut self, depth: usize) -> Result<Vec<Value>> {
        let start = self.pos;
        let struct_end = self.enter_struct()?;
        let mut items = Vec::new();
        while self.pos < struct_end {
            items.push(self.decode_value_at(depth + 1)?);
            self.next_child(struct_end)?;
        }
        self.set_pos(start);
        Ok(items)
    }

    /// Decode the map at the cursor. The cursor doesn't move.
    pub fn read_map(&mut self) -> Result<BTreeMap<String, Value>> {
        self.read_map_at(0)
    }

    fn read_map_at(&mut self, depth: usize) -> Result<BTreeMap<String, Value>> {
        let start = self.pos;
        let struct_end = self.enter_struct()?;
        let mut map = BTreeMap::new();
        while self.pos < struct_end {
            let key = self.decode_key()?;
            self.next_child(struct_end)?;
            if self.pos >= struct_end {
                return Err(Error::BadEncode(format!("Map key \"{}\" has no value", key)));
            }
            let value = self.decode_value_at(depth + 1)?;
            self.next_child(struct_end)?;
            map.insert(key, value);
        }
        self.set_pos(start);
        Ok(map)
    }

    /// Skip a child unit, failing if it runs past the end of its parent.
    pub(crate) fn next_child(&mut self, struct_end: usize) -> Result<()> {
        self.next_unit()?;
        if self.pos > struct_end {
            return Err(Error::BadEncode(format!(
                "Child unit overruns its structure, ending at {} instead of {}",
                self.pos, struct_end
            )));
        }
        Ok(())
    }
}

/// Decode a string payload, handing references to `resolve`.
fn decode_pieces(
    payload: &[u8],
    mut resolve: impl FnMut(usize, bool) -> Result<String>,
) -> Result<String> {
    let mut s = String::with_capacity(payload.len());
    let mut i = 0;
    while i < payload.len() {
        match next_piece(payload, &mut i)? {
            Piece::Char(c) => s.push(c),
            Piece::Ref {
                index,
                global,
                separator,
            } => {
                s.push_str(&resolve(index, global)?);
                if let Some(c) = separator.as_char() {
                    s.push(c);
                }
            }
        }
    }
    Ok(s)
}

/// Decode a string unit that may not contain dictionary references, such as dictionary
/// entries and ids. Returns the string and the position after the unit.
pub(crate) fn read_plain_string(buf: &[u8], pos: usize) -> Result<(String, usize)> {
    let lead_in = *buf
        .get(pos)
        .ok_or_else(|| Error::too_short("read string lead-in", 0, 1))?;
    let found = unit_type(lead_in);
    if found != UnitType::String {
        return Err(Error::UnexpectedType {
            expected: "String",
            found,
        });
    }
    let start = pos + unit_header_size(lead_in);
    let end = start + unit_payload_size(buf, pos)?;
    if end > buf.len() {
        return Err(Error::too_short(
            "get string payload",
            buf.len().saturating_sub(start),
            end - start,
        ));
    }
    let s = decode_pieces(&buf[start..end], |index, _| {
        Err(Error::BadEncode(format!(
            "Dictionary reference {} inside a plain string",
            index
        )))
    })?;
    Ok((s, end))
}

/// Convert IEEE 754 binary16 bits.
fn f16_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = ((bits >> 10) & 0x1F) as i32;
    let mant = (bits & 0x3FF) as f64;
    sign * match exp {
        0 => mant * 2f64.powi(-24),
        0x1F if mant == 0.0 => f64::INFINITY,
        0x1F => f64::NAN,
        _ => (1.0 + mant / 1024.0) * 2f64.powi(exp - 15),
    }
}

/// Convert IEEE 754 binary128 bits, dropping the mantissa bits f64 can't hold.
fn f128_to_f64(bits: u128) -> f64 {
    let sign = if bits >> 127 != 0 { -1.0 } else { 1.0 };
    let exp = ((bits >> 112) & 0x7FFF) as i32;
    let mant = bits & ((1u128 << 112) - 1);
    let frac = (mant >> 60) as f64 / (1u64 << 52) as f64;
    sign * match exp {
        // Subnormals of binary128 are far below the f64 range.
        0 => 0.0,
        0x7FFF if mant == 0 => f64::INFINITY,
        0x7FFF => f64::NAN,
        _ => (1.0 + frac) * 2f64.powi(exp - 16383),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::JbBuilder;
    use rand::prelude::*;

    fn encode(f: impl FnOnce(&mut JbBuilder)) -> Vec<u8> {
        let mut builder = JbBuilder::new();
        f(&mut builder);
        builder.take()
    }

    mod int {
        use super::*;

        #[test]
        fn roundtrip() {
            let mut test_cases = vec![
                0i64,
                1,
                -1,
                15,
                16,
                -16,
                -17,
                127,
                128,
                -128,
                -129,
                i16::MAX as i64,
                i16::MIN as i64,
                i32::MAX as i64,
                i32::MIN as i64,
                i64::MAX,
                i64::MIN,
            ];
            let mut rng = rand::thread_rng();
            test_cases.extend((0..200).map(|_| rng.gen::<i64>() >> rng.gen_range(0..63)));
            for v in test_cases {
                let bytes = encode(|b| b.encode_int64(v));
                let mut reader = JbReader::new(&bytes);
                assert_eq!(reader.unit_type(), UnitType::Int);
                assert_eq!(reader.decode_i64(0).unwrap(), v);
                assert_eq!(reader.unit_size().unwrap(), bytes.len());
            }
        }

        #[test]
        fn alternative() {
            let bytes = encode(|b| b.encode_int64(i64::MAX));
            let mut reader = JbReader::new(&bytes);
            assert_eq!(reader.decode_i32(-1).unwrap(), -1);
            let bytes = encode(|b| b.encode_bool(true));
            let mut reader = JbReader::new(&bytes);
            assert_eq!(reader.decode_i64(7).unwrap(), 7);
            assert_eq!(reader.decode_timestamp(8).unwrap(), 8);
            assert!(reader.read_bool(false));
        }

        #[test]
        fn not_enough_bytes() {
            let bytes = encode(|b| b.encode_int64(i64::MAX));
            for len in 1..bytes.len() {
                let mut reader = JbReader::new(&bytes[..len]);
                assert!(
                    matches!(reader.decode_i64(0), Err(Error::LengthTooShort { .. })),
                    "Truncated to {} bytes",
                    len
                );
            }
        }
    }

    mod float {
        use super::*;

        #[test]
        fn roundtrip() {
            let test_cases = [
                0.0f64,
                -0.0,
                1.0,
                -16.0,
                15.5,
                0.1,
                std::f64::consts::PI,
                f64::MAX,
                f64::MIN_POSITIVE,
                f64::INFINITY,
                f64::NEG_INFINITY,
            ];
            for v in test_cases {
                let bytes = encode(|b| b.encode_double(v));
                let mut reader = JbReader::new(&bytes);
                let decoded = reader.decode_f64(f64::NAN).unwrap();
                assert_eq!(decoded.to_bits(), v.to_bits(), "{} decoded as {}", v, decoded);
            }
            let bytes = encode(|b| b.encode_double(f64::NAN));
            assert!(JbReader::new(&bytes).decode_f64(0.0).unwrap().is_nan());
            let bytes = encode(|b| b.encode_float(-2.75));
            assert_eq!(JbReader::new(&bytes).decode_f32(0.0).unwrap(), -2.75);
        }

        #[test]
        fn wide_formats() {
            // 1.5 as binary16 and binary128
            let half = [FLOAT16, 0x00, 0x3e];
            assert_eq!(JbReader::new(&half).decode_f64(0.0).unwrap(), 1.5);
            let mut quad = vec![FLOAT128];
            quad.extend_from_slice(&(0x3fff_8000u128 << 96).to_le_bytes());
            assert_eq!(JbReader::new(&quad).decode_f64(0.0).unwrap(), 1.5);
            let half_inf = [FLOAT16, 0x00, 0xfc];
            assert_eq!(
                JbReader::new(&half_inf).decode_f64(0.0).unwrap(),
                f64::NEG_INFINITY
            );
        }

        #[test]
        fn integers_convert() {
            let bytes = encode(|b| b.encode_int(300));
            assert_eq!(JbReader::new(&bytes).decode_f64(0.0).unwrap(), 300.0);
        }
    }

    mod scalar {
        use super::*;

        #[test]
        fn roundtrip() {
            let bytes = encode(|b| {
                b.encode_null();
                b.encode_undefined();
                b.encode_bool(true);
                b.encode_bool(false);
                b.encode_timestamp(1_700_000_000_123).unwrap();
                b.encode_timestamp(-5).unwrap();
            });
            let mut reader = JbReader::new(&bytes);
            assert_eq!(reader.unit_type(), UnitType::Null);
            assert!(reader.next_unit().unwrap());
            assert_eq!(reader.unit_type(), UnitType::Undefined);
            assert!(reader.next_unit().unwrap());
            assert!(reader.read_bool(false));
            assert!(reader.next_unit().unwrap());
            assert!(!reader.read_bool(true));
            assert!(reader.next_unit().unwrap());
            assert_eq!(reader.decode_timestamp(0).unwrap(), 1_700_000_000_123);
            assert!(reader.next_unit().unwrap());
            assert_eq!(reader.decode_timestamp(0).unwrap(), -5);
            assert!(!reader.next_unit().unwrap());
            assert_eq!(reader.lead_in(), UNDEFINED);
            assert!(!reader.next_unit().unwrap());
        }

        #[test]
        fn reserved() {
            let bytes = [0x2d];
            let mut reader = JbReader::new(&bytes);
            assert_eq!(reader.unit_type(), UnitType::Reserved);
            assert!(matches!(reader.next_unit(), Err(Error::BadEncode(_))));
            assert!(matches!(reader.decode_value(), Err(Error::BadEncode(_))));
        }
    }

    mod reference {
        use super::*;

        #[test]
        fn roundtrip() {
            for (index, global) in [(0, false), (15, true), (16, true), (271, false), (70_000, true)] {
                let bytes = encode(|b| b.encode_ref(index, global).unwrap());
                let expected = if global {
                    Reference::Global(index as usize)
                } else {
                    Reference::Local(index as usize)
                };
                assert_eq!(JbReader::new(&bytes).decode_ref().unwrap(), expected);
            }
            let bytes = encode(|b| b.encode_ref(-1, false).unwrap());
            let mut reader = JbReader::new(&bytes);
            assert_eq!(reader.decode_ref().unwrap(), Reference::Null);
            assert_eq!(reader.decode_ref_string().unwrap(), None);
            assert_eq!(JbReader::new(&[0x37]).decode_ref().unwrap(), Reference::Null);
        }

        #[test]
        fn missing_dictionary() {
            let bytes = encode(|b| b.encode_ref(3, true).unwrap());
            let mut reader = JbReader::new(&bytes);
            assert_eq!(
                reader.decode_ref_string(),
                Err(Error::MissingDictionary("global"))
            );
        }

        #[test]
        fn bad_reference() {
            let mut dict = Dictionary::new(Some("g"));
            dict.add("only").unwrap();
            let bytes = encode(|b| b.encode_ref(1, true).unwrap());
            let mut reader = JbReader::with_dictionaries(&bytes, None, Some(dict.share().unwrap()));
            assert_eq!(
                reader.decode_ref_string(),
                Err(Error::BadReference {
                    dictionary: "global",
                    index: 1
                })
            );
        }
    }

    mod string {
        use super::*;
        use proptest::prelude::*;

        fn roundtrip_plain(s: &str) {
            let bytes = encode(|b| b.encode_string(s).unwrap());
            let mut reader = JbReader::new(&bytes);
            assert_eq!(reader.decode_string().unwrap(), s);
            assert_eq!(reader.unit_size().unwrap(), bytes.len());
            let (plain, end) = read_plain_string(&bytes, 0).unwrap();
            assert_eq!(plain, s);
            assert_eq!(end, bytes.len());
        }

        #[test]
        fn roundtrip() {
            roundtrip_plain("");
            roundtrip_plain("plain ascii");
            roundtrip_plain("Straße über Brücke");
            roundtrip_plain("東京タワー");
            roundtrip_plain("🌍🌎🌏 astral");
            roundtrip_plain(&"z".repeat(70_000));
        }

        #[test]
        fn memoized() {
            let bytes = encode(|b| b.encode_string("cached").unwrap());
            let mut reader = JbReader::new(&bytes);
            let first = reader.decode_shared_string().unwrap();
            let second = reader.decode_shared_string().unwrap();
            assert!(Rc::ptr_eq(&first, &second));
            reader.set_pos(0);
            let third = reader.decode_shared_string().unwrap();
            assert!(!Rc::ptr_eq(&first, &third));
        }

        #[test]
        fn text_without_global() {
            let mut builder = JbBuilder::new();
            let text = "Main Street_north:side 42 and more";
            builder.encode_text(text).unwrap();
            let mut local = builder.local_dictionary().clone();
            local.load_all().unwrap();
            let bytes = builder.take();
            let local = Rc::new(RefCell::new(local));
            let mut reader = JbReader::with_dictionaries(&bytes, Some(local), None);
            assert_eq!(reader.decode_string().unwrap(), text);

            let mut reader = JbReader::new(&bytes);
            assert_eq!(reader.decode_string(), Err(Error::MissingDictionary("local")));
            assert!(read_plain_string(&bytes, 0).is_err());
        }

        #[test]
        fn urn_with_global() {
            let mut dict = Dictionary::new(Some("g1"));
            dict.add("urn:here:mom:Topology:").unwrap();
            let global = dict.share().unwrap();
            let mut builder = JbBuilder::with_global(Some(global.clone()));
            let text = "urn:here:mom:Topology:123";
            builder.encode_text(text).unwrap();
            let bytes = builder.take();
            assert!(bytes.len() < text.len());
            let mut reader = JbReader::with_dictionaries(&bytes, None, Some(global));
            assert_eq!(reader.decode_string().unwrap(), text);
        }

        proptest! {
            #[test]
            fn any_string(s in any::<String>()) {
                let bytes = encode(|b| b.encode_string(&s).unwrap());
                prop_assert_eq!(JbReader::new(&bytes).decode_string().unwrap(), s);
            }

            #[test]
            fn any_text(s in "[a-zA-Z0-9:_ .ä😀-]{0,80}") {
                let mut dict = Dictionary::new(Some("g"));
                for w in ["urn:", "road", "Street", "urn:here:"] {
                    dict.add(w).unwrap();
                }
                let global = dict.share().unwrap();
                let mut builder = JbBuilder::with_global(Some(global.clone()));
                builder.encode_text(&s).unwrap();
                let local = Rc::new(RefCell::new(builder.local_dictionary().clone()));
                let bytes = builder.take();
                let mut reader = JbReader::with_dictionaries(&bytes, Some(local), Some(global));
                prop_assert_eq!(reader.decode_string().unwrap(), s);
            }
        }
    }

    mod structure {
        use super::*;

        #[test]
        fn reset_to_another_record() {
            let first = encode(|b| b.encode_string("first record").unwrap());
            let second = encode(|b| b.encode_int(7));
            let mut reader = JbReader::new(&first);
            assert_eq!(reader.decode_string().unwrap(), "first record");
            // Same position, so a stale cached string would be served.
            reader.reset(&second, None, None);
            assert_eq!(reader.pos(), 0);
            assert_eq!(reader.end(), second.len());
            assert_eq!(reader.unit_type(), UnitType::Int);
            assert_eq!(reader.decode_i64(0).unwrap(), 7);
            assert!(reader.decode_string().is_err(), "No string may survive the reset");
        }

        #[test]
        fn nesting() {
            let mut builder = JbBuilder::new();
            let outer = builder.start_array();
            builder.encode_int(1);
            let map = builder.start_map();
            builder.write_key("inner").unwrap();
            let inner = builder.start_array();
            builder.encode_string("deep").unwrap();
            builder.encode_double(2.5);
            builder.end_array(inner).unwrap();
            builder.write_key("flag").unwrap();
            builder.encode_bool(true);
            builder.end_map(map).unwrap();
            builder.encode_null();
            builder.end_array(outer).unwrap();
            let local = Rc::new(RefCell::new(builder.local_dictionary().clone()));
            let bytes = builder.take();

            let mut reader = JbReader::with_dictionaries(&bytes, Some(local), None);
            assert_eq!(reader.struct_kind(), Some(StructKind::Array));
            assert_eq!(reader.unit_size().unwrap(), bytes.len());

            let value = reader.decode_value().unwrap();
            assert_eq!(reader.pos(), 0);
            assert_eq!(value[0], Value::Int(1));
            assert_eq!(value[1]["inner"][0], Value::from("deep"));
            assert_eq!(value[1]["inner"][1], Value::Float(2.5));
            assert_eq!(value[1]["flag"], Value::Bool(true));
            assert_eq!(value[2], Value::Null);

            let end = reader.enter_struct().unwrap();
            assert_eq!(end, bytes.len());
            assert!(reader.next_unit().unwrap());
            assert_eq!(reader.struct_kind(), Some(StructKind::Map));
            assert!(reader.next_unit().unwrap());
            assert_eq!(reader.unit_type(), UnitType::Null);
            assert!(!reader.next_unit().unwrap());
        }

        #[test]
        fn empty() {
            let bytes = encode(|b| {
                let mark = b.start_map();
                b.end_map(mark).unwrap();
            });
            let mut reader = JbReader::new(&bytes);
            assert_eq!(reader.enter_struct().unwrap(), 1);
            assert!(!reader.is_readable());
            reader.set_pos(0);
            assert!(reader.read_map().unwrap().is_empty());
        }

        #[test]
        fn variant() {
            let bytes = encode(|b| {
                let mark = b.start_struct();
                b.encode_null();
                b.end_struct(mark, StructKind::Custom, Some(7)).unwrap();
            });
            let mut reader = JbReader::new(&bytes);
            assert_eq!(reader.struct_kind(), Some(StructKind::Custom));
            assert_eq!(reader.struct_variant().unwrap(), Some(7));
            assert!(matches!(
                reader.decode_value(),
                Err(Error::UnexpectedType { .. })
            ));
        }

        #[test]
        fn not_enough_bytes() {
            let bytes = encode(|b| {
                let mark = b.start_array();
                b.encode_string("abc").unwrap();
                b.end_array(mark).unwrap();
            });
            let mut reader = JbReader::new(&bytes[..bytes.len() - 1]);
            assert!(matches!(
                reader.enter_struct(),
                Err(Error::LengthTooShort { .. })
            ));
            assert!(reader.decode_value().is_err());
        }

        #[test]
        fn depth_limit() {
            let mut builder = JbBuilder::new();
            let marks: Vec<usize> = (0..=MAX_DEPTH + 1).map(|_| builder.start_array()).collect();
            for mark in marks.into_iter().rev() {
                builder.end_array(mark).unwrap();
            }
            let bytes = builder.take();
            let mut reader = JbReader::new(&bytes);
            assert!(matches!(reader.decode_value(), Err(Error::ParseLimit(_))));
        }

        #[test]
        fn value_roundtrip() {
            let json = r#"{
                "id": "urn:here:mom:Topology:42",
                "properties": {"featureType": "Topology", "lanes": [1, 2, 3.5], "open": false},
                "bbox": null
            }"#;
            let value: Value = serde_json::from_str(json).unwrap();
            let mut builder = JbBuilder::new();
            builder.encode_value(&value).unwrap();
            let local = Rc::new(RefCell::new(builder.local_dictionary().clone()));
            let bytes = builder.take();
            let mut reader = JbReader::with_dictionaries(&bytes, Some(local), None);
            assert_eq!(reader.decode_value().unwrap(), value);
        }
    }
}
