//! Lead-in byte classification.
//!
//! Every unit starts with a lead-in byte whose two high bits select the class: mixed scalars and
//! references (`00`), tiny immediates (`01`), strings (`10`) and structures (`11`). See
//! [`crate::format`] for the full table.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

pub(crate) const CLASS_MASK: u8 = 0b1100_0000;
pub(crate) const CLASS_TINY: u8 = 0b0100_0000;
pub(crate) const CLASS_STRING: u8 = 0b1000_0000;
pub(crate) const CLASS_STRUCT: u8 = 0b1100_0000;

pub(crate) const TINY_FLOAT_BIT: u8 = 0b0010_0000;
pub(crate) const TINY_MIN: i64 = -16;
pub(crate) const TINY_MAX: i64 = 15;

pub(crate) const TINY_REF_GLOBAL_BIT: u8 = 0x10;

pub(crate) const INT8: u8 = 0x20;
pub(crate) const INT16: u8 = 0x21;
pub(crate) const INT32: u8 = 0x22;
pub(crate) const INT64: u8 = 0x23;
pub(crate) const FLOAT16: u8 = 0x24;
pub(crate) const FLOAT32: u8 = 0x25;
pub(crate) const FLOAT64: u8 = 0x26;
pub(crate) const FLOAT128: u8 = 0x27;
pub(crate) const TIMESTAMP: u8 = 0x28;
pub(crate) const NULL: u8 = 0x29;
/// Lead-in of the undefined unit; also what a reader sees outside of its bounds.
pub const UNDEFINED: u8 = 0x2A;
pub(crate) const FALSE: u8 = 0x2B;
pub(crate) const TRUE: u8 = 0x2C;
pub(crate) const REF8: u8 = 0x30;
pub(crate) const REF16: u8 = 0x31;
pub(crate) const REF32: u8 = 0x32;
pub(crate) const NULL_REF: u8 = 0x33;
pub(crate) const REF_GLOBAL_BIT: u8 = 0x04;

/// Extended references store `index - REF_BIAS`, the tiny form covers everything below.
pub(crate) const REF_BIAS: usize = 16;

/// Largest string length stored directly in the lead-in byte.
pub(crate) const STR_FIX_MAX: usize = 60;
pub(crate) const STR_LEN8: u8 = 61;
pub(crate) const STR_LEN16: u8 = 62;
pub(crate) const STR_LEN32: u8 = 63;
/// Largest string length covered by the one-byte length form.
pub(crate) const STR_LEN8_MAX: usize = STR_FIX_MAX + 1 + 254;

/// The kinds of structure a struct lead-in can announce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StructKind {
    Array,
    Map,
    Dictionary,
    Feature,
    Xyz,
    Custom,
}

impl StructKind {
    pub fn name(&self) -> &'static str {
        match self {
            StructKind::Array => "Array",
            StructKind::Map => "Map",
            StructKind::Dictionary => "Dictionary",
            StructKind::Feature => "Feature",
            StructKind::Xyz => "Xyz",
            StructKind::Custom => "Custom",
        }
    }

    /// Whether the kind carries a variant field.
    pub fn has_variant(&self) -> bool {
        matches!(
            self,
            StructKind::Feature | StructKind::Xyz | StructKind::Custom
        )
    }
}

/// The type of a unit, as far as the lead-in byte tells it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitType {
    Null,
    Undefined,
    Bool,
    Int,
    Float,
    Timestamp,
    Ref,
    String,
    Struct(StructKind),
    Reserved,
}

impl UnitType {
    pub fn name(&self) -> &'static str {
        match self {
            UnitType::Null => "Null",
            UnitType::Undefined => "Undefined",
            UnitType::Bool => "Bool",
            UnitType::Int => "Int",
            UnitType::Float => "Float",
            UnitType::Timestamp => "Timestamp",
            UnitType::Ref => "Ref",
            UnitType::String => "String",
            UnitType::Struct(kind) => kind.name(),
            UnitType::Reserved => "Reserved",
        }
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, UnitType::Struct(_))
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded lead-in byte. For internal use only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Marker {
    TinyInt(i8),
    TinyFloat(i8),
    TinyRef { index: u8, global: bool },
    Int8,
    Int16,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
    Float128,
    Timestamp,
    Null,
    Undefined,
    False,
    True,
    Ref8 { global: bool },
    Ref16 { global: bool },
    Ref32 { global: bool },
    NullRef,
    FixStr(u8),
    Str8,
    Str16,
    Str32,
    Struct {
        kind: StructKind,
        size_width: u8,
        variant_width: u8,
    },
    Reserved(u8),
}

/// Map a 2-bit width code onto the number of bytes it selects.
pub(crate) fn width_of(code: u8) -> u8 {
    match code & 0b11 {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 4,
    }
}

/// Map a byte count (0/1/2/4) back onto its 2-bit width code.
pub(crate) fn width_code(width: u8) -> u8 {
    match width {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 3,
    }
}

/// Smallest width (1/2/4 bytes) able to hold `n`.
pub(crate) fn min_width(n: u64) -> u8 {
    if n <= u8::MAX as u64 {
        1
    } else if n <= u16::MAX as u64 {
        2
    } else {
        4
    }
}

fn sign_extend5(v: u8) -> i8 {
    (((v & 0x1F) << 3) as i8) >> 3
}

impl Marker {
    /// Construct a marker from a single byte.
    pub fn from_u8(n: u8) -> Marker {
        match n & CLASS_MASK {
            CLASS_TINY => {
                if n & TINY_FLOAT_BIT != 0 {
                    Marker::TinyFloat(sign_extend5(n))
                } else {
                    Marker::TinyInt(sign_extend5(n))
                }
            }
            CLASS_STRING => match n & 0x3F {
                61 => Marker::Str8,
                62 => Marker::Str16,
                63 => Marker::Str32,
                len => Marker::FixStr(len),
            },
            CLASS_STRUCT => {
                let size_width = width_of(n >> 4);
                let group = (n >> 2) & 0b11;
                let low = n & 0b11;
                let (kind, variant_width) = match group {
                    0 => match low {
                        0 => (StructKind::Array, 0),
                        1 => (StructKind::Map, 0),
                        2 => (StructKind::Dictionary, 0),
                        _ => return Marker::Reserved(n),
                    },
                    1 => (StructKind::Feature, width_of(low)),
                    2 => (StructKind::Xyz, width_of(low)),
                    _ => (StructKind::Custom, width_of(low)),
                };
                Marker::Struct {
                    kind,
                    size_width,
                    variant_width,
                }
            }
            _ => match n {
                0x00..=0x1F => Marker::TinyRef {
                    index: n & 0x0F,
                    global: n & TINY_REF_GLOBAL_BIT != 0,
                },
                INT8 => Marker::Int8,
                INT16 => Marker::Int16,
                INT32 => Marker::Int32,
                INT64 => Marker::Int64,
                FLOAT16 => Marker::Float16,
                FLOAT32 => Marker::Float32,
                FLOAT64 => Marker::Float64,
                FLOAT128 => Marker::Float128,
                TIMESTAMP => Marker::Timestamp,
                NULL => Marker::Null,
                UNDEFINED => Marker::Undefined,
                FALSE => Marker::False,
                TRUE => Marker::True,
                0x30..=0x37 => {
                    let global = n & REF_GLOBAL_BIT != 0;
                    match n & 0b11 {
                        0 => Marker::Ref8 { global },
                        1 => Marker::Ref16 { global },
                        2 => Marker::Ref32 { global },
                        _ => Marker::NullRef,
                    }
                }
                _ => Marker::Reserved(n),
            },
        }
    }

    /// Converts a marker into its single-byte representation. Assumes the content of the marker
    /// is already in range.
    pub fn into_u8(self) -> u8 {
        match self {
            Marker::TinyInt(v) => CLASS_TINY | (v as u8 & 0x1F),
            Marker::TinyFloat(v) => CLASS_TINY | TINY_FLOAT_BIT | (v as u8 & 0x1F),
            Marker::TinyRef { index, global } => {
                (index & 0x0F) | if global { TINY_REF_GLOBAL_BIT } else { 0 }
            }
            Marker::Int8 => INT8,
            Marker::Int16 => INT16,
            Marker::Int32 => INT32,
            Marker::Int64 => INT64,
            Marker::Float16 => FLOAT16,
            Marker::Float32 => FLOAT32,
            Marker::Float64 => FLOAT64,
            Marker::Float128 => FLOAT128,
            Marker::Timestamp => TIMESTAMP,
            Marker::Null => NULL,
            Marker::Undefined => UNDEFINED,
            Marker::False => FALSE,
            Marker::True => TRUE,
            Marker::Ref8 { global } => REF8 | if global { REF_GLOBAL_BIT } else { 0 },
            Marker::Ref16 { global } => REF16 | if global { REF_GLOBAL_BIT } else { 0 },
            Marker::Ref32 { global } => REF32 | if global { REF_GLOBAL_BIT } else { 0 },
            Marker::NullRef => NULL_REF,
            Marker::FixStr(len) => CLASS_STRING | (len & 0x3F),
            Marker::Str8 => CLASS_STRING | STR_LEN8,
            Marker::Str16 => CLASS_STRING | STR_LEN16,
            Marker::Str32 => CLASS_STRING | STR_LEN32,
            Marker::Struct {
                kind,
                size_width,
                variant_width,
            } => {
                let (group, low) = match kind {
                    StructKind::Array => (0, 0),
                    StructKind::Map => (0, 1),
                    StructKind::Dictionary => (0, 2),
                    StructKind::Feature => (1, width_code(variant_width)),
                    StructKind::Xyz => (2, width_code(variant_width)),
                    StructKind::Custom => (3, width_code(variant_width)),
                };
                CLASS_STRUCT | (width_code(size_width) << 4) | (group << 2) | low
            }
            Marker::Reserved(n) => n,
        }
    }

    pub fn unit_type(&self) -> UnitType {
        use self::Marker::*;
        match self {
            TinyInt(_) | Int8 | Int16 | Int32 | Int64 => UnitType::Int,
            TinyFloat(_) | Float16 | Float32 | Float64 | Float128 => UnitType::Float,
            TinyRef { .. } | Ref8 { .. } | Ref16 { .. } | Ref32 { .. } | NullRef => UnitType::Ref,
            Timestamp => UnitType::Timestamp,
            Null => UnitType::Null,
            Undefined => UnitType::Undefined,
            False | True => UnitType::Bool,
            FixStr(_) | Str8 | Str16 | Str32 => UnitType::String,
            Struct { kind, .. } => UnitType::Struct(*kind),
            Reserved(_) => UnitType::Reserved,
        }
    }

    /// Number of header bytes, lead-in included.
    pub fn header_size(&self) -> usize {
        use self::Marker::*;
        match self {
            Str8 => 2,
            Str16 => 3,
            Str32 => 5,
            Struct {
                size_width,
                variant_width,
                ..
            } => 1 + *size_width as usize + *variant_width as usize,
            _ => 1,
        }
    }

    /// Payload size of units whose payload size doesn't depend on the bytes after the lead-in.
    pub fn fixed_payload_size(&self) -> Option<usize> {
        use self::Marker::*;
        Some(match self {
            Int8 | Ref8 { .. } => 1,
            Int16 | Float16 | Ref16 { .. } => 2,
            Int32 | Float32 | Ref32 { .. } => 4,
            Int64 | Float64 => 8,
            Float128 => 16,
            Timestamp => 6,
            FixStr(len) => *len as usize,
            Str8 | Str16 | Str32 | Struct { .. } => return None,
            _ => 0,
        })
    }
}

impl From<u8> for Marker {
    fn from(val: u8) -> Marker {
        Marker::from_u8(val)
    }
}

impl From<Marker> for u8 {
    fn from(val: Marker) -> u8 {
        val.into_u8()
    }
}

/// Classify a lead-in byte.
pub fn unit_type(lead_in: u8) -> UnitType {
    Marker::from_u8(lead_in).unit_type()
}

/// The header size of the unit announced by `lead_in`, lead-in byte included.
pub fn unit_header_size(lead_in: u8) -> usize {
    Marker::from_u8(lead_in).header_size()
}

/// Read a little-endian unsigned integer of `width` bytes at `pos`.
pub(crate) fn read_uint(buf: &[u8], pos: usize, width: u8, step: &'static str) -> Result<u64> {
    let width = width as usize;
    let available = buf.len().saturating_sub(pos);
    if available < width {
        return Err(Error::too_short(step, available, width));
    }
    if width == 0 {
        return Ok(0);
    }
    Ok(LittleEndian::read_uint(&buf[pos..pos + width], width))
}

/// Write `v` as a little-endian unsigned integer of `width` bytes at `pos`.
pub(crate) fn write_uint(buf: &mut [u8], pos: usize, width: u8, v: u64) {
    let width = width as usize;
    if width == 0 {
        return;
    }
    LittleEndian::write_uint(&mut buf[pos..pos + width], v, width);
}

/// The payload size of the unit starting at `pos`. Needs the bytes following the lead-in for
/// strings and structures.
pub fn unit_payload_size(buf: &[u8], pos: usize) -> Result<usize> {
    let lead_in = *buf
        .get(pos)
        .ok_or_else(|| Error::too_short("read lead-in", 0, 1))?;
    let marker = Marker::from_u8(lead_in);
    if let Marker::Reserved(n) = marker {
        return Err(Error::BadEncode(format!(
            "Reserved lead-in byte 0x{:02x} at {}",
            n, pos
        )));
    }
    if let Some(size) = marker.fixed_payload_size() {
        return Ok(size);
    }
    Ok(match marker {
        Marker::Str8 => read_uint(buf, pos + 1, 1, "decode Str8 length")? as usize + STR_LEN8 as usize,
        Marker::Str16 => read_uint(buf, pos + 1, 2, "decode Str16 length")? as usize,
        Marker::Str32 => read_uint(buf, pos + 1, 4, "decode Str32 length")? as usize,
        Marker::Struct { size_width, .. } => {
            read_uint(buf, pos + 1, size_width, "decode struct size")? as usize
        }
        _ => 0,
    })
}

/// Header plus payload size of the unit starting at `pos`.
pub fn unit_size(buf: &[u8], pos: usize) -> Result<usize> {
    let lead_in = *buf
        .get(pos)
        .ok_or_else(|| Error::too_short("read lead-in", 0, 1))?;
    Ok(unit_header_size(lead_in) + unit_payload_size(buf, pos)?)
}
