//! The code point scheme used inside string payloads.
//!
//! - `0xxx_xxxx`: ASCII.
//! - `10xx_xxxx yyyy_yyyy`: 14-bit value, code point minus 128.
//! - `110x_xxxx` + 16-bit big-endian tail: full 21-bit code point.
//! - `111s_sgvv` + 1/2/4-byte little-endian index: dictionary reference, `ss` selects a separator
//!   appended after the referenced string, `g` selects the global dictionary and `vv` the index
//!   width.

use crate::error::{Error, Result};
use crate::marker::{min_width, read_uint, width_code, width_of};

const TWO_BYTE_BIAS: u32 = 128;
const TWO_BYTE_MAX: u32 = TWO_BYTE_BIAS + 0x3FFF;
const MAX_CODE_POINT: u32 = 0x10FFFF;

const REF_PREFIX: u8 = 0b1110_0000;
const REF_GLOBAL_BIT: u8 = 0b0000_0100;

/// Separator automatically appended after a dictionary reference inside a string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Separator {
    None,
    Space,
    Underscore,
    Colon,
}

impl Separator {
    pub fn from_char(c: char) -> Option<Separator> {
        match c {
            ' ' => Some(Separator::Space),
            '_' => Some(Separator::Underscore),
            ':' => Some(Separator::Colon),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match self {
            Separator::None => None,
            Separator::Space => Some(' '),
            Separator::Underscore => Some('_'),
            Separator::Colon => Some(':'),
        }
    }

    fn bits(&self) -> u8 {
        match self {
            Separator::None => 0,
            Separator::Space => 1,
            Separator::Underscore => 2,
            Separator::Colon => 3,
        }
    }

    fn from_bits(bits: u8) -> Separator {
        match bits & 0b11 {
            0 => Separator::None,
            1 => Separator::Space,
            2 => Separator::Underscore,
            _ => Separator::Colon,
        }
    }
}

/// One decoded piece of a string payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Piece {
    Char(char),
    Ref {
        index: usize,
        global: bool,
        separator: Separator,
    },
}

/// Number of bytes the code point takes in the scheme.
pub(crate) fn code_point_len(cp: u32) -> usize {
    if cp < 0x80 {
        1
    } else if cp <= TWO_BYTE_MAX {
        2
    } else {
        3
    }
}

pub(crate) fn push_code_point(buf: &mut Vec<u8>, cp: u32) -> Result<()> {
    if cp > MAX_CODE_POINT || (0xD800..=0xDFFF).contains(&cp) {
        return Err(Error::InvalidCodePoint(cp));
    }
    match code_point_len(cp) {
        1 => buf.push(cp as u8),
        2 => {
            let v = cp - TWO_BYTE_BIAS;
            buf.push(0b1000_0000 | (v >> 8) as u8);
            buf.push(v as u8);
        }
        _ => {
            buf.push(0b1100_0000 | (cp >> 16) as u8);
            buf.push((cp >> 8) as u8);
            buf.push(cp as u8);
        }
    }
    Ok(())
}

pub(crate) fn push_ref(buf: &mut Vec<u8>, index: usize, global: bool, separator: Separator) {
    let width = min_width(index as u64);
    let mut lead_in = REF_PREFIX | (separator.bits() << 3) | width_code(width);
    if global {
        lead_in |= REF_GLOBAL_BIT;
    }
    buf.push(lead_in);
    buf.extend_from_slice(&(index as u32).to_le_bytes()[..width as usize]);
}

/// Decode the piece starting at `payload[*i]`, advancing `i` past it.
pub(crate) fn next_piece(payload: &[u8], i: &mut usize) -> Result<Piece> {
    let lead_in = payload[*i];
    let remaining = payload.len() - *i;
    let piece = match lead_in >> 5 {
        0..=3 => {
            *i += 1;
            Piece::Char(lead_in as char)
        }
        4 | 5 => {
            if remaining < 2 {
                return Err(Error::too_short("decode 2-byte code point", remaining, 2));
            }
            let v = (((lead_in & 0x3F) as u32) << 8) | payload[*i + 1] as u32;
            *i += 2;
            Piece::Char(to_char(v + TWO_BYTE_BIAS)?)
        }
        6 => {
            if remaining < 3 {
                return Err(Error::too_short("decode 3-byte code point", remaining, 3));
            }
            let v = (((lead_in & 0x1F) as u32) << 16)
                | ((payload[*i + 1] as u32) << 8)
                | payload[*i + 2] as u32;
            *i += 3;
            Piece::Char(to_char(v)?)
        }
        _ => {
            let code = lead_in & 0b11;
            if code == 3 {
                return Err(Error::BadEncode(format!(
                    "Reserved string reference lead-in 0x{:02x}",
                    lead_in
                )));
            }
            let width = width_of(code);
            let index = read_uint(payload, *i + 1, width, "decode string reference")? as usize;
            *i += 1 + width as usize;
            Piece::Ref {
                index,
                global: lead_in & REF_GLOBAL_BIT != 0,
                separator: Separator::from_bits(lead_in >> 3),
            }
        }
    };
    Ok(piece)
}

fn to_char(cp: u32) -> Result<char> {
    char::from_u32(cp).ok_or(Error::InvalidCodePoint(cp))
}
