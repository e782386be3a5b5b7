//! The encoder.
//!
//! [`JbBuilder`] appends units to a growable byte arena. Scalars and references are written
//! directly. Strings and structures don't know their final size up front, so the builder reserves
//! the largest possible header, writes the payload behind it, then writes the real header and
//! shifts the payload left to close the gap.
//!
//! A builder is meant to be reused: [`build_feature`](JbBuilder::build_feature) hands out the
//! finished bytes and clears the arena, keeping its allocation for the next record.

use serde::{Deserialize, Serialize};

use crate::dictionary::{Dictionary, SharedDictionary};
use crate::error::{Error, Result};
use crate::marker::*;
use crate::unicode::{push_code_point, push_ref, Separator};
use crate::value::Value;
use crate::{MAX_DEPTH, MAX_STRING_HEADER, MAX_STRUCT_HEADER};

/// Smallest and largest timestamp a 48-bit signed field can hold.
const TIMESTAMP_MIN: i64 = -(1i64 << 47);
const TIMESTAMP_MAX: i64 = (1i64 << 47) - 1;

/// Tunables of the builder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Runs of word characters shorter than this are never turned into references.
    pub min_word_len: usize,
    /// Try colon-terminated prefixes of a word against the global dictionary.
    pub global_prefixes: bool,
    /// Let a reference swallow one following space, underscore or colon.
    pub absorb_separators: bool,
    /// Initial arena capacity in bytes.
    pub initial_capacity: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            min_word_len: 3,
            global_prefixes: true,
            absorb_separators: true,
            initial_capacity: 1024,
        }
    }
}

/// Word characters for text compression. Digits and punctuation are left out on purpose, so
/// that ids with numeric suffixes don't end up in the dictionary.
fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b':'
}

#[derive(Clone, Debug)]
pub struct JbBuilder {
    buf: Vec<u8>,
    global: Option<SharedDictionary>,
    local: Dictionary<'static>,
    /// Marks of structures started but not yet ended.
    open: Vec<usize>,
    config: BuilderConfig,
}

impl Default for JbBuilder {
    fn default() -> Self {
        Self::with_config(BuilderConfig::default())
    }
}

impl JbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BuilderConfig) -> Self {
        Self {
            buf: Vec::with_capacity(config.initial_capacity),
            global: None,
            local: Dictionary::new(None),
            open: Vec::new(),
            config,
        }
    }

    /// Create a builder that resolves words and keys against a global dictionary first.
    pub fn with_global(global: Option<SharedDictionary>) -> Self {
        let mut builder = Self::new();
        builder.global = global;
        builder
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn global(&self) -> Option<&SharedDictionary> {
        self.global.as_ref()
    }

    /// The local dictionary as built so far.
    pub fn local_dictionary(&self) -> &Dictionary<'static> {
        &self.local
    }

    /// Drop everything written so far, including the local dictionary. Keeps the allocations.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.open.clear();
        self.local.clear();
    }

    /// Clear the builder and switch to another global dictionary.
    pub fn reset(&mut self, global: Option<SharedDictionary>) {
        self.clear();
        self.global = global;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The raw bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Take the raw bytes written so far and clear the builder.
    pub fn take(&mut self) -> Vec<u8> {
        let out = self.buf.clone();
        self.clear();
        out
    }

    /// Intern a string into the local dictionary, returning its index.
    pub fn add_to_local_dictionary(&mut self, s: &str) -> Result<usize> {
        self.local.add(s)
    }

    pub fn encode_null(&mut self) {
        self.buf.push(NULL);
    }

    pub fn encode_undefined(&mut self) {
        self.buf.push(UNDEFINED);
    }

    pub fn encode_bool(&mut self, v: bool) {
        self.buf.push(if v { TRUE } else { FALSE });
    }

    pub fn encode_int(&mut self, v: i32) {
        self.encode_int64(v as i64)
    }

    pub fn encode_int64(&mut self, v: i64) {
        if (TINY_MIN..=TINY_MAX).contains(&v) {
            self.buf.push(Marker::TinyInt(v as i8).into());
        } else if v >= i8::MIN as i64 && v <= i8::MAX as i64 {
            self.buf.push(INT8);
            self.buf.push(v as u8);
        } else if v >= i16::MIN as i64 && v <= i16::MAX as i64 {
            self.buf.push(INT16);
            self.buf.extend_from_slice(&(v as i16).to_le_bytes());
        } else if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
            self.buf.push(INT32);
            self.buf.extend_from_slice(&(v as i32).to_le_bytes());
        } else {
            self.buf.push(INT64);
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn encode_float(&mut self, v: f32) {
        if let Some(tiny) = tiny_float(v as f64) {
            self.buf.push(Marker::TinyFloat(tiny).into());
        } else {
            self.buf.push(FLOAT32);
            self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
    }

    pub fn encode_double(&mut self, v: f64) {
        if let Some(tiny) = tiny_float(v) {
            self.buf.push(Marker::TinyFloat(tiny).into());
        } else if v.is_nan() || (v as f32) as f64 == v {
            self.buf.push(FLOAT32);
            self.buf.extend_from_slice(&(v as f32).to_bits().to_le_bytes());
        } else {
            self.buf.push(FLOAT64);
            self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
    }

    /// Encode milliseconds since the UNIX epoch as a 48-bit signed timestamp.
    pub fn encode_timestamp(&mut self, millis: i64) -> Result<()> {
        if !(TIMESTAMP_MIN..=TIMESTAMP_MAX).contains(&millis) {
            return Err(Error::OutOfRange(format!(
                "timestamp {} doesn't fit into 48 bits",
                millis
            )));
        }
        self.buf.push(TIMESTAMP);
        self.buf.extend_from_slice(&millis.to_le_bytes()[..6]);
        Ok(())
    }

    /// Encode a dictionary reference. A negative index encodes the null reference.
    pub fn encode_ref(&mut self, index: i64, global: bool) -> Result<()> {
        if index < 0 {
            self.buf.push(NULL_REF);
            return Ok(());
        }
        let index = index as u64;
        if index < REF_BIAS as u64 {
            self.buf.push(
                Marker::TinyRef {
                    index: index as u8,
                    global,
                }
                .into(),
            );
            return Ok(());
        }
        let biased = index - REF_BIAS as u64;
        if biased > u32::MAX as u64 {
            return Err(Error::OutOfRange(format!(
                "reference index {} exceeds 32 bits",
                index
            )));
        }
        let marker = match min_width(biased) {
            1 => Marker::Ref8 { global },
            2 => Marker::Ref16 { global },
            _ => Marker::Ref32 { global },
        };
        self.buf.push(marker.into());
        let width = min_width(biased) as usize;
        self.buf.extend_from_slice(&biased.to_le_bytes()[..width]);
        Ok(())
    }

    /// Encode a string as plain code points, without any dictionary references.
    pub fn encode_string(&mut self, s: &str) -> Result<()> {
        let mark = self.reserve(MAX_STRING_HEADER);
        for c in s.chars() {
            push_code_point(&mut self.buf, c as u32)?;
        }
        self.end_string(mark)
    }

    /// Encode UTF-16 code units as a plain string. Unpaired surrogates are rejected and nothing
    /// is written.
    pub fn encode_utf16(&mut self, units: &[u16]) -> Result<()> {
        let mark = self.reserve(MAX_STRING_HEADER);
        for c in char::decode_utf16(units.iter().copied()) {
            match c {
                Ok(c) => push_code_point(&mut self.buf, c as u32)?,
                Err(e) => {
                    self.buf.truncate(mark);
                    return Err(Error::InvalidCodePoint(e.unpaired_surrogate() as u32));
                }
            }
        }
        self.end_string(mark)
    }

    /// Encode a string, replacing runs of word characters by dictionary references. Words are
    /// looked up in the global dictionary, then colon-terminated prefixes of them, and are
    /// otherwise added to the local dictionary.
    pub fn encode_text(&mut self, s: &str) -> Result<()> {
        self.encode_text_with(s, true)
    }

    /// Like [`encode_text`](Self::encode_text), but only references the global dictionary.
    /// Used for structures that don't embed a local dictionary.
    pub(crate) fn encode_text_global_only(&mut self, s: &str) -> Result<()> {
        self.encode_text_with(s, false)
    }

    fn encode_text_with(&mut self, s: &str, allow_local: bool) -> Result<()> {
        let mark = self.reserve(MAX_STRING_HEADER);
        if let Err(e) = self.write_text(s, allow_local) {
            self.buf.truncate(mark);
            return Err(e);
        }
        self.end_string(mark)
    }

    fn write_text(&mut self, s: &str, allow_local: bool) -> Result<()> {
        let bytes = s.as_bytes();
        let min_word_len = self.config.min_word_len.max(1);
        let mut literal_start = 0;
        let mut i = 0;
        while i < bytes.len() {
            if !is_word_byte(bytes[i]) {
                i += 1;
                continue;
            }
            let start = i;
            while i < bytes.len() && is_word_byte(bytes[i]) {
                i += 1;
            }
            if i - start < min_word_len {
                continue;
            }
            self.write_literal(&s[literal_start..start])?;
            let mut word = &s[start..i];
            while !word.is_empty() {
                if word.len() < min_word_len {
                    self.write_literal(word)?;
                    break;
                }
                match self.resolve_word(word, allow_local)? {
                    Some((index, global, consumed)) => {
                        let mut separator = Separator::None;
                        if consumed == word.len() && self.config.absorb_separators {
                            if let Some(sep) = bytes.get(i).and_then(|b| Separator::from_char(*b as char)) {
                                separator = sep;
                                i += 1;
                            }
                        }
                        push_ref(&mut self.buf, index, global, separator);
                        word = &word[consumed..];
                    }
                    None => {
                        self.write_literal(word)?;
                        break;
                    }
                }
            }
            literal_start = i;
        }
        self.write_literal(&s[literal_start..])
    }

    /// Find a reference for (a prefix of) `word`. Returns the index, whether it is global, and
    /// how many bytes of the word it covers.
    fn resolve_word(&mut self, word: &str, allow_local: bool) -> Result<Option<(usize, bool, usize)>> {
        if let Some(global) = self.global.as_ref() {
            if let Some(index) = global.find(word) {
                return Ok(Some((index, true, word.len())));
            }
            if self.config.global_prefixes {
                let bytes = word.as_bytes();
                for end in (0..bytes.len().saturating_sub(1)).rev() {
                    if bytes[end] == b':' {
                        if let Some(index) = global.find(&word[..=end]) {
                            return Ok(Some((index, true, end + 1)));
                        }
                    }
                }
            }
        }
        if allow_local {
            let index = self.local.add(word)?;
            return Ok(Some((index, false, word.len())));
        }
        Ok(None)
    }

    fn write_literal(&mut self, s: &str) -> Result<()> {
        for c in s.chars() {
            push_code_point(&mut self.buf, c as u32)?;
        }
        Ok(())
    }

    /// Start a structure. Returns the mark to hand to [`end_struct`](Self::end_struct) once the
    /// payload is written.
    pub fn start_struct(&mut self) -> usize {
        let mark = self.reserve(MAX_STRUCT_HEADER);
        self.open.push(mark);
        mark
    }

    /// End the structure started at `mark`, writing its minimal header.
    pub fn end_struct(&mut self, mark: usize, kind: StructKind, variant: Option<u32>) -> Result<()> {
        if self.open.last() != Some(&mark) {
            return Err(Error::UnbalancedStruct(format!(
                "{} ended at mark {}, but the innermost open structure is at {:?}",
                kind.name(),
                mark,
                self.open.last()
            )));
        }
        if variant.is_some() && !kind.has_variant() {
            return Err(Error::OutOfRange(format!(
                "{} structures can't carry a variant",
                kind.name()
            )));
        }
        let payload_start = mark + MAX_STRUCT_HEADER;
        let payload_size = (self.buf.len() - payload_start) as u64;
        if payload_size > u32::MAX as u64 {
            return Err(Error::OutOfRange(format!(
                "structure payload of {} bytes exceeds 32 bits",
                payload_size
            )));
        }
        self.open.pop();
        let header = struct_header(kind, payload_size, variant);
        self.close_gap(mark, MAX_STRUCT_HEADER, &header);
        Ok(())
    }

    pub fn start_array(&mut self) -> usize {
        self.start_struct()
    }

    pub fn end_array(&mut self, mark: usize) -> Result<()> {
        self.end_struct(mark, StructKind::Array, None)
    }

    pub fn start_map(&mut self) -> usize {
        self.start_struct()
    }

    pub fn end_map(&mut self, mark: usize) -> Result<()> {
        self.end_struct(mark, StructKind::Map, None)
    }

    /// Write a map key. Keys are always references: into the global dictionary when it has the
    /// key, otherwise into the local dictionary.
    pub fn write_key(&mut self, key: &str) -> Result<()> {
        if let Some(index) = self.global.as_ref().and_then(|g| g.find(key)) {
            return self.encode_ref(index as i64, true);
        }
        let index = self.local.add(key)?;
        self.encode_ref(index as i64, false)
    }

    /// Encode a whole value tree. Strings go through [`encode_text`](Self::encode_text).
    pub fn encode_value(&mut self, value: &Value) -> Result<()> {
        self.encode_value_at(value, 0)
    }

    fn encode_value_at(&mut self, value: &Value, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::ParseLimit("Depth limit exceeded".to_string()));
        }
        match value {
            Value::Null => self.encode_null(),
            Value::Undefined => self.encode_undefined(),
            Value::Bool(v) => self.encode_bool(*v),
            Value::Int(v) => self.encode_int64(*v),
            Value::Float(v) => self.encode_double(*v),
            Value::Timestamp(v) => self.encode_timestamp(*v)?,
            Value::Str(v) => self.encode_text(v)?,
            Value::Array(items) => {
                let mark = self.start_array();
                for item in items {
                    self.encode_value_at(item, depth + 1)?;
                }
                self.end_array(mark)?;
            }
            Value::Map(map) => {
                let mark = self.start_map();
                for (key, item) in map {
                    self.write_key(key)?;
                    self.encode_value_at(item, depth + 1)?;
                }
                self.end_map(mark)?;
            }
        }
        Ok(())
    }

    /// Finish a record. Everything written so far becomes the payload, prefixed by the global
    /// dictionary id, the record id and the local dictionary. The builder is cleared afterwards.
    pub fn build_feature(&mut self, id: Option<&str>, variant: Option<u32>) -> Result<Vec<u8>> {
        if self.buf.is_empty() {
            return Err(Error::EmptyBuffer);
        }
        if !self.open.is_empty() {
            return Err(Error::UnbalancedStruct(format!(
                "{} structures still open",
                self.open.len()
            )));
        }
        let payload_end = self.buf.len();
        let result = self.write_feature_prefix(id);
        if let Err(e) = result {
            self.buf.truncate(payload_end);
            return Err(e);
        }

        let total = self.buf.len() as u64;
        if total > u32::MAX as u64 {
            self.buf.truncate(payload_end);
            return Err(Error::OutOfRange(format!(
                "feature of {} bytes exceeds 32 bits",
                total
            )));
        }
        let header = struct_header(StructKind::Feature, total, variant);
        let mut out = Vec::with_capacity(header.len() + self.buf.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.buf[payload_end..]);
        out.extend_from_slice(&self.buf[..payload_end]);
        tracing::debug!(
            ?id,
            size = out.len(),
            local_strings = self.local.len(),
            "built feature"
        );
        self.clear();
        Ok(out)
    }

    fn write_feature_prefix(&mut self, id: Option<&str>) -> Result<()> {
        let global_id = self.global.as_ref().and_then(|g| g.id().map(String::from));
        match global_id {
            Some(global_id) => self.encode_string(&global_id)?,
            None => self.encode_null(),
        }
        match id {
            Some(id) if self.global.is_some() => self.encode_text(id)?,
            Some(id) => self.encode_string(id)?,
            None => self.encode_null(),
        }
        // The id may have added words, so the dictionary goes last.
        let local = std::mem::replace(&mut self.local, Dictionary::new(None));
        let result = self.write_dictionary(None, local.iter());
        self.local = local;
        result
    }

    /// Serialize the local dictionary as a standalone dictionary, usable as a global dictionary
    /// once persisted. Discards any payload written so far.
    pub fn build_dictionary(&mut self, id: Option<&str>) -> Result<Vec<u8>> {
        let local = std::mem::replace(&mut self.local, Dictionary::new(None));
        self.buf.clear();
        self.open.clear();
        let result = self.write_dictionary(id, local.iter());
        self.local = local;
        result?;
        tracing::debug!(?id, strings = self.local.len(), "built dictionary");
        Ok(self.take())
    }

    pub(crate) fn write_dictionary<'s>(
        &mut self,
        id: Option<&str>,
        strings: impl Iterator<Item = &'s str>,
    ) -> Result<()> {
        let mark = self.start_struct();
        match id {
            Some(id) => self.encode_string(id)?,
            None => self.encode_null(),
        }
        for s in strings {
            self.encode_string(s)?;
        }
        self.end_struct(mark, StructKind::Dictionary, None)
    }

    /// Cut off everything written from `mark` on, leaving earlier units in place.
    pub(crate) fn split_off(&mut self, mark: usize) -> Vec<u8> {
        self.buf.split_off(mark)
    }

    /// Drop a structure started at `mark` together with everything written after it.
    pub(crate) fn abandon(&mut self, mark: usize) {
        self.open.retain(|m| *m < mark);
        self.buf.truncate(mark);
    }

    fn reserve(&mut self, n: usize) -> usize {
        let mark = self.buf.len();
        self.buf.resize(mark + n, 0);
        mark
    }

    fn end_string(&mut self, mark: usize) -> Result<()> {
        let len = self.buf.len() - mark - MAX_STRING_HEADER;
        let mut header = Vec::with_capacity(MAX_STRING_HEADER);
        if len <= STR_FIX_MAX {
            header.push(Marker::FixStr(len as u8).into());
        } else if len <= STR_LEN8_MAX {
            header.push(Marker::Str8.into());
            header.push((len - STR_LEN8 as usize) as u8);
        } else if len <= u16::MAX as usize {
            header.push(Marker::Str16.into());
            header.extend_from_slice(&(len as u16).to_le_bytes());
        } else if len <= u32::MAX as usize {
            header.push(Marker::Str32.into());
            header.extend_from_slice(&(len as u32).to_le_bytes());
        } else {
            self.buf.truncate(mark);
            return Err(Error::OutOfRange(format!(
                "string of {} bytes exceeds 32 bits",
                len
            )));
        }
        self.close_gap(mark, MAX_STRING_HEADER, &header);
        Ok(())
    }

    /// Write `header` at `mark` and move the payload behind the reserved region up against it.
    fn close_gap(&mut self, mark: usize, reserved: usize, header: &[u8]) {
        let payload_start = mark + reserved;
        let new_start = mark + header.len();
        self.buf[mark..new_start].copy_from_slice(header);
        if new_start < payload_start {
            self.buf.copy_within(payload_start.., new_start);
            let gap = payload_start - new_start;
            self.buf.truncate(self.buf.len() - gap);
        }
    }
}

/// The small-float immediate for `v`, if it has one.
fn tiny_float(v: f64) -> Option<i8> {
    let in_range = v >= TINY_MIN as f64 && v <= TINY_MAX as f64;
    if in_range && v.fract() == 0.0 && !(v == 0.0 && v.is_sign_negative()) {
        Some(v as i8)
    } else {
        None
    }
}

/// Build the minimal header for a structure.
fn struct_header(kind: StructKind, payload_size: u64, variant: Option<u32>) -> Vec<u8> {
    let size_width = if payload_size == 0 {
        0
    } else {
        min_width(payload_size)
    };
    let variant_width = match variant {
        Some(v) if kind.has_variant() => min_width(v as u64),
        _ => 0,
    };
    let mut header = vec![0u8; 1 + size_width as usize + variant_width as usize];
    header[0] = Marker::Struct {
        kind,
        size_width,
        variant_width,
    }
    .into_u8();
    write_uint(&mut header, 1, size_width, payload_size);
    write_uint(
        &mut header,
        1 + size_width as usize,
        variant_width,
        variant.unwrap_or(0) as u64,
    );
    header
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_int(v: i64) -> Vec<u8> {
        let mut builder = JbBuilder::new();
        builder.encode_int64(v);
        builder.take()
    }

    fn global(id: &str, words: &[&str]) -> SharedDictionary {
        let mut dict = Dictionary::new(Some(id));
        for w in words {
            dict.add(w).unwrap();
        }
        dict.share().unwrap()
    }

    mod integer {
        use super::*;

        #[test]
        fn tiny_boundary() {
            for v in -16..=15 {
                assert_eq!(encode_int(v).len(), 1, "{} should be tiny", v);
            }
            assert_eq!(encode_int(16), vec![INT8, 16]);
            assert_eq!(encode_int(-17), vec![INT8, 0xef]);
        }

        #[test]
        fn layout() {
            let test_cases: Vec<(i64, Vec<u8>)> = vec![
                (0, vec![0x40]),
                (15, vec![0x4f]),
                (-1, vec![0x5f]),
                (-16, vec![0x50]),
                (127, vec![INT8, 0x7f]),
                (-128, vec![INT8, 0x80]),
                (128, vec![INT16, 0x80, 0x00]),
                (-129, vec![INT16, 0x7f, 0xff]),
                (i16::MAX as i64 + 1, vec![INT32, 0x00, 0x80, 0x00, 0x00]),
                (
                    i32::MIN as i64 - 1,
                    vec![INT64, 0xff, 0xff, 0xff, 0x7f, 0xff, 0xff, 0xff, 0xff],
                ),
            ];
            for (index, case) in test_cases.iter().enumerate() {
                assert_eq!(encode_int(case.0), case.1, "Failed test #{}", index);
            }
        }
    }

    mod float {
        use super::*;

        fn encode_double(v: f64) -> Vec<u8> {
            let mut builder = JbBuilder::new();
            builder.encode_double(v);
            builder.take()
        }

        #[test]
        fn tiny() {
            assert_eq!(encode_double(0.0), vec![0x60]);
            assert_eq!(encode_double(15.0), vec![0x6f]);
            assert_eq!(encode_double(-16.0), vec![0x70]);
            assert_eq!(encode_double(16.0).len(), 5);
            assert_eq!(encode_double(-17.0).len(), 5);
            assert_eq!(encode_double(-0.0).len(), 5, "Negative zero must keep its sign");
        }

        #[test]
        fn smallest_width() {
            assert_eq!(encode_double(0.5)[0], FLOAT32);
            assert_eq!(encode_double(f64::INFINITY)[0], FLOAT32);
            assert_eq!(encode_double(f64::NAN)[0], FLOAT32);
            assert_eq!(encode_double(0.1)[0], FLOAT64);
            assert_eq!(encode_double(0.1).len(), 9);

            let mut builder = JbBuilder::new();
            builder.encode_float(2.5);
            assert_eq!(builder.take(), vec![FLOAT32, 0x00, 0x00, 0x20, 0x40]);
        }
    }

    mod reference {
        use super::*;

        fn encode_ref(index: i64, global: bool) -> Vec<u8> {
            let mut builder = JbBuilder::new();
            builder.encode_ref(index, global).unwrap();
            builder.take()
        }

        #[test]
        fn layout() {
            assert_eq!(encode_ref(0, false), vec![0x00]);
            assert_eq!(encode_ref(15, true), vec![0x1f]);
            assert_eq!(encode_ref(16, false), vec![REF8, 0x00]);
            assert_eq!(encode_ref(271, true), vec![REF8 | REF_GLOBAL_BIT, 0xff]);
            assert_eq!(encode_ref(272, false), vec![REF16, 0x00, 0x01]);
            assert_eq!(encode_ref(65552, false), vec![REF32, 0x00, 0x00, 0x01, 0x00]);
            assert_eq!(encode_ref(-1, true), vec![NULL_REF]);
        }

        #[test]
        fn out_of_range() {
            let mut builder = JbBuilder::new();
            assert!(builder.encode_ref(1 << 40, false).is_err());
            assert!(builder.is_empty());
        }
    }

    mod string {
        use super::*;

        fn header_len(len: usize) -> usize {
            let mut builder = JbBuilder::new();
            builder.encode_string(&"x".repeat(len)).unwrap();
            let bytes = builder.take();
            assert_eq!(bytes.len() - unit_header_size(bytes[0]), len);
            unit_header_size(bytes[0])
        }

        #[test]
        fn length_boundaries() {
            assert_eq!(header_len(0), 1);
            assert_eq!(header_len(60), 1);
            assert_eq!(header_len(61), 2);
            assert_eq!(header_len(315), 2);
            assert_eq!(header_len(316), 3);
            assert_eq!(header_len(65535), 3);
            assert_eq!(header_len(65536), 5);
        }

        #[test]
        fn layout() {
            let mut builder = JbBuilder::new();
            builder.encode_string("abc").unwrap();
            assert_eq!(builder.take(), vec![0x83, b'a', b'b', b'c']);

            builder.encode_string(&"y".repeat(61)).unwrap();
            let bytes = builder.take();
            assert_eq!(&bytes[..3], &[0x80 | 61, 0, b'y']);

            builder.encode_string("ä").unwrap();
            assert_eq!(builder.take(), vec![0x82, 0x80, 0x64]);
        }

        #[test]
        fn unpaired_surrogate() {
            let mut builder = JbBuilder::new();
            builder.encode_null();
            let result = builder.encode_utf16(&[0x0061, 0xD800, 0x0062]);
            assert_eq!(result, Err(Error::InvalidCodePoint(0xD800)));
            assert_eq!(builder.as_bytes(), &[NULL], "Nothing may be left behind");

            let units: Vec<u16> = "a😀".encode_utf16().collect();
            builder.encode_utf16(&units).unwrap();
            assert_eq!(builder.len(), 1 + 1 + 1 + 3);
        }
    }

    mod text {
        use super::*;

        #[test]
        fn urn_prefix() {
            let dict = global("g1", &["urn:here:mom:Topology:"]);
            let mut builder = JbBuilder::with_global(Some(dict));
            let text = "urn:here:mom:Topology:123";
            builder.encode_text(text).unwrap();
            let bytes = builder.take();
            assert_eq!(bytes, vec![0x85, 0b1110_0100, 0x00, b'1', b'2', b'3']);
            assert!(bytes.len() < text.len());
        }

        #[test]
        fn colon_prefix_then_local() {
            let dict = global("g1", &["urn:here:"]);
            let mut builder = JbBuilder::with_global(Some(dict));
            builder.encode_text("urn:here:Building").unwrap();
            // Prefix from the global dictionary, rest of the word interned locally.
            assert_eq!(
                builder.as_bytes(),
                &[0x84, 0b1110_0100, 0x00, 0b1110_0000, 0x00]
            );
            assert_eq!(builder.local_dictionary().get_loaded(0), Some("Building"));
        }

        #[test]
        fn separators_and_short_words() {
            let mut builder = JbBuilder::new();
            builder.encode_text("big red_car of 42").unwrap();
            let local: Vec<&str> = builder.local_dictionary().iter().collect();
            assert_eq!(local, vec!["big", "red", "car"]);
            let expected = vec![
                0x80 | 11,
                0b1110_1000, // big + ' '
                0x00,
                0b1111_0000, // red + '_'
                0x01,
                0b1110_1000, // car + ' '
                0x02,
                b'o',
                b'f',
                b' ',
                b'4',
                b'2',
            ];
            assert_eq!(builder.take(), expected);
        }

        #[test]
        fn repeated_words_share_an_index() {
            let mut builder = JbBuilder::new();
            builder.encode_text("road road road").unwrap();
            assert_eq!(builder.local_dictionary().len(), 1);
        }

        #[test]
        fn global_only_keeps_unknown_words_inline() {
            let mut builder = JbBuilder::new();
            builder.encode_text_global_only("unknown").unwrap();
            assert!(builder.local_dictionary().is_empty());
            assert_eq!(builder.take(), vec![0x87, b'u', b'n', b'k', b'n', b'o', b'w', b'n']);
        }

        #[test]
        fn config_from_json() {
            let config: BuilderConfig = serde_json::from_str(r#"{"min_word_len": 5}"#).unwrap();
            assert_eq!(config.min_word_len, 5);
            assert!(config.global_prefixes);
            let mut builder = JbBuilder::with_config(config);
            builder.encode_text("road").unwrap();
            assert!(builder.local_dictionary().is_empty());
        }
    }

    mod structure {
        use super::*;

        #[test]
        fn empty_array() {
            let mut builder = JbBuilder::new();
            let mark = builder.start_array();
            builder.end_array(mark).unwrap();
            assert_eq!(builder.take(), vec![0b1100_0000]);
        }

        #[test]
        fn header_is_compacted() {
            let mut builder = JbBuilder::new();
            builder.encode_null();
            let mark = builder.start_map();
            builder.write_key("a1").unwrap();
            builder.encode_int(1);
            builder.end_map(mark).unwrap();
            assert_eq!(builder.take(), vec![NULL, 0b1101_0001, 2, 0x00, 0x41]);
        }

        #[test]
        fn variant() {
            let mut builder = JbBuilder::new();
            let mark = builder.start_struct();
            builder.encode_bool(true);
            builder.end_struct(mark, StructKind::Xyz, Some(300)).unwrap();
            assert_eq!(builder.take(), vec![0b1101_1010, 1, 0x2c, 0x01, TRUE]);

            let mark = builder.start_struct();
            assert!(builder.end_struct(mark, StructKind::Map, Some(1)).is_err());
        }

        #[test]
        fn large_payload() {
            let mut builder = JbBuilder::new();
            let mark = builder.start_array();
            for _ in 0..300 {
                builder.encode_null();
            }
            builder.end_array(mark).unwrap();
            let bytes = builder.take();
            assert_eq!(&bytes[..3], &[0b1110_0000, 0x2c, 0x01]);
            assert_eq!(bytes.len(), 303);
        }

        #[test]
        fn unbalanced() {
            let mut builder = JbBuilder::new();
            let outer = builder.start_array();
            let _inner = builder.start_array();
            assert!(matches!(
                builder.end_array(outer),
                Err(Error::UnbalancedStruct(_))
            ));
        }
    }

    mod feature {
        use super::*;

        #[test]
        fn empty_buffer() {
            let mut builder = JbBuilder::new();
            assert_eq!(builder.build_feature(Some("f1"), None), Err(Error::EmptyBuffer));
        }

        #[test]
        fn layout() {
            let mut builder = JbBuilder::new();
            let mark = builder.start_map();
            builder.write_key("key").unwrap();
            builder.encode_bool(false);
            builder.end_map(mark).unwrap();
            let bytes = builder.build_feature(Some("f1"), None).unwrap();
            let expected = vec![
                0b1101_0100, // feature, 1-byte size, no variant
                15,
                NULL,        // no global dictionary
                0x82,        // record id
                b'f',
                b'1',
                0b1101_0010, // local dictionary
                5,
                NULL,
                0x83,
                b'k',
                b'e',
                b'y',
                0b1101_0001, // payload map
                2,
                0x00,
                FALSE,
            ];
            assert_eq!(bytes, expected);
            assert!(builder.is_empty());
            assert!(builder.local_dictionary().is_empty());
        }

        #[test]
        fn timestamp_range() {
            let mut builder = JbBuilder::new();
            assert!(builder.encode_timestamp(1 << 47).is_err());
            assert!(builder.encode_timestamp(-(1 << 47)).is_ok());
            assert_eq!(builder.len(), 7);
        }

        #[test]
        fn dictionary() {
            let mut builder = JbBuilder::new();
            builder.add_to_local_dictionary("alpha").unwrap();
            builder.add_to_local_dictionary("beta").unwrap();
            assert_eq!(builder.add_to_local_dictionary("alpha").unwrap(), 0);
            let bytes = builder.build_dictionary(Some("d")).unwrap();
            let mut dict = Dictionary::from_bytes(&bytes).unwrap();
            assert_eq!(dict.id(), Some("d"));
            assert_eq!(dict.index_of("beta").unwrap(), Some(1));
        }
    }
}
