//! Fixed-field Xyz structures.
//!
//! These are small structures stored next to features: the namespace metadata of a feature
//! version, a write operation, and a tag list. Each is an Xyz struct whose variant says which
//! one it is, and whose payload is a fixed sequence of fields. Fields are decoded on first access
//! only, by skipping over the fields in front of them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::builder::JbBuilder;
use crate::error::{Error, Result};
use crate::manager::DictionaryManager;
use crate::marker::{StructKind, UnitType};
use crate::reader::{read_plain_string, JbReader};
use crate::value::Value;

pub const XYZ_NAMESPACE: u32 = 0;
pub const XYZ_OPS: u32 = 1;
pub const XYZ_TAGS: u32 = 2;

const NS_FIELDS: usize = 11;
const OP_FIELDS: usize = 4;

/// What a transaction did to a feature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum XyzAction {
    #[default]
    Create,
    Update,
    Delete,
}

impl XyzAction {
    pub fn code(&self) -> i64 {
        match self {
            XyzAction::Create => 0,
            XyzAction::Update => 1,
            XyzAction::Delete => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<XyzAction> {
        match code {
            0 => Some(XyzAction::Create),
            1 => Some(XyzAction::Update),
            2 => Some(XyzAction::Delete),
            _ => None,
        }
    }
}

/// The kind of a write operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum XyzOpCode {
    #[default]
    Create,
    Update,
    Upsert,
    Delete,
    Purge,
    Restore,
}

impl XyzOpCode {
    pub fn code(&self) -> i64 {
        match self {
            XyzOpCode::Create => 0,
            XyzOpCode::Update => 1,
            XyzOpCode::Upsert => 2,
            XyzOpCode::Delete => 3,
            XyzOpCode::Purge => 4,
            XyzOpCode::Restore => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<XyzOpCode> {
        match code {
            0 => Some(XyzOpCode::Create),
            1 => Some(XyzOpCode::Update),
            2 => Some(XyzOpCode::Upsert),
            3 => Some(XyzOpCode::Delete),
            4 => Some(XyzOpCode::Purge),
            5 => Some(XyzOpCode::Restore),
            _ => None,
        }
    }
}

/// Namespace metadata of one feature version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct XyzNamespace {
    /// Milliseconds since the epoch, like the other timestamps.
    pub created_at: i64,
    pub updated_at: i64,
    pub author_ts: i64,
    pub txn: i64,
    pub action: XyzAction,
    pub version: i64,
    /// Uuid of the previous version.
    pub puuid: Option<String>,
    pub uuid: Option<String>,
    pub app_id: String,
    pub author: Option<String>,
    pub grid: String,
}

/// A write operation on one feature.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct XyzOp {
    pub op: XyzOpCode,
    pub id: String,
    /// Uuid the feature must have for the operation to apply.
    pub uuid: Option<String>,
    pub grid: Option<String>,
}

impl JbBuilder {
    /// Encode namespace metadata. Units written before are left in place.
    pub fn build_xyz_ns(&mut self, ns: &XyzNamespace) -> Result<Vec<u8>> {
        let mark = self.start_struct();
        let result = self.write_xyz_ns(ns);
        self.finish_xyz(mark, XYZ_NAMESPACE, result)
    }

    fn write_xyz_ns(&mut self, ns: &XyzNamespace) -> Result<()> {
        self.encode_timestamp(ns.created_at)?;
        self.encode_timestamp(ns.updated_at)?;
        self.encode_timestamp(ns.author_ts)?;
        self.encode_int64(ns.txn);
        self.encode_int64(ns.action.code());
        self.encode_int64(ns.version);
        self.encode_opt_string(ns.puuid.as_deref())?;
        self.encode_opt_string(ns.uuid.as_deref())?;
        self.encode_string(&ns.app_id)?;
        self.encode_opt_string(ns.author.as_deref())?;
        self.encode_string(&ns.grid)
    }

    /// Encode a write operation. Units written before are left in place.
    pub fn build_xyz_op(&mut self, op: &XyzOp) -> Result<Vec<u8>> {
        let mark = self.start_struct();
        let result = self.write_xyz_op(op);
        self.finish_xyz(mark, XYZ_OPS, result)
    }

    fn write_xyz_op(&mut self, op: &XyzOp) -> Result<()> {
        self.encode_int64(op.op.code());
        self.encode_string(&op.id)?;
        self.encode_opt_string(op.uuid.as_deref())?;
        self.encode_opt_string(op.grid.as_deref())
    }

    /// Encode a tag list. Tags are compressed against the global dictionary only, as there is no
    /// local dictionary to go with them.
    pub fn build_tags<S: AsRef<str>>(&mut self, tags: &[S]) -> Result<Vec<u8>> {
        let mark = self.start_struct();
        let result = self.write_tags(tags);
        self.finish_xyz(mark, XYZ_TAGS, result)
    }

    fn write_tags<S: AsRef<str>>(&mut self, tags: &[S]) -> Result<()> {
        let global_id = self.global().and_then(|g| g.id().map(String::from));
        match &global_id {
            Some(id) => self.encode_string(id)?,
            None => self.encode_null(),
        }
        for tag in tags {
            // Without an id the global dictionary can't be found again when decoding.
            if global_id.is_some() {
                self.encode_text_global_only(tag.as_ref())?;
            } else {
                self.encode_string(tag.as_ref())?;
            }
        }
        Ok(())
    }

    fn encode_opt_string(&mut self, s: Option<&str>) -> Result<()> {
        match s {
            Some(s) => self.encode_string(s),
            None => {
                self.encode_null();
                Ok(())
            }
        }
    }

    fn finish_xyz(&mut self, mark: usize, variant: u32, written: Result<()>) -> Result<Vec<u8>> {
        match written.and_then(|_| self.end_struct(mark, StructKind::Xyz, Some(variant))) {
            Ok(()) => Ok(self.split_off(mark)),
            Err(e) => {
                self.abandon(mark);
                Err(e)
            }
        }
    }
}

/// Reads the fields of an Xyz struct by index, seeking forward from the last field visited.
#[derive(Clone, Debug)]
struct FieldReader<'a> {
    reader: JbReader<'a>,
    start: usize,
    end: usize,
    /// Index and position of the field last sought.
    index: usize,
    field_pos: usize,
}

impl<'a> FieldReader<'a> {
    fn open(buf: &'a [u8], variant: u32) -> Result<Self> {
        let mut reader = JbReader::new(buf);
        let found = reader.unit_type();
        if found != UnitType::Struct(StructKind::Xyz) {
            return Err(Error::UnexpectedType {
                expected: "Xyz",
                found,
            });
        }
        let found_variant = reader.struct_variant()?.unwrap_or(XYZ_NAMESPACE);
        if found_variant != variant {
            return Err(Error::BadEncode(format!(
                "Expected Xyz variant {}, found {}",
                variant, found_variant
            )));
        }
        let end = reader.enter_struct()?;
        reader.set_end(end);
        Ok(Self {
            start: reader.pos(),
            field_pos: reader.pos(),
            reader,
            end,
            index: 0,
        })
    }

    fn seek(&mut self, n: usize) -> Result<&mut JbReader<'a>> {
        if n < self.index {
            self.reader.set_pos(self.start);
            self.index = 0;
        } else {
            // Pick up where the last seek ended; decoders may have moved the reader.
            self.reader.set_pos(self.field_pos);
        }
        while self.index < n {
            self.reader.next_child(self.end)?;
            self.index += 1;
        }
        self.field_pos = self.reader.pos();
        if !self.reader.is_readable() {
            return Err(Error::too_short("seek Xyz field", 0, 1));
        }
        Ok(&mut self.reader)
    }
}

fn wrong_field(name: &str) -> Error {
    Error::BadEncode(format!("Xyz field {} has an unexpected type", name))
}

/// Decode a field that is a string or null.
fn opt_string(reader: &mut JbReader<'_>, name: &str) -> Result<Option<String>> {
    match reader.unit_type() {
        UnitType::Null => Ok(None),
        UnitType::String => reader.decode_string().map(Some),
        _ => Err(wrong_field(name)),
    }
}

fn int(reader: &mut JbReader<'_>, name: &str) -> Result<i64> {
    if reader.unit_type() != UnitType::Int {
        return Err(wrong_field(name));
    }
    reader.decode_i64(0)
}

fn timestamp(reader: &mut JbReader<'_>, name: &str) -> Result<i64> {
    if reader.unit_type() != UnitType::Timestamp {
        return Err(wrong_field(name));
    }
    reader.decode_timestamp(0)
}

/// Lazy reader for namespace metadata.
#[derive(Clone, Debug)]
pub struct JbXyzNs<'a> {
    fields: FieldReader<'a>,
    cache: [Option<Value>; NS_FIELDS],
}

impl<'a> JbXyzNs<'a> {
    pub fn map_bytes(buf: &'a [u8]) -> Result<Self> {
        Ok(Self {
            fields: FieldReader::open(buf, XYZ_NAMESPACE)?,
            cache: Default::default(),
        })
    }

    fn field(
        &mut self,
        n: usize,
        name: &str,
        decode: impl FnOnce(&mut JbReader<'a>, &str) -> Result<Value>,
    ) -> Result<&Value> {
        let value = match self.cache[n].take() {
            Some(value) => value,
            None => decode(self.fields.seek(n)?, name)?,
        };
        Ok(self.cache[n].insert(value))
    }

    fn timestamp_field(&mut self, n: usize, name: &str) -> Result<i64> {
        let value = self.field(n, name, |r, name| timestamp(r, name).map(Value::Timestamp))?;
        value.as_timestamp().ok_or_else(|| wrong_field(name))
    }

    fn int_field(&mut self, n: usize, name: &str) -> Result<i64> {
        let value = self.field(n, name, |r, name| int(r, name).map(Value::Int))?;
        value.as_i64().ok_or_else(|| wrong_field(name))
    }

    fn opt_string_field(&mut self, n: usize, name: &str) -> Result<Option<String>> {
        let value = self.field(n, name, |r, name| {
            Ok(opt_string(r, name)?.map(Value::Str).unwrap_or(Value::Null))
        })?;
        Ok(value.as_str().map(String::from))
    }

    fn string_field(&mut self, n: usize, name: &str) -> Result<String> {
        self.opt_string_field(n, name)?
            .ok_or_else(|| wrong_field(name))
    }

    pub fn created_at(&mut self) -> Result<i64> {
        self.timestamp_field(0, "created_at")
    }

    pub fn updated_at(&mut self) -> Result<i64> {
        self.timestamp_field(1, "updated_at")
    }

    pub fn author_ts(&mut self) -> Result<i64> {
        self.timestamp_field(2, "author_ts")
    }

    pub fn txn(&mut self) -> Result<i64> {
        self.int_field(3, "txn")
    }

    pub fn action(&mut self) -> Result<XyzAction> {
        let code = self.int_field(4, "action")?;
        XyzAction::from_code(code).ok_or_else(|| wrong_field("action"))
    }

    pub fn version(&mut self) -> Result<i64> {
        self.int_field(5, "version")
    }

    pub fn puuid(&mut self) -> Result<Option<String>> {
        self.opt_string_field(6, "puuid")
    }

    pub fn uuid(&mut self) -> Result<Option<String>> {
        self.opt_string_field(7, "uuid")
    }

    pub fn app_id(&mut self) -> Result<String> {
        self.string_field(8, "app_id")
    }

    pub fn author(&mut self) -> Result<Option<String>> {
        self.opt_string_field(9, "author")
    }

    pub fn grid(&mut self) -> Result<String> {
        self.string_field(10, "grid")
    }

    /// Decode every field.
    pub fn to_namespace(&mut self) -> Result<XyzNamespace> {
        Ok(XyzNamespace {
            created_at: self.created_at()?,
            updated_at: self.updated_at()?,
            author_ts: self.author_ts()?,
            txn: self.txn()?,
            action: self.action()?,
            version: self.version()?,
            puuid: self.puuid()?,
            uuid: self.uuid()?,
            app_id: self.app_id()?,
            author: self.author()?,
            grid: self.grid()?,
        })
    }
}

/// Lazy reader for a write operation.
#[derive(Clone, Debug)]
pub struct JbXyzOp<'a> {
    fields: FieldReader<'a>,
    cache: [Option<Value>; OP_FIELDS],
}

impl<'a> JbXyzOp<'a> {
    pub fn map_bytes(buf: &'a [u8]) -> Result<Self> {
        Ok(Self {
            fields: FieldReader::open(buf, XYZ_OPS)?,
            cache: Default::default(),
        })
    }

    fn opt_string_field(&mut self, n: usize, name: &str) -> Result<Option<String>> {
        if self.cache[n].is_none() {
            let value = opt_string(self.fields.seek(n)?, name)?;
            self.cache[n] = Some(value.map(Value::Str).unwrap_or(Value::Null));
        }
        Ok(self.cache[n].as_ref().and_then(Value::as_str).map(String::from))
    }

    pub fn op(&mut self) -> Result<XyzOpCode> {
        if self.cache[0].is_none() {
            self.cache[0] = Some(Value::Int(int(self.fields.seek(0)?, "op")?));
        }
        self.cache[0]
            .as_ref()
            .and_then(Value::as_i64)
            .and_then(XyzOpCode::from_code)
            .ok_or_else(|| wrong_field("op"))
    }

    pub fn id(&mut self) -> Result<String> {
        self.opt_string_field(1, "id")?.ok_or_else(|| wrong_field("id"))
    }

    pub fn uuid(&mut self) -> Result<Option<String>> {
        self.opt_string_field(2, "uuid")
    }

    pub fn grid(&mut self) -> Result<Option<String>> {
        self.opt_string_field(3, "grid")
    }

    pub fn to_op(&mut self) -> Result<XyzOp> {
        Ok(XyzOp {
            op: self.op()?,
            id: self.id()?,
            uuid: self.uuid()?,
            grid: self.grid()?,
        })
    }
}

/// Reader for a tag list.
#[derive(Clone, Debug)]
pub struct JbXyzTags<'a> {
    fields: FieldReader<'a>,
    global_id: Option<String>,
}

impl<'a> JbXyzTags<'a> {
    /// Map an encoded tag list, looking up its global dictionary through `manager`.
    pub fn map_bytes(buf: &'a [u8], manager: Option<&dyn DictionaryManager>) -> Result<Self> {
        let mut fields = FieldReader::open(buf, XYZ_TAGS)?;
        let reader = fields.seek(0)?;
        let global_id = match reader.unit_type() {
            UnitType::Null => None,
            UnitType::String => Some(read_plain_string(&buf[..reader.end()], reader.pos())?.0),
            _ => return Err(wrong_field("global dictionary id")),
        };
        if let Some(id) = &global_id {
            let global = manager
                .and_then(|m| m.get_dictionary(id))
                .ok_or_else(|| Error::UnknownDictionary(id.clone()))?;
            fields.reader.set_global_dictionary(Some(global));
        }
        Ok(Self { fields, global_id })
    }

    pub fn global_dictionary_id(&self) -> Option<&str> {
        self.global_id.as_deref()
    }

    /// Decode all tags, in order.
    pub fn tags(&mut self) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        let reader = self.fields.seek(0)?;
        while reader.next_unit()? {
            tags.push(reader.decode_string()?);
        }
        // The reader was moved outside of seek.
        self.fields.index = 0;
        self.fields.field_pos = self.fields.start;
        Ok(tags)
    }

    /// Decode the tags as a map. A tag `key=value` maps the key onto the value, parsed as a
    /// boolean or number where possible. A tag without `=` maps onto `true`.
    pub fn tag_map(&mut self) -> Result<BTreeMap<String, Value>> {
        Ok(self
            .tags()?
            .into_iter()
            .map(|tag| match tag.split_once('=') {
                Some((key, value)) => (key.to_string(), parse_tag_value(value)),
                None => (tag, Value::Bool(true)),
            })
            .collect())
    }
}

fn parse_tag_value(value: &str) -> Value {
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(v) = value.parse::<i64>() {
                Value::Int(v)
            } else if let Ok(v) = value.parse::<f64>() {
                Value::Float(v)
            } else {
                Value::from(value)
            }
        }
    }
}
