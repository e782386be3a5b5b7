//! jbon is a compact, self-describing binary encoding for geospatial features. It is meant for
//! storing features, tags and namespace metadata as byte columns of a database, where most
//! reads only want to look at a few fields of a record.
//!
//! To that end it provides:
//!
//! - A self-describing format. Every unit starts with a lead-in byte that gives its type and
//!   size, so any unit can be skipped without decoding it.
//! - Small encodings for common values. Small integers, floats and dictionary references fit
//!   into the lead-in byte itself.
//! - Dictionary compression of strings. Map keys and the words of strings are replaced by
//!   references into either a global dictionary, shared by many records, or a local dictionary
//!   embedded in each record.
//! - Lazy decoding. A [`JbFeature`] only reads its header when mapped, and the cursors built on
//!   [`EntryArray`] decode entries only when they are visited.
//!
//! # Example
//!
//! ```
//! use jbon::{EntryArray, JbBuilder, JbFeature};
//!
//! let mut builder = JbBuilder::new();
//! let root = builder.start_map();
//! builder.write_key("name").unwrap();
//! builder.encode_text("Main street").unwrap();
//! builder.write_key("lanes").unwrap();
//! builder.encode_int(2);
//! builder.end_map(root).unwrap();
//! let bytes = builder.build_feature(Some("road-1"), None).unwrap();
//!
//! let feature = JbFeature::map_bytes(&bytes, None).unwrap();
//! assert_eq!(feature.id(), Some("road-1"));
//! let mut map = feature.root_map().unwrap();
//! assert!(map.select_key("lanes").unwrap());
//! assert_eq!(map.value().unwrap().as_i64(), Some(2));
//! ```
//!
//! The byte layout is described in the [`format`] module.

mod builder;
mod cursor;
mod dictionary;
mod error;
mod feature;
mod manager;
mod marker;
mod reader;
mod unicode;
mod value;
mod xyz;

pub mod format;

pub use self::builder::{BuilderConfig, JbBuilder};
pub use self::cursor::{EntryArray, EntryState, JbArray, JbMap};
pub use self::dictionary::{Dictionary, SharedDictionary};
pub use self::error::{Error, Result};
pub use self::feature::JbFeature;
pub use self::manager::{DictionaryManager, InMemoryDictionaryManager};
pub use self::marker::{
    unit_header_size, unit_payload_size, unit_size, unit_type, StructKind, UnitType, UNDEFINED,
};
pub use self::reader::{JbReader, LocalDictionary, Reference};
pub use self::unicode::Separator;
pub use self::value::Value;
pub use self::xyz::{
    JbXyzNs, JbXyzOp, JbXyzTags, XyzAction, XyzNamespace, XyzOp, XyzOpCode, XYZ_NAMESPACE,
    XYZ_OPS, XYZ_TAGS,
};

/// The maximum nesting depth of structures when decoding or encoding whole values.
pub const MAX_DEPTH: usize = 100;
/// Largest possible structure header: lead-in, 4-byte size and 4-byte variant.
pub const MAX_STRUCT_HEADER: usize = 9;
/// Largest possible string header: lead-in and 4-byte length.
pub const MAX_STRING_HEADER: usize = 5;
/// Type reported for features that don't declare one.
pub const DEFAULT_FEATURE_TYPE: &str = "Feature";
