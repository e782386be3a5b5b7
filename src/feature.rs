//! Records.
//!
//! A feature is the unit of storage: a Feature struct whose payload holds, in this order, the id
//! of the global dictionary used to encode it, the record id, the embedded local dictionary and
//! finally one payload unit, usually a map in GeoJSON shape.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cursor::{JbArray, JbMap};
use crate::dictionary::{Dictionary, SharedDictionary};
use crate::error::{Error, Result};
use crate::manager::DictionaryManager;
use crate::marker::{StructKind, UnitType};
use crate::reader::{read_plain_string, JbReader, LocalDictionary};
use crate::value::Value;
use crate::DEFAULT_FEATURE_TYPE;

/// Paths probed, in order, for the type of a feature.
const FEATURE_TYPE_PATHS: [&[&str]; 3] = [&["properties", "featureType"], &["momType"], &["type"]];

/// A decoded record header with lazy access to the payload.
#[derive(Clone, Debug)]
pub struct JbFeature<'a> {
    buf: &'a [u8],
    variant: Option<u32>,
    global_id: Option<String>,
    id: Option<String>,
    local: LocalDictionary<'a>,
    global: Option<SharedDictionary>,
    root: usize,
    end: usize,
}

impl<'a> JbFeature<'a> {
    /// Map an encoded feature. The global dictionary named by the feature is looked up through
    /// `manager`; only the header, the ids and the local dictionary header are read.
    pub fn map_bytes(buf: &'a [u8], manager: Option<&dyn DictionaryManager>) -> Result<Self> {
        let mut reader = JbReader::new(buf);
        let found = reader.unit_type();
        if found != UnitType::Struct(StructKind::Feature) {
            return Err(Error::UnexpectedType {
                expected: "Feature",
                found,
            });
        }
        let variant = reader.struct_variant()?;
        let end = reader.enter_struct()?;
        reader.set_end(end);

        let global_id = match reader.unit_type() {
            UnitType::Null => None,
            UnitType::String => Some(read_plain_string(&buf[..end], reader.pos())?.0),
            found => {
                return Err(Error::UnexpectedType {
                    expected: "global dictionary id",
                    found,
                })
            }
        };
        reader.next_child(end)?;
        let global = match &global_id {
            Some(id) => Some(
                manager
                    .and_then(|m| m.get_dictionary(id))
                    .ok_or_else(|| Error::UnknownDictionary(id.clone()))?,
            ),
            None => None,
        };

        // The id may reference the local dictionary, which comes after it.
        if !reader.is_readable() {
            return Err(Error::too_short("read record id", 0, 1));
        }
        let id_pos = reader.pos();
        reader.next_child(end)?;
        let (local, root) = Dictionary::embedded(&buf[..end], reader.pos())?;
        if root >= end {
            return Err(Error::BadEncode("Feature has no payload".to_string()));
        }
        let local = Rc::new(RefCell::new(local));

        let mut id_reader = JbReader::with_dictionaries(buf, Some(local.clone()), global.clone());
        id_reader.set_end(end);
        id_reader.set_pos(id_pos);
        let id = match id_reader.unit_type() {
            UnitType::Null => None,
            UnitType::String => Some(id_reader.decode_string()?),
            found => {
                return Err(Error::UnexpectedType {
                    expected: "record id",
                    found,
                })
            }
        };
        tracing::trace!(?id, ?global_id, size = end, "mapped feature");

        Ok(Self {
            buf,
            variant,
            global_id,
            id,
            local,
            global,
            root,
            end,
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn global_dictionary_id(&self) -> Option<&str> {
        self.global_id.as_deref()
    }

    pub fn variant(&self) -> Option<u32> {
        self.variant
    }

    pub fn global_dictionary(&self) -> Option<&SharedDictionary> {
        self.global.as_ref()
    }

    pub fn local_dictionary(&self) -> &LocalDictionary<'a> {
        &self.local
    }

    /// Size of the whole encoded feature.
    pub fn size(&self) -> usize {
        self.end
    }

    /// A reader positioned on the payload unit.
    pub fn root(&self) -> JbReader<'a> {
        let reader =
            JbReader::with_dictionaries(self.buf, Some(self.local.clone()), self.global.clone());
        reader.view(self.root, self.end)
    }

    pub fn root_map(&self) -> Result<JbMap<'a>> {
        JbMap::new(&self.root())
    }

    pub fn root_array(&self) -> Result<JbArray<'a>> {
        JbArray::new(&self.root())
    }

    /// The declared type of the feature: `properties.featureType`, else `momType`, else `type`,
    /// else the default. Only the entries on the way are decoded.
    pub fn feature_type(&self) -> Result<String> {
        let mut map = match self.root_map() {
            Ok(map) => map,
            Err(Error::UnexpectedType { .. }) => return Ok(DEFAULT_FEATURE_TYPE.to_string()),
            Err(e) => return Err(e),
        };
        for path in FEATURE_TYPE_PATHS {
            if let Some(mut reader) = map.select_path(path)? {
                let found = match reader.unit_type() {
                    UnitType::String => Some(reader.decode_string()?),
                    UnitType::Ref => reader.decode_ref_string()?,
                    _ => None,
                };
                if let Some(found) = found {
                    return Ok(found);
                }
            }
        }
        Ok(DEFAULT_FEATURE_TYPE.to_string())
    }

    /// Decode the whole payload.
    pub fn to_value(&self) -> Result<Value> {
        self.root().decode_value()
    }
}
