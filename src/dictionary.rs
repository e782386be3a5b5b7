//! String dictionaries.
//!
//! A dictionary is an append-only list of unique strings, addressed by the index of first
//! insertion. Encoded, it is a Dictionary struct whose payload holds the optional id followed by
//! one string unit per entry:
//!
//! ```text
//! [lead-in][size] [id: string | null] [string 0] [string 1] ...
//! ```
//!
//! Decoding is lazy: strings are only pulled out of the source buffer up to the highest index
//! requested so far. Global dictionaries are loaded completely before they are shared as a
//! [`SharedDictionary`], after which only the `&self` accessors are needed.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::builder::JbBuilder;
use crate::error::{Error, Result};
use crate::marker::{unit_header_size, unit_payload_size, unit_type, StructKind, UnitType};
use crate::reader::read_plain_string;

/// A fully loaded dictionary, shareable between threads and readers. Only built through
/// [`Dictionary::load`] or [`Dictionary::share`], so lookups never miss strings that are still in
/// the source buffer.
#[derive(Clone, Debug)]
pub struct SharedDictionary(Arc<Dictionary<'static>>);

impl SharedDictionary {
    /// True if both point to the same dictionary.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl Deref for SharedDictionary {
    type Target = Dictionary<'static>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Clone, Debug)]
pub struct Dictionary<'a> {
    id: Option<String>,
    source: Cow<'a, [u8]>,
    /// Position of the next string unit not yet pulled from `source`.
    next: usize,
    end: usize,
    strings: Vec<Arc<str>>,
    lookup: HashMap<Arc<str>, usize>,
}

impl Dictionary<'static> {
    /// Create an empty dictionary, ready for [`add`](Self::add).
    pub fn new(id: Option<&str>) -> Self {
        Self {
            id: id.map(String::from),
            source: Cow::Owned(Vec::new()),
            next: 0,
            end: 0,
            strings: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Take ownership of an encoded dictionary. Strings are pulled out lazily.
    pub fn from_vec(bytes: Vec<u8>) -> Result<Self> {
        let (id, next, end) = parse_header(&bytes)?;
        Ok(Self {
            id,
            source: Cow::Owned(bytes),
            next,
            end,
            strings: Vec::new(),
            lookup: HashMap::new(),
        })
    }

    /// Decode an encoded dictionary completely and wrap it up for sharing.
    pub fn load(bytes: Vec<u8>) -> Result<SharedDictionary> {
        Self::from_vec(bytes)?.share()
    }
}

impl<'a> Dictionary<'a> {
    /// Map an encoded dictionary without copying it. Strings are pulled out lazily.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        let (id, next, end) = parse_header(bytes)?;
        Ok(Self {
            id,
            source: Cow::Borrowed(bytes),
            next,
            end,
            strings: Vec::new(),
            lookup: HashMap::new(),
        })
    }

    /// Map the dictionary struct found at `start` of a larger buffer, such as the local
    /// dictionary embedded in a feature. Returns the dictionary and the position right after it.
    pub(crate) fn embedded(buf: &'a [u8], start: usize) -> Result<(Self, usize)> {
        let lead_in = *buf
            .get(start)
            .ok_or_else(|| Error::too_short("read embedded dictionary", 0, 1))?;
        let size = unit_header_size(lead_in) + unit_payload_size(buf, start)?;
        if start + size > buf.len() {
            return Err(Error::too_short(
                "get embedded dictionary",
                buf.len() - start,
                size,
            ));
        }
        let dict = Self::from_bytes(&buf[start..start + size])?;
        Ok((dict, start + size))
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// True once every string of the source has been pulled in.
    pub fn is_loaded(&self) -> bool {
        self.next >= self.end
    }

    /// Number of strings pulled in so far. Equals the dictionary size after
    /// [`load_all`](Self::load_all).
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.is_loaded()
    }

    /// Pull strings from the source until `index` is available. Returns false if the dictionary
    /// is shorter than that.
    pub fn ensure(&mut self, index: usize) -> Result<bool> {
        while self.strings.len() <= index {
            if !self.pull()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Pull every remaining string from the source.
    pub fn load_all(&mut self) -> Result<()> {
        while self.pull()? {}
        Ok(())
    }

    /// Get the string at `index`, loading it if needed.
    pub fn get(&mut self, index: usize) -> Result<Option<&str>> {
        if !self.ensure(index)? {
            return Ok(None);
        }
        Ok(self.strings.get(index).map(|s| s.as_ref()))
    }

    /// Get the string at `index` without loading anything.
    pub fn get_loaded(&self, index: usize) -> Option<&str> {
        self.strings.get(index).map(|s| s.as_ref())
    }

    /// Find the index of a string. This has to load the whole dictionary, as the position of the
    /// string is unknown.
    pub fn index_of(&mut self, s: &str) -> Result<Option<usize>> {
        self.load_all()?;
        Ok(self.lookup.get(s).copied())
    }

    /// Find the index of a string among the loaded ones.
    pub fn find(&self, s: &str) -> Option<usize> {
        self.lookup.get(s).copied()
    }

    /// Add a string, returning its index. Adding an existing string returns the existing index.
    pub fn add(&mut self, s: &str) -> Result<usize> {
        self.load_all()?;
        if let Some(index) = self.lookup.get(s) {
            return Ok(*index);
        }
        Ok(self.push(Arc::from(s)))
    }

    /// Forget all strings. Only meant for source-less dictionaries being built up.
    pub(crate) fn clear(&mut self) {
        self.source = Cow::Owned(Vec::new());
        self.next = 0;
        self.end = 0;
        self.strings.clear();
        self.lookup.clear();
    }

    /// Iterate over the loaded strings in index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(|s| s.as_ref())
    }

    /// Encode this dictionary, for persisting it as a global dictionary.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.load_all()?;
        let mut builder = JbBuilder::new();
        builder.write_dictionary(self.id(), self.iter())?;
        Ok(builder.take())
    }

    /// Load every remaining string and wrap the dictionary up for sharing.
    pub fn share(mut self) -> Result<SharedDictionary> {
        self.load_all()?;
        tracing::debug!(id = ?self.id, len = self.strings.len(), "loaded dictionary");
        Ok(SharedDictionary(Arc::new(self.into_owned())))
    }

    /// Turn into an owned dictionary, copying the source bytes if they were borrowed.
    pub fn into_owned(self) -> Dictionary<'static> {
        Dictionary {
            id: self.id,
            source: Cow::Owned(self.source.into_owned()),
            next: self.next,
            end: self.end,
            strings: self.strings,
            lookup: self.lookup,
        }
    }

    fn push(&mut self, s: Arc<str>) -> usize {
        let index = self.strings.len();
        // Duplicates in a foreign dictionary keep their first index.
        self.lookup.entry(s.clone()).or_insert(index);
        self.strings.push(s);
        index
    }

    fn pull(&mut self) -> Result<bool> {
        if self.next >= self.end {
            return Ok(false);
        }
        let (s, next) = read_plain_string(&self.source[..self.end], self.next)?;
        self.next = next;
        let index = self.push(Arc::from(s));
        tracing::trace!(index, "pulled dictionary string");
        Ok(true)
    }
}

/// Parse the dictionary header, returning the id and the payload range left for strings.
fn parse_header(buf: &[u8]) -> Result<(Option<String>, usize, usize)> {
    let lead_in = *buf
        .first()
        .ok_or_else(|| Error::too_short("read dictionary lead-in", 0, 1))?;
    let found = unit_type(lead_in);
    if found != UnitType::Struct(StructKind::Dictionary) {
        return Err(Error::UnexpectedType {
            expected: "Dictionary",
            found,
        });
    }
    let start = unit_header_size(lead_in);
    let end = start + unit_payload_size(buf, 0)?;
    if end > buf.len() {
        return Err(Error::too_short("get dictionary payload", buf.len(), end));
    }
    if start >= end {
        return Ok((None, end, end));
    }
    let id_type = unit_type(buf[start]);
    match id_type {
        UnitType::Null => Ok((None, start + 1, end)),
        UnitType::String => {
            let (id, next) = read_plain_string(&buf[..end], start)?;
            Ok((Some(id), next, end))
        }
        found => Err(Error::UnexpectedType {
            expected: "dictionary id",
            found,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoded(id: Option<&str>, words: &[&str]) -> Vec<u8> {
        let mut dict = Dictionary::new(id);
        for w in words {
            dict.add(w).unwrap();
        }
        dict.to_bytes().unwrap()
    }

    #[test]
    fn stable_indexes() {
        let mut dict = Dictionary::new(None);
        let a = dict.add("alpha").unwrap();
        let b = dict.add("beta").unwrap();
        assert_eq!(dict.add("alpha").unwrap(), a);
        assert_eq!(dict.add("beta").unwrap(), b);
        assert_eq!((a, b), (0, 1));
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn roundtrip() {
        let words = ["urn:here:mom:Topology:", "properties", "featureType", "höhe", "🌍"];
        let bytes = encoded(Some("global-1"), &words);
        let mut dict = Dictionary::from_bytes(&bytes).unwrap();
        assert_eq!(dict.id(), Some("global-1"));
        dict.load_all().unwrap();
        assert_eq!(dict.len(), words.len());
        for (i, w) in words.iter().enumerate() {
            assert_eq!(dict.index_of(w).unwrap(), Some(i));
            assert_eq!(dict.get_loaded(i), Some(*w));
        }
        assert_eq!(dict.index_of("absent").unwrap(), None);
    }

    #[test]
    fn lazy_growth() {
        let words = ["one", "two", "three", "four", "five", "six"];
        let bytes = encoded(None, &words);
        let mut dict = Dictionary::from_bytes(&bytes).unwrap();
        assert_eq!(dict.id(), None);
        assert_eq!(dict.get(1).unwrap(), Some("two"));
        assert_eq!(dict.len(), 2, "Only the first two strings should be pulled in");
        assert!(!dict.is_loaded());
        assert_eq!(dict.get(10).unwrap(), None);
        assert!(dict.is_loaded());
        assert_eq!(dict.len(), 6);
    }

    #[test]
    fn index_of_forces_load() {
        let bytes = encoded(None, &["a1", "b2", "c3"]);
        let mut dict = Dictionary::from_bytes(&bytes).unwrap();
        assert_eq!(dict.index_of("c3").unwrap(), Some(2));
        assert!(dict.is_loaded());
    }

    #[test]
    fn shared() {
        let bytes = encoded(Some("shared"), &["x", "y"]);
        let dict = Dictionary::load(bytes).unwrap();
        let clone = dict.clone();
        let handle = std::thread::spawn(move || clone.find("y"));
        assert_eq!(handle.join().unwrap(), Some(1));
        assert_eq!(dict.get_loaded(0), Some("x"));
    }

    #[test]
    fn share_loads_everything() {
        let words = ["alpha", "beta", "gamma", "delta"];
        let mut dict = Dictionary::from_vec(encoded(Some("lazy"), &words)).unwrap();
        assert_eq!(dict.get(0).unwrap(), Some("alpha"));
        assert!(!dict.is_loaded());
        let shared = dict.share().unwrap();
        assert!(shared.is_loaded());
        assert_eq!(shared.len(), words.len());
        assert_eq!(shared.find("delta"), Some(3));
        assert_eq!(shared.get_loaded(2), Some("gamma"));

        let bytes = encoded(None, &words);
        let borrowed = Dictionary::from_bytes(&bytes).unwrap().share().unwrap();
        assert_eq!(borrowed.find("gamma"), Some(2));
    }

    #[test]
    fn empty() {
        let bytes = encoded(None, &[]);
        let mut dict = Dictionary::from_bytes(&bytes).unwrap();
        dict.load_all().unwrap();
        assert!(dict.is_empty());
    }

    #[test]
    fn not_a_dictionary() {
        let result = Dictionary::from_bytes(&[0x29]);
        assert!(matches!(result, Err(Error::UnexpectedType { .. })));
        assert!(Dictionary::from_bytes(&[]).is_err());
    }

    #[test]
    fn truncated() {
        let mut bytes = encoded(None, &["alpha", "beta"]);
        bytes.truncate(bytes.len() - 2);
        assert!(Dictionary::from_bytes(&bytes).is_err());
    }
}
