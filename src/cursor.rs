//! Cursors over the entries of a structure.
//!
//! An [`EntryArray`] walks the children of one structure, an entry at a time. An entry is one
//! unit for arrays and a key/value pair for maps. Nothing past the current entry is decoded, and
//! the current entry only as far as the caller asks.
//!
//! Implementations provide the hooks ([`parse_header`](EntryArray::parse_header),
//! [`next_entry`](EntryArray::next_entry), [`load_entry`](EntryArray::load_entry),
//! [`drop_entry`](EntryArray::drop_entry)) and get the navigation methods for free.

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::marker::{StructKind, UnitType};
use crate::reader::{JbReader, Memo};
use crate::value::Value;

/// Navigation state shared by all entry arrays.
#[derive(Clone, Debug, Default)]
pub struct EntryState {
    /// Position of the first entry.
    start: usize,
    /// End of the structure payload.
    end: usize,
    /// Position of the current entry.
    pos: usize,
    index: usize,
    valid: bool,
    count: Option<usize>,
}

impl EntryState {
    /// State for the structure at the cursor of `reader`. The reader is narrowed to the
    /// structure.
    pub fn open(reader: &mut JbReader<'_>, expected: StructKind) -> Result<Self> {
        let found = reader.unit_type();
        if found != UnitType::Struct(expected) {
            return Err(Error::UnexpectedType {
                expected: expected.name(),
                found,
            });
        }
        let end = reader.enter_struct()?;
        reader.set_end(end);
        Ok(Self {
            start: reader.pos(),
            end,
            pos: reader.pos(),
            index: 0,
            valid: false,
            count: None,
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Position of the current entry.
    pub fn pos(&self) -> usize {
        self.pos
    }
}

pub trait EntryArray<'a> {
    /// Number of units making up one entry.
    const UNITS_PER_ENTRY: usize;

    fn reader(&mut self) -> &mut JbReader<'a>;
    fn state(&self) -> &EntryState;
    fn state_mut(&mut self) -> &mut EntryState;

    /// Check the structure at the reader and set up the state.
    fn parse_header(&mut self) -> Result<()>;

    /// Move the state onto the entry after the current one. Returns false if there is none.
    fn next_entry(&mut self) -> Result<bool> {
        let EntryState { pos, end, .. } = *self.state();
        let reader = self.reader();
        reader.set_pos(pos);
        for _ in 0..Self::UNITS_PER_ENTRY {
            reader.next_child(end)?;
        }
        let next = reader.pos();
        if next >= end {
            return Ok(false);
        }
        self.state_mut().pos = next;
        Ok(true)
    }

    /// Called once the cursor arrived on an entry.
    fn load_entry(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called before the cursor leaves the current entry.
    fn drop_entry(&mut self) {}

    /// Move onto the first entry. Returns false for an empty structure.
    fn first(&mut self) -> Result<bool> {
        self.drop_entry();
        let state = self.state_mut();
        state.pos = state.start;
        state.index = 0;
        state.valid = state.start < state.end;
        if state.valid {
            self.load_entry()?;
        }
        Ok(self.ok())
    }

    /// Move onto the next entry. Returns false, leaving the cursor invalid, past the last one.
    fn next(&mut self) -> Result<bool> {
        if !self.ok() {
            return Ok(false);
        }
        self.drop_entry();
        if !self.next_entry()? {
            self.state_mut().valid = false;
            return Ok(false);
        }
        self.state_mut().index += 1;
        self.load_entry()?;
        Ok(true)
    }

    /// True while the cursor is on an entry.
    fn ok(&self) -> bool {
        self.state().valid
    }

    /// Index of the current entry.
    fn index(&self) -> Option<usize> {
        if self.ok() {
            Some(self.state().index)
        } else {
            None
        }
    }

    /// Put the cursor back in front of the first entry.
    fn reset(&mut self) {
        self.drop_entry();
        let state = self.state_mut();
        state.pos = state.start;
        state.index = 0;
        state.valid = false;
    }

    /// Number of entries. Walks the structure once, without loading any entry.
    fn count(&mut self) -> Result<usize> {
        if let Some(count) = self.state().count {
            return Ok(count);
        }
        let EntryState { start, end, .. } = *self.state();
        let mut walker = self.reader().view(start, end);
        let mut count = 0;
        while walker.is_readable() {
            for _ in 0..Self::UNITS_PER_ENTRY {
                walker.next_child(end)?;
            }
            count += 1;
        }
        self.state_mut().count = Some(count);
        Ok(count)
    }

    /// Upper bound for the number of entries, known without walking the structure.
    fn max_len(&self) -> usize {
        let state = self.state();
        (state.end - state.start) / Self::UNITS_PER_ENTRY
    }
}

fn not_on_entry() -> Error {
    Error::OutOfRange("The cursor is not on an entry".to_string())
}

/// Cursor over the values of an array.
#[derive(Clone, Debug)]
pub struct JbArray<'a> {
    reader: JbReader<'a>,
    state: EntryState,
}

impl<'a> JbArray<'a> {
    /// Open the array at the cursor of `reader`. The given reader isn't moved.
    pub fn new(reader: &JbReader<'a>) -> Result<Self> {
        let mut array = Self {
            reader: reader.view(reader.pos(), reader.end()),
            state: EntryState::default(),
        };
        array.parse_header()?;
        Ok(array)
    }

    /// A reader positioned on the current value.
    pub fn entry_reader(&mut self) -> Result<&mut JbReader<'a>> {
        if !self.ok() {
            return Err(not_on_entry());
        }
        self.reader.set_pos(self.state.pos);
        Ok(&mut self.reader)
    }

    /// Decode the current value.
    pub fn value(&mut self) -> Result<Value> {
        self.entry_reader()?.decode_value()
    }

    /// Move onto entry `i`, continuing from the current entry when possible.
    pub fn get(&mut self, i: usize) -> Result<bool> {
        if !matches!(self.index(), Some(current) if current <= i) && !self.first()? {
            return Ok(false);
        }
        while self.state.index < i {
            if !self.next()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Open the current value as a map.
    pub fn map(&mut self) -> Result<JbMap<'a>> {
        JbMap::new(self.entry_reader()?)
    }

    /// Open the current value as an array.
    pub fn array(&mut self) -> Result<JbArray<'a>> {
        JbArray::new(self.entry_reader()?)
    }
}

impl<'a> EntryArray<'a> for JbArray<'a> {
    const UNITS_PER_ENTRY: usize = 1;

    fn reader(&mut self) -> &mut JbReader<'a> {
        &mut self.reader
    }

    fn state(&self) -> &EntryState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EntryState {
        &mut self.state
    }

    fn parse_header(&mut self) -> Result<()> {
        self.state = EntryState::open(&mut self.reader, StructKind::Array)?;
        Ok(())
    }
}

/// Cursor over the key/value pairs of a map.
#[derive(Clone, Debug)]
pub struct JbMap<'a> {
    reader: JbReader<'a>,
    state: EntryState,
    key: Memo<Rc<str>>,
    value_pos: Memo<usize>,
}

impl<'a> JbMap<'a> {
    /// Open the map at the cursor of `reader`. The given reader isn't moved.
    pub fn new(reader: &JbReader<'a>) -> Result<Self> {
        let mut map = Self {
            reader: reader.view(reader.pos(), reader.end()),
            state: EntryState::default(),
            key: Memo::default(),
            value_pos: Memo::default(),
        };
        map.parse_header()?;
        Ok(map)
    }

    /// The key of the current entry.
    pub fn key(&mut self) -> Result<String> {
        Ok(self.shared_key()?.to_string())
    }

    fn shared_key(&mut self) -> Result<Rc<str>> {
        if !self.ok() {
            return Err(not_on_entry());
        }
        let pos = self.state.pos;
        if let Some(key) = self.key.get(pos) {
            return Ok(key);
        }
        self.reader.set_pos(pos);
        let key = Rc::from(self.reader.decode_key()?);
        Ok(self.key.set(pos, key))
    }

    /// A reader positioned on the value of the current entry.
    pub fn value_reader(&mut self) -> Result<&mut JbReader<'a>> {
        if !self.ok() {
            return Err(not_on_entry());
        }
        let pos = self.state.pos;
        let value_pos = match self.value_pos.get(pos) {
            Some(value_pos) => value_pos,
            None => {
                self.reader.set_pos(pos);
                self.reader.next_child(self.state.end)?;
                if !self.reader.is_readable() {
                    return Err(Error::BadEncode(format!(
                        "Map key at {} has no value",
                        pos
                    )));
                }
                self.value_pos.set(pos, self.reader.pos())
            }
        };
        self.reader.set_pos(value_pos);
        Ok(&mut self.reader)
    }

    /// Decode the value of the current entry.
    pub fn value(&mut self) -> Result<Value> {
        self.value_reader()?.decode_value()
    }

    /// Move onto the entry with the given key, scanning from the first entry. If there is no
    /// such entry, the cursor is reset and false returned.
    pub fn select_key(&mut self, key: &str) -> Result<bool> {
        let mut more = self.first()?;
        while more {
            if &*self.shared_key()? == key {
                tracing::trace!(key, index = self.state.index, "selected map key");
                return Ok(true);
            }
            more = self.next()?;
        }
        self.reset();
        Ok(false)
    }

    /// Follow a path of keys through nested maps. Returns a reader positioned on the value found
    /// at the end of the path.
    pub fn select_path(&mut self, path: &[&str]) -> Result<Option<JbReader<'a>>> {
        let (first, rest) = match path.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };
        if !self.select_key(first)? {
            return Ok(None);
        }
        let reader = self.value_reader()?;
        if rest.is_empty() {
            return Ok(Some(reader.view(reader.pos(), reader.end())));
        }
        if reader.struct_kind() != Some(StructKind::Map) {
            return Ok(None);
        }
        JbMap::new(reader)?.select_path(rest)
    }

    /// Open the value of the current entry as a map.
    pub fn map(&mut self) -> Result<JbMap<'a>> {
        JbMap::new(self.value_reader()?)
    }

    /// Open the value of the current entry as an array.
    pub fn array(&mut self) -> Result<JbArray<'a>> {
        JbArray::new(self.value_reader()?)
    }
}

impl<'a> EntryArray<'a> for JbMap<'a> {
    const UNITS_PER_ENTRY: usize = 2;

    fn reader(&mut self) -> &mut JbReader<'a> {
        &mut self.reader
    }

    fn state(&self) -> &EntryState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EntryState {
        &mut self.state
    }

    fn parse_header(&mut self) -> Result<()> {
        self.state = EntryState::open(&mut self.reader, StructKind::Map)?;
        self.key.clear();
        self.value_pos.clear();
        Ok(())
    }

    fn drop_entry(&mut self) {
        self.value_pos.clear();
    }
}
