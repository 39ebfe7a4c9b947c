//! Reader for Python's pickle object-serialization format
//!
//! Implements the subset of the pickle virtual machine needed to load dataset
//! batch files written by protocols 2 through 5. Class references, calls and
//! state updates (GLOBAL, REDUCE, BUILD) are recorded as inert objects; nothing
//! is ever executed.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use log::debug;
use std::collections::HashMap;
use std::io::{self, BufRead, Read};

use crate::errors::{KitError, KitResult};

/// Highest pickle protocol this reader accepts
pub const HIGHEST_PROTOCOL: u8 = 5;

/// Pickle opcodes understood by the reader
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Proto = 0x80,
    Frame = 0x95,
    Stop = b'.',
    Mark = b'(',
    Pop = b'0',
    PopMark = b'1',
    Dup = b'2',
    None = b'N',
    NewTrue = 0x88,
    NewFalse = 0x89,
    BinInt = b'J',
    BinInt1 = b'K',
    BinInt2 = b'M',
    Long1 = 0x8a,
    BinFloat = b'G',
    ShortBinString = b'U',
    BinString = b'T',
    ShortBinBytes = b'C',
    BinBytes = b'B',
    BinBytes8 = 0x8e,
    ShortBinUnicode = 0x8c,
    BinUnicode = b'X',
    BinUnicode8 = 0x8d,
    EmptyTuple = b')',
    Tuple = b't',
    Tuple1 = 0x85,
    Tuple2 = 0x86,
    Tuple3 = 0x87,
    EmptyList = b']',
    List = b'l',
    Append = b'a',
    Appends = b'e',
    EmptyDict = b'}',
    Dict = b'd',
    SetItem = b's',
    SetItems = b'u',
    Global = b'c',
    StackGlobal = 0x93,
    Reduce = b'R',
    Build = b'b',
    BinPut = b'q',
    LongBinPut = b'r',
    Memoize = 0x94,
    BinGet = b'h',
    LongBinGet = b'j',
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let op = match value {
            0x80 => Self::Proto,
            0x95 => Self::Frame,
            b'.' => Self::Stop,
            b'(' => Self::Mark,
            b'0' => Self::Pop,
            b'1' => Self::PopMark,
            b'2' => Self::Dup,
            b'N' => Self::None,
            0x88 => Self::NewTrue,
            0x89 => Self::NewFalse,
            b'J' => Self::BinInt,
            b'K' => Self::BinInt1,
            b'M' => Self::BinInt2,
            0x8a => Self::Long1,
            b'G' => Self::BinFloat,
            b'U' => Self::ShortBinString,
            b'T' => Self::BinString,
            b'C' => Self::ShortBinBytes,
            b'B' => Self::BinBytes,
            0x8e => Self::BinBytes8,
            0x8c => Self::ShortBinUnicode,
            b'X' => Self::BinUnicode,
            0x8d => Self::BinUnicode8,
            b')' => Self::EmptyTuple,
            b't' => Self::Tuple,
            0x85 => Self::Tuple1,
            0x86 => Self::Tuple2,
            0x87 => Self::Tuple3,
            b']' => Self::EmptyList,
            b'l' => Self::List,
            b'a' => Self::Append,
            b'e' => Self::Appends,
            b'}' => Self::EmptyDict,
            b'd' => Self::Dict,
            b's' => Self::SetItem,
            b'u' => Self::SetItems,
            b'c' => Self::Global,
            0x93 => Self::StackGlobal,
            b'R' => Self::Reduce,
            b'b' => Self::Build,
            b'q' => Self::BinPut,
            b'r' => Self::LongBinPut,
            0x94 => Self::Memoize,
            b'h' => Self::BinGet,
            b'j' => Self::LongBinGet,
            other => return Err(other),
        };
        Ok(op)
    }
}

/// A value produced by the pickle machine
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Reference to a Python class or function (`module.name`)
    Class {
        module_name: String,
        class_name: String,
    },
    Int(i64),
    Float(f64),
    /// Raw byte string (Python 2 `str` or Python 3 `bytes`)
    Bytes(Vec<u8>),
    Unicode(String),
    Bool(bool),
    None,
    Tuple(Vec<Object>),
    List(Vec<Object>),
    Mark,
    /// Mapping in insertion order
    Dict(Vec<(Object, Object)>),
    /// A recorded call `callable(*args)`
    Reduce {
        callable: Box<Object>,
        args: Box<Object>,
    },
    /// An object whose state was set with BUILD
    Build {
        object: Box<Object>,
        state: Box<Object>,
    },
    /// Reference to a memoized object while the stream is being executed.
    /// `load` replaces every reference with the object before returning.
    Memo(usize),
}

impl Object {
    /// Returns the payload of a byte or text string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Object::Bytes(b) => Some(b.as_slice()),
            Object::Unicode(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Checks whether this is a byte or text string equal to `key`
    pub fn is_key(&self, key: &str) -> bool {
        self.as_bytes() == Some(key.as_bytes())
    }

    /// Checks whether this object references `module_name.class_name`
    pub fn is_class(&self, module: &str, name: &str) -> bool {
        matches!(self, Object::Class { module_name, class_name }
            if module_name == module && class_name == name)
    }

    /// Looks up a dictionary entry by string key, accepting byte or text keys
    pub fn get(&self, key: &str) -> Option<&Object> {
        match self {
            Object::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.is_key(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Class { .. } => "class",
            Object::Int(_) => "int",
            Object::Float(_) => "float",
            Object::Bytes(_) => "bytes",
            Object::Unicode(_) => "str",
            Object::Bool(_) => "bool",
            Object::None => "None",
            Object::Tuple(_) => "tuple",
            Object::List(_) => "list",
            Object::Mark => "mark",
            Object::Dict(_) => "dict",
            Object::Reduce { .. } => "reduce",
            Object::Build { .. } => "build",
            Object::Memo(_) => "memo reference",
        }
    }
}

fn format_error(msg: impl Into<String>) -> KitError {
    KitError::FormatError(msg.into())
}

fn read_to_newline<R: BufRead>(r: &mut R) -> KitResult<String> {
    let mut data: Vec<u8> = Vec::with_capacity(32);
    r.read_until(b'\n', &mut data)?;
    if data.pop() != Some(b'\n') {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    if data.last() == Some(&b'\r') {
        data.pop();
    }
    String::from_utf8(data).map_err(|e| format_error(format!("invalid class name: {}", e)))
}

// Reads exactly `len` bytes without trusting `len` for the allocation size.
fn read_payload<R: BufRead>(r: &mut R, len: u64) -> KitResult<Vec<u8>> {
    let mut data = Vec::new();
    r.by_ref().take(len).read_to_end(&mut data)?;
    if data.len() as u64 != len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(data)
}

fn read_unicode<R: BufRead>(r: &mut R, len: u64) -> KitResult<Object> {
    let data = read_payload(r, len)?;
    let text = String::from_utf8(data).map_err(|e| format_error(format!("invalid UTF-8 string: {}", e)))?;
    Ok(Object::Unicode(text))
}

fn read_long<R: BufRead>(r: &mut R, len: usize) -> KitResult<i64> {
    if len > 8 {
        return Err(format_error(format!("integer of {} bytes does not fit in 64 bits", len)));
    }
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf[..len])?;
    // Two's complement: extend the sign of the most significant byte.
    if len > 0 && buf[len - 1] & 0x80 != 0 {
        for b in &mut buf[len..] {
            *b = 0xff;
        }
    }
    Ok(i64::from_le_bytes(buf))
}

/// The pickle machine: an object stack plus the memo table
///
/// Memoized objects are moved into `slots` and the stack keeps an
/// `Object::Memo` reference in their place, so later APPEND/SETITEMS/BUILD
/// on that reference are seen by every BINGET of it.
#[derive(Debug)]
pub struct Stack {
    stack: Vec<Object>,
    memo: HashMap<u32, usize>,
    slots: Vec<Object>,
}

impl Stack {
    pub fn empty() -> Self {
        Self {
            stack: Vec::with_capacity(64),
            memo: HashMap::new(),
            slots: Vec::new(),
        }
    }

    pub fn stack(&self) -> &[Object] {
        self.stack.as_slice()
    }

    /// Executes opcodes until STOP
    pub fn read_loop<R: BufRead>(&mut self, r: &mut R) -> KitResult<()> {
        while !self.read(r)? {}
        Ok(())
    }

    /// Returns the object left on top of the stack with memo references resolved
    pub fn finalize(mut self) -> KitResult<Object> {
        let root = self.pop()?;
        MemoResolver::new(self.slots, &root).resolve(root)
    }

    fn push(&mut self, obj: Object) {
        self.stack.push(obj)
    }

    fn pop(&mut self) -> KitResult<Object> {
        self.stack.pop().ok_or_else(|| format_error("unexpected empty stack"))
    }

    fn last(&mut self) -> KitResult<&mut Object> {
        self.stack.last_mut().ok_or_else(|| format_error("unexpected empty stack"))
    }

    /// The object on top of the stack, looking through a memo reference
    fn last_target(&mut self) -> KitResult<&mut Object> {
        let slot = match self.stack.last() {
            Some(Object::Memo(slot)) => Some(*slot),
            Some(_) => None,
            None => return Err(format_error("unexpected empty stack")),
        };
        match slot {
            Some(slot) => self
                .slots
                .get_mut(slot)
                .ok_or_else(|| format_error(format!("invalid memo slot {}", slot))),
            None => self.last(),
        }
    }

    /// Pops a value, copying it out of the memo when it is a reference
    fn pop_value(&mut self) -> KitResult<Object> {
        match self.pop()? {
            Object::Memo(slot) => self
                .slots
                .get(slot)
                .cloned()
                .ok_or_else(|| format_error(format!("invalid memo slot {}", slot))),
            obj => Ok(obj),
        }
    }

    fn pop_to_marker(&mut self) -> KitResult<Vec<Object>> {
        let mark_idx = self
            .stack
            .iter()
            .rposition(|obj| matches!(obj, Object::Mark))
            .ok_or_else(|| format_error("marker object not found"))?;
        let objs = self.stack.split_off(mark_idx + 1);
        self.stack.pop();
        Ok(objs)
    }

    fn memo_get(&self, id: u32) -> KitResult<Object> {
        self.memo
            .get(&id)
            .map(|slot| Object::Memo(*slot))
            .ok_or_else(|| format_error(format!("missing object in memo {}", id)))
    }

    fn memo_put(&mut self, id: u32) -> KitResult<()> {
        let next_slot = self.slots.len();
        let top = self.stack.last_mut().ok_or_else(|| format_error("unexpected empty stack"))?;
        let slot = match top {
            Object::Memo(slot) => *slot,
            top => {
                let obj = std::mem::replace(top, Object::Memo(next_slot));
                self.slots.push(obj);
                next_slot
            }
        };
        self.memo.insert(id, slot);
        Ok(())
    }

    fn append(&mut self, mut items: Vec<Object>) -> KitResult<()> {
        match self.last_target()? {
            Object::List(list) => {
                list.append(&mut items);
                Ok(())
            }
            other => Err(format_error(format!("expected a list, got {}", other.kind()))),
        }
    }

    fn set_items(&mut self, objs: Vec<Object>) -> KitResult<()> {
        if objs.len() % 2 != 0 {
            return Err(format_error("setitems: not an even number of objects"));
        }
        let pairs = pairs_of(objs);
        match self.last_target()? {
            Object::Dict(entries) => {
                entries.extend(pairs);
                Ok(())
            }
            other => Err(format_error(format!("expected a dict, got {}", other.kind()))),
        }
    }

    fn reduce(&mut self) -> KitResult<()> {
        let args = self.pop()?;
        let callable = self.pop()?;
        self.push(Object::Reduce {
            callable: Box::new(callable),
            args: Box::new(args),
        });
        Ok(())
    }

    // BUILD updates the object in place, so a memoized object stays shared.
    fn build(&mut self) -> KitResult<()> {
        let state = self.pop()?;
        match self.pop()? {
            Object::Memo(slot) => {
                let target = self
                    .slots
                    .get_mut(slot)
                    .ok_or_else(|| format_error(format!("invalid memo slot {}", slot)))?;
                let object = std::mem::replace(target, Object::None);
                let built = self.apply_state(object, state);
                self.slots[slot] = built;
                self.push(Object::Memo(slot));
            }
            object => {
                let built = self.apply_state(object, state);
                self.push(built);
            }
        }
        Ok(())
    }

    fn apply_state(&self, object: Object, state: Object) -> Object {
        let Object::Dict(mut entries) = object else {
            return Object::Build {
                object: Box::new(object),
                state: Box::new(state),
            };
        };
        match state {
            Object::Dict(extra) => {
                entries.extend(extra);
                Object::Dict(entries)
            }
            Object::Memo(slot) => match self.slots.get(slot) {
                Some(Object::Dict(extra)) => {
                    entries.extend_from_slice(extra);
                    Object::Dict(entries)
                }
                _ => Object::Build {
                    object: Box::new(Object::Dict(entries)),
                    state: Box::new(Object::Memo(slot)),
                },
            },
            state => Object::Build {
                object: Box::new(Object::Dict(entries)),
                state: Box::new(state),
            },
        }
    }

    /// Executes a single opcode, returning true once STOP is reached
    pub fn read<R: BufRead>(&mut self, r: &mut R) -> KitResult<bool> {
        let op_code = match OpCode::try_from(r.read_u8()?) {
            Ok(op_code) => op_code,
            Err(op_code) => return Err(format_error(format!("unknown op-code {:#04x}", op_code))),
        };
        match op_code {
            OpCode::Proto => {
                let version = r.read_u8()?;
                debug!("pickle protocol {}", version);
                if version > HIGHEST_PROTOCOL {
                    return Err(format_error(format!("unsupported pickle protocol {}", version)));
                }
            }
            OpCode::Frame => {
                // Framing only groups opcodes; the payload follows inline.
                r.read_u64::<LittleEndian>()?;
            }
            OpCode::Stop => return Ok(true),
            OpCode::Mark => self.push(Object::Mark),
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::PopMark => {
                self.pop_to_marker()?;
            }
            OpCode::Dup => {
                let top = self.last()?.clone();
                self.push(top)
            }
            OpCode::None => self.push(Object::None),
            OpCode::NewTrue => self.push(Object::Bool(true)),
            OpCode::NewFalse => self.push(Object::Bool(false)),
            OpCode::BinInt => {
                let arg = r.read_i32::<LittleEndian>()?;
                self.push(Object::Int(arg as i64))
            }
            OpCode::BinInt1 => {
                let arg = r.read_u8()?;
                self.push(Object::Int(arg as i64))
            }
            OpCode::BinInt2 => {
                let arg = r.read_u16::<LittleEndian>()?;
                self.push(Object::Int(arg as i64))
            }
            OpCode::Long1 => {
                let len = r.read_u8()? as usize;
                let value = read_long(r, len)?;
                self.push(Object::Int(value))
            }
            OpCode::BinFloat => {
                let value = r.read_f64::<BigEndian>()?;
                self.push(Object::Float(value))
            }
            OpCode::ShortBinString | OpCode::ShortBinBytes => {
                let len = r.read_u8()?;
                let data = read_payload(r, len as u64)?;
                self.push(Object::Bytes(data))
            }
            OpCode::BinString => {
                let len = r.read_i32::<LittleEndian>()?;
                if len < 0 {
                    return Err(format_error(format!("negative string length {}", len)));
                }
                let data = read_payload(r, len as u64)?;
                self.push(Object::Bytes(data))
            }
            OpCode::BinBytes => {
                let len = r.read_u32::<LittleEndian>()?;
                let data = read_payload(r, len as u64)?;
                self.push(Object::Bytes(data))
            }
            OpCode::BinBytes8 => {
                let len = r.read_u64::<LittleEndian>()?;
                let data = read_payload(r, len)?;
                self.push(Object::Bytes(data))
            }
            OpCode::ShortBinUnicode => {
                let len = r.read_u8()?;
                let obj = read_unicode(r, len as u64)?;
                self.push(obj)
            }
            OpCode::BinUnicode => {
                let len = r.read_u32::<LittleEndian>()?;
                let obj = read_unicode(r, len as u64)?;
                self.push(obj)
            }
            OpCode::BinUnicode8 => {
                let len = r.read_u64::<LittleEndian>()?;
                let obj = read_unicode(r, len)?;
                self.push(obj)
            }
            OpCode::EmptyTuple => self.push(Object::Tuple(vec![])),
            OpCode::Tuple => {
                let objs = self.pop_to_marker()?;
                self.push(Object::Tuple(objs))
            }
            OpCode::Tuple1 => {
                let obj = self.pop()?;
                self.push(Object::Tuple(vec![obj]))
            }
            OpCode::Tuple2 => {
                let obj2 = self.pop()?;
                let obj1 = self.pop()?;
                self.push(Object::Tuple(vec![obj1, obj2]))
            }
            OpCode::Tuple3 => {
                let obj3 = self.pop()?;
                let obj2 = self.pop()?;
                let obj1 = self.pop()?;
                self.push(Object::Tuple(vec![obj1, obj2, obj3]))
            }
            OpCode::EmptyList => self.push(Object::List(vec![])),
            OpCode::List => {
                let objs = self.pop_to_marker()?;
                self.push(Object::List(objs))
            }
            OpCode::Append => {
                let obj = self.pop()?;
                self.append(vec![obj])?
            }
            OpCode::Appends => {
                let objs = self.pop_to_marker()?;
                self.append(objs)?
            }
            OpCode::EmptyDict => self.push(Object::Dict(vec![])),
            OpCode::Dict => {
                let objs = self.pop_to_marker()?;
                if objs.len() % 2 != 0 {
                    return Err(format_error("dict: not an even number of objects"));
                }
                self.push(Object::Dict(pairs_of(objs)))
            }
            OpCode::SetItem => {
                let value = self.pop()?;
                let key = self.pop()?;
                self.set_items(vec![key, value])?
            }
            OpCode::SetItems => {
                let objs = self.pop_to_marker()?;
                self.set_items(objs)?
            }
            OpCode::Global => {
                let module_name = read_to_newline(r)?;
                let class_name = read_to_newline(r)?;
                self.push(Object::Class {
                    module_name,
                    class_name,
                })
            }
            OpCode::StackGlobal => {
                let class_name = self.pop_value()?;
                let module_name = self.pop_value()?;
                match (module_name, class_name) {
                    (Object::Unicode(module_name), Object::Unicode(class_name)) => {
                        self.push(Object::Class {
                            module_name,
                            class_name,
                        })
                    }
                    (m, c) => {
                        return Err(format_error(format!(
                            "stack_global expects two strings, got {} and {}",
                            m.kind(),
                            c.kind()
                        )))
                    }
                }
            }
            OpCode::Reduce => self.reduce()?,
            OpCode::Build => self.build()?,
            OpCode::BinPut => {
                let arg = r.read_u8()?;
                self.memo_put(arg as u32)?
            }
            OpCode::LongBinPut => {
                let arg = r.read_u32::<LittleEndian>()?;
                self.memo_put(arg)?
            }
            OpCode::Memoize => {
                let id = self.memo.len() as u32;
                self.memo_put(id)?
            }
            OpCode::BinGet => {
                let arg = r.read_u8()?;
                let obj = self.memo_get(arg as u32)?;
                self.push(obj)
            }
            OpCode::LongBinGet => {
                let arg = r.read_u32::<LittleEndian>()?;
                let obj = self.memo_get(arg)?;
                self.push(obj)
            }
        }
        Ok(false)
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::empty()
    }
}

enum SlotState {
    Pending(Object),
    InProgress,
    Resolved(Object),
    Consumed,
}

/// Replaces memo references with the objects they point to
///
/// A slot referenced once is moved into place; only objects that really
/// are shared get cloned.
struct MemoResolver {
    slots: Vec<SlotState>,
    remaining: Vec<usize>,
}

impl MemoResolver {
    fn new(slots: Vec<Object>, root: &Object) -> Self {
        let mut remaining = vec![0usize; slots.len()];
        count_refs(root, &mut remaining);
        for obj in &slots {
            count_refs(obj, &mut remaining);
        }
        MemoResolver {
            slots: slots.into_iter().map(SlotState::Pending).collect(),
            remaining,
        }
    }

    fn resolve(&mut self, obj: Object) -> KitResult<Object> {
        let resolved = match obj {
            Object::Memo(slot) => return self.resolve_slot(slot),
            Object::Tuple(items) => Object::Tuple(self.resolve_all(items)?),
            Object::List(items) => Object::List(self.resolve_all(items)?),
            Object::Dict(entries) => Object::Dict(
                entries
                    .into_iter()
                    .map(|(k, v)| -> KitResult<(Object, Object)> { Ok((self.resolve(k)?, self.resolve(v)?)) })
                    .collect::<KitResult<Vec<_>>>()?,
            ),
            Object::Reduce { callable, args } => Object::Reduce {
                callable: Box::new(self.resolve(*callable)?),
                args: Box::new(self.resolve(*args)?),
            },
            Object::Build { object, state } => Object::Build {
                object: Box::new(self.resolve(*object)?),
                state: Box::new(self.resolve(*state)?),
            },
            other => other,
        };
        Ok(resolved)
    }

    fn resolve_all(&mut self, items: Vec<Object>) -> KitResult<Vec<Object>> {
        items.into_iter().map(|item| self.resolve(item)).collect()
    }

    fn resolve_slot(&mut self, slot: usize) -> KitResult<Object> {
        let state = self
            .slots
            .get_mut(slot)
            .map(|state| std::mem::replace(state, SlotState::InProgress))
            .ok_or_else(|| format_error(format!("invalid memo slot {}", slot)))?;
        let remaining = &mut self.remaining[slot];
        *remaining = remaining.saturating_sub(1);

        let value = match state {
            SlotState::Pending(obj) => self.resolve(obj)?,
            SlotState::Resolved(obj) => obj,
            SlotState::InProgress => {
                return Err(format_error("self-referencing objects are not supported"));
            }
            SlotState::Consumed => {
                return Err(format_error(format!("memo slot {} referenced more often than counted", slot)));
            }
        };

        if self.remaining[slot] > 0 {
            self.slots[slot] = SlotState::Resolved(value.clone());
        } else {
            self.slots[slot] = SlotState::Consumed;
        }
        Ok(value)
    }
}

fn count_refs(obj: &Object, counts: &mut [usize]) {
    match obj {
        Object::Memo(slot) => {
            if let Some(count) = counts.get_mut(*slot) {
                *count += 1;
            }
        }
        Object::Tuple(items) | Object::List(items) => {
            for item in items {
                count_refs(item, counts);
            }
        }
        Object::Dict(entries) => {
            for (k, v) in entries {
                count_refs(k, counts);
                count_refs(v, counts);
            }
        }
        Object::Reduce { callable: a, args: b } | Object::Build { object: a, state: b } => {
            count_refs(a, counts);
            count_refs(b, counts);
        }
        _ => {}
    }
}

fn pairs_of(objs: Vec<Object>) -> Vec<(Object, Object)> {
    let mut pairs = Vec::with_capacity(objs.len() / 2);
    let mut iter = objs.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((key, value));
    }
    pairs
}

/// Loads one pickled object from the reader
///
/// A stream that ends before STOP is reported as a format error rather than
/// an I/O error.
pub fn load<R: BufRead>(reader: &mut R) -> KitResult<Object> {
    let mut stack = Stack::empty();
    match stack.read_loop(reader) {
        Ok(()) => stack.finalize(),
        Err(KitError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(format_error("truncated pickle stream"))
        }
        Err(e) => Err(e),
    }
}
