//! Parse and build walks over a [`Tree`].
//!
//! Both walks visit nodes depth first in declaration order, so `build` writes
//! the same layout `parse` consumed. Pointer, area, and alignment nodes move the
//! cursor; pointers and areas always put it back through [`SeekGuard`], also
//! when the nested walk fails.

use crate::error::{Error, Result};
use crate::field::{Endianness, Len, NumKind, NumberType};
use crate::observe::{Event, Observer, Phase, TracingObserver};
use crate::text::{self, Encoding};
use crate::tree::{padding, Key, Kind, NodeId, Tree};
use crate::value::{to_hex, Value};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};

/// Restores a stream's position when dropped.
///
/// Use [`SeekGuard::finish`] on the success path to surface a failing seek.
pub struct SeekGuard<'a, S: Seek> {
    stream: &'a mut S,
    saved: u64,
    armed: bool,
}

impl<'a, S: Seek> SeekGuard<'a, S> {
    pub fn new(stream: &'a mut S) -> Result<Self> {
        let saved = stream.stream_position()?;
        Ok(SeekGuard {
            stream,
            saved,
            armed: true,
        })
    }

    /// Position the stream was at when the guard was taken.
    pub fn saved(&self) -> u64 {
        self.saved
    }

    pub fn finish(mut self) -> Result<()> {
        self.armed = false;
        self.stream.seek(SeekFrom::Start(self.saved))?;
        Ok(())
    }
}

impl<S: Seek> Deref for SeekGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.stream
    }
}

impl<S: Seek> DerefMut for SeekGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.stream
    }
}

impl<S: Seek> Drop for SeekGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.stream.seek(SeekFrom::Start(self.saved));
        }
    }
}

impl Tree {
    /// Decode the whole tree from `stream`, starting at its current position.
    ///
    /// Returns the decoded root value (rebuild fields report what was read).
    pub fn parse<R: Read + Seek>(&mut self, stream: &mut R) -> Result<Value> {
        self.parse_with(stream, &mut TracingObserver)
    }

    pub fn parse_with<R: Read + Seek>(&mut self, stream: &mut R, observer: &mut dyn Observer) -> Result<Value> {
        let root = self.root();
        self.parse_node(root, stream, observer, 0)?;
        self.value_of(root, true)
    }

    pub fn parse_bytes(&mut self, bytes: &[u8]) -> Result<Value> {
        self.parse(&mut Cursor::new(bytes))
    }

    /// Encode the tree into `stream`, recomputing rebuild fields first.
    pub fn build<W: Write + Seek>(&mut self, stream: &mut W) -> Result<()> {
        self.build_with(stream, &mut TracingObserver)
    }

    pub fn build_with<W: Write + Seek>(&mut self, stream: &mut W, observer: &mut dyn Observer) -> Result<()> {
        let root = self.root();
        self.build_node(root, stream, observer, 0)
    }

    pub fn build_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.build(&mut out)?;
        Ok(out.into_inner())
    }

    fn event(&self, id: NodeId, phase: Phase, depth: usize) -> Result<Event<'_>> {
        let node = self.slot(id)?;
        Ok(Event {
            phase,
            node: id,
            kind: node.kind.tag(),
            key: &node.key,
            depth,
        })
    }

    fn annotate(&self, id: NodeId, err: Error) -> Error {
        match self.slot(id).map(|n| &n.key) {
            Ok(Key::Name(name)) => err.at(name),
            Ok(Key::Index(i)) => err.at_index(*i),
            _ => err,
        }
    }

    fn parse_node<R: Read + Seek>(
        &mut self,
        id: NodeId,
        r: &mut R,
        obs: &mut dyn Observer,
        depth: usize,
    ) -> Result<()> {
        let start = r.stream_position()?;
        obs.enter(&self.event(id, Phase::Parse, depth)?);
        self.parse_content(id, r, obs, depth + 1)?;
        let end = r.stream_position()?;
        obs.exit(&self.event(id, Phase::Parse, depth)?, start..end);
        Ok(())
    }

    fn parse_content<R: Read + Seek>(
        &mut self,
        id: NodeId,
        r: &mut R,
        obs: &mut dyn Observer,
        next: usize,
    ) -> Result<()> {
        match &self.slot(id)?.kind {
            Kind::Number { ty, .. } | Kind::Enum { ty, .. } => {
                let value = read_number(r, *ty)?;
                self.store_value(id, value)
            }
            Kind::Const { ty, expected } => {
                let got = read_number(r, *ty)?;
                if got.same_as(expected) {
                    Ok(())
                } else {
                    Err(Error::Format(format!("expected {expected}, got {got}")))
                }
            }
            Kind::BytesConst { expected } => {
                let got = read_exact_vec(r, expected.len() as u64)?;
                if got == *expected {
                    Ok(())
                } else {
                    Err(Error::Format(format!("expected {}, got {}", to_hex(expected), to_hex(&got))))
                }
            }
            Kind::Bytes { len, .. } => {
                let n = self.eval_len(id, len)?;
                let bytes = read_exact_vec(r, n)?;
                self.store_bytes(id, bytes)
            }
            Kind::CString { encoding, .. } => {
                let value = read_cstring(r, *encoding)?;
                self.store_text(id, value)
            }
            Kind::PaddedString { encoding, len, .. } => {
                let encoding = *encoding;
                let n = self.eval_len(id, len)?;
                let raw = read_exact_vec(r, n)?;
                let value = text::decode(&raw, encoding)?;
                self.store_text(id, value)
            }
            Kind::PascalString { encoding, length, .. } => {
                let (encoding, length) = (*encoding, *length);
                let n = read_number(r, length)?;
                let n = n
                    .as_u64()
                    .ok_or_else(|| Error::Format(format!("invalid string length {n}")))?;
                let raw = read_exact_vec(r, n)?;
                let value = text::decode(&raw, encoding)?;
                self.store_text(id, value)
            }
            Kind::Struct { fields } => {
                let children: Vec<NodeId> = fields.values().copied().collect();
                for child in children {
                    self.parse_node(child, r, obs, next)
                        .map_err(|e| self.annotate(child, e))?;
                }
                Ok(())
            }
            Kind::Array { count, .. } => {
                let n = self.eval_len(id, count)?;
                self.clear_items(id)?;
                for i in 0..n {
                    let item = self.push_item(id)?;
                    self.parse_node(item, r, obs, next)
                        .map_err(|e| e.at_index(i as usize))?;
                }
                Ok(())
            }
            Kind::RepeatUntil { until, budget, .. } => {
                let until = until.clone();
                let limit = match budget {
                    Some(budget) => Some(budget(&self.scope_context(id))?),
                    None => None,
                };
                self.clear_items(id)?;
                let mut consumed = 0u64;
                let mut index = 0usize;
                loop {
                    if limit == Some(consumed) {
                        break;
                    }
                    let item = self.push_item(id)?;
                    let start = r.stream_position()?;
                    self.parse_node(item, r, obs, next)
                        .map_err(|e| e.at_index(index))?;
                    let used = r.stream_position()? - start;
                    consumed += used;
                    if let Some(limit) = limit {
                        if consumed > limit {
                            return Err(Error::Format(format!(
                                "size limit exceeded: {consumed} bytes consumed, budget is {limit}"
                            ))
                            .at_index(index));
                        }
                    }
                    if until(&self.context(item), &self.scope_context(id))? {
                        break;
                    }
                    if used == 0 {
                        return Err(Error::Format("repeated element consumed no bytes".into()).at_index(index));
                    }
                    index += 1;
                }
                Ok(())
            }
            Kind::IfThenElse { .. } => match self.active_branch(id)? {
                Some(branch) => self.parse_node(branch, r, obs, next),
                None => Ok(()),
            },
            Kind::Switch { discriminant, .. } => {
                let value = discriminant(&self.scope_context(id))?;
                let case = self.find_case(id, &value)?;
                let branch = self.select_case(id, case)?;
                self.parse_node(branch, r, obs, next)
            }
            Kind::Pointer { offset, target } => {
                let target = *target;
                let at = offset(&self.scope_context(id))?;
                let mut guard = SeekGuard::new(r)?;
                guard.seek(SeekFrom::Start(at))?;
                self.parse_node(target, &mut *guard, obs, next)?;
                guard.finish()
            }
            Kind::Area { offset, size, .. } => {
                let scope = self.scope_context(id);
                let at = offset(&scope)?;
                let end = at
                    .checked_add(size(&scope)?)
                    .ok_or_else(|| Error::Format("area window overflows".into()))?;
                self.clear_items(id)?;
                let mut guard = SeekGuard::new(r)?;
                guard.seek(SeekFrom::Start(at))?;
                let mut index = 0usize;
                let mut pos = at;
                while pos < end {
                    let item = self.push_item(id)?;
                    self.parse_node(item, &mut *guard, obs, next)
                        .map_err(|e| e.at_index(index))?;
                    let after = guard.stream_position()?;
                    if after == pos {
                        return Err(Error::Format("area element consumed no bytes".into()).at_index(index));
                    }
                    pos = after;
                    index += 1;
                }
                if pos != end {
                    return Err(Error::Format(format!("area ended at offset {pos}, expected {end}")));
                }
                guard.finish()
            }
            Kind::Lazy { .. } => {
                let child = self.refresh_lazy(id)?;
                self.parse_node(child, r, obs, next)
            }
            Kind::Rebuild { child, .. } => {
                let child = *child;
                self.parse_node(child, r, obs, next)
            }
            Kind::Aligned { alignment, child } => {
                let (alignment, child) = (alignment.clone(), *child);
                let start = r.stream_position()?;
                self.parse_node(child, r, obs, next)?;
                let used = r.stream_position()? - start;
                let pad = padding(used, self.alignment_of(id, &alignment)?);
                read_exact_vec(r, pad)?;
                Ok(())
            }
        }
    }

    fn store_value(&mut self, id: NodeId, value: Value) -> Result<()> {
        if let Kind::Number { value: slot, .. } | Kind::Enum { value: slot, .. } = &mut self.slot_mut(id)?.kind {
            *slot = value;
        }
        Ok(())
    }

    fn store_bytes(&mut self, id: NodeId, bytes: Vec<u8>) -> Result<()> {
        if let Kind::Bytes { value, .. } = &mut self.slot_mut(id)?.kind {
            *value = bytes;
        }
        Ok(())
    }

    fn store_text(&mut self, id: NodeId, text: String) -> Result<()> {
        if let Kind::CString { value, .. } | Kind::PaddedString { value, .. } | Kind::PascalString { value, .. } =
            &mut self.slot_mut(id)?.kind
        {
            *value = text;
        }
        Ok(())
    }

    fn build_node<W: Write + Seek>(
        &mut self,
        id: NodeId,
        w: &mut W,
        obs: &mut dyn Observer,
        depth: usize,
    ) -> Result<()> {
        let start = w.stream_position()?;
        obs.enter(&self.event(id, Phase::Build, depth)?);
        self.build_content(id, w, obs, depth + 1)?;
        let end = w.stream_position()?;
        obs.exit(&self.event(id, Phase::Build, depth)?, start..end);
        Ok(())
    }

    fn build_content<W: Write + Seek>(
        &mut self,
        id: NodeId,
        w: &mut W,
        obs: &mut dyn Observer,
        next: usize,
    ) -> Result<()> {
        match &self.slot(id)?.kind {
            Kind::Number { ty, value } | Kind::Enum { ty, value, .. } => write_number(w, *ty, value),
            Kind::Const { ty, expected } => write_number(w, *ty, expected),
            Kind::BytesConst { expected } => Ok(w.write_all(expected)?),
            Kind::Bytes { len, value } => {
                let n = self.eval_len(id, len)?;
                if value.len() as u64 != n {
                    return Err(Error::Format(format!(
                        "byte field holds {} bytes, declared length is {n}",
                        value.len()
                    )));
                }
                Ok(w.write_all(value)?)
            }
            Kind::CString { encoding, value } => {
                if value.contains('\0') {
                    return Err(Error::Format("C string contains an embedded NUL".into()));
                }
                w.write_all(&text::encode(value, *encoding))?;
                w.write_all(&vec![0u8; encoding.unit()])?;
                Ok(())
            }
            Kind::PaddedString { encoding, len, value } => {
                let n = self.eval_len(id, len)?;
                let raw = text::encode(value, *encoding);
                if raw.len() as u64 > n {
                    return Err(Error::Format(format!(
                        "string needs {} bytes, field holds {n}",
                        raw.len()
                    )));
                }
                w.write_all(&raw)?;
                w.write_all(&vec![0u8; (n - raw.len() as u64) as usize])?;
                Ok(())
            }
            Kind::PascalString { encoding, length, value } => {
                let raw = text::encode(value, *encoding);
                let n = Value::U64(raw.len() as u64).coerce(length.kind)?;
                write_number(w, *length, &n)?;
                Ok(w.write_all(&raw)?)
            }
            Kind::Struct { fields } => {
                let children: Vec<NodeId> = fields.values().copied().collect();
                for child in children {
                    self.build_node(child, w, obs, next)
                        .map_err(|e| self.annotate(child, e))?;
                }
                Ok(())
            }
            Kind::Array { count, items, .. } => {
                if let Len::Fixed(n) = count {
                    if items.len() as u64 != *n {
                        return Err(Error::Format(format!(
                            "array holds {} items, declared count is {n}",
                            items.len()
                        )));
                    }
                }
                let items = items.clone();
                self.build_items(&items, w, obs, next)
            }
            Kind::RepeatUntil { items, .. } => {
                let items = items.clone();
                self.build_items(&items, w, obs, next)
            }
            Kind::IfThenElse { .. } => match self.active_branch(id)? {
                Some(branch) => self.build_node(branch, w, obs, next),
                None => Ok(()),
            },
            Kind::Switch { discriminant, selected, .. } => {
                let branch = match *selected {
                    Some((_, branch)) => branch,
                    None => {
                        let value = discriminant(&self.scope_context(id))?;
                        let case = self.find_case(id, &value)?;
                        self.select_case(id, case)?
                    }
                };
                self.build_node(branch, w, obs, next)
            }
            Kind::Pointer { offset, target } => {
                let target = *target;
                let at = offset(&self.scope_context(id))?;
                let mut guard = SeekGuard::new(w)?;
                guard.seek(SeekFrom::Start(at))?;
                self.build_node(target, &mut *guard, obs, next)?;
                guard.finish()
            }
            Kind::Area { offset, items, .. } => {
                let items = items.clone();
                let at = offset(&self.scope_context(id))?;
                let mut guard = SeekGuard::new(w)?;
                guard.seek(SeekFrom::Start(at))?;
                self.build_items(&items, &mut *guard, obs, next)?;
                let end = at + self.ptr_size_of(id)?;
                let pos = guard.stream_position()?;
                if pos != end {
                    return Err(Error::Format(format!("area ended at offset {pos}, expected {end}")));
                }
                guard.finish()
            }
            Kind::Lazy { .. } => {
                let child = self.ensure_lazy(id)?;
                self.build_node(child, w, obs, next)
            }
            Kind::Rebuild { compute, child } => {
                let child = *child;
                let value = compute(&self.scope_context(id))?;
                self.assign(child, value)?;
                self.build_node(child, w, obs, next)
            }
            Kind::Aligned { alignment, child } => {
                let (alignment, child) = (alignment.clone(), *child);
                let start = w.stream_position()?;
                self.build_node(child, w, obs, next)?;
                let used = w.stream_position()? - start;
                let pad = padding(used, self.alignment_of(id, &alignment)?);
                w.write_all(&vec![0u8; pad as usize])?;
                Ok(())
            }
        }
    }

    fn build_items<W: Write + Seek>(
        &mut self,
        items: &[NodeId],
        w: &mut W,
        obs: &mut dyn Observer,
        next: usize,
    ) -> Result<()> {
        for (i, item) in items.iter().enumerate() {
            self.build_node(*item, w, obs, next).map_err(|e| e.at_index(i))?;
        }
        Ok(())
    }
}

fn read_number<R: Read>(r: &mut R, ty: NumberType) -> Result<Value> {
    match ty.endianness {
        Endianness::Big => read_number_as::<BigEndian, R>(r, ty.kind),
        Endianness::Little => read_number_as::<LittleEndian, R>(r, ty.kind),
    }
}

fn read_number_as<B: ByteOrder, R: Read>(r: &mut R, kind: NumKind) -> Result<Value> {
    Ok(match kind {
        NumKind::U8 => Value::U8(r.read_u8()?),
        NumKind::U16 => Value::U16(r.read_u16::<B>()?),
        NumKind::U32 => Value::U32(r.read_u32::<B>()?),
        NumKind::U64 => Value::U64(r.read_u64::<B>()?),
        NumKind::I8 => Value::I8(r.read_i8()?),
        NumKind::I16 => Value::I16(r.read_i16::<B>()?),
        NumKind::I32 => Value::I32(r.read_i32::<B>()?),
        NumKind::I64 => Value::I64(r.read_i64::<B>()?),
        NumKind::F32 => Value::Float(r.read_f32::<B>()?),
        NumKind::F64 => Value::Double(r.read_f64::<B>()?),
    })
}

fn write_number<W: Write>(w: &mut W, ty: NumberType, value: &Value) -> Result<()> {
    let value = value.coerce(ty.kind)?;
    match ty.endianness {
        Endianness::Big => write_number_as::<BigEndian, W>(w, &value),
        Endianness::Little => write_number_as::<LittleEndian, W>(w, &value),
    }
}

fn write_number_as<B: ByteOrder, W: Write>(w: &mut W, value: &Value) -> Result<()> {
    match *value {
        Value::U8(x) => w.write_u8(x)?,
        Value::U16(x) => w.write_u16::<B>(x)?,
        Value::U32(x) => w.write_u32::<B>(x)?,
        Value::U64(x) => w.write_u64::<B>(x)?,
        Value::I8(x) => w.write_i8(x)?,
        Value::I16(x) => w.write_i16::<B>(x)?,
        Value::I32(x) => w.write_i32::<B>(x)?,
        Value::I64(x) => w.write_i64::<B>(x)?,
        Value::Float(x) => w.write_f32::<B>(x)?,
        Value::Double(x) => w.write_f64::<B>(x)?,
        ref other => {
            return Err(Error::Format(format!("cannot encode a {} as a number", other.type_name())));
        }
    }
    Ok(())
}

/// Read exactly `n` bytes without trusting `n` for the allocation size.
fn read_exact_vec<R: Read>(r: &mut R, n: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.by_ref().take(n).read_to_end(&mut buf)?;
    if (buf.len() as u64) < n {
        return Err(Error::Stream(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("needed {n} bytes, stream had {}", buf.len()),
        )));
    }
    Ok(buf)
}

/// Units up to (not including) the first zero unit.
fn read_cstring<R: Read>(r: &mut R, encoding: Encoding) -> Result<String> {
    let unit = encoding.unit();
    let mut raw = Vec::new();
    let mut buf = [0u8; 4];
    loop {
        r.read_exact(&mut buf[..unit])?;
        if buf[..unit].iter().all(|b| *b == 0) {
            break;
        }
        raw.extend_from_slice(&buf[..unit]);
    }
    text::decode(&raw, encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_guard_restores_on_drop() {
        let mut cursor = Cursor::new(vec![0u8; 16]);
        cursor.set_position(3);
        {
            let mut guard = SeekGuard::new(&mut cursor).unwrap();
            guard.seek(SeekFrom::Start(12)).unwrap();
            assert_eq!(guard.saved(), 3);
        }
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn test_read_exact_vec_short_stream() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3]);
        let err = read_exact_vec(&mut cursor, 1 << 40).unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[test]
    fn test_number_byte_order() {
        let mut out = Vec::new();
        write_number(&mut out, NumberType::U32_BE, &Value::U32(0x12345678)).unwrap();
        assert_eq!(out, [0x12, 0x34, 0x56, 0x78]);
        let v = read_number(&mut Cursor::new(&out), NumberType::U32_LE).unwrap();
        assert_eq!(v, Value::U32(0x78563412));
    }
}
