//! Pooled binary writer.
//!
//! A [`Pool`] is a growing byte buffer that owns a tree of [`PoolChunk`]s.
//! Each chunk reserves a 4-byte pointer slot in its parent's buffer at the
//! moment it is created; the slot is only patched with the chunk's final
//! absolute offset once [`Pool::finish`] runs. This lets the compositor
//! write forward references (a chunk referring to data that hasn't been
//! laid out yet) without a second pass over its own code — the pass lives
//! entirely inside the pool.
//!
//! Finalization sorts pending chunks by descending priority each round,
//! places each one (or reuses an earlier placement if it is an empty or
//! byte-identical leaf), patches its pointer slot, and promotes its own
//! children to the next round with their pointer slots rebased to be
//! absolute. The whole blob is padded to a 16-byte boundary at the end.

use byteorder::{BigEndian, WriteBytesExt};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

struct ChunkInner {
    data: RefCell<Vec<u8>>,
    children: RefCell<Vec<PoolChunk>>,
    ptr_pos: Cell<u32>,
    priority: i32,
}

/// A handle to a pending sub-buffer of a [`Pool`]. Cloning shares the same
/// underlying buffer; the buffer is appended to the enclosing pool's blob
/// only once [`Pool::finish`] runs.
#[derive(Clone)]
pub struct PoolChunk(Rc<ChunkInner>);

impl PoolChunk {
    fn new(ptr_pos: u32, priority: i32) -> Self {
        PoolChunk(Rc::new(ChunkInner {
            data: RefCell::new(Vec::new()),
            children: RefCell::new(Vec::new()),
            ptr_pos: Cell::new(ptr_pos),
            priority,
        }))
    }

    /// Append raw bytes to this chunk's buffer.
    pub fn write(&self, bytes: &[u8]) {
        self.0.data.borrow_mut().extend_from_slice(bytes);
    }

    pub fn write_u16(&self, v: u16) {
        self.0.data.borrow_mut().write_u16::<BigEndian>(v).unwrap();
    }

    pub fn write_i16(&self, v: i16) {
        self.0.data.borrow_mut().write_i16::<BigEndian>(v).unwrap();
    }

    pub fn write_u32(&self, v: u32) {
        self.0.data.borrow_mut().write_u32::<BigEndian>(v).unwrap();
    }

    pub fn write_i32(&self, v: i32) {
        self.0.data.borrow_mut().write_i32::<BigEndian>(v).unwrap();
    }

    pub fn write_f32(&self, v: f32) {
        self.0.data.borrow_mut().write_f32::<BigEndian>(v).unwrap();
    }

    pub fn write_u8(&self, v: u8) {
        self.0.data.borrow_mut().push(v);
    }

    /// Reserve a 4-byte pointer slot at the current write position and
    /// return a fresh child chunk that will be placed there on finalize.
    /// Higher `priority` chunks are placed earlier in the output.
    pub fn write_ref(&self, priority: i32) -> PoolChunk {
        let pos = {
            let mut data = self.0.data.borrow_mut();
            let pos = data.len() as u32;
            data.extend_from_slice(&[0u8; 4]);
            pos
        };
        let child = PoolChunk::new(pos, priority);
        self.0.children.borrow_mut().push(child.clone());
        child
    }

    pub fn len(&self) -> usize {
        self.0.data.borrow().len()
    }
}

/// Root of a pooled binary layout.
pub struct Pool {
    root: PoolChunk,
}

impl Pool {
    /// Create a new pool, seeding the root buffer with `init` (typically a
    /// fixed magic tag).
    pub fn new(init: &[u8]) -> Self {
        let root = PoolChunk::new(0, 0);
        root.write(init);
        Pool { root }
    }

    pub fn write(&self, bytes: &[u8]) {
        self.root.write(bytes);
    }

    pub fn write_u16(&self, v: u16) {
        self.root.write_u16(v);
    }

    pub fn write_i16(&self, v: i16) {
        self.root.write_i16(v);
    }

    pub fn write_u32(&self, v: u32) {
        self.root.write_u32(v);
    }

    pub fn write_i32(&self, v: i32) {
        self.root.write_i32(v);
    }

    pub fn write_f32(&self, v: f32) {
        self.root.write_f32(v);
    }

    pub fn write_ref(&self, priority: i32) -> PoolChunk {
        self.root.write_ref(priority)
    }

    /// Resolve every pending chunk into one contiguous, offset-patched
    /// blob, then pad it to a 16-byte boundary.
    pub fn finish(self) -> Vec<u8> {
        let mut data = self.root.0.data.borrow().clone();
        let mut objs: Vec<PoolChunk> = self.root.0.children.borrow_mut().drain(..).collect();
        let mut unique: HashMap<Vec<u8>, u32> = HashMap::new();

        while !objs.is_empty() {
            objs.sort_by(|a, b| b.0.priority.cmp(&a.0.priority));
            let mut next = Vec::new();

            for obj in &objs {
                let body = obj.0.data.borrow().clone();
                let has_children = !obj.0.children.borrow().is_empty();
                let tail = data.len() as u32;

                let data_pos = if body.is_empty() {
                    0
                } else if !has_children {
                    *unique.entry(body.clone()).or_insert(tail)
                } else {
                    tail
                };

                if data_pos == tail {
                    data.extend_from_slice(&body);
                }

                let ptr_pos = obj.0.ptr_pos.get() as usize;
                data[ptr_pos..ptr_pos + 4].copy_from_slice(&data_pos.to_be_bytes());

                for child in obj.0.children.borrow().iter() {
                    child.0.ptr_pos.set(child.0.ptr_pos.get() + data_pos);
                    next.push(child.clone());
                }
            }

            objs = next;
        }

        while data.len() % 16 != 0 {
            data.push(0);
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chunk_is_null_pointer() {
        let pool = Pool::new(b"TAG1");
        let _unused = pool.write_ref(0);
        let data = pool.finish();
        assert_eq!(&data[4..8], &0u32.to_be_bytes());
        assert_eq!(data.len() % 16, 0);
    }

    #[test]
    fn leaf_dedup_collapses_identical_bytes() {
        let pool = Pool::new(b"TAG1");
        let a = pool.write_ref(0);
        a.write(b"hello");
        let b = pool.write_ref(0);
        b.write(b"hello");
        let data = pool.finish();
        let a_off = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let b_off = u32::from_be_bytes(data[8..12].try_into().unwrap());
        assert_eq!(a_off, b_off);
        assert_ne!(a_off, 0);
    }

    #[test]
    fn higher_priority_is_placed_first() {
        let pool = Pool::new(b"TAG1");
        let low = pool.write_ref(-1);
        low.write(b"LOWW");
        let high = pool.write_ref(10);
        high.write(b"HIGH");
        let data = pool.finish();
        let low_off = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
        let high_off = u32::from_be_bytes(data[8..12].try_into().unwrap()) as usize;
        assert!(high_off < low_off);
        assert_eq!(&data[high_off..high_off + 4], b"HIGH");
        assert_eq!(&data[low_off..low_off + 4], b"LOWW");
    }

    #[test]
    fn nested_refs_get_absolute_offsets() {
        let pool = Pool::new(b"TAG1");
        let parent = pool.write_ref(0);
        parent.write(b"PARENT__");
        let child = parent.write_ref(0);
        child.write(b"CHILD");
        let data = pool.finish();
        let parent_off = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
        let child_ptr_pos = parent_off + 8; // after "PARENT__"
        let child_off =
            u32::from_be_bytes(data[child_ptr_pos..child_ptr_pos + 4].try_into().unwrap())
                as usize;
        assert_eq!(&data[child_off..child_off + 5], b"CHILD");
    }

    #[test]
    fn finished_pool_is_16_byte_aligned() {
        let pool = Pool::new(b"TAG1");
        pool.write(b"abc");
        let data = pool.finish();
        assert_eq!(data.len() % 16, 0);
    }
}
