//! Tile ID type and gid-to-tid assignment.
//!
//! A [`Tid`] is the 16-bit value written into chunk tile grids: the top 3
//! bits are flip flags, the low 13 bits index into a single compiler-
//! assigned space spanning every ordinary tileset concatenated. A
//! [`TilesetAssigner`] hands out disjoint, 16-aligned ranges of that space
//! in authored tileset order and resolves a gid back to its tileset.

use crate::error::{CompileError, Result};

pub const FLIPX: u16 = 0x8000;
pub const FLIPY: u16 = 0x4000;
pub const FLIPD: u16 = 0x2000;
const INDEX_MASK: u16 = 0x1FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub u16);

impl Tid {
    pub const EMPTY: Tid = Tid(0);

    pub fn new(index: u16, flipx: bool, flipy: bool, flipd: bool) -> Self {
        let mut v = index & INDEX_MASK;
        if flipx {
            v |= FLIPX;
        }
        if flipy {
            v |= FLIPY;
        }
        if flipd {
            v |= FLIPD;
        }
        Tid(v)
    }

    pub fn index(self) -> u16 {
        self.0 & INDEX_MASK
    }

    pub fn flipx(self) -> bool {
        self.0 & FLIPX != 0
    }

    pub fn flipy(self) -> bool {
        self.0 & FLIPY != 0
    }

    pub fn flipd(self) -> bool {
        self.0 & FLIPD != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

struct Range {
    firstgid: u32,
    firsttid: u16,
    endtid: u16,
}

/// Assigns a contiguous, 16-aligned TID range to each ordinary tileset in
/// the order it is registered, and resolves gids back to their tileset.
#[derive(Default)]
pub struct TilesetAssigner {
    ranges: Vec<Range>,
    next_tid: u16,
}

impl TilesetAssigner {
    pub fn new() -> Self {
        Self {
            ranges: Vec::new(),
            // TID 0 is reserved for "empty".
            next_tid: 16,
        }
    }

    /// Register a tileset with `tile_count` tiles starting at `firstgid`,
    /// returning its assigned `(firsttid, endtid)` range.
    pub fn assign(&mut self, firstgid: u32, tile_count: u32) -> (u16, u16) {
        let firsttid = self.next_tid;
        let span = ((tile_count as u16) + 15) & !15;
        let endtid = firsttid + span.max(16);
        self.ranges.push(Range {
            firstgid,
            firsttid,
            endtid,
        });
        self.next_tid = endtid;
        (firsttid, endtid)
    }

    /// Translate a gid to a tid, scanning registered tilesets from last to
    /// first and picking the first whose `firstgid <= gid`.
    pub fn gid_to_tid(&self, gid: u32, flipx: bool, flipy: bool, flipd: bool) -> Result<Tid> {
        if gid == 0 {
            return Ok(Tid::EMPTY);
        }
        for range in self.ranges.iter().rev() {
            if range.firstgid <= gid {
                let index = range.firsttid + (gid - range.firstgid) as u16;
                if index >= range.endtid {
                    return Err(CompileError::InvalidTileId(gid).into());
                }
                return Ok(Tid::new(index, flipx, flipy, flipd));
            }
        }
        Err(CompileError::InvalidTileId(gid).into())
    }

    /// All assigned `(firsttid, endtid)` ranges in registration order.
    pub fn ranges(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.ranges.iter().map(|r| (r.firsttid, r.endtid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_disjoint_and_aligned() {
        let mut a = TilesetAssigner::new();
        let (f1, e1) = a.assign(1, 20);
        let (f2, e2) = a.assign(21, 5);
        assert_eq!(f1 % 16, 0);
        assert_eq!(f2 % 16, 0);
        assert!(e1 <= f2);
        assert_eq!(e2 - f2, 16);
    }

    #[test]
    fn gid_round_trips_through_last_matching_tileset() {
        let mut a = TilesetAssigner::new();
        a.assign(1, 20);
        a.assign(21, 10);
        let tid = a.gid_to_tid(25, false, false, false).unwrap();
        assert_eq!(tid.index(), 16 + 32 + (25 - 21) as u16);
    }

    #[test]
    fn flip_bits_round_trip() {
        let t = Tid::new(5, true, false, true);
        assert!(t.flipx());
        assert!(!t.flipy());
        assert!(t.flipd());
        assert_eq!(t.index(), 5);
    }

    #[test]
    fn gid_zero_is_empty() {
        let a = TilesetAssigner::new();
        assert!(a.gid_to_tid(0, false, false, false).unwrap().is_empty());
    }

    #[test]
    fn unknown_gid_errors() {
        let a = TilesetAssigner::new();
        assert!(a.gid_to_tid(5, false, false, false).is_err());
    }
}
