//! Bitsets over variable handles.
//!
//! Most routines do not use more than 64 local variables, so we represent sets of variables as
//! "lossy bitsets" that can precisely represent subsets of [0, 63] but otherwise just say "yes" to
//! all queries. This is a poor choice for a general bitset type, but it is a sound choice for the
//! questions we ask of it: "may this variable be used?", "may it be initialized?" and "is it
//! certainly initialized?" all tolerate a "yes" for variables we do not track precisely, because
//! those variables are typed with the any-type anyway.
use std::fmt;

/// Handles at or above this index fall outside the fast path.
pub const FAST_PATH_WIDTH: usize = 64;

/// Returns true if `index` is tracked precisely by a [VarMask].
///
/// Everything outside of the fast path is answered conservatively: membership queries return
/// true, and the flow state types these variables with the any-type.
pub fn is_tracked(index: usize) -> bool {
    index < FAST_PATH_WIDTH
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VarMask(u64);

impl VarMask {
    pub fn empty() -> VarMask {
        VarMask(0)
    }
    pub fn all() -> VarMask {
        VarMask(!0)
    }
    pub fn singleton(index: usize) -> VarMask {
        let mut res = VarMask::empty();
        res.set(index);
        res
    }
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Membership. Untracked indexes are always members.
    pub fn get(&self, index: usize) -> bool {
        !is_tracked(index) || (1u64 << (index as u32)) & self.0 != 0
    }

    /// Insert `index`. Inserting an untracked index is a no-op: it is already a member.
    pub fn set(&mut self, index: usize) {
        if is_tracked(index) {
            self.0 |= 1u64 << index;
        }
    }

    /// Remove `index`. Untracked indexes cannot be removed; they stay members.
    pub fn clear(&mut self, index: usize) {
        if is_tracked(index) {
            self.0 &= !(1u64 << index);
        }
    }

    pub fn union(&self, other: &VarMask) -> VarMask {
        VarMask(self.0 | other.0)
    }
    pub fn intersect(&self, other: &VarMask) -> VarMask {
        VarMask(self.0 & other.0)
    }
    pub fn is_subset_of(&self, other: &VarMask) -> bool {
        self.0 & !other.0 == 0
    }

    /// Iterate over the tracked members of the set.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..FAST_PATH_WIDTH).filter(move |i| (1u64 << *i) & self.0 != 0)
    }
}

impl fmt::Debug for VarMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self == &VarMask::all() {
            return write!(f, "<ALL>");
        }
        let v: Vec<_> = self.iter().collect();
        write!(f, "{:?}", v)
    }
}
