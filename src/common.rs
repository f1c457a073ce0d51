//! This file contains common type definitions and utilities used in other parts of the project.
use hashbrown::HashSet;
use std::collections::VecDeque;
use std::hash::Hash;

pub type NumTy = u32;
pub type NodeIx = petgraph::graph::NodeIndex<NumTy>;
pub type Graph<V, E> = petgraph::Graph<V, E, petgraph::Directed, NumTy>;
pub type Result<T> = std::result::Result<T, crate::error::AnalysisError>;

/// Variable and function names. Names are shared between routine clones, so we reference-count
/// them rather than copying strings around.
pub type Name = std::sync::Arc<str>;

macro_rules! err {
    ($head:expr) => {
        Err($crate::error::AnalysisError::Internal(
                format!(concat!("[", file!(), ":", line!(), ":", column!(), "] ", $head))
        ))
    };
    ($head:expr, $($t:expr),+) => {
        Err($crate::error::AnalysisError::Internal(
                format!(concat!("[", file!(), ":", line!(), ":", column!(), "] ", $head), $($t),*)
        ))
    };
}

macro_rules! static_map {
    ($name:ident<$kty:ty, $vty:ty>, $([$k:expr, $v:expr]),*) => {
        lazy_static::lazy_static! {
            pub(crate) static ref $name: hashbrown::HashMap<$kty,$vty> = {
                let mut m = hashbrown::HashMap::new();
                $(
                    m.insert($k, $v);
                )*
                m
            };
        }
    }
}

/// A FIFO queue that ignores insertions of elements already present in the queue.
#[derive(Debug, Clone)]
pub struct WorkList<T: Hash + Eq> {
    set: HashSet<T>,
    mem: VecDeque<T>,
}

impl<T: Hash + Eq> Default for WorkList<T> {
    fn default() -> WorkList<T> {
        WorkList {
            set: Default::default(),
            mem: Default::default(),
        }
    }
}

impl<T: Clone + Hash + Eq> WorkList<T> {
    pub fn insert(&mut self, t: T) {
        if self.set.insert(t.clone()) {
            self.mem.push_back(t)
        }
    }
    pub fn extend(&mut self, ts: impl Iterator<Item = T>) {
        for t in ts {
            self.insert(t);
        }
    }
    pub fn pop(&mut self) -> Option<T> {
        let next = self.mem.pop_front()?;
        let _was_there = self.set.remove(&next);
        debug_assert!(_was_there);
        Some(next)
    }
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }
    pub fn len(&self) -> usize {
        self.mem.len()
    }
    pub fn contains(&self, t: &T) -> bool {
        self.set.contains(t)
    }
    pub fn clear(&mut self) {
        self.set.clear();
        self.mem.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_elems<T: Clone + Hash + Eq>(wl: &mut WorkList<T>) -> HashSet<T> {
        let mut res = HashSet::default();
        while let Some(e) = wl.pop() {
            assert!(res.insert(e));
        }
        res
    }

    #[test]
    fn worklist_elems() {
        let mut wl = WorkList::<i32>::default();
        for i in 0..10 {
            wl.insert(i);
        }
        assert_eq!(wl.len(), 10);
        assert_eq!(get_elems(&mut wl), (0i32..10).collect());
        assert!(wl.is_empty());
    }

    #[test]
    fn worklist_idempotent() {
        let mut wl = WorkList::<i32>::default();
        wl.extend(0..10);
        for i in 0..10 {
            wl.insert(i);
        }
        assert_eq!(get_elems(&mut wl), (0i32..10).collect());
    }

    #[test]
    fn worklist_fifo_and_reinsert() {
        let mut wl = WorkList::<i32>::default();
        wl.extend(vec![3, 1, 2].into_iter());
        assert_eq!(wl.pop(), Some(3));
        // popped elements may be queued again
        wl.insert(3);
        assert!(wl.contains(&3));
        assert_eq!(wl.pop(), Some(1));
        assert_eq!(wl.pop(), Some(2));
        assert_eq!(wl.pop(), Some(3));
        assert_eq!(wl.pop(), None);
    }

    #[test]
    fn err_macro_attributes_location() {
        let res: Result<()> = err!("bad handle {}", 7);
        let msg = format!("{}", res.unwrap_err());
        assert!(msg.contains("common.rs"), "{}", msg);
        assert!(msg.contains("bad handle 7"), "{}", msg);
    }
}
