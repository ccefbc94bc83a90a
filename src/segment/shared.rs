//! Registry of execute segments that several machines may reuse.
//!
//! Machines on one thread that load the same code share a registry handle
//! through their options. A segment is found again by the range it covers,
//! its content hash and its ISA mode, so changed code never matches a
//! stale build.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::execute_segment::ExecuteSegment;
use crate::cpu::AddressType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub begin: u64,
    pub crc32c: u32,
    pub len: u64,
    pub compressed: bool,
}

impl SegmentKey {
    pub fn of<A: AddressType>(segment: &ExecuteSegment<A>) -> Self {
        Self {
            begin: segment.exec_begin(),
            crc32c: segment.crc32c(),
            len: segment.exec_end() - segment.exec_begin(),
            compressed: segment.is_compressed(),
        }
    }
}

/// Cloneable handle to a shared segment registry. Entries are weak: a
/// segment lives as long as some machine still holds it.
pub struct SharedSegments<A: AddressType> {
    inner: Rc<RefCell<HashMap<SegmentKey, Weak<ExecuteSegment<A>>>>>,
}

impl<A: AddressType> SharedSegments<A> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// A live, non-stale segment for `key`.
    pub fn get(&self, key: &SegmentKey) -> Option<Rc<ExecuteSegment<A>>> {
        let found = self.inner.borrow().get(key).and_then(Weak::upgrade)?;
        if found.is_stale() {
            return None;
        }
        log::debug!("Reusing shared execute segment {:?}", found);
        Some(found)
    }

    pub fn insert(&self, segment: &Rc<ExecuteSegment<A>>) {
        let mut map = self.inner.borrow_mut();
        map.retain(|_, weak| weak.strong_count() > 0);
        map.insert(SegmentKey::of(segment.as_ref()), Rc::downgrade(segment));
    }

    pub fn remove(&self, key: &SegmentKey) {
        self.inner.borrow_mut().remove(key);
    }

    /// Number of registered segments that are still alive.
    pub fn len(&self) -> usize {
        self.inner
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: AddressType> Clone for SharedSegments<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A: AddressType> Default for SharedSegments<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: AddressType> fmt::Debug for SharedSegments<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSegments").field("live", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> Rc<ExecuteSegment<u32>> {
        let code: Vec<u8> = [0x003100B3u32, 0x00008067]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        Rc::new(ExecuteSegment::create(&code, 0x1000, false, &[]).unwrap())
    }

    #[test]
    fn test_lookup_by_content() {
        let shared = SharedSegments::new();
        let seg = build();
        shared.insert(&seg);
        let key = SegmentKey::of(seg.as_ref());
        assert!(Rc::ptr_eq(&shared.get(&key).unwrap(), &seg));

        let other = SegmentKey { crc32c: key.crc32c ^ 1, ..key };
        assert!(shared.get(&other).is_none());
    }

    #[test]
    fn test_stale_and_dropped_segments_are_skipped() {
        let shared = SharedSegments::new();
        let seg = build();
        let key = SegmentKey::of(seg.as_ref());
        shared.insert(&seg);
        seg.set_stale(true);
        assert!(shared.get(&key).is_none());

        drop(seg);
        assert!(shared.is_empty());
    }

    #[test]
    fn test_handles_share_state() {
        let a = SharedSegments::<u32>::new();
        let b = a.clone();
        let seg = build();
        a.insert(&seg);
        assert_eq!(b.len(), 1);
        b.remove(&SegmentKey::of(seg.as_ref()));
        assert!(a.is_empty());
    }
}
