//! Internal/leaf node layouts, viewed by reinterpreting a page's raw
//! bytes in place (the discriminant lives in the first header byte;
//! every accessor here trusts the caller to have already checked it
//! via [`node_type`]). Keys and values are fixed-size `u64`s: bitwise-
//! copyable records, as the spec requires, concretized to a single
//! numeric type rather than left generic.
//!
//! An internal entry's "key" is really an anchor `(key, value)` pair —
//! the composite ordering used for the multi-valued leaves below it —
//! not a bare key. A run of duplicate keys can straddle more than one
//! child after repeated splits, so routing by key alone cannot tell
//! those children apart; the value component resolves the tie.

use crate::page::{Page, PageId, NULL_PAGE, PAGE_SIZE};
use arrayvec::ArrayVec;

pub type Key = u64;
pub type Value = u64;

/// leaf entries are a plain `(key, value)` pair: 16 bytes.
pub const LEAF_CAPACITY: usize = 220;
pub const LEAF_MAX_SIZE: usize = LEAF_CAPACITY - 1;
pub const LEAF_MIN_SIZE: usize = LEAF_CAPACITY * 40 / 100;
pub const LEAF_MERGE_BOUND: usize = LEAF_CAPACITY * 90 / 100;

/// internal entries are `(key, value, child_page_id)`: 24 bytes, hence
/// the smaller capacity than leaves for the same page size.
pub const INTERNAL_CAPACITY: usize = 150;
pub const INTERNAL_MAX_SIZE: usize = INTERNAL_CAPACITY - 1;
pub const INTERNAL_MIN_SIZE: usize = INTERNAL_CAPACITY * 40 / 100;
pub const INTERNAL_MERGE_BOUND: usize = INTERNAL_CAPACITY * 90 / 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Invalid,
    Internal,
    Leaf,
}

impl NodeType {
    fn from_byte(b: u8) -> Self {
        match b {
            1 => NodeType::Internal,
            2 => NodeType::Leaf,
            _ => NodeType::Invalid,
        }
    }
}

#[repr(C)]
#[derive(Debug)]
struct Header {
    node_type: u8,
    is_root: u8,
    _pad: [u8; 6],
    size: u32,
    max_size: u32,
}

/// `(key, value, child_page_id)` anchor entries in ascending composite
/// order. Entry 0's anchor is the node's lower fence; the last entry's
/// key is its high key.
#[repr(C)]
pub struct InternalPageData {
    header: Header,
    keys: ArrayVec<Key, INTERNAL_CAPACITY>,
    anchor_values: ArrayVec<Value, INTERNAL_CAPACITY>,
    children: ArrayVec<PageId, INTERNAL_CAPACITY>,
}

const _: () = assert!(std::mem::size_of::<InternalPageData>() <= PAGE_SIZE);

/// `(key, value)` entries in ascending `(key, value)` order; duplicate
/// keys are permitted, duplicate `(key, value)` pairs are not.
#[repr(C)]
pub struct LeafPageData {
    header: Header,
    right_sibling: PageId,
    keys: ArrayVec<Key, LEAF_CAPACITY>,
    values: ArrayVec<Value, LEAF_CAPACITY>,
}

const _: () = assert!(std::mem::size_of::<LeafPageData>() <= PAGE_SIZE);

pub fn node_type(page: &Page) -> NodeType {
    NodeType::from_byte(page.read_bytes(0, 1)[0])
}

pub fn as_internal(page: &Page) -> &InternalPageData {
    debug_assert_eq!(node_type(page), NodeType::Internal);
    unsafe { &*(page.as_ptr() as *const InternalPageData) }
}

pub fn as_internal_mut(page: &mut Page) -> &mut InternalPageData {
    debug_assert_eq!(node_type(page), NodeType::Internal);
    unsafe { &mut *(page.as_mut_ptr() as *mut InternalPageData) }
}

pub fn as_leaf(page: &Page) -> &LeafPageData {
    debug_assert_eq!(node_type(page), NodeType::Leaf);
    unsafe { &*(page.as_ptr() as *const LeafPageData) }
}

pub fn as_leaf_mut(page: &mut Page) -> &mut LeafPageData {
    debug_assert_eq!(node_type(page), NodeType::Leaf);
    unsafe { &mut *(page.as_mut_ptr() as *mut LeafPageData) }
}

/// `page` must be freshly zeroed (as every page freshly returned by
/// [`crate::buffer::BufferPoolManager::new_page`] is).
pub fn init_internal(page: &mut Page, is_root: bool) {
    let node = unsafe { &mut *(page.as_mut_ptr() as *mut InternalPageData) };
    node.header.node_type = NodeType::Internal as u8;
    node.header.is_root = is_root as u8;
    node.header.size = 0;
    node.header.max_size = INTERNAL_MAX_SIZE as u32;
}

pub fn init_leaf(page: &mut Page, is_root: bool) {
    let node = unsafe { &mut *(page.as_mut_ptr() as *mut LeafPageData) };
    node.header.node_type = NodeType::Leaf as u8;
    node.header.is_root = is_root as u8;
    node.header.size = 0;
    node.header.max_size = LEAF_MAX_SIZE as u32;
    node.right_sibling = NULL_PAGE;
}

impl InternalPageData {
    pub fn len(&self) -> usize {
        self.header.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_root(&self) -> bool {
        self.header.is_root != 0
    }

    pub fn set_root(&mut self, is_root: bool) {
        self.header.is_root = is_root as u8;
    }

    /// the root is exempt: effective min is 2 (one real separator
    /// besides the lower-fence placeholder).
    pub fn min_size(&self) -> usize {
        if self.is_root() {
            2
        } else {
            INTERNAL_MIN_SIZE
        }
    }

    pub fn max_size(&self) -> usize {
        INTERNAL_MAX_SIZE
    }

    pub fn merge_bound(&self) -> usize {
        INTERNAL_MERGE_BOUND
    }

    pub fn is_insert_safe(&self) -> bool {
        self.len() < self.max_size()
    }

    pub fn is_remove_safe(&self) -> bool {
        self.len() > self.min_size()
    }

    pub fn key_at(&self, i: usize) -> Key {
        self.keys[i]
    }

    pub fn anchor_value_at(&self, i: usize) -> Value {
        self.anchor_values[i]
    }

    pub fn child_at(&self, i: usize) -> PageId {
        self.children[i]
    }

    pub fn high_key(&self) -> Key {
        self.keys[self.len() - 1]
    }

    fn partition_count(&self, key: Key, value: Value) -> usize {
        let mut lo = 0;
        let mut hi = self.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if (self.keys[mid], self.anchor_values[mid]) <= (key, value) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// the entry whose `(key, value)` anchor is the greatest `<=
    /// (key, value)`; clamped to 0 when `(key, value)` precedes every
    /// entry. `value = Value::MIN` probes "the leftmost child that
    /// could hold this key", the routing a plain `search(key)` needs.
    pub fn locate(&self, key: Key, value: Value) -> usize {
        self.partition_count(key, value).saturating_sub(1)
    }

    /// first index whose anchor is strictly greater than `(key,
    /// value)` — the position at which a new anchor entry belongs.
    pub fn insertion_index(&self, key: Key, value: Value) -> usize {
        self.partition_count(key, value)
    }

    /// overwrites an existing entry's anchor in place, without
    /// touching its child — used after a redistribution shifts the
    /// boundary between two siblings and the parent's separator must
    /// follow.
    pub fn set_key(&mut self, pos: usize, key: Key, value: Value) {
        debug_assert!(pos < self.len());
        self.keys[pos] = key;
        self.anchor_values[pos] = value;
    }

    pub fn insert(&mut self, pos: usize, key: Key, value: Value, child: PageId) {
        debug_assert!(pos <= self.len());
        self.keys.insert(pos, key);
        self.anchor_values.insert(pos, value);
        self.children.insert(pos, child);
        self.header.size += 1;
    }

    pub fn remove(&mut self, pos: usize) -> (Key, Value, PageId) {
        debug_assert!(pos < self.len());
        self.header.size -= 1;
        (
            self.keys.remove(pos),
            self.anchor_values.remove(pos),
            self.children.remove(pos),
        )
    }

    /// installs the two children produced by the very first root
    /// split. The left child's anchor is never read for routing (see
    /// [`locate`]'s fallback to index 0), so it is left as the
    /// zero/zero placeholder.
    pub fn insert_first_pair(&mut self, left: PageId, sep_key: Key, sep_value: Value, right: PageId) {
        debug_assert_eq!(self.len(), 0);
        self.keys.push(0);
        self.anchor_values.push(0);
        self.keys.push(sep_key);
        self.anchor_values.push(sep_value);
        self.children.push(left);
        self.children.push(right);
        self.header.size = 2;
    }

    /// moves the upper half of entries into `right` (freshly
    /// allocated, empty). Returns `right`'s new first anchor, the
    /// separator to install in the parent.
    pub fn split_into(&mut self, right: &mut InternalPageData) -> (Key, Value) {
        debug_assert!(right.is_empty());
        let mid = self.len() / 2;
        for i in mid..self.len() {
            right.keys.push(self.keys[i]);
            right.anchor_values.push(self.anchor_values[i]);
            right.children.push(self.children[i]);
        }
        right.header.size = (self.len() - mid) as u32;
        self.keys.truncate(mid);
        self.anchor_values.truncate(mid);
        self.children.truncate(mid);
        self.header.size = mid as u32;
        (right.key_at(0), right.anchor_value_at(0))
    }

    /// concatenates `right`'s entries onto `self`; `right` is left
    /// empty for the caller to deallocate.
    pub fn merge_with(&mut self, right: &mut InternalPageData) {
        for i in 0..right.len() {
            self.keys.push(right.keys[i]);
            self.anchor_values.push(right.anchor_values[i]);
            self.children.push(right.children[i]);
        }
        self.header.size += right.header.size;
        right.keys.clear();
        right.anchor_values.clear();
        right.children.clear();
        right.header.size = 0;
    }

    /// moves entries from `right`'s front into `self`'s back until
    /// sizes differ by at most one. Returns `right`'s new first
    /// anchor.
    pub fn steal_from_right(&mut self, right: &mut InternalPageData) -> (Key, Value) {
        let total = self.len() + right.len();
        let moving = total / 2 - self.len();
        for i in 0..moving {
            self.keys.push(right.keys[i]);
            self.anchor_values.push(right.anchor_values[i]);
            self.children.push(right.children[i]);
        }
        right.keys.drain(0..moving);
        right.anchor_values.drain(0..moving);
        right.children.drain(0..moving);
        self.header.size += moving as u32;
        right.header.size -= moving as u32;
        (right.key_at(0), right.anchor_value_at(0))
    }

    /// moves entries from `left`'s back into `self`'s front until
    /// sizes differ by at most one. Returns `self`'s new first
    /// anchor.
    pub fn steal_from_left(&mut self, left: &mut InternalPageData) -> (Key, Value) {
        let total = self.len() + left.len();
        let moving = total / 2 - self.len();
        let split_at = left.len() - moving;
        for i in (split_at..left.len()).rev() {
            self.keys.insert(0, left.keys[i]);
            self.anchor_values.insert(0, left.anchor_values[i]);
            self.children.insert(0, left.children[i]);
        }
        left.keys.truncate(split_at);
        left.anchor_values.truncate(split_at);
        left.children.truncate(split_at);
        self.header.size += moving as u32;
        left.header.size -= moving as u32;
        (self.key_at(0), self.anchor_value_at(0))
    }
}

impl LeafPageData {
    pub fn len(&self) -> usize {
        self.header.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_root(&self) -> bool {
        self.header.is_root != 0
    }

    pub fn set_root(&mut self, is_root: bool) {
        self.header.is_root = is_root as u8;
    }

    /// the root is exempt: a leaf root may be arbitrarily under-full,
    /// down to empty.
    pub fn min_size(&self) -> usize {
        if self.is_root() {
            0
        } else {
            LEAF_MIN_SIZE
        }
    }

    pub fn max_size(&self) -> usize {
        LEAF_MAX_SIZE
    }

    pub fn merge_bound(&self) -> usize {
        LEAF_MERGE_BOUND
    }

    pub fn is_insert_safe(&self) -> bool {
        self.len() < self.max_size()
    }

    pub fn is_remove_safe(&self) -> bool {
        self.len() > self.min_size()
    }

    pub fn key_at(&self, i: usize) -> Key {
        self.keys[i]
    }

    pub fn value_at(&self, i: usize) -> Value {
        self.values[i]
    }

    pub fn right_sibling(&self) -> PageId {
        self.right_sibling
    }

    pub fn set_right_sibling(&mut self, id: PageId) {
        self.right_sibling = id;
    }

    /// first index whose key is `>= key` (the start of a run of
    /// matching keys, if any).
    pub fn lower_bound_key(&self, key: Key) -> usize {
        self.keys[..self.len()].partition_point(|&k| k < key)
    }

    /// position of `(key, value)` in the composite order, or the
    /// insertion point if absent. Values within a run of equal keys
    /// are themselves ascending, so a binary search over that run's
    /// value slice finds the exact pair.
    pub fn find(&self, key: Key, value: Value) -> Result<usize, usize> {
        let lo = self.lower_bound_key(key);
        let hi = self.keys[..self.len()].partition_point(|&k| k <= key);
        match self.values[lo..hi].binary_search(&value) {
            Ok(off) => Ok(lo + off),
            Err(_) => Err(self.insertion_index(key, value)),
        }
    }

    /// the index at which `(key, value)` belongs, assuming it is
    /// absent.
    pub fn insertion_index(&self, key: Key, value: Value) -> usize {
        let mut lo = 0;
        let mut hi = self.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if (self.keys[mid], self.values[mid]) < (key, value) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn insert(&mut self, pos: usize, key: Key, value: Value) {
        debug_assert!(pos <= self.len());
        self.keys.insert(pos, key);
        self.values.insert(pos, value);
        self.header.size += 1;
    }

    pub fn remove(&mut self, pos: usize) -> (Key, Value) {
        debug_assert!(pos < self.len());
        self.header.size -= 1;
        (self.keys.remove(pos), self.values.remove(pos))
    }

    /// moves the upper half of entries into `right` (freshly
    /// allocated, empty), and threads the sibling link. Returns
    /// `right`'s new first key.
    pub fn split_into(&mut self, right: &mut LeafPageData, right_page_id: PageId) -> Key {
        debug_assert!(right.is_empty());
        let mid = self.len() / 2;
        for i in mid..self.len() {
            right.keys.push(self.keys[i]);
            right.values.push(self.values[i]);
        }
        right.header.size = (self.len() - mid) as u32;
        self.keys.truncate(mid);
        self.values.truncate(mid);
        self.header.size = mid as u32;

        right.right_sibling = self.right_sibling;
        self.right_sibling = right_page_id;
        right.key_at(0)
    }

    /// concatenates `right`'s entries onto `self`, reclaiming its
    /// sibling link; `right` is left empty for the caller to
    /// deallocate.
    pub fn merge_with(&mut self, right: &mut LeafPageData) {
        for i in 0..right.len() {
            self.keys.push(right.keys[i]);
            self.values.push(right.values[i]);
        }
        self.header.size += right.header.size;
        self.right_sibling = right.right_sibling;
        right.keys.clear();
        right.values.clear();
        right.header.size = 0;
    }

    pub fn steal_from_right(&mut self, right: &mut LeafPageData) -> Key {
        let total = self.len() + right.len();
        let moving = total / 2 - self.len();
        for i in 0..moving {
            self.keys.push(right.keys[i]);
            self.values.push(right.values[i]);
        }
        right.keys.drain(0..moving);
        right.values.drain(0..moving);
        self.header.size += moving as u32;
        right.header.size -= moving as u32;
        right.key_at(0)
    }

    pub fn steal_from_left(&mut self, left: &mut LeafPageData) -> Key {
        let total = self.len() + left.len();
        let moving = total / 2 - self.len();
        let split_at = left.len() - moving;
        for i in (split_at..left.len()).rev() {
            self.keys.insert(0, left.keys[i]);
            self.values.insert(0, left.values[i]);
        }
        left.keys.truncate(split_at);
        left.values.truncate(split_at);
        self.header.size += moving as u32;
        left.header.size -= moving as u32;
        self.key_at(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_leaf(is_root: bool) -> Page {
        let mut page = Page::zeroed();
        init_leaf(&mut page, is_root);
        page
    }

    fn fresh_internal(is_root: bool) -> Page {
        let mut page = Page::zeroed();
        init_internal(&mut page, is_root);
        page
    }

    #[test]
    fn leaf_insert_keeps_composite_order() {
        let mut page = fresh_leaf(true);
        let leaf = as_leaf_mut(&mut page);
        for (k, v) in [(5, 1), (3, 1), (5, 0), (1, 9)] {
            let pos = leaf.insertion_index(k, v);
            leaf.insert(pos, k, v);
        }
        let pairs: Vec<(Key, Value)> =
            (0..leaf.len()).map(|i| (leaf.key_at(i), leaf.value_at(i))).collect();
        assert_eq!(pairs, vec![(1, 9), (3, 1), (5, 0), (5, 1)]);
    }

    #[test]
    fn leaf_find_locates_exact_pair_among_duplicates() {
        let mut page = fresh_leaf(true);
        let leaf = as_leaf_mut(&mut page);
        for (k, v) in [(5, 0), (5, 1), (5, 2)] {
            let pos = leaf.insertion_index(k, v);
            leaf.insert(pos, k, v);
        }
        assert_eq!(leaf.find(5, 1), Ok(1));
        assert!(leaf.find(5, 9).is_err());
        assert!(leaf.find(6, 0).is_err());
    }

    #[test]
    fn leaf_split_threads_sibling_and_balances_sizes() {
        let mut left_page = fresh_leaf(false);
        let mut right_page = fresh_leaf(false);
        {
            let left = as_leaf_mut(&mut left_page);
            for i in 0..10u64 {
                left.insert(i as usize, i, i);
            }
        }
        let left = as_leaf_mut(&mut left_page);
        let right = as_leaf_mut(&mut right_page);
        let median = left.split_into(right, 42);
        assert_eq!(left.len(), 5);
        assert_eq!(right.len(), 5);
        assert_eq!(median, right.key_at(0));
        assert_eq!(left.right_sibling(), 42);
    }

    #[test]
    fn internal_locate_clamps_below_lower_fence() {
        let mut page = fresh_internal(true);
        let node = as_internal_mut(&mut page);
        node.insert_first_pair(1, 100, 0, 2);
        assert_eq!(node.locate(0, 0), 0);
        assert_eq!(node.locate(99, u64::MAX), 0);
        assert_eq!(node.locate(100, 0), 1);
        assert_eq!(node.locate(1000, 0), 1);
    }

    #[test]
    fn internal_locate_breaks_ties_on_anchor_value() {
        let mut page = fresh_internal(true);
        let node = as_internal_mut(&mut page);
        node.insert_first_pair(1, 0, 0, 2);
        node.insert(1, 5, 10, 3);
        node.insert(2, 5, 20, 4);
        // two children both anchored at key 5 (split mid-run); routing
        // must land on the child whose anchor value doesn't exceed
        // the probe's value.
        assert_eq!(node.locate(5, 10), 1);
        assert_eq!(node.locate(5, 15), 1);
        assert_eq!(node.locate(5, 20), 2);
        assert_eq!(node.locate(5, 0), 0);
    }

    #[test]
    fn internal_split_moves_upper_half() {
        let mut left_page = fresh_internal(false);
        let mut right_page = fresh_internal(false);
        {
            let left = as_internal_mut(&mut left_page);
            for i in 0..10u64 {
                left.insert(i as usize, i * 10, 0, i);
            }
        }
        let left = as_internal_mut(&mut left_page);
        let right = as_internal_mut(&mut right_page);
        let (median_key, _) = left.split_into(right);
        assert_eq!(left.len(), 5);
        assert_eq!(right.len(), 5);
        assert_eq!(median_key, 50);
    }

    #[test]
    fn steal_from_right_balances_and_reports_new_boundary() {
        let mut left_page = fresh_leaf(false);
        let mut right_page = fresh_leaf(false);
        {
            let left = as_leaf_mut(&mut left_page);
            left.insert(0, 1, 1);
        }
        {
            let right = as_leaf_mut(&mut right_page);
            for (i, k) in (2u64..9).enumerate() {
                right.insert(i, k, k);
            }
        }
        let left = as_leaf_mut(&mut left_page);
        let right = as_leaf_mut(&mut right_page);
        let total = left.len() + right.len();
        let new_boundary = left.steal_from_right(right);
        assert_eq!(left.len() + right.len(), total);
        assert!(left.len().abs_diff(right.len()) <= 1);
        assert_eq!(new_boundary, right.key_at(0));
    }
}
