//! Ascending timer list used to evict idle connections.
//!
//! Records live in an index arena and are chained through `prev`/`next`
//! indices, so unlinking is O(1) given a handle. The list is kept sorted by
//! expiry: the head is always the next record to fire.
//!
//! The list is driven by a single thread and has no internal locking.

use std::time::Instant;

/// Handle to a record in a [`TimerList`].
///
/// Handles carry the generation of their slot: once a record is removed
/// (explicitly or by [`TimerList::tick`]) every copy of its handle goes stale
/// and further operations on it are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: usize,
    generation: u64,
}

struct TimerNode<D> {
    expire: Instant,
    data: D,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct TimerList<D> {
    nodes: Vec<Option<TimerNode<D>>>,
    generations: Vec<u64>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<D> Default for TimerList<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> TimerList<D> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Expiry of the head record, if any.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.head.map(|idx| self.node(idx).expire)
    }

    pub fn expire_of(&self, id: TimerId) -> Option<Instant> {
        self.live(id).map(|idx| self.node(idx).expire)
    }

    pub fn get(&self, id: TimerId) -> Option<&D> {
        self.live(id).map(|idx| &self.node(idx).data)
    }

    /// Inserts a record expiring at `expire`, keeping the list ascending.
    ///
    /// Insertion at either end is O(1); otherwise the list is scanned from
    /// whichever end is closer in expiry.
    pub fn add(&mut self, expire: Instant, data: D) -> TimerId {
        let node = TimerNode {
            expire,
            data,
            prev: None,
            next: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                index
            }
            None => {
                self.nodes.push(Some(node));
                self.generations.push(0);
                self.nodes.len() - 1
            }
        };
        self.len += 1;
        self.link(index, None);

        TimerId {
            index,
            generation: self.generations[index],
        }
    }

    /// Moves a record to its new expiry.
    ///
    /// Meant for extensions (activity refresh): the record is re-inserted by
    /// scanning forward from its old position, so the cost is bounded by how
    /// far it moves. Returns `false` for a stale handle.
    pub fn adjust(&mut self, id: TimerId, expire: Instant) -> bool {
        let Some(idx) = self.live(id) else {
            return false;
        };

        self.node_mut(idx).expire = expire;
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };

        let after_prev = prev.is_none_or(|p| self.node(p).expire <= expire);
        let before_next = next.is_none_or(|n| expire < self.node(n).expire);
        if after_prev && before_next {
            return true;
        }

        self.unlink(idx);
        let from = prev.or(self.head);
        self.link(idx, from);
        true
    }

    /// Unlinks and frees a record, returning its data.
    ///
    /// Returns `None` when the handle is stale, so a record can never be
    /// freed twice.
    pub fn remove(&mut self, id: TimerId) -> Option<D> {
        let idx = self.live(id)?;
        self.unlink(idx);

        let node = self.nodes[idx].take()?;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free.push(idx);
        self.len -= 1;
        Some(node.data)
    }

    /// Fires every record whose expiry is at or before `now`, in ascending
    /// order.
    ///
    /// Each expired record is removed before `on_expire` receives its data,
    /// so the callback is free to drop any handle it still holds. Returns
    /// the number of records fired.
    pub fn tick<F>(&mut self, now: Instant, mut on_expire: F) -> usize
    where
        F: FnMut(TimerId, D),
    {
        let mut fired = 0;
        while let Some(head) = self.head {
            if self.node(head).expire > now {
                break;
            }
            let id = TimerId {
                index: head,
                generation: self.generations[head],
            };
            if let Some(data) = self.remove(id) {
                on_expire(id, data);
                fired += 1;
            }
        }
        fired
    }

    fn live(&self, id: TimerId) -> Option<usize> {
        let generation = *self.generations.get(id.index)?;
        if generation != id.generation {
            return None;
        }
        self.nodes[id.index].as_ref().map(|_| id.index)
    }

    fn node(&self, idx: usize) -> &TimerNode<D> {
        match &self.nodes[idx] {
            Some(node) => node,
            None => unreachable!("timer slot {idx} is linked but vacant"),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut TimerNode<D> {
        match &mut self.nodes[idx] {
            Some(node) => node,
            None => unreachable!("timer slot {idx} is linked but vacant"),
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node_mut(idx);
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    /// Links an unlinked node, scanning forward from `from` when given.
    fn link(&mut self, idx: usize, from: Option<usize>) {
        let expire = self.node(idx).expire;

        let (Some(head), Some(tail)) = (self.head, self.tail) else {
            self.head = Some(idx);
            self.tail = Some(idx);
            return;
        };

        let head_expire = self.node(head).expire;
        if expire < head_expire {
            self.insert_before(idx, head);
            return;
        }
        let tail_expire = self.node(tail).expire;
        if expire >= tail_expire {
            self.insert_after(idx, tail);
            return;
        }

        match from {
            Some(start) if self.node(start).expire <= expire => self.scan_forward(idx, start),
            Some(_) => self.scan_forward(idx, head),
            None if expire - head_expire <= tail_expire - expire => self.scan_forward(idx, head),
            None => self.scan_backward(idx, tail),
        }
    }

    // `start.expire <= expire < tail.expire`
    fn scan_forward(&mut self, idx: usize, start: usize) {
        let expire = self.node(idx).expire;
        let mut cur = start;
        while let Some(next) = self.node(cur).next {
            if expire < self.node(next).expire {
                self.insert_after(idx, cur);
                return;
            }
            cur = next;
        }
        self.insert_after(idx, cur);
    }

    // `head.expire <= expire < start.expire`
    fn scan_backward(&mut self, idx: usize, start: usize) {
        let expire = self.node(idx).expire;
        let mut cur = start;
        while let Some(prev) = self.node(cur).prev {
            if self.node(prev).expire <= expire {
                self.insert_before(idx, cur);
                return;
            }
            cur = prev;
        }
        self.insert_before(idx, cur);
    }

    fn insert_after(&mut self, idx: usize, at: usize) {
        let next = self.node(at).next;
        {
            let node = self.node_mut(idx);
            node.prev = Some(at);
            node.next = next;
        }
        self.node_mut(at).next = Some(idx);
        match next {
            Some(n) => self.node_mut(n).prev = Some(idx),
            None => self.tail = Some(idx),
        }
    }

    fn insert_before(&mut self, idx: usize, at: usize) {
        let prev = self.node(at).prev;
        {
            let node = self.node_mut(idx);
            node.prev = prev;
            node.next = Some(at);
        }
        self.node_mut(at).prev = Some(idx);
        match prev {
            Some(p) => self.node_mut(p).next = Some(idx),
            None => self.head = Some(idx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    /// Walks the list both ways, checking links and ascending order.
    fn assert_sorted<D: Clone>(list: &TimerList<D>) -> Vec<D> {
        let mut forward = Vec::new();
        let mut prev: Option<usize> = None;
        let mut cur = list.head;
        while let Some(idx) = cur {
            let node = list.node(idx);
            assert_eq!(node.prev, prev, "broken prev link at slot {idx}");
            if let Some(p) = prev {
                assert!(list.node(p).expire <= node.expire, "list out of order");
            }
            forward.push(node.data.clone());
            prev = Some(idx);
            cur = node.next;
        }
        assert_eq!(list.tail, prev);
        assert_eq!(forward.len(), list.len());
        forward
    }

    #[test]
    fn test_add_keeps_ascending_order() {
        let base = Instant::now();
        let mut list = TimerList::new();
        for (secs, name) in [(5, "e"), (1, "a"), (9, "i"), (3, "c"), (7, "g"), (2, "b"), (8, "h")] {
            list.add(at(base, secs), name);
            assert_sorted(&list);
        }
        assert_eq!(assert_sorted(&list), vec!["a", "b", "c", "e", "g", "h", "i"]);
        assert_eq!(list.next_expiry(), Some(at(base, 1)));
    }

    #[test]
    fn test_equal_expiries_keep_insertion_order() {
        let base = Instant::now();
        let mut list = TimerList::new();
        list.add(at(base, 4), 1);
        list.add(at(base, 4), 2);
        list.add(at(base, 4), 3);
        assert_eq!(assert_sorted(&list), vec![1, 2, 3]);
    }

    #[test]
    fn test_adjust_moves_forward_only_as_far_as_needed() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let a = list.add(at(base, 1), "a");
        list.add(at(base, 2), "b");
        let c = list.add(at(base, 3), "c");
        list.add(at(base, 4), "d");

        assert!(list.adjust(a, at(base, 3)));
        assert_eq!(assert_sorted(&list), vec!["b", "c", "a", "d"]);

        assert!(list.adjust(c, at(base, 10)));
        assert_eq!(assert_sorted(&list), vec!["b", "a", "d", "c"]);

        // Already in place: no movement.
        assert!(list.adjust(c, at(base, 11)));
        assert_eq!(assert_sorted(&list), vec!["b", "a", "d", "c"]);
        assert_eq!(list.expire_of(c), Some(at(base, 11)));
    }

    #[test]
    fn test_adjust_backwards_still_sorts() {
        let base = Instant::now();
        let mut list = TimerList::new();
        list.add(at(base, 1), "a");
        list.add(at(base, 5), "b");
        let c = list.add(at(base, 9), "c");

        assert!(list.adjust(c, at(base, 0)));
        assert_eq!(assert_sorted(&list), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_remove_unlinks_in_place() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let a = list.add(at(base, 1), "a");
        let b = list.add(at(base, 2), "b");
        let c = list.add(at(base, 3), "c");

        assert_eq!(list.remove(b), Some("b"));
        assert_eq!(assert_sorted(&list), vec!["a", "c"]);
        assert_eq!(list.remove(a), Some("a"));
        assert_eq!(list.remove(c), Some("c"));
        assert!(list.is_empty());
        assert_eq!(list.head, None);
        assert_eq!(list.tail, None);
    }

    #[test]
    fn test_stale_handles_are_rejected() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let a = list.add(at(base, 1), "a");
        assert_eq!(list.remove(a), Some("a"));
        assert_eq!(list.remove(a), None);
        assert!(!list.adjust(a, at(base, 2)));

        // The slot is reused under a new generation.
        let b = list.add(at(base, 2), "b");
        assert_eq!(list.get(a), None);
        assert_eq!(list.get(b), Some(&"b"));
        assert_eq!(list.remove(a), None);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_tick_before_first_expiry_is_noop() {
        let base = Instant::now();
        let mut list = TimerList::new();
        list.add(at(base, 5), "a");
        list.add(at(base, 6), "b");

        let fired = list.tick(at(base, 4), |_, _| panic!("nothing should expire"));
        assert_eq!(fired, 0);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_tick_drains_in_ascending_order_exactly_once() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let mut handles = Vec::new();
        for (secs, name) in [(3, "c"), (1, "a"), (2, "b")] {
            handles.push(list.add(at(base, secs), name));
        }

        let mut seen = Vec::new();
        assert_eq!(list.tick(at(base, 2), |_, name| seen.push(name)), 2);
        assert_eq!(seen, vec!["a", "b"]);
        assert_sorted(&list);

        assert_eq!(list.tick(at(base, 100), |_, name| seen.push(name)), 1);
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(list.is_empty());

        // Repeated ticks and late removals do not fire or free anything twice.
        assert_eq!(list.tick(at(base, 200), |_, name| seen.push(name)), 0);
        for id in handles {
            assert_eq!(list.remove(id), None);
        }
        assert_eq!(seen.len(), 3);
    }
}
