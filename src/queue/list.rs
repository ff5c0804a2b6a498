//! Arena-backed doubly linked queue of pull requests.
//!
//! Nodes live in a `Vec` of slots and refer to each other through [`NodeId`]
//! handles. A side index maps pull request numbers to handles so that
//! promote, demote and remove never walk the list.
//!
//! # Invariants
//!
//! - Every node reachable from `head` has an index entry pointing at it, and
//!   every index entry points at a reachable node.
//! - `head.prev` and `tail.next` are always `None`.
//! - Walking `next` from `head` and `prev` from `tail` visit the same nodes in
//!   opposite orders.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::QueueError;
use crate::types::{PrNumber, PullRequestRef};

/// Stable handle to a slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    pr: PullRequestRef,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// One entry of a serialized queue. Positions start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMember {
    pub pr: PullRequestRef,
    pub position: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MergeQueue {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    index: HashMap<PrNumber, NodeId>,
}

impl MergeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, number: PrNumber) -> bool {
        self.index.contains_key(&number)
    }

    /// Appends a pull request at the tail.
    pub fn push(&mut self, pr: PullRequestRef) -> Result<NodeId, QueueError> {
        if self.contains(pr.number) {
            return Err(QueueError::Duplicate(pr.number));
        }

        let number = pr.number;
        let id = self.alloc(Node {
            pr,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.index.insert(number, id);
        Ok(id)
    }

    /// Inserts a pull request at the head, ahead of everything queued.
    pub fn push_front(&mut self, pr: PullRequestRef) -> Result<NodeId, QueueError> {
        if self.contains(pr.number) {
            return Err(QueueError::Duplicate(pr.number));
        }

        let number = pr.number;
        let id = self.alloc(Node {
            pr,
            prev: None,
            next: self.head,
        });
        match self.head {
            Some(head) => self.node_mut(head).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.index.insert(number, id);
        Ok(id)
    }

    /// Removes and returns the head.
    pub fn pop(&mut self) -> Option<PullRequestRef> {
        let head = self.head?;
        Some(self.unlink(head))
    }

    pub fn peek(&self) -> Option<&PullRequestRef> {
        self.head.map(|id| &self.node(id).pr)
    }

    /// Removes a pull request wherever it sits in the queue.
    pub fn remove(&mut self, number: PrNumber) -> Option<PullRequestRef> {
        let id = *self.index.get(&number)?;
        Some(self.unlink(id))
    }

    /// Swaps a pull request with its predecessor.
    ///
    /// Returns false, leaving the queue untouched, when the number is unknown
    /// or already at the head.
    pub fn promote(&mut self, number: PrNumber) -> bool {
        let Some(&id) = self.index.get(&number) else {
            return false;
        };
        match self.node(id).prev {
            Some(prev) => {
                self.swap_with_next(prev);
                true
            }
            None => false,
        }
    }

    /// Swaps a pull request with its successor.
    ///
    /// Returns false, leaving the queue untouched, when the number is unknown
    /// or already at the tail.
    pub fn demote(&mut self, number: PrNumber) -> bool {
        let Some(&id) = self.index.get(&number) else {
            return false;
        };
        if self.node(id).next.is_some() {
            self.swap_with_next(id);
            true
        } else {
            false
        }
    }

    /// Iterates head to tail.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    /// Flattens the queue head to tail, numbering positions from 1.
    pub fn serialize(&self) -> Vec<QueueMember> {
        self.iter()
            .enumerate()
            .map(|(i, pr)| QueueMember {
                pr: pr.clone(),
                position: i + 1,
            })
            .collect()
    }

    /// Rebuilds a queue from its serialized form, ordering by position.
    pub fn deserialize(mut members: Vec<QueueMember>) -> Result<Self, QueueError> {
        members.sort_by_key(|m| m.position);
        let mut queue = MergeQueue::new();
        for member in members {
            queue.push(member.pr)?;
        }
        Ok(queue)
    }

    /// Exchanges `a` with the node right after it.
    fn swap_with_next(&mut self, a: NodeId) {
        let Some(b) = self.node(a).next else {
            return;
        };
        let before = self.node(a).prev;
        let after = self.node(b).next;

        match before {
            Some(p) => self.node_mut(p).next = Some(b),
            None => self.head = Some(b),
        }
        match after {
            Some(n) => self.node_mut(n).prev = Some(a),
            None => self.tail = Some(a),
        }

        let node_b = self.node_mut(b);
        node_b.prev = before;
        node_b.next = Some(a);

        let node_a = self.node_mut(a);
        node_a.prev = Some(b);
        node_a.next = after;
    }

    fn unlink(&mut self, id: NodeId) -> PullRequestRef {
        let node = self.slots[id.0].take().unwrap_or_else(|| unreachable!("dangling node handle"));
        match node.prev {
            Some(p) => self.node_mut(p).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.node_mut(n).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.index.remove(&node.pr.number);
        self.free.push(id.0);
        node.pr
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        self.slots[id.0]
            .as_ref()
            .unwrap_or_else(|| unreachable!("dangling node handle"))
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id.0]
            .as_mut()
            .unwrap_or_else(|| unreachable!("dangling node handle"))
    }

    /// Checks the structural invariants listed in the module docs.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut forward = Vec::new();
        let mut cursor = self.head;
        let mut prev = None;
        while let Some(id) = cursor {
            let node = self.node(id);
            assert_eq!(node.prev, prev, "prev link of {} is wrong", node.pr.number);
            assert_eq!(self.index.get(&node.pr.number), Some(&id));
            forward.push(id);
            prev = Some(id);
            cursor = node.next;
        }
        assert_eq!(self.tail, prev);
        assert_eq!(forward.len(), self.index.len());

        let mut backward = Vec::new();
        let mut cursor = self.tail;
        while let Some(id) = cursor {
            backward.push(id);
            cursor = self.node(id).prev;
        }
        backward.reverse();
        assert_eq!(forward, backward);
    }
}

pub struct Iter<'a> {
    queue: &'a MergeQueue,
    cursor: Option<NodeId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a PullRequestRef;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.queue.node(self.cursor?);
        self.cursor = node.next;
        Some(&node.pr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pr(n: u64) -> PullRequestRef {
        PullRequestRef::new(n, format!("feature-{n}"), "main")
    }

    fn queue_of(numbers: &[u64]) -> MergeQueue {
        let mut q = MergeQueue::new();
        for &n in numbers {
            q.push(pr(n)).unwrap();
        }
        q
    }

    fn order(q: &MergeQueue) -> Vec<u64> {
        q.iter().map(|p| p.number.0).collect()
    }

    // ─── Basic queue operations ───────────────────────────────────────────────

    #[test]
    fn push_pop_is_fifo() {
        let mut q = queue_of(&[1, 2, 3]);
        assert_eq!(q.peek().map(|p| p.number), Some(PrNumber(1)));
        assert_eq!(q.pop().map(|p| p.number.0), Some(1));
        assert_eq!(q.pop().map(|p| p.number.0), Some(2));
        assert_eq!(q.pop().map(|p| p.number.0), Some(3));
        assert!(q.pop().is_none());
        assert!(q.is_empty());
        q.assert_consistent();
    }

    #[test]
    fn duplicate_push_is_rejected() {
        let mut q = queue_of(&[1]);
        assert!(matches!(q.push(pr(1)), Err(QueueError::Duplicate(PrNumber(1)))));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn push_front_goes_ahead() {
        let mut q = queue_of(&[1, 2]);
        q.push_front(pr(9)).unwrap();
        assert_eq!(order(&q), vec![9, 1, 2]);
        q.assert_consistent();
    }

    #[test]
    fn remove_by_number_from_middle() {
        let mut q = queue_of(&[1, 2, 3]);
        assert_eq!(q.remove(PrNumber(2)).map(|p| p.number.0), Some(2));
        assert_eq!(order(&q), vec![1, 3]);
        assert!(q.remove(PrNumber(2)).is_none());
        q.assert_consistent();
    }

    #[test]
    fn slots_are_reused_after_pop() {
        let mut q = queue_of(&[1, 2]);
        q.pop();
        q.push(pr(3)).unwrap();
        assert_eq!(q.slots.len(), 2);
        assert_eq!(order(&q), vec![2, 3]);
        q.assert_consistent();
    }

    // ─── Reordering ───────────────────────────────────────────────────────────

    #[test]
    fn promote_swaps_with_predecessor() {
        let mut q = queue_of(&[1, 2, 3, 4]);
        assert!(q.promote(PrNumber(4)));
        assert_eq!(order(&q), vec![1, 2, 4, 3]);
        q.assert_consistent();
    }

    #[test]
    fn demote_swaps_with_successor() {
        let mut q = queue_of(&[1, 2, 3, 4]);
        assert!(q.demote(PrNumber(2)));
        assert_eq!(order(&q), vec![1, 3, 2, 4]);
        q.assert_consistent();
    }

    #[test]
    fn promote_second_becomes_head() {
        let mut q = queue_of(&[1, 2]);
        assert!(q.promote(PrNumber(2)));
        assert_eq!(order(&q), vec![2, 1]);
        assert_eq!(q.peek().map(|p| p.number.0), Some(2));
        q.assert_consistent();
    }

    #[test]
    fn boundaries_are_noops() {
        let mut q = queue_of(&[1, 2, 3]);
        assert!(!q.promote(PrNumber(1)));
        assert!(!q.demote(PrNumber(3)));
        assert_eq!(order(&q), vec![1, 2, 3]);
        q.assert_consistent();
    }

    #[test]
    fn unknown_number_is_ignored() {
        let mut q = queue_of(&[1, 2, 3]);
        assert!(!q.promote(PrNumber(42)));
        assert!(!q.demote(PrNumber(42)));
        assert_eq!(order(&q), vec![1, 2, 3]);
    }

    // ─── Serialization ────────────────────────────────────────────────────────

    #[test]
    fn serialize_numbers_positions_from_one() {
        let q = queue_of(&[5, 3]);
        let members = q.serialize();
        assert_eq!(members[0].position, 1);
        assert_eq!(members[0].pr.number, PrNumber(5));
        assert_eq!(members[1].position, 2);
    }

    #[test]
    fn deserialize_orders_by_position() {
        let members = vec![
            QueueMember { pr: pr(2), position: 2 },
            QueueMember { pr: pr(1), position: 1 },
        ];
        let q = MergeQueue::deserialize(members).unwrap();
        assert_eq!(order(&q), vec![1, 2]);
        q.assert_consistent();
    }

    #[test]
    fn deserialize_rejects_duplicates() {
        let members = vec![
            QueueMember { pr: pr(1), position: 1 },
            QueueMember { pr: pr(1), position: 2 },
        ];
        assert!(matches!(
            MergeQueue::deserialize(members),
            Err(QueueError::Duplicate(PrNumber(1)))
        ));
    }

    // ─── Properties ───────────────────────────────────────────────────────────

    #[derive(Debug, Clone)]
    enum Op {
        Push(u64),
        PushFront(u64),
        Pop,
        Remove(u64),
        Promote(u64),
        Demote(u64),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..20).prop_map(Op::Push),
            (0u64..20).prop_map(Op::PushFront),
            Just(Op::Pop),
            (0u64..20).prop_map(Op::Remove),
            (0u64..20).prop_map(Op::Promote),
            (0u64..20).prop_map(Op::Demote),
        ]
    }

    proptest! {
        #[test]
        fn fifo_order_preserved(numbers in prop::collection::hash_set(0u64..1000, 0..30)) {
            let numbers: Vec<u64> = numbers.into_iter().collect();
            let mut q = queue_of(&numbers);
            let mut popped = Vec::new();
            while let Some(p) = q.pop() {
                popped.push(p.number.0);
            }
            prop_assert_eq!(popped, numbers);
        }

        #[test]
        fn invariants_hold_under_any_operations(ops in prop::collection::vec(arb_op(), 0..60)) {
            let mut q = MergeQueue::new();
            for op in ops {
                match op {
                    Op::Push(n) => { let _ = q.push(pr(n)); }
                    Op::PushFront(n) => { let _ = q.push_front(pr(n)); }
                    Op::Pop => { q.pop(); }
                    Op::Remove(n) => { q.remove(PrNumber(n)); }
                    Op::Promote(n) => { q.promote(PrNumber(n)); }
                    Op::Demote(n) => { q.demote(PrNumber(n)); }
                }
                q.assert_consistent();
            }
        }

        #[test]
        fn promote_then_demote_restores_order(len in 3usize..12, pick in 0usize..100) {
            let numbers: Vec<u64> = (1..=len as u64).collect();
            let mut q = queue_of(&numbers);
            // interior nodes only
            let target = numbers[1 + pick % (len - 2)];
            prop_assert!(q.promote(PrNumber(target)));
            prop_assert!(q.demote(PrNumber(target)));
            prop_assert_eq!(order(&q), numbers);
            q.assert_consistent();
        }

        #[test]
        fn serialize_round_trip(numbers in prop::collection::hash_set(0u64..1000, 0..30)) {
            let numbers: Vec<u64> = numbers.into_iter().collect();
            let q = queue_of(&numbers);
            let back = MergeQueue::deserialize(q.serialize()).unwrap();
            prop_assert_eq!(order(&back), numbers.clone());
            back.assert_consistent();
            for n in numbers {
                prop_assert!(back.contains(PrNumber(n)));
            }
        }
    }
}
