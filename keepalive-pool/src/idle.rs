// Copyright 2024 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The idle connection registry
//!
//! A doubly linked list whose nodes live in one `Vec`. The front holds the most recently
//! returned item, the back the least recently used one.
//!
//! - push front, pop front and pop back are all O(1).
//! - Freed slots are recycled, so the arena never grows beyond the peak idle count.
//! - The arena grows on demand and never shrinks, it stays at the peak idle count.

use std::mem::replace;

type Index = usize;
const NULL: Index = usize::MAX;
const HEAD: Index = 0;
const TAIL: Index = 1;
const OFFSET: usize = 2;

#[derive(Debug)]
struct Node<T> {
    prev: Index,
    next: Index,
    // None for the sentinels and for freed slots
    data: Option<T>,
}

// Functionally the same as vec![head, tail, data_nodes...]. The sentinels guard both ends of
// the list so that linking and unlinking never need to special case an empty list.
struct Nodes<T> {
    head: Node<T>,
    tail: Node<T>,
    data_nodes: Vec<Node<T>>,
}

impl<T> Nodes<T> {
    fn new() -> Self {
        Nodes {
            head: Node {
                prev: NULL,
                next: TAIL,
                data: None,
            },
            tail: Node {
                prev: HEAD,
                next: NULL,
                data: None,
            },
            data_nodes: vec![],
        }
    }

    fn new_node(&mut self, data: T) -> Index {
        self.data_nodes.push(Node {
            prev: NULL,
            next: NULL,
            data: Some(data),
        });
        self.data_nodes.len() - 1 + OFFSET
    }

    fn len(&self) -> usize {
        self.data_nodes.len()
    }
}

impl<T> std::ops::Index<usize> for Nodes<T> {
    type Output = Node<T>;

    fn index(&self, index: usize) -> &Self::Output {
        match index {
            HEAD => &self.head,
            TAIL => &self.tail,
            _ => &self.data_nodes[index - OFFSET],
        }
    }
}

impl<T> std::ops::IndexMut<usize> for Nodes<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        match index {
            HEAD => &mut self.head,
            TAIL => &mut self.tail,
            _ => &mut self.data_nodes[index - OFFSET],
        }
    }
}

/// An LRU ordered list of idle items.
///
/// The caller is expected to serialize access, the pool keeps it under its state mutex.
pub(crate) struct IdleList<T> {
    nodes: Nodes<T>,
    free: Vec<Index>, // freed slots to be used again
}

impl<T> IdleList<T> {
    /// Create an empty [IdleList].
    ///
    /// Nothing is preallocated: `max_idle` may be as large as `usize::MAX`.
    pub fn new() -> Self {
        IdleList {
            nodes: Nodes::new(),
            free: vec![],
        }
    }

    fn new_node(&mut self, data: T) -> Index {
        if let Some(index) = self.free.pop() {
            self.nodes[index].data = Some(data);
            index
        } else {
            self.nodes.new_node(data)
        }
    }

    /// How many items are in the list
    pub fn len(&self) -> usize {
        // freed slots are not linked
        self.nodes.len() - self.free.len()
    }

    // put a node right after the node at `at`
    fn insert_after(&mut self, node_index: Index, at: Index) {
        assert!(at != TAIL && at != node_index); // can't insert after tail or to itself

        let next = replace(&mut self.nodes[at].next, node_index);

        let node = &mut self.nodes[node_index];
        node.next = next;
        node.prev = at;

        self.nodes[next].prev = node_index;
    }

    /// Insert the item as the most recently returned one.
    pub fn push_front(&mut self, data: T) {
        let index = self.new_node(data);
        self.insert_after(index, HEAD);
    }

    // unlink the node, clear its links and release its slot
    fn remove(&mut self, index: Index) -> T {
        // can't touch the sentinels
        assert!(index != HEAD && index != TAIL);

        let node = &mut self.nodes[index];
        // clear the links so that a freed slot can never be walked into
        let prev = replace(&mut node.prev, NULL);
        let next = replace(&mut node.next, NULL);
        let data = node.data.take();

        // make sure this node was linked, not freed already
        assert!(prev != NULL && next != NULL);

        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.free.push(index);

        // linked nodes always carry data
        data.expect("linked idle node without data")
    }

    /// Detach and return the most recently returned item.
    pub fn pop_front(&mut self) -> Option<T> {
        let front = self.nodes.head.next;
        if front == TAIL {
            None
        } else {
            Some(self.remove(front))
        }
    }

    /// Detach and return the least recently used item.
    pub fn pop_back(&mut self) -> Option<T> {
        let back = self.nodes.tail.prev;
        if back == HEAD {
            None
        } else {
            Some(self.remove(back))
        }
    }

    /// Peek at the least recently used item.
    pub fn back(&self) -> Option<&T> {
        self.nodes[self.nodes.tail.prev].data.as_ref()
    }

    /// Iterate from the most recently returned item to the least recently used one.
    #[cfg(test)]
    fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            head: HEAD,
            tail: TAIL,
            len: self.len(),
        }
    }

    /// Consume the list, yielding its items front to back.
    pub fn drain(self) -> Drain<T> {
        Drain { list: self }
    }
}

impl<T> Default for IdleList<T> {
    fn default() -> Self {
        Self::new()
    }
}

// only the tests walk the list without consuming it
#[cfg(test)]
struct Iter<'a, T> {
    list: &'a IdleList<T>,
    head: Index,
    tail: Index,
    len: usize,
}

#[cfg(test)]
impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.len == 0 {
            return None;
        }
        let next_index = self.list.nodes[self.head].next;
        self.head = next_index;
        self.len -= 1;
        self.list.nodes[next_index].data.as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len, Some(self.len))
    }
}

#[cfg(test)]
impl<'a, T> DoubleEndedIterator for Iter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.len == 0 {
            return None;
        }
        let prev_index = self.list.nodes[self.tail].prev;
        self.tail = prev_index;
        self.len -= 1;
        self.list.nodes[prev_index].data.as_ref()
    }
}

/// The owning iterator returned by [IdleList::drain]
pub(crate) struct Drain<T> {
    list: IdleList<T>,
}

impl<T> Iterator for Drain<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.list.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.list.len(), Some(self.list.len()))
    }
}
