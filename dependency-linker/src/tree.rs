use std::collections::{HashMap, VecDeque};

use api_structs::SpanId;
use tracing::debug;

use crate::span::LinkSpan;

/// Content of a tree node: either a real registered value, or the synthetic
/// root introduced to unify a rootless, multi-rooted or cyclic set of
/// registrations into one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeValue<V> {
    Real(V),
    Synthetic,
}

#[derive(Debug)]
struct Node<V> {
    value: NodeValue<V>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// A single rooted tree over a flat arena of nodes addressed by index.
/// Building never fails: malformed parent references degrade into children of
/// a synthetic root. Read-only after [`TreeBuilder::build`].
#[derive(Debug)]
pub struct Tree<V> {
    nodes: Vec<Node<V>>,
    root: usize,
}

pub type SpanTree = Tree<LinkSpan>;

impl<V> Tree<V> {
    pub fn root(&self) -> NodeRef<'_, V> {
        NodeRef {
            tree: self,
            idx: self.root,
        }
    }

    /// Breadth-first iterator over all nodes, starting at the root. Children
    /// are visited in first-registration order. Single pass; traverse again
    /// by calling this again.
    pub fn traverse(&self) -> BreadthFirst<'_, V> {
        let mut queue = VecDeque::new();
        queue.push_back(self.root);
        BreadthFirst { tree: self, queue }
    }
}

/// Cheap handle to one node of a [`Tree`].
#[derive(Debug)]
pub struct NodeRef<'a, V> {
    tree: &'a Tree<V>,
    idx: usize,
}

impl<'a, V> Clone for NodeRef<'a, V> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<'a, V> Copy for NodeRef<'a, V> {}

impl<'a, V> NodeRef<'a, V> {
    pub fn value(&self) -> &'a NodeValue<V> {
        &self.tree.nodes[self.idx].value
    }

    pub fn parent(&self) -> Option<NodeRef<'a, V>> {
        self.tree.nodes[self.idx].parent.map(|idx| NodeRef {
            tree: self.tree,
            idx,
        })
    }

    pub fn is_root(&self) -> bool {
        self.idx == self.tree.root
    }
}

pub struct BreadthFirst<'a, V> {
    tree: &'a Tree<V>,
    queue: VecDeque<usize>,
}

impl<'a, V> Iterator for BreadthFirst<'a, V> {
    type Item = NodeRef<'a, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.queue.pop_front()?;
        self.queue
            .extend(self.tree.nodes[idx].children.iter().copied());
        Some(NodeRef {
            tree: self.tree,
            idx,
        })
    }
}

struct Registration<V> {
    id: SpanId,
    parent_id: Option<SpanId>,
    value: V,
}

/// Accumulates (parent id, id, value) registrations in any order and builds a
/// single tree from them. Tolerates duplicate ids (first registration wins),
/// dangling parent references, multiple roots and parent cycles.
pub struct TreeBuilder<V> {
    registrations: Vec<Registration<V>>,
    index_by_id: HashMap<SpanId, usize>,
}

impl<V> Default for TreeBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TreeBuilder<V> {
    pub fn new() -> Self {
        TreeBuilder {
            registrations: vec![],
            index_by_id: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, parent_id: Option<SpanId>, id: SpanId, value: V) {
        if self.index_by_id.contains_key(&id) {
            debug!(%id, "duplicate span id, keeping the first registration");
            return;
        }
        self.index_by_id.insert(id.clone(), self.registrations.len());
        self.registrations.push(Registration {
            id,
            parent_id,
            value,
        });
    }

    /// Resolves all registrations into one tree. If exactly one registration
    /// has no parent id and every declared parent resolves without looping,
    /// that registration is the root. Otherwise a synthetic root is inserted
    /// and every root candidate and every orphan becomes its direct child,
    /// in first-registration order.
    pub fn build(self) -> Tree<V> {
        let n = self.registrations.len();

        // resolve declared parents to registration indexes; self references
        // count as dangling
        let mut parent: Vec<Option<usize>> = Vec::with_capacity(n);
        let mut orphan: Vec<bool> = vec![false; n];
        for (i, reg) in self.registrations.iter().enumerate() {
            match &reg.parent_id {
                None => parent.push(None),
                Some(declared) => match self.index_by_id.get(declared).copied() {
                    Some(j) if j != i => parent.push(Some(j)),
                    _ => {
                        debug!(id = %reg.id, "span references a parent that was never reported");
                        parent.push(None);
                        orphan[i] = true;
                    }
                },
            }
        }

        // break parent cycles: a chain that loops back on itself is cut at
        // its first-registered member, which then behaves like an orphan
        let mut state = vec![0u8; n]; // 0 unvisited, 1 on current chain, 2 settled
        for i in 0..n {
            if state[i] != 0 {
                continue;
            }
            let mut chain: Vec<usize> = vec![];
            let mut current = i;
            loop {
                match state[current] {
                    2 => break,
                    1 => {
                        let loop_start = chain
                            .iter()
                            .position(|&c| c == current)
                            .expect("looping node is on the current chain");
                        let cut = chain[loop_start..]
                            .iter()
                            .copied()
                            .min()
                            .expect("cycle has at least one member");
                        debug!(
                            id = %self.registrations[cut].id,
                            "parent references form a cycle, detaching its first reported span"
                        );
                        parent[cut] = None;
                        orphan[cut] = true;
                        break;
                    }
                    _ => {
                        state[current] = 1;
                        chain.push(current);
                        match parent[current] {
                            Some(p) => current = p,
                            None => break,
                        }
                    }
                }
            }
            for c in chain {
                state[c] = 2;
            }
        }

        let root_candidates: Vec<usize> = (0..n)
            .filter(|&i| parent[i].is_none() && !orphan[i])
            .collect();
        let any_orphan = orphan.iter().any(|&o| o);
        let needs_synthetic_root = root_candidates.len() != 1 || any_orphan;

        let mut nodes: Vec<Node<V>> = self
            .registrations
            .into_iter()
            .map(|reg| Node {
                value: NodeValue::Real(reg.value),
                parent: None,
                children: vec![],
            })
            .collect();
        let root = if needs_synthetic_root {
            debug!(
                root_candidates = root_candidates.len(),
                "trace does not form a single tree, inserting a synthetic root"
            );
            nodes.push(Node {
                value: NodeValue::Synthetic,
                parent: None,
                children: vec![],
            });
            n
        } else {
            root_candidates[0]
        };

        for i in 0..n {
            let p = match parent[i] {
                Some(p) => p,
                None => {
                    if i == root {
                        continue;
                    }
                    root
                }
            };
            nodes[i].parent = Some(p);
            nodes[p].children.push(i);
        }

        Tree { nodes, root }
    }
}
