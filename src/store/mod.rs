mod node;
mod weak;

pub use node::{Node, NodeRef};

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::utils::format_int::NiceInt;
use crate::{config, CellState, Rule};

use node::Quads;

/// Bucket count of the canonical table. Prime, so the weak mixing in
/// the node hash still spreads structured child indices.
const BUCKET_COUNT: usize = 1_008_863;

struct ChainHead(*mut Node);

// Bucket heads are only touched under the owning bucket's mutex.
unsafe impl Send for ChainHead {}

struct Bucket {
    head: Mutex<ChainHead>,
}

/// Hash-consed set of quadtree nodes.
///
/// `find_or_insert_*` returns *the* canonical node for a child tuple:
/// two structurally equal tuples always come back as the same
/// allocation, which is what makes successor caches shareable across
/// the whole universe. The store owns the rule table, since cached
/// successors are only meaningful under the rule they were computed
/// with.
pub struct NodeStore {
    rule: Rule,
    // Declared before `buckets` so the strong references drop before
    // the nodes they point to are freed.
    null_nodes: Mutex<Vec<Vec<NodeRef>>>,
    buckets: Box<[Bucket]>,
    node_count: AtomicUsize,
    running_gc: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NodeStore {
    pub fn new(rule: Rule) -> Self {
        Self {
            rule,
            null_nodes: Mutex::new(Vec::new()),
            buckets: (0..BUCKET_COUNT)
                .map(|_| Bucket {
                    head: Mutex::new(ChainHead(ptr::null_mut())),
                })
                .collect(),
            node_count: AtomicUsize::new(0),
            running_gc: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn node_count(&self) -> usize {
        self.node_count.load(Ordering::Relaxed)
    }

    fn hash_parts(a: usize, b: usize, c: usize, d: usize) -> usize {
        let h = a
            .wrapping_mul(5)
            .wrapping_add(b.wrapping_mul(17))
            .wrapping_add(c.wrapping_mul(257))
            .wrapping_add(d.wrapping_mul(65537));
        h.wrapping_add(h >> 11)
    }

    /// The unique level-0 node holding these four cells.
    pub fn find_or_insert_leaf(
        &self,
        nw: CellState,
        ne: CellState,
        sw: CellState,
        se: CellState,
    ) -> NodeRef {
        self.before_alloc();
        let bucket =
            &self.buckets[Self::hash_parts(nw as usize, ne as usize, sw as usize, se as usize)
                % BUCKET_COUNT];
        let mut head = bucket.head.lock();

        let mut prev: *mut Node = ptr::null_mut();
        let mut cur = head.0;
        while !cur.is_null() {
            let n = unsafe { &*cur };
            if let Quads::Leaf(cells) = n.quads() {
                if *cells == [nw, ne, sw, se] {
                    self.move_to_front(&mut head, prev, cur);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return NodeRef::new(n);
                }
            }
            prev = cur;
            cur = n.chain.load(Ordering::Relaxed);
        }

        self.insert(&mut head, Node::new_leaf([nw, ne, sw, se]))
    }

    /// The unique node one level above these four children. The
    /// children must share a level.
    pub fn find_or_insert_branch(&self, nw: &Node, ne: &Node, sw: &Node, se: &Node) -> NodeRef {
        self.before_alloc();
        let key = [
            nw as *const Node,
            ne as *const Node,
            sw as *const Node,
            se as *const Node,
        ];
        let bucket = &self.buckets[Self::hash_parts(
            key[0] as usize,
            key[1] as usize,
            key[2] as usize,
            key[3] as usize,
        ) % BUCKET_COUNT];
        let mut head = bucket.head.lock();

        let mut prev: *mut Node = ptr::null_mut();
        let mut cur = head.0;
        while !cur.is_null() {
            let n = unsafe { &*cur };
            if let Quads::Branch(children) = n.quads() {
                if *children == key {
                    self.move_to_front(&mut head, prev, cur);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return NodeRef::new(n);
                }
            }
            prev = cur;
            cur = n.chain.load(Ordering::Relaxed);
        }

        self.insert(&mut head, Node::new_branch([nw, ne, sw, se]))
    }

    /// Hot chains keep their recently used nodes at the head. Not
    /// needed for correctness.
    fn move_to_front(&self, head: &mut ChainHead, prev: *mut Node, cur: *mut Node) {
        if prev.is_null() {
            return;
        }
        unsafe {
            let next = (*cur).chain.load(Ordering::Relaxed);
            (*prev).chain.store(next, Ordering::Relaxed);
            (*cur).chain.store(head.0, Ordering::Relaxed);
        }
        head.0 = cur;
    }

    fn insert(&self, head: &mut ChainHead, node: Node) -> NodeRef {
        let ptr = Box::into_raw(Box::new(node));
        unsafe { &*ptr }.chain.store(head.0, Ordering::Relaxed);
        head.0 = ptr;
        self.node_count.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        NodeRef::new(unsafe { &*ptr })
    }

    /// The unique node of `level` whose cells are all `background`.
    /// Memoized per background value, built bottom-up on first request.
    pub fn null_node(&self, level: u32, background: CellState) -> NodeRef {
        let mut table = self.null_nodes.lock();
        let by_level = {
            let idx = background as usize;
            if idx >= table.len() {
                table.resize_with(idx + 1, Vec::new);
            }
            &mut table[idx]
        };
        while by_level.len() <= level as usize {
            let next = match by_level.last() {
                None => self.find_or_insert_leaf(background, background, background, background),
                Some(prev) => self.find_or_insert_branch(prev, prev, prev, prev),
            };
            by_level.push(next);
        }
        by_level[level as usize].clone()
    }

    /// Level-1 node from 16 cells, row-major over the 4x4 square.
    pub fn make_4x4(&self, c: [CellState; 16]) -> NodeRef {
        let nw = self.find_or_insert_leaf(c[0], c[1], c[4], c[5]);
        let ne = self.find_or_insert_leaf(c[2], c[3], c[6], c[7]);
        let sw = self.find_or_insert_leaf(c[8], c[9], c[12], c[13]);
        let se = self.find_or_insert_leaf(c[10], c[11], c[14], c[15]);
        self.find_or_insert_branch(&nw, &ne, &sw, &se)
    }

    /// Admission check run by every allocating operation. One caller
    /// wins the flag and collects; the rest pause until it finishes, so
    /// the sweep never races an insertion. If a full collection cannot
    /// get back under the ceiling the engine is out of memory, and
    /// partial recovery would corrupt the universe.
    fn before_alloc(&self) {
        let cfg = config::get_config();
        if self.node_count.load(Ordering::Relaxed) <= cfg.gc_start_threshold {
            return;
        }
        if self.running_gc.swap(true, Ordering::Acquire) {
            while self.running_gc.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
        } else {
            self.collect();
            self.running_gc.store(false, Ordering::Release);
        }
        if self.node_count.load(Ordering::Relaxed) > cfg.max_node_count {
            error!(
                node_count = self.node_count.load(Ordering::Relaxed),
                max_node_count = cfg.max_node_count,
                "out of memory"
            );
            std::process::exit(1);
        }
    }

    /// Collect now, regardless of the threshold, unless a collection is
    /// already running.
    pub fn run_gc(&self) {
        if !self.running_gc.swap(true, Ordering::Acquire) {
            self.collect();
            self.running_gc.store(false, Ordering::Release);
        }
    }

    fn collect(&self) {
        let before = self.node_count.load(Ordering::Relaxed);
        let roots = self.clear_marks_and_collect_roots();
        Self::mark_from_roots(roots);
        self.sweep();
        debug!(
            before,
            after = self.node_count.load(Ordering::Relaxed),
            "collected node store"
        );
    }

    /// Phase 1: reset every mark to "used iff externally referenced"
    /// and thread the externally referenced nodes onto a transient
    /// roots list.
    fn clear_marks_and_collect_roots(&self) -> *const Node {
        let mut roots: *const Node = ptr::null();
        for bucket in self.buckets.iter() {
            let head = bucket.head.lock();
            let mut cur = head.0 as *const Node;
            while !cur.is_null() {
                let n = unsafe { &*cur };
                let used = n.refcount.load(Ordering::SeqCst) > 0;
                n.used.store(used, Ordering::Relaxed);
                if used {
                    n.gc_next.store(roots as *mut Node, Ordering::Relaxed);
                    roots = cur;
                }
                cur = n.chain.load(Ordering::Relaxed);
            }
        }
        roots
    }

    /// Phase 2: mark everything reachable from the roots through child
    /// edges. Successor caches are weak handles and deliberately not
    /// traced; evicted successors are recomputed on demand, which is
    /// what keeps a long-running engine's memory bounded.
    fn mark_from_roots(mut roots: *const Node) {
        fn mark(node: &Node) {
            if node.used.load(Ordering::Relaxed) {
                return;
            }
            node.used.store(true, Ordering::Relaxed);
            if let Quads::Branch(children) = node.quads() {
                for &child in children {
                    mark(unsafe { &*child });
                }
            }
        }

        while !roots.is_null() {
            let n = unsafe { &*roots };
            roots = n.gc_next.load(Ordering::Relaxed) as *const Node;
            n.gc_next.store(ptr::null_mut(), Ordering::Relaxed);
            if let Quads::Branch(children) = n.quads() {
                for &child in children {
                    mark(unsafe { &*child });
                }
            }
        }
    }

    /// Phase 3: unlink and free every unmarked node, fencing against
    /// concurrent weak-handle upgrades.
    fn sweep(&self) {
        for bucket in self.buckets.iter() {
            let mut head = bucket.head.lock();
            let mut prev: *mut Node = ptr::null_mut();
            let mut cur = head.0;
            while !cur.is_null() {
                let n = unsafe { &*cur };
                let mut keep = n.used.load(Ordering::Relaxed);
                if !keep {
                    n.testing_for_remove.store(true, Ordering::SeqCst);
                    while n.weak_gets.load(Ordering::SeqCst) > 0 {
                        std::thread::yield_now();
                    }
                    // An upgrade may have slipped in before the fence
                    // went up; a raised refcount saves the node for
                    // this cycle.
                    if n.refcount.load(Ordering::SeqCst) > 0 {
                        keep = true;
                    } else {
                        n.removing.store(true, Ordering::SeqCst);
                    }
                    n.testing_for_remove.store(false, Ordering::SeqCst);
                }

                let next = n.chain.load(Ordering::Relaxed);
                if keep {
                    prev = cur;
                } else {
                    if prev.is_null() {
                        head.0 = next;
                    } else {
                        unsafe { &*prev }.chain.store(next, Ordering::Relaxed);
                    }
                    self.node_count.fetch_sub(1, Ordering::Relaxed);
                    drop(unsafe { Box::from_raw(cur) });
                }
                cur = next;
            }
        }
    }

    /// Table statistics, cheap to compute.
    pub fn stats(&self) -> String {
        format!(
            "nodes: {}\nlookup misses / hits: {} / {}\n",
            NiceInt::from_usize(self.node_count()),
            NiceInt::from(self.misses.load(Ordering::Relaxed)),
            NiceInt::from(self.hits.load(Ordering::Relaxed)),
        )
    }
}

impl Drop for NodeStore {
    fn drop(&mut self) {
        // Release the memoized null nodes before tearing the table down.
        self.null_nodes.get_mut().clear();
        for bucket in self.buckets.iter() {
            let mut head = bucket.head.lock();
            let mut cur = head.0;
            head.0 = ptr::null_mut();
            drop(head);
            while !cur.is_null() {
                let boxed = unsafe { Box::from_raw(cur) };
                cur = boxed.chain.load(Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_are_canonical() {
        let store = NodeStore::new(Rule::life());
        let a = store.find_or_insert_leaf(0, 1, 2, 3);
        let b = store.find_or_insert_leaf(0, 1, 2, 3);
        let c = store.find_or_insert_leaf(3, 2, 1, 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.node_count(), 2);
    }

    #[test]
    fn branches_are_canonical() {
        let store = NodeStore::new(Rule::life());
        let leaf = store.find_or_insert_leaf(1, 0, 0, 0);
        let other = store.find_or_insert_leaf(0, 0, 0, 1);
        let a = store.find_or_insert_branch(&leaf, &other, &leaf, &other);
        let b = store.find_or_insert_branch(&leaf, &other, &leaf, &other);
        assert_eq!(a, b);
        assert_eq!(a.level(), 1);
    }

    #[test]
    fn canonical_across_threads() {
        let store = NodeStore::new(Rule::life());
        let ptrs: Vec<_> = std::thread::scope(|s| {
            (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let leaf = store.find_or_insert_leaf(1, 2, 3, 4);
                        let branch = store.find_or_insert_branch(&leaf, &leaf, &leaf, &leaf);
                        (leaf.as_ptr() as usize, branch.as_ptr() as usize)
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect()
        });
        assert!(ptrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn null_nodes_are_uniform_and_shared() {
        let store = NodeStore::new(Rule::life());
        let a = store.null_node(3, 0);
        let b = store.null_node(3, 0);
        assert_eq!(a, b);
        assert_eq!(a.level(), 3);
        assert!(ptr::eq(a.nw().nw(), a.se().se()));
        let live = store.null_node(3, 1);
        assert_ne!(a, live);
    }

    #[test]
    fn make_4x4_lays_cells_out_row_major() {
        let store = NodeStore::new(Rule::life());
        #[rustfmt::skip]
        let node = store.make_4x4([
            1, 2, 3, 4,
            5, 6, 7, 8,
            9, 10, 11, 12,
            13, 14, 15, 16,
        ]);
        assert_eq!(node.level(), 1);
        assert_eq!(node.nw().cell_nw(), 1);
        assert_eq!(Node::ne(&node).cell_ne(), 4);
        assert_eq!(node.nw().cell_se(), 6);
        assert_eq!(node.se().cell_nw(), 11);
        assert_eq!(node.sw().cell_sw(), 13);
        assert_eq!(node.se().cell_se(), 16);
    }

    #[test]
    fn gc_reclaims_unreferenced_nodes() {
        let store = NodeStore::new(Rule::life());
        let keep = store.find_or_insert_leaf(9, 9, 9, 9);
        {
            let mut prev = store.find_or_insert_leaf(1, 1, 1, 1);
            for _ in 0..10 {
                prev = store.find_or_insert_branch(&prev, &prev, &prev, &prev);
            }
        }
        let before = store.node_count();
        store.run_gc();
        assert!(store.node_count() < before);
        assert_eq!(store.node_count(), 1);
        let again = store.find_or_insert_leaf(9, 9, 9, 9);
        assert_eq!(keep, again);
    }
}
