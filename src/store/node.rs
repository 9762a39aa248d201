use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use crate::utils::color::{combine, state_color, Color};
use crate::CellState;

use super::weak::{spin_lock, spin_unlock, WeakNode};
use super::NodeStore;

/// Children of a node: four cells at level 0, four canonical child
/// nodes above. Child pointers are non-owning; reachability is the
/// collector's business.
pub(super) enum Quads {
    Leaf([CellState; 4]),
    Branch([*const Node; 4]),
}

/// A quadtree node of level `L`, covering a `2^(L+1) x 2^(L+1)` square.
///
/// Structure (`level`, children, color) is immutable after interning;
/// everything else is bookkeeping for the store, the collector, and the
/// successor cache.
pub struct Node {
    level: u32,
    quads: Quads,
    color: Color,

    pub(super) refcount: AtomicU32,
    /// Mark bit; meaningful only between the clear and sweep phases.
    pub(super) used: AtomicBool,
    /// Bucket chain link, guarded by the bucket mutex.
    pub(super) chain: AtomicPtr<Node>,
    /// Transient roots-list link used while collecting.
    pub(super) gc_next: AtomicPtr<Node>,

    pub(super) weak_head: AtomicPtr<WeakNode>,
    pub(super) weak_lock: AtomicBool,
    pub(super) removing: AtomicBool,
    pub(super) testing_for_remove: AtomicBool,
    pub(super) weak_gets: AtomicUsize,

    /// Memoized successor. Weak on purpose: owning it would pin every
    /// successor a node ever had and the store would only ever grow.
    cache: WeakNode,
    cache_log_step: AtomicU32,
}

// Child pointers are only dereferenced while the tree they hang off is
// reachable, which the collector's mark phase preserves.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    fn with_quads(level: u32, quads: Quads, color: Color) -> Self {
        Self {
            level,
            quads,
            color,
            refcount: AtomicU32::new(0),
            used: AtomicBool::new(false),
            chain: AtomicPtr::new(std::ptr::null_mut()),
            gc_next: AtomicPtr::new(std::ptr::null_mut()),
            weak_head: AtomicPtr::new(std::ptr::null_mut()),
            weak_lock: AtomicBool::new(false),
            removing: AtomicBool::new(false),
            testing_for_remove: AtomicBool::new(false),
            weak_gets: AtomicUsize::new(0),
            cache: WeakNode::empty(),
            cache_log_step: AtomicU32::new(0),
        }
    }

    pub(super) fn new_leaf(cells: [CellState; 4]) -> Self {
        Self::with_quads(0, Quads::Leaf(cells), combine(cells.map(state_color)))
    }

    pub(super) fn new_branch(children: [&Node; 4]) -> Self {
        debug_assert!(children.iter().all(|c| c.level == children[0].level));
        Self::with_quads(
            children[0].level + 1,
            Quads::Branch(children.map(|c| c as *const Node)),
            combine(children.map(|c| c.color)),
        )
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    /// Aggregate display color of the whole square.
    pub fn color(&self) -> Color {
        self.color
    }

    pub(super) fn quads(&self) -> &Quads {
        &self.quads
    }

    fn child(&self, i: usize) -> &Node {
        match &self.quads {
            Quads::Branch(children) => unsafe { &*children[i] },
            Quads::Leaf(_) => unreachable!("leaf nodes have no child nodes"),
        }
    }

    pub fn nw(&self) -> &Node {
        self.child(0)
    }

    pub fn ne(&self) -> &Node {
        self.child(1)
    }

    pub fn sw(&self) -> &Node {
        self.child(2)
    }

    pub fn se(&self) -> &Node {
        self.child(3)
    }

    fn cell(&self, i: usize) -> CellState {
        match &self.quads {
            Quads::Leaf(cells) => cells[i],
            Quads::Branch(_) => unreachable!("branch nodes have no cells"),
        }
    }

    pub fn cell_nw(&self) -> CellState {
        self.cell(0)
    }

    pub fn cell_ne(&self) -> CellState {
        self.cell(1)
    }

    pub fn cell_sw(&self) -> CellState {
        self.cell(2)
    }

    pub fn cell_se(&self) -> CellState {
        self.cell(3)
    }

    /// The level-`L-1` node formed by the four grandchildren around the
    /// center. Requires level >= 1.
    pub fn center(&self, store: &NodeStore) -> NodeRef {
        assert!(self.level >= 1, "center of a leaf node");
        if self.level == 1 {
            store.find_or_insert_leaf(
                self.nw().cell_se(),
                self.ne().cell_sw(),
                self.sw().cell_ne(),
                self.se().cell_nw(),
            )
        } else {
            store.find_or_insert_branch(self.nw().se(), self.ne().sw(), self.sw().ne(), self.se().nw())
        }
    }

    /// Center quadrant advanced by the maximum step for this level,
    /// `2^(level-1)` generations.
    pub fn next_state(&self, store: &NodeStore) -> NodeRef {
        assert!(self.level >= 1, "next_state of a leaf node");
        if let Some(hit) = self.cache.get() {
            if self.cache_log_step.load(Ordering::Acquire) + 1 == self.level {
                return hit;
            }
        }

        let result = if self.level == 1 {
            self.step_cells(store)
        } else {
            // Nine overlapping subnodes one level down, advanced by
            // their own maximum step...
            let (nw, ne, sw, se) = (self.nw(), self.ne(), self.sw(), self.se());
            let t00 = nw.next_state(store);
            let t01 = store
                .find_or_insert_branch(nw.ne(), ne.nw(), nw.se(), ne.sw())
                .next_state(store);
            let t02 = ne.next_state(store);
            let t10 = store
                .find_or_insert_branch(nw.sw(), nw.se(), sw.nw(), sw.ne())
                .next_state(store);
            let t11 = store
                .find_or_insert_branch(nw.se(), ne.sw(), sw.ne(), se.nw())
                .next_state(store);
            let t12 = store
                .find_or_insert_branch(ne.sw(), ne.se(), se.nw(), se.ne())
                .next_state(store);
            let t20 = sw.next_state(store);
            let t21 = store
                .find_or_insert_branch(sw.ne(), se.nw(), sw.se(), se.sw())
                .next_state(store);
            let t22 = se.next_state(store);

            // ...then four more full steps double the distance.
            let s_nw = store
                .find_or_insert_branch(&t00, &t01, &t10, &t11)
                .next_state(store);
            let s_ne = store
                .find_or_insert_branch(&t01, &t02, &t11, &t12)
                .next_state(store);
            let s_sw = store
                .find_or_insert_branch(&t10, &t11, &t20, &t21)
                .next_state(store);
            let s_se = store
                .find_or_insert_branch(&t11, &t12, &t21, &t22)
                .next_state(store);
            store.find_or_insert_branch(&s_nw, &s_ne, &s_sw, &s_se)
        };

        self.cache.set(Some(&*result));
        self.cache_log_step.store(self.level - 1, Ordering::Release);
        result
    }

    /// Center quadrant advanced by `2^log_step` generations, for any
    /// `log_step` in `0..level`.
    pub fn next_state_by(&self, store: &NodeStore, log_step: u32) -> NodeRef {
        assert!(
            log_step + 1 <= self.level,
            "step 2^{} too large for level {}",
            log_step,
            self.level
        );
        if log_step + 1 == self.level {
            return self.next_state(store);
        }
        if let Some(hit) = self.cache.get() {
            if self.cache_log_step.load(Ordering::Acquire) == log_step {
                return hit;
            }
        }

        // Same nine-subnode composition as the full step, but the
        // second stage only reassembles in space: the whole advance
        // happens in the first stage.
        let (nw, ne, sw, se) = (self.nw(), self.ne(), self.sw(), self.se());
        let t00 = nw.next_state_by(store, log_step);
        let t01 = store
            .find_or_insert_branch(nw.ne(), ne.nw(), nw.se(), ne.sw())
            .next_state_by(store, log_step);
        let t02 = ne.next_state_by(store, log_step);
        let t10 = store
            .find_or_insert_branch(nw.sw(), nw.se(), sw.nw(), sw.ne())
            .next_state_by(store, log_step);
        let t11 = store
            .find_or_insert_branch(nw.se(), ne.sw(), sw.ne(), se.nw())
            .next_state_by(store, log_step);
        let t12 = store
            .find_or_insert_branch(ne.sw(), ne.se(), se.nw(), se.ne())
            .next_state_by(store, log_step);
        let t20 = sw.next_state_by(store, log_step);
        let t21 = store
            .find_or_insert_branch(sw.ne(), se.nw(), sw.se(), se.sw())
            .next_state_by(store, log_step);
        let t22 = se.next_state_by(store, log_step);

        let s_nw = store
            .find_or_insert_branch(&t00, &t01, &t10, &t11)
            .center(store);
        let s_ne = store
            .find_or_insert_branch(&t01, &t02, &t11, &t12)
            .center(store);
        let s_sw = store
            .find_or_insert_branch(&t10, &t11, &t20, &t21)
            .center(store);
        let s_se = store
            .find_or_insert_branch(&t11, &t12, &t21, &t22)
            .center(store);
        let result = store.find_or_insert_branch(&s_nw, &s_ne, &s_sw, &s_se);

        self.cache.set(Some(&*result));
        self.cache_log_step.store(log_step, Ordering::Release);
        result
    }

    /// Level-1 base case: the node is 4x4 cells, and each of the four
    /// center cells steps by one generation under the rule table.
    fn step_cells(&self, store: &NodeStore) -> NodeRef {
        let rule = store.rule();
        let (nw, ne, sw, se) = (self.nw(), self.ne(), self.sw(), self.se());
        let c_nw = rule.eval(
            nw.cell_se(),
            [
                nw.cell_nw(),
                nw.cell_ne(),
                ne.cell_nw(),
                nw.cell_sw(),
                ne.cell_sw(),
                sw.cell_nw(),
                sw.cell_ne(),
                se.cell_nw(),
            ],
        );
        let c_ne = rule.eval(
            ne.cell_sw(),
            [
                nw.cell_ne(),
                ne.cell_nw(),
                ne.cell_ne(),
                nw.cell_se(),
                ne.cell_se(),
                sw.cell_ne(),
                se.cell_nw(),
                se.cell_ne(),
            ],
        );
        let c_sw = rule.eval(
            sw.cell_ne(),
            [
                nw.cell_sw(),
                nw.cell_se(),
                ne.cell_sw(),
                sw.cell_nw(),
                se.cell_nw(),
                sw.cell_sw(),
                sw.cell_se(),
                se.cell_sw(),
            ],
        );
        let c_se = rule.eval(
            se.cell_nw(),
            [
                nw.cell_se(),
                ne.cell_sw(),
                ne.cell_se(),
                sw.cell_ne(),
                se.cell_ne(),
                sw.cell_se(),
                se.cell_sw(),
                se.cell_se(),
            ],
        );
        store.find_or_insert_leaf(c_nw, c_ne, c_sw, c_se)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.removing.store(true, Ordering::SeqCst);
        // Null out every weak handle observing this node before the
        // memory goes away.
        spin_lock(&self.weak_lock);
        let mut handle = self.weak_head.load(Ordering::Relaxed);
        while !handle.is_null() {
            handle = unsafe { &*handle }.clear_for_target_drop();
        }
        self.weak_head
            .store(std::ptr::null_mut(), Ordering::Relaxed);
        spin_unlock(&self.weak_lock);
        // The embedded successor handle unlinks itself from its own
        // target when the `cache` field drops.
    }
}

/// Owning handle: holds one refcount on the node, which makes the node
/// a collector root.
pub struct NodeRef {
    ptr: NonNull<Node>,
}

unsafe impl Send for NodeRef {}
unsafe impl Sync for NodeRef {}

impl NodeRef {
    pub(super) fn new(node: &Node) -> Self {
        node.refcount.fetch_add(1, Ordering::SeqCst);
        Self {
            ptr: NonNull::from(node),
        }
    }

    pub(crate) fn as_ptr(&self) -> *const Node {
        self.ptr.as_ptr()
    }
}

impl Deref for NodeRef {
    type Target = Node;

    fn deref(&self) -> &Node {
        unsafe { self.ptr.as_ref() }
    }
}

impl Clone for NodeRef {
    fn clone(&self) -> Self {
        NodeRef::new(self)
    }
}

impl Drop for NodeRef {
    fn drop(&mut self) {
        unsafe { self.ptr.as_ref() }
            .refcount
            .fetch_sub(1, Ordering::SeqCst);
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for NodeRef {}

impl std::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRef")
            .field("level", &self.level())
            .field("ptr", &self.ptr)
            .finish()
    }
}
