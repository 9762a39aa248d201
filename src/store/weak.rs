use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use super::node::{Node, NodeRef};

const SPIN_LIMIT: u32 = 10_000;

/// Acquire an atomic-flag spinlock, yielding the thread once busy
/// waiting has gone on long enough.
pub(super) fn spin_lock(flag: &AtomicBool) {
    let mut spins = 0;
    while flag.swap(true, Ordering::Acquire) {
        if spins < SPIN_LIMIT {
            spins += 1;
            std::hint::spin_loop();
        } else {
            std::thread::yield_now();
        }
    }
}

pub(super) fn spin_unlock(flag: &AtomicBool) {
    flag.store(false, Ordering::Release);
}

/// Non-owning handle to a node, registered in the target's intrusive
/// list so teardown of the target can null it out.
///
/// Every list operation takes locks front-most first: the target's list
/// head lock (or the predecessor handle's lock), then the handle's own.
pub struct WeakNode {
    target: AtomicPtr<Node>,
    prev: AtomicPtr<WeakNode>,
    next: AtomicPtr<WeakNode>,
    lock: AtomicBool,
}

impl WeakNode {
    pub const fn empty() -> Self {
        Self {
            target: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
            lock: AtomicBool::new(false),
        }
    }

    /// Retarget the handle: unlink from the old target's list, then link
    /// into the new one.
    pub fn set(&self, node: Option<&Node>) {
        let new = node.map_or(ptr::null_mut(), |n| n as *const Node as *mut Node);
        spin_lock(&self.lock);
        if self.target.load(Ordering::Relaxed) == new {
            spin_unlock(&self.lock);
            return;
        }
        spin_unlock(&self.lock);
        self.unlink();
        spin_lock(&self.lock);
        self.target.store(new, Ordering::Relaxed);
        spin_unlock(&self.lock);
        self.link();
    }

    /// Upgrade to a strong reference, unless the target is gone or a
    /// sweep is in the middle of deciding its fate.
    pub fn get(&self) -> Option<NodeRef> {
        spin_lock(&self.lock);
        let target = self.target.load(Ordering::Relaxed);
        if target.is_null() {
            spin_unlock(&self.lock);
            return None;
        }
        let node = unsafe { &*target };

        // Fence against the sweeper: it waits for in-flight upgrades to
        // drain after setting `testing_for_remove`, so back off while
        // the flag is up and re-register afterwards.
        node.weak_gets.fetch_add(1, Ordering::SeqCst);
        while node.testing_for_remove.load(Ordering::SeqCst) {
            node.weak_gets.fetch_sub(1, Ordering::SeqCst);
            while node.testing_for_remove.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
            node.weak_gets.fetch_add(1, Ordering::SeqCst);
        }

        let strong = NodeRef::new(node);
        node.weak_gets.fetch_sub(1, Ordering::SeqCst);

        if node.removing.load(Ordering::SeqCst) {
            spin_unlock(&self.lock);
            return None;
        }
        spin_unlock(&self.lock);
        Some(strong)
    }

    /// Push this handle at the head of its target's list.
    fn link(&self) {
        spin_lock(&self.lock);
        self.prev.store(ptr::null_mut(), Ordering::Relaxed);
        self.next.store(ptr::null_mut(), Ordering::Relaxed);
        let target = self.target.load(Ordering::Relaxed);
        if target.is_null() {
            spin_unlock(&self.lock);
            return;
        }
        let node = unsafe { &*target };
        spin_lock(&node.weak_lock);
        let head = node.weak_head.load(Ordering::Relaxed);
        if !head.is_null() {
            let h = unsafe { &*head };
            spin_lock(&h.lock);
            h.prev
                .store(self as *const WeakNode as *mut WeakNode, Ordering::Relaxed);
            spin_unlock(&h.lock);
        }
        self.next.store(head, Ordering::Relaxed);
        node.weak_head
            .store(self as *const WeakNode as *mut WeakNode, Ordering::Relaxed);
        spin_unlock(&self.lock);
        spin_unlock(&node.weak_lock);
    }

    /// Take this handle out of its target's list, if it is in one.
    fn unlink(&self) {
        loop {
            spin_lock(&self.lock);
            let target = self.target.load(Ordering::Relaxed);
            if target.is_null() {
                spin_unlock(&self.lock);
                return;
            }
            let prev = self.prev.load(Ordering::Relaxed);
            spin_unlock(&self.lock);

            let node = unsafe { &*target };
            let prev_lock = if prev.is_null() {
                &node.weak_lock
            } else {
                unsafe { &(*prev).lock }
            };
            spin_lock(prev_lock);
            spin_lock(&self.lock);

            // The predecessor (or the target itself) may have changed
            // while nothing was locked; start over if so.
            if self.target.load(Ordering::Relaxed) != target
                || self.prev.load(Ordering::Relaxed) != prev
            {
                spin_unlock(&self.lock);
                spin_unlock(prev_lock);
                continue;
            }

            let next = self.next.load(Ordering::Relaxed);
            if prev.is_null() {
                node.weak_head.store(next, Ordering::Relaxed);
            } else {
                unsafe { &*prev }.next.store(next, Ordering::Relaxed);
            }
            if !next.is_null() {
                let n = unsafe { &*next };
                spin_lock(&n.lock);
                n.prev.store(prev, Ordering::Relaxed);
                spin_unlock(&n.lock);
            }
            self.prev.store(ptr::null_mut(), Ordering::Relaxed);
            self.next.store(ptr::null_mut(), Ordering::Relaxed);
            spin_unlock(&self.lock);
            spin_unlock(prev_lock);
            return;
        }
    }

    /// Called by a node's teardown on each handle in its list, with the
    /// list head lock already held.
    pub(super) fn clear_for_target_drop(&self) -> *mut WeakNode {
        spin_lock(&self.lock);
        let next = self.next.load(Ordering::Relaxed);
        self.target.store(ptr::null_mut(), Ordering::Relaxed);
        self.prev.store(ptr::null_mut(), Ordering::Relaxed);
        self.next.store(ptr::null_mut(), Ordering::Relaxed);
        spin_unlock(&self.lock);
        next
    }
}

impl Drop for WeakNode {
    fn drop(&mut self) {
        self.unlink();
    }
}
