use std::sync::atomic::{AtomicUsize, Ordering};

struct Config {
    max_node_count: AtomicUsize,
}

static CONFIG: Config = Config {
    max_node_count: AtomicUsize::new(3_000_000),
};

pub struct ConfigSnapshot {
    /// Hard ceiling on the number of nodes in the store.
    pub max_node_count: usize,
    /// Node count at which an allocating thread starts a collection.
    pub gc_start_threshold: usize,
}

pub fn get_config() -> ConfigSnapshot {
    let max_node_count = CONFIG.max_node_count.load(Ordering::Relaxed);
    ConfigSnapshot {
        max_node_count,
        gc_start_threshold: max_node_count / 7 * 6,
    }
}

pub fn set_max_node_count(max_node_count: usize) {
    CONFIG
        .max_node_count
        .store(max_node_count, Ordering::Relaxed);
}
