#![warn(clippy::all)]

mod bigfloat;
mod config;
mod error;
mod naive;
mod rle;
mod rule;
mod store;
mod universe;
mod utils;

pub use bigfloat::BigFloat;
pub use config::{get_config, set_max_node_count, ConfigSnapshot};
pub use error::Error;
pub use naive::NaiveGrid;
pub use rle::read_rle;
pub use rule::Rule;
pub use store::{Node, NodeRef, NodeStore};
pub use universe::Universe;
pub use utils::color;
pub use utils::color::Color;
pub use utils::format_int::NiceInt;

/// One lattice site. 0 is the background state; nonzero values are live,
/// colored states. The transition function only distinguishes zero from
/// nonzero when counting neighbors.
pub type CellState = u32;
