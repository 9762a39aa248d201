use ahash::AHashMap;
use num_bigint::BigUint;

use crate::bigfloat::BigFloat;
use crate::store::{Node, NodeRef, NodeStore};
use crate::utils::color::{state_color, Color};
use crate::{CellState, Error, Rule};

/// An infinite universe: one root node plus the background state that
/// fills the sea outside it.
///
/// The root is kept just large enough: `step` grows it so the next
/// state cannot be influenced from outside, and shrinks it again while
/// its outer ring is pure background.
pub struct Universe {
    // Declared before `store` so the strong root reference drops first.
    root: NodeRef,
    background: CellState,
    store: NodeStore,
}

impl Universe {
    pub fn new(rule: Rule) -> Self {
        let store = NodeStore::new(rule);
        let root = store.null_node(0, 0);
        Self {
            root,
            background: 0,
            store,
        }
    }

    /// Build a universe from a rulestring like `B3/S23`.
    pub fn from_rule_str(rule: &str) -> Result<Self, Error> {
        Ok(Self::new(Rule::parse(rule)?))
    }

    pub fn rule(&self) -> &Rule {
        self.store.rule()
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// A strong handle on the current root.
    pub fn root(&self) -> NodeRef {
        self.root.clone()
    }

    pub fn root_level(&self) -> u32 {
        self.root.level()
    }

    pub fn background(&self) -> CellState {
        self.background
    }

    /// Loader hook; pattern readers call it after the last write.
    pub fn finalize(&mut self) {}

    pub fn run_gc(&self) {
        self.store.run_gc();
    }

    pub fn stats(&self) -> String {
        self.store.stats()
    }

    pub fn set_cell(&mut self, x: i64, y: i64, cell: CellState) {
        let (xf, yf) = (BigFloat::from(x), BigFloat::from(y));
        while !in_bounds(&self.root, BigFloat::ZERO, BigFloat::ZERO, xf, yf) {
            self.expand_root();
        }
        self.root = set_rec(
            &self.store,
            &self.root,
            BigFloat::ZERO,
            BigFloat::ZERO,
            xf,
            yf,
            cell,
        );
    }

    pub fn get_cell(&self, x: i64, y: i64) -> CellState {
        let (xf, yf) = (BigFloat::from(x), BigFloat::from(y));
        if !in_bounds(&self.root, BigFloat::ZERO, BigFloat::ZERO, xf, yf) {
            return self.background;
        }
        get_rec(&self.root, BigFloat::ZERO, BigFloat::ZERO, xf, yf)
    }

    /// Replace the root with a node one level larger, the old quadrants
    /// surrounded by background.
    fn expand_root(&mut self) {
        let root = self.root.clone();
        let bg = self.background;
        self.root = if root.is_leaf() {
            let nw = self.store.find_or_insert_leaf(bg, bg, bg, root.cell_nw());
            let ne = self.store.find_or_insert_leaf(bg, bg, root.cell_ne(), bg);
            let sw = self.store.find_or_insert_leaf(bg, root.cell_sw(), bg, bg);
            let se = self.store.find_or_insert_leaf(root.cell_se(), bg, bg, bg);
            self.store.find_or_insert_branch(&nw, &ne, &sw, &se)
        } else {
            let null = self.store.null_node(root.level() - 1, bg);
            let nw = self
                .store
                .find_or_insert_branch(&null, &null, &null, root.nw());
            let ne = self
                .store
                .find_or_insert_branch(&null, &null, Node::ne(&root), &null);
            let sw = self
                .store
                .find_or_insert_branch(&null, root.sw(), &null, &null);
            let se = self
                .store
                .find_or_insert_branch(root.se(), &null, &null, &null);
            self.store.find_or_insert_branch(&nw, &ne, &sw, &se)
        };
    }

    /// While the root's outer ring of grand-quadrants is pure
    /// background, drop down to its center.
    fn contract_root(&mut self) {
        loop {
            if self.root.level() < 2 {
                return;
            }
            let null = self
                .store
                .null_node(self.root.level() - 2, self.background);
            let null_ptr = null.as_ptr();
            {
                let (nw, ne, sw, se) = (self.root.nw(), Node::ne(&self.root), self.root.sw(), self.root.se());
                let outer = [
                    nw.nw(),
                    nw.ne(),
                    nw.sw(),
                    ne.nw(),
                    ne.ne(),
                    ne.se(),
                    sw.nw(),
                    sw.sw(),
                    sw.se(),
                    se.ne(),
                    se.sw(),
                    se.se(),
                ];
                if outer.iter().any(|&g| !std::ptr::eq(g, null_ptr)) {
                    return;
                }
            }
            self.root = self.root.center(&self.store);
        }
    }

    /// Advance the universe by `2^log_step` generations.
    pub fn step(&mut self, log_step: u32) {
        self.expand_root();
        self.expand_root();
        while self.root.level() < log_step + 1 {
            self.expand_root();
        }
        // The infinite sea advances too: under a B0 rule the background
        // alternates, and without this the cells outside the root would
        // be wrong.
        let null = self.store.null_node(self.root.level(), self.background);
        let stepped = null.next_state_by(&self.store, log_step);
        self.background = uniform_cell(&stepped);
        self.root = self.root.next_state_by(&self.store, log_step);
        self.contract_root();
    }

    /// Count of live cells inside the root.
    pub fn population(&self) -> BigUint {
        fn count(node: &Node, memo: &mut AHashMap<*const Node, BigUint>) -> BigUint {
            if node.is_leaf() {
                let live = [
                    node.cell_nw(),
                    node.cell_ne(),
                    node.cell_sw(),
                    node.cell_se(),
                ]
                .iter()
                .filter(|&&c| c != 0)
                .count();
                return BigUint::from(live);
            }
            let key = node as *const Node;
            if let Some(cached) = memo.get(&key) {
                return cached.clone();
            }
            let total = count(node.nw(), memo)
                + count(node.ne(), memo)
                + count(node.sw(), memo)
                + count(node.se(), memo);
            memo.insert(key, total.clone());
            total
        }

        count(&self.root, &mut AHashMap::new())
    }

    /// Render into a packed-ARGB pixel buffer. The root maps to a
    /// `2^(log_size+1)`-pixel square centered on the screen center;
    /// `pitch` is the row stride in pixels. Subtrees that land on less
    /// than a pixel collapse to their aggregate color.
    pub fn draw(&self, log_size: i32, pixels: &mut [u32], width: i32, height: i32, pitch: usize) {
        let bg = state_color(self.background);
        for y in 0..height as usize {
            pixels[y * pitch..y * pitch + width as usize].fill(bg);
        }
        draw_node(
            &self.root,
            BigFloat::from(width / 2),
            BigFloat::from(height / 2),
            log_size + 1,
            pixels,
            width,
            height,
            pitch,
        );
    }
}

fn in_bounds(node: &Node, cx: BigFloat, cy: BigFloat, x: BigFloat, y: BigFloat) -> bool {
    let half = BigFloat::exp2(node.level() as i32);
    x >= cx - half && x < cx + half && y >= cy - half && y < cy + half
}

/// All leaves of a null node's successor hold the same state; any
/// descent finds it.
fn uniform_cell(node: &Node) -> CellState {
    let mut n = node;
    while !n.is_leaf() {
        n = n.se();
    }
    n.cell_se()
}

fn set_rec(
    store: &NodeStore,
    node: &Node,
    cx: BigFloat,
    cy: BigFloat,
    x: BigFloat,
    y: BigFloat,
    cell: CellState,
) -> NodeRef {
    if node.is_leaf() {
        let mut cells = [
            node.cell_nw(),
            node.cell_ne(),
            node.cell_sw(),
            node.cell_se(),
        ];
        cells[quadrant(cx, cy, x, y)] = cell;
        store.find_or_insert_leaf(cells[0], cells[1], cells[2], cells[3])
    } else {
        let half = BigFloat::exp2(node.level() as i32 - 1);
        let (nw, ne, sw, se) = (node.nw(), node.ne(), node.sw(), node.se());
        match quadrant(cx, cy, x, y) {
            0 => {
                let nw = set_rec(store, nw, cx - half, cy - half, x, y, cell);
                store.find_or_insert_branch(&nw, ne, sw, se)
            }
            1 => {
                let ne = set_rec(store, ne, cx + half, cy - half, x, y, cell);
                store.find_or_insert_branch(nw, &ne, sw, se)
            }
            2 => {
                let sw = set_rec(store, sw, cx - half, cy + half, x, y, cell);
                store.find_or_insert_branch(nw, ne, &sw, se)
            }
            _ => {
                let se = set_rec(store, se, cx + half, cy + half, x, y, cell);
                store.find_or_insert_branch(nw, ne, sw, &se)
            }
        }
    }
}

fn get_rec(node: &Node, cx: BigFloat, cy: BigFloat, x: BigFloat, y: BigFloat) -> CellState {
    if node.is_leaf() {
        let cells = [
            node.cell_nw(),
            node.cell_ne(),
            node.cell_sw(),
            node.cell_se(),
        ];
        return cells[quadrant(cx, cy, x, y)];
    }
    let half = BigFloat::exp2(node.level() as i32 - 1);
    match quadrant(cx, cy, x, y) {
        0 => get_rec(node.nw(), cx - half, cy - half, x, y),
        1 => get_rec(node.ne(), cx + half, cy - half, x, y),
        2 => get_rec(node.sw(), cx - half, cy + half, x, y),
        _ => get_rec(node.se(), cx + half, cy + half, x, y),
    }
}

fn quadrant(cx: BigFloat, cy: BigFloat, x: BigFloat, y: BigFloat) -> usize {
    (x >= cx) as usize + 2 * ((y >= cy) as usize)
}

fn draw_pixel(x: i64, y: i64, color: Color, pixels: &mut [u32], width: i32, height: i32, pitch: usize) {
    if x >= 0 && y >= 0 && x < width as i64 && y < height as i64 {
        pixels[y as usize * pitch + x as usize] = color;
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_square(
    mut x: BigFloat,
    mut y: BigFloat,
    size: BigFloat,
    color: Color,
    pixels: &mut [u32],
    width: i32,
    height: i32,
    pitch: usize,
) {
    let (w, h) = (BigFloat::from(width), BigFloat::from(height));
    if x + size < BigFloat::ZERO || x >= w || y + size < BigFloat::ZERO || y >= h {
        return;
    }
    let mut x_size = size;
    let mut y_size = size;
    if x < BigFloat::ZERO {
        x_size += x;
        x = BigFloat::ZERO;
    }
    if y < BigFloat::ZERO {
        y_size += y;
        y = BigFloat::ZERO;
    }
    if x + x_size > w {
        x_size = w - x;
    }
    if y + y_size > h {
        y_size = h - y;
    }
    let xi = x.to_i64();
    let yi = y.to_i64();
    for ry in 0..y_size.ceil().to_i64() {
        for rx in 0..x_size.ceil().to_i64() {
            draw_pixel(xi + rx, yi + ry, color, pixels, width, height, pitch);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_node(
    node: &Node,
    cx: BigFloat,
    cy: BigFloat,
    log_size: i32,
    pixels: &mut [u32],
    width: i32,
    height: i32,
    pitch: usize,
) {
    if log_size <= 0 {
        draw_pixel(
            cx.floor().to_i64(),
            cy.floor().to_i64(),
            node.color(),
            pixels,
            width,
            height,
            pitch,
        );
        return;
    }
    if node.is_leaf() {
        let px = BigFloat::exp2(log_size - 1);
        let cells = [
            (node.cell_nw(), cx - px, cy - px),
            (node.cell_ne(), cx, cy - px),
            (node.cell_sw(), cx - px, cy),
            (node.cell_se(), cx, cy),
        ];
        for (cell, x, y) in cells {
            draw_square(x, y, px, state_color(cell), pixels, width, height, pitch);
        }
        return;
    }
    let sub = BigFloat::exp2(log_size - 1);
    let half = sub >> 1;
    if cx + sub <= BigFloat::ZERO
        || cy + sub <= BigFloat::ZERO
        || cx - sub > BigFloat::from(width)
        || cy - sub > BigFloat::from(height)
    {
        return;
    }
    draw_node(node.nw(), cx - half, cy - half, log_size - 1, pixels, width, height, pitch);
    draw_node(node.ne(), cx + half, cy - half, log_size - 1, pixels, width, height, pitch);
    draw_node(node.sw(), cx - half, cy + half, log_size - 1, pixels, width, height, pitch);
    draw_node(node.se(), cx + half, cy + half, log_size - 1, pixels, width, height, pitch);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let mut universe = Universe::new(Rule::life());
        let coords = [(0, 0), (-1, -1), (5, -3), (-100, 250), (1 << 40, -(1 << 40))];
        for (i, &(x, y)) in coords.iter().enumerate() {
            universe.set_cell(x, y, i as CellState + 1);
        }
        for (i, &(x, y)) in coords.iter().enumerate() {
            assert_eq!(universe.get_cell(x, y), i as CellState + 1);
        }
    }

    #[test]
    fn background_outside_root() {
        let universe = Universe::new(Rule::life());
        assert_eq!(universe.root_level(), 0);
        assert_eq!(universe.get_cell(1 << 50, 1 << 50), 0);
        assert_eq!(universe.get_cell(-5, 7), 0);
    }

    #[test]
    fn expand_keeps_each_quadrant() {
        for (x, y) in [(-1, -1), (0, -1), (-1, 0), (0, 0)] {
            let mut universe = Universe::new(Rule::life());
            universe.set_cell(x, y, 1);
            // Force expansions well past the original 2x2 root.
            universe.set_cell(40, 40, 2);
            assert_eq!(universe.get_cell(x, y), 1);
            assert_eq!(universe.get_cell(40, 40), 2);
            for (px, py) in [(-1, -1), (0, -1), (-1, 0), (0, 0)] {
                if (px, py) != (x, y) {
                    assert_eq!(universe.get_cell(px, py), 0);
                }
            }
        }
    }

    #[test]
    fn b0_rule_alternates_background() {
        // Births on zero neighbors, no survival: empty space strobes.
        let mut universe = Universe::from_rule_str("B0/S").unwrap();
        assert_eq!(universe.background(), 0);
        universe.step(0);
        assert_eq!(universe.background(), 1);
        assert_eq!(universe.get_cell(1 << 30, 0), 1);
        universe.step(0);
        assert_eq!(universe.background(), 0);
        assert_eq!(universe.get_cell(1 << 30, 0), 0);
    }

    #[test]
    fn contraction_keeps_root_small() {
        let mut universe = Universe::new(Rule::life());
        // A block is stable; the root must not keep growing with steps.
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            universe.set_cell(x, y, 1);
        }
        for _ in 0..8 {
            universe.step(0);
        }
        assert!(universe.root_level() <= 4);
        assert_eq!(universe.population(), 4u32.into());
    }

    #[test]
    fn contract_stops_when_outer_ring_is_live() {
        // A block away from the origin ends up in an outer
        // grand-quadrant, so the root cannot shrink past it.
        let mut universe = Universe::new(Rule::life());
        for (x, y) in [(5, 5), (6, 5), (5, 6), (6, 6)] {
            universe.set_cell(x, y, 1);
        }
        assert_eq!(universe.root_level(), 3);
        universe.step(0);
        assert_eq!(universe.root_level(), 3);
        for (x, y) in [(5, 5), (6, 5), (5, 6), (6, 6)] {
            assert_eq!(universe.get_cell(x, y), 1);
        }
    }

    #[test]
    fn draw_renders_live_cells() {
        let mut universe = Universe::new(Rule::life());
        universe.set_cell(0, 0, 1);
        let (w, h, pitch) = (16, 16, 16);
        let mut pixels = vec![0u32; pitch * 16];
        universe.draw(1, &mut pixels, w, h, pitch);
        // Root is level >= 0 around the origin; the live cell lands in
        // the lower-right quadrant of the screen center.
        let lit = pixels.iter().filter(|&&p| p == state_color(1)).count();
        assert!(lit >= 1);
        assert!(pixels.iter().any(|&p| p == state_color(0)));
    }
}
