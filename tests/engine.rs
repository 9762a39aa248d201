use hashlife::{get_config, read_rle, CellState, NaiveGrid, Rule, Universe};
use rand::{Rng, SeedableRng};

fn universe_with(cells: &[(i64, i64)]) -> Universe {
    let mut universe = Universe::new(Rule::life());
    for &(x, y) in cells {
        universe.set_cell(x, y, 1);
    }
    universe
}

fn window(universe: &Universe, x0: i64, y0: i64, x1: i64, y1: i64) -> Vec<CellState> {
    (y0..y1)
        .flat_map(|y| (x0..x1).map(move |x| (x, y)))
        .map(|(x, y)| universe.get_cell(x, y))
        .collect()
}

#[test]
fn empty_universe_stays_empty() {
    let mut universe = Universe::new(Rule::life());
    universe.step(0);
    universe.step(3);
    for (x, y) in [(0, 0), (-17, 4), (1 << 30, -(1 << 30))] {
        assert_eq!(universe.get_cell(x, y), 0);
    }
    assert_eq!(universe.population(), 0u32.into());
}

#[test]
fn block_is_still() {
    let block = [(0, 0), (1, 0), (0, 1), (1, 1)];
    let mut universe = universe_with(&block);
    for _ in 0..10 {
        universe.step(0);
    }
    for &(x, y) in &block {
        assert_eq!(universe.get_cell(x, y), 1);
    }
    assert_eq!(universe.population(), 4u32.into());
}

#[test]
fn blinker_oscillates() {
    let mut universe = universe_with(&[(0, 0), (1, 0), (2, 0)]);
    universe.step(0);
    for (x, y) in [(1, -1), (1, 0), (1, 1)] {
        assert_eq!(universe.get_cell(x, y), 1, "missing ({x}, {y})");
    }
    assert_eq!(universe.population(), 3u32.into());
    universe.step(0);
    for (x, y) in [(0, 0), (1, 0), (2, 0)] {
        assert_eq!(universe.get_cell(x, y), 1);
    }
    assert_eq!(universe.get_cell(1, -1), 0);
}

#[test]
fn glider_shifts_diagonally() {
    let glider = [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)];
    let mut universe = universe_with(&glider);
    // 2^2 generations move a glider by exactly (+1, +1).
    universe.step(2);
    assert_eq!(universe.population(), 5u32.into());
    for &(x, y) in &glider {
        assert_eq!(universe.get_cell(x + 1, y + 1), 1, "missing ({x}, {y})");
    }
}

#[test]
fn r_pentomino_matches_naive_simulator() {
    let r_pentomino = [(1, 0), (2, 0), (0, 1), (1, 1), (1, 2)];

    let mut universe = Universe::new(Rule::life());
    let mut naive = NaiveGrid::new(Rule::life(), 128, 128);
    for &(x, y) in &r_pentomino {
        universe.set_cell(x + 64, y + 64, 1);
        naive.set_cell((x + 64) as usize, (y + 64) as usize, 1);
    }

    universe.step(5);
    naive.update(32);

    assert_eq!(
        universe.population(),
        naive.population().into(),
        "population diverged after 32 generations"
    );
    for y in 32..96 {
        for x in 32..96 {
            assert_eq!(
                universe.get_cell(x, y),
                naive.get_cell(x as usize, y as usize),
                "cell ({x}, {y}) diverged"
            );
        }
    }
    assert!(universe.store().node_count() <= get_config().max_node_count);
}

#[test]
fn step_twice_equals_one_bigger_step() {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
    let mut twice = Universe::new(Rule::life());
    let mut once = Universe::new(Rule::life());
    for y in 0..16 {
        for x in 0..16 {
            if rng.gen_bool(0.5) {
                twice.set_cell(x, y, 1);
                once.set_cell(x, y, 1);
            }
        }
    }

    twice.step(2);
    twice.step(2);
    once.step(3);

    assert_eq!(
        window(&twice, -24, -24, 40, 40),
        window(&once, -24, -24, 40, 40)
    );
}

#[test]
fn gc_does_not_change_observable_state() {
    let r_pentomino = [(1, 0), (2, 0), (0, 1), (1, 1), (1, 2)];
    let mut collected = universe_with(&r_pentomino);
    let mut untouched = universe_with(&r_pentomino);

    let saved_root = collected.root();
    collected.step(3);
    collected.run_gc();
    untouched.step(3);

    assert_eq!(
        window(&collected, -30, -30, 40, 40),
        window(&untouched, -30, -30, 40, 40)
    );
    // The handle taken before the step still pins its node.
    assert_eq!(saved_root.level(), 2);

    // And stepping after a collection keeps agreeing.
    collected.step(2);
    untouched.step(2);
    assert_eq!(
        window(&collected, -30, -30, 40, 40),
        window(&untouched, -30, -30, 40, 40)
    );
}

#[test]
fn next_state_is_deterministic() {
    let universe = universe_with(&[(0, 0), (1, 0), (2, 0), (2, 1), (1, 2)]);
    let root = universe.root();
    let store = universe.store();
    if root.level() >= 2 {
        let a = root.next_state_by(store, 0);
        let b = root.next_state_by(store, 0);
        assert_eq!(a, b);
        let c = root.next_state(store);
        let d = root.next_state(store);
        assert_eq!(c, d);
    }
}

#[test]
fn rle_load_then_step_matches_manual_setup() {
    let from_rle = read_rle(b"x = 3, y = 3, rule = B3/S23\nbo$2bo$3o!").unwrap();
    let manual = universe_with(&[(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)]);
    assert_eq!(window(&from_rle, -4, -4, 8, 8), window(&manual, -4, -4, 8, 8));
}
