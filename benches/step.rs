use criterion::{criterion_group, criterion_main, Criterion};
use hashlife::{Rule, Universe};

const R_PENTOMINO: &[u8] = b"x = 3, y = 3, rule = B3/S23\nb2o$2o$bo!";

fn bench_step(c: &mut Criterion) {
    c.bench_function("step_32_generations", |b| {
        let mut universe = hashlife::read_rle(R_PENTOMINO).unwrap();
        b.iter(|| universe.step(5));
    });
}

fn bench_set_cells(c: &mut Criterion) {
    c.bench_function("set_cells_64x64", |b| {
        b.iter(|| {
            let mut universe = Universe::new(Rule::life());
            for y in 0..64 {
                for x in 0..64 {
                    universe.set_cell(x, y, ((x ^ y) & 1) as u32);
                }
            }
            universe
        })
    });
}

criterion_group!(benches, bench_step, bench_set_cells);
criterion_main!(benches);
