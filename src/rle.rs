use tracing::{debug, info};

use crate::{CellState, Error, Universe};

/// Read an RLE pattern stream and build a universe from it.
///
/// `#` comment lines come first, then the header
/// `x = <w>, y = <h>, rule = <rulestring>`, then the run-length-encoded
/// body: `b`/`.` background, `o` state 1, `A..X` states 1..24,
/// `pA..pX` 25..48, `qA` through `xZ` 49..256, `yA..yO` 241..255,
/// `$` ends a row, `!` ends the pattern. A decimal prefix repeats the
/// following token.
pub fn read_rle(data: &[u8]) -> Result<Universe, Error> {
    let bad = |what: &str| Error::ReadFailed(what.to_string());

    let mut lines = data.split(|&b| b == b'\n');
    let header = loop {
        match lines.next() {
            Some(line) if line.first() == Some(&b'#') => continue,
            Some(line) => break line,
            None => return Err(bad("missing header line")),
        }
    };
    let (width, height, rule) = parse_header(header)?;
    debug!(width, height, rule, "pattern header");

    let mut universe = Universe::from_rule_str(&rule)?;

    fn write_run(
        universe: &mut Universe,
        x: &mut i64,
        y: i64,
        run: i64,
        state: CellState,
        cells_set: &mut u64,
    ) {
        for _ in 0..run.max(1) {
            universe.set_cell(*x, y, state);
            *x += 1;
            *cells_set += 1;
        }
    }

    let (mut x, mut y): (i64, i64) = (0, 0);
    let mut run: i64 = 0;
    let mut cells_set: u64 = 0;

    let mut body = lines.flatten().copied();
    while let Some(ch) = body.next() {
        match ch {
            b'0'..=b'9' => {
                run = run * 10 + (ch - b'0') as i64;
            }
            b'b' | b'.' => {
                x += run.max(1);
                run = 0;
            }
            b'o' => {
                write_run(&mut universe, &mut x, y, run, 1, &mut cells_set);
                run = 0;
            }
            b'A'..=b'X' => {
                write_run(&mut universe, &mut x, y, run, 1 + (ch - b'A') as CellState, &mut cells_set);
                run = 0;
            }
            b'p' => match body.next() {
                Some(c @ b'A'..=b'X') => {
                    write_run(&mut universe, &mut x, y, run, 25 + (c - b'A') as CellState, &mut cells_set);
                    run = 0;
                }
                _ => return Err(bad("bad multi-state token after 'p'")),
            },
            b'q'..=b'x' => match body.next() {
                Some(c @ b'A'..=b'Z') => {
                    let state = 49 + 26 * (ch - b'q') as CellState + (c - b'A') as CellState;
                    write_run(&mut universe, &mut x, y, run, state, &mut cells_set);
                    run = 0;
                }
                _ => return Err(bad("bad multi-state token")),
            },
            b'y' => match body.next() {
                Some(c @ b'A'..=b'O') => {
                    write_run(&mut universe, &mut x, y, run, 241 + (c - b'A') as CellState, &mut cells_set);
                    run = 0;
                }
                _ => return Err(bad("bad multi-state token after 'y'")),
            },
            b'$' => {
                y += run.max(1);
                x = 0;
                run = 0;
            }
            b'!' => {
                info!(cells = cells_set, "pattern loaded");
                universe.finalize();
                return Ok(universe);
            }
            b' ' | b'\r' | b'\t' => {}
            _ => return Err(Error::ReadFailed(format!("unexpected byte {:?}", ch as char))),
        }
    }
    Err(bad("pattern not terminated with '!'"))
}

/// `x = <w>, y = <h>, rule = <rulestring>`, whitespace optional.
fn parse_header(line: &[u8]) -> Result<(i64, i64, String), Error> {
    let bad = || Error::ReadFailed("malformed header".to_string());
    let text = std::str::from_utf8(line).map_err(|_| bad())?;

    let mut width = None;
    let mut height = None;
    let mut rule = None;
    for part in text.split(',') {
        let (key, value) = part.split_once('=').ok_or_else(bad)?;
        match key.trim() {
            "x" => width = Some(value.trim().parse::<i64>().map_err(|_| bad())?),
            "y" => height = Some(value.trim().parse::<i64>().map_err(|_| bad())?),
            "rule" => rule = Some(value.trim().to_string()),
            _ => return Err(bad()),
        }
    }
    match (width, height, rule) {
        (Some(w), Some(h), Some(r)) => Ok((w, h, r)),
        _ => Err(bad()),
    }
}
