//! ASCII plotting of hysteresis loops for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks of a correction in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - raw samples: `.`
//! - corrected up branch: `-` line
//! - corrected down branch: `=` line
//! - both branches on the same cell: `#`

use crate::domain::{BranchData, LoopDataset};

/// Render the corrected loop, optionally over the raw samples.
pub fn render_loop_plot(
    raw: Option<&LoopDataset>,
    corrected: &LoopDataset,
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let mut all: Vec<&BranchData> = vec![&corrected.up, &corrected.down];
    if let Some(raw) = raw {
        all.push(&raw.up);
        all.push(&raw.down);
    }
    let (x_min, x_max) = axis_range(all.iter().flat_map(|b| b.x.iter())).unwrap_or((-1.0, 1.0));
    let (y_min, y_max) = axis_range(all.iter().flat_map(|b| b.y.iter())).unwrap_or((-1.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);
    let frame = Frame {
        x_min,
        x_max,
        y_min,
        y_max,
        width,
        height,
    };

    let mut grid = vec![vec![' '; width]; height];

    // Raw points first so corrected lines overlay them.
    if let Some(raw) = raw {
        for branch in [&raw.up, &raw.down] {
            for (&x, &y) in branch.x.iter().zip(&branch.y) {
                if let Some((c, r)) = frame.cell(x, y) {
                    grid[r][c] = '.';
                }
            }
        }
    }
    draw_branch(&mut grid, &frame, &corrected.up, '-');
    draw_branch(&mut grid, &frame, &corrected.down, '=');

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: x=[{x_min:.3}, {x_max:.3}] | y=[{y_min:.3}, {y_max:.3}]\n"
    ));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

struct Frame {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    width: usize,
    height: usize,
}

impl Frame {
    fn cell(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        Some((
            map_x(x, self.x_min, self.x_max, self.width),
            map_y(y, self.y_min, self.y_max, self.height),
        ))
    }
}

fn axis_range<'a>(values: impl Iterator<Item = &'a f64>) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values.filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() && max > min {
        Some((min, max))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

/// Connect consecutive samples of a branch in sweep order.
fn draw_branch(grid: &mut [Vec<char>], frame: &Frame, branch: &BranchData, ch: char) {
    let mut prev = None;
    for (&x, &y) in branch.x.iter().zip(&branch.y) {
        let Some((c, r)) = frame.cell(x, y) else {
            // A gap breaks the line.
            prev = None;
            continue;
        };
        match prev {
            Some((c0, r0)) => draw_line(grid, c0, r0, c, r, ch),
            None => plot_cell(grid, c, r, ch),
        }
        prev = Some((c, r));
    }
}

fn plot_cell(grid: &mut [Vec<char>], x: usize, y: usize, ch: char) {
    let cell = &mut grid[y][x];
    *cell = match *cell {
        ' ' | '.' => ch,
        existing if existing == ch => ch,
        _ => '#',
    };
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0 && (y0 as usize) < grid.len() && x0 >= 0 && (x0 as usize) < grid[0].len() {
            plot_cell(grid, x0 as usize, y0 as usize, ch);
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plot_golden_snapshot_small() {
        // Up sweeps low then jumps high at the right, down comes back on top
        // and drops at the left; the loop ends meet in `#` cells.
        let ds = LoopDataset::new(
            vec![0.0, 6.0, 9.0],
            vec![-1.0, -1.0, 1.0],
            vec![9.0, 3.0, 0.0],
            vec![1.0, 1.0, -1.0],
        )
        .unwrap();

        let txt = render_loop_plot(None, &ds, 10, 5);
        let expected = concat!(
            "Plot: x=[0.000, 9.000] | y=[-1.100, 1.100]\n",
            "   ======#\n",
            "  =     - \n",
            " =      - \n",
            " =     -  \n",
            "#------   \n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn raw_points_sit_under_corrected_lines() {
        let corrected = LoopDataset::new(vec![0.0, 1.0], vec![0.0, 1.0], vec![], vec![]).unwrap();
        let raw = LoopDataset::new(vec![0.0, 1.0], vec![1.0, 0.0], vec![], vec![]).unwrap();
        let txt = render_loop_plot(Some(&raw), &corrected, 10, 5);
        assert!(txt.contains('.'));
        assert!(txt.contains('-'));
    }
}
