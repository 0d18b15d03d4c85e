//! Scales, ticks and axis drawing shared by the plots

use svg::node::element::{Line, Text};
use svg::Document;

use super::{Frame, AXIS_COLOR, FONT, GRID_COLOR};

/// Map a data range onto a pixel range, linearly or on log10
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub min: f64,
    pub max: f64,
    pub log: bool,
}

impl Scale {
    /// Linear scale covering `values` with 5% padding
    pub fn linear(values: impl IntoIterator<Item = f64>) -> Self {
        let (lo, hi) = finite_range(values, false).unwrap_or((0.0, 1.0));
        let (lo, hi) = if lo == hi { (lo - 1.0, hi + 1.0) } else { (lo, hi) };
        let pad = 0.05 * (hi - lo);
        Self {
            min: lo - pad,
            max: hi + pad,
            log: false,
        }
    }

    /// Symmetric linear scale around zero
    pub fn symmetric(limit: f64) -> Self {
        Self {
            min: -limit,
            max: limit,
            log: false,
        }
    }

    /// Log10 scale spanning whole decades around the positive values
    pub fn log10(values: impl IntoIterator<Item = f64>) -> Self {
        let (lo, hi) = finite_range(values, true).unwrap_or((1.0, 10.0));
        let lo = 10f64.powi(lo.log10().floor() as i32);
        let mut hi = 10f64.powi(hi.log10().ceil() as i32);
        if hi <= lo {
            hi = lo * 10.0;
        }
        Self { min: lo, max: hi, log: true }
    }

    fn transform(&self, v: f64) -> f64 {
        if self.log {
            v.log10()
        } else {
            v
        }
    }

    /// Fraction of the way from `min` to `max`, 0 to 1 inside the range
    pub fn fraction(&self, v: f64) -> f64 {
        let (a, b) = (self.transform(self.min), self.transform(self.max));
        (self.transform(v) - a) / (b - a)
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    pub fn ticks(&self) -> Vec<f64> {
        if self.log {
            log_ticks(self.min, self.max)
        } else {
            nice_ticks(self.min, self.max, 6)
        }
    }
}

fn finite_range(values: impl IntoIterator<Item = f64>, positive: bool) -> Option<(f64, f64)> {
    values
        .into_iter()
        .filter(|v| v.is_finite() && (!positive || *v > 0.0))
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Round tick positions (1, 2 or 5 times a power of ten) inside [min, max]
pub fn nice_ticks(min: f64, max: f64, target: usize) -> Vec<f64> {
    if !(max > min) || target == 0 {
        return vec![];
    }
    let raw = (max - min) / target as f64;
    let magnitude = 10f64.powf(raw.log10().floor());
    let step = [1.0, 2.0, 5.0, 10.0]
        .iter()
        .map(|m| m * magnitude)
        .find(|s| *s >= raw)
        .unwrap_or(10.0 * magnitude);
    let first = (min / step).ceil() as i64;
    let last = (max / step).floor() as i64;
    (first..=last).map(|k| k as f64 * step).collect()
}

/// Powers of ten inside [min, max]
pub fn log_ticks(min: f64, max: f64) -> Vec<f64> {
    if !(min > 0.0) || !(max > min) {
        return vec![];
    }
    let first = (min.log10() - 1e-9).ceil() as i32;
    let last = (max.log10() + 1e-9).floor() as i32;
    (first..=last).map(|e| 10f64.powi(e)).collect()
}

/// Tick label: "1e3" style for log axes, shortest decimal otherwise
pub fn tick_label(v: f64, log: bool) -> String {
    if log {
        let e = v.log10().round() as i32;
        return if (0..=3).contains(&e) {
            format!("{}", 10f64.powi(e))
        } else {
            format!("1e{}", e)
        };
    }
    if v.abs() < 1e-12 {
        "0".to_string()
    } else if v.fract().abs() < 1e-9 {
        format!("{:.0}", v)
    } else {
        let s = format!("{:.3}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Axis lines, grid, ticks and labels for a frame
pub fn draw_axes(doc: Document, frame: &Frame, x: &Scale, y: &Scale, x_label: &str, y_label: &str) -> Document {
    let x_ticks: Vec<(f64, String)> = x.ticks().into_iter().map(|t| (t, tick_label(t, x.log))).collect();
    draw_axes_with_x_ticks(doc, frame, x, y, &x_ticks, x_label, y_label)
}

/// `draw_axes` with caller-supplied x tick positions and labels, for categories
pub fn draw_axes_with_x_ticks(
    mut doc: Document,
    frame: &Frame,
    x: &Scale,
    y: &Scale,
    x_ticks: &[(f64, String)],
    x_label: &str,
    y_label: &str,
) -> Document {
    for (t, label) in x_ticks {
        let px = frame.x(x, *t);
        doc = doc
            .add(
                Line::new()
                    .set("x1", px)
                    .set("y1", frame.top)
                    .set("x2", px)
                    .set("y2", frame.bottom)
                    .set("stroke", GRID_COLOR)
                    .set("stroke-width", 1),
            )
            .add(
                Text::new(label.as_str())
                    .set("x", px)
                    .set("y", frame.bottom + 18.0)
                    .set("text-anchor", "middle")
                    .set("font-family", FONT)
                    .set("font-size", 11)
                    .set("fill", AXIS_COLOR),
            );
    }
    for t in y.ticks() {
        let py = frame.y(y, t);
        doc = doc
            .add(
                Line::new()
                    .set("x1", frame.left)
                    .set("y1", py)
                    .set("x2", frame.right)
                    .set("y2", py)
                    .set("stroke", GRID_COLOR)
                    .set("stroke-width", 1),
            )
            .add(
                Text::new(tick_label(t, y.log))
                    .set("x", frame.left - 8.0)
                    .set("y", py + 4.0)
                    .set("text-anchor", "end")
                    .set("font-family", FONT)
                    .set("font-size", 11)
                    .set("fill", AXIS_COLOR),
            );
    }

    doc.add(
        Line::new()
            .set("x1", frame.left)
            .set("y1", frame.bottom)
            .set("x2", frame.right)
            .set("y2", frame.bottom)
            .set("stroke", AXIS_COLOR)
            .set("stroke-width", 1.5),
    )
    .add(
        Line::new()
            .set("x1", frame.left)
            .set("y1", frame.top)
            .set("x2", frame.left)
            .set("y2", frame.bottom)
            .set("stroke", AXIS_COLOR)
            .set("stroke-width", 1.5),
    )
    .add(
        Text::new(x_label)
            .set("x", (frame.left + frame.right) / 2.0)
            .set("y", frame.bottom + 42.0)
            .set("text-anchor", "middle")
            .set("font-family", FONT)
            .set("font-size", 13)
            .set("fill", AXIS_COLOR),
    )
    .add(
        Text::new(y_label)
            .set("x", frame.left - 52.0)
            .set("y", (frame.top + frame.bottom) / 2.0)
            .set("text-anchor", "middle")
            .set(
                "transform",
                format!("rotate(-90 {} {})", frame.left - 52.0, (frame.top + frame.bottom) / 2.0),
            )
            .set("font-family", FONT)
            .set("font-size", 13)
            .set("fill", AXIS_COLOR),
    )
}
