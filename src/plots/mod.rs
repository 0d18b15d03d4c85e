//! SVG figures: dispersion estimates, PCA, per-gene counts, MA and
//! comparison scatter plots

pub mod axis;
mod comparison;
mod counts;
mod dispersion;
mod ma;
mod pca;

pub use comparison::comparison_plot;
pub use counts::counts_plot;
pub use dispersion::dispersion_plot;
pub use ma::{ma_plot, MaPlotParams};
pub use pca::pca_plot;

use std::path::Path;

use svg::node::element::{Circle, Rectangle, Text};
use svg::Document;

use crate::error::{AnalysisError, Result};

pub const WIDTH: f64 = 720.0;
pub const HEIGHT: f64 = 540.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 60.0;

pub const FONT: &str = "sans-serif";
pub const AXIS_COLOR: &str = "#333333";
pub const GRID_COLOR: &str = "#e5e7eb";

/// Colors assigned to groups in legend order
pub const PALETTE: [&str; 8] = [
    "#1b9e77", "#d95f02", "#7570b3", "#e7298a", "#66a61e", "#e6ab02", "#a6761d", "#666666",
];

/// Plotting area inside the margins, in pixels
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Frame {
    /// Default frame; `legend_width` is reserved on the right
    pub fn new(legend_width: f64) -> Self {
        Self {
            left: MARGIN_LEFT,
            right: WIDTH - MARGIN_RIGHT - legend_width,
            top: MARGIN_TOP,
            bottom: HEIGHT - MARGIN_BOTTOM,
        }
    }

    pub fn x(&self, scale: &axis::Scale, v: f64) -> f64 {
        self.left + scale.fraction(v) * (self.right - self.left)
    }

    pub fn y(&self, scale: &axis::Scale, v: f64) -> f64 {
        self.bottom - scale.fraction(v) * (self.bottom - self.top)
    }
}

/// Blank document with a white background and a title
pub fn new_document(title: &str) -> Document {
    Document::new()
        .set("viewBox", (0, 0, WIDTH, HEIGHT))
        .set("width", WIDTH)
        .set("height", HEIGHT)
        .add(
            Rectangle::new()
                .set("x", 0)
                .set("y", 0)
                .set("width", WIDTH)
                .set("height", HEIGHT)
                .set("fill", "#ffffff"),
        )
        .add(
            Text::new(title)
                .set("x", WIDTH / 2.0)
                .set("y", 28.0)
                .set("text-anchor", "middle")
                .set("font-family", FONT)
                .set("font-size", 16)
                .set("fill", AXIS_COLOR),
        )
}

pub fn point(x: f64, y: f64, r: f64, fill: &str) -> Circle {
    Circle::new()
        .set("cx", x)
        .set("cy", y)
        .set("r", r)
        .set("fill", fill)
}

/// Color swatches with labels in the right margin
pub fn legend(mut doc: Document, frame: &Frame, entries: &[(String, &str)]) -> Document {
    let x = frame.right + 20.0;
    for (k, (label, color)) in entries.iter().enumerate() {
        let y = frame.top + 10.0 + 20.0 * k as f64;
        doc = doc.add(point(x, y, 5.0, color)).add(
            Text::new(label.as_str())
                .set("x", x + 12.0)
                .set("y", y + 4.0)
                .set("font-family", FONT)
                .set("font-size", 12)
                .set("fill", AXIS_COLOR),
        );
    }
    doc
}

/// Write a document to `path`
pub fn save<P: AsRef<Path>>(path: P, doc: &Document) -> Result<()> {
    let path = path.as_ref();
    svg::save(path, doc).map_err(|e| AnalysisError::PlotError {
        reason: format!("cannot write {}: {}", path.display(), e),
    })?;
    log::debug!("wrote {}", path.display());
    Ok(())
}
