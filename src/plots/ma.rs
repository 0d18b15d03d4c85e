//! MA plot: log2 fold change against mean expression

use svg::node::element::path::Data;
use svg::node::element::{Line, Path};
use svg::Document;

use super::axis::{draw_axes, Scale};
use super::{new_document, point, Frame, AXIS_COLOR};
use crate::error::{AnalysisError, Result};
use crate::io::DeResults;

const BACKGROUND_COLOR: &str = "#9ca3af";
const SIGNIFICANT_COLOR: &str = "#1e90ff";

#[derive(Debug, Clone)]
pub struct MaPlotParams {
    /// padj below this is highlighted
    pub alpha: f64,
    /// Symmetric y limit; the largest |LFC| when unset
    pub ylim: Option<f64>,
}

impl Default for MaPlotParams {
    fn default() -> Self {
        Self { alpha: 0.1, ylim: None }
    }
}

/// Triangle marker pointing up or down at the plot edge
fn triangle(x: f64, y: f64, up: bool, fill: &str) -> Path {
    let h = if up { -5.0 } else { 5.0 };
    let data = Data::new()
        .move_to((x - 4.0, y))
        .line_to((x + 4.0, y))
        .line_to((x, y + h))
        .close();
    Path::new().set("d", data).set("fill", fill)
}

/// Genes outside the y limits are drawn as triangles on the edge
pub fn ma_plot(results: &DeResults, params: &MaPlotParams) -> Result<Document> {
    let shown: Vec<usize> = (0..results.n_genes())
        .filter(|&i| results.base_means[i] > 0.0 && results.log2_fold_changes[i].is_finite())
        .collect();
    if shown.is_empty() {
        return Err(AnalysisError::PlotError {
            reason: "no genes with a finite fold change to plot".to_string(),
        });
    }
    let limit = params.ylim.unwrap_or_else(|| {
        shown
            .iter()
            .map(|&i| results.log2_fold_changes[i].abs())
            .fold(0.0, f64::max)
            .max(1.0)
            * 1.05
    });

    let frame = Frame::new(0.0);
    let x = Scale::log10(shown.iter().map(|&i| results.base_means[i]));
    let y = Scale::symmetric(limit);
    let mut doc = draw_axes(
        new_document(&results.description),
        &frame,
        &x,
        &y,
        "mean of normalized counts",
        "log fold change",
    );

    // significant genes last so they are drawn on top
    let mut ordered = shown;
    ordered.sort_by_key(|&i| results.padj[i] < params.alpha);
    for i in ordered {
        let color = if results.padj[i] < params.alpha {
            SIGNIFICANT_COLOR
        } else {
            BACKGROUND_COLOR
        };
        let lfc = results.log2_fold_changes[i];
        let px = frame.x(&x, results.base_means[i]);
        doc = if y.contains(lfc) {
            doc.add(point(px, frame.y(&y, lfc), 1.5, color))
        } else {
            let edge = if lfc > 0.0 { y.max } else { y.min };
            doc.add(triangle(px, frame.y(&y, edge), lfc > 0.0, color))
        };
    }

    let zero = frame.y(&y, 0.0);
    Ok(doc.add(
        Line::new()
            .set("x1", frame.left)
            .set("y1", zero)
            .set("x2", frame.right)
            .set("y2", zero)
            .set("stroke", AXIS_COLOR)
            .set("stroke-width", 1),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;

    fn results() -> DeResults {
        let mut res = DeResults::new(
            vec!["g1".into(), "g2".into(), "g3".into(), "g4".into()],
            Contrast::factor("condition", "B", "A"),
            0.1,
        );
        res.description = "log2 fold change (MLE): condition B vs A".into();
        res.base_means = vec![10.0, 200.0, 0.0, 3000.0];
        res.log2_fold_changes = vec![0.5, -4.0, f64::NAN, 1.2];
        res.padj = vec![0.5, 0.01, f64::NAN, 0.05];
        res
    }

    #[test]
    fn test_ma_plot_clips_to_triangles() {
        let res = results();
        let clipped = ma_plot(&res, &MaPlotParams { alpha: 0.1, ylim: Some(2.0) }).unwrap().to_string();
        assert!(clipped.contains("<path"), "clipped gene should be a triangle");
        let full = ma_plot(&res, &MaPlotParams::default()).unwrap().to_string();
        assert!(!full.contains("<path"));
        assert!(full.contains(SIGNIFICANT_COLOR));
    }

    #[test]
    fn test_ma_plot_empty() {
        let mut res = results();
        res.log2_fold_changes = vec![f64::NAN; 4];
        assert!(ma_plot(&res, &MaPlotParams::default()).is_err());
    }
}
