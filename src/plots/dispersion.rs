//! Dispersion estimates against the mean of normalized counts

use svg::node::element::path::Data;
use svg::node::element::Path;
use svg::Document;

use super::axis::{draw_axes, Scale};
use super::{legend, new_document, point, Frame};
use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};

const GENE_COLOR: &str = "#000000";
const FINAL_COLOR: &str = "#1e90ff";
const TREND_COLOR: &str = "#d62728";

/// Gene-wise estimates (black), final estimates (blue) and the fitted
/// trend (red) on log-log axes; dispersion outliers are ringed
pub fn dispersion_plot(dds: &DeDataSet, title: &str) -> Result<Document> {
    let missing = |what: &str| AnalysisError::PlotError {
        reason: format!("{} dispersions are required for the dispersion plot", what),
    };
    let gene = dds.gene_dispersions().ok_or_else(|| missing("gene-wise"))?;
    let trended = dds.trended_dispersions().ok_or_else(|| missing("trended"))?;
    let final_disp = dds.dispersions().ok_or_else(|| missing("final"))?;
    let outliers = dds.dispersion_outliers().cloned().unwrap_or_else(|| vec![false; dds.n_genes()]);
    let (means, _) = dds.base_mean_var()?;

    let shown: Vec<usize> = (0..dds.n_genes())
        .filter(|&i| means[i] > 0.0 && gene[i].is_finite() && gene[i] > 0.0)
        .collect();
    if shown.is_empty() {
        return Err(AnalysisError::PlotError {
            reason: "no genes with positive mean and dispersion to plot".to_string(),
        });
    }

    let frame = Frame::new(110.0);
    let x = Scale::log10(shown.iter().map(|&i| means[i]));
    let y = Scale::log10(
        shown
            .iter()
            .flat_map(|&i| [gene[i], final_disp[i], trended[i]])
            .collect::<Vec<_>>(),
    );
    let mut doc = draw_axes(new_document(title), &frame, &x, &y, "mean of normalized counts", "dispersion");

    let clamp = |v: f64| v.clamp(y.min, y.max);
    for &i in &shown {
        doc = doc.add(point(frame.x(&x, means[i]), frame.y(&y, clamp(gene[i])), 1.2, GENE_COLOR));
    }
    for &i in &shown {
        if final_disp[i].is_finite() && final_disp[i] > 0.0 {
            let (px, py) = (frame.x(&x, means[i]), frame.y(&y, clamp(final_disp[i])));
            doc = doc.add(point(px, py, 1.2, FINAL_COLOR));
            if outliers[i] {
                doc = doc.add(
                    point(px, py, 4.0, "none")
                        .set("stroke", FINAL_COLOR)
                        .set("stroke-width", 1),
                );
            }
        }
    }

    let mut trend: Vec<(f64, f64)> = shown
        .iter()
        .filter(|&&i| trended[i].is_finite() && trended[i] > 0.0)
        .map(|&i| (means[i], trended[i]))
        .collect();
    trend.sort_by(|a, b| a.0.total_cmp(&b.0));
    if let Some(&(m0, d0)) = trend.first() {
        let mut data = Data::new().move_to((frame.x(&x, m0), frame.y(&y, clamp(d0))));
        for &(m, d) in &trend[1..] {
            data = data.line_to((frame.x(&x, m), frame.y(&y, clamp(d))));
        }
        doc = doc.add(
            Path::new()
                .set("d", data)
                .set("fill", "none")
                .set("stroke", TREND_COLOR)
                .set("stroke-width", 2),
        );
    }

    Ok(legend(
        doc,
        &frame,
        &[
            ("gene-est".to_string(), GENE_COLOR),
            ("fitted".to_string(), TREND_COLOR),
            ("final".to_string(), FINAL_COLOR),
        ],
    ))
}
