//! Our log2 fold changes against a reference table's

use svg::node::element::Line;
use svg::Document;

use super::axis::{draw_axes, Scale};
use super::{legend, new_document, point, Frame, AXIS_COLOR, PALETTE};
use crate::compare::ComparisonReport;
use crate::error::{AnalysisError, Result};

const NEITHER_COLOR: &str = "#c7c7c7";

pub fn comparison_plot(report: &ComparisonReport, title: &str) -> Result<Document> {
    let genes: Vec<_> = report
        .shared
        .iter()
        .filter(|g| g.ours.is_finite() && g.reference.is_finite())
        .collect();
    if genes.is_empty() {
        return Err(AnalysisError::PlotError {
            reason: "no shared genes with finite fold changes".to_string(),
        });
    }
    let limit = genes
        .iter()
        .map(|g| g.ours.abs().max(g.reference.abs()))
        .fold(1.0, f64::max)
        * 1.05;
    let frame = Frame::new(130.0);
    let scale = Scale::symmetric(limit);
    let mut doc = draw_axes(
        new_document(title),
        &frame,
        &scale,
        &scale,
        "reference log2 fold change",
        "log2 fold change",
    );

    let (lo, hi) = (frame.x(&scale, -limit), frame.x(&scale, limit));
    let (ylo, yhi) = (frame.y(&scale, -limit), frame.y(&scale, limit));
    doc = doc.add(
        Line::new()
            .set("x1", lo)
            .set("y1", ylo)
            .set("x2", hi)
            .set("y2", yhi)
            .set("stroke", AXIS_COLOR)
            .set("stroke-dasharray", "4 4")
            .set("stroke-width", 1),
    );

    let color = |ours: bool, reference: bool| match (ours, reference) {
        (true, true) => PALETTE[2],
        (true, false) => PALETTE[0],
        (false, true) => PALETTE[1],
        (false, false) => NEITHER_COLOR,
    };
    // significant genes drawn last
    let mut ordered = genes;
    ordered.sort_by_key(|g| g.significant_ours as u8 + g.significant_reference as u8);
    for g in ordered {
        doc = doc.add(point(
            frame.x(&scale, g.reference),
            frame.y(&scale, g.ours),
            2.0,
            color(g.significant_ours, g.significant_reference),
        ));
    }

    Ok(legend(
        doc,
        &frame,
        &[
            ("both".to_string(), color(true, true)),
            ("ours only".to_string(), color(true, false)),
            ("reference only".to_string(), color(false, true)),
            ("neither".to_string(), color(false, false)),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::SharedGene;

    #[test]
    fn test_comparison_plot() {
        let gene = |id: &str, ours: f64, reference: f64, a: bool, b: bool| SharedGene {
            id: id.into(),
            ours,
            reference,
            significant_ours: a,
            significant_reference: b,
        };
        let report = ComparisonReport {
            alpha: 0.1,
            shared: vec![
                gene("g1", 2.0, 1.8, true, true),
                gene("g2", -0.2, 0.1, false, false),
                gene("g3", 1.1, f64::NAN, true, false),
            ],
            significant_ours: 2,
            significant_reference: 1,
            overlap: 1,
            jaccard: 0.5,
            concordant: 1,
            pearson: 1.0,
            spearman: 1.0,
        };
        let svg = comparison_plot(&report, "ours vs reference").unwrap().to_string();
        assert!(svg.contains("reference log2 fold change"));
        assert!(svg.contains("stroke-dasharray"));

        let empty = ComparisonReport {
            shared: vec![gene("g3", 1.1, f64::NAN, true, false)],
            ..report
        };
        assert!(comparison_plot(&empty, "x").is_err());
    }
}
