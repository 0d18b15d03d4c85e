//! Normalized counts of one gene by group

use svg::Document;

use super::axis::{draw_axes_with_x_ticks, Scale};
use super::{new_document, point, Frame, PALETTE};
use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};

const JITTER_WIDTH: f64 = 0.3;

/// Deterministic horizontal offset in [-width/2, width/2)
fn jitter(k: usize) -> f64 {
    (((k + 1) as f64 * 0.618_033_988_75).fract() - 0.5) * JITTER_WIDTH
}

/// Normalized count + 0.5 per sample on a log axis, one column per group
pub fn counts_plot(dds: &DeDataSet, gene_id: &str, intgroup: &[String]) -> Result<Document> {
    let gene = dds.counts().gene_index(gene_id).ok_or_else(|| AnalysisError::PlotError {
        reason: format!("gene '{}' is not in the dataset", gene_id),
    })?;
    let normalized = dds.normalized_counts()?;
    let values: Vec<f64> = normalized.row(gene).iter().map(|v| v + 0.5).collect();
    let groups = dds.samples().group_labels(intgroup)?;
    let order = dds.samples().group_order(intgroup)?;

    let frame = Frame::new(0.0);
    let x = Scale {
        min: 0.5,
        max: order.len() as f64 + 0.5,
        log: false,
    };
    let y = Scale::log10(values.iter().copied());
    let ticks: Vec<(f64, String)> = order.iter().enumerate().map(|(k, g)| ((k + 1) as f64, g.clone())).collect();
    let mut doc = draw_axes_with_x_ticks(
        new_document(gene_id),
        &frame,
        &x,
        &y,
        &ticks,
        &intgroup.join(":"),
        "normalized count",
    );

    for (j, (value, group)) in values.iter().zip(&groups).enumerate() {
        let k = order.iter().position(|g| g == group).unwrap_or(0);
        let px = frame.x(&x, (k + 1) as f64 + jitter(j));
        doc = doc.add(point(px, frame.y(&y, *value), 4.0, PALETTE[k % PALETTE.len()]));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{make_example_dataset, ExampleParams};

    #[test]
    fn test_jitter_bounded() {
        assert!((0..100).all(|k| jitter(k).abs() <= JITTER_WIDTH / 2.0));
        assert_eq!(jitter(3), jitter(3));
    }

    #[test]
    fn test_counts_plot() {
        let mut dds = make_example_dataset(&ExampleParams {
            n_genes: 10,
            n_samples: 6,
            ..Default::default()
        })
        .unwrap()
        .dds;
        crate::normalization::estimate_size_factors(&mut dds, Default::default()).unwrap();
        let intgroup = vec!["condition".to_string()];
        let svg = counts_plot(&dds, "gene3", &intgroup).unwrap().to_string();
        assert!(svg.contains("gene3"));
        assert!(svg.contains("condition"), "axis label missing");
        assert!(counts_plot(&dds, "nope", &intgroup).is_err());
    }
}
