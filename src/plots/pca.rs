//! PC1 vs PC2 scatter colored by group

use svg::node::element::Text;
use svg::Document;

use super::axis::{draw_axes, Scale};
use super::{legend, new_document, point, Frame, AXIS_COLOR, FONT, PALETTE};
use crate::error::{AnalysisError, Result};
use crate::pca::PcaResult;

pub fn pca_plot(result: &PcaResult, title: &str, label_samples: bool) -> Result<Document> {
    if result.n_components() < 2 {
        return Err(AnalysisError::PlotError {
            reason: "the PCA plot needs two components".to_string(),
        });
    }
    let pc1 = result.component(0);
    let pc2 = result.component(1);
    let frame = Frame::new(140.0);
    let x = Scale::linear(pc1.iter().copied());
    let y = Scale::linear(pc2.iter().copied());
    let x_label = format!("PC1: {:.0}% variance", 100.0 * result.percent_var[0]);
    let y_label = format!("PC2: {:.0}% variance", 100.0 * result.percent_var[1]);
    let mut doc = draw_axes(new_document(title), &frame, &x, &y, &x_label, &y_label);

    let color_of = |group: &str| {
        let k = result.group_order.iter().position(|g| g == group).unwrap_or(0);
        PALETTE[k % PALETTE.len()]
    };
    for (j, group) in result.groups.iter().enumerate() {
        let (px, py) = (frame.x(&x, pc1[j]), frame.y(&y, pc2[j]));
        doc = doc.add(point(px, py, 5.0, color_of(group)));
        if label_samples {
            doc = doc.add(
                Text::new(result.sample_ids[j].as_str())
                    .set("x", px + 7.0)
                    .set("y", py - 5.0)
                    .set("font-family", FONT)
                    .set("font-size", 10)
                    .set("fill", AXIS_COLOR),
            );
        }
    }

    let entries: Vec<(String, &str)> = result.group_order.iter().map(|g| (g.clone(), color_of(g))).collect();
    Ok(legend(doc, &frame, &entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_pca_plot_labels_variance() {
        let result = PcaResult {
            scores: array![[-2.0, 0.5], [-1.5, -0.5], [1.8, 0.2], [1.7, -0.2]],
            percent_var: vec![0.83, 0.12],
            sample_ids: vec!["a1".into(), "a2".into(), "b1".into(), "b2".into()],
            groups: vec!["A".into(), "A".into(), "B".into(), "B".into()],
            group_order: vec!["A".into(), "B".into()],
            n_genes_used: 500,
        };
        let svg = pca_plot(&result, "PCA", true).unwrap().to_string();
        assert!(svg.contains("PC1: 83% variance"));
        assert!(svg.contains("PC2: 12% variance"));
        assert!(svg.contains("b2"));
        assert!(svg.contains(PALETTE[1]));
    }
}
