//! Model matrix construction and contrast resolution

use ndarray::Array2;
use std::collections::HashMap;

use super::formula::DesignFormula;
use crate::data::SampleTable;
use crate::error::{AnalysisError, Result};
use crate::io::Contrast;
use crate::linalg::qr_rank;

/// Information about the model matrix columns
#[derive(Debug, Clone)]
pub struct DesignInfo {
    pub formula: DesignFormula,
    /// Coefficient names, one per model matrix column
    pub coef_names: Vec<String>,
    /// Factor levels (reference first) for every factor in the formula
    pub factor_levels: HashMap<String, Vec<String>>,
    /// Variables treated as continuous covariates
    pub numeric_variables: Vec<String>,
    /// Columns contributed by each main-effect factor: level -> column
    pub factor_columns: HashMap<String, HashMap<String, usize>>,
}

impl DesignInfo {
    pub fn n_coefs(&self) -> usize {
        self.coef_names.len()
    }

    pub fn coef_index(&self, name: &str) -> Option<usize> {
        self.coef_names.iter().position(|n| n == name)
    }

    /// True for a design with a single two-level factor
    pub fn is_two_level_single_factor(&self) -> bool {
        self.formula.terms.len() == 1
            && self.formula.terms[0].len() == 1
            && self
                .factor_levels
                .get(&self.formula.terms[0][0])
                .map(|l| l.len() == 2)
                .unwrap_or(false)
    }
}

/// R `make.names`: replace characters that are not valid in names with '.'
pub fn make_name(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '.' { c } else { '.' })
        .collect();
    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        out.insert(0, 'X');
    }
    out
}

/// One coded column of a single variable inside a term
struct Coded {
    label: String,
    values: Vec<f64>,
}

/// Build the model matrix for a formula over the sample table
///
/// Factors use treatment coding against their first level. `numeric` lists
/// the variables to treat as continuous covariates.
pub fn create_design_matrix(
    samples: &SampleTable,
    formula: &DesignFormula,
    numeric: &[String],
) -> Result<(Array2<f64>, DesignInfo)> {
    let n = samples.n_samples();
    let mut factor_levels: HashMap<String, Vec<String>> = HashMap::new();
    let mut numeric_values: HashMap<String, Vec<f64>> = HashMap::new();

    for var in formula.variables() {
        if !samples.has_column(&var) {
            return Err(AnalysisError::InvalidDesign {
                reason: format!("design variable '{}' is not a column of the sample table", var),
            });
        }
        if numeric.contains(&var) {
            numeric_values.insert(var.clone(), samples.numeric_column(&var)?);
        } else {
            let levels = samples.levels(&var)?;
            if levels.len() < 2 {
                return Err(AnalysisError::InvalidDesign {
                    reason: format!(
                        "contrasts can be applied only to factors with 2 or more levels; '{}' has {}",
                        var,
                        levels.len()
                    ),
                });
            }
            factor_levels.insert(var.clone(), levels);
        }
    }

    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut coef_names: Vec<String> = Vec::new();
    let mut factor_columns: HashMap<String, HashMap<String, usize>> = HashMap::new();

    if formula.intercept {
        columns.push(vec![1.0; n]);
        coef_names.push("Intercept".to_string());
    }

    let mut full_coding_used = formula.intercept;
    for term in &formula.terms {
        if term.len() == 1 {
            let var = &term[0];
            if let Some(values) = numeric_values.get(var) {
                columns.push(values.clone());
                coef_names.push(make_name(var));
                continue;
            }
            let levels = &factor_levels[var];
            let column = samples.column(var).unwrap_or_default();
            let reference = &levels[0];
            let skip = usize::from(full_coding_used);
            let mut level_map = HashMap::new();
            for level in levels.iter().skip(skip) {
                level_map.insert(level.clone(), columns.len());
                columns.push(column.iter().map(|v| f64::from(u8::from(v == level))).collect());
                coef_names.push(if full_coding_used {
                    format!("{}_{}_vs_{}", make_name(var), make_name(level), make_name(reference))
                } else {
                    format!("{}{}", make_name(var), make_name(level))
                });
            }
            factor_columns.insert(var.clone(), level_map);
            full_coding_used = true;
        } else {
            // product of each variable's contrast columns, first variable varying fastest
            let mut combos: Vec<Coded> = vec![Coded {
                label: String::new(),
                values: vec![1.0; n],
            }];
            for var in term {
                let coded: Vec<Coded> = match numeric_values.get(var) {
                    Some(values) => vec![Coded {
                        label: make_name(var),
                        values: values.clone(),
                    }],
                    None => {
                        let column = samples.column(var).unwrap_or_default();
                        factor_levels[var]
                            .iter()
                            .skip(1)
                            .map(|level| Coded {
                                label: format!("{}{}", make_name(var), make_name(level)),
                                values: column.iter().map(|v| f64::from(u8::from(v == level))).collect(),
                            })
                            .collect()
                    }
                };
                let mut next = Vec::with_capacity(combos.len() * coded.len());
                for c in &coded {
                    for prev in &combos {
                        next.push(Coded {
                            label: if prev.label.is_empty() {
                                c.label.clone()
                            } else {
                                format!("{}.{}", prev.label, c.label)
                            },
                            values: prev.values.iter().zip(&c.values).map(|(a, b)| a * b).collect(),
                        });
                    }
                }
                combos = next;
            }
            for c in combos {
                columns.push(c.values);
                coef_names.push(c.label);
            }
        }
    }

    if columns.is_empty() {
        return Err(AnalysisError::InvalidDesign {
            reason: "the design has no columns".to_string(),
        });
    }

    let mut matrix = Array2::zeros((n, columns.len()));
    for (j, col) in columns.iter().enumerate() {
        for (i, &v) in col.iter().enumerate() {
            matrix[[i, j]] = v;
        }
    }

    check_full_rank(&matrix, &coef_names)?;

    let info = DesignInfo {
        formula: formula.clone(),
        coef_names,
        factor_levels,
        numeric_variables: numeric_values.into_keys().collect(),
        factor_columns,
    };
    Ok((matrix, info))
}

/// Check that the model matrix has full column rank
///
/// Zero columns (level combinations without samples) and linear
/// dependence between terms are reported separately.
pub fn check_full_rank(matrix: &Array2<f64>, coef_names: &[String]) -> Result<()> {
    let (nrow, ncol) = matrix.dim();
    if nrow == 0 || ncol == 0 {
        return Err(AnalysisError::InvalidDesign {
            reason: "model matrix has zero rows or columns".to_string(),
        });
    }

    let zero: Vec<&str> = (0..ncol)
        .filter(|&j| matrix.column(j).iter().all(|&v| v == 0.0))
        .map(|j| coef_names[j].as_str())
        .collect();
    if !zero.is_empty() {
        return Err(AnalysisError::InvalidDesign {
            reason: format!(
                "the model matrix is not full rank: levels or combinations of levels without any samples \
                 gave all-zero columns ({})",
                zero.join(", ")
            ),
        });
    }

    let (rank, pivot) = qr_rank(matrix, 1e-7);
    if rank < ncol {
        let dependent: Vec<&str> = pivot[rank..].iter().map(|&j| coef_names[j].as_str()).collect();
        return Err(AnalysisError::InvalidDesign {
            reason: format!(
                "the model matrix is not full rank: {} are linear combinations of other terms \
                 and must be removed from the design",
                dependent.join(", ")
            ),
        });
    }
    if nrow <= ncol {
        return Err(AnalysisError::InvalidDesign {
            reason: format!(
                "the design has as many coefficients ({}) as samples ({}); no residual degrees of freedom",
                ncol, nrow
            ),
        });
    }
    Ok(())
}

/// Resolve a contrast to a numeric vector over the coefficients
///
/// Returns the vector and a human-readable label.
pub fn contrast_vector(info: &DesignInfo, contrast: &Contrast) -> Result<(Vec<f64>, String)> {
    let p = info.n_coefs();
    match contrast {
        Contrast::Coefficient(name) => {
            let idx = info.coef_index(name).ok_or_else(|| AnalysisError::InvalidContrast {
                reason: format!(
                    "coefficient '{}' not found; available: {}",
                    name,
                    info.coef_names.join(", ")
                ),
            })?;
            let mut v = vec![0.0; p];
            v[idx] = 1.0;
            Ok((v, name.clone()))
        }
        Contrast::Factor {
            variable,
            numerator,
            denominator,
        } => {
            if numerator == denominator {
                return Err(AnalysisError::InvalidContrast {
                    reason: format!("numerator and denominator are both '{}'", numerator),
                });
            }
            let levels = info.factor_levels.get(variable).ok_or_else(|| AnalysisError::InvalidContrast {
                reason: format!("'{}' is not a factor in the design", variable),
            })?;
            let columns = info.factor_columns.get(variable).ok_or_else(|| AnalysisError::InvalidContrast {
                reason: format!("'{}' appears only in interaction terms", variable),
            })?;
            for level in [numerator, denominator] {
                if !levels.contains(level) {
                    return Err(AnalysisError::InvalidContrast {
                        reason: format!(
                            "'{}' is not a level of '{}' ({})",
                            level,
                            variable,
                            levels.join(", ")
                        ),
                    });
                }
            }
            let mut v = vec![0.0; p];
            if let Some(&j) = columns.get(numerator) {
                v[j] += 1.0;
            }
            if let Some(&j) = columns.get(denominator) {
                v[j] -= 1.0;
            }
            let label = format!("{} {} vs {}", variable, numerator, denominator);
            Ok((v, label))
        }
        Contrast::List { numerator, denominator } => {
            let mut v = vec![0.0; p];
            for (names, sign) in [(numerator, 1.0), (denominator, -1.0)] {
                for name in names {
                    let idx = info.coef_index(name).ok_or_else(|| AnalysisError::InvalidContrast {
                        reason: format!("coefficient '{}' not found", name),
                    })?;
                    v[idx] += sign;
                }
            }
            if v.iter().all(|&x| x == 0.0) {
                return Err(AnalysisError::InvalidContrast {
                    reason: "contrast list selects no coefficients".to_string(),
                });
            }
            Ok((v, format!("{} vs {}", numerator.join("+"), denominator.join("+"))))
        }
        Contrast::Numeric(values) => {
            if values.len() != p {
                return Err(AnalysisError::InvalidContrast {
                    reason: format!("numeric contrast has {} values, design has {} coefficients", values.len(), p),
                });
            }
            if values.iter().all(|&x| x == 0.0) {
                return Err(AnalysisError::InvalidContrast {
                    reason: "numeric contrast is all zero".to_string(),
                });
            }
            Ok((values.clone(), "numeric contrast".to_string()))
        }
    }
}

/// Index of the single coefficient a contrast selects, if it is one
pub fn single_coefficient(vector: &[f64]) -> Option<usize> {
    let nonzero: Vec<usize> = vector
        .iter()
        .enumerate()
        .filter(|(_, &v)| v != 0.0)
        .map(|(i, _)| i)
        .collect();
    match nonzero.as_slice() {
        [i] if vector[*i] == 1.0 => Some(*i),
        _ => None,
    }
}
