//! Negative binomial distribution utilities

use statrs::function::gamma::ln_gamma;

/// Floor on fitted means during GLM fitting and dispersion estimation
pub const MIN_MU: f64 = 0.5;

/// Any |beta| above this (natural log scale) stops IRLS and flags the gene
pub const MAX_LFC_BETA: f64 = 30.0;

/// Maximum linear predictor, keeps exp() finite
pub const MAX_ETA: f64 = 700.0;

/// Mean from a linear predictor and a normalization factor
pub fn nb_mean(eta: f64, norm_factor: f64) -> f64 {
    norm_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Var(Y) = mu + alpha * mu^2
pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// Log density of y under NB(mean mu, dispersion alpha)
///
/// Parameterized by size = 1/alpha and prob = size / (size + mu).
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    let log_prob = (size / (size + mu)).ln();
    let log_1m_prob = (mu / (size + mu)).ln();
    let kernel = if y > 0.0 { y * log_1m_prob } else { 0.0 };
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) + size * log_prob + kernel
}

/// IRLS weight mu / (1 + alpha * mu); mu should already be floored
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nb_mean_with_offset() {
        let mu = nb_mean(2.0, 1.5);
        assert!((mu - 1.5 * 2.0_f64.exp()).abs() < 1e-10);
        assert!(nb_mean(1e6, 1.0).is_finite());
    }

    #[test]
    fn test_nb_variance() {
        let var = nb_variance(10.0, 0.1);
        assert!((var - 20.0).abs() < 1e-10);
    }

    #[test]
    fn test_nb_log_likelihood_geometric_case() {
        // alpha = 1 is the geometric distribution: p(y) = (1/(1+mu)) (mu/(1+mu))^y
        let (y, mu) = (3.0, 2.0);
        let expected = (1.0 / 3.0f64).ln() + y * (2.0 / 3.0f64).ln();
        assert!((nb_log_likelihood(y, mu, 1.0) - expected).abs() < 1e-10);
        assert_eq!(nb_log_likelihood(1.0, 0.0, 0.1), f64::NEG_INFINITY);
    }

    #[test]
    fn test_nb_log_likelihood_poisson_limit() {
        let ll = nb_log_likelihood(5.0, 5.0, 1e-8);
        let poisson = 5.0 * 5.0f64.ln() - 5.0 - ln_gamma(6.0);
        assert!((ll - poisson).abs() < 1e-5, "got {} vs {}", ll, poisson);
    }

    #[test]
    fn test_nb_weight() {
        let w = nb_weight(10.0, 0.1);
        assert!((w - 5.0).abs() < 1e-10);
    }
}
