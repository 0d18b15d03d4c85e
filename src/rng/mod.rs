//! Seeded random number generation for simulated count data
//!
//! A Mersenne Twister (MT19937) driving normal, gamma, Poisson and
//! negative binomial draws. Sequences depend only on the seed, so simulated
//! datasets are reproducible across platforms.

use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::gamma::ln_gamma;

const N: usize = 624;
const M: usize = 397;
const MATRIX_A: u32 = 0x9908_B0DF;
const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7FFF_FFFF;

/// MT19937 with the reference `init_genrand` seeding
pub struct MersenneTwister {
    state: [u32; N],
    index: usize,
    normal: Option<Normal>,
}

impl MersenneTwister {
    pub fn new(seed: u32) -> Self {
        let mut state = [0u32; N];
        state[0] = seed;
        for i in 1..N {
            let prev = state[i - 1];
            state[i] = 1_812_433_253u32
                .wrapping_mul(prev ^ (prev >> 30))
                .wrapping_add(i as u32);
        }
        Self {
            state,
            index: N,
            normal: Normal::new(0.0, 1.0).ok(),
        }
    }

    fn twist(&mut self) {
        for i in 0..N {
            let y = (self.state[i] & UPPER_MASK) | (self.state[(i + 1) % N] & LOWER_MASK);
            let mut next = self.state[(i + M) % N] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.state[i] = next;
        }
        self.index = 0;
    }

    pub fn next_u32(&mut self) -> u32 {
        if self.index >= N {
            self.twist();
        }
        let mut y = self.state[self.index];
        self.index += 1;
        y ^= y >> 11;
        y ^= (y << 7) & 0x9D2C_5680;
        y ^= (y << 15) & 0xEFC6_0000;
        y ^ (y >> 18)
    }

    /// Uniform on the open interval (0, 1)
    pub fn runif(&mut self) -> f64 {
        (self.next_u32() as f64 + 0.5) / 4_294_967_296.0
    }

    /// Standard normal by inversion
    pub fn rnorm(&mut self) -> f64 {
        let u = self.runif();
        match &self.normal {
            Some(n) => n.inverse_cdf(u),
            None => f64::NAN,
        }
    }

    /// Gamma(shape, scale) by Marsaglia and Tsang's squeeze method
    pub fn rgamma(&mut self, shape: f64, scale: f64) -> f64 {
        if shape <= 0.0 || scale <= 0.0 {
            return 0.0;
        }
        if shape < 1.0 {
            // boost: Gamma(a) = Gamma(a + 1) * U^(1/a)
            let u = self.runif();
            return self.rgamma(shape + 1.0, scale) * u.powf(1.0 / shape);
        }
        let d = shape - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();
        loop {
            let x = self.rnorm();
            let v = (1.0 + c * x).powi(3);
            if v <= 0.0 {
                continue;
            }
            let u = self.runif();
            if u < 1.0 - 0.0331 * x.powi(4) || u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
                return d * v * scale;
            }
        }
    }

    /// Poisson draw; multiplication of uniforms below 30, transformed rejection above
    pub fn rpois(&mut self, lambda: f64) -> f64 {
        if lambda.is_nan() || lambda <= 0.0 {
            return 0.0;
        }
        if lambda < 30.0 {
            let limit = (-lambda).exp();
            let mut k = 0.0;
            let mut p = self.runif();
            while p > limit {
                k += 1.0;
                p *= self.runif();
            }
            return k;
        }
        self.rpois_ptrs(lambda)
    }

    /// Hormann's PTRS algorithm for large means
    fn rpois_ptrs(&mut self, lambda: f64) -> f64 {
        let slam = lambda.sqrt();
        let loglam = lambda.ln();
        let b = 0.931 + 2.53 * slam;
        let a = -0.059 + 0.02483 * b;
        let inv_alpha = 1.1239 + 1.1328 / (b - 3.4);
        let vr = 0.9277 - 3.6224 / (b - 2.0);
        loop {
            let u = self.runif() - 0.5;
            let v = self.runif();
            let us = 0.5 - u.abs();
            let k = ((2.0 * a / us + b) * u + lambda + 0.43).floor();
            if us >= 0.07 && v <= vr {
                return k;
            }
            if k < 0.0 || (us < 0.013 && v > us) {
                continue;
            }
            if (v * inv_alpha / (a / (us * us) + b)).ln() <= -lambda + k * loglam - ln_gamma(k + 1.0) {
                return k;
            }
        }
    }

    /// Negative binomial with mean `mu` and dispersion `alpha` as a gamma-Poisson mixture
    pub fn rnbinom(&mut self, mu: f64, alpha: f64) -> f64 {
        if alpha <= 0.0 {
            return self.rpois(mu);
        }
        let size = 1.0 / alpha;
        let lambda = self.rgamma(size, mu / size);
        self.rpois(lambda)
    }
}
