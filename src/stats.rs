//! Two-sample and goodness-of-fit tests used by the validator.
//!
//! - Kolmogorov-Smirnov two-sample test for continuous metrics
//! - Chi-squared goodness-of-fit for categorical metrics, with sparse
//!   categories pooled into an `other` bucket first

// Statistical computation requires casts, similar variable names, and float literals
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::similar_names)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::suboptimal_flops)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Label of the bucket sparse categories are pooled into.
pub const POOLED_LABEL: &str = "other";

/// Minimum expected count for a category to stand alone.
pub const MIN_EXPECTED: f64 = 5.0;

/// Statistic and p-value of a test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Test statistic (KS D or chi-squared)
    pub statistic: f64,
    /// P-value under the null hypothesis of equal distributions
    pub p_value: f64,
}

/// Kolmogorov-Smirnov two-sample test
///
/// Tests whether two samples come from the same distribution.
/// The statistic D is the maximum absolute difference between CDFs.
/// Non-finite values are ignored.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if either sample has no finite values.
pub fn ks_two_sample(sample: &[f64], reference: &[f64]) -> Result<TestOutcome> {
    let mut a: Vec<f64> = sample.iter().copied().filter(|x| x.is_finite()).collect();
    let mut b: Vec<f64> = reference
        .iter()
        .copied()
        .filter(|x| x.is_finite())
        .collect();

    if a.is_empty() || b.is_empty() {
        return Err(Error::invalid_input(
            "Cannot perform KS test without finite values in both samples",
        ));
    }

    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let d_statistic = ks_statistic(&a, &b);

    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let en = (n1 * n2 / (n1 + n2)).sqrt();

    Ok(TestOutcome {
        statistic: d_statistic,
        p_value: ks_p_value(d_statistic * en),
    })
}

/// Maximum CDF difference of two sorted samples (merge walk).
fn ks_statistic(a: &[f64], b: &[f64]) -> f64 {
    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let (mut i, mut j) = (0, 0);
    let mut max_diff = 0.0_f64;

    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        max_diff = max_diff.max((i as f64 / n1 - j as f64 / n2).abs());
    }

    max_diff
}

/// Survival function of the Kolmogorov distribution, `P(K > z)`.
///
/// Below `z = 1.18` the alternating series converges too slowly, so the
/// complementary series `sqrt(2 pi) / z * sum exp(-(2k-1)^2 pi^2 / (8 z^2))`
/// is used for the CDF instead.
fn ks_p_value(z: f64) -> f64 {
    if z <= 0.0 {
        return 1.0;
    }
    if z > 3.0 {
        return 0.0;
    }

    if z < 1.18 {
        let factor = -std::f64::consts::PI * std::f64::consts::PI / (8.0 * z * z);
        let mut cdf = 0.0;
        for k in 1..=5 {
            let odd = f64::from(2 * k - 1);
            cdf += (factor * odd * odd).exp();
        }
        cdf *= (2.0 * std::f64::consts::PI).sqrt() / z;
        return (1.0 - cdf).clamp(0.0, 1.0);
    }

    // P(K > z) = 2 * sum_{k=1}^inf (-1)^(k-1) * exp(-2*k^2*z^2)
    let mut p = 0.0;
    let z_sq = z * z;

    for k in 1..=100 {
        let k_f = f64::from(k);
        let term = (-1.0_f64).powi(k - 1) * (-2.0 * k_f * k_f * z_sq).exp();
        p += term;
        if term.abs() < 1e-12 {
            break;
        }
    }

    (2.0 * p).clamp(0.0, 1.0)
}

/// One bucket of a goodness-of-fit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryBucket {
    /// Category label, or [`POOLED_LABEL`]
    pub label: String,
    /// Count in the sample
    pub observed: usize,
    /// Population frequency scaled to sample size
    pub expected: f64,
}

/// Chi-squared goodness-of-fit result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodnessOfFit {
    /// Statistic and p-value
    pub outcome: TestOutcome,
    /// Degrees of freedom (buckets - 1)
    pub degrees_of_freedom: usize,
    /// Buckets after pooling
    pub buckets: Vec<CategoryBucket>,
    /// Categories folded into the pooled bucket
    pub pooled: Vec<String>,
}

/// Chi-squared goodness-of-fit of sample counts against population counts.
///
/// Expected counts are population frequencies scaled to the sample size.
/// Categories with expected count below [`MIN_EXPECTED`] are pooled into one
/// bucket. With fewer than two buckets left the statistic is still reported
/// but the test has no degrees of freedom and the p-value is 1.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if either table is empty.
pub fn chi_squared_goodness_of_fit(
    sample: &BTreeMap<String, usize>,
    population: &BTreeMap<String, usize>,
) -> Result<GoodnessOfFit> {
    let n_sample: usize = sample.values().sum();
    let n_population: usize = population.values().sum();

    if n_sample == 0 || n_population == 0 {
        return Err(Error::invalid_input(
            "Cannot perform chi-squared test on empty counts",
        ));
    }

    let scale = n_sample as f64 / n_population as f64;

    let mut buckets = Vec::new();
    let mut pooled = Vec::new();
    let mut other = CategoryBucket {
        label: POOLED_LABEL.to_string(),
        observed: 0,
        expected: 0.0,
    };

    for (label, &count) in population {
        let expected = count as f64 * scale;
        let observed = sample.get(label).copied().unwrap_or(0);
        if expected < MIN_EXPECTED {
            other.observed += observed;
            other.expected += expected;
            pooled.push(label.clone());
        } else {
            buckets.push(CategoryBucket {
                label: label.clone(),
                observed,
                expected,
            });
        }
    }

    // Sample categories unknown to the population can only go to the pool
    for (label, &count) in sample {
        if !population.contains_key(label) {
            other.observed += count;
            pooled.push(label.clone());
        }
    }

    if !pooled.is_empty() {
        buckets.push(other);
    }

    let chi_sq: f64 = buckets
        .iter()
        .filter(|b| b.expected > 0.0)
        .map(|b| (b.observed as f64 - b.expected).powi(2) / b.expected)
        .sum();

    let df = buckets.len().saturating_sub(1);

    Ok(GoodnessOfFit {
        outcome: TestOutcome {
            statistic: chi_sq,
            p_value: chi_squared_p_value(chi_sq, df),
        },
        degrees_of_freedom: df,
        buckets,
        pooled,
    })
}

/// Upper-tail probability of the chi-squared distribution.
pub fn chi_squared_p_value(chi_sq: f64, df: usize) -> f64 {
    if df == 0 || chi_sq <= 0.0 {
        return 1.0;
    }
    if !chi_sq.is_finite() {
        return 0.0;
    }
    regularized_gamma_q(df as f64 / 2.0, chi_sq / 2.0).clamp(0.0, 1.0)
}

/// Regularized upper incomplete gamma Q(a, x).
fn regularized_gamma_q(a: f64, x: f64) -> f64 {
    if x < a + 1.0 {
        1.0 - gamma_series(a, x)
    } else {
        gamma_continued_fraction(a, x)
    }
}

/// Series expansion of P(a, x), valid for x < a + 1.
fn gamma_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut sum = 1.0 / a;
    let mut term = sum;
    for _ in 0..500 {
        ap += 1.0;
        term *= x / ap;
        sum += term;
        if term.abs() < sum.abs() * 1e-15 {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

/// Lentz continued fraction for Q(a, x), valid for x >= a + 1.
fn gamma_continued_fraction(a: f64, x: f64) -> f64 {
    const TINY: f64 = 1e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..500 {
        let i_f = f64::from(i);
        let an = -i_f * (i_f - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < 1e-15 {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// Lanczos approximation of ln Γ(x) for x > 0.
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000000000190015;
    for c in COEFFS {
        y += 1.0;
        series += c / y;
    }
    -tmp + (2.5066282746310005 * series / x).ln()
}
