use itertools::izip;
use multiversion::multiversion;
use statrs::function::gamma::ln_gamma;

/// Smallest probability we take the log of.
pub(crate) const PROBABILITY_FLOOR: f64 = 1e-323;

/// `ln(k!)` for a real valued count, `ln Γ(k + 1)`.
pub(crate) fn ln_factorial(k: f64) -> f64 {
    ln_gamma(k + 1.)
}

/// Poisson log probability of `k` events with mean `mu`, floored at
/// `ln(PROBABILITY_FLOOR)`.
#[inline]
pub(crate) fn poisson_ln_pmf(k: f64, ln_k_factorial: f64, mu: f64) -> f64 {
    let floor = PROBABILITY_FLOOR.ln();
    let logp = if mu == 0. {
        if k == 0. {
            0.
        } else {
            f64::NEG_INFINITY
        }
    } else {
        k * mu.ln() - mu - ln_k_factorial
    };
    // NAN compares false and falls through to the floor as well
    if logp > floor {
        logp
    } else {
        floor
    }
}

/// Sum of floored Poisson log probabilities of the observations given the
/// expected counts.
#[multiversion(targets = "simd")]
pub(crate) fn poisson_ln_likelihood(observed: &[f64], ln_factorials: &[f64], expected: &[f64]) -> f64 {
    let n = observed.len();
    assert!(ln_factorials.len() == n);
    assert!(expected.len() == n);

    izip!(observed, ln_factorials, expected)
        .map(|(&k, &ln_fact, &mu)| poisson_ln_pmf(k, ln_fact, mu))
        .sum()
}

/// Metropolis acceptance probability `min(1, exp(proposed - current))`.
///
/// A proposal with zero density is never accepted, any proposal with positive
/// density is accepted from a state with zero density.
pub fn acceptance_probability(current_logp: f64, proposed_logp: f64) -> f64 {
    if proposed_logp == f64::NEG_INFINITY || proposed_logp.is_nan() {
        return 0.;
    }
    if current_logp == f64::NEG_INFINITY {
        return 1.;
    }
    let ratio = (proposed_logp - current_logp).exp();
    if ratio.is_nan() {
        return 0.;
    }
    ratio.min(1.)
}
