//! Scalar search helpers for real-valued functions.
//!
//! The SNC engine never has closed-form optima: the Legendre parameter theta,
//! the Hölder p/q pair, and the LAMBDA confidence parameter are all found by
//! searching over a one-dimensional function. These helpers keep those loops
//! in one place.

/// Binary search over a strictly increasing function `f`.
///
/// Finds `x` in `(lo, hi)` such that `f(x)` crosses `target`. The search
/// stops once `hi - lo <= tol` and returns the midpoint of the remaining
/// range.
pub fn binary_search(mut lo: f64, mut hi: f64, target: f64, tol: f64, mut f: impl FnMut(f64) -> f64) -> f64 {
    while (hi - lo) > tol {
        let mid = lo + (hi - lo) / 2.0;
        if f(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo + (hi - lo) / 2.0
}

/// Binary search over a strictly decreasing function `f`.
///
/// `target` acts as a threshold: the search converges on the `x` where `f(x)`
/// stops exceeding `target`, not on exact equality (the function may never
/// attain `target`).
pub fn binary_search_reverse(
    mut lo: f64,
    mut hi: f64,
    target: f64,
    tol: f64,
    mut f: impl FnMut(f64) -> f64,
) -> f64 {
    while (hi - lo) > tol {
        let mid = lo + (hi - lo) / 2.0;
        if f(mid) > target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo + (hi - lo) / 2.0
}

/// Brute-force minimization of `f` on the grid `lo, lo + step, ..., hi`.
///
/// Returns the grid point with the smallest value; ties break toward the
/// earliest point. NaN evaluations never win, so `f` may return NaN for
/// invalid regions of its domain.
pub fn min_search(lo: f64, hi: f64, step: f64, mut f: impl FnMut(f64) -> f64) -> f64 {
    let mut best_x = lo;
    let mut best_val = f64::INFINITY;
    let mut x = lo;
    while x <= hi {
        let val = f(x);
        if val < best_val {
            best_val = val;
            best_x = x;
        }
        x += step;
    }
    best_x
}
