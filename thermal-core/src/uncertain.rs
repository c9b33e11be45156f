//! Scalar-or-distribution numeric values for uncertainty propagation.
//!
//! Every quantity in the compensation pipeline that is not exactly known (a
//! raw ADC code widened by quantization noise, the measurand emissivity) is
//! represented as an [`UncertainValue`] instead of a bare `f64`. Arithmetic
//! on these values propagates the distribution through every downstream
//! step, so an output temperature computed from an uncertain input is itself
//! a distribution.
//!
//! Distributions are carried as Monte Carlo ensembles: a fixed number of
//! sampled scalars to which every operation applies member-wise. Only
//! uniform distributions are ever introduced by this crate, and all
//! downstream math is applied uniformly per member, which makes the ensemble
//! representation both simple and statistically faithful. The ensemble size
//! is chosen at the point a distribution is created (see
//! [`UncertainValue::uniform`]) and is the accuracy/performance knob of the
//! whole pipeline.
//!
//! Values are never mutated after creation; every operation produces a new
//! value.

use rand::Rng;
use rand_distr::{Distribution, Uniform};
use thiserror::Error;

/// Errors from constructing uncertain values.
#[derive(Debug, Error, PartialEq)]
pub enum UncertainError {
    /// Uniform interval bounds were non-finite or not strictly ordered.
    #[error("invalid uniform interval [{lo}, {hi}]")]
    InvalidInterval { lo: f64, hi: f64 },

    /// An ensemble must contain at least one sample.
    #[error("ensemble size must be nonzero")]
    EmptyEnsemble,
}

/// A numeric quantity that is either an exact scalar or a Monte Carlo
/// ensemble of samples drawn from some distribution.
///
/// Binary operators broadcast an `Exact` value (or a single-sample ensemble)
/// against an ensemble of any size. Combining two ensembles pairs their
/// members index-wise; member `k` of every ensemble in one pipeline run
/// represents the same coherent draw of all inputs, which preserves
/// correlations (e.g. the same emissivity sample dividing every pixel).
/// Combining two ensembles of different sizes is a programming error and
/// panics.
#[derive(Debug, Clone, PartialEq)]
pub enum UncertainValue {
    /// A known scalar; arithmetic on it stays exact.
    Exact(f64),
    /// Samples of a distribution. Invariant: never empty.
    Ensemble(Vec<f64>),
}

impl UncertainValue {
    /// Wrap an exactly known scalar.
    pub fn exact(value: f64) -> Self {
        UncertainValue::Exact(value)
    }

    /// Draw `samples` values uniformly from `[lo, hi]`.
    pub fn uniform<R: Rng + ?Sized>(
        lo: f64,
        hi: f64,
        samples: usize,
        rng: &mut R,
    ) -> Result<Self, UncertainError> {
        if samples == 0 {
            return Err(UncertainError::EmptyEnsemble);
        }
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(UncertainError::InvalidInterval { lo, hi });
        }
        let dist = Uniform::new_inclusive(lo, hi)
            .map_err(|_| UncertainError::InvalidInterval { lo, hi })?;
        Ok(UncertainValue::Ensemble(
            (0..samples).map(|_| dist.sample(rng)).collect(),
        ))
    }

    /// Build an ensemble from pre-drawn samples.
    pub fn from_samples(samples: Vec<f64>) -> Result<Self, UncertainError> {
        if samples.is_empty() {
            return Err(UncertainError::EmptyEnsemble);
        }
        Ok(UncertainValue::Ensemble(samples))
    }

    /// Number of samples carried (1 for an exact value).
    pub fn len(&self) -> usize {
        match self {
            UncertainValue::Exact(_) => 1,
            UncertainValue::Ensemble(s) => s.len(),
        }
    }

    /// Always false; kept for `len`/`is_empty` symmetry.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// True when the value carries no distribution.
    pub fn is_exact(&self) -> bool {
        matches!(self, UncertainValue::Exact(_))
    }

    /// Sample `i`, broadcasting exact and single-sample values.
    fn get(&self, i: usize) -> f64 {
        match self {
            UncertainValue::Exact(v) => *v,
            UncertainValue::Ensemble(s) => {
                if s.len() == 1 {
                    s[0]
                } else {
                    s[i]
                }
            }
        }
    }

    /// Apply `f` to every member.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> UncertainValue {
        match self {
            UncertainValue::Exact(v) => UncertainValue::Exact(f(*v)),
            UncertainValue::Ensemble(s) => {
                UncertainValue::Ensemble(s.iter().map(|&x| f(x)).collect())
            }
        }
    }

    /// Combine two values member-wise, broadcasting exact values.
    ///
    /// # Panics
    /// Panics if both are ensembles of different (non-unit) sizes.
    pub fn zip_with(&self, other: &UncertainValue, f: impl Fn(f64, f64) -> f64) -> UncertainValue {
        let n = broadcast_len(&[self.len(), other.len()]);
        if n == 1 {
            return UncertainValue::Exact(f(self.get(0), other.get(0)));
        }
        UncertainValue::Ensemble((0..n).map(|i| f(self.get(i), other.get(i))).collect())
    }

    /// Combine three values member-wise, broadcasting exact values.
    ///
    /// Needed where downstream math branches on one uncertain quantity while
    /// consuming others (e.g. range selection from a coarse temperature
    /// estimate).
    ///
    /// # Panics
    /// Panics if ensembles of different (non-unit) sizes are mixed.
    pub fn zip3_with(
        a: &UncertainValue,
        b: &UncertainValue,
        c: &UncertainValue,
        f: impl Fn(f64, f64, f64) -> f64,
    ) -> UncertainValue {
        let n = broadcast_len(&[a.len(), b.len(), c.len()]);
        if n == 1 {
            return UncertainValue::Exact(f(a.get(0), b.get(0), c.get(0)));
        }
        UncertainValue::Ensemble((0..n).map(|i| f(a.get(i), b.get(i), c.get(i))).collect())
    }

    /// Member-wise square root.
    pub fn sqrt(&self) -> UncertainValue {
        self.map(f64::sqrt)
    }

    /// Ensemble mean (the value itself when exact).
    pub fn mean(&self) -> f64 {
        match self {
            UncertainValue::Exact(v) => *v,
            UncertainValue::Ensemble(s) => s.iter().sum::<f64>() / s.len() as f64,
        }
    }

    /// Unbiased sample variance; zero for exact or single-sample values.
    pub fn variance(&self) -> f64 {
        match self {
            UncertainValue::Exact(_) => 0.0,
            UncertainValue::Ensemble(s) => {
                if s.len() < 2 {
                    return 0.0;
                }
                let mean = self.mean();
                s.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / (s.len() - 1) as f64
            }
        }
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Smallest sample (support lower edge).
    pub fn min(&self) -> f64 {
        match self {
            UncertainValue::Exact(v) => *v,
            UncertainValue::Ensemble(s) => s.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }

    /// Largest sample (support upper edge).
    pub fn max(&self) -> f64 {
        match self {
            UncertainValue::Exact(v) => *v,
            UncertainValue::Ensemble(s) => s.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Common broadcast size for a set of operand lengths.
fn broadcast_len(lens: &[usize]) -> usize {
    let n = lens.iter().copied().max().unwrap_or(1);
    for &l in lens {
        assert!(l == 1 || l == n, "mismatched ensemble sizes: {} vs {}", l, n);
    }
    n
}

macro_rules! impl_binop {
    ($trait:ident, $method:ident) => {
        impl std::ops::$trait for UncertainValue {
            type Output = UncertainValue;
            fn $method(self, rhs: UncertainValue) -> UncertainValue {
                self.zip_with(&rhs, |a, b| std::ops::$trait::$method(a, b))
            }
        }

        impl std::ops::$trait<f64> for UncertainValue {
            type Output = UncertainValue;
            fn $method(self, rhs: f64) -> UncertainValue {
                self.map(|a| std::ops::$trait::$method(a, rhs))
            }
        }

        impl std::ops::$trait<UncertainValue> for f64 {
            type Output = UncertainValue;
            fn $method(self, rhs: UncertainValue) -> UncertainValue {
                rhs.map(|b| std::ops::$trait::$method(self, b))
            }
        }
    };
}

impl_binop!(Add, add);
impl_binop!(Sub, sub);
impl_binop!(Mul, mul);
impl_binop!(Div, div);
