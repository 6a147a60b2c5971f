//! Adaptive rejection sampling (Gilks & Wild, 1992) for log-concave
//! univariate densities.
//!
//! The sampler keeps a sorted set of evaluated points of the target log
//! density and derives two piecewise-linear envelopes from them. Candidates
//! are drawn from the upper envelope; most are accepted by the squeeze test
//! against the lower envelope without touching the target. Every evaluation of
//! the target refines both envelopes until the point budget is spent.

use std::fmt::Debug;

use log::{trace, warn};
use once_cell::unsync::OnceCell;
use rand::distributions::Open01;
use rand::Rng;

use crate::utils::NoPrettyPrint;
use crate::{Error, Result};

pub mod envelope;

use envelope::{LowerEnvelope, UpperEnvelope};

/// Slopes closer to zero than this are treated as flat.
pub const COLLINEAR_TOLERANCE: f64 = 1e-10;
pub const DEFAULT_MAX_NUM_POINTS: usize = 50;
pub const DEFAULT_MAX_REJECTIONS: usize = 100;

/// An evaluated point `(x, ln f(x))`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug)]
struct Envelopes {
    upper: UpperEnvelope,
    lower: LowerEnvelope,
}

impl Envelopes {
    fn new(points: &[Point], min_support: f64, max_support: f64) -> Result<Self> {
        Ok(Self {
            upper: UpperEnvelope::new(points, min_support, max_support)?,
            lower: LowerEnvelope::new(points, min_support, max_support)?,
        })
    }
}

/// Sampler for a log-concave density known up to a constant.
///
/// The sampler is created in its initialized state by [`initialize`]
/// and may be drawn from any number of times.
///
/// [`initialize`]: AdaptiveRejectionSampler::initialize
pub struct AdaptiveRejectionSampler<F>
where
    F: Fn(f64) -> f64,
{
    log_density: F,
    min_support: f64,
    max_support: f64,
    points: Vec<Point>,
    max_num_points: usize,
    max_rejections: usize,
    envelopes: OnceCell<Envelopes>,
}

impl<F> Debug for AdaptiveRejectionSampler<F>
where
    F: Fn(f64) -> f64,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRejectionSampler")
            .field("support", &(self.min_support, self.max_support))
            .field("points", &NoPrettyPrint::new(&self.points))
            .field("max_num_points", &self.max_num_points)
            .field("max_rejections", &self.max_rejections)
            .finish()
    }
}

impl<F> AdaptiveRejectionSampler<F>
where
    F: Fn(f64) -> f64,
{
    /// Create a sampler seeded with three points of the log density.
    ///
    /// # Arguments
    /// * `log_density` - `ln f(x)` up to an additive constant; must be concave.
    /// * `min_support`, `max_support` - Support of the density, possibly infinite.
    /// * `x_left`, `x_mid`, `x_right` - Seed abscissae, strictly increasing and
    ///   inside the support. With an infinite bound the outer seeds must lie on
    ///   either side of the mode so the envelope can be normalized.
    pub fn initialize(
        log_density: F,
        min_support: f64,
        max_support: f64,
        x_left: f64,
        x_mid: f64,
        x_right: f64,
    ) -> Result<Self> {
        let ordered = min_support <= x_left
            && x_left < x_mid
            && x_mid < x_right
            && x_right <= max_support;
        if !ordered {
            return Err(Error::InvalidSeedPoints {
                min_support,
                max_support,
                x_left,
                x_mid,
                x_right,
            });
        }

        let points = [x_left, x_mid, x_right]
            .into_iter()
            .map(|x| {
                let y = log_density(x);
                if y.is_finite() {
                    Ok(Point { x, y })
                } else {
                    Err(Error::NonFiniteLogDensity { x })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            log_density,
            min_support,
            max_support,
            points,
            max_num_points: DEFAULT_MAX_NUM_POINTS,
            max_rejections: DEFAULT_MAX_REJECTIONS,
            envelopes: OnceCell::new(),
        })
    }

    /// Cap on the number of stored points. Never below the three seeds.
    #[must_use]
    pub fn with_max_num_points(mut self, max_num_points: usize) -> Self {
        self.max_num_points = max_num_points.max(3);
        self
    }

    /// Number of candidates tried per draw before giving up.
    #[must_use]
    pub fn with_max_rejections(mut self, max_rejections: usize) -> Self {
        self.max_rejections = max_rejections;
        self
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn support(&self) -> (f64, f64) {
        (self.min_support, self.max_support)
    }

    pub fn log_density(&self, x: f64) -> f64 {
        (self.log_density)(x)
    }

    /// Evaluate the log density at `x` and record the point.
    pub fn add_point(&mut self, x: f64) -> bool {
        let y = (self.log_density)(x);
        self.add_point_with_value(x, y)
    }

    /// Record an already evaluated point.
    ///
    /// Returns `false` when the point was not recorded: the budget is spent,
    /// `x` is already present or outside the support, or `y` is not finite.
    pub fn add_point_with_value(&mut self, x: f64, y: f64) -> bool {
        if self.points.len() >= self.max_num_points {
            trace!("ars point budget of {} exhausted", self.max_num_points);
            return false;
        }
        if !y.is_finite() || !(self.min_support..=self.max_support).contains(&x) {
            return false;
        }

        match self.points.binary_search_by(|p| p.x.total_cmp(&x)) {
            Ok(_) => false,
            Err(idx) => {
                self.points.insert(idx, Point { x, y });
                self.envelopes.take();
                true
            }
        }
    }

    fn envelopes(&self) -> Result<&Envelopes> {
        self.envelopes
            .get_or_try_init(|| Envelopes::new(&self.points, self.min_support, self.max_support))
    }

    pub fn upper_envelope(&self) -> Result<&UpperEnvelope> {
        self.envelopes().map(|e| &e.upper)
    }

    pub fn lower_envelope(&self) -> Result<&LowerEnvelope> {
        self.envelopes().map(|e| &e.lower)
    }

    /// Draw one value from the target density.
    pub fn sample<R: Rng>(&mut self, rng: &mut R) -> Result<f64> {
        for _ in 0..self.max_rejections {
            let (x, u, ln_upper, ln_squeeze) = {
                let envelopes = self.envelopes()?;
                let x = envelopes.upper.draw(rng);
                let u: f64 = rng.sample(Open01);
                let ln_upper = envelopes.upper.ln_eval(x);
                (x, u, ln_upper, envelopes.lower.ln_eval(x) - ln_upper)
            };

            if u <= ln_squeeze.exp() {
                return Ok(x);
            }

            let y = (self.log_density)(x);
            self.add_point_with_value(x, y);
            if u <= (y - ln_upper).exp() {
                return Ok(x);
            }
        }

        warn!(
            "ars: no candidate accepted after {} attempts ({} points)",
            self.max_rejections,
            self.points.len()
        );
        Err(Error::RejectionLimit {
            attempts: self.max_rejections,
        })
    }

    /// Draw `n` values.
    pub fn sample_n<R: Rng>(&mut self, n: usize, rng: &mut R) -> Result<Vec<f64>> {
        (0..n).map(|_| self.sample(rng)).collect()
    }
}
