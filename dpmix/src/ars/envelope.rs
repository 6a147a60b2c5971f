//! Piecewise-linear bounds on a log-concave log density.
//!
//! Both envelopes are built from the secant lines through consecutive support
//! points. The upper envelope extends neighbouring secants over each interval
//! and takes the lower of the two, which bounds a concave function from
//! above. The lower envelope is the chord itself, which bounds it from below
//! between the outermost points and is `-inf` elsewhere.

use itertools::Itertools;
use rand::distributions::Open01;
use rand::Rng;

use super::{Point, COLLINEAR_TOLERANCE};
use crate::utils::ln_sum_exp;
use crate::{Error, Result};

/// A line through a fixed anchor.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Line {
    x0: f64,
    y0: f64,
    slope: f64,
}

impl Line {
    fn through(a: &Point, b: &Point) -> Self {
        Self {
            x0: a.x,
            y0: a.y,
            slope: (b.y - a.y) / (b.x - a.x),
        }
    }

    fn intercept(&self) -> f64 {
        self.y0 - self.slope * self.x0
    }

    /// Abscissa where the two lines cross, `None` when they are parallel.
    fn intersect(&self, other: &Self) -> Option<f64> {
        let d_slope = self.slope - other.slope;
        if d_slope.abs() < COLLINEAR_TOLERANCE {
            None
        } else {
            Some((other.intercept() - self.intercept()) / d_slope)
        }
    }

    fn over(self, start: f64, end: f64) -> LineSegment {
        LineSegment {
            start,
            end,
            x0: self.x0,
            y0: self.y0,
            slope: self.slope,
        }
    }
}

/// A linear piece of an envelope, valid on `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineSegment {
    start: f64,
    end: f64,
    x0: f64,
    y0: f64,
    slope: f64,
}

impl LineSegment {
    /// A segment carrying no probability mass.
    fn vanishing(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            x0: start,
            y0: f64::NEG_INFINITY,
            slope: 0.0,
        }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    /// Value of the line at `x`, ignoring the segment bounds.
    pub fn ln_eval(&self, x: f64) -> f64 {
        if self.y0 == f64::NEG_INFINITY {
            f64::NEG_INFINITY
        } else {
            self.y0 + self.slope * (x - self.x0)
        }
    }

    fn is_flat(&self) -> bool {
        self.slope.abs() < COLLINEAR_TOLERANCE
    }

    /// Log of `∫ exp(line)` over the segment.
    ///
    /// Returns `+inf` when the integral diverges, i.e. the segment is
    /// unbounded in a direction the line does not decay toward.
    pub fn ln_mass(&self) -> f64 {
        let width = self.end - self.start;
        if width <= 0.0 || self.y0 == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }

        let s = self.slope;
        if self.is_flat() {
            if width.is_finite() {
                self.ln_eval(self.start) + width.ln()
            } else {
                f64::INFINITY
            }
        } else if s > 0.0 {
            if self.end.is_infinite() {
                return f64::INFINITY;
            }
            // Anchor at the right edge, where the line is largest.
            self.ln_eval(self.end) + (-(-s * width).exp_m1()).ln() - s.ln()
        } else {
            if self.start.is_infinite() {
                return f64::INFINITY;
            }
            self.ln_eval(self.start) + (-(s * width).exp_m1()).ln() - (-s).ln()
        }
    }

    /// Inverse CDF of the density proportional to `exp(line)` on the segment.
    pub fn inverse_cdf(&self, u: f64) -> f64 {
        let s = self.slope;
        let width = self.end - self.start;
        let x = if self.is_flat() {
            self.start + u * width
        } else if s > 0.0 {
            self.end + (u + (1.0 - u) * (-s * width).exp()).ln() / s
        } else {
            self.start + (1.0 - u + u * (s * width).exp()).ln() / s
        };
        x.clamp(self.start, self.end)
    }
}

fn segment_index(segments: &[LineSegment], x: f64) -> usize {
    segments
        .partition_point(|segment| segment.end <= x)
        .min(segments.len() - 1)
}

fn in_support(segments: &[LineSegment], x: f64) -> bool {
    match (segments.first(), segments.last()) {
        (Some(first), Some(last)) => x >= first.start && x <= last.end,
        _ => false,
    }
}

/// Upper bound on the log density, normalized into a piecewise-exponential
/// distribution that can be sampled directly.
#[derive(Clone, Debug, PartialEq)]
pub struct UpperEnvelope {
    segments: Vec<LineSegment>,
    cdf: Vec<f64>,
    ln_mass: f64,
}

impl UpperEnvelope {
    /// Build the `2N - 2` segment hull over `N >= 3` sorted points.
    pub fn new(points: &[Point], min_support: f64, max_support: f64) -> Result<Self> {
        let n = points.len();
        if n < 3 {
            return Err(Error::TooFewPoints {
                needed: 3,
                found: n,
            });
        }

        let lines: Vec<Line> = points
            .iter()
            .tuple_windows()
            .map(|(a, b)| Line::through(a, b))
            .collect();

        let mut segments = Vec::with_capacity(2 * n - 2);
        segments.push(lines[0].over(min_support, points[0].x));
        segments.push(lines[1].over(points[0].x, points[1].x));
        for j in 1..(n - 2) {
            let (a, b) = (points[j].x, points[j + 1].x);
            let (left, right) = (lines[j - 1], lines[j + 1]);
            let split = left
                .intersect(&right)
                .map_or(0.5 * (a + b), |z| z.clamp(a, b));
            segments.push(left.over(a, split));
            segments.push(right.over(split, b));
        }
        segments.push(lines[n - 3].over(points[n - 2].x, points[n - 1].x));
        segments.push(lines[n - 2].over(points[n - 1].x, max_support));

        let ln_masses: Vec<f64> = segments.iter().map(LineSegment::ln_mass).collect();
        if ln_masses.iter().any(|m| m.is_nan() || *m == f64::INFINITY) {
            return Err(Error::UnboundedEnvelope);
        }
        let ln_mass = ln_sum_exp(&ln_masses);
        if !ln_mass.is_finite() {
            return Err(Error::UnboundedEnvelope);
        }

        let mut acc = 0.0;
        let mut cdf: Vec<f64> = ln_masses
            .iter()
            .map(|m| {
                acc += (m - ln_mass).exp();
                acc
            })
            .collect();
        if let Some(last) = cdf.last_mut() {
            *last = 1.0;
        }

        Ok(Self {
            segments,
            cdf,
            ln_mass,
        })
    }

    pub fn segments(&self) -> &[LineSegment] {
        &self.segments
    }

    /// Log of the envelope's total (unnormalized) mass.
    pub fn ln_mass(&self) -> f64 {
        self.ln_mass
    }

    /// Envelope value at `x`; `-inf` outside the support.
    pub fn ln_eval(&self, x: f64) -> f64 {
        if in_support(&self.segments, x) {
            self.segments[segment_index(&self.segments, x)].ln_eval(x)
        } else {
            f64::NEG_INFINITY
        }
    }

    /// Draw from the normalized envelope: pick a segment by its mass, then
    /// invert that segment's CDF.
    pub fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.sample(Open01);
        let idx = self
            .cdf
            .partition_point(|&c| c < u)
            .min(self.segments.len() - 1);
        let v: f64 = rng.sample(Open01);
        self.segments[idx].inverse_cdf(v)
    }
}

/// Lower bound on the log density (the "squeeze").
#[derive(Clone, Debug, PartialEq)]
pub struct LowerEnvelope {
    segments: Vec<LineSegment>,
}

impl LowerEnvelope {
    /// Build the `N + 1` segment chord over `N >= 2` sorted points.
    pub fn new(points: &[Point], min_support: f64, max_support: f64) -> Result<Self> {
        let n = points.len();
        if n < 2 {
            return Err(Error::TooFewPoints {
                needed: 2,
                found: n,
            });
        }

        let mut segments = Vec::with_capacity(n + 1);
        segments.push(LineSegment::vanishing(min_support, points[0].x));
        segments.extend(
            points
                .iter()
                .tuple_windows()
                .map(|(a, b)| Line::through(a, b).over(a.x, b.x)),
        );
        segments.push(LineSegment::vanishing(points[n - 1].x, max_support));

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[LineSegment] {
        &self.segments
    }

    pub fn ln_eval(&self, x: f64) -> f64 {
        if in_support(&self.segments, x) {
            self.segments[segment_index(&self.segments, x)].ln_eval(x)
        } else {
            f64::NEG_INFINITY
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;

    fn gaussian_points(xs: &[f64]) -> Vec<Point> {
        xs.iter()
            .map(|&x| Point {
                x,
                y: -0.5 * x * x,
            })
            .collect()
    }

    #[test]
    fn segment_counts() {
        let xs = [-3.0, -1.5, -0.5, 0.2, 1.0, 2.5, 4.0];
        for n in 3..=xs.len() {
            let points = gaussian_points(&xs[..n]);
            let upper = UpperEnvelope::new(&points, -6.0, 6.0).unwrap();
            let lower = LowerEnvelope::new(&points, -6.0, 6.0).unwrap();
            assert_eq!(upper.segments().len(), 2 * n - 2);
            assert_eq!(lower.segments().len(), n + 1);
        }
    }

    #[test]
    fn segments_tile_the_support() {
        let points = gaussian_points(&[-2.0, -1.0, 0.5, 1.0, 2.0]);
        let upper = UpperEnvelope::new(&points, -5.0, 5.0).unwrap();
        let segments = upper.segments();
        assert_eq!(segments[0].start(), -5.0);
        assert_eq!(segments[segments.len() - 1].end(), 5.0);
        for (a, b) in segments.iter().tuple_windows() {
            assert_eq!(a.end(), b.start());
            assert!(a.start() <= a.end());
        }
    }

    #[test]
    fn upper_touches_points_and_lower_outside_is_neg_inf() {
        let points = gaussian_points(&[-1.0, 0.0, 1.0, 2.0]);
        let upper = UpperEnvelope::new(&points, -4.0, 4.0).unwrap();
        let lower = LowerEnvelope::new(&points, -4.0, 4.0).unwrap();

        // The first interval is bounded by the next secant alone, which is
        // loose at the leftmost point.
        assert!(upper.ln_eval(points[0].x) > points[0].y);
        for p in &points[1..] {
            assert::close(upper.ln_eval(p.x), p.y, 1e-12);
        }
        // Chord through (0, 0) and (1, -0.5).
        assert::close(lower.ln_eval(0.5), -0.25, 1e-12);
        assert_eq!(lower.ln_eval(-3.0), f64::NEG_INFINITY);
        assert_eq!(lower.ln_eval(3.0), f64::NEG_INFINITY);
        assert_eq!(upper.ln_eval(4.5), f64::NEG_INFINITY);
    }

    #[test]
    fn unbounded_support_needs_points_around_the_mode() {
        // All left of the mode: the last secant rises toward +inf.
        let points = gaussian_points(&[-3.0, -1.5, -0.5]);
        assert!(matches!(
            UpperEnvelope::new(&points, f64::NEG_INFINITY, f64::INFINITY),
            Err(Error::UnboundedEnvelope)
        ));

        let points = gaussian_points(&[-1.5, -0.5, 1.0]);
        let upper = UpperEnvelope::new(&points, f64::NEG_INFINITY, f64::INFINITY).unwrap();
        assert_eq!(upper.segments().len(), 4);
        assert!(upper.ln_mass().is_finite());
    }

    #[test]
    fn too_few_points_are_rejected() {
        let points = gaussian_points(&[-1.0, 1.0]);
        assert!(matches!(
            UpperEnvelope::new(&points, -4.0, 4.0),
            Err(Error::TooFewPoints {
                needed: 3,
                found: 2
            })
        ));
        assert!(LowerEnvelope::new(&points, -4.0, 4.0).is_ok());
        assert!(matches!(
            LowerEnvelope::new(&points[..1], -4.0, 4.0),
            Err(Error::TooFewPoints {
                needed: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn flat_segment_mass_is_width() {
        let segment = Line {
            x0: 0.0,
            y0: 0.0,
            slope: 0.0,
        }
        .over(0.0, 2.0);
        assert::close(segment.ln_mass(), 2.0_f64.ln(), 1e-12);
        assert::close(segment.inverse_cdf(0.25), 0.5, 1e-12);
    }

    #[test]
    fn exponential_segment_mass() {
        // ∫_0^∞ exp(-x) dx = 1
        let decaying = Line {
            x0: 0.0,
            y0: 0.0,
            slope: -1.0,
        }
        .over(0.0, f64::INFINITY);
        assert::close(decaying.ln_mass(), 0.0, 1e-12);
        // median of Exp(1)
        assert::close(decaying.inverse_cdf(0.5), 2.0_f64.ln(), 1e-12);

        // ∫_{-∞}^0 exp(2x) dx = 1/2
        let growing = Line {
            x0: 0.0,
            y0: 0.0,
            slope: 2.0,
        }
        .over(f64::NEG_INFINITY, 0.0);
        assert::close(growing.ln_mass(), 0.5_f64.ln(), 1e-12);
        assert::close(growing.inverse_cdf(0.5), 0.5_f64.ln() / 2.0, 1e-12);
    }

    #[test]
    fn divergent_segments_have_infinite_mass() {
        let line = Line {
            x0: 0.0,
            y0: 0.0,
            slope: 1.0,
        };
        assert_eq!(line.over(0.0, f64::INFINITY).ln_mass(), f64::INFINITY);

        let flat = Line {
            x0: 0.0,
            y0: 0.0,
            slope: 0.0,
        };
        assert_eq!(flat.over(f64::NEG_INFINITY, 0.0).ln_mass(), f64::INFINITY);
    }

    #[test]
    fn unbounded_envelope_is_rejected() {
        // log f = -x has no mass bound toward -inf.
        let points: Vec<Point> = [1.0, 2.0, 3.0]
            .iter()
            .map(|&x| Point { x, y: -x })
            .collect();
        let res = UpperEnvelope::new(&points, f64::NEG_INFINITY, 10.0);
        assert!(matches!(res, Err(Error::UnboundedEnvelope)));
    }

    #[test]
    fn collinear_points_split_at_midpoint() {
        let points: Vec<Point> = [0.0, 1.0, 2.0, 3.0, 4.0]
            .iter()
            .map(|&x| Point { x, y: -x })
            .collect();
        let upper = UpperEnvelope::new(&points, 0.0, 5.0).unwrap();
        for x in [0.3, 1.5, 2.5, 4.9] {
            assert::close(upper.ln_eval(x), -x, 1e-12);
        }
        assert::close(upper.ln_mass(), (1.0 - (-5.0_f64).exp()).ln(), 1e-10);
    }

    #[test]
    fn draws_stay_in_support() {
        let mut rng = SmallRng::seed_from_u64(0x1234);
        let points = gaussian_points(&[-1.0, 0.0, 1.5]);
        let upper = UpperEnvelope::new(&points, -2.0, 3.0).unwrap();
        for _ in 0..10_000 {
            let x = upper.draw(&mut rng);
            assert!((-2.0..=3.0).contains(&x), "{x} outside support");
        }
    }
}
