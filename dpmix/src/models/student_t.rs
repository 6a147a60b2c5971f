use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rv::prelude::{Gamma, Gaussian};
use rv::traits::Rv;

use crate::{Error, Result};

/// Multivariate Student's t distribution with location `mu`, scale matrix and
/// `df` degrees of freedom.
#[derive(Clone, Debug, PartialEq)]
pub struct MvStudentT {
    mu: DVector<f64>,
    scale: DMatrix<f64>,
    /// Lower Cholesky factor of `scale`.
    l: DMatrix<f64>,
    df: f64,
    /// Every term of the log density that does not depend on `x`.
    ln_norm: f64,
}

impl MvStudentT {
    pub fn new(mu: DVector<f64>, scale: DMatrix<f64>, df: f64) -> Result<Self> {
        let d = mu.len();
        if scale.nrows() != d || scale.ncols() != d {
            return Err(Error::DimensionMismatch {
                expected: d,
                found: scale.nrows(),
            });
        }
        if !(df > 0.0 && df.is_finite()) {
            return Err(Error::InvalidPrior(format!(
                "degrees of freedom must be positive and finite, got {df}"
            )));
        }
        let l = scale
            .clone()
            .cholesky()
            .ok_or_else(|| Error::InvalidPrior("scale must be positive definite".into()))?
            .l();

        let d = d as f64;
        let ln_det_half: f64 = l.diagonal().iter().map(|v| v.ln()).sum();
        let ln_norm = special::Gamma::ln_gamma(0.5 * (df + d)).0
            - special::Gamma::ln_gamma(0.5 * df).0
            - 0.5 * d * (df * PI).ln()
            - ln_det_half;

        Ok(Self {
            mu,
            scale,
            l,
            df,
            ln_norm,
        })
    }

    pub fn mu(&self) -> &DVector<f64> {
        &self.mu
    }

    pub fn scale(&self) -> &DMatrix<f64> {
        &self.scale
    }

    pub fn df(&self) -> f64 {
        self.df
    }

    pub fn dim(&self) -> usize {
        self.mu.len()
    }
}

impl Rv<DVector<f64>> for MvStudentT {
    fn ln_f(&self, x: &DVector<f64>) -> f64 {
        if x.len() != self.dim() {
            return f64::NEG_INFINITY;
        }
        let diff = x - &self.mu;
        let mahalanobis = match self.l.solve_lower_triangular(&diff) {
            Some(z) => z.norm_squared(),
            None => return f64::NEG_INFINITY,
        };
        let d = self.dim() as f64;
        self.ln_norm - 0.5 * (self.df + d) * (mahalanobis / self.df).ln_1p()
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        let g = Gaussian::standard();
        let z = DVector::from_fn(self.dim(), |_, _| g.draw(rng));
        let chi2: f64 = Gamma::new_unchecked(0.5 * self.df, 0.5).draw(rng);
        &self.mu + (&self.l * z) * (self.df / chi2).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{dmatrix, dvector};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rv::prelude::StudentsT;

    use super::*;

    #[test]
    fn univariate_matches_students_t() {
        let t = MvStudentT::new(dvector![0.0], dmatrix![1.0], 4.0).unwrap();
        let reference = StudentsT::new(4.0).unwrap();

        for x in [-10.0, -2.5, -0.1, 0.0, 0.7, 3.0, 25.0] {
            assert::close(t.ln_f(&dvector![x]), reference.ln_f(&x), 1e-10);
        }
    }

    #[test]
    fn bivariate_density_is_normalized() {
        let t = MvStudentT::new(dvector![1.0, -1.0], dmatrix![2.0, 0.5; 0.5, 1.0], 8.0).unwrap();

        let step = 0.1;
        let grid: Vec<f64> = (0..500).map(|i| -25.0 + step * (i as f64 + 0.5)).collect();
        let mass: f64 = grid
            .iter()
            .flat_map(|&x| grid.iter().map(move |&y| dvector![x, y]))
            .map(|p| t.f(&p))
            .sum::<f64>()
            * step
            * step;

        assert::close(mass, 1.0, 5e-3);
    }

    #[test]
    fn sample_moments() {
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        let scale = dmatrix![1.0, 0.3; 0.3, 0.5];
        let t = MvStudentT::new(dvector![2.0, -3.0], scale.clone(), 6.0).unwrap();

        let n = 20_000;
        let xs: Vec<DVector<f64>> = t.sample(n, &mut rng);
        let mean = xs.iter().fold(DVector::zeros(2), |acc, x| acc + x) / n as f64;
        let cov = xs
            .iter()
            .map(|x| (x - &mean) * (x - &mean).transpose())
            .fold(DMatrix::zeros(2, 2), |acc, m| acc + m)
            / (n - 1) as f64;

        assert::close(mean[0], 2.0, 0.05);
        assert::close(mean[1], -3.0, 0.05);

        // Cov = df / (df - 2) * scale
        let expected = scale * 1.5;
        for (a, b) in cov.iter().zip(expected.iter()) {
            assert::close(*a, *b, 0.15);
        }
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(matches!(
            MvStudentT::new(dvector![0.0, 0.0], dmatrix![1.0], 3.0),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            MvStudentT::new(dvector![0.0], dmatrix![1.0], 0.0),
            Err(Error::InvalidPrior(_))
        ));
        assert!(matches!(
            MvStudentT::new(dvector![0.0, 0.0], dmatrix![1.0, 2.0; 2.0, 1.0], 3.0),
            Err(Error::InvalidPrior(_))
        ));
    }

    #[test]
    fn wrong_dimension_has_no_density() {
        let t = MvStudentT::new(dvector![0.0], dmatrix![1.0], 3.0).unwrap();
        assert_eq!(t.ln_f(&dvector![0.0, 0.0]), f64::NEG_INFINITY);
    }
}
