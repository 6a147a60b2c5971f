use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rv::prelude::{MvGaussian, NormalInvWishart};
use rv::traits::Rv;

use super::student_t::MvStudentT;
use super::Updater;
use crate::{Error, Result};

fn check_dims<'a, I>(xs: I, dim: usize) -> Result<()>
where
    I: IntoIterator<Item = &'a DVector<f64>>,
{
    match xs.into_iter().find(|x| x.len() != dim) {
        Some(x) => Err(Error::DimensionMismatch {
            expected: dim,
            found: x.len(),
        }),
        None => Ok(()),
    }
}

fn spd_inverse(m: &DMatrix<f64>, what: &str) -> Result<DMatrix<f64>> {
    m.clone()
        .cholesky()
        .map(|c| c.inverse())
        .ok_or_else(|| Error::InvalidPrior(format!("{what} must be positive definite")))
}

/// Normal-inverse-Wishart hyperparameters.
#[derive(Clone, Debug, PartialEq)]
struct NiwParams {
    mu: DVector<f64>,
    k: f64,
    df: usize,
    scale: DMatrix<f64>,
}

impl NiwParams {
    fn dim(&self) -> usize {
        self.mu.len()
    }

    /// Conjugate update with the observations `xs`.
    fn update(&self, xs: &[&DVector<f64>]) -> Self {
        let n = xs.len();
        if n == 0 {
            return self.clone();
        }
        let nf = n as f64;
        let d = self.dim();

        let mean = xs.iter().fold(DVector::zeros(d), |acc, &x| acc + x) / nf;
        let scatter = xs
            .iter()
            .map(|&x| {
                let r = x - &mean;
                &r * r.transpose()
            })
            .fold(DMatrix::zeros(d, d), |acc, m| acc + m);

        let k = self.k + nf;
        let shift = &mean - &self.mu;
        let scale = &self.scale + scatter + (&shift * shift.transpose()) * (self.k * nf / k);
        let mu = (&self.mu * self.k + mean * nf) / k;

        Self {
            mu,
            k,
            df: self.df + n,
            scale,
        }
    }

    /// Marginal distribution of a single new observation.
    fn predictive(&self) -> Result<MvStudentT> {
        let df = (self.df + 1 - self.dim()) as f64;
        let scale = &self.scale * ((self.k + 1.0) / (self.k * df));
        MvStudentT::new(self.mu.clone(), scale, df)
    }

    fn to_distribution(&self) -> Result<NormalInvWishart> {
        NormalInvWishart::new(self.mu.clone(), self.k, self.df, self.scale.clone())
            .map_err(Error::distribution)
    }
}

/// Updater for multivariate Gaussian clusters with unknown mean and covariance
/// under a Normal-inverse-Wishart prior.
#[derive(Clone, Debug, PartialEq)]
pub struct MeanCovarianceUpdater {
    prior: NiwParams,
}

impl MeanCovarianceUpdater {
    /// Create an updater for the prior `NIW(mu, k, df, scale)`.
    ///
    /// `df` must be at least the dimension of `mu`.
    pub fn new(mu: DVector<f64>, k: f64, df: usize, scale: DMatrix<f64>) -> Result<Self> {
        if scale.nrows() != mu.len() || scale.ncols() != mu.len() {
            return Err(Error::DimensionMismatch {
                expected: mu.len(),
                found: scale.nrows(),
            });
        }
        let prior = NiwParams { mu, k, df, scale };
        prior.to_distribution()?;
        if df < prior.dim() {
            return Err(Error::InvalidPrior(format!(
                "degrees of freedom ({df}) must be at least the dimension ({})",
                prior.dim()
            )));
        }
        Ok(Self { prior })
    }

    pub fn dim(&self) -> usize {
        self.prior.dim()
    }
}

impl Updater<DVector<f64>> for MeanCovarianceUpdater {
    type Predictive = MvStudentT;
    type Cluster = MvGaussian;

    fn create_prior_predictive(&self, data: &[DVector<f64>]) -> Result<Self::Predictive> {
        if data.is_empty() {
            return Err(Error::EmptyData);
        }
        check_dims(data, self.dim())?;
        self.prior.predictive()
    }

    fn create_cluster_posterior<R: Rng>(
        &self,
        values: &[&DVector<f64>],
        rng: &mut R,
    ) -> Result<Self::Cluster> {
        check_dims(values.iter().copied(), self.dim())?;
        let posterior = self.prior.update(values).to_distribution()?;
        Ok(posterior.draw(rng))
    }

    fn duplicate(&self) -> Self {
        self.clone()
    }
}

/// Updater for multivariate Gaussian clusters sharing a known covariance, with
/// a Gaussian prior on each cluster mean.
#[derive(Clone, Debug, PartialEq)]
pub struct MeanUpdater {
    prior_mu: DVector<f64>,
    prior_cov: DMatrix<f64>,
    cov: DMatrix<f64>,
    prior_precision: DMatrix<f64>,
    precision: DMatrix<f64>,
}

impl MeanUpdater {
    /// Cluster means are drawn from `N(prior_mu, prior_cov)`; observations
    /// within a cluster have covariance `cov`.
    pub fn new(prior_mu: DVector<f64>, prior_cov: DMatrix<f64>, cov: DMatrix<f64>) -> Result<Self> {
        let d = prior_mu.len();
        for m in [&prior_cov, &cov] {
            if m.nrows() != d || m.ncols() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: m.nrows(),
                });
            }
        }
        let prior_precision = spd_inverse(&prior_cov, "prior covariance")?;
        let precision = spd_inverse(&cov, "covariance")?;

        Ok(Self {
            prior_mu,
            prior_cov,
            cov,
            prior_precision,
            precision,
        })
    }

    pub fn dim(&self) -> usize {
        self.prior_mu.len()
    }

    pub fn cov(&self) -> &DMatrix<f64> {
        &self.cov
    }

    /// Posterior over the cluster mean given its members.
    fn mean_posterior(&self, xs: &[&DVector<f64>]) -> Result<MvGaussian> {
        let n = xs.len() as f64;
        let sum = xs
            .iter()
            .fold(DVector::zeros(self.dim()), |acc, &x| acc + x);

        let post_precision = &self.prior_precision + &self.precision * n;
        let post_cov = spd_inverse(&post_precision, "posterior precision")?;
        // Symmetrize away round-off so the Cholesky inside MvGaussian succeeds.
        let post_cov = (&post_cov + post_cov.transpose()) * 0.5;
        let post_mu =
            &post_cov * (&self.prior_precision * &self.prior_mu + &self.precision * sum);

        MvGaussian::new(post_mu, post_cov).map_err(Error::distribution)
    }
}

impl Updater<DVector<f64>> for MeanUpdater {
    type Predictive = MvGaussian;
    type Cluster = MvGaussian;

    fn create_prior_predictive(&self, data: &[DVector<f64>]) -> Result<Self::Predictive> {
        if data.is_empty() {
            return Err(Error::EmptyData);
        }
        check_dims(data, self.dim())?;
        MvGaussian::new(self.prior_mu.clone(), &self.prior_cov + &self.cov)
            .map_err(Error::distribution)
    }

    fn create_cluster_posterior<R: Rng>(
        &self,
        values: &[&DVector<f64>],
        rng: &mut R,
    ) -> Result<Self::Cluster> {
        check_dims(values.iter().copied(), self.dim())?;
        let mu: DVector<f64> = self.mean_posterior(values)?.draw(rng);
        MvGaussian::new(mu, self.cov.clone()).map_err(Error::distribution)
    }

    fn duplicate(&self) -> Self {
        self.clone()
    }
}
