//! Dirichlet process mixture model (DPMM) samplers.
//!
//! Both samplers run the same blocked Gibbs sweep: every observation is
//! reassigned against the clusters of the current sample, clusters are rebuilt
//! from the new groups by drawing from their conjugate posteriors, and the
//! concentration parameter is resampled. They differ only in how the first two
//! steps are executed.
use std::ops::Range;

use log::debug;
use once_cell::sync::OnceCell;
use rand::Rng;
use rv::misc::ln_pflip;
use rv::prelude::{Beta, Gamma};
use rv::traits::Rv;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::models::Updater;
use crate::utils::ln_sum_exp;
use crate::{Error, Result};

pub mod parallel;
pub mod sequential;

/// Shape of the Gamma prior on the concentration parameter.
const ALPHA_PRIOR_SHAPE: f64 = 1.0;
/// Rate of the Gamma prior on the concentration parameter.
const ALPHA_PRIOR_RATE: f64 = 1.0;

/// A mixture component and the observations currently assigned to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster<D> {
    members: Vec<usize>,
    density: D,
}

impl<D> Cluster<D> {
    pub fn new(members: Vec<usize>, density: D) -> Self {
        Self { members, density }
    }

    /// Indices into the data of the observations in this cluster.
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn density(&self) -> &D {
        &self.density
    }

    /// The member observations, in member order.
    pub fn values<'a, X>(&self, data: &'a [X]) -> Vec<&'a X> {
        self.members.iter().map(|&i| &data[i]).collect()
    }
}

/// One state of the Markov chain over mixtures.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample<D> {
    alpha: f64,
    clusters: Vec<Cluster<D>>,
    posterior_ln_likelihood: Option<f64>,
}

impl<D> Sample<D> {
    pub fn new(alpha: f64, clusters: Vec<Cluster<D>>) -> Result<Self> {
        if !(alpha > 0.0 && alpha.is_finite()) {
            return Err(Error::NonPositiveAlpha { alpha });
        }
        Ok(Self {
            alpha,
            clusters,
            posterior_ln_likelihood: None,
        })
    }

    /// Concentration parameter.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn clusters(&self) -> &[Cluster<D>] {
        &self.clusters
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Number of members of each cluster.
    pub fn counts(&self) -> Vec<usize> {
        self.clusters.iter().map(Cluster::len).collect()
    }

    /// CRP log prior of the cluster sizes plus the data log-conditional under
    /// this sample's clusters. Only known once the sample has been retired by
    /// the following sweep.
    pub fn posterior_ln_likelihood(&self) -> Option<f64> {
        self.posterior_ln_likelihood
    }

    /// Log probability of the cluster sizes under a Chinese restaurant process
    /// with this sample's concentration.
    pub fn crp_ln_prior(&self) -> f64 {
        crp_ln_prior(self.alpha, &self.counts())
    }
}

/// Sampler settings shared by the sequential and parallel DPMM.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DpmmConfig {
    /// Clusters in the starting sample; each covers the whole data set.
    pub num_initial_clusters: usize,
    /// Concentration parameter of the starting sample.
    pub initial_alpha: f64,
    /// Resample the concentration after each sweep.
    pub resample_alpha: bool,
}

impl Default for DpmmConfig {
    fn default() -> Self {
        Self {
            num_initial_clusters: 2,
            initial_alpha: 1.0,
            resample_alpha: true,
        }
    }
}

impl DpmmConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_alpha > 0.0 && self.initial_alpha.is_finite()) {
            return Err(Error::NonPositiveAlpha {
                alpha: self.initial_alpha,
            });
        }
        Ok(())
    }
}

/// State shared by both samplers: the data, the updater, the cached prior
/// predictive and the current sample.
pub(crate) struct Chain<X, U: Updater<X>> {
    config: DpmmConfig,
    data: Vec<X>,
    updater: U,
    prior_predictive: OnceCell<U::Predictive>,
    current: Option<Sample<U::Cluster>>,
}

impl<X, U: Updater<X>> Chain<X, U> {
    pub(crate) fn new(data: Vec<X>, updater: U, config: DpmmConfig) -> Result<Self> {
        config.validate()?;
        if data.is_empty() {
            return Err(Error::EmptyData);
        }
        Ok(Self {
            config,
            data,
            updater,
            prior_predictive: OnceCell::new(),
            current: None,
        })
    }

    pub(crate) fn data(&self) -> &[X] {
        &self.data
    }

    pub(crate) fn updater(&self) -> &U {
        &self.updater
    }

    pub(crate) fn config(&self) -> &DpmmConfig {
        &self.config
    }

    pub(crate) fn current(&self) -> Option<&Sample<U::Cluster>> {
        self.current.as_ref()
    }

    pub(crate) fn current_or_err(&self) -> Result<&Sample<U::Cluster>> {
        self.current.as_ref().ok_or(Error::Uninitialized)
    }

    pub(crate) fn prior_predictive(&self) -> Result<&U::Predictive> {
        self.prior_predictive
            .get_or_try_init(|| self.updater.create_prior_predictive(&self.data))
    }

    /// Start over from `num_initial_clusters` clusters that each hold every
    /// observation. A single observation cannot form a cluster.
    pub(crate) fn reset<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        let n = self.data.len();
        let clusters = if n > 1 {
            let values: Vec<&X> = self.data.iter().collect();
            (0..self.config.num_initial_clusters)
                .map(|_| {
                    self.updater
                        .create_cluster_posterior(&values, rng)
                        .map(|density| Cluster::new((0..n).collect(), density))
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };
        self.current = Some(Sample::new(self.config.initial_alpha, clusters)?);
        Ok(())
    }

    /// Install the clusters produced by a sweep and return the retired sample,
    /// scored with `ln_conditional`.
    pub(crate) fn finish_sweep<R: Rng>(
        &mut self,
        ln_conditional: f64,
        clusters: Vec<Cluster<U::Cluster>>,
        rng: &mut R,
    ) -> Result<Sample<U::Cluster>> {
        let previous_alpha = self.current_or_err()?.alpha;
        let alpha = if self.config.resample_alpha {
            resample_alpha(previous_alpha, clusters.len(), self.data.len(), rng)?
        } else {
            previous_alpha
        };
        let next = Sample::new(alpha, clusters)?;

        let mut retired = self.current.replace(next).ok_or(Error::Uninitialized)?;
        let ln_posterior = retired.crp_ln_prior() + ln_conditional;
        retired.posterior_ln_likelihood = Some(ln_posterior);

        debug!(
            "DPMM sweep: {} -> {} clusters, alpha = {alpha:.4}, ln posterior of retired sample = {ln_posterior:.4}",
            retired.num_clusters(),
            self.current.as_ref().map_or(0, Sample::num_clusters),
        );

        Ok(retired)
    }
}

/// Fill `ln_weights` with the assignment log weights of `x`: existing
/// clusters first, the new cluster last.
fn fill_ln_weights<X, C, P>(
    x: &X,
    clusters: &[Cluster<C>],
    ln_alpha: f64,
    prior_predictive: &P,
    ln_weights: &mut Vec<f64>,
) where
    C: Rv<X>,
    P: Rv<X>,
{
    ln_weights.clear();
    ln_weights.extend(
        clusters
            .iter()
            .map(|c| ((c.len() - 1) as f64).ln() + c.density().ln_f(x)),
    );
    ln_weights.push(ln_alpha + prior_predictive.ln_f(x));
}

/// Draw new assignments for the observations in `range`.
///
/// Returns the assignments, where `clusters.len()` denotes a new cluster, and
/// the summed log of each observation's mass under the existing clusters.
pub(crate) fn assign_range<X, C, P, R>(
    data: &[X],
    range: Range<usize>,
    clusters: &[Cluster<C>],
    alpha: f64,
    prior_predictive: &P,
    rng: &mut R,
) -> (Vec<usize>, f64)
where
    C: Rv<X>,
    P: Rv<X>,
    R: Rng,
{
    let k = clusters.len();
    let ln_alpha = alpha.ln();
    let mut ln_weights: Vec<f64> = Vec::with_capacity(k + 1);
    let mut ln_conditional = 0.0;

    let assignments = data[range]
        .iter()
        .map(|x| {
            fill_ln_weights(x, clusters, ln_alpha, prior_predictive, &mut ln_weights);
            ln_conditional += ln_sum_exp(&ln_weights[..k]);
            ln_pflip(&ln_weights, 1, false, rng)[0]
        })
        .collect();

    (assignments, ln_conditional)
}

/// Group observation indices by assignment into `num_slots` groups.
pub(crate) fn group_assignments(assignments: &[usize], num_slots: usize) -> Vec<Vec<usize>> {
    let mut groups = vec![Vec::new(); num_slots];
    assignments
        .iter()
        .enumerate()
        .for_each(|(i, &z)| groups[z].push(i));
    groups
}

/// Build a cluster from a group of observations. Groups of zero or one
/// member do not form a cluster.
pub(crate) fn rebuild_cluster<X, U, R>(
    updater: &U,
    data: &[X],
    members: Vec<usize>,
    rng: &mut R,
) -> Result<Option<Cluster<U::Cluster>>>
where
    U: Updater<X>,
    R: Rng,
{
    if members.len() <= 1 {
        return Ok(None);
    }
    let values: Vec<&X> = members.iter().map(|&i| &data[i]).collect();
    let density = updater.create_cluster_posterior(&values, rng)?;
    Ok(Some(Cluster::new(members, density)))
}

/// Escobar and West update of the concentration parameter given `k`
/// clusters over `n` observations.
pub(crate) fn resample_alpha<R: Rng>(alpha: f64, k: usize, n: usize, rng: &mut R) -> Result<f64> {
    let eta: f64 = Beta::new(alpha + 1.0, n as f64)
        .map_err(Error::distribution)?
        .draw(rng);
    let rate = ALPHA_PRIOR_RATE - eta.ln();

    let k = k as f64;
    let shape = if k == 0.0 {
        ALPHA_PRIOR_SHAPE
    } else {
        let odds = (ALPHA_PRIOR_SHAPE + k - 1.0) / (n as f64 * rate);
        if rng.gen::<f64>() < odds / (1.0 + odds) {
            ALPHA_PRIOR_SHAPE + k
        } else {
            ALPHA_PRIOR_SHAPE + k - 1.0
        }
    };

    let alpha: f64 = Gamma::new(shape, rate)
        .map_err(Error::distribution)?
        .draw(rng);
    Ok(alpha.max(f64::MIN_POSITIVE))
}

/// CRP log probability of a partition with block sizes `counts`.
///
/// `K ln(alpha) + sum_k ln((n_k - 1)!) - sum_{j < N} ln(alpha + j)`
pub(crate) fn crp_ln_prior(alpha: f64, counts: &[usize]) -> f64 {
    let n: usize = counts.iter().sum();
    let ln_blocks: f64 = counts
        .iter()
        .map(|&c| (1..c).map(|j| (j as f64).ln()).sum::<f64>())
        .sum();
    let ln_rising: f64 = (0..n).map(|j| (alpha + j as f64).ln()).sum();

    counts.len() as f64 * alpha.ln() + ln_blocks - ln_rising
}
