use rand::Rng;

use super::{assign_range, group_assignments, rebuild_cluster, Chain, DpmmConfig, Sample};
use crate::mcmc::Sampler;
use crate::models::Updater;
use crate::Result;

/// DPMM Gibbs sampler running every sweep on the calling thread.
pub struct Dpmm<X, U: Updater<X>> {
    chain: Chain<X, U>,
}

impl<X, U: Updater<X>> Dpmm<X, U> {
    /// Create a sampler over `data`.
    ///
    /// Fails on empty data or a non-positive initial concentration.
    pub fn new(data: Vec<X>, updater: U, config: DpmmConfig) -> Result<Self> {
        Ok(Self {
            chain: Chain::new(data, updater, config)?,
        })
    }

    pub fn data(&self) -> &[X] {
        self.chain.data()
    }

    pub fn config(&self) -> &DpmmConfig {
        self.chain.config()
    }

    fn sweep<R: Rng>(&mut self, rng: &mut R) -> Result<Sample<U::Cluster>> {
        let (ln_conditional, clusters) = {
            let prior_predictive = self.chain.prior_predictive()?;
            let current = self.chain.current_or_err()?;
            let data = self.chain.data();

            let (assignments, ln_conditional) = assign_range(
                data,
                0..data.len(),
                current.clusters(),
                current.alpha(),
                prior_predictive,
                rng,
            );

            let groups = group_assignments(&assignments, current.num_clusters() + 1);
            let clusters = groups
                .into_iter()
                .map(|members| rebuild_cluster(self.chain.updater(), data, members, rng))
                .filter_map(|cluster| cluster.transpose())
                .collect::<Result<Vec<_>>>()?;
            (ln_conditional, clusters)
        };

        self.chain.finish_sweep(ln_conditional, clusters, rng)
    }
}

impl<X, U: Updater<X>> Sampler for Dpmm<X, U> {
    type Model = Sample<U::Cluster>;

    fn initialize<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        self.chain.reset(rng)
    }

    fn mcmc_update<R: Rng>(&mut self, rng: &mut R) -> Result<Self::Model> {
        self.sweep(rng)
    }

    fn current(&self) -> Option<&Self::Model> {
        self.chain.current()
    }
}
