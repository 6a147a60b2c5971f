use std::any::Any;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::info;
use once_cell::sync::OnceCell;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{
    assign_range, group_assignments, rebuild_cluster, Chain, Cluster, DpmmConfig, Sample,
};
use crate::mcmc::Sampler;
use crate::models::Updater;
use crate::{Error, Result};

/// Default worker pool size: one less than the available cores, at least one.
pub fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

fn build_default_pool() -> Result<Arc<ThreadPool>> {
    let num_threads = default_num_threads();
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("dpmm-worker-{i}"))
        .build()?;
    info!("Built DPMM worker pool with {num_threads} threads");
    Ok(Arc::new(pool))
}

/// Split `0..n` into at most `num_partitions` contiguous ranges; the last range
/// absorbs the remainder.
pub(crate) fn partition_ranges(n: usize, num_partitions: usize) -> Vec<Range<usize>> {
    let t = num_partitions.clamp(1, n.max(1));
    let size = n / t;
    (0..t)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == t { n } else { start + size };
            start..end
        })
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one worker task, turning its failure into a sweep-aborting error.
fn run_task<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Error::Worker(Box::new(err))),
        Err(payload) => Err(Error::WorkerPanic(panic_message(payload))),
    }
}

/// DPMM Gibbs sampler that fans the assignment and rebuild steps of each
/// sweep out over a worker pool.
///
/// Each task gets its own generator, seeded from the caller's generator in
/// submission order, so a fixed seed and partition count reproduce the chain
/// whatever the pool size.
pub struct ParallelDpmm<X, U: Updater<X>> {
    chain: Chain<X, U>,
    pool: OnceCell<Arc<ThreadPool>>,
    num_partitions: Option<usize>,
}

impl<X, U> ParallelDpmm<X, U>
where
    X: Sync,
    U: Updater<X>,
{
    /// Create a sampler over `data`. Unless [`ParallelDpmm::with_pool`] is
    /// used, a pool of [`default_num_threads`] workers is built on first use.
    pub fn new(data: Vec<X>, updater: U, config: DpmmConfig) -> Result<Self> {
        Ok(Self {
            chain: Chain::new(data, updater, config)?,
            pool: OnceCell::new(),
            num_partitions: None,
        })
    }

    /// Run on a caller-supplied pool.
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = OnceCell::with_value(pool);
        self
    }

    /// Split the assignment step into `num_partitions` tasks instead of one
    /// per pool thread.
    pub fn with_num_partitions(mut self, num_partitions: usize) -> Self {
        self.num_partitions = Some(num_partitions.max(1));
        self
    }

    pub fn data(&self) -> &[X] {
        self.chain.data()
    }

    pub fn config(&self) -> &DpmmConfig {
        self.chain.config()
    }

    pub fn pool(&self) -> Result<&Arc<ThreadPool>> {
        self.pool.get_or_try_init(build_default_pool)
    }

    pub fn num_partitions(&self) -> Result<usize> {
        match self.num_partitions {
            Some(t) => Ok(t),
            None => Ok(self.pool()?.current_num_threads()),
        }
    }

    fn sweep<R: Rng>(&mut self, rng: &mut R) -> Result<Sample<U::Cluster>> {
        let (ln_conditional, clusters) = {
            let pool = self.pool()?;
            let num_partitions = self.num_partitions()?;
            let prior_predictive = self.chain.prior_predictive()?;
            let current = self.chain.current_or_err()?;
            let updater = self.chain.updater();
            let data = self.chain.data();

            let ranges = partition_ranges(data.len(), num_partitions);
            let seeds: Vec<u64> = ranges.iter().map(|_| rng.gen()).collect();
            let parts: Vec<(Vec<usize>, f64)> = pool.install(|| {
                ranges
                    .into_par_iter()
                    .zip(seeds.into_par_iter())
                    .map(|(range, seed)| {
                        run_task(|| {
                            let mut rng = Xoshiro256Plus::seed_from_u64(seed);
                            Ok(assign_range(
                                data,
                                range,
                                current.clusters(),
                                current.alpha(),
                                prior_predictive,
                                &mut rng,
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })?;

            let mut assignments = Vec::with_capacity(data.len());
            let mut ln_conditional = 0.0;
            for (part, part_ln_conditional) in parts {
                assignments.extend(part);
                ln_conditional += part_ln_conditional;
            }

            let groups = group_assignments(&assignments, current.num_clusters() + 1);
            let seeds: Vec<u64> = groups.iter().map(|_| rng.gen()).collect();
            let rebuilt: Vec<Option<Cluster<U::Cluster>>> = pool.install(|| {
                groups
                    .into_par_iter()
                    .zip(seeds.into_par_iter())
                    .map(|(members, seed)| {
                        run_task(|| {
                            let updater = updater.duplicate();
                            let mut rng = Xoshiro256Plus::seed_from_u64(seed);
                            rebuild_cluster(&updater, data, members, &mut rng)
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })?;

            (ln_conditional, rebuilt.into_iter().flatten().collect())
        };

        self.chain.finish_sweep(ln_conditional, clusters, rng)
    }
}

impl<X, U> Sampler for ParallelDpmm<X, U>
where
    X: Sync,
    U: Updater<X>,
{
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

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rv::prelude::Gaussian;

    use super::*;
    use crate::dpmm::sequential::Dpmm;
    use crate::dpmm::testing::{assert_valid, mode, niw_updater, three_blobs};
    use crate::utils::testing::count_tv_distance;

    fn pool(num_threads: usize) -> Arc<ThreadPool> {
        Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn partition_ranges_cover_the_data() {
        assert_eq!(partition_ranges(10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(partition_ranges(2, 4), vec![0..1, 1..2]);
        assert_eq!(partition_ranges(5, 0), vec![0..5]);
        assert_eq!(partition_ranges(7, 1), vec![0..7]);
    }

    #[test]
    fn default_pool_has_at_least_one_thread() {
        assert!(default_num_threads() >= 1);
        let dpmm = ParallelDpmm::new(three_blobs(5, 0), niw_updater(), DpmmConfig::default())
            .unwrap();
        assert_eq!(
            dpmm.num_partitions().unwrap(),
            dpmm.pool().unwrap().current_num_threads()
        );
    }

    #[test]
    fn sweeps_keep_invariants() {
        let data = three_blobs(30, 0x1234);
        let n = data.len();
        let mut dpmm = ParallelDpmm::new(data, niw_updater(), DpmmConfig::default())
            .unwrap()
            .with_pool(pool(3))
            .with_num_partitions(4);
        let mut rng = SmallRng::seed_from_u64(0x1234);

        dpmm.initialize(&mut rng).unwrap();
        for _ in 0..50 {
            let retired = dpmm.mcmc_update(&mut rng).unwrap();
            assert!(retired.posterior_ln_likelihood().unwrap().is_finite());
            assert_valid(dpmm.current().unwrap(), n);
        }
    }

    #[test]
    fn reproducible_regardless_of_pool_size() {
        let run = |num_threads: usize| {
            let mut dpmm =
                ParallelDpmm::new(three_blobs(20, 3), niw_updater(), DpmmConfig::default())
                    .unwrap()
                    .with_pool(pool(num_threads))
                    .with_num_partitions(3);
            let mut rng = SmallRng::seed_from_u64(0xBEEF);
            dpmm.initialize(&mut rng).unwrap();
            (0..20)
                .map(|_| dpmm.mcmc_update(&mut rng).unwrap())
                .map(|s| {
                    let members: Vec<Vec<usize>> =
                        s.clusters().iter().map(|c| c.members().to_vec()).collect();
                    (members, s.alpha())
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn matches_sequential_cluster_counts() {
        let data = three_blobs(60, 0xCAFE);
        let config = DpmmConfig {
            num_initial_clusters: 6,
            ..Default::default()
        };

        let mut sequential = Dpmm::new(data.clone(), niw_updater(), config.clone()).unwrap();
        let mut parallel = ParallelDpmm::new(data, niw_updater(), config)
            .unwrap()
            .with_pool(pool(2))
            .with_num_partitions(4);

        let mut rng = SmallRng::seed_from_u64(0xCAFE);
        sequential.initialize(&mut rng).unwrap();
        parallel.initialize(&mut rng).unwrap();

        let mut seq_ks = Vec::new();
        let mut par_ks = Vec::new();
        for i in 0..600 {
            let s = sequential.mcmc_update(&mut rng).unwrap();
            let p = parallel.mcmc_update(&mut rng).unwrap();
            if i >= 200 {
                seq_ks.push(s.num_clusters());
                par_ks.push(p.num_clusters());
            }
        }

        assert_eq!(mode(&seq_ks).0, mode(&par_ks).0);
        let tv = count_tv_distance(&seq_ks, &par_ks);
        assert!(tv < 0.25, "TV distance between K histograms: {tv}");
    }

    /// Fails every cluster posterior over fewer than `min_len` values.
    struct FragileUpdater {
        min_len: usize,
        panics: bool,
    }

    impl Updater<f64> for FragileUpdater {
        type Predictive = Gaussian;
        type Cluster = Gaussian;

        fn create_prior_predictive(&self, _data: &[f64]) -> Result<Gaussian> {
            Ok(Gaussian::standard())
        }

        fn create_cluster_posterior<R: Rng>(
            &self,
            values: &[&f64],
            _rng: &mut R,
        ) -> Result<Gaussian> {
            if values.len() >= self.min_len {
                Ok(Gaussian::standard())
            } else if self.panics {
                panic!("boom");
            } else {
                Err(Error::InvalidPrior("too few values".into()))
            }
        }

        fn duplicate(&self) -> Self {
            Self {
                min_len: self.min_len,
                panics: self.panics,
            }
        }
    }

    fn fragile_dpmm(panics: bool) -> ParallelDpmm<f64, FragileUpdater> {
        let data: Vec<f64> = (0..50).map(|i| i as f64 / 50.0).collect();
        let updater = FragileUpdater {
            min_len: data.len(),
            panics,
        };
        ParallelDpmm::new(data, updater, DpmmConfig::default())
            .unwrap()
            .with_pool(pool(2))
    }

    #[test]
    fn worker_error_aborts_sweep() {
        let mut dpmm = fragile_dpmm(false);
        let mut rng = SmallRng::seed_from_u64(11);
        dpmm.initialize(&mut rng).unwrap();

        match dpmm.mcmc_update(&mut rng) {
            Err(Error::Worker(inner)) => assert!(matches!(*inner, Error::InvalidPrior(_))),
            other => panic!("expected a worker error, got {other:?}"),
        }
    }

    #[test]
    fn worker_panic_aborts_sweep() {
        let mut dpmm = fragile_dpmm(true);
        let mut rng = SmallRng::seed_from_u64(11);
        dpmm.initialize(&mut rng).unwrap();

        match dpmm.mcmc_update(&mut rng) {
            Err(Error::WorkerPanic(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected a worker panic, got {other:?}"),
        }
    }
}
