use rand::Rng;
use rv::traits::Rv;

use crate::Result;

pub mod gaussian;
pub mod mv_gaussian;
pub mod student_t;

/// Conjugate updates for the components of a Dirichlet process mixture.
///
/// An updater must not share mutable state with its duplicates; the parallel
/// sampler hands each worker task its own [`Updater::duplicate`].
pub trait Updater<X>: Send + Sync {
    /// Density scoring an observation under a new, not yet populated cluster.
    type Predictive: Rv<X> + Send + Sync;
    /// Density of a populated cluster.
    type Cluster: Rv<X> + Send + Sync;

    /// Predictive density of the new-cluster option.
    ///
    /// Arguments
    /// =========
    ///
    /// * `data` - The observations being clustered, or a representative subsample.
    ///
    /// The result must depend only on `data` and the updater's configuration.
    fn create_prior_predictive(&self, data: &[X]) -> Result<Self::Predictive>;

    /// Draw a cluster density from the posterior given its members.
    ///
    /// Never called with fewer than two values.
    fn create_cluster_posterior<R: Rng>(
        &self,
        values: &[&X],
        rng: &mut R,
    ) -> Result<Self::Cluster>;

    /// An independent copy for use on another thread.
    fn duplicate(&self) -> Self
    where
        Self: Sized;
}
