use rand::Rng;
use rv::data::GaussianSuffStat;
use rv::prelude::{DataOrSuffStat, Gaussian, NormalGamma};
use rv::traits::{ConjugatePrior, Rv, SuffStat};

use super::Updater;
use crate::{Error, Result};

/// Updater for univariate Gaussian clusters with unknown mean and precision.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalGammaUpdater {
    prior: NormalGamma,
}

impl NormalGammaUpdater {
    pub fn new(prior: NormalGamma) -> Self {
        Self { prior }
    }

    pub fn prior(&self) -> &NormalGamma {
        &self.prior
    }
}

/// Marginal predictive of a `NormalGamma` prior: a scaled Student's t.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalGammaPredictive {
    prior: NormalGamma,
    empty_stat: GaussianSuffStat,
}

impl Rv<f64> for NormalGammaPredictive {
    fn ln_f(&self, x: &f64) -> f64 {
        self.prior
            .ln_pp(x, &DataOrSuffStat::SuffStat(&self.empty_stat))
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        let component: Gaussian = self.prior.draw(rng);
        component.draw(rng)
    }
}

impl Updater<f64> for NormalGammaUpdater {
    type Predictive = NormalGammaPredictive;
    type Cluster = Gaussian;

    fn create_prior_predictive(&self, data: &[f64]) -> Result<Self::Predictive> {
        if data.is_empty() {
            return Err(Error::EmptyData);
        }
        Ok(NormalGammaPredictive {
            prior: self.prior.clone(),
            empty_stat: GaussianSuffStat::new(),
        })
    }

    fn create_cluster_posterior<R: Rng>(
        &self,
        values: &[&f64],
        rng: &mut R,
    ) -> Result<Self::Cluster> {
        let mut stat = GaussianSuffStat::new();
        values.iter().for_each(|x| stat.observe(*x));

        let posterior = self.prior.posterior(&DataOrSuffStat::SuffStat(&stat));
        let component: Gaussian = posterior.draw(rng);
        Ok(component)
    }

    fn duplicate(&self) -> Self {
        Self {
            prior: self.prior.clone(),
        }
    }
}
