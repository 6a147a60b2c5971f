use log::{debug, info};
use rand::Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Trait for Markov Chain Monte Carlo Samplers.
pub trait Sampler {
    /// State of the chain.
    type Model;

    /// Set up the starting state, discarding any previous one.
    fn initialize<R: Rng>(&mut self, rng: &mut R) -> Result<()>;

    /// Advance the chain by one update and return the state it replaced,
    /// scored where the sampler supports it.
    fn mcmc_update<R: Rng>(&mut self, rng: &mut R) -> Result<Self::Model>;

    /// The state the next update starts from.
    fn current(&self) -> Option<&Self::Model>;

    /// Run `steps` updates, returning the last retired state.
    fn multi_update<R: Rng>(&mut self, steps: usize, rng: &mut R) -> Result<Option<Self::Model>> {
        (0..steps).try_fold(None, |_, _| self.mcmc_update(rng).map(Some))
    }
}

/// Burn-in, thinning and length of an MCMC run.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct McmcConfig {
    /// Updates run by `initialize` before any sample is collected.
    pub burn_in_iterations: usize,
    /// Updates per collected sample.
    pub iterations_per_sample: usize,
    /// Samples to collect.
    pub max_iterations: usize,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            burn_in_iterations: 100,
            iterations_per_sample: 1,
            max_iterations: 1_000,
        }
    }
}

impl McmcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations_per_sample == 0 {
            return Err(Error::ZeroIterationsPerSample);
        }
        Ok(())
    }
}

/// Drives a [`Sampler`] through burn-in and collects thinned samples.
pub struct McmcLearner<S: Sampler, R: Rng> {
    sampler: S,
    config: McmcConfig,
    rng: R,
    samples: Vec<S::Model>,
    initialized: bool,
}

impl<S: Sampler, R: Rng> McmcLearner<S, R> {
    pub fn new(sampler: S, config: McmcConfig, rng: R) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sampler,
            samples: Vec::with_capacity(config.max_iterations),
            config,
            rng,
            initialized: false,
        })
    }

    /// Initialize the sampler and run the burn-in updates. Previously
    /// collected samples are discarded.
    pub fn initialize(&mut self) -> Result<()> {
        self.sampler.initialize(&mut self.rng)?;
        self.sampler
            .multi_update(self.config.burn_in_iterations, &mut self.rng)?;
        self.samples.clear();
        self.initialized = true;
        debug!(
            "MCMC burn-in complete after {} updates",
            self.config.burn_in_iterations
        );
        Ok(())
    }

    /// Run `iterations_per_sample` updates and collect the last retired state.
    pub fn step(&mut self) -> Result<&S::Model> {
        if !self.initialized {
            return Err(Error::Uninitialized);
        }
        // `iterations_per_sample >= 1` is checked in `new`.
        let skipped = self.config.iterations_per_sample.saturating_sub(1);
        self.sampler.multi_update(skipped, &mut self.rng)?;
        let sample = self.sampler.mcmc_update(&mut self.rng)?;
        self.samples.push(sample);
        Ok(&self.samples[self.samples.len() - 1])
    }

    pub fn is_done(&self) -> bool {
        self.samples.len() >= self.config.max_iterations
    }

    pub fn samples(&self) -> &[S::Model] {
        &self.samples
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    pub fn config(&self) -> &McmcConfig {
        &self.config
    }

    /// Consume the learner and return the collected samples.
    pub fn finalize(self) -> Vec<S::Model> {
        info!("MCMC run finished with {} samples", self.samples.len());
        self.samples
    }

    /// Initialize, step until done, and finalize.
    pub fn learn(sampler: S, config: McmcConfig, rng: R) -> Result<Vec<S::Model>> {
        let mut learner = Self::new(sampler, config, rng)?;
        learner.initialize()?;
        while !learner.is_done() {
            learner.step()?;
        }
        Ok(learner.finalize())
    }
}
