pub mod ars;
pub mod dpmm;
pub mod error;
pub mod mcmc;
pub mod models;

pub mod utils;

pub use error::{Error, Result};
