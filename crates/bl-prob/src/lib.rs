//! Probability building blocks for binlimit.
//!
//! - Poisson log-PMF over real-valued counts (observed and Asimov data)
//! - standard normal tail functions used by the asymptotic formulae

pub mod normal;
pub mod poisson;
