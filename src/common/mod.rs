//! Shared numerical building blocks.
//!
//! Linear algebra helpers, splittable random keys, conjugate priors and the
//! numerical constants used by both model families.

pub mod conjugate;
pub mod constants;
pub mod linalg;
pub mod rng;
pub(crate) mod scan;
