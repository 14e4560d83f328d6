//! Reference predictors used by the CLI and the test suite.

pub mod linear;
pub mod mlp;

pub use linear::{LinearRegressor, LinearSpec};
pub use mlp::{Mlp, MlpSpec};
