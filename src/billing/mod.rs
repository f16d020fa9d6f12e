pub mod param_ratio;

pub use param_ratio::{ParamRatioConfig, ParamRatioEngine};
