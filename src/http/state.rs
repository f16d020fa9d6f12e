use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::billing::ParamRatioEngine;
use crate::sdk::retry::RetryPolicy;
use crate::task::relay::TaskRelay;

#[derive(Clone)]
pub struct AppState {
    pub relay: TaskRelay,
    pub ratios: Arc<ParamRatioEngine>,
    pub gateway_api_keys: Arc<[String]>,
    pub retry_policy: RetryPolicy,
    /// Parent of every per-request cancellation token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        relay: TaskRelay,
        ratios: Arc<ParamRatioEngine>,
        gateway_api_keys: Vec<String>,
        retry_policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            relay,
            ratios,
            gateway_api_keys: gateway_api_keys.into(),
            retry_policy,
            shutdown,
        }
    }
}
