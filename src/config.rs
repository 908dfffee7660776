use std::time::Duration;

use crate::env_config::{
    ACQUIRE_TIMEOUT_MS_VAR, FORCE_CROSS_API_VAR, TEARDOWN_WAIT_MS_VAR, env_var_millis,
    env_var_truthy,
};
use crate::keyed_mutex::AcquireTimeout;

pub const DEFAULT_TEARDOWN_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandoffConfig {
    /// Wait applied by `begin_draw` when acquiring the application key.
    /// An expired finite wait is terminal for the image.
    pub acquire_timeout: AcquireTimeout,
    /// Upper bound on how long teardown waits for the last pending
    /// present. `None` waits until the compositor resolves it.
    pub teardown_wait: Option<Duration>,
    /// Use the NT-handle/callback path even when the compositor
    /// advertises global shared handles.
    pub force_cross_api: bool,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: AcquireTimeout::Infinite,
            teardown_wait: Some(DEFAULT_TEARDOWN_WAIT),
            force_cross_api: false,
        }
    }
}

impl HandoffConfig {
    pub fn builder() -> HandoffConfigBuilder {
        HandoffConfigBuilder::new()
    }

    /// Defaults overridden by `SNOW_HANDOFF_ACQUIRE_TIMEOUT_MS`,
    /// `SNOW_HANDOFF_TEARDOWN_WAIT_MS` and `SNOW_HANDOFF_FORCE_CROSS_API`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(timeout) = env_var_millis(ACQUIRE_TIMEOUT_MS_VAR) {
            config.acquire_timeout = AcquireTimeout::Finite(timeout);
        }
        if let Some(wait) = env_var_millis(TEARDOWN_WAIT_MS_VAR) {
            config.teardown_wait = Some(wait);
        }
        if env_var_truthy(FORCE_CROSS_API_VAR) {
            config.force_cross_api = true;
        }
        config
    }
}

#[derive(Clone, Debug)]
pub struct HandoffConfigBuilder {
    config: HandoffConfig,
}

impl HandoffConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: HandoffConfig::default(),
        }
    }

    pub fn acquire_timeout(mut self, timeout: AcquireTimeout) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    pub fn teardown_wait(mut self, wait: Option<Duration>) -> Self {
        self.config.teardown_wait = wait;
        self
    }

    /// Force the cross-API (NT handle + callback) present path. Useful
    /// for exercising the Vulkan-style path against a D3D compositor.
    pub fn force_cross_api(mut self, enabled: bool) -> Self {
        self.config.force_cross_api = enabled;
        self
    }

    pub fn build(self) -> HandoffConfig {
        self.config
    }
}

impl Default for HandoffConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
