//! Utility modules shared by the orchestrator and the CLI

pub mod logging;
pub mod timeout;

pub use logging::{init_logging, init_logging_from_config, init_module_logging};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use timeout::{
    with_custom_timeout, DEFAULT_MODULE_SHUTDOWN_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
