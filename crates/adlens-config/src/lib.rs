pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AdsApiConfig, AppConfig, GatewayConfig, MemoryConfig, OrchestratorConfig, ReasoningConfig,
};
