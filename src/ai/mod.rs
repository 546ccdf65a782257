pub mod enhancer;
pub mod gateway;
pub mod ollama;
pub mod reasoning;
pub mod types;
pub mod usage;

pub use enhancer::{select_strategy, EnhancementStrategy, Enhancer};
pub use gateway::ReasoningGateway;
pub use ollama::{OllamaReasoning, ReasoningConfig};
pub use reasoning::ReasoningService;
pub use types::ReasoningOptions;
pub use usage::{LoggingUsageSink, UsageSink};
