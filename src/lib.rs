pub mod cache;
pub mod config;
mod error;
pub mod fingerprint;
pub mod gateway;
pub mod http;
pub mod model;
pub mod observability;
pub mod providers;
pub mod ratelimit;
pub mod relay;
pub mod store;
pub mod types;
pub mod utils;
pub mod validate;

pub use cache::CompletionCache;
pub use config::{GatewayConfig, ProviderConfig};
pub use error::{FableError, Result};
pub use fingerprint::fingerprint;
pub use gateway::{ChatGateway, ChatOutcome, GatewayError, GenerationConfig};
pub use model::{ChunkStream, GenerateRequest, LanguageModel};
pub use observability::{Observability, ObservabilitySnapshot};
pub use ratelimit::{Admission, RateLimiter};
pub use store::{Clock, KeyValueStore, MemoryStore, StoreError, SystemClock, WindowCount};
pub use types::{ChatCompletion, ChatMessage, ChatRequest, Role};
pub use validate::ValidationError;

#[cfg(feature = "store-redis")]
pub use store::RedisStore;
