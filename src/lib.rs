pub mod api;
pub mod assembler;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod gas;
pub mod optimizer;
pub mod rpc;
pub mod source;
pub mod types;

// Re-export the pieces embedders and tests touch most.
pub use engine::QuoteEngine;
pub use error::{QuoterError, Result};
pub use types::{Quote, SwapRequest};
