//! Core translation pipeline for the Nostr / ActivityPub / AT Protocol
//! bridge.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Polling Scheduler                    │
//! │   one loop per foreign protocol, high-water-mark cursor  │
//! └───────────────────────┬──────────────────────────────────┘
//!                         │ Normalized Post
//!              ┌──────────▼───────────┐
//!              │  Foreign-Post Parser  │  ActivityPub / AT Protocol
//!              └──────────┬───────────┘
//!                         │
//!              ┌──────────▼───────────┐       ┌────────────────┐
//!              │ Threading Resolver    │◄─────►│  Persistence   │
//!              └──────────┬───────────┘       │  Store + cache │
//!                         │                    └────────────────┘
//!              ┌──────────▼───────────┐
//!              │ Kind-1 Event Builder  │  pure, no suspension points
//!              └──────────┬───────────┘
//!                         │
//!              ┌──────────▼───────────┐
//!              │ Identity Derivator &  │
//!              │       Signer         │
//!              └──────────────────────┘
//! ```

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod outbound;
pub mod parsers;
pub mod permalink;
pub mod pipeline;
pub mod relay;
pub mod scheduler;
pub mod store;
pub mod threading;
pub mod types;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use identity::Signer;
pub use store::Store;
pub use types::*;
