//! # LANShare Core
//!
//! Transfer protocol for LANShare: text chat plus chunked, flow-controlled,
//! cancellable object transfer over one ordered message channel.
//!
//! This crate provides:
//! - Control frame encoding and decoding ([`frame`])
//! - Inbound message classification ([`router`])
//! - Outbound and inbound transfer state ([`transfer`])
//! - The transfer session manager ([`TransferManager`])
//! - The endpoint task that owns a channel and its manager ([`endpoint`])
//! - Structured observer events ([`events`])
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Endpoint                                 │
//! │   (single task: channel events, user commands, send window)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                     TransferManager                              │
//! │   (one outbound + one inbound transfer, rate limiting)          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                   Router / Control frames                        │
//! │   (chat text, file-meta/cancel/error, binary chunks)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod frame;
pub mod manager;
pub mod rate_limiter;
pub mod router;
pub mod transfer;

pub use config::TransferConfig;
pub use endpoint::{EndpointHandle, spawn_endpoint};
pub use error::{TransferError, TransferResult};
pub use events::{ProgressThrottle, TransferEvent, TransferObserver};
pub use frame::ControlMessage;
pub use manager::TransferManager;
pub use rate_limiter::MetaRateLimiter;
pub use router::{Inbound, classify};
pub use transfer::{
    BufferSource, CancelOrigin, ChunkSource, FileSource, StreamSource, TransferDirection,
    TransferId,
};

/// Default chunk size (16 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Largest accepted chunk size (256 KiB)
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// Default high-water mark for buffered, unsent bytes (1 MiB)
pub const DEFAULT_HIGH_WATER: usize = 1024 * 1024;
