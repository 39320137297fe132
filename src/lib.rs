//! # stb_gmscreen
//!
//! Remote control client for GMScreen-protocol satellite/IPTV set-top boxes.
//!
//! The device speaks a request/response protocol over TCP (default port
//! 20000): XML commands go out in a small ASCII envelope, and replies come
//! back as zlib-compressed pseudo-XML records.
//!
//! ## Features
//!
//! - **Async session**: one socket with an owned read buffer, silent
//!   reconnect and single-retry sends
//! - **Catalog load**: paginated channel fetch that tolerates devices
//!   under-reporting their channel count
//! - **Single-flight zap**: overlapping channel changes are rejected
//! - **Cache boundary**: pluggable catalog store with JSON and migration
//!   adapters
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stb_gmscreen::{ClientConfig, MemoryStore, NoProviderLookup, StbController, StbEvent};
//!
//! #[tokio::main]
//! async fn main() -> stb_gmscreen::Result<()> {
//!     let config = ClientConfig::new("192.168.1.12:20000");
//!     let mut stb = StbController::spawn(config, MemoryStore::new(), NoProviderLookup);
//!     let mut events = stb.subscribe().unwrap();
//!
//!     stb.connect(None).await?;
//!     let report = stb.load_channels().await?;
//!     println!("{} channels", report.channel_count);
//!
//!     stb.zap_to_channel("00050029700001").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Format
//!
//! ```text
//! Request:
//! +---------+------------------+-------+------------------------------+
//! | "Start" | length (7 digits)| "End" | <?xml ...?><Command ...>     |
//! +---------+------------------+-------+------------------------------+
//!
//! Response header (16 bytes):
//! +--------+------------------+-------------------+
//! | "GCDH" | length (u32 LE)  | 8 reserved bytes  |
//! +--------+------------------+-------------------+
//! followed by `length` bytes of zlib data
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod catalog;
pub mod client;
pub mod codec;
pub mod controller;
pub mod error;
pub mod parser;
pub mod payload;
pub mod store;
pub mod types;
pub mod zap;

#[cfg(test)]
mod testing;

// Re-export main types
pub use catalog::{Catalog, CatalogSync, SyncProgress, SyncReport, SyncState};
pub use client::{ClientConfig, ConnectionState, StbClient};
pub use codec::{Command, StbCodec};
pub use controller::{StbController, StbEvent};
pub use error::{Result, StbError};
pub use parser::{parse_channels, parse_device_info, parse_favorite_groups, parse_stb_time};
pub use store::{
    CatalogSnapshot, CatalogStore, JsonFileStore, MemoryStore, MigratingStore, NoProviderLookup,
    ProviderLookup,
};
pub use types::*;
pub use zap::{Step, ZapGuard, ZapPermit};
