//! Set-top-box protocol type definitions.
//!
//! - `CommandCode` - Request codes understood by the device
//! - `Channel` - Channel record with favorite group membership
//! - `FavoriteGroup` - Named favorite list
//! - `Endpoint`, `DeviceInfo`, `StbTime` - Device identity and clock

mod channel;
mod command;
mod info;

pub use channel::*;
pub use command::*;
pub use info::*;
