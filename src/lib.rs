//! GP Sync - mirrors the Guitar Pro transport into a host by polling process memory
//!
//! Data flow per tick:
//! [`probe`] → [`layout`]-driven field reads → [`decoder`] → [`sync`] → [`transport`].

pub mod config;
pub mod decoder;
pub mod external;
pub mod layout;
pub mod paths;
pub mod probe;
pub mod sync;
pub mod transport;
