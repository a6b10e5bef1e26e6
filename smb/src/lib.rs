pub mod byte_helper;
pub mod protocol;
pub mod transport;
pub mod crypto;
pub mod auth;
pub mod session;
pub mod credit;
pub mod dispatch;
pub mod compound;
pub mod handlers;
pub mod config;

#[cfg(feature = "async")]
pub mod connection;
#[cfg(feature = "async")]
pub mod server;
