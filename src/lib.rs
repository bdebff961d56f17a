pub mod access;
pub mod blob;
pub mod docs;
pub mod error;
pub mod mail;
pub mod server;
pub mod store;
pub mod token;
