//! Wire format, errors, and configuration shared by the ssewire client and server.

pub mod config;
pub mod error;
pub mod protocol;
