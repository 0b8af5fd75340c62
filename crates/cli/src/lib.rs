//! retrace command-line front end
//!
//! Exposed as a library so integration tests can reach the config and lock
//! helpers directly.

pub mod cmd;
pub mod locks;
pub mod system_config;
pub mod util;
