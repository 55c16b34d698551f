pub mod composite;
pub mod config;
pub mod info;
pub mod resume;
pub mod session;
pub mod watch;
