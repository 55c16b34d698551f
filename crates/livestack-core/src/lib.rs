pub mod align;
pub mod calibration;
pub mod color;
pub mod composite;
pub mod consts;
pub mod error;
pub mod filters;
pub mod frame;
pub mod ingest;
pub mod integrate;
pub mod io;
pub mod noise;
pub mod services;
pub mod session;
pub mod stack;
pub mod watch;
