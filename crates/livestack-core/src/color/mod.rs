pub mod debayer;
pub mod process;
