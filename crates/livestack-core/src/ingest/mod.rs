pub mod classify;
pub mod prepare;

pub use classify::{candidates, classify, is_excluded_name, list_directory, FilterCache, StackFilter};
pub use prepare::{MasterCache, Preparation};
