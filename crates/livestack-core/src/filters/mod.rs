pub mod background;
pub mod downsample;
pub mod histogram;
