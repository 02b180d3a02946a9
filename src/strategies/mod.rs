pub mod analysis;
pub mod entry;
pub mod filters;
pub mod quality;
pub mod signals;
