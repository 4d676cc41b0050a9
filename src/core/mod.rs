pub mod config;
pub mod error;
pub mod segment_catalog;
pub mod segment_index;
pub mod time_format;
