pub mod config_builder;
pub mod harness;
pub mod marker_files;
pub mod wait_utils;
