pub mod builder;

pub use builder::{build_lost_file, build_lost_file_with_chain, build_lost_files};
