#![deny(unused_variables)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod classifier;
pub mod features;
pub mod matrix;
pub mod orchestrate;
pub mod output;
pub mod svm;
pub mod types;
pub mod validation;

#[path = "../labels/mod.rs"]
pub mod labels;

#[path = "../shared/config.rs"]
pub mod config;
#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod shared {
    pub use super::shared_files as files;
}
