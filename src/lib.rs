pub mod config;
pub mod progress;

#[path = "../tables/mod.rs"]
pub mod tables;

#[path = "../labels/mod.rs"]
pub mod labels;

#[path = "../features/mod.rs"]
pub mod features;

#[path = "../classify/mod.rs"]
pub mod classify;
