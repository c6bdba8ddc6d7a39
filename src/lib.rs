#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod crawler;
pub mod discovery;
pub mod downloader;
pub mod errors;
pub mod fetcher;
pub mod resolver;
pub mod runner;
pub mod sink;
pub mod splitter;
pub mod sprite;
pub mod types;
pub mod utils;
