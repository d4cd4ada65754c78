#![forbid(unsafe_code)]

pub mod chunk;
pub mod cli;
pub mod client;
pub mod crawl;
pub mod errors;
pub mod fetch;
pub mod formats;
pub mod insert;
pub mod llm;
pub mod logging;
pub mod serve;
pub mod store;
