#![forbid(unsafe_code)]

pub mod aggregate;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dom;
pub mod error;
pub mod extract;
pub mod formats;
pub mod http_render;
pub mod logging;
pub mod numeral;
pub mod pager;
pub mod render;
pub mod report;
pub mod resolve;
pub mod scrape;
pub mod sites;
pub mod traverse;

#[cfg(test)]
mod fake_render;
