pub mod app;
pub mod blobs;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod global;
pub mod participant;
pub mod recording;
pub mod remote;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;
