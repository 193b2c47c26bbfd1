pub mod cli;
pub mod config;
pub mod error;
pub mod failures;
pub mod ingest;
pub mod layout;
pub mod model;
pub mod parsers;
pub mod report;
pub mod selector;
pub mod structure;
pub mod tools;
pub mod workflow;
pub mod writer;
