//! Database helpers shared across gazlink crates

pub mod init;

pub use init::{init_database, open_readonly};
