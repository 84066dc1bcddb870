//! Built-in implementations (spec §4.6 "Built-in implementations"):
//! the I/O-facing builtins layered over the pure-Rust string/collection/
//! math ones. Each submodule owns one external capability and maps its
//! failures onto `RecoverableError` with a category-specific `kind`, so
//! `recover` can discriminate "file not found" from "connection
//! refused" from "invalid JSON" the same way it discriminates any other
//! tagged failure.

pub mod crypto;
pub mod fs;
pub mod http;
pub mod json;
pub mod signal;
#[cfg(feature = "sql")]
pub mod sql;
pub mod time;

use crate::builtins::Registry;

pub fn register(reg: &mut Registry) {
    fs::register(reg);
    http::register(reg);
    json::register(reg);
    crypto::register(reg);
    time::register(reg);
    signal::register(reg);
    #[cfg(feature = "sql")]
    sql::register(reg);
}
