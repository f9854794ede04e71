//! docgate: per-database authorization and update validation for a
//! document store.
//!
//! Requests flow through `design::DesignResourceRouter`, which classifies the
//! target into an `security::Operation` and asks `security::authorize` for a
//! decision. Writes that pass the gate run through the
//! `validation::ValidationPipeline` before `storage` commits them.

pub mod error;
pub mod identity;
pub mod security;
pub mod validation;
pub mod engine;
pub mod design;
pub mod storage;
pub mod service;
pub mod config;
pub mod server;

// Test-only printing helper: expands to eprintln! in test and debug builds and is absent otherwise.
// Usage: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
