//! authd: username/password registration, opaque session tokens with a sliding
//! expiry, and a gate that admits every call to a protected method only with a
//! live session.

pub mod config;
pub mod error;
pub mod identity;
pub mod server;
pub mod storage;

// Debug trace line for session bookkeeping. Goes to stderr in tests and debug builds.
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// Release builds keep the format check and emit nothing.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
