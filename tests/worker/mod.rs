//! Real child-process workers.

#[cfg(unix)]
mod process_test;
