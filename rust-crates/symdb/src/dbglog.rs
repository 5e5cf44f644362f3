// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Minimal debug logging support.
//!
//! Messages go to stderr and are off by default. Front ends flip them on
//! with [`set_enabled`], e.g. from a `--verbose` switch.

use std::sync::atomic::{AtomicBool, Ordering};

// Re-export to make the macro show up in this module in rustdoc.
pub use crate::debug;

/// Determines whether [`debug`] messages are actually printed or not.
pub static ENABLED: AtomicBool = AtomicBool::new(false);

/// Enables or disables [`debug`] output for the whole process.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Print to stderr if debug printing is enabled.
///
/// See [`eprintln`] documentation for usage.
#[macro_export]
macro_rules! debug {
    ( $($args:tt)* ) => {
        if $crate::dbglog::ENABLED.load(::std::sync::atomic::Ordering::Relaxed) {
            ::std::eprintln!( $($args)* );
        }
    }
}
