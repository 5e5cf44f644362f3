// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Full-text search over canonical keys.
//!
//! Keys are split by [`tokenize`] and indexed case-insensitively by
//! [`Index`]. [`symprefix`] derives the key that groups the overloads and
//! specializations of one symbol family.

mod index;
mod prefix;
mod tokenizer;

pub use index::{group_by_prefix, Group, Index};
pub use prefix::symprefix;
pub use tokenizer::{tokenize, Token};
