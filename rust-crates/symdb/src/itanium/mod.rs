// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Itanium C++ ABI symbols: native parse tree, parser and canonical adapter.

mod adapt;
pub mod ast;
mod parse;

pub use adapt::adapt;
pub use ast::Node;
pub use parse::parse;
