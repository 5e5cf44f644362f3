// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod builder;
pub mod canon;
pub mod dbglog;
pub mod demangle;
pub mod itanium;
pub mod msvc;
pub mod objfile;
pub mod pdbfile;
pub mod rtti;
pub mod search;
pub mod store;

/// Type-erased error type.
///
/// We primarily use this to hand out errors from third-party libraries where
/// lifting them into distinct error variants didn't make sense because no
/// consumer cares about differentiating between different error variants.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// Virtual address in the ELF image, or relative virtual address for PDBs.
pub type VirtAddr = u64;
