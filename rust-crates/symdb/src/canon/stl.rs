// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Collapses verbose standard library spellings into their common aliases.
//!
//! Matching is done on printed template arguments, so both ABIs share the
//! rules as long as their adapters print builtins the same way. Anything
//! that doesn't match exactly is left alone.

use super::{Name, NamePiece, Type};

/// Applies the simplification rules to `name` in place.
///
/// Adapters call this exactly once per constructed name. Names that are
/// already simplified don't match any rule, so repeated application is a
/// no-op.
pub(crate) fn simplify(name: &mut Name) {
    let pieces = name.pieces_mut();
    if pieces.len() < 2 || pieces[0].raw != "std" || pieces[0].template_args.is_some() {
        return;
    }

    // libstdc++ dual-ABI inline namespace.
    if pieces[1].raw == "__cxx11" && pieces[1].template_args.is_none() {
        pieces.remove(1);
        if pieces.len() < 2 {
            return;
        }
    }

    let key = &mut pieces[1];
    match key.raw.as_str() {
        "basic_string" => {
            if let Some(alias) = string_alias(key) {
                *key = NamePiece::new(alias);
            }
        }
        "vector" | "initializer_list" => drop_defaulted_arg(key, "allocator"),
        "unique_ptr" => drop_defaulted_arg(key, "default_delete"),
        _ => {}
    }
}

/// Checks for `basic_string<C, std::char_traits<C>, std::allocator<C>>`.
fn string_alias(piece: &NamePiece) -> Option<&'static str> {
    let [ch, traits, alloc] = piece.template_args.as_deref()? else {
        return None;
    };

    let ch = ch.to_string();
    let alias = match ch.as_str() {
        "char" => "string",
        "wchar_t" | "wchar" => "wstring",
        _ => return None,
    };

    let traits_ok = traits.to_string() == format!("std::char_traits<{ch}>");
    let alloc_ok = alloc.to_string() == format!("std::allocator<{ch}>");
    (traits_ok && alloc_ok).then_some(alias)
}

/// Drops the second of exactly two template arguments if it is
/// `std::<helper><T>` where `T` prints identically to the first argument.
fn drop_defaulted_arg(piece: &mut NamePiece, helper: &str) {
    let Some(args) = &mut piece.template_args else {
        return;
    };
    let [base, Type::Simple(second)] = &args[..] else {
        return;
    };

    let [std, helper_piece] = second.pieces() else {
        return;
    };
    if std.raw != "std" || std.template_args.is_some() || helper_piece.raw != helper {
        return;
    }

    let Some([helper_arg]) = helper_piece.template_args.as_deref() else {
        return;
    };
    if helper_arg.to_string() == base.to_string() {
        args.truncate(1);
    }
}
