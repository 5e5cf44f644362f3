// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Symbol decoding entry points.
//!
//! [`decode`] detects the mangling scheme, runs the matching native grammar
//! and projects the result onto the canonical model. [`demangle_original`]
//! produces the conventional human-readable spelling.

use crate::canon::{Root, RootKind};
use crate::{itanium, msvc};
use std::fmt;

/// Strips disambiguation suffixes commonly appended to function clones.
///
/// Modern compilers frequently create specialized versions of functions that
/// factor in additional information from a call site, e.g. arguments that are
/// constants. The corresponding optimization passes append dot-prefixed suffixes
/// like `.isra.0` to the function name to disambiguate them from the regular
/// function instance.
///
/// Only a white-list of known suffixes is stripped: plain C symbols may
/// legitimately contain dots, and those must keep their name.
///
/// The following shell command can be used to get a list of possible suffixes:
///
/// ```bash
/// llvm-readelf --syms libfoo.so.dbg | awk '{ print $8 }' |            \
//      rg --passthru -F '..' -r 'DOTDOT' | rg -F . |                   \
//      cut -d . -f 2- | tr '.' '\n' | sort | uniq -c | sort -nr
/// ```
pub fn strip_clone_suffixes(mut name: &str) -> &str {
    // Strip suffixes like ".llvm.9420829416740162726", ".constprop.0", etc.
    for suffix in &[".clone.", ".constprop.", ".llvm.", ".isra.", ".part."] {
        if let Some(pos) = name.rfind(suffix) {
            if name[pos + suffix.len()..]
                .chars()
                .take_while(|&x| x != '.')
                .all(|x| x.is_ascii_digit())
            {
                name = &name[..pos];
            }
        }
    }

    // Strip ".cold" suffix.
    if let Some(stripped) = name.strip_suffix(".cold") {
        name = stripped;
    }

    name
}

/// Mangling scheme of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abi {
    /// Itanium C++ ABI, used by essentially all non-MSVC compilers.
    Itanium,
    /// Microsoft Visual C++.
    Msvc,
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Abi::Itanium => "itanium",
            Abi::Msvc => "msvc",
        })
    }
}

/// Detects the mangling scheme from the symbol prefix.
///
/// Returns `None` for plain C symbols.
pub fn detect(name: &str) -> Option<Abi> {
    // https://itanium-cxx-abi.github.io/cxx-abi/abi.html#mangling
    // Some platforms prepend up to two additional underscores.
    let underscores = name.bytes().take_while(|&x| x == b'_').count();
    if (1..=3).contains(&underscores) && name[underscores..].starts_with('Z') {
        return Some(Abi::Itanium);
    }

    if name.starts_with('?') {
        return Some(Abi::Msvc);
    }

    None
}

/// Result type shorthand.
pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// Reasons why a symbol could not be decoded.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// No known mangling prefix.
    #[error("not a mangled C++ symbol")]
    NotMangled,

    /// The native grammar rejected the symbol.
    #[error("malformed {abi} symbol")]
    Malformed {
        /// Detected mangling scheme.
        abi: Abi,
    },
}

/// Decodes a mangled symbol into the canonical model.
pub fn decode(raw: &str) -> Result<Root> {
    let name = strip_clone_suffixes(raw);
    match detect(name).ok_or(DecodeError::NotMangled)? {
        Abi::Itanium => itanium::parse(name.as_bytes())
            .map(|node| itanium::adapt(&node))
            .ok_or(DecodeError::Malformed { abi: Abi::Itanium }),
        Abi::Msvc => msvc::parse(name)
            .map(|parsed| msvc::adapt(&parsed))
            .ok_or(DecodeError::Malformed { abi: Abi::Msvc }),
    }
}

/// Decodes a symbol and renders its canonical key.
pub fn decode_key(raw: &str) -> Result<(String, RootKind)> {
    let root = decode(raw)?;
    Ok((root.key(), root.kind()))
}

/// Renders the compiler-style full demangling of a symbol.
pub fn demangle_original(raw: &str) -> Result<String> {
    let name = strip_clone_suffixes(raw);
    match detect(name).ok_or(DecodeError::NotMangled)? {
        Abi::Itanium => {
            let malformed = DecodeError::Malformed { abi: Abi::Itanium };
            let sym = cpp_demangle::BorrowedSymbol::new(name.as_bytes())
                .map_err(|_| malformed.clone())?;
            sym.demangle(&cpp_demangle::DemangleOptions::default())
                .map_err(|_| malformed)
        }
        Abi::Msvc => msvc_demangler::demangle(name, msvc_demangler::DemangleFlags::COMPLETE)
            .map_err(|_| DecodeError::Malformed { abi: Abi::Msvc }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_detection() {
        let cases = [
            ("_Z3foov", Some(Abi::Itanium)),
            ("__Z3foov", Some(Abi::Itanium)),
            ("___Z3foov", Some(Abi::Itanium)),
            ("____Z3foov", None),
            ("?foo@@YAXXZ", Some(Abi::Msvc)),
            ("main", None),
            ("_start", None),
            ("", None),
        ];
        for (name, expected) in cases {
            assert_eq!(detect(name), expected, "{name}");
        }
    }

    #[test]
    fn decode_errors() {
        assert_eq!(decode("memcpy"), Err(DecodeError::NotMangled));
        assert_eq!(
            decode("_ZN3foo"),
            Err(DecodeError::Malformed { abi: Abi::Itanium })
        );
        for raw in [
            "_ZN3FooUt18446744073709551615_E",
            "_ZZ4mainENKUlvE18446744073709551615_clEv",
        ] {
            assert_eq!(
                decode(raw),
                Err(DecodeError::Malformed { abi: Abi::Itanium }),
                "{raw}"
            );
        }
        assert_eq!(
            decode_key("memcpy").unwrap_err().to_string(),
            "not a mangled C++ symbol"
        );
    }

    #[test]
    fn clones_share_the_key() {
        let (base, kind) = decode_key("_ZN2js8HeapSlot4postEv").unwrap();
        assert_eq!(base, "js::HeapSlot::post() -> unknown");
        assert_eq!(kind, RootKind::Function);
        for suffix in [".isra.0", ".cold", ".constprop.0.cold", ".llvm.123"] {
            let (key, _) = decode_key(&format!("_ZN2js8HeapSlot4postEv{suffix}")).unwrap();
            assert_eq!(key, base);
        }
    }

    #[test]
    fn abis_share_keys() {
        let cases = [
            ("_ZN3FooC2Ev", "??0Foo@@QEAA@XZ"),
            ("_ZN3FooD2Ev", "??1Foo@@UEAA@XZ"),
            ("_ZN3FooC2Ei", "??0Foo@@QEAA@H@Z"),
            ("_ZN2ns3FooC1EPKc", "??0Foo@ns@@QEAA@PEBD@Z"),
            (
                "_ZN3FooC2ERKNSt7__cxx1112basic_stringIcSt11char_traitsIcESaIcEEE",
                "??0Foo@@QEAA@AEBV?$basic_string@DU?$char_traits@D@std@@V?$allocator@D@2@@std@@@Z",
            ),
            (
                "_ZN3FooC2ERKSt6vectorIiSaIiEE",
                "??0Foo@@QEAA@AEBV?$vector@HV?$allocator@H@std@@@std@@@Z",
            ),
            ("_ZTV3Foo", "??_7Foo@@6B@"),
        ];

        for (itanium, msvc) in cases {
            let (key, kind) = decode_key(itanium).unwrap();
            assert_eq!(decode_key(msvc).unwrap(), (key.clone(), kind), "{itanium} / {msvc}");
        }

        let (key, _) = decode_key(cases[4].1).unwrap();
        assert_eq!(key, "Foo::$constructor(& const std::string) -> unknown");
    }

    #[test]
    fn original_demangling() {
        assert_eq!(
            demangle_original("_ZN2ns3Foo3barEi").unwrap(),
            "ns::Foo::bar(int)"
        );
        assert!(demangle_original("?foo@@YAXXZ").unwrap().contains("foo"));
        assert_eq!(demangle_original("memcpy"), Err(DecodeError::NotMangled));
    }
}
