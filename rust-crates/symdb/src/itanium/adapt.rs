// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Projection of the Itanium parse tree onto the canonical model.

use super::ast::{self, FunctionEncoding, FunctionSig, Node};
use crate::canon::{
    self, stl, FunctionType, LocalName, Name, NamePiece, PointerKind, Root, Type, SKIP_NAME,
};

/// Converts a parsed Itanium symbol to its canonical root.
///
/// Total over [`Node`]: constructs without a canonical mapping become
/// [`Root::Unknown`] or [`Type::Skipped`].
pub fn adapt(node: &Node) -> Root {
    match node {
        Node::AbiTag { base, .. } | Node::Clone { base, .. } => adapt(base),

        Node::Name(_)
        | Node::Nested { .. }
        | Node::StdQualified(_)
        | Node::WithTemplateArgs { .. }
        | Node::StdSubstitution(_) => Root::Variable {
            name: name(node),
            ty: None,
        },

        Node::Local { encoding, entity } => Root::LocalName(LocalName {
            root: Box::new(adapt(encoding)),
            name: Box::new(ty(entity)),
            ty: None,
        }),

        Node::Special { kind, child } => {
            let kind = match kind {
                ast::SpecialKind::VirtualTable => canon::SpecialKind::VTable,
                ast::SpecialKind::TypeInfo => canon::SpecialKind::TypeInfo,
                ast::SpecialKind::TypeInfoName => canon::SpecialKind::TypeInfoName,
                _ => return Root::Unknown,
            };
            Root::SpecialName {
                kind,
                ty: ty(child),
            }
        }

        Node::Function(func) => adapt_function(func),

        _ => Root::Unknown,
    }
}

fn adapt_function(func: &FunctionEncoding) -> Root {
    let signature = FunctionType {
        params: params(&func.params),
        ret: func.ret.as_deref().map(|x| Box::new(ty(x))),
        quals: func.cv,
        ref_qual: func.ref_qual,
    };

    // Function declared in the body of another function, e.g. a lambda.
    if let Node::Local { encoding, entity } = &*func.name {
        return Root::LocalName(LocalName {
            root: Box::new(adapt(encoding)),
            name: Box::new(Type::Simple(name(entity))),
            ty: Some(Box::new(Type::Function(signature))),
        });
    }

    Root::Function {
        name: name(&func.name),
        signature,
    }
}

fn function_type(sig: &FunctionSig) -> FunctionType {
    FunctionType {
        params: params(&sig.params),
        ret: Some(Box::new(ty(&sig.ret))),
        quals: sig.cv,
        ref_qual: sig.ref_qual,
    }
}

/// Converts a node in type position.
fn ty(node: &Node) -> Type {
    match node {
        Node::Local { encoding, entity } => Type::LocalName(LocalName {
            root: Box::new(adapt(encoding)),
            name: Box::new(ty(entity)),
            ty: None,
        }),
        Node::FunctionType(sig) => Type::Function(function_type(sig)),
        Node::Pointer(child) => Type::Pointer(Box::new(ty(child)), PointerKind::Pointer),
        Node::Reference { child, rvalue } => {
            let kind = if *rvalue {
                PointerKind::RValueReference
            } else {
                PointerKind::Reference
            };
            Type::Pointer(Box::new(ty(child)), kind)
        }
        Node::Qualified { child, quals } => ty(child).qualified(*quals),
        Node::VendorQualified { child, .. } | Node::AbiTag { base: child, .. } => ty(child),

        Node::Name(_)
        | Node::Nested { .. }
        | Node::StdQualified(_)
        | Node::WithTemplateArgs { .. }
        | Node::StdSubstitution(_) => Type::Simple(name(node)),

        _ => Type::Skipped,
    }
}

/// Converts a parameter or template argument list, expanding packs.
fn params(nodes: &[Node]) -> Vec<Type> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Pack(items) => out.extend(items.iter().map(ty)),
            Node::PackExpansion(pattern) => match expand(pattern) {
                Some(items) => out.extend(items.iter().map(ty)),
                None => out.push(Type::Skipped),
            },
            _ => out.push(ty(node)),
        }
    }
    out
}

/// Instantiates a pack expansion pattern once per pack element.
///
/// Handles the common shapes where the pack appears under a chain of
/// pointer, reference and cv wrappers (`Args&&...`, `const T*...`).
fn expand(pattern: &Node) -> Option<Vec<Node>> {
    match pattern {
        Node::Pack(items) => Some(items.clone()),
        Node::Pointer(child) => Some(
            expand(child)?
                .into_iter()
                .map(|x| Node::Pointer(Box::new(x)))
                .collect(),
        ),
        Node::Reference { child, rvalue } => Some(
            expand(child)?
                .into_iter()
                .map(|x| Node::Reference {
                    child: Box::new(x),
                    rvalue: *rvalue,
                })
                .collect(),
        ),
        Node::Qualified { child, quals } => Some(
            expand(child)?
                .into_iter()
                .map(|x| Node::Qualified {
                    child: Box::new(x),
                    quals: *quals,
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Converts a node in name position, applying STL simplification.
fn name(node: &Node) -> Name {
    let mut pieces = Vec::new();
    collect_pieces(node, &mut pieces);
    let mut name = Name::from_pieces(pieces);
    stl::simplify(&mut name);
    name
}

fn collect_pieces(node: &Node, out: &mut Vec<NamePiece>) {
    match node {
        Node::Name(raw) => out.push(NamePiece::new(raw.as_str())),
        Node::Nested { qual, name } => {
            collect_pieces(qual, out);
            collect_pieces(name, out);
        }
        Node::StdQualified(child) => {
            out.push(NamePiece::new("std"));
            collect_pieces(child, out);
        }
        Node::StdSubstitution(sub) => {
            out.push(NamePiece::new("std"));
            out.push(NamePiece::new(sub.identifier()));
        }
        Node::WithTemplateArgs { name, args } => {
            collect_pieces(name, out);
            let args = params(args);
            match out.last_mut() {
                Some(last) if last.template_args.is_none() => last.template_args = Some(args),
                _ => out.push(NamePiece::with_args(SKIP_NAME, args)),
            }
        }
        Node::AbiTag { base, .. } | Node::Clone { base, .. } => collect_pieces(base, out),
        Node::CtorDtor { dtor, .. } => {
            out.push(NamePiece::new(if *dtor { "$destructor" } else { "$constructor" }));
        }
        Node::ConversionOperator(_) => {
            out.push(NamePiece::with_args("$cast", vec![Type::Skipped]));
        }
        Node::Local { entity, .. } => collect_pieces(entity, out),
        _ => out.push(NamePiece::new(SKIP_NAME)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itanium::parse;

    fn key(mangled: &str) -> String {
        let node = parse(mangled.as_bytes()).unwrap_or_else(|| panic!("failed: {mangled}"));
        adapt(&node).key()
    }

    #[test]
    fn canonical_keys() {
        let cases = [
            ("_Z3foov", "foo() -> unknown"),
            ("_Z3fooif", "foo(int, float) -> unknown"),
            ("_ZN2ns3Foo3barEPS0_RKS0_", "ns::Foo::bar(* ns::Foo, & const ns::Foo) -> unknown"),
            ("_ZNK3Foo3getEv", "Foo::get() const -> unknown"),
            ("_ZNO3Foo4takeEv", "Foo::take() && -> unknown"),
            ("_ZN3FooC2Ev", "Foo::$constructor() -> unknown"),
            ("_ZN3FooD0Ev", "Foo::$destructor() -> unknown"),
            ("_ZN3FoocviEv", "Foo::$cast<$SKIP_TYPE>() -> unknown"),
            ("_ZN3FooplERKS_", "Foo::operator+(& const Foo) -> unknown"),
            ("_Z3maxIiET_S0_S0_", "max<int>(int, int) -> int"),
            ("_Z7counter", "counter -> $unknown"),
            ("_ZN12_GLOBAL__N_13fooEv", "(anonymous namespace)::foo() -> unknown"),
            ("_ZTV3Foo", "Foo::$vtable"),
            ("_ZTI3Foo", "Foo <- $type_info"),
            ("_ZTS3Foo", "Foo <- $type_info_name"),
            ("_ZTISt6vectorIiSaIiEE", "std::vector<int> <- $type_info"),
            ("_ZNSt6vectorIiSaIiEE9push_backERKi", "std::vector<int>::push_back(& const int) -> unknown"),
            ("_ZZ3foovE5count", "foo() -> unknown | count -> $unknown"),
            ("_ZZ4mainE5count", "main -> $unknown | count -> $unknown"),
            ("_Z3foov.cold", "foo() -> unknown"),
            ("_Z1fPFviE", "f(* (int) -> void) -> unknown"),
            ("_Z1fIJilEEvDpT_", "f<int, long>(int, long) -> void"),
            ("_Z1fIJilEEvDpRKT_", "f<int, long>(& const int, & const long) -> void"),
            ("_ZTT3Foo", "$SKIP_ROOT"),
            ("_ZThn8_N3Foo3barEv", "$SKIP_ROOT"),
            ("_Z1fA4_i", "f($SKIP_TYPE) -> unknown"),
        ];

        for (mangled, expected) in cases {
            assert_eq!(key(mangled), expected, "{mangled}");
        }
    }

    #[test]
    fn basic_string_is_simplified() {
        let append = key("_ZNSt7__cxx1112basic_stringIcSt11char_traitsIcESaIcEE6appendEPKcm");
        assert!(append.starts_with("std::string::append"), "{append}");
        assert_eq!(append, "std::string::append(* const char, unsigned long) -> unknown");

        assert_eq!(
            key("_ZTISt12basic_stringIwSt11char_traitsIwESaIwEE"),
            "std::wstring <- $type_info"
        );
    }

    #[test]
    fn unique_ptr_drops_deleter() {
        assert_eq!(
            key("_ZTISt10unique_ptrIiSt14default_deleteIiEE"),
            "std::unique_ptr<int> <- $type_info"
        );
        // Custom deleter is kept.
        assert_eq!(
            key("_ZTISt10unique_ptrIi3DelE"),
            "std::unique_ptr<int, Del> <- $type_info"
        );
    }

    #[test]
    fn local_lambda_is_local_name() {
        let root = adapt(&parse(b"_ZZ4mainENKUlvE_clEv").unwrap());
        assert_eq!(root.kind(), canon::RootKind::LocalName);
        assert_eq!(
            root.key(),
            "main -> $unknown | $SKIP_NAME::operator() -> () const -> unknown"
        );
    }

    #[test]
    fn deterministic() {
        let node = parse(b"_ZNSt6vectorIiSaIiEE9push_backERKi").unwrap();
        let first = adapt(&node).key();
        for _ in 0..8 {
            assert_eq!(adapt(&node).key(), first);
        }
    }
}
