// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Native parse tree of the Itanium C++ ABI mangling.
//!
//! Node kinds mirror the productions of the grammar rather than the shape of
//! the canonical model. Substitutions and template parameters are already
//! resolved: every node is a self-contained owned value.

use crate::canon::{Qualifiers, RefQualifier};

/// Itanium parse tree node.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Source identifier, builtin type spelling or operator name.
    Name(String),

    /// `qual::name`
    Nested { qual: Box<Node>, name: Box<Node> },

    /// `std::child`
    StdQualified(Box<Node>),

    /// `name<args...>`
    WithTemplateArgs { name: Box<Node>, args: Vec<Node> },

    /// One of the abbreviations `Sa`, `Sb`, `Ss`, `Si`, `So`, `Sd`.
    StdSubstitution(StdSub),

    /// `base[abi:tag]`
    AbiTag { base: Box<Node>, tag: String },

    /// Constructor or destructor of `base`.
    CtorDtor { base: Box<Node>, dtor: bool },

    /// `operator T`
    ConversionOperator(Box<Node>),

    /// `{unnamed type#N}`
    UnnamedType(u64),

    /// `{lambda(params)#N}`
    Closure { params: Vec<Node>, index: u64 },

    /// Structured binding declaration `[a, b]`.
    StructuredBinding(Vec<Node>),

    /// Entity declared in the body of `encoding`.
    Local { encoding: Box<Node>, entity: Box<Node> },

    /// Function with its signature.
    Function(FunctionEncoding),

    /// Compiler-generated entity (vtable, typeinfo, guard variable, ...).
    Special { kind: SpecialKind, child: Box<Node> },

    /// Construction vtable for `first` in `second`.
    CtorVtable { first: Box<Node>, second: Box<Node> },

    /// cv-qualified type.
    Qualified { child: Box<Node>, quals: Qualifiers },

    /// Vendor extended qualifier (`U`).
    VendorQualified { child: Box<Node>, vendor: String },

    Pointer(Box<Node>),

    Reference { child: Box<Node>, rvalue: bool },

    PointerToMember { class: Box<Node>, member: Box<Node> },

    /// Array with an optional printed dimension.
    Array { dimension: Option<String>, element: Box<Node> },

    /// Vector extension type `Dv`.
    Vector { dimension: Option<String>, element: Box<Node> },

    /// Function type.
    FunctionType(FunctionSig),

    /// Template parameter that could not be resolved at parse time.
    TemplateParam(usize),

    /// Argument pack (`J ... E`) or a parameter referencing one.
    Pack(Vec<Node>),

    /// `Dp pattern`
    PackExpansion(Box<Node>),

    /// Literal value of the given type, e.g. template non-type arguments.
    Literal { ty: Box<Node>, value: String },

    /// Opaque expression; only the operator spelling is kept.
    Expr(String),

    /// `decltype(expression)`
    Decltype(Box<Node>),

    /// Clone suffix such as `.cold` or `.constprop.0`.
    Clone { base: Box<Node>, suffix: String },
}

/// Function encoding: name plus bare function type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEncoding {
    /// Encoded return type, present only for template functions.
    pub ret: Option<Box<Node>>,
    /// Function name.
    pub name: Box<Node>,
    /// Parameter types, empty for `(void)`.
    pub params: Vec<Node>,
    /// cv-qualifiers of `this`.
    pub cv: Qualifiers,
    /// Reference qualifier of `this`.
    pub ref_qual: RefQualifier,
}

/// Function type signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSig {
    /// Return type.
    pub ret: Box<Node>,
    /// Parameter types, empty for `(void)`.
    pub params: Vec<Node>,
    /// cv-qualifiers of the function type.
    pub cv: Qualifiers,
    /// Reference qualifier of the function type.
    pub ref_qual: RefQualifier,
}

/// Standard abbreviations that expand to `std::` entities.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdSub {
    Allocator,
    BasicString,
    String,
    Istream,
    Ostream,
    Iostream,
}

impl StdSub {
    /// Identifier following the `std::` prefix.
    pub fn identifier(self) -> &'static str {
        match self {
            StdSub::Allocator => "allocator",
            StdSub::BasicString => "basic_string",
            StdSub::String => "string",
            StdSub::Istream => "istream",
            StdSub::Ostream => "ostream",
            StdSub::Iostream => "iostream",
        }
    }
}

/// Kinds of `<special-name>`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    VirtualTable,
    Vtt,
    TypeInfo,
    TypeInfoName,
    NonVirtualThunk,
    VirtualThunk,
    CovariantThunk,
    GuardVariable,
    ReferenceTemporary,
    TlsInit,
    TlsWrapper,
    TransactionClone,
}

impl Node {
    /// Calls `f` on each direct child until it returns `false`.
    ///
    /// Returns `false` if any call did.
    fn all_children(&self, mut f: impl FnMut(&Node) -> bool) -> bool {
        match self {
            Node::Name(_)
            | Node::StdSubstitution(_)
            | Node::UnnamedType(_)
            | Node::TemplateParam(_)
            | Node::Expr(_) => true,

            Node::StdQualified(x)
            | Node::ConversionOperator(x)
            | Node::Pointer(x)
            | Node::PackExpansion(x)
            | Node::Decltype(x)
            | Node::AbiTag { base: x, .. }
            | Node::CtorDtor { base: x, .. }
            | Node::Special { child: x, .. }
            | Node::Qualified { child: x, .. }
            | Node::VendorQualified { child: x, .. }
            | Node::Reference { child: x, .. }
            | Node::Array { element: x, .. }
            | Node::Vector { element: x, .. }
            | Node::Literal { ty: x, .. }
            | Node::Clone { base: x, .. } => f(x),

            Node::Nested { qual: a, name: b }
            | Node::Local {
                encoding: a,
                entity: b,
            }
            | Node::CtorVtable {
                first: a,
                second: b,
            }
            | Node::PointerToMember {
                class: a,
                member: b,
            } => f(a) && f(b),

            Node::WithTemplateArgs { name, args } => f(name) && args.iter().all(f),
            Node::Closure { params, .. } => params.iter().all(f),
            Node::StructuredBinding(items) | Node::Pack(items) => items.iter().all(f),

            Node::Function(func) => {
                f(&func.name)
                    && func.ret.as_deref().map_or(true, &mut f)
                    && func.params.iter().all(f)
            }

            Node::FunctionType(sig) => f(&sig.ret) && sig.params.iter().all(f),
        }
    }

    /// Charges the number of nodes in this subtree against `budget`.
    ///
    /// Returns `false` (leaving `budget` at zero) if the subtree is larger
    /// than the remaining budget. Walking stops as soon as the budget is
    /// exhausted, so the cost of the check is bounded by the budget itself.
    pub(crate) fn charge(&self, budget: &mut usize) -> bool {
        if *budget == 0 {
            return false;
        }
        *budget -= 1;
        self.all_children(|x| x.charge(budget))
    }

    /// Checks that no path from this node to a leaf is longer than `limit`.
    ///
    /// The walk never descends more than `limit` levels.
    pub(crate) fn depth_within(&self, limit: usize) -> bool {
        match limit.checked_sub(1) {
            Some(rest) => self.all_children(|x| x.depth_within(rest)),
            None => false,
        }
    }
}
