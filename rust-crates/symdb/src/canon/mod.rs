// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Canonical symbol model shared by all ABI adapters.
//!
//! Both the Itanium and the MSVC adapter project their native parse trees
//! onto the types in this module. The printed form of a [`Root`] (via its
//! [`Display`](fmt::Display) implementation) is the *canonical key*: two
//! symbols are considered the same entity iff their keys are equal.
//!
//! The tree is a plain owned algebraic value. There is no sharing and no
//! back-references: a [`LocalName`] owns the root of its enclosing function.

mod print;
pub(crate) mod stl;

use smallvec::SmallVec;
use std::fmt;
use std::ops;

/// Placeholder piece for identifiers without a canonical spelling.
pub const SKIP_NAME: &str = "$SKIP_NAME";

/// Discriminant of a [`Root`], persisted as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum RootKind {
    /// Decoded, but no canonical mapping exists.
    Unknown = 0,
    /// Global or static data.
    Variable = 1,
    /// Function or method.
    Function = 2,
    /// Compiler-generated tables, see [`SpecialKind`].
    SpecialName = 3,
    /// Entity scoped inside a function body.
    LocalName = 4,
}

impl RootKind {
    /// Inverse of `kind as u32`.
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Unknown,
            1 => Self::Variable,
            2 => Self::Function,
            3 => Self::SpecialName,
            4 => Self::LocalName,
            _ => return None,
        })
    }

    /// Short lower-case label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Variable => "variable",
            Self::Function => "function",
            Self::SpecialName => "special",
            Self::LocalName => "local",
        }
    }
}

/// Compiler-synthesized entities that carry a type instead of a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    /// Virtual function table.
    VTable,
    /// `std::type_info` object.
    TypeInfo,
    /// Mangled type name string referenced by a `type_info`.
    TypeInfoName,
    /// MSVC RTTI complete object locator.
    CompleteObjectLocator,
}

/// Top-level node of a decoded symbol.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    /// Recognized by the native grammar, but not mappable.
    Unknown,

    /// Data symbol. The type is `None` when the mangling doesn't encode it.
    Variable { name: Name, ty: Option<Type> },

    /// Function symbol.
    Function { name: Name, signature: FunctionType },

    /// Compiler-generated table or RTTI record for the given type.
    SpecialName { kind: SpecialKind, ty: Type },

    /// Entity declared inside a function body.
    LocalName(LocalName),
}

impl Root {
    /// Returns the discriminant.
    pub fn kind(&self) -> RootKind {
        match self {
            Root::Unknown => RootKind::Unknown,
            Root::Variable { .. } => RootKind::Variable,
            Root::Function { .. } => RootKind::Function,
            Root::SpecialName { .. } => RootKind::SpecialName,
            Root::LocalName(_) => RootKind::LocalName,
        }
    }

    /// Renders the canonical key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

/// A name declared in the scope of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalName {
    /// Enclosing function (or whatever the native grammar nests us in).
    pub root: Box<Root>,
    /// The local entity itself.
    pub name: Box<Type>,
    /// Type of the local entity, if encoded.
    pub ty: Option<Box<Type>>,
}

/// Canonical type node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// Unsupported construct (expressions, arrays, closures, ...).
    Skipped,

    /// Tagged marker for ABI-specific types without a C++ spelling.
    Special(String),

    /// Named type, including builtins.
    Simple(Name),

    /// cv-qualified type.
    Qualified(Box<Type>, Qualifiers),

    /// Pointer or reference to the child.
    Pointer(Box<Type>, PointerKind),

    /// Function type or signature.
    Function(FunctionType),

    /// Type declared inside a function body.
    LocalName(LocalName),
}

impl Type {
    /// Shorthand for a single-piece name type without template arguments.
    pub fn simple(raw: impl Into<String>) -> Self {
        Type::Simple(Name::new(NamePiece::new(raw)))
    }

    /// Wraps `self` with the given qualifiers, if any.
    pub fn qualified(self, quals: Qualifiers) -> Self {
        if quals.is_empty() {
            self
        } else {
            Type::Qualified(Box::new(self), quals)
        }
    }
}

/// Function signature.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionType {
    pub params: Vec<Type>,
    /// `None` when the grammar doesn't encode a return type.
    pub ret: Option<Box<Type>>,
    pub quals: Qualifiers,
    pub ref_qual: RefQualifier,
}

/// Kind of indirection in [`Type::Pointer`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    Pointer,
    Reference,
    RValueReference,
}

/// Reference qualifier on member functions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RefQualifier {
    #[default]
    None,
    LValue,
    RValue,
}

/// Bit-set of cv-qualifiers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Qualifiers(u8);

impl Qualifiers {
    /// No qualifiers.
    pub const NONE: Self = Self(0);
    /// `const`
    pub const CONST: Self = Self(1);
    /// `volatile`
    pub const VOLATILE: Self = Self(2);
    /// `restrict`
    pub const RESTRICT: Self = Self(4);

    /// Checks whether all bits in `other` are set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Checks whether no bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl ops::BitOr for Qualifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for Qualifiers {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Qualifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Qualifiers({})", self.to_string().trim_end())
    }
}

/// Qualified name: a non-empty sequence of pieces in nesting order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pieces: SmallVec<[NamePiece; 4]>,
}

impl Name {
    /// Creates a name consisting of a single piece.
    pub fn new(first: NamePiece) -> Self {
        let mut pieces = SmallVec::new();
        pieces.push(first);
        Name { pieces }
    }

    /// Creates a name from the given pieces.
    ///
    /// An empty sequence yields a single [`SKIP_NAME`] piece: a name always
    /// has at least one piece.
    pub fn from_pieces(pieces: impl IntoIterator<Item = NamePiece>) -> Self {
        let pieces: SmallVec<_> = pieces.into_iter().collect();
        if pieces.is_empty() {
            return Name::new(NamePiece::new(SKIP_NAME));
        }
        Name { pieces }
    }

    /// Pieces in nesting order, outermost first.
    pub fn pieces(&self) -> &[NamePiece] {
        &self.pieces
    }

    /// Innermost piece.
    pub fn last(&self) -> &NamePiece {
        // Never empty: see constructors.
        &self.pieces[self.pieces.len() - 1]
    }

    /// Appends a piece.
    pub fn push(&mut self, piece: NamePiece) {
        self.pieces.push(piece);
    }

    /// Removes the innermost piece unless it is the only one.
    pub fn pop(&mut self) -> Option<NamePiece> {
        if self.pieces.len() > 1 {
            self.pieces.pop()
        } else {
            None
        }
    }

    pub(crate) fn pieces_mut(&mut self) -> &mut SmallVec<[NamePiece; 4]> {
        &mut self.pieces
    }
}

/// Single component of a [`Name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePiece {
    /// Identifier as spelled in the output.
    pub raw: String,
    /// Template arguments, if the piece is a template specialization.
    pub template_args: Option<Vec<Type>>,
}

impl NamePiece {
    /// Piece without template arguments.
    pub fn new(raw: impl Into<String>) -> Self {
        NamePiece {
            raw: raw.into(),
            template_args: None,
        }
    }

    /// Piece with the given template arguments.
    pub fn with_args(raw: impl Into<String>, args: Vec<Type>) -> Self {
        NamePiece {
            raw: raw.into(),
            template_args: Some(args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_never_empty() {
        let name = Name::from_pieces([]);
        assert_eq!(name.pieces().len(), 1);
        assert_eq!(name.last().raw, SKIP_NAME);

        let mut name = Name::new(NamePiece::new("a"));
        assert_eq!(name.pop(), None);
        name.push(NamePiece::new("b"));
        assert_eq!(name.pop(), Some(NamePiece::new("b")));
    }

    #[test]
    fn qualifier_bits() {
        let q = Qualifiers::CONST | Qualifiers::RESTRICT;
        assert!(q.contains(Qualifiers::CONST));
        assert!(!q.contains(Qualifiers::VOLATILE));
        assert!(Qualifiers::NONE.is_empty());
        assert_eq!(Type::simple("int").qualified(Qualifiers::NONE), Type::simple("int"));
    }

    #[test]
    fn root_kind_round_trip() {
        for raw in 0..5 {
            let kind = RootKind::from_u32(raw).unwrap();
            assert_eq!(kind as u32, raw);
        }
        assert_eq!(RootKind::from_u32(5), None);
    }
}
