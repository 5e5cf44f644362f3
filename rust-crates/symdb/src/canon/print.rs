// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Name printer: renders the canonical AST to its canonical key.

use super::*;
use std::fmt::{self, Display, Formatter, Write as _};

/// Writes `items` separated by `sep`.
fn join<T: Display>(f: &mut Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i != 0 {
            f.write_str(sep)?;
        }
        item.fmt(f)?;
    }
    Ok(())
}

impl Display for Qualifiers {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.contains(Qualifiers::CONST) {
            f.write_str("const ")?;
        }
        if self.contains(Qualifiers::VOLATILE) {
            f.write_str("volatile ")?;
        }
        if self.contains(Qualifiers::RESTRICT) {
            f.write_str("restrict ")?;
        }
        Ok(())
    }
}

impl Display for PointerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PointerKind::Pointer => "* ",
            PointerKind::Reference => "& ",
            PointerKind::RValueReference => "&& ",
        })
    }
}

impl Display for RefQualifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefQualifier::None => "",
            RefQualifier::LValue => "& ",
            RefQualifier::RValue => "&& ",
        })
    }
}

impl Display for NamePiece {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)?;
        if let Some(args) = &self.template_args {
            f.write_char('<')?;
            join(f, args, ", ")?;
            f.write_char('>')?;
        }
        Ok(())
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        join(f, self.pieces(), "::")
    }
}

impl Display for FunctionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_char('(')?;
        join(f, &self.params, ", ")?;
        write!(f, ") {}{}-> ", self.quals, self.ref_qual)?;
        match &self.ret {
            Some(ret) => ret.fmt(f),
            None => f.write_str("unknown"),
        }
    }
}

impl Display for LocalName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} -> ", self.root, self.name)?;
        match &self.ty {
            Some(ty) => ty.fmt(f),
            None => f.write_str("$unknown"),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Type::Skipped => f.write_str("$SKIP_TYPE"),
            Type::Special(tag) => write!(f, "$${tag}"),
            Type::Simple(name) => name.fmt(f),
            Type::Qualified(child, quals) => write!(f, "{quals}{child}"),
            Type::Pointer(child, kind) => write!(f, "{kind}{child}"),
            Type::Function(func) => func.fmt(f),
            Type::LocalName(local) => local.fmt(f),
        }
    }
}

impl Display for Root {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Root::Unknown => f.write_str("$SKIP_ROOT"),
            Root::Variable { name, ty } => match ty {
                Some(ty) => write!(f, "{name} -> {ty}"),
                None => write!(f, "{name} -> $unknown"),
            },
            Root::Function { name, signature } => write!(f, "{name}{signature}"),
            Root::SpecialName { kind, ty } => match kind {
                SpecialKind::VTable => write!(f, "{ty}::$vtable"),
                SpecialKind::CompleteObjectLocator => write!(f, "{ty}::$complete_object_locator"),
                SpecialKind::TypeInfo => write!(f, "{ty} <- $type_info"),
                SpecialKind::TypeInfoName => write!(f, "{ty} <- $type_info_name"),
            },
            Root::LocalName(local) => local.fmt(f),
        }
    }
}
