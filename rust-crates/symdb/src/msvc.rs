// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Projection of the MSVC parse tree ([`msvc_demangler`]) onto the canonical
//! model.

use crate::canon::{
    self, stl, FunctionType, LocalName, Name, NamePiece, PointerKind, Qualifiers, RefQualifier,
    Root, Type, SKIP_NAME,
};
use msvc_demangler::{Name as MsName, NameSequence, Operator, ParseResult, StorageClass, Symbol};

type MsType<'a> = msvc_demangler::Type<'a>;

/// Parses an MSVC mangled name (`?...`).
pub fn parse(mangled: &str) -> Option<ParseResult<'_>> {
    msvc_demangler::parse(mangled).ok()
}

/// Converts a parsed MSVC symbol to its canonical root.
///
/// Total over the native tree: constructs without a canonical mapping become
/// [`Root::Unknown`] or [`Type::Skipped`].
pub fn adapt(parsed: &ParseResult<'_>) -> Root {
    let symbol = &parsed.symbol;

    match &symbol.name {
        MsName::Operator(Operator::VFTable) => {
            return special(canon::SpecialKind::VTable, &symbol.scope);
        }
        MsName::Operator(Operator::RTTIClassCompleteObjectLocator) => {
            return special(canon::SpecialKind::CompleteObjectLocator, &symbol.scope);
        }
        MsName::Operator(Operator::RTTITypeDescriptor(_, ty)) => {
            return Root::SpecialName {
                kind: canon::SpecialKind::TypeInfo,
                ty: convert_type(ty),
            };
        }
        _ => {}
    }

    match &parsed.symbol_type {
        MsType::MemberFunction(_, _, params, sc, ret)
        | MsType::NonMemberFunction(_, params, sc, ret) => {
            let signature = function_type(&params.types, *sc, ret);
            match split_local(symbol) {
                Some((enclosing, name)) => Root::LocalName(LocalName {
                    root: Box::new(adapt(enclosing)),
                    name: Box::new(Type::Simple(name)),
                    ty: Some(Box::new(Type::Function(signature))),
                }),
                None => Root::Function {
                    name: symbol_name(symbol),
                    signature,
                },
            }
        }
        MsType::Var(inner, _, sc) => {
            let ty = convert_type(inner).qualified(qualifiers(*sc));
            match split_local(symbol) {
                Some((enclosing, name)) => Root::LocalName(LocalName {
                    root: Box::new(adapt(enclosing)),
                    name: Box::new(Type::Simple(name)),
                    ty: Some(Box::new(ty)),
                }),
                None => Root::Variable {
                    name: symbol_name(symbol),
                    ty: Some(ty),
                },
            }
        }
        _ => Root::Unknown,
    }
}

fn special(kind: canon::SpecialKind, scope: &NameSequence<'_>) -> Root {
    Root::SpecialName {
        kind,
        ty: Type::Simple(scope_name(scope, None)),
    }
}

/// Splits `enclosing-function::local-name` symbols.
///
/// The outermost scope of a function-local entity is the fully parsed
/// symbol of the enclosing function, followed by a discriminator.
fn split_local<'s, 'a>(symbol: &'s Symbol<'a>) -> Option<(&'s ParseResult<'a>, Name)> {
    let (outermost, rest) = symbol.scope.names.split_last()?;
    let MsName::ParsedName(enclosing) = outermost else {
        return None;
    };

    let pieces = rest
        .iter()
        .rev()
        .chain(std::iter::once(&symbol.name))
        .filter_map(name_piece);
    let mut name = Name::from_pieces(pieces);
    stl::simplify(&mut name);
    Some((&**enclosing, name))
}

fn symbol_name(symbol: &Symbol<'_>) -> Name {
    scope_name(&symbol.scope, Some(&symbol.name))
}

/// Builds a name from a scope (innermost first) and an optional leaf.
fn scope_name(scope: &NameSequence<'_>, leaf: Option<&MsName<'_>>) -> Name {
    let pieces = scope.names.iter().rev().chain(leaf).filter_map(name_piece);
    let mut name = Name::from_pieces(pieces);
    stl::simplify(&mut name);
    name
}

fn name_piece(name: &MsName<'_>) -> Option<NamePiece> {
    Some(match name {
        MsName::NonTemplate(raw) | MsName::AsInterface(raw) | MsName::Md5(raw) => {
            NamePiece::new(String::from_utf8_lossy(raw))
        }
        MsName::Template(inner, params) => {
            let raw = name_piece(inner).map_or_else(|| SKIP_NAME.to_owned(), |x| x.raw);
            NamePiece::with_args(raw, params.types.iter().map(convert_type).collect())
        }
        MsName::AnonymousNamespace(_) => NamePiece::new("`anonymous namespace'"),
        MsName::Discriminator(_) => return None,
        MsName::ParsedName(_) => NamePiece::new(SKIP_NAME),
        MsName::Operator(Operator::Conversion) => NamePiece::with_args("$cast", vec![Type::Skipped]),
        MsName::Operator(op) => NamePiece::new(operator_name(op)),
    })
}

/// Spelling of compiler intrinsic identifiers.
fn operator_name(op: &Operator<'_>) -> &'static str {
    match op {
        Operator::Ctor => "$constructor",
        Operator::Dtor => "$destructor",
        Operator::New => "operator new",
        Operator::Delete => "operator delete",
        Operator::Equal => "operator=",
        Operator::RShift => "operator>>",
        Operator::LShift => "operator<<",
        Operator::Bang => "operator!",
        Operator::EqualEqual => "operator==",
        Operator::BangEqual => "operator!=",
        Operator::Subscript => "operator[]",
        Operator::Arrow => "operator->",
        Operator::PlusPlus => "operator++",
        Operator::MinusMinus => "operator--",
        Operator::Minus => "operator-",
        Operator::Plus => "operator+",
        Operator::Star => "operator*",
        Operator::Amp => "operator&",
        Operator::ArrowStar => "operator->*",
        Operator::Slash => "operator/",
        Operator::Percent => "operator%",
        Operator::Less => "operator<",
        Operator::LessEqual => "operator<=",
        Operator::Greater => "operator>",
        Operator::GreaterEqual => "operator>=",
        Operator::Comma => "operator,",
        Operator::Call => "operator()",
        Operator::Tilde => "operator~",
        Operator::Caret => "operator^",
        Operator::Pipe => "operator|",
        Operator::AmpAmp => "operator&&",
        Operator::PipePipe => "operator||",
        Operator::StarEqual => "operator*=",
        Operator::PlusEqual => "operator+=",
        Operator::MinusEqual => "operator-=",
        Operator::SlashEqual => "operator/=",
        Operator::PercentEqual => "operator%=",
        Operator::GreaterGreaterEqual => "operator>>=",
        Operator::LessLessEqual => "operator<<=",
        Operator::AmpEqual => "operator&=",
        Operator::PipeEqual => "operator|=",
        Operator::CaretEqual => "operator^=",
        Operator::VBaseDtor => "`vbase dtor'",
        Operator::VectorDeletingDtor => "`vector deleting dtor'",
        Operator::DefaultCtorClosure => "`default ctor closure'",
        Operator::ScalarDeletingDtor => "`scalar deleting dtor'",
        Operator::VectorCtorIterator => "`vector ctor iterator'",
        Operator::VectorDtorIterator => "`vector dtor iterator'",
        Operator::VectorVBaseCtorIterator => "`vector vbase ctor iterator'",
        Operator::VirtualDisplacementMap => "`virtual displacement map'",
        Operator::EHVectorCtorIterator => "`eh vector ctor iterator'",
        Operator::EHVectorDtorIterator => "`eh vector dtor iterator'",
        Operator::EHVectorVBaseCtorIterator => "`eh vector vbase ctor iterator'",
        Operator::CopyCtorClosure => "`copy ctor closure'",
        Operator::LocalVFTableCtorClosure => "`local vftable ctor closure'",
        Operator::ArrayNew => "operator new[]",
        Operator::ArrayDelete => "operator delete[]",
        Operator::CoroutineAwait => "operator co_await",
        _ => SKIP_NAME,
    }
}

fn qualifiers(sc: StorageClass) -> Qualifiers {
    let mut quals = Qualifiers::NONE;
    if sc.contains(StorageClass::CONST) {
        quals |= Qualifiers::CONST;
    }
    if sc.contains(StorageClass::VOLATILE) {
        quals |= Qualifiers::VOLATILE;
    }
    if sc.contains(StorageClass::RESTRICT) {
        quals |= Qualifiers::RESTRICT;
    }
    quals
}

fn function_type(params: &[MsType<'_>], sc: StorageClass, ret: &MsType<'_>) -> FunctionType {
    // `(void)` is encoded as a single `void` parameter.
    let params = match params {
        [MsType::Void(_)] => Vec::new(),
        _ => params.iter().map(convert_type).collect(),
    };

    let ret = match ret {
        MsType::None => None,
        ty => Some(Box::new(convert_type(ty))),
    };

    let ref_qual = if sc.contains(StorageClass::LVALUE_QUAL) {
        RefQualifier::LValue
    } else if sc.contains(StorageClass::RVALUE_QUAL) {
        RefQualifier::RValue
    } else {
        RefQualifier::None
    };

    FunctionType {
        params,
        ret,
        quals: qualifiers(sc),
        ref_qual,
    }
}

fn primitive(spelling: &str, sc: StorageClass) -> Type {
    Type::simple(spelling).qualified(qualifiers(sc))
}

fn convert_type(ty: &MsType<'_>) -> Type {
    match ty {
        MsType::Void(sc) => primitive("void", *sc),
        MsType::Bool(sc) => primitive("bool", *sc),
        MsType::Char(sc) => primitive("char", *sc),
        MsType::Schar(sc) => primitive("signed char", *sc),
        MsType::Uchar(sc) => primitive("unsigned char", *sc),
        MsType::Char16(sc) => primitive("char16", *sc),
        MsType::Char32(sc) => primitive("char32", *sc),
        MsType::Short(sc) => primitive("short", *sc),
        MsType::Ushort(sc) => primitive("unsigned short", *sc),
        MsType::Int(sc) => primitive("int", *sc),
        MsType::Uint(sc) => primitive("unsigned", *sc),
        MsType::Long(sc) => primitive("long", *sc),
        MsType::Ulong(sc) => primitive("unsigned long", *sc),
        MsType::Int64(sc) => primitive("int64", *sc),
        MsType::Uint64(sc) => primitive("uint64", *sc),
        MsType::Wchar(sc) => primitive("wchar", *sc),
        MsType::Float(sc) => primitive("float", *sc),
        MsType::Double(sc) => primitive("double", *sc),
        MsType::Ldouble(sc) => primitive("double double", *sc),
        MsType::Nullptr => Type::simple("nullptr"),
        MsType::VarArgs => Type::simple("..."),

        MsType::Ptr(inner, sc) => pointer(inner, PointerKind::Pointer, *sc),
        MsType::Ref(inner, sc) => pointer(inner, PointerKind::Reference, *sc),
        MsType::RValueRef(inner, sc) => pointer(inner, PointerKind::RValueReference, *sc),

        MsType::Struct(symbol, sc)
        | MsType::Class(symbol, sc)
        | MsType::Union(symbol, sc)
        | MsType::Enum(symbol, sc)
        | MsType::Alias(symbol, sc) => Type::Simple(symbol_name(symbol)).qualified(qualifiers(*sc)),

        MsType::MemberFunction(_, _, params, sc, ret)
        | MsType::NonMemberFunction(_, params, sc, ret) => {
            Type::Function(function_type(&params.types, *sc, ret))
        }

        MsType::TemplateParameterWithIndex(index) => Type::Special(format!("T{index}")),
        MsType::RTTIType => Type::Special("rtti".to_owned()),

        _ => Type::Skipped,
    }
}

fn pointer(inner: &MsType<'_>, kind: PointerKind, sc: StorageClass) -> Type {
    Type::Pointer(Box::new(convert_type(inner)), kind).qualified(qualifiers(sc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(mangled: &str) -> String {
        let parsed = parse(mangled).unwrap_or_else(|| panic!("failed: {mangled}"));
        adapt(&parsed).key()
    }

    #[test]
    fn canonical_keys() {
        let cases = [
            ("?foo@@YAXXZ", "foo() -> void"),
            ("?foo@@YAXH@Z", "foo(int) -> void"),
            ("?bar@Foo@@QEAAHH@Z", "Foo::bar(int) -> int"),
            ("?get@Foo@@QEBAHXZ", "Foo::get() const -> int"),
            ("?f@@YAXPEBD@Z", "f(* const char) -> void"),
            ("??0Foo@@QEAA@XZ", "Foo::$constructor() -> unknown"),
            ("??1Foo@@UEAA@XZ", "Foo::$destructor() -> unknown"),
            ("?g_count@@3HA", "g_count -> int"),
            ("?x@ns@@3NA", "ns::x -> double"),
            ("??_7Foo@@6B@", "Foo::$vtable"),
            ("??_R4Foo@@6B@", "Foo::$complete_object_locator"),
        ];

        for (mangled, expected) in cases {
            assert_eq!(key(mangled), expected, "{mangled}");
        }
    }

    #[test]
    fn intrinsic_names() {
        let cases = [
            (Operator::Ctor, "$constructor"),
            (Operator::Dtor, "$destructor"),
            (Operator::New, "operator new"),
            (Operator::Delete, "operator delete"),
            (Operator::Equal, "operator="),
            (Operator::RShift, "operator>>"),
            (Operator::LShift, "operator<<"),
            (Operator::Bang, "operator!"),
            (Operator::EqualEqual, "operator=="),
            (Operator::BangEqual, "operator!="),
            (Operator::Subscript, "operator[]"),
            (Operator::Arrow, "operator->"),
            (Operator::PlusPlus, "operator++"),
            (Operator::MinusMinus, "operator--"),
            (Operator::Minus, "operator-"),
            (Operator::Plus, "operator+"),
            (Operator::Star, "operator*"),
            (Operator::Amp, "operator&"),
            (Operator::ArrowStar, "operator->*"),
            (Operator::Slash, "operator/"),
            (Operator::Percent, "operator%"),
            (Operator::Less, "operator<"),
            (Operator::LessEqual, "operator<="),
            (Operator::Greater, "operator>"),
            (Operator::GreaterEqual, "operator>="),
            (Operator::Comma, "operator,"),
            (Operator::Call, "operator()"),
            (Operator::Tilde, "operator~"),
            (Operator::Caret, "operator^"),
            (Operator::Pipe, "operator|"),
            (Operator::AmpAmp, "operator&&"),
            (Operator::PipePipe, "operator||"),
            (Operator::StarEqual, "operator*="),
            (Operator::PlusEqual, "operator+="),
            (Operator::MinusEqual, "operator-="),
            (Operator::SlashEqual, "operator/="),
            (Operator::PercentEqual, "operator%="),
            (Operator::GreaterGreaterEqual, "operator>>="),
            (Operator::LessLessEqual, "operator<<="),
            (Operator::AmpEqual, "operator&="),
            (Operator::PipeEqual, "operator|="),
            (Operator::CaretEqual, "operator^="),
            (Operator::VBaseDtor, "`vbase dtor'"),
            (Operator::VectorDeletingDtor, "`vector deleting dtor'"),
            (Operator::DefaultCtorClosure, "`default ctor closure'"),
            (Operator::ScalarDeletingDtor, "`scalar deleting dtor'"),
            (Operator::VectorCtorIterator, "`vector ctor iterator'"),
            (Operator::VectorDtorIterator, "`vector dtor iterator'"),
            (Operator::VectorVBaseCtorIterator, "`vector vbase ctor iterator'"),
            (Operator::VirtualDisplacementMap, "`virtual displacement map'"),
            (Operator::EHVectorCtorIterator, "`eh vector ctor iterator'"),
            (Operator::EHVectorDtorIterator, "`eh vector dtor iterator'"),
            (Operator::EHVectorVBaseCtorIterator, "`eh vector vbase ctor iterator'"),
            (Operator::CopyCtorClosure, "`copy ctor closure'"),
            (Operator::LocalVFTableCtorClosure, "`local vftable ctor closure'"),
            (Operator::ArrayNew, "operator new[]"),
            (Operator::ArrayDelete, "operator delete[]"),
            (Operator::CoroutineAwait, "operator co_await"),
            // Identifiers without a spelling.
            (Operator::Conversion, SKIP_NAME),
            (Operator::VFTable, SKIP_NAME),
            (Operator::VBTable, SKIP_NAME),
            (Operator::VCall, SKIP_NAME),
            (Operator::Typeof, SKIP_NAME),
            (Operator::LocalStaticGuard(None), SKIP_NAME),
            (Operator::String, SKIP_NAME),
            (Operator::LocalVFTable, SKIP_NAME),
            (Operator::PlacementDeleteClosure, SKIP_NAME),
            (Operator::PlacementArrayDeleteClosure, SKIP_NAME),
            (Operator::LiteralOperatorName, SKIP_NAME),
            (Operator::RTTIBaseClassArray, SKIP_NAME),
            (Operator::RTTIClassHierarchyDescriptor, SKIP_NAME),
            (Operator::DynamicInitializer, SKIP_NAME),
            (Operator::DynamicAtexitDtor, SKIP_NAME),
            (Operator::LocalStaticThreadGuard(None), SKIP_NAME),
        ];

        for (op, expected) in cases {
            assert_eq!(operator_name(&op), expected, "{op:?}");
        }

        assert_eq!(key("??2@YAPEAX_K@Z"), "operator new(uint64) -> * void");
        assert_eq!(key("??_U@YAPEAX_K@Z"), "operator new[](uint64) -> * void");
    }

    #[test]
    fn unsupported_intrinsics_are_rejected() {
        // Managed and copy-constructing vector iterators and `operator<=>`
        // have no operator code in the native grammar.
        let inputs = [
            "??__AFoo@@QEAAXXZ",
            "??__BFoo@@QEAAXXZ",
            "??__CFoo@@QEAAXXZ",
            "??__GFoo@@QEAAXXZ",
            "??__IFoo@@QEAAXXZ",
            "??__MFoo@@QEBAHAEBV0@@Z",
        ];
        for input in inputs {
            assert!(parse(input).is_none(), "{input}");
        }
    }

    #[test]
    fn standard_library_names_are_simplified() {
        let cases = [
            (
                "?f@@YAXAEBV?$basic_string@DU?$char_traits@D@std@@V?$allocator@D@2@@std@@@Z",
                "f(& const std::string) -> void",
            ),
            (
                "?f@@YAXAEBV?$basic_string@_WU?$char_traits@_W@std@@V?$allocator@_W@2@@std@@@Z",
                "f(& const std::wstring) -> void",
            ),
            (
                "?f@@YAXAEBV?$vector@HV?$allocator@H@std@@@std@@@Z",
                "f(& const std::vector<int>) -> void",
            ),
            (
                "?f@@YAXAEBV?$vector@HV?$allocator@J@std@@@std@@@Z",
                "f(& const std::vector<int, std::allocator<long>>) -> void",
            ),
        ];

        for (mangled, expected) in cases {
            assert_eq!(key(mangled), expected, "{mangled}");
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse("?").is_none());
        assert!(parse("_Z3foov").is_none());
    }

    #[test]
    fn deterministic() {
        let parsed = parse("?bar@Foo@@QEAAHH@Z").unwrap();
        let first = adapt(&parsed).key();
        for _ in 0..8 {
            assert_eq!(adapt(&parsed).key(), first);
        }
    }
}
