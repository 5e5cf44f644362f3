// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Recursive descent parser for the Itanium C++ ABI mangling.
//!
//! Reference: <https://itanium-cxx-abi.github.io/cxx-abi/abi.html#mangling>
//!
//! Back-references and template parameters are resolved while parsing by
//! cloning the referenced node into the tree. Pathological inputs that
//! would blow up through repeated references are rejected via a global
//! node budget. Recursion is bounded by [`MAX_DEPTH`] and the nesting of
//! the resulting tree by [`MAX_TREE_DEPTH`].

use super::ast::*;
use crate::canon::{Qualifiers, RefQualifier};
use std::mem;

/// Maximum recursion depth of the parser.
const MAX_DEPTH: u32 = 256;

/// Maximum nesting of the parse tree, including referenced subtrees.
const MAX_TREE_DEPTH: usize = 256;

/// Maximum number of nodes materialized through back-references.
const CLONE_BUDGET: usize = 1 << 16;

/// Spelling and arity of the two-letter operator codes.
///
/// An arity of 0 marks operators with bespoke expression syntax.
#[rustfmt::skip]
const OPERATORS: &[(&[u8; 2], &str, u8)] = &[
    (b"aa", "&&", 2), (b"ad", "&", 1), (b"an", "&", 2), (b"aN", "&=", 2),
    (b"aS", "=", 2), (b"aw", "co_await", 1), (b"cl", "()", 0), (b"cm", ",", 2),
    (b"co", "~", 1), (b"da", "delete[]", 1), (b"de", "*", 1), (b"dl", "delete", 1),
    (b"dv", "/", 2), (b"dV", "/=", 2), (b"eo", "^", 2), (b"eO", "^=", 2),
    (b"eq", "==", 2), (b"ge", ">=", 2), (b"gt", ">", 2), (b"ix", "[]", 2),
    (b"le", "<=", 2), (b"ls", "<<", 2), (b"lS", "<<=", 2), (b"lt", "<", 2),
    (b"mi", "-", 2), (b"mI", "-=", 2), (b"ml", "*", 2), (b"mL", "*=", 2),
    (b"mm", "--", 1), (b"na", "new[]", 0), (b"ne", "!=", 2), (b"ng", "-", 1),
    (b"nt", "!", 1), (b"nw", "new", 0), (b"oo", "||", 2), (b"or", "|", 2),
    (b"oR", "|=", 2), (b"pm", "->*", 2), (b"pl", "+", 2), (b"pL", "+=", 2),
    (b"pp", "++", 1), (b"ps", "+", 1), (b"pt", "->", 2), (b"qu", "?", 3),
    (b"rm", "%", 2), (b"rM", "%=", 2), (b"rs", ">>", 2), (b"rS", ">>=", 2),
    (b"ss", "<=>", 2),
];

fn lookup_operator(code: [u8; 2]) -> Option<(&'static str, u8)> {
    OPERATORS
        .iter()
        .find(|(c, _, _)| **c == code)
        .map(|&(_, spelling, arity)| (spelling, arity))
}

/// Parses a complete mangled name (`_Z...`).
///
/// Up to two extra leading underscores, as emitted on some platforms, are
/// accepted. Returns `None` if the input isn't a valid mangled name.
pub fn parse(mangled: &[u8]) -> Option<Node> {
    let underscores = mangled.iter().take_while(|&&x| x == b'_').count();
    if !(1..=3).contains(&underscores) || mangled.get(underscores) != Some(&b'Z') {
        return None;
    }

    let mut parser = Parser {
        input: mangled,
        pos: underscores + 1,
        subs: Vec::new(),
        template_params: Vec::new(),
        tag_templates: true,
        try_template_args: true,
        depth: 0,
        budget: CLONE_BUDGET,
    };

    let mut node = parser.parse_encoding()?;

    // Vendor clone suffixes: `.cold`, `.constprop.0`, `.isra.0`, ...
    if parser.peek() == Some(b'.') {
        let suffix = parser.input[parser.pos..].to_vec();
        parser.pos = parser.input.len();
        node = Node::Clone {
            base: Box::new(node),
            suffix: String::from_utf8_lossy(&suffix).into_owned(),
        };
    }

    (parser.at_end() && node.depth_within(MAX_TREE_DEPTH)).then_some(node)
}

/// Side information collected while parsing the name of an encoding.
#[derive(Debug, Default)]
struct NameState {
    cv: Qualifiers,
    ref_qual: RefQualifier,
    ends_with_template_args: bool,
    ctor_dtor_conversion: bool,
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    subs: Vec<Node>,
    template_params: Vec<Node>,
    tag_templates: bool,
    try_template_args: bool,
    depth: u32,
    budget: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn at_encoding_end(&self) -> bool {
        matches!(self.peek(), None | Some(b'E' | b'.'))
    }

    fn consume(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn consume_str(&mut self, s: &[u8]) -> bool {
        if self.input[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        self.consume(byte).then_some(())
    }

    fn enter(&mut self) -> Option<()> {
        self.depth += 1;
        (self.depth <= MAX_DEPTH).then_some(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Clones a referenced node, charging it against the clone budget.
    ///
    /// References to subtrees nested deeper than [`MAX_TREE_DEPTH`] are
    /// rejected.
    fn materialize(node: &Node, budget: &mut usize) -> Option<Node> {
        if !node.depth_within(MAX_TREE_DEPTH) {
            return None;
        }
        node.charge(budget).then(|| node.clone())
    }

    /// `<number> ::= [n] <non-negative decimal integer>`
    fn parse_number(&mut self) -> Option<String> {
        let start = self.pos;
        self.consume(b'n');
        let digits = self.input[self.pos..]
            .iter()
            .take_while(|x| x.is_ascii_digit())
            .count();
        if digits == 0 {
            self.pos = start;
            return None;
        }
        self.pos += digits;
        let text = &self.input[start..self.pos];
        Some(String::from_utf8_lossy(text).replace('n', "-"))
    }

    fn parse_positive(&mut self) -> Option<usize> {
        let digits = self.input[self.pos..]
            .iter()
            .take_while(|x| x.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }
        let text = std::str::from_utf8(&self.input[self.pos..self.pos + digits]).ok()?;
        let value = text.parse().ok()?;
        self.pos += digits;
        Some(value)
    }

    /// `<seq-id> _` in base 36, returning the raw value.
    fn parse_seq_id(&mut self) -> Option<usize> {
        let mut value = 0usize;
        let mut any = false;
        while let Some(c) = self.peek() {
            let digit = match c {
                b'0'..=b'9' => c - b'0',
                b'A'..=b'Z' => c - b'A' + 10,
                _ => break,
            };
            value = value.checked_mul(36)?.checked_add(usize::from(digit))?;
            any = true;
            self.pos += 1;
        }
        any.then_some(value)
    }

    /// `<encoding> ::= <name> <bare-function-type> | <name> | <special-name>`
    fn parse_encoding(&mut self) -> Option<Node> {
        self.enter()?;

        if matches!(self.peek(), Some(b'G' | b'T')) {
            let special = self.parse_special_name();
            self.leave();
            return special;
        }

        let saved_params = mem::take(&mut self.template_params);
        let saved_tag = mem::replace(&mut self.tag_templates, true);

        let result = self.parse_function_encoding();

        self.template_params = saved_params;
        self.tag_templates = saved_tag;
        self.leave();
        result
    }

    fn parse_function_encoding(&mut self) -> Option<Node> {
        let mut state = NameState::default();
        let name = self.parse_name(Some(&mut state))?;
        self.tag_templates = false;

        if self.at_encoding_end() {
            return Some(name);
        }

        // Skip `Ua9enable_ifI...E` attributes.
        while self.consume_str(b"Ua9enable_if") {
            self.parse_template_args()?;
        }

        let ret = if state.ends_with_template_args && !state.ctor_dtor_conversion {
            Some(Box::new(self.parse_type()?))
        } else {
            None
        };

        let mut params = Vec::new();
        if self.peek() == Some(b'v') && matches!(self.peek_at(1), None | Some(b'E' | b'.')) {
            self.pos += 1;
        } else {
            while !self.at_encoding_end() {
                params.push(self.parse_type()?);
            }
        }

        Some(Node::Function(FunctionEncoding {
            ret,
            name: Box::new(name),
            params,
            cv: state.cv,
            ref_qual: state.ref_qual,
        }))
    }

    /// `<special-name>`
    fn parse_special_name(&mut self) -> Option<Node> {
        let special = |kind, child: Node| Node::Special {
            kind,
            child: Box::new(child),
        };

        let code = [self.peek()?, self.peek_at(1)?];
        self.pos += 2;

        Some(match &code {
            b"TV" => special(SpecialKind::VirtualTable, self.parse_type()?),
            b"TT" => special(SpecialKind::Vtt, self.parse_type()?),
            b"TI" => special(SpecialKind::TypeInfo, self.parse_type()?),
            b"TS" => special(SpecialKind::TypeInfoName, self.parse_type()?),
            b"Th" => {
                self.parse_number()?;
                self.expect(b'_')?;
                special(SpecialKind::NonVirtualThunk, self.parse_encoding()?)
            }
            b"Tv" => {
                self.parse_number()?;
                self.expect(b'_')?;
                self.parse_number()?;
                self.expect(b'_')?;
                special(SpecialKind::VirtualThunk, self.parse_encoding()?)
            }
            b"Tc" => {
                self.parse_call_offset()?;
                self.parse_call_offset()?;
                special(SpecialKind::CovariantThunk, self.parse_encoding()?)
            }
            b"TC" => {
                let first = self.parse_type()?;
                self.parse_number()?;
                self.expect(b'_')?;
                let second = self.parse_type()?;
                Node::CtorVtable {
                    first: Box::new(first),
                    second: Box::new(second),
                }
            }
            b"TW" => special(SpecialKind::TlsWrapper, self.parse_name(None)?),
            b"TH" => special(SpecialKind::TlsInit, self.parse_name(None)?),
            b"GV" => special(SpecialKind::GuardVariable, self.parse_name(None)?),
            b"GR" => {
                let name = self.parse_name(None)?;
                self.parse_seq_id();
                self.expect(b'_')?;
                special(SpecialKind::ReferenceTemporary, name)
            }
            b"GT" => {
                if !self.consume(b'n') && !self.consume(b't') {
                    return None;
                }
                special(SpecialKind::TransactionClone, self.parse_encoding()?)
            }
            _ => return None,
        })
    }

    /// `<call-offset> ::= h <nv-offset> _ | v <v-offset> _`
    fn parse_call_offset(&mut self) -> Option<()> {
        if self.consume(b'h') {
            self.parse_number()?;
            return self.expect(b'_');
        }
        self.expect(b'v')?;
        self.parse_number()?;
        self.expect(b'_')?;
        self.parse_number()?;
        self.expect(b'_')
    }

    /// `<name>`
    fn parse_name(&mut self, state: Option<&mut NameState>) -> Option<Node> {
        self.enter()?;
        let result = self.parse_name_inner(state);
        self.leave();
        result
    }

    fn parse_name_inner(&mut self, mut state: Option<&mut NameState>) -> Option<Node> {
        match self.peek()? {
            b'N' => return self.parse_nested_name(state),
            b'Z' => return self.parse_local_name(state),
            _ => {}
        }

        // <unscoped-template-name> via <substitution>
        if self.peek() == Some(b'S') && self.peek_at(1) != Some(b't') {
            let sub = self.parse_substitution()?;
            if self.peek() != Some(b'I') {
                return None;
            }
            let args = self.parse_template_args()?;
            if let Some(state) = state {
                state.ends_with_template_args = true;
            }
            return Some(Node::WithTemplateArgs {
                name: Box::new(sub),
                args,
            });
        }

        let mut name = self.parse_unscoped_name(state.as_deref_mut())?;

        if self.peek() == Some(b'I') {
            self.subs.push(name.clone());
            let args = self.parse_template_args()?;
            if let Some(state) = state {
                state.ends_with_template_args = true;
            }
            name = Node::WithTemplateArgs {
                name: Box::new(name),
                args,
            };
        }

        Some(name)
    }

    /// `<unscoped-name> ::= <unqualified-name> | St <unqualified-name>`
    fn parse_unscoped_name(&mut self, state: Option<&mut NameState>) -> Option<Node> {
        let is_std = self.consume_str(b"St");
        let name = self.parse_unqualified_name(state, None)?;
        Some(if is_std {
            Node::StdQualified(Box::new(name))
        } else {
            name
        })
    }

    /// `<nested-name> ::= N [<CV-qualifiers>] [<ref-qualifier>] <prefix> <unqualified-name> E`
    fn parse_nested_name(&mut self, mut state: Option<&mut NameState>) -> Option<Node> {
        self.expect(b'N')?;

        let cv = self.parse_cv_qualifiers();
        let ref_qual = if self.consume(b'O') {
            RefQualifier::RValue
        } else if self.consume(b'R') {
            RefQualifier::LValue
        } else {
            RefQualifier::None
        };
        if let Some(state) = state.as_deref_mut() {
            state.cv = cv;
            state.ref_qual = ref_qual;
        }

        let mut so_far: Option<Node> = None;
        if self.consume_str(b"St") {
            so_far = Some(Node::Name("std".to_owned()));
        }

        fn push(so_far: &mut Option<Node>, component: Node) {
            *so_far = Some(match so_far.take() {
                Some(qual) => Node::Nested {
                    qual: Box::new(qual),
                    name: Box::new(component),
                },
                None => component,
            });
        }

        while !self.consume(b'E') {
            self.consume(b'L');

            // <data-member-prefix> ::= <member source-name> [<template-args>] M
            if self.consume(b'M') {
                so_far.as_ref()?;
                continue;
            }

            let c0 = self.peek()?;
            let c1 = self.peek_at(1);

            if c0 == b'I' {
                let prefix = so_far.take()?;
                let args = self.parse_template_args()?;
                if let Some(state) = state.as_deref_mut() {
                    state.ends_with_template_args = true;
                }
                let node = Node::WithTemplateArgs {
                    name: Box::new(prefix),
                    args,
                };
                self.subs.push(node.clone());
                so_far = Some(node);
                continue;
            }

            let component = if c0 == b'T' {
                self.parse_template_param()?
            } else if c0 == b'D' && matches!(c1, Some(b't' | b'T')) {
                self.parse_decltype()?
            } else if c0 == b'S' && c1 != Some(b't') {
                let sub = self.parse_substitution()?;
                let first = so_far.is_none();
                push(&mut so_far, sub);
                if !first {
                    self.subs.push(so_far.clone()?);
                }
                continue;
            } else if c0 == b'C' || (c0 == b'D' && c1 != Some(b'C')) {
                let scope = so_far.clone()?;
                let ctor = self.parse_ctor_dtor_name(scope, state.as_deref_mut())?;
                self.parse_abi_tags(ctor)?
            } else {
                self.parse_unqualified_name(state.as_deref_mut(), so_far.as_ref())?
            };

            push(&mut so_far, component);
            if let Some(state) = state.as_deref_mut() {
                state.ends_with_template_args = false;
            }
            self.subs.push(so_far.clone()?);
        }

        // The complete name isn't a prefix: it is only a candidate if it is
        // later used as a type, which `parse_type` takes care of.
        let result = so_far?;
        self.subs.pop()?;
        Some(result)
    }

    /// `<local-name> ::= Z <encoding> E <entity name> [<discriminator>]`
    fn parse_local_name(&mut self, state: Option<&mut NameState>) -> Option<Node> {
        self.expect(b'Z')?;
        let encoding = Box::new(self.parse_encoding()?);
        self.expect(b'E')?;

        if self.consume(b's') {
            self.parse_discriminator();
            return Some(Node::Local {
                encoding,
                entity: Box::new(Node::Name("string literal".to_owned())),
            });
        }

        if self.consume(b'd') {
            self.parse_number();
            self.expect(b'_')?;
        }

        let entity = Box::new(self.parse_name(state)?);
        self.parse_discriminator();
        Some(Node::Local { encoding, entity })
    }

    /// `<discriminator> ::= _ <digit> | __ <number> _`
    fn parse_discriminator(&mut self) {
        if self.peek() != Some(b'_') {
            return;
        }
        if self.peek_at(1) == Some(b'_') {
            let start = self.pos;
            self.pos += 2;
            if self.parse_number().is_none() || !self.consume(b'_') {
                self.pos = start;
            }
        } else if self.peek_at(1).is_some_and(|x| x.is_ascii_digit()) {
            self.pos += 2;
        }
    }

    /// `<unqualified-name>` followed by optional ABI tags.
    fn parse_unqualified_name(
        &mut self,
        state: Option<&mut NameState>,
        scope: Option<&Node>,
    ) -> Option<Node> {
        if self.peek() == Some(b'L') && self.peek_at(1).is_some_and(|x| x.is_ascii_digit()) {
            self.pos += 1;
        }

        let c0 = self.peek()?;
        let c1 = self.peek_at(1);

        let name = if c0.is_ascii_digit() {
            self.parse_source_name()?
        } else if c0 == b'U' {
            self.parse_unnamed_type_name()?
        } else if c0 == b'D' && c1 == Some(b'C') {
            self.pos += 2;
            let mut items = Vec::new();
            while !self.consume(b'E') {
                items.push(self.parse_source_name()?);
            }
            Node::StructuredBinding(items)
        } else if c0 == b'C' || c0 == b'D' {
            self.parse_ctor_dtor_name(scope?.clone(), state)?
        } else {
            self.parse_operator_name(state)?
        };

        self.parse_abi_tags(name)
    }

    /// `<abi-tags> ::= B <source-name> [<abi-tags>]`
    fn parse_abi_tags(&mut self, mut node: Node) -> Option<Node> {
        while self.consume(b'B') {
            let Node::Name(tag) = self.parse_source_name()? else {
                return None;
            };
            node = Node::AbiTag {
                base: Box::new(node),
                tag,
            };
        }
        Some(node)
    }

    /// `<source-name> ::= <positive length number> <identifier>`
    fn parse_source_name(&mut self) -> Option<Node> {
        let len = self.parse_positive()?;
        let end = self.pos.checked_add(len)?;
        let raw = self.input.get(self.pos..end)?;
        self.pos = end;

        if raw.starts_with(b"_GLOBAL__N") {
            return Some(Node::Name("(anonymous namespace)".to_owned()));
        }

        Some(Node::Name(String::from_utf8_lossy(raw).into_owned()))
    }

    /// `Ut [<number>] _` and `Ul <lambda-sig> E [<number>] _`
    fn parse_unnamed_type_name(&mut self) -> Option<Node> {
        if self.consume_str(b"Ut") {
            let index = self.parse_optional_index()?;
            self.expect(b'_')?;
            return Some(Node::UnnamedType(index));
        }

        if self.consume_str(b"Ul") {
            let mut params = Vec::new();
            if !self.consume(b'v') {
                while self.peek() != Some(b'E') {
                    params.push(self.parse_type()?);
                }
            }
            self.expect(b'E')?;
            let index = self.parse_optional_index()?;
            self.expect(b'_')?;
            return Some(Node::Closure { params, index });
        }

        None
    }

    /// Optional `<number>` followed by `_`, returning `number + 1` or 0.
    fn parse_optional_index(&mut self) -> Option<u64> {
        match self.parse_positive() {
            Some(n) => u64::try_from(n).ok()?.checked_add(1),
            None => Some(0),
        }
    }

    /// `<ctor-dtor-name>`
    fn parse_ctor_dtor_name(&mut self, scope: Node, state: Option<&mut NameState>) -> Option<Node> {
        let dtor = if self.consume(b'C') {
            let inheriting = self.consume(b'I');
            if !matches!(self.peek()?, b'1'..=b'5') {
                return None;
            }
            self.pos += 1;
            if inheriting {
                self.parse_type()?;
            }
            false
        } else {
            self.expect(b'D')?;
            if !matches!(self.peek()?, b'0' | b'1' | b'2' | b'4' | b'5') {
                return None;
            }
            self.pos += 1;
            true
        };

        if let Some(state) = state {
            state.ctor_dtor_conversion = true;
        }

        Some(Node::CtorDtor {
            base: Box::new(scope),
            dtor,
        })
    }

    /// `<operator-name>`
    fn parse_operator_name(&mut self, state: Option<&mut NameState>) -> Option<Node> {
        let c0 = self.peek()?;
        let c1 = self.peek_at(1)?;

        match [c0, c1] {
            [b'c', b'v'] => {
                self.pos += 2;
                let saved = mem::replace(&mut self.try_template_args, false);
                let target = self.parse_type();
                self.try_template_args = saved;
                if let Some(state) = state {
                    state.ctor_dtor_conversion = true;
                }
                Some(Node::ConversionOperator(Box::new(target?)))
            }
            [b'l', b'i'] => {
                self.pos += 2;
                let Node::Name(suffix) = self.parse_source_name()? else {
                    return None;
                };
                Some(Node::Name(format!("operator\"\" {suffix}")))
            }
            [b'v', b'0'..=b'9'] => {
                self.pos += 2;
                let Node::Name(vendor) = self.parse_source_name()? else {
                    return None;
                };
                Some(Node::Name(format!("operator {vendor}")))
            }
            code => {
                let (spelling, _) = lookup_operator(code)?;
                self.pos += 2;
                let sep = if spelling.as_bytes()[0].is_ascii_alphabetic() {
                    " "
                } else {
                    ""
                };
                Some(Node::Name(format!("operator{sep}{spelling}")))
            }
        }
    }

    /// `<CV-qualifiers> ::= [r] [V] [K]`
    fn parse_cv_qualifiers(&mut self) -> Qualifiers {
        let mut quals = Qualifiers::NONE;
        if self.consume(b'r') {
            quals |= Qualifiers::RESTRICT;
        }
        if self.consume(b'V') {
            quals |= Qualifiers::VOLATILE;
        }
        if self.consume(b'K') {
            quals |= Qualifiers::CONST;
        }
        quals
    }

    /// `<substitution>`
    fn parse_substitution(&mut self) -> Option<Node> {
        self.expect(b'S')?;

        let std_sub = match self.peek()? {
            b'a' => Some(StdSub::Allocator),
            b'b' => Some(StdSub::BasicString),
            b's' => Some(StdSub::String),
            b'i' => Some(StdSub::Istream),
            b'o' => Some(StdSub::Ostream),
            b'd' => Some(StdSub::Iostream),
            _ => None,
        };
        if let Some(sub) = std_sub {
            self.pos += 1;
            return Some(Node::StdSubstitution(sub));
        }

        let index = if self.consume(b'_') {
            0
        } else {
            let seq = self.parse_seq_id()?;
            self.expect(b'_')?;
            seq.checked_add(1)?
        };

        Self::materialize(self.subs.get(index)?, &mut self.budget)
    }

    /// `<template-param> ::= T_ | T <number> _`
    fn parse_template_param(&mut self) -> Option<Node> {
        self.expect(b'T')?;
        let index = if self.consume(b'_') {
            0
        } else {
            let n = self.parse_positive()?;
            self.expect(b'_')?;
            n.checked_add(1)?
        };

        match self.template_params.get(index) {
            Some(param) => Self::materialize(param, &mut self.budget),
            // Forward reference, e.g. from a conversion operator.
            None => Some(Node::TemplateParam(index)),
        }
    }

    /// `<template-args> ::= I <template-arg>+ E`
    fn parse_template_args(&mut self) -> Option<Vec<Node>> {
        self.expect(b'I')?;

        let tagging = mem::replace(&mut self.tag_templates, false);
        let mut args = Vec::new();
        while !self.consume(b'E') {
            args.push(self.parse_template_arg()?);
        }
        self.tag_templates = tagging;

        if tagging {
            self.template_params = args.clone();
        }

        Some(args)
    }

    /// `<template-arg>`
    fn parse_template_arg(&mut self) -> Option<Node> {
        match self.peek()? {
            b'X' => {
                self.pos += 1;
                let expr = self.parse_expression()?;
                self.expect(b'E')?;
                Some(expr)
            }
            b'J' => {
                self.pos += 1;
                let mut items = Vec::new();
                while !self.consume(b'E') {
                    items.push(self.parse_template_arg()?);
                }
                Some(Node::Pack(items))
            }
            b'L' => self.parse_expr_primary(),
            _ => self.parse_type(),
        }
    }

    /// `<type>`
    fn parse_type(&mut self) -> Option<Node> {
        self.enter()?;
        let saved = mem::replace(&mut self.tag_templates, false);
        let result = self.parse_type_inner();
        self.tag_templates = saved;
        self.leave();
        result
    }

    fn parse_type_inner(&mut self) -> Option<Node> {
        let c0 = self.peek()?;
        let c1 = self.peek_at(1);

        if let Some(builtin) = self.parse_builtin_type() {
            return Some(builtin);
        }

        let result = match c0 {
            b'r' | b'V' | b'K' => {
                let quals = self.parse_cv_qualifiers();
                let child = self.parse_type()?;
                Node::Qualified {
                    child: Box::new(child),
                    quals,
                }
            }
            b'U' => {
                self.pos += 1;
                let Node::Name(vendor) = self.parse_source_name()? else {
                    return None;
                };
                if self.peek() == Some(b'I') {
                    self.parse_template_args()?;
                }
                let child = self.parse_type()?;
                Node::VendorQualified {
                    child: Box::new(child),
                    vendor,
                }
            }
            b'F' => self.parse_function_type()?,
            b'D' if matches!(c1, Some(b'x' | b'o' | b'O' | b'w')) => self.parse_function_type()?,
            b'A' => self.parse_array_type()?,
            b'M' => {
                self.pos += 1;
                let class = self.parse_type()?;
                let member = self.parse_type()?;
                Node::PointerToMember {
                    class: Box::new(class),
                    member: Box::new(member),
                }
            }
            b'T' if matches!(c1, Some(b's' | b'u' | b'e')) => {
                self.pos += 2;
                self.parse_name(None)?
            }
            b'T' => {
                let param = self.parse_template_param()?;
                if self.try_template_args && self.peek() == Some(b'I') {
                    self.subs.push(param.clone());
                    let args = self.parse_template_args()?;
                    Node::WithTemplateArgs {
                        name: Box::new(param),
                        args,
                    }
                } else {
                    param
                }
            }
            b'P' => {
                self.pos += 1;
                Node::Pointer(Box::new(self.parse_type()?))
            }
            b'R' | b'O' => {
                self.pos += 1;
                Node::Reference {
                    child: Box::new(self.parse_type()?),
                    rvalue: c0 == b'O',
                }
            }
            b'C' | b'G' => {
                self.pos += 1;
                let vendor = if c0 == b'C' { "_Complex" } else { "_Imaginary" };
                Node::VendorQualified {
                    child: Box::new(self.parse_type()?),
                    vendor: vendor.to_owned(),
                }
            }
            b'S' if c1 == Some(b't') => self.parse_name(None)?,
            b'S' => {
                let sub = self.parse_substitution()?;
                if !(self.try_template_args && self.peek() == Some(b'I')) {
                    // Plain substitutions are not new candidates.
                    return Some(sub);
                }
                let args = self.parse_template_args()?;
                Node::WithTemplateArgs {
                    name: Box::new(sub),
                    args,
                }
            }
            b'D' => match c1? {
                b't' | b'T' => self.parse_decltype()?,
                b'p' => {
                    self.pos += 2;
                    Node::PackExpansion(Box::new(self.parse_type()?))
                }
                b'v' => {
                    self.pos += 2;
                    let dimension = if self.peek().is_some_and(|x| x.is_ascii_digit()) {
                        self.parse_number()
                    } else {
                        self.expect(b'_')?;
                        self.parse_expression()?;
                        None
                    };
                    self.expect(b'_')?;
                    Node::Vector {
                        dimension,
                        element: Box::new(self.parse_type()?),
                    }
                }
                _ => return None,
            },
            b'0'..=b'9' | b'N' | b'Z' => self.parse_name(None)?,
            _ => return None,
        };

        self.subs.push(result.clone());
        Some(result)
    }

    /// `<builtin-type>`: never substitution candidates.
    fn parse_builtin_type(&mut self) -> Option<Node> {
        let c0 = self.peek()?;
        let simple = match c0 {
            b'v' => "void",
            b'w' => "wchar_t",
            b'b' => "bool",
            b'c' => "char",
            b'a' => "signed char",
            b'h' => "unsigned char",
            b's' => "short",
            b't' => "unsigned short",
            b'i' => "int",
            b'j' => "unsigned int",
            b'l' => "long",
            b'm' => "unsigned long",
            b'x' => "long long",
            b'y' => "unsigned long long",
            b'n' => "__int128",
            b'o' => "unsigned __int128",
            b'f' => "float",
            b'd' => "double",
            b'e' => "long double",
            b'g' => "__float128",
            b'z' => "...",
            b'u' => {
                self.pos += 1;
                return self.parse_source_name();
            }
            b'D' => return self.parse_builtin_d_type(),
            _ => return None,
        };
        self.pos += 1;
        Some(Node::Name(simple.to_owned()))
    }

    fn parse_builtin_d_type(&mut self) -> Option<Node> {
        let spelling = match self.peek_at(1)? {
            b'd' => "decimal64",
            b'e' => "decimal128",
            b'f' => "decimal32",
            b'h' => "half",
            b'i' => "char32_t",
            b's' => "char16_t",
            b'u' => "char8_t",
            b'a' => "auto",
            b'c' => "decltype(auto)",
            b'n' => "std::nullptr_t",
            b'F' | b'B' | b'U' => {
                let kind = self.peek_at(1)?;
                let start = self.pos;
                self.pos += 2;
                let Some(bits) = self.parse_positive() else {
                    self.pos = start;
                    return None;
                };
                if !self.consume(b'_') {
                    self.pos = start;
                    return None;
                }
                return Some(Node::Name(match kind {
                    b'F' => format!("_Float{bits}"),
                    b'B' => format!("_BitInt({bits})"),
                    _ => format!("unsigned _BitInt({bits})"),
                }));
            }
            _ => return None,
        };
        self.pos += 2;
        Some(Node::Name(spelling.to_owned()))
    }

    /// `<function-type> ::= [<exception-spec>] [Dx] F [Y] <bare-function-type> [<ref-qualifier>] E`
    fn parse_function_type(&mut self) -> Option<Node> {
        if self.consume_str(b"Do") {
            // noexcept
        } else if self.consume_str(b"DO") {
            self.parse_expression()?;
            self.expect(b'E')?;
        } else if self.consume_str(b"Dw") {
            while !self.consume(b'E') {
                self.parse_type()?;
            }
        }
        self.consume_str(b"Dx");
        self.expect(b'F')?;
        self.consume(b'Y');

        let ret = self.parse_type()?;

        let mut params = Vec::new();
        let mut ref_qual = RefQualifier::None;
        loop {
            if self.consume(b'E') {
                break;
            }
            if self.consume(b'v') {
                continue;
            }
            if self.consume_str(b"RE") {
                ref_qual = RefQualifier::LValue;
                break;
            }
            if self.consume_str(b"OE") {
                ref_qual = RefQualifier::RValue;
                break;
            }
            params.push(self.parse_type()?);
        }

        Some(Node::FunctionType(FunctionSig {
            ret: Box::new(ret),
            params,
            cv: Qualifiers::NONE,
            ref_qual,
        }))
    }

    /// `<array-type> ::= A <number> _ <type> | A [<expression>] _ <type>`
    fn parse_array_type(&mut self) -> Option<Node> {
        self.expect(b'A')?;
        let dimension = if self.peek()?.is_ascii_digit() {
            let dim = self.parse_number()?;
            self.expect(b'_')?;
            Some(dim)
        } else if self.consume(b'_') {
            None
        } else {
            self.parse_expression()?;
            self.expect(b'_')?;
            None
        };

        Some(Node::Array {
            dimension,
            element: Box::new(self.parse_type()?),
        })
    }

    /// `<decltype> ::= Dt <expression> E | DT <expression> E`
    fn parse_decltype(&mut self) -> Option<Node> {
        self.expect(b'D')?;
        if !self.consume(b't') && !self.consume(b'T') {
            return None;
        }
        let expr = self.parse_expression()?;
        self.expect(b'E')?;
        Some(Node::Decltype(Box::new(expr)))
    }

    /// `<expr-primary>`
    fn parse_expr_primary(&mut self) -> Option<Node> {
        self.expect(b'L')?;

        if self.consume_str(b"_Z") || self.consume(b'Z') {
            let entity = self.parse_encoding()?;
            self.expect(b'E')?;
            return Some(Node::Literal {
                ty: Box::new(entity),
                value: String::new(),
            });
        }

        let ty = self.parse_type()?;
        let start = self.pos;
        while self.peek()? != b'E' {
            self.pos += 1;
        }
        let value = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        self.pos += 1;

        Some(Node::Literal {
            ty: Box::new(ty),
            value,
        })
    }

    /// `<expression>`, kept opaque.
    fn parse_expression(&mut self) -> Option<Node> {
        self.enter()?;
        let result = self.parse_expression_inner();
        self.leave();
        result
    }

    fn parse_expression_inner(&mut self) -> Option<Node> {
        self.consume_str(b"gs");

        let c0 = self.peek()?;
        let c1 = self.peek_at(1);
        let c2 = self.peek_at(2);
        let expr = |s: &str| Some(Node::Expr(s.to_owned()));

        match (c0, c1) {
            (b'L', _) => return self.parse_expr_primary(),
            (b'T', _) => return self.parse_template_param(),
            (b'f', Some(b'p')) => return self.parse_function_param(),
            (b'f', Some(b'L')) if c2.is_some_and(|x| x.is_ascii_digit()) => {
                return self.parse_function_param();
            }
            (b'f', Some(b'l' | b'r' | b'L' | b'R')) => {
                self.pos += 2;
                let code = [self.peek()?, self.peek_at(1)?];
                lookup_operator(code)?;
                self.pos += 2;
                self.parse_expression()?;
                if matches!(c1, Some(b'L' | b'R')) {
                    self.parse_expression()?;
                }
                return expr("fold");
            }
            (b's', Some(b'r')) | (b'o', Some(b'n')) | (b'd', Some(b'n')) | (b'0'..=b'9', _) => {
                return self.parse_unresolved_name();
            }
            _ => {}
        }

        let code = [c0, c1?];
        self.pos += 2;

        match &code {
            b"dt" | b"pt" => {
                self.parse_expression()?;
                self.parse_unresolved_name()?;
                expr("member")
            }
            b"ds" => {
                self.parse_expression()?;
                self.parse_expression()?;
                expr(".*")
            }
            b"cl" => {
                self.parse_expression()?;
                while !self.consume(b'E') {
                    self.parse_expression()?;
                }
                expr("call")
            }
            b"cv" => {
                self.parse_type()?;
                if self.consume(b'_') {
                    while !self.consume(b'E') {
                        self.parse_expression()?;
                    }
                } else {
                    self.parse_expression()?;
                }
                expr("cast")
            }
            b"tl" => {
                self.parse_type()?;
                while !self.consume(b'E') {
                    self.parse_braced_expression()?;
                }
                expr("init")
            }
            b"il" => {
                while !self.consume(b'E') {
                    self.parse_braced_expression()?;
                }
                expr("init")
            }
            b"nw" | b"na" => {
                while !self.consume(b'_') {
                    self.parse_expression()?;
                }
                self.parse_type()?;
                if self.consume_str(b"pi") {
                    while !self.consume(b'E') {
                        self.parse_expression()?;
                    }
                } else if self.consume_str(b"il") {
                    while !self.consume(b'E') {
                        self.parse_braced_expression()?;
                    }
                } else {
                    self.expect(b'E')?;
                }
                expr("new")
            }
            b"dc" | b"sc" | b"cc" | b"rc" => {
                self.parse_type()?;
                self.parse_expression()?;
                expr("cast")
            }
            b"ti" | b"st" | b"at" => {
                self.parse_type()?;
                expr("type")
            }
            b"te" | b"sz" | b"az" | b"nx" | b"sp" | b"tw" => {
                self.parse_expression()?;
                expr("unary")
            }
            b"tr" => expr("throw"),
            b"sZ" => {
                if self.peek()? == b'T' {
                    self.parse_template_param()?;
                } else {
                    self.parse_function_param()?;
                }
                expr("sizeof...")
            }
            b"sP" => {
                while !self.consume(b'E') {
                    self.parse_template_arg()?;
                }
                expr("sizeof...")
            }
            b"pp" | b"mm" if self.peek() == Some(b'_') => {
                self.pos += 1;
                self.parse_expression()?;
                expr("unary")
            }
            _ => {
                if code[0] == b'u' {
                    // Vendor extended expression.
                    self.pos -= 1;
                    self.parse_source_name()?;
                    while !self.consume(b'E') {
                        self.parse_template_arg()?;
                    }
                    return expr("vendor");
                }

                let (spelling, arity) = lookup_operator(code)?;
                for _ in 0..arity {
                    self.parse_expression()?;
                }
                (arity > 0).then(|| Node::Expr(spelling.to_owned()))
            }
        }
    }

    /// `<braced-expression>`
    fn parse_braced_expression(&mut self) -> Option<()> {
        if self.consume_str(b"di") {
            self.parse_unqualified_name(None, None)?;
            return self.parse_braced_expression();
        }
        if self.consume_str(b"dx") {
            self.parse_expression()?;
            return self.parse_braced_expression();
        }
        if self.consume_str(b"dX") {
            self.parse_expression()?;
            self.parse_expression()?;
            return self.parse_braced_expression();
        }
        self.parse_expression().map(|_| ())
    }

    /// `<function-param> ::= fp <CV> [<number>] _ | fL <number> p <CV> [<number>] _`
    fn parse_function_param(&mut self) -> Option<Node> {
        if self.consume_str(b"fp") {
            self.parse_cv_qualifiers();
            self.parse_positive();
            self.expect(b'_')?;
        } else {
            self.consume_str(b"fL").then_some(())?;
            self.parse_positive()?;
            self.expect(b'p')?;
            self.parse_cv_qualifiers();
            self.parse_positive();
            self.expect(b'_')?;
        }
        Some(Node::Expr("fp".to_owned()))
    }

    /// `<unresolved-name>`
    fn parse_unresolved_name(&mut self) -> Option<Node> {
        if self.consume_str(b"srN") {
            self.parse_unresolved_type()?;
            if self.peek() == Some(b'I') {
                self.parse_template_args()?;
            }
            while !self.consume(b'E') {
                self.parse_simple_id()?;
            }
        } else if self.consume_str(b"sr") {
            if self.peek()?.is_ascii_digit() {
                while !self.consume(b'E') {
                    self.parse_simple_id()?;
                }
            } else {
                self.parse_unresolved_type()?;
                if self.peek() == Some(b'I') {
                    self.parse_template_args()?;
                }
            }
        }

        self.parse_base_unresolved_name()?;
        Some(Node::Expr("name".to_owned()))
    }

    /// `<unresolved-type> ::= <template-param> | <decltype> | <substitution>`
    fn parse_unresolved_type(&mut self) -> Option<Node> {
        match self.peek()? {
            b'T' => {
                let param = self.parse_template_param()?;
                self.subs.push(param.clone());
                Some(param)
            }
            b'D' => {
                let decltype = self.parse_decltype()?;
                self.subs.push(decltype.clone());
                Some(decltype)
            }
            b'S' => self.parse_substitution(),
            _ => None,
        }
    }

    /// `<simple-id> ::= <source-name> [<template-args>]`
    fn parse_simple_id(&mut self) -> Option<()> {
        self.parse_source_name()?;
        if self.peek() == Some(b'I') {
            self.parse_template_args()?;
        }
        Some(())
    }

    /// `<base-unresolved-name>`
    fn parse_base_unresolved_name(&mut self) -> Option<()> {
        if self.peek()?.is_ascii_digit() {
            return self.parse_simple_id();
        }

        if self.consume_str(b"dn") {
            if self.peek()?.is_ascii_digit() {
                return self.parse_simple_id();
            }
            return self.parse_unresolved_type().map(|_| ());
        }

        self.consume_str(b"on");
        self.parse_operator_name(None)?;
        if self.peek() == Some(b'I') {
            self.parse_template_args()?;
        }
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Node {
        Node::Name(s.to_owned())
    }

    fn nested(qual: Node, child: Node) -> Node {
        Node::Nested {
            qual: Box::new(qual),
            name: Box::new(child),
        }
    }

    #[test]
    fn rejects_garbage() {
        let inputs: [&[u8]; 8] = [
            b"",
            b"_Z",
            b"main",
            b"_Z3fo",
            b"_ZN3fooE3",
            b"?foo@@YAXXZ",
            b"____Z3foov",
            b"_ZS_",
        ];
        for input in inputs {
            assert_eq!(parse(input), None, "{}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn plain_function() {
        let Some(Node::Function(func)) = parse(b"_Z3fooif") else {
            panic!("expected function");
        };
        assert_eq!(*func.name, name("foo"));
        assert_eq!(func.params, vec![name("int"), name("float")]);
        assert_eq!(func.ret, None);

        let Some(Node::Function(func)) = parse(b"_Z3barv") else {
            panic!("expected function");
        };
        assert!(func.params.is_empty());
    }

    #[test]
    fn data_and_nested() {
        assert_eq!(parse(b"_Z7counter"), Some(name("counter")));
        assert_eq!(
            parse(b"_ZN2ns3FooE"),
            Some(nested(name("ns"), name("Foo")))
        );
        assert_eq!(
            parse(b"__ZN2ns3FooE"),
            Some(nested(name("ns"), name("Foo")))
        );
    }

    #[test]
    fn substitutions() {
        // ns::Foo::bar(ns::Foo*, ns::Foo const&)
        let Some(Node::Function(func)) = parse(b"_ZN2ns3Foo3barEPS0_RKS0_") else {
            panic!("expected function");
        };
        let foo = nested(name("ns"), name("Foo"));
        assert_eq!(*func.name, nested(foo.clone(), name("bar")));
        assert_eq!(func.params[0], Node::Pointer(Box::new(foo.clone())));
        assert_eq!(
            func.params[1],
            Node::Reference {
                child: Box::new(Node::Qualified {
                    child: Box::new(foo),
                    quals: Qualifiers::CONST,
                }),
                rvalue: false,
            }
        );
    }

    #[test]
    fn template_function() {
        // int max<int>(int, int)
        let Some(Node::Function(func)) = parse(b"_Z3maxIiET_S0_S0_") else {
            panic!("expected function");
        };
        assert_eq!(func.ret.as_deref(), Some(&name("int")));
        assert_eq!(func.params, vec![name("int"), name("int")]);
    }

    #[test]
    fn ctor_and_qualifiers() {
        let Some(Node::Function(func)) = parse(b"_ZN3FooC2Ev") else {
            panic!("expected function");
        };
        assert!(matches!(
            &*func.name,
            Node::Nested { name, .. } if matches!(**name, Node::CtorDtor { dtor: false, .. })
        ));

        let Some(Node::Function(func)) = parse(b"_ZNKR3Foo3getEv") else {
            panic!("expected function");
        };
        assert_eq!(func.cv, Qualifiers::CONST);
        assert_eq!(func.ref_qual, RefQualifier::LValue);
    }

    #[test]
    fn special_names() {
        assert!(matches!(
            parse(b"_ZTV3Foo"),
            Some(Node::Special { kind: SpecialKind::VirtualTable, .. })
        ));
        assert!(matches!(
            parse(b"_ZTI3Foo"),
            Some(Node::Special { kind: SpecialKind::TypeInfo, .. })
        ));
        assert!(matches!(
            parse(b"_ZThn8_N3Foo3barEv"),
            Some(Node::Special { kind: SpecialKind::NonVirtualThunk, .. })
        ));
        assert!(matches!(
            parse(b"_ZTC3Bar0_3Foo"),
            Some(Node::CtorVtable { .. })
        ));
    }

    #[test]
    fn local_names_and_suffixes() {
        assert!(matches!(
            parse(b"_ZZ4mainE5count"),
            Some(Node::Local { .. })
        ));
        assert!(matches!(
            parse(b"_ZZ4mainE5count_0"),
            Some(Node::Local { .. })
        ));
        assert!(matches!(
            parse(b"_Z3foov.cold"),
            Some(Node::Clone { suffix, .. }) if suffix == ".cold"
        ));
    }

    #[test]
    fn template_args_with_literals_and_packs() {
        // foo<5, true>()
        assert!(parse(b"_Z3fooILi5ELb1EEvv").is_some());
        // void f<int, long>(int, long) via pack expansion
        let Some(Node::Function(func)) = parse(b"_Z1fIJilEEvDpT_") else {
            panic!("expected function");
        };
        assert_eq!(
            func.params,
            vec![Node::PackExpansion(Box::new(Node::Pack(vec![
                name("int"),
                name("long")
            ])))]
        );
        // decltype in return type
        assert!(parse(b"_Z1gIiEDTplfp_fp_ET_S1_").is_some());
    }

    #[test]
    fn unnamed_type_indices() {
        let cases: [(&[u8], Option<u64>); 4] = [
            (b"_ZN3FooUt_E", Some(0)),
            (b"_ZN3FooUt0_E", Some(1)),
            (b"_ZN3FooUt18446744073709551614_E", Some(u64::MAX)),
            (b"_ZN3FooUt18446744073709551615_E", None),
        ];
        for (input, expected) in cases {
            let index = parse(input).and_then(|node| match node {
                Node::Nested { name, .. } => match *name {
                    Node::UnnamedType(index) => Some(index),
                    _ => None,
                },
                _ => None,
            });
            assert_eq!(index, expected, "{}", String::from_utf8_lossy(input));
        }

        assert!(parse(b"_ZZ4mainENKUlvE_clEv").is_some());
        assert!(parse(b"_ZZ4mainENKUlvE18446744073709551614_clEv").is_some());
        assert_eq!(parse(b"_ZZ4mainENKUlvE18446744073709551615_clEv"), None);
        assert_eq!(parse(b"_ZZ4mainENKUlvE99999999999999999999_clEv"), None);
    }

    /// Builds `f(A*...*, ...)` where every parameter adds `pointers` levels
    /// on top of a reference to the deepest type of the previous one.
    fn pointer_chain(params: usize, pointers: usize) -> Vec<u8> {
        fn seq_id(mut n: usize) -> String {
            const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
            let mut out = Vec::new();
            loop {
                out.push(DIGITS[n % 36]);
                n /= 36;
                if n == 0 {
                    break;
                }
            }
            out.reverse();
            String::from_utf8(out).unwrap()
        }

        let mut mangled = b"_Z1f".to_vec();
        mangled.extend(std::iter::repeat(b'P').take(pointers));
        mangled.extend_from_slice(b"1A");
        let mut subs = 1 + pointers;
        for _ in 1..params {
            mangled.extend(std::iter::repeat(b'P').take(pointers));
            // Index `subs - 1` is spelled `S<seq-id>_` with seq-id `subs - 2`.
            mangled.extend_from_slice(format!("S{}_", seq_id(subs - 2)).as_bytes());
            subs += pointers;
        }
        mangled
    }

    #[test]
    fn tree_depth_is_bounded() {
        let Some(Node::Function(func)) = parse(&pointer_chain(2, 50)) else {
            panic!("expected function");
        };
        assert_eq!(func.params.len(), 2);
        assert!(func.params[1].depth_within(101));
        assert!(!func.params[1].depth_within(100));

        for params in [2, 5, 20, 25] {
            let mangled = pointer_chain(params, 200);
            assert_eq!(parse(&mangled), None, "{params} parameters");
        }

        let direct: Vec<u8> = [&b"_Z1f"[..], &[b'P'; 300][..], &b"1A"[..]].concat();
        assert_eq!(parse(&direct), None);
    }

    #[test]
    fn exponential_references_are_bounded() {
        let mut mangled = b"_Z1fP1A".to_vec();
        // Each level is a function type taking the previous one twice.
        for i in 0..40 {
            let prev = if i == 0 {
                "S0_".to_owned()
            } else {
                format!("S{}_", i)
            };
            mangled.extend_from_slice(format!("PFv{prev}{prev}E").as_bytes());
        }
        // Must terminate quickly either way.
        let _ = parse(&mangled);
    }
}
