// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Grouping prefix of canonical keys.

/// Computes the grouping prefix of a canonical key.
///
/// The prefix is the qualified name with template argument lists replaced
/// by a single space, cut off at the first `(` outside of a template list.
/// Operator spellings directly following `operator` are copied verbatim
/// (including `()`), arrows (`->` and `<-`) are dropped and any other `-`
/// is elided. A `>` without matching `<` is replaced by a space.
///
/// ```
/// # use symdb::search::symprefix;
/// assert_eq!(symprefix("std::vector<int>::push_back(int)"), "std::vector ::push_back");
/// ```
pub fn symprefix(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut depth = 0usize;
    let mut pos = 0;

    while let Some(ch) = key[pos..].chars().next() {
        let rest = &key[pos..];

        if depth == 0 && ends_with_operator_keyword(&out) {
            if let Some(len) = operator_spelling_len(rest) {
                out.push_str(&rest[..len]);
                pos += len;
                continue;
            }
        }

        if rest.starts_with("->") || rest.starts_with("<-") {
            pos += 2;
            continue;
        }

        pos += ch.len_utf8();
        match (ch, depth) {
            ('-', _) => {}
            ('<', 0) => {
                out.push(' ');
                depth = 1;
            }
            ('>', 0) => out.push(' '),
            ('(', 0) => break,
            (_, 0) => out.push(ch),
            ('<', _) => depth += 1,
            ('>', _) => depth -= 1,
            _ => {}
        }
    }

    out
}

fn ends_with_operator_keyword(out: &str) -> bool {
    let Some(head) = out.strip_suffix("operator") else {
        return false;
    };
    !head
        .bytes()
        .last()
        .is_some_and(|x| x.is_ascii_alphanumeric() || x == b'_' || x == b'$')
}

/// Length of the operator spelling at the start of `rest`, if any.
fn operator_spelling_len(rest: &str) -> Option<usize> {
    if rest.starts_with("()") {
        return Some(2);
    }
    let first = rest.bytes().next()?;
    if !first.is_ascii_punctuation() || matches!(first, b'(' | b':' | b'_' | b'$') {
        return None;
    }
    rest.find(['(', ' ']).or(Some(rest.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes() {
        let cases = [
            ("", ""),
            ("std::vector<int>::push_back(int)", "std::vector ::push_back"),
            ("foo() -> void", "foo"),
            ("ns::foo(int, long) -> unknown", "ns::foo"),
            ("a<b<c>, d>::e(x)", "a ::e"),
            ("f<(int) -> void>::g()", "f ::g"),
            ("Foo::operator<<(& const Foo) -> unknown", "Foo::operator<<"),
            ("Foo::operator()(int) -> void", "Foo::operator()"),
            ("Foo::operator->() -> unknown", "Foo::operator->"),
            ("Foo::operator<<<int>(int) -> void", "Foo::operator<<<int>"),
            ("myoperator<int>::x", "myoperator ::x"),
            ("g_counter -> int", "g_counter  int"),
            ("a>b", "a b"),
            ("x-y", "xy"),
            ("Foo::$vtable", "Foo::$vtable"),
            ("größe<int>", "größe "),
        ];

        for (key, expected) in cases {
            assert_eq!(symprefix(key), expected, "{key}");
        }
    }

    #[test]
    fn overloads_share_prefix() {
        let a = symprefix("std::vector<int>::push_back(& const int) -> unknown");
        let b = symprefix("std::vector<long>::push_back(&& long) -> unknown");
        assert_eq!(a, b);
    }
}
