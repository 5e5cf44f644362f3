// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Tokenizer for canonical keys.
//!
//! Every maximal run of name characters (ASCII letters, digits, `_`, `$`)
//! is emitted as a token, followed by its sub-tokens if it has more than
//! one. Sub-tokens start at every transition into an uppercase letter, at
//! every transition into a digit and after every underscore (the underscore
//! itself is dropped). Runs starting with `$` are placeholders such as
//! `$SKIP_NAME` and are never split.
//!
//! `::` is a token of its own, and `operator` directly followed by
//! punctuation is captured together with that punctuation up to the next
//! `(`, so `operator<<` and `operator()` are single tokens.

/// Token with its byte range in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Token text, equal to `&input[start..end]`.
    pub text: &'a str,
    /// Start offset in bytes.
    pub start: usize,
    /// End offset in bytes, exclusive.
    pub end: usize,
}

fn is_name_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'$'
}

/// Splits `input` into tokens, in order of their start offsets.
pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut emit = |start: usize, end: usize| {
        if start < end {
            tokens.push(Token {
                text: &input[start..end],
                start,
                end,
            });
        }
    };

    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i];

        if ch == b':' {
            if bytes.get(i + 1) == Some(&b':') {
                emit(i, i + 2);
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }

        if !is_name_char(ch) {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && is_name_char(bytes[i]) {
            i += 1;
        }
        let run = &bytes[start..i];

        if run == b"operator" {
            if let Some(end) = operator_end(bytes, i) {
                emit(start, end);
                i = end;
                continue;
            }
        }

        emit(start, i);

        let segments = segments(run);
        if segments.len() > 1 {
            for (seg_start, seg_end) in segments {
                emit(start + seg_start, start + seg_end);
            }
        }
    }

    tokens
}

/// Determines the end of an operator name whose spelling starts at `pos`.
fn operator_end(bytes: &[u8], pos: usize) -> Option<usize> {
    if bytes[pos..].starts_with(b"()") {
        return Some(pos + 2);
    }

    let first = *bytes.get(pos)?;
    if !first.is_ascii_punctuation() || matches!(first, b'(' | b':' | b'_' | b'$') {
        return None;
    }

    let len = bytes[pos..]
        .iter()
        .take_while(|&&x| x != b'(' && x != b' ')
        .count();
    Some(pos + len)
}

/// Returns the sub-token ranges of a name run, relative to the run.
fn segments(run: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    if run.first() == Some(&b'$') {
        return out;
    }

    let mut seg_start = 0;
    for (i, &ch) in run.iter().enumerate() {
        if ch == b'_' {
            if seg_start < i {
                out.push((seg_start, i));
            }
            seg_start = i + 1;
            continue;
        }

        let Some(&prev) = i.checked_sub(1).and_then(|x| run.get(x)) else {
            continue;
        };
        let upper = ch.is_ascii_uppercase() && !prev.is_ascii_uppercase();
        let digit = ch.is_ascii_digit() && !prev.is_ascii_digit();
        if (upper || digit) && seg_start < i {
            out.push((seg_start, i));
            seg_start = i;
        }
    }

    if seg_start < run.len() {
        out.push((seg_start, run.len()));
    }

    out
}
