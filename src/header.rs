//! Synthesizes a consumer-visible header from a main source file: an
//! `#include` preamble, the Includes list, and the source itself with
//! every skip-fragment rewritten out (spec §4.8).

use std::io::Write as _;
use std::path::Path;

use crate::error::BuildError;
use crate::manifest::{FragmentAction, SkippedFragment};

const BANNER_HEAD: &str = "// Generated by the Levitation header synthesizer. Do not edit.\n";
const BANNER_BODY: &str = "// Below follows the stripped source.\n";

/// Rewrite `source` into header body text, applying `fragments` in order.
///
/// `fragments` must be sorted ascending by `start` and non-overlapping;
/// this is an invariant of how [`crate::manifest::DeclAstMeta`] is
/// constructed upstream, not re-validated here.
pub fn rewrite_source(source: &str, fragments: &[SkippedFragment]) -> String {
    let bytes = source.as_bytes();
    let mut out = String::new();
    let mut prev_end: usize = 0;

    for frag in fragments {
        let start = frag.start as usize;
        let end = frag.end as usize;

        let kept_slice = &bytes[prev_end..start];
        let (kept_trimmed, kept_ends_newline) = strip_trailing_spaces(kept_slice);
        out.push_str(kept_trimmed);

        if matches!(frag.action, FragmentAction::ReplaceWithSemicolon) {
            out.push(';');
        }

        let skipped_slice = &bytes[start..end];
        let (skip_trailing_spaces, skip_ends_newline) = trailing_spaces_and_newline(skipped_slice);

        match (kept_ends_newline, skip_ends_newline) {
            (false, false) => out.push_str(skip_trailing_spaces),
            (false, true) => {
                out.push('\n');
                out.push_str(skip_trailing_spaces);
            }
            (true, true) => {
                out.push('\n');
                out.push_str(skip_trailing_spaces);
            }
            (true, false) => {
                out.push('\n');
                out.push_str(keep_indent(kept_slice));
            }
        }

        if matches!(frag.action, FragmentAction::PrefixWithExtern) {
            out.push_str("extern ");
        }

        prev_end = end;
    }

    let (tail_trimmed, _) = strip_trailing_spaces(&bytes[prev_end..]);
    out.push_str(tail_trimmed);
    out
}

/// Strip trailing spaces/tabs from the final line of `slice`, returning
/// the trimmed text and whether the (untrimmed) slice ended with a
/// newline.
fn strip_trailing_spaces(slice: &[u8]) -> (&str, bool) {
    let ends_with_newline = slice.last() == Some(&b'\n');
    let mut end = slice.len();
    while end > 0 && (slice[end - 1] == b' ' || slice[end - 1] == b'\t') {
        end -= 1;
    }
    // Don't strip the newline character itself.
    let text = std::str::from_utf8(&slice[..end]).unwrap_or("");
    (text, ends_with_newline)
}

/// The trailing run of spaces/tabs on the skipped fragment (after any
/// trailing newline), and whether the fragment ended with a newline.
fn trailing_spaces_and_newline(slice: &[u8]) -> (&str, bool) {
    let ends_with_newline = slice.last() == Some(&b'\n');
    let mut body = slice;
    if ends_with_newline {
        body = &body[..body.len() - 1];
    }
    let mut start = body.len();
    while start > 0 && (body[start - 1] == b' ' || body[start - 1] == b'\t') {
        start -= 1;
    }
    let spaces = std::str::from_utf8(&body[start..]).unwrap_or("");
    (spaces, ends_with_newline)
}

/// The indentation (trailing run of spaces/tabs before the fragment
/// start) of the kept prefix, used when the kept text ended with a
/// newline but the skipped fragment did not.
fn keep_indent(kept_slice: &[u8]) -> &str {
    let mut start = kept_slice.len();
    while start > 0 && (kept_slice[start - 1] == b' ' || kept_slice[start - 1] == b'\t') {
        start -= 1;
    }
    std::str::from_utf8(&kept_slice[start..]).unwrap_or("")
}

/// Assemble and atomically write the full header: banner, preamble
/// include, Includes list, banner, rewritten source.
pub fn synthesize(
    out_path: &Path,
    preamble_include: Option<&str>,
    includes: &[String],
    source: &str,
    fragments: &[SkippedFragment],
) -> Result<(), BuildError> {
    let mut text = String::new();
    text.push_str(BANNER_HEAD);
    if let Some(preamble) = preamble_include {
        text.push_str(&format!("#include \"{preamble}\"\n"));
    }
    for inc in includes {
        text.push_str(&format!("#include \"{inc}\"\n"));
    }
    text.push_str(BANNER_BODY);
    text.push_str(&rewrite_source(source, fragments));

    crate::fsutil::atomic_write(out_path, |w| w.write_all(text.as_bytes()))
}
