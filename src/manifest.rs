//! The in-memory shapes persisted by [`crate::codec`]: the per-unit
//! dependency manifest and the decl-AST metadata record.

use std::collections::BTreeSet;

use crate::string_pool::StringId;

/// Per-source-unit dependency manifest (the `LDEP` payload).
///
/// Every ID in `declaration_dependencies` / `definition_dependencies` must
/// exist in `strings` (see [`crate::codec`] for the on-disk encoding that
/// upholds this).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyManifest {
    pub package_file_path_id: StringId,
    pub is_public: bool,
    pub is_body_only: bool,
    pub declaration_dependencies: BTreeSet<StringId>,
    pub definition_dependencies: BTreeSet<StringId>,
}

impl DependencyManifest {
    pub fn new(package_file_path_id: StringId, is_public: bool, is_body_only: bool) -> Self {
        Self {
            package_file_path_id,
            is_public,
            is_body_only,
            declaration_dependencies: BTreeSet::new(),
            definition_dependencies: BTreeSet::new(),
        }
    }
}

/// How a skipped source fragment should be rewritten when synthesizing a
/// header (see [`crate::header`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentAction {
    /// Drop the fragment entirely.
    Skip,
    /// Drop the fragment, but leave a single `;` in its place.
    ReplaceWithSemicolon,
    /// Drop the fragment, and prefix the next kept byte with `extern `.
    PrefixWithExtern,
}

impl FragmentAction {
    pub fn as_u8(self) -> u8 {
        match self {
            FragmentAction::Skip => 0,
            FragmentAction::ReplaceWithSemicolon => 1,
            FragmentAction::PrefixWithExtern => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FragmentAction::Skip),
            1 => Some(FragmentAction::ReplaceWithSemicolon),
            2 => Some(FragmentAction::PrefixWithExtern),
            _ => None,
        }
    }
}

/// A single `{start, end, action}` entry in `fragments_to_skip`.
///
/// `start`/`end` are half-open byte offsets into the original source.
/// Within a single [`DeclAstMeta`], fragments must be non-overlapping and
/// strictly ordered by `start` (this is an invariant of construction, not
/// re-validated by the codec on read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedFragment {
    pub start: u32,
    pub end: u32,
    pub action: FragmentAction,
}

impl SkippedFragment {
    pub fn new(start: u32, end: u32, action: FragmentAction) -> Self {
        assert!(start <= end, "fragment range must be non-inverted");
        Self { start, end, action }
    }
}

/// Per-compiled-declaration metadata (the `LMET` payload).
///
/// `source_hash` / `decl_ast_hash` are reserved but not yet assigned
/// semantics -- see `DESIGN.md` for the resolved open question. They must
/// round-trip byte-for-byte but are not used for equality/caching
/// decisions elsewhere in the core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclAstMeta {
    pub source_hash: Vec<u8>,
    pub decl_ast_hash: Vec<u8>,
    pub fragments_to_skip: Vec<SkippedFragment>,
}

impl DeclAstMeta {
    pub fn new(source_hash: Vec<u8>, decl_ast_hash: Vec<u8>, fragments_to_skip: Vec<SkippedFragment>) -> Self {
        Self { source_hash, decl_ast_hash, fragments_to_skip }
    }
}
