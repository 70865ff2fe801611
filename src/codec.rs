//! Bit-exact binary codec for the two manifest formats.
//!
//! Both `LDEP` (dependency manifest) and `LMET` (decl-AST metadata) share
//! the same self-describing container shape: a 4-byte magic, then a
//! sequence of length-prefixed *items*, each either a flat *record* or a
//! nested *block* of further items. Every record and block carries its own
//! byte length, so a reader that doesn't recognize an item's ID can still
//! skip cleanly over it -- this is what lets unknown sub-blocks and
//! unknown record kinds be ignored rather than rejected (spec §4.2).
//!
//! The writer stages the whole file into an in-memory buffer and performs
//! exactly one [`crate::fsutil::atomic_write`] call, so a write that fails
//! partway through never leaves a partial file behind.

use std::collections::BTreeSet;

use crate::error::CodecError;
use crate::manifest::{DeclAstMeta, DependencyManifest, FragmentAction, SkippedFragment};
use crate::string_pool::{StringId, StringPool};

const LDEP_MAGIC: [u8; 4] = *b"LDEP";
const LMET_MAGIC: [u8; 4] = *b"LMET";

const RECORD_TAG: u8 = 0;
const BLOCK_TAG: u8 = 1;

// LDEP block/record IDs.
const STRINGS_BLOCK: u8 = 1;
const DECL_DEPS_BLOCK: u8 = 2;
const DEF_DEPS_BLOCK: u8 = 3;
const STRING_RECORD: u8 = 1;
const TOP_FIELDS_RECORD: u8 = 2;
const DECLARATION_RECORD: u8 = 1;

// LMET block/record IDs.
const SOURCE_HASH_RECORD: u8 = 1;
const DECL_AST_HASH_RECORD: u8 = 2;
const FRAGMENTS_BLOCK: u8 = 3;
const FRAGMENT_RECORD: u8 = 1;

/// Accumulates a block's worth of items into a byte buffer.
struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn write_record(&mut self, id: u8, payload: &[u8]) {
        self.buf.push(RECORD_TAG);
        self.buf.push(id);
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
    }

    fn write_block(&mut self, id: u8, f: impl FnOnce(&mut ByteWriter)) {
        let mut nested = ByteWriter::new();
        f(&mut nested);
        self.buf.push(BLOCK_TAG);
        self.buf.push(id);
        self.buf.extend_from_slice(&(nested.buf.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&nested.buf);
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn write_file(magic: [u8; 4], main: ByteWriter) -> Vec<u8> {
    let body = main.into_bytes();
    let mut out = Vec::with_capacity(4 + 4 + body.len());
    out.extend_from_slice(&magic);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// A single parsed item: either a flat record or a nested block.
enum Item<'a> {
    Record { id: u8, payload: &'a [u8] },
    Block { id: u8, body: &'a [u8] },
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::TruncatedStream { needed: n, available: self.remaining() });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Read the next item, or `None` if the reader is exhausted.
    fn read_item(&mut self) -> Result<Option<Item<'a>>, CodecError> {
        if self.remaining() == 0 {
            return Ok(None);
        }

        let tag = self.read_u8()?;
        let id = self.read_u8()?;
        let len = self.read_u32()? as usize;
        let payload = self.read_bytes(len)?;

        Ok(Some(match tag {
            BLOCK_TAG => Item::Block { id, body: payload },
            _ => Item::Record { id, payload },
        }))
    }
}

fn read_file<'a>(magic: [u8; 4], data: &'a [u8]) -> Result<ByteReader<'a>, CodecError> {
    let mut cursor = ByteReader::new(data);
    let found: [u8; 4] = cursor.read_bytes(4)?.try_into().unwrap();
    if found != magic {
        return Err(CodecError::BadSignature { expected: magic, found });
    }
    let len = cursor.read_u32()? as usize;
    let body = cursor.read_bytes(len)?;
    Ok(ByteReader::new(body))
}

fn normalize_path(s: &str) -> String {
    let normalized = s.replace('\\', "/");
    let joined = normalized.split('/').filter(|c| !c.is_empty()).collect::<Vec<_>>().join("/");
    joined
}

/// Encode a dependency manifest plus the local pool its IDs were drawn
/// from into `LDEP` bytes.
pub fn write_dependency_manifest(manifest: &DependencyManifest, pool: &StringPool) -> Vec<u8> {
    let mut main = ByteWriter::new();

    main.write_block(STRINGS_BLOCK, |w| {
        for (id, s) in pool.items() {
            let mut payload = Vec::with_capacity(8 + s.len());
            payload.extend_from_slice(&id.get().to_le_bytes());
            payload.extend_from_slice(&(s.len() as u32).to_le_bytes());
            payload.extend_from_slice(s.as_bytes());
            w.write_record(STRING_RECORD, &payload);
        }
    });

    {
        let flags = (manifest.is_public as u8) | ((manifest.is_body_only as u8) << 1);
        let mut payload = Vec::with_capacity(5);
        payload.extend_from_slice(&manifest.package_file_path_id.get().to_le_bytes());
        payload.push(flags);
        main.write_record(TOP_FIELDS_RECORD, &payload);
    }

    main.write_block(DECL_DEPS_BLOCK, |w| write_decl_set(w, &manifest.declaration_dependencies));
    main.write_block(DEF_DEPS_BLOCK, |w| write_decl_set(w, &manifest.definition_dependencies));

    write_file(LDEP_MAGIC, main)
}

fn write_decl_set(w: &mut ByteWriter, ids: &BTreeSet<StringId>) {
    for id in ids {
        w.write_record(DECLARATION_RECORD, &id.get().to_le_bytes());
    }
}

/// Decode `LDEP` bytes back into a manifest and the fresh (global-ready)
/// string pool its IDs refer to.
///
/// Any path string that isn't already normalized is renormalized and
/// re-interned; a warning is logged and the manifest's IDs are remapped
/// onto the renormalized entries transparently.
pub fn read_dependency_manifest(data: &[u8]) -> Result<(DependencyManifest, StringPool), CodecError> {
    let mut reader = read_file(LDEP_MAGIC, data)?;

    let mut remap: std::collections::HashMap<u32, StringId> = std::collections::HashMap::new();
    let mut pool = StringPool::new();
    let mut package_file_path_id: Option<StringId> = None;
    let mut is_public = false;
    let mut is_body_only = false;
    let mut declaration_dependencies = BTreeSet::new();
    let mut definition_dependencies = BTreeSet::new();

    while let Some(item) = reader.read_item()? {
        match item {
            Item::Block { id: STRINGS_BLOCK, body } => {
                let mut inner = ByteReader::new(body);
                while let Some(inner_item) = inner.read_item()? {
                    if let Item::Record { id: STRING_RECORD, payload } = inner_item {
                        let (file_id, s) = parse_string_record(payload)?;
                        let normalized = normalize_path(&s);
                        if normalized != s {
                            log::warn!("renormalized path '{s}' to '{normalized}' while reading manifest");
                        }
                        let new_id = pool.add(&normalized);
                        remap.insert(file_id, new_id);
                    }
                    // unknown record kinds inside a known block are ignored.
                }
            }
            Item::Record { id: TOP_FIELDS_RECORD, payload } => {
                if payload.len() != 5 {
                    return Err(CodecError::UnexpectedRecordShape {
                        block: "top-level-fields",
                        detail: format!("expected 5 bytes, found {}", payload.len()),
                    });
                }
                let file_id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
                let flags = payload[4];
                package_file_path_id = Some(remap_id(&remap, file_id)?);
                is_public = flags & 0b01 != 0;
                is_body_only = flags & 0b10 != 0;
            }
            Item::Block { id: DECL_DEPS_BLOCK, body } => {
                declaration_dependencies = read_decl_set(body, &remap)?;
            }
            Item::Block { id: DEF_DEPS_BLOCK, body } => {
                definition_dependencies = read_decl_set(body, &remap)?;
            }
            // unknown top-level blocks/records are skipped.
            _ => {}
        }
    }

    let package_file_path_id = package_file_path_id.ok_or_else(|| CodecError::UnexpectedRecordShape {
        block: "top-level-fields",
        detail: "missing top-level-fields record".to_string(),
    })?;

    Ok((
        DependencyManifest {
            package_file_path_id,
            is_public,
            is_body_only,
            declaration_dependencies,
            definition_dependencies,
        },
        pool,
    ))
}

fn remap_id(remap: &std::collections::HashMap<u32, StringId>, file_id: u32) -> Result<StringId, CodecError> {
    remap.get(&file_id).copied().ok_or_else(|| CodecError::UnexpectedRecordShape {
        block: "strings",
        detail: format!("path id {file_id} not found in strings block"),
    })
}

fn read_decl_set(
    body: &[u8],
    remap: &std::collections::HashMap<u32, StringId>,
) -> Result<BTreeSet<StringId>, CodecError> {
    let mut out = BTreeSet::new();
    let mut inner = ByteReader::new(body);
    while let Some(item) = inner.read_item()? {
        if let Item::Record { id: DECLARATION_RECORD, payload } = item {
            if payload.len() != 4 {
                return Err(CodecError::UnexpectedRecordShape {
                    block: "declarations",
                    detail: format!("expected 4 bytes, found {}", payload.len()),
                });
            }
            let file_id = u32::from_le_bytes(payload.try_into().unwrap());
            out.insert(remap_id(remap, file_id)?);
        }
    }
    Ok(out)
}

fn parse_string_record(payload: &[u8]) -> Result<(u32, String), CodecError> {
    if payload.len() < 8 {
        return Err(CodecError::UnexpectedRecordShape {
            block: "strings",
            detail: format!("record too short: {} bytes", payload.len()),
        });
    }
    let id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
    let len = u32::from_le_bytes(payload[4..8].try_into().unwrap()) as usize;
    let bytes = payload.get(8..8 + len).ok_or_else(|| CodecError::UnexpectedRecordShape {
        block: "strings",
        detail: "declared string length exceeds record payload".to_string(),
    })?;
    let s = String::from_utf8(bytes.to_vec())
        .map_err(|e| CodecError::UnexpectedRecordShape { block: "strings", detail: e.to_string() })?;
    Ok((id, s))
}

/// Encode decl-AST metadata into `LMET` bytes.
pub fn write_decl_ast_meta(meta: &DeclAstMeta) -> Vec<u8> {
    let mut main = ByteWriter::new();
    main.write_record(SOURCE_HASH_RECORD, &meta.source_hash);
    main.write_record(DECL_AST_HASH_RECORD, &meta.decl_ast_hash);
    main.write_block(FRAGMENTS_BLOCK, |w| {
        for f in &meta.fragments_to_skip {
            let mut payload = [0u8; 9];
            payload[0..4].copy_from_slice(&f.start.to_le_bytes());
            payload[4..8].copy_from_slice(&f.end.to_le_bytes());
            payload[8] = f.action.as_u8();
            w.write_record(FRAGMENT_RECORD, &payload);
        }
    });
    write_file(LMET_MAGIC, main)
}

/// Decode `LMET` bytes back into decl-AST metadata.
pub fn read_decl_ast_meta(data: &[u8]) -> Result<DeclAstMeta, CodecError> {
    let mut reader = read_file(LMET_MAGIC, data)?;

    let mut source_hash = Vec::new();
    let mut decl_ast_hash = Vec::new();
    let mut fragments_to_skip = Vec::new();

    while let Some(item) = reader.read_item()? {
        match item {
            Item::Record { id: SOURCE_HASH_RECORD, payload } => source_hash = payload.to_vec(),
            Item::Record { id: DECL_AST_HASH_RECORD, payload } => decl_ast_hash = payload.to_vec(),
            Item::Block { id: FRAGMENTS_BLOCK, body } => {
                let mut inner = ByteReader::new(body);
                while let Some(inner_item) = inner.read_item()? {
                    if let Item::Record { id: FRAGMENT_RECORD, payload } = inner_item {
                        if payload.len() != 9 {
                            return Err(CodecError::UnexpectedRecordShape {
                                block: "skipped-fragments",
                                detail: format!("expected 9 bytes, found {}", payload.len()),
                            });
                        }
                        let start = u32::from_le_bytes(payload[0..4].try_into().unwrap());
                        let end = u32::from_le_bytes(payload[4..8].try_into().unwrap());
                        let action = FragmentAction::from_u8(payload[8]).ok_or_else(|| {
                            CodecError::UnexpectedRecordShape {
                                block: "skipped-fragments",
                                detail: format!("unknown action code {}", payload[8]),
                            }
                        })?;
                        fragments_to_skip.push(SkippedFragment::new(start, end, action));
                    }
                }
            }
            _ => {}
        }
    }

    Ok(DeclAstMeta { source_hash, decl_ast_hash, fragments_to_skip })
}
