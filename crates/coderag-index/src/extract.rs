//! Definition extraction: a shallow walk over top-level AST nodes.

use std::path::Path;

use tree_sitter::{Node, Parser};

use coderag_memory::ChunkMeta;

use crate::error::{IndexError, Result};
use crate::languages::Lang;

/// Node kinds that can carry an entity's name when the grammar exposes no
/// `name` field.
const NAME_KINDS: &[&str] = &[
    "identifier",
    "name",
    "type_identifier",
    "field_identifier",
    "property_identifier",
];

/// Extract top-level definitions from a source file.
///
/// Only direct children of the root are considered; nested definitions stay
/// inside their parent's chunk. Wrapper nodes (decorators, export statements)
/// are looked through exactly one level and the chunk covers only the inner
/// definition. Line numbers are 0-based.
///
/// # Errors
///
/// Returns an error if tree-sitter cannot parse the source.
pub fn extract_definitions(source: &str, lang: Lang) -> Result<Vec<ChunkMeta>> {
    let mut parser = Parser::new();
    parser
        .set_language(&lang.grammar())
        .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| IndexError::Parse(format!("parse failed for {lang}")))?;

    let definition_kinds = lang.definition_kinds();
    let wrapper_kinds = lang.wrapper_kinds();
    let mut chunks = Vec::new();

    let root = tree.root_node();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        // Unwrap decorators and export statements one level; the wrapper
        // itself stays out of the chunk.
        let definition = if wrapper_kinds.contains(&child.kind()) {
            let mut inner_cursor = child.walk();
            child
                .named_children(&mut inner_cursor)
                .find(|n| definition_kinds.contains(&n.kind()))
        } else if definition_kinds.contains(&child.kind()) {
            Some(child)
        } else {
            None
        };

        let Some(node) = definition else {
            continue;
        };

        let content = source
            .get(node.start_byte()..node.end_byte())
            .unwrap_or_default()
            .to_owned();
        chunks.push(ChunkMeta {
            kind: node.kind().to_owned(),
            name: entity_name(&node, source),
            content,
            start_line: node.start_position().row,
            end_line: node.end_position().row,
        });
    }

    Ok(chunks)
}

/// One whole-file chunk for files without structural definitions.
///
/// Returns `None` when the decoded content is empty or whitespace-only.
#[must_use]
pub fn chunk_whole_file(bytes: &[u8], path: &Path) -> Option<ChunkMeta> {
    let content = String::from_utf8_lossy(bytes);
    if content.trim().is_empty() {
        return None;
    }
    let line_count = content.lines().count();
    Some(ChunkMeta {
        kind: "file_content".to_owned(),
        name: path
            .file_name()
            .map_or_else(|| path.to_string_lossy().into_owned(), |n| {
                n.to_string_lossy().into_owned()
            }),
        content: content.into_owned(),
        start_line: 0,
        end_line: line_count.saturating_sub(1),
    })
}

fn entity_name(node: &Node, source: &str) -> String {
    if let Some(name_node) = node.child_by_field_name("name") {
        if let Some(text) = source.get(name_node.byte_range()) {
            return text.to_owned();
        }
    }
    // Grammars without a name field: first identifier-like child.
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if NAME_KINDS.contains(&child.kind()) {
            if let Some(text) = source.get(child.byte_range()) {
                return text.to_owned();
            }
        }
    }
    "anonymous".to_owned()
}
