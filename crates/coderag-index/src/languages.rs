//! Language detection and tree-sitter grammar registry.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Bash,
    Toml,
    Json,
    Markdown,
}

impl Lang {
    /// Identifier used in document metadata.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Bash => "bash",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Markdown => "markdown",
        }
    }

    #[must_use]
    pub fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Bash => tree_sitter_bash::LANGUAGE.into(),
            Self::Toml => tree_sitter_toml_ng::LANGUAGE.into(),
            Self::Json => tree_sitter_json::LANGUAGE.into(),
            Self::Markdown => tree_sitter_md::LANGUAGE.into(),
        }
    }

    /// Top-level AST node kinds extracted as definition chunks. Languages
    /// with no structural definitions fall through to whole-file chunks.
    #[must_use]
    pub fn definition_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "function_item",
                "struct_item",
                "enum_item",
                "trait_item",
                "impl_item",
            ],
            Self::Python => &["function_definition", "class_definition"],
            Self::JavaScript | Self::TypeScript => &[
                "function_declaration",
                "class_declaration",
                "method_definition",
            ],
            Self::Go => &["function_declaration", "method_declaration"],
            Self::Bash | Self::Toml | Self::Json | Self::Markdown => &[],
        }
    }

    /// Node kinds that wrap a definition one level deep and should be
    /// looked through, like Python decorators.
    #[must_use]
    pub fn wrapper_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["decorated_definition"],
            Self::JavaScript | Self::TypeScript => &["export_statement"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        "sh" | "bash" | "zsh" => Some(Lang::Bash),
        "toml" => Some(Lang::Toml),
        "json" | "jsonc" => Some(Lang::Json),
        "md" | "markdown" => Some(Lang::Markdown),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_extension() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some(Lang::Rust));
        assert_eq!(detect_language(Path::new("app.py")), Some(Lang::Python));
        assert_eq!(
            detect_language(Path::new("web/index.tsx")),
            Some(Lang::TypeScript)
        );
        assert_eq!(detect_language(Path::new("Cargo.toml")), Some(Lang::Toml));
        assert_eq!(detect_language(Path::new("photo.png")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn every_language_has_a_grammar() {
        for lang in [
            Lang::Rust,
            Lang::Python,
            Lang::JavaScript,
            Lang::TypeScript,
            Lang::Go,
            Lang::Bash,
            Lang::Toml,
            Lang::Json,
            Lang::Markdown,
        ] {
            let mut parser = tree_sitter::Parser::new();
            parser.set_language(&lang.grammar()).unwrap();
        }
    }

    #[test]
    fn config_languages_have_no_definition_kinds() {
        assert!(Lang::Toml.definition_kinds().is_empty());
        assert!(Lang::Json.definition_kinds().is_empty());
        assert!(Lang::Markdown.definition_kinds().is_empty());
        assert!(!Lang::Rust.definition_kinds().is_empty());
    }
}
