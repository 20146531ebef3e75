use std::path::Path;
use std::sync::Arc;

use crate::error::{IndexerError, Result};
use crate::languages::{LanguageGrammar, LanguageRegistry};

pub struct Parser {
    registry: LanguageRegistry,
}

impl Parser {
    pub fn new(registry: LanguageRegistry) -> Self {
        Self { registry }
    }

    /// Reads and parses a file. Syntax errors are reported as `IndexerError::Parse`.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedFile> {
        let grammar = self.registry.get_for_file(path).ok_or_else(|| IndexerError::Parse {
            path: path.display().to_string(),
            message: "unsupported file type".to_string(),
        })?;

        let bytes = std::fs::read(path)?;
        let source = String::from_utf8(bytes).map_err(|_| IndexerError::Parse {
            path: path.display().to_string(),
            message: "file is not valid UTF-8".to_string(),
        })?;

        self.parse_source(&source, grammar).map_err(|e| match e {
            IndexerError::Parse { message, .. } => IndexerError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn parse_source(&self, source: &str, grammar: Arc<dyn LanguageGrammar>) -> Result<ParsedFile> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&grammar.language())
            .map_err(|e| IndexerError::Parse {
                path: String::new(),
                message: e.to_string(),
            })?;

        let tree = parser.parse(source, None).ok_or_else(|| IndexerError::Parse {
            path: String::new(),
            message: "parser produced no tree".to_string(),
        })?;

        if tree.root_node().has_error() {
            return Err(IndexerError::Parse {
                path: String::new(),
                message: "syntax error".to_string(),
            });
        }

        Ok(ParsedFile {
            tree,
            source: source.to_string(),
            grammar,
        })
    }

    pub fn python(&self) -> Result<Arc<dyn LanguageGrammar>> {
        self.registry
            .get_by_name("python")
            .ok_or_else(|| IndexerError::Configuration("python grammar not registered".to_string()))
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(LanguageRegistry::new())
    }
}

pub struct ParsedFile {
    pub tree: tree_sitter::Tree,
    pub source: String,
    pub grammar: Arc<dyn LanguageGrammar>,
}

impl ParsedFile {
    pub fn root_node(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    pub fn source_bytes(&self) -> &[u8] {
        self.source.as_bytes()
    }

    pub fn node_text(&self, node: &tree_sitter::Node) -> &str {
        node.utf8_text(self.source_bytes()).unwrap_or("")
    }
}
