//! Structural scanner: turns a checkout into a map of modules, classes,
//! functions and methods with signatures, docstrings and inheritance.
//!
//! Scanning runs in two passes. The first pass parses every file in
//! parallel and records raw base-class expressions as strings. The second
//! pass resolves those strings against the completed FQN table, so the
//! order in which files were visited never matters.

use std::collections::btree_map::Entry;
use std::path::Path;

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::{IndexerError, Result};
use crate::index::{
    BaseRef, EntityKind, FileFingerprint, InheritanceEdge, Location, Parameter, SourceEntity,
    StructuralMap,
};
use crate::indexer::imports::{module_name_for, strip_source_root, ImportBindings, ModuleName};
use crate::indexer::parser::{ParsedFile, Parser};
use crate::indexer::walker::{relative_path, FileWalker};
use crate::languages::LanguageRegistry;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Everything extracted from a single file during the first pass.
#[derive(Debug)]
pub struct FileScan {
    pub module: ModuleName,
    pub relative_path: String,
    pub entities: Vec<SourceEntity>,
    /// Class FQN with its raw, unresolved base expressions
    pub raw_bases: Vec<(String, Vec<String>)>,
    pub bindings: ImportBindings,
    pub fingerprint: FileFingerprint,
}

enum FileOutcome {
    Scanned(FileScan),
    Failed,
    Skipped,
}

pub struct StructuralScanner {
    source_root: Option<String>,
    walker: FileWalker,
    parser: Parser,
}

impl StructuralScanner {
    pub fn new(source_root: Option<String>) -> Self {
        Self {
            source_root,
            walker: FileWalker::new(LanguageRegistry::new()),
            parser: Parser::default(),
        }
    }

    /// Uses `src/` as the import root when it exists and is not itself a package.
    pub fn detect_source_root(root: &Path) -> Option<String> {
        let src = root.join("src");
        (src.is_dir() && !src.join("__init__.py").exists()).then(|| "src".to_string())
    }

    pub fn source_root(&self) -> Option<&str> {
        self.source_root.as_deref()
    }

    pub fn scan(&self, root: &Path, cancel: &CancellationToken) -> Result<StructuralMap> {
        let files = self.walker.walk(root)?;
        tracing::info!("Scanning {} files under {}", files.len(), root.display());

        let outcomes: Vec<FileOutcome> = files
            .par_iter()
            .map(|file| {
                if cancel.is_cancelled() {
                    return Err(IndexerError::Cancelled);
                }
                let relative = relative_path(root, file);
                match self.scan_file(root, &relative) {
                    Ok(Some(scan)) => Ok(FileOutcome::Scanned(scan)),
                    Ok(None) => Ok(FileOutcome::Skipped),
                    Err(e @ IndexerError::Parse { .. }) => {
                        tracing::warn!("Skipping unparsable file: {}", e);
                        Ok(FileOutcome::Failed)
                    }
                    Err(IndexerError::Io(e)) => {
                        tracing::warn!("Skipping unreadable file {}: {}", relative, e);
                        Ok(FileOutcome::Failed)
                    }
                    Err(e) => Err(e),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut map = StructuralMap::default();
        let mut scans = Vec::new();
        for outcome in outcomes {
            match outcome {
                FileOutcome::Scanned(scan) => scans.push(scan),
                FileOutcome::Failed => map.parse_failures += 1,
                FileOutcome::Skipped => {}
            }
        }

        // Pass 1: FQN table
        for scan in &scans {
            map.files
                .insert(scan.relative_path.clone(), scan.fingerprint.clone());
            for entity in &scan.entities {
                match map.entities.entry(entity.fqn.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(entity.clone());
                    }
                    Entry::Occupied(_) => {
                        tracing::debug!(
                            "Duplicate definition of {} in {}, keeping the first",
                            entity.fqn,
                            scan.relative_path
                        );
                    }
                }
            }
            for imported in scan.bindings.imports() {
                if !imported.from_import || imported.local.starts_with('_') {
                    continue;
                }
                let alias = format!("{}.{}", scan.module.name, imported.local);
                if alias != imported.target && !map.entities.contains_key(&alias) {
                    map.aliases.entry(alias).or_insert_with(|| imported.target.clone());
                }
            }
        }
        // Aliases may have been recorded before the entity that shadows them
        let defined: Vec<String> = map
            .aliases
            .keys()
            .filter(|alias| map.entities.contains_key(*alias))
            .cloned()
            .collect();
        for alias in defined {
            map.aliases.remove(&alias);
        }

        // Pass 2: resolve bases against the completed table
        for scan in &scans {
            for (class_fqn, raw_bases) in &scan.raw_bases {
                let resolved: Vec<BaseRef> = raw_bases
                    .iter()
                    .map(|raw| resolve_base(raw, &scan.module, &scan.bindings, &map))
                    .collect();
                for base in &resolved {
                    map.inheritance.push(InheritanceEdge {
                        subtype: class_fqn.clone(),
                        base: base.clone(),
                    });
                }
                if let Some(entity) = map.entities.get_mut(class_fqn) {
                    if entity.bases.is_empty() {
                        entity.bases = resolved;
                    }
                }
            }
        }
        map.inheritance.sort();
        map.inheritance.dedup();

        let unresolved = map
            .inheritance
            .iter()
            .filter(|edge| !edge.base.is_resolved())
            .count();
        tracing::info!(
            "Scanned {} files: {} entities, {} inheritance edges ({} unresolved), {} parse failures",
            map.files.len(),
            map.entities.len(),
            map.inheritance.len(),
            unresolved,
            map.parse_failures
        );

        Ok(map)
    }

    /// First-pass extraction for one checkout-relative file. Returns `None`
    /// for files that do not map to an importable module name.
    pub fn scan_file(&self, root: &Path, relative: &str) -> Result<Option<FileScan>> {
        if strip_source_root(relative, self.source_root.as_deref()).is_none() {
            tracing::debug!("{} is outside the source root, skipping", relative);
            return Ok(None);
        }
        let Some(module) = module_name_for(relative, self.source_root.as_deref()) else {
            tracing::debug!("No module name for {}, skipping", relative);
            return Ok(None);
        };

        let bytes = std::fs::read(root.join(relative))?;
        let fingerprint = FileFingerprint::of_bytes(&bytes);
        let source = String::from_utf8(bytes).map_err(|_| IndexerError::Parse {
            path: relative.to_string(),
            message: "file is not valid UTF-8".to_string(),
        })?;

        let parsed = self
            .parser
            .parse_source(&source, self.parser.python()?)
            .map_err(|e| match e {
                IndexerError::Parse { message, .. } => IndexerError::Parse {
                    path: relative.to_string(),
                    message,
                },
                other => other,
            })?;

        let mut collector = EntityCollector::new(&parsed, relative);
        collector.collect_module(&module);
        let bindings = ImportBindings::collect(&parsed, Some(&module));

        Ok(Some(FileScan {
            module,
            relative_path: relative.to_string(),
            entities: collector.entities,
            raw_bases: collector.raw_bases,
            bindings,
            fingerprint,
        }))
    }
}

fn resolve_base(
    raw: &str,
    module: &ModuleName,
    bindings: &ImportBindings,
    map: &StructuralMap,
) -> BaseRef {
    let local = format!("{}.{}", module.name, raw);
    if map.contains(&local) {
        return BaseRef::Resolved { fqn: local };
    }

    let imported = bindings.resolve(raw);
    for candidate in imported.iter().map(String::as_str).chain(std::iter::once(raw)) {
        let canonical = map.canonical(candidate);
        if map.contains(&canonical) {
            return BaseRef::Resolved { fqn: canonical };
        }
    }

    BaseRef::Unresolved {
        name: imported.unwrap_or_else(|| raw.to_string()),
    }
}

struct EntityCollector<'a> {
    parsed: &'a ParsedFile,
    file_path: &'a str,
    entities: Vec<SourceEntity>,
    raw_bases: Vec<(String, Vec<String>)>,
}

impl<'a> EntityCollector<'a> {
    fn new(parsed: &'a ParsedFile, file_path: &'a str) -> Self {
        Self {
            parsed,
            file_path,
            entities: Vec::new(),
            raw_bases: Vec::new(),
        }
    }

    fn collect_module(&mut self, module: &ModuleName) {
        let root = self.parsed.root_node();
        let line_count = self.parsed.source.lines().count().max(1) as u32;

        self.entities.push(SourceEntity {
            fqn: module.name.clone(),
            name: module
                .name
                .rsplit('.')
                .next()
                .unwrap_or(&module.name)
                .to_string(),
            kind: EntityKind::Module,
            signature: None,
            parameters: Vec::new(),
            return_annotation: None,
            docstring: docstring_of(self.parsed, root),
            owner: None,
            location: Location::new(self.file_path, 1, line_count),
            bases: Vec::new(),
        });

        self.visit_block(root, &module.name, EntityKind::Module);
    }

    fn visit_block(&mut self, node: tree_sitter::Node, owner: &str, owner_kind: EntityKind) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "class_definition" => self.visit_class(child, child, owner),
                "function_definition" => self.visit_function(child, child, owner, owner_kind),
                "decorated_definition" => {
                    if let Some(definition) = child.child_by_field_name("definition") {
                        match definition.kind() {
                            "class_definition" => self.visit_class(definition, child, owner),
                            "function_definition" => {
                                self.visit_function(definition, child, owner, owner_kind)
                            }
                            _ => {}
                        }
                    }
                }
                // Definitions guarded by TYPE_CHECKING, try/except imports, etc.
                "if_statement" | "elif_clause" | "else_clause" | "try_statement"
                | "except_clause" | "finally_clause" | "with_statement" | "block" => {
                    self.visit_block(child, owner, owner_kind)
                }
                _ => {}
            }
        }
    }

    fn visit_class(&mut self, definition: tree_sitter::Node, span: tree_sitter::Node, owner: &str) {
        let Some(name_node) = definition.child_by_field_name("name") else {
            return;
        };
        let name = self.parsed.node_text(&name_node).to_string();
        let fqn = format!("{}.{}", owner, name);

        let mut raw_bases = Vec::new();
        let mut signature = format!("class {}", name);
        if let Some(superclasses) = definition.child_by_field_name("superclasses") {
            signature.push_str(&normalize_whitespace(self.parsed.node_text(&superclasses)));
            let mut cursor = superclasses.walk();
            for base in superclasses.named_children(&mut cursor) {
                let expression = match base.kind() {
                    "identifier" | "attribute" => Some(base),
                    "subscript" => base.child_by_field_name("value"),
                    _ => None,
                };
                if let Some(expression) = expression {
                    let text = self.parsed.node_text(&expression);
                    if matches!(expression.kind(), "identifier" | "attribute") {
                        raw_bases.push(text.split_whitespace().collect::<String>());
                    }
                }
            }
        }

        let body = definition.child_by_field_name("body");
        self.entities.push(SourceEntity {
            fqn: fqn.clone(),
            name,
            kind: EntityKind::Class,
            signature: Some(signature),
            parameters: Vec::new(),
            return_annotation: None,
            docstring: body.and_then(|b| docstring_of(self.parsed, b)),
            owner: Some(owner.to_string()),
            location: self.location(&span),
            bases: Vec::new(),
        });
        if !raw_bases.is_empty() {
            self.raw_bases.push((fqn.clone(), raw_bases));
        }

        if let Some(body) = body {
            self.visit_block(body, &fqn, EntityKind::Class);
        }
    }

    fn visit_function(
        &mut self,
        definition: tree_sitter::Node,
        span: tree_sitter::Node,
        owner: &str,
        owner_kind: EntityKind,
    ) {
        let Some(name_node) = definition.child_by_field_name("name") else {
            return;
        };
        let name = self.parsed.node_text(&name_node).to_string();
        let kind = if owner_kind == EntityKind::Class {
            EntityKind::Method
        } else {
            EntityKind::Function
        };

        let params_node = definition.child_by_field_name("parameters");
        let parameters = params_node
            .map(|p| self.parameters(p))
            .unwrap_or_default();
        let return_annotation = definition
            .child_by_field_name("return_type")
            .map(|r| normalize_whitespace(self.parsed.node_text(&r)));

        let is_async = {
            let mut cursor = definition.walk();
            let first = definition.children(&mut cursor).next();
            first.is_some_and(|c| c.kind() == "async")
        };
        let mut signature = format!(
            "{}def {}{}",
            if is_async { "async " } else { "" },
            name,
            params_node
                .map(|p| normalize_whitespace(self.parsed.node_text(&p)))
                .unwrap_or_else(|| "()".to_string())
        );
        if let Some(ret) = &return_annotation {
            signature.push_str(" -> ");
            signature.push_str(ret);
        }

        self.entities.push(SourceEntity {
            fqn: format!("{}.{}", owner, name),
            name,
            kind,
            signature: Some(signature),
            parameters,
            return_annotation,
            docstring: definition
                .child_by_field_name("body")
                .and_then(|b| docstring_of(self.parsed, b)),
            owner: Some(owner.to_string()),
            location: self.location(&span),
            bases: Vec::new(),
        });
    }

    fn parameters(&self, node: tree_sitter::Node) -> Vec<Parameter> {
        let mut parameters = Vec::new();
        let mut cursor = node.walk();

        for param in node.named_children(&mut cursor) {
            let text = |n: tree_sitter::Node| normalize_whitespace(self.parsed.node_text(&n));
            let parameter = match param.kind() {
                "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => Parameter {
                    name: text(param),
                    annotation: None,
                    has_default: false,
                },
                "typed_parameter" => {
                    let mut inner = param.walk();
                    let name = param
                        .named_children(&mut inner)
                        .find(|c| c.kind() != "type")
                        .map(text)
                        .unwrap_or_default();
                    Parameter {
                        name,
                        annotation: param.child_by_field_name("type").map(text),
                        has_default: false,
                    }
                }
                "default_parameter" | "typed_default_parameter" => Parameter {
                    name: param.child_by_field_name("name").map(text).unwrap_or_default(),
                    annotation: param.child_by_field_name("type").map(text),
                    has_default: true,
                },
                _ => continue,
            };
            if !parameter.name.is_empty() {
                parameters.push(parameter);
            }
        }

        parameters
    }

    fn location(&self, node: &tree_sitter::Node) -> Location {
        Location::new(
            self.file_path,
            node.start_position().row as u32 + 1,
            node.end_position().row as u32 + 1,
        )
    }
}

/// Leading string literal of a module or block, cleaned like `inspect.cleandoc`.
fn docstring_of(parsed: &ParsedFile, block: tree_sitter::Node) -> Option<String> {
    let mut cursor = block.walk();
    let first = block.named_children(&mut cursor).find(|c| c.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let mut inner = first.walk();
    let literal = first.named_children(&mut inner).next()?;
    if literal.kind() != "string" {
        return None;
    }
    clean_docstring(parsed.node_text(&literal))
}

pub(crate) fn clean_docstring(raw: &str) -> Option<String> {
    let unprefixed = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let body = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|quote| {
            unprefixed
                .strip_prefix(quote)
                .and_then(|s| s.strip_suffix(quote))
        })
        .unwrap_or(unprefixed);

    let mut lines = body.lines();
    let first = lines.next().unwrap_or_default().trim().to_string();
    let rest: Vec<&str> = lines.collect();
    let indent = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<String> = std::iter::once(first)
        .chain(rest.iter().map(|l| {
            l.get(indent..)
                .map(str::trim_end)
                .unwrap_or_else(|| l.trim())
                .to_string()
        }))
        .collect();

    while cleaned.last().is_some_and(|l| l.is_empty()) {
        cleaned.pop();
    }
    while cleaned.first().is_some_and(|l| l.is_empty()) {
        cleaned.remove(0);
    }

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join("\n"))
    }
}

fn normalize_whitespace(text: &str) -> String {
    WHITESPACE
        .replace_all(text.trim(), " ")
        .replace("( ", "(")
        .replace(" )", ")")
}
