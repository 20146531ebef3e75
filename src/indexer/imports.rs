//! Import binding tables for Python modules.
//!
//! Both the scanner (base-class resolution, re-export aliases) and the miner
//! (usage roots) need to know which dotted name a local identifier refers to.

use std::collections::BTreeMap;

use crate::indexer::parser::ParsedFile;

/// Dotted module name of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleName {
    pub name: String,
    /// True for `__init__` files
    pub is_package: bool,
}

impl ModuleName {
    /// Package that relative imports in this module are resolved against.
    fn package(&self) -> Option<&str> {
        if self.is_package {
            Some(&self.name)
        } else {
            self.name.rsplit_once('.').map(|(pkg, _)| pkg)
        }
    }
}

/// Derives the module name from a checkout-relative path such as
/// `src/google/adk/tools/__init__.py`.
pub fn module_name_for(relative: &str, source_root: Option<&str>) -> Option<ModuleName> {
    let path = strip_source_root(relative, source_root).unwrap_or(relative);

    let path = path
        .strip_suffix(".py")
        .or_else(|| path.strip_suffix(".pyi"))?;

    let mut segments: Vec<&str> = path.split('/').collect();
    let is_package = segments.last() == Some(&"__init__");
    if is_package {
        segments.pop();
    }
    if segments.is_empty() || !segments.iter().all(|s| is_identifier(s)) {
        return None;
    }

    Some(ModuleName {
        name: segments.join("."),
        is_package,
    })
}

/// Path below the source root, or `None` when a root is set and `relative`
/// lies outside it (`tests/`, `setup.py`, `docs/`).
pub fn strip_source_root<'a>(relative: &'a str, source_root: Option<&str>) -> Option<&'a str> {
    match source_root.map(|r| r.trim_matches('/')).filter(|r| !r.is_empty()) {
        Some(root) => relative.strip_prefix(root).and_then(|p| p.strip_prefix('/')),
        None => Some(relative),
    }
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedName {
    /// Name bound in the importing module
    pub local: String,
    /// Absolute dotted target
    pub target: String,
    /// Whether the binding came from `from x import y`
    pub from_import: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImportBindings {
    bindings: BTreeMap<String, String>,
    imports: Vec<ImportedName>,
}

impl ImportBindings {
    /// Collects every import statement in the file, including nested ones.
    pub fn collect(parsed: &ParsedFile, module: Option<&ModuleName>) -> Self {
        let mut bindings = Self::default();
        let mut stack = vec![parsed.root_node()];

        while let Some(node) = stack.pop() {
            match node.kind() {
                "import_statement" => bindings.collect_import(parsed, node),
                "import_from_statement" => bindings.collect_from_import(parsed, node, module),
                _ => {
                    let mut cursor = node.walk();
                    for child in node.named_children(&mut cursor) {
                        stack.push(child);
                    }
                }
            }
        }

        bindings
    }

    fn collect_import(&mut self, parsed: &ParsedFile, node: tree_sitter::Node) {
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            match name.kind() {
                "dotted_name" => {
                    // `import a.b.c` binds `a` but imports `a.b.c`
                    let target = dotted(parsed, &name);
                    let local = target.split('.').next().unwrap_or_default().to_string();
                    if local.is_empty() {
                        continue;
                    }
                    self.bindings.insert(local.clone(), local.clone());
                    self.imports.push(ImportedName {
                        local,
                        target,
                        from_import: false,
                    });
                }
                "aliased_import" => {
                    let (Some(path), Some(alias)) = (
                        name.child_by_field_name("name"),
                        name.child_by_field_name("alias"),
                    ) else {
                        continue;
                    };
                    let target = dotted(parsed, &path);
                    self.bind(parsed.node_text(&alias).to_string(), target, false);
                }
                _ => {}
            }
        }
    }

    fn collect_from_import(
        &mut self,
        parsed: &ParsedFile,
        node: tree_sitter::Node,
        module: Option<&ModuleName>,
    ) {
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let base = match module_node.kind() {
            "relative_import" => resolve_relative(&dotted(parsed, &module_node), module),
            _ => Some(dotted(parsed, &module_node)),
        };
        let Some(base) = base else {
            return;
        };

        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let (imported, local) = match name.kind() {
                "dotted_name" => {
                    let imported = dotted(parsed, &name);
                    let local = imported.rsplit('.').next().unwrap_or_default().to_string();
                    (imported, local)
                }
                "aliased_import" => {
                    let (Some(path), Some(alias)) = (
                        name.child_by_field_name("name"),
                        name.child_by_field_name("alias"),
                    ) else {
                        continue;
                    };
                    (dotted(parsed, &path), parsed.node_text(&alias).to_string())
                }
                _ => continue,
            };
            let target = if base.is_empty() {
                imported
            } else {
                format!("{}.{}", base, imported)
            };
            self.bind(local, target, true);
        }
    }

    fn bind(&mut self, local: String, target: String, from_import: bool) {
        if local.is_empty() || target.is_empty() {
            return;
        }
        self.bindings.insert(local.clone(), target.clone());
        self.imports.push(ImportedName {
            local,
            target,
            from_import,
        });
    }

    /// Resolves a dotted expression (`types.Config`) through the bound first segment.
    pub fn resolve(&self, expression: &str) -> Option<String> {
        let (head, rest) = match expression.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (expression, None),
        };
        let target = self.bindings.get(head)?;
        Some(match rest {
            Some(rest) => format!("{}.{}", target, rest),
            None => target.clone(),
        })
    }

    pub fn imports(&self) -> &[ImportedName] {
        &self.imports
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }
}

fn dotted(parsed: &ParsedFile, node: &tree_sitter::Node) -> String {
    parsed
        .node_text(node)
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\\')
        .collect()
}

/// Resolves `..sub.mod` against the importing module's package.
fn resolve_relative(text: &str, module: Option<&ModuleName>) -> Option<String> {
    let dots = text.chars().take_while(|c| *c == '.').count();
    let rest = &text[dots..];
    let mut package: Vec<&str> = module?.package()?.split('.').collect();

    for _ in 1..dots {
        package.pop()?;
    }
    if package.is_empty() {
        return None;
    }

    let mut resolved = package.join(".");
    if !rest.is_empty() {
        resolved.push('.');
        resolved.push_str(rest);
    }
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::Parser;

    fn bindings(source: &str, module: Option<&ModuleName>) -> ImportBindings {
        let parser = Parser::default();
        let parsed = parser.parse_source(source, parser.python().unwrap()).unwrap();
        ImportBindings::collect(&parsed, module)
    }

    fn module(name: &str, is_package: bool) -> ModuleName {
        ModuleName {
            name: name.to_string(),
            is_package,
        }
    }

    #[test]
    fn test_module_name_for() {
        assert_eq!(
            module_name_for("src/google/adk/tools/__init__.py", Some("src")),
            Some(module("google.adk.tools", true))
        );
        assert_eq!(
            module_name_for("pkg/core.py", None),
            Some(module("pkg.core", false))
        );
        assert_eq!(module_name_for("scripts/run-me.py", None), None);
        assert_eq!(module_name_for("__init__.py", None), None);
        assert_eq!(module_name_for("README.md", None), None);
    }

    #[test]
    fn test_strip_source_root() {
        assert_eq!(strip_source_root("src/lib/core.py", Some("src")), Some("lib/core.py"));
        assert_eq!(strip_source_root("src/lib/core.py", Some("/src/")), Some("lib/core.py"));
        assert_eq!(strip_source_root("tests/test_core.py", Some("src")), None);
        assert_eq!(strip_source_root("srcs/lib.py", Some("src")), None);
        assert_eq!(strip_source_root("setup.py", None), Some("setup.py"));
    }

    #[test]
    fn test_plain_and_aliased_imports() {
        let b = bindings("import os.path\nimport numpy as np\n", None);
        assert_eq!(b.resolve("os.path.join").as_deref(), Some("os.path.join"));
        assert_eq!(b.resolve("np.array").as_deref(), Some("numpy.array"));
        assert_eq!(b.resolve("unknown"), None);
    }

    #[test]
    fn test_from_imports() {
        let b = bindings(
            "from google.genai import types\nfrom google.adk.agents import Agent as A\n",
            None,
        );
        assert_eq!(
            b.resolve("types.GenerateContentConfig").as_deref(),
            Some("google.genai.types.GenerateContentConfig")
        );
        assert_eq!(b.resolve("A").as_deref(), Some("google.adk.agents.Agent"));
    }

    #[test]
    fn test_relative_imports() {
        let pkg = module("google.adk.agents", true);
        let b = bindings("from .llm_agent import LlmAgent\nfrom .. import tools\n", Some(&pkg));
        assert_eq!(
            b.resolve("LlmAgent").as_deref(),
            Some("google.adk.agents.llm_agent.LlmAgent")
        );
        assert_eq!(b.resolve("tools").as_deref(), Some("google.adk.tools"));

        let plain = module("google.adk.agents.base", false);
        let b = bindings("from .callback import Callback\n", Some(&plain));
        assert_eq!(
            b.resolve("Callback").as_deref(),
            Some("google.adk.agents.callback.Callback")
        );
    }

    #[test]
    fn test_relative_import_without_module_is_skipped() {
        let b = bindings("from .x import Y\n", None);
        assert!(b.resolve("Y").is_none());
    }

    #[test]
    fn test_nested_imports_are_collected() {
        let b = bindings("def f():\n    import json\n    return json\n", None);
        assert_eq!(b.resolve("json.dumps").as_deref(), Some("json.dumps"));
    }
}
