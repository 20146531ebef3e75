use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::Result;
use crate::languages::LanguageRegistry;

/// Files larger than this are treated as generated and skipped.
const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

pub struct FileWalker {
    registry: LanguageRegistry,
}

impl FileWalker {
    pub fn new(registry: LanguageRegistry) -> Self {
        Self { registry }
    }

    /// Returns every supported source file under `root`, sorted by path.
    /// A `.pyi` stub is left out when its `.py` module sits next to it, so a
    /// stubbed module is counted once.
    pub fn walk(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .ignore(true)
            .follow_links(false)
            .max_filesize(Some(MAX_FILE_SIZE))
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            if path.is_file() && self.is_supported(path) {
                files.push(path.to_path_buf());
            }
        }

        let modules: HashSet<PathBuf> = files
            .iter()
            .filter(|f| f.extension().is_some_and(|e| e == "py"))
            .cloned()
            .collect();
        files.retain(|f| {
            f.extension().map_or(true, |e| e != "pyi") || !modules.contains(&f.with_extension("py"))
        });

        files.sort();
        Ok(files)
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.registry.get_for_file(path).is_some()
    }
}

/// Path of `file` relative to `root` with `/` separators.
pub fn relative_path(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
