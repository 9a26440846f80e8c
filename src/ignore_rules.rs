//! Eligibility rules deciding which files in the tree get indexed.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//! skip directories, lock files, hidden files, skipped suffixes, unknown
//! extensions, size limits, and finally the `.gitignore` and `.srcbertignore`
//! patterns found at the root. Pattern files are read once, at construction.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{info, warn};

use crate::data_dir::DEFAULT_DATA_DIR_NAME;

/// Tool-specific ignore file, gitignore syntax.
pub const TOOL_IGNORE_FILE: &str = ".srcbertignore";

/// Files larger than this are never indexed.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "mjs", "cjs", "java", "kt", "kts", "go",
    "rs", "rb", "php", "c", "h", "cpp", "hpp", "cc", "cs", "swift", "scala",
    "lua", "r", "m", "mm", "pl", "pm", "sh", "bash", "zsh", "fish", "ps1",
    "bat", "cmd", "sql", "graphql", "gql", "proto",
];

const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "ini", "cfg", "conf", "env", "properties",
    "xml", "plist",
];

const DOC_EXTENSIONS: &[&str] =
    &["md", "mdx", "rst", "txt", "tex", "adoc", "org", "csv", "tsv"];

const WEB_EXTENSIONS: &[&str] = &[
    "html", "htm", "css", "scss", "sass", "less", "vue", "svelte",
];

const OTHER_EXTENSIONS: &[&str] =
    &["dockerfile", "makefile", "cmake", "tf", "hcl", "nix", "dhall"];

/// Extensionless (or dot-prefixed) names that are always worth indexing.
const INDEXABLE_NAMES: &[&str] = &[
    "Makefile",
    "Dockerfile",
    "Rakefile",
    "Gemfile",
    "Procfile",
    "Vagrantfile",
    "CMakeLists.txt",
    "LICENSE",
    "README",
    ".gitignore",
    ".gitattributes",
    ".editorconfig",
    TOOL_IGNORE_FILE,
    ".cursorignore",
    ".prettierrc",
    ".eslintrc",
];

const SKIP_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    ".expo",
    ".next",
    ".nuxt",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".venv",
    "venv",
    "env",
    ".env",
    "dist",
    "build",
    ".build",
    "out",
    "target",
    ".idea",
    ".vscode",
    ".cursor",
    "coverage",
    ".nyc_output",
    ".tox",
    ".nox",
    "vendor",
    DEFAULT_DATA_DIR_NAME,
];

/// Matched with `ends_with` so compound suffixes like `.min.js` are caught.
const SKIP_SUFFIXES: &[&str] = &[
    ".min.js", ".min.css", ".map", ".lock", ".log", ".pyc", ".pyo", ".class",
    ".o", ".so", ".dylib", ".dll", ".exe", ".wasm", ".png", ".jpg", ".jpeg",
    ".gif", ".bmp", ".ico", ".svg", ".webp", ".mp3", ".mp4", ".wav", ".avi",
    ".mov", ".mkv", ".zip", ".tar", ".gz", ".bz2", ".xz", ".rar", ".7z",
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".ttf",
    ".otf", ".woff", ".woff2", ".eot", ".db", ".sqlite", ".sqlite3",
    ".DS_Store",
];

const SKIP_NAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Pipfile.lock",
    "poetry.lock",
    "composer.lock",
    "Gemfile.lock",
    "Cargo.lock",
    "go.sum",
    "uv.lock",
];

/// Why a file was not indexed. `Display` renders the stable reason code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    SkipDir(String),
    SkipName(String),
    Hidden,
    SkipSuffix(&'static str),
    UnknownExt(Option<String>),
    StatError,
    Empty,
    TooLarge { kb: u64 },
    GitIgnored,
    ToolIgnored,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SkipDir(name) => write!(f, "skip-dir:{name}"),
            SkipReason::SkipName(name) => write!(f, "skip-name:{name}"),
            SkipReason::Hidden => f.write_str("hidden"),
            SkipReason::SkipSuffix(suffix) => write!(f, "skip-suffix:{suffix}"),
            SkipReason::UnknownExt(Some(ext)) => {
                write!(f, "unknown-ext:.{ext}")
            }
            SkipReason::UnknownExt(None) => f.write_str("unknown-ext:(none)"),
            SkipReason::StatError => f.write_str("stat-error"),
            SkipReason::Empty => f.write_str("empty"),
            SkipReason::TooLarge { kb } => write!(f, "too-large:{kb}KB"),
            SkipReason::GitIgnored => f.write_str("gitignored"),
            SkipReason::ToolIgnored => f.write_str("srcbertignored"),
        }
    }
}

fn is_indexable_extension(ext: &str) -> bool {
    [
        CODE_EXTENSIONS,
        CONFIG_EXTENSIONS,
        DOC_EXTENSIONS,
        WEB_EXTENSIONS,
        OTHER_EXTENSIONS,
    ]
    .iter()
    .any(|set| set.contains(&ext))
}

/// Per-root eligibility rules.
pub struct IgnoreRules {
    root: PathBuf,
    gitignore: Option<Gitignore>,
    tool_ignore: Option<Gitignore>,
    excluded: Vec<PathBuf>,
}

impl IgnoreRules {
    /// Build the rules for `root`, loading `.gitignore` and `.srcbertignore`
    /// from it if present. A pattern file that fails to parse is logged and
    /// ignored.
    pub fn new(root: &Path) -> Self {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let gitignore = load_patterns(&root, ".gitignore");
        let tool_ignore = load_patterns(&root, TOOL_IGNORE_FILE);
        Self {
            root,
            gitignore,
            tool_ignore,
            excluded: Vec::new(),
        }
    }

    /// Also skip everything under `dir`, reported as `skip-dir:<name>`.
    pub fn excluding(mut self, dir: &Path) -> Self {
        self.excluded
            .push(dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a walk should enter `dir` at all.
    ///
    /// Directories named in the skip set, or lying under an excluded
    /// directory, are pruned whole; their contents are never listed.
    pub fn should_descend(&self, dir: &Path) -> bool {
        if self.excluded.iter().any(|d| dir.starts_with(d)) {
            return false;
        }
        let relative = dir.strip_prefix(&self.root).unwrap_or(dir);
        skip_dir_segment(relative).is_none()
    }

    /// Decide whether `path` should be indexed.
    ///
    /// Returns `None` when the file is eligible, or the first matching
    /// [`SkipReason`] otherwise.
    ///
    /// A path already under the root is judged as given, so a symlink in
    /// the tree is matched by its own location rather than its target's.
    pub fn should_index(&self, path: &Path) -> Option<SkipReason> {
        let path = if path.starts_with(&self.root) {
            path.to_path_buf()
        } else {
            path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
        };
        let relative = path.strip_prefix(&self.root).ok();

        if let Some(dir) = self.excluded.iter().find(|d| path.starts_with(d)) {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Some(SkipReason::SkipDir(name));
        }

        if let Some(dir) = skip_dir_segment(relative.unwrap_or(&path)) {
            return Some(SkipReason::SkipDir(dir));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if SKIP_NAMES.contains(&name.as_str()) {
            return Some(SkipReason::SkipName(name));
        }

        let allowed_name = INDEXABLE_NAMES.contains(&name.as_str());
        if name.starts_with('.') && !allowed_name {
            return Some(SkipReason::Hidden);
        }

        if let Some(suffix) = SKIP_SUFFIXES
            .iter()
            .copied()
            .find(|suffix| name.ends_with(*suffix))
        {
            return Some(SkipReason::SkipSuffix(suffix));
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        let known_ext = ext.as_deref().is_some_and(is_indexable_extension);
        if !known_ext && !allowed_name {
            return Some(SkipReason::UnknownExt(ext));
        }

        match std::fs::metadata(&path) {
            Ok(meta) if meta.len() > MAX_FILE_SIZE => {
                return Some(SkipReason::TooLarge {
                    kb: meta.len() / 1024,
                });
            }
            Ok(meta) if meta.len() == 0 => return Some(SkipReason::Empty),
            Ok(_) => {}
            Err(_) => return Some(SkipReason::StatError),
        }

        let pattern_path = relative.unwrap_or_else(|| Path::new(&name));
        if matches(self.gitignore.as_ref(), pattern_path) {
            return Some(SkipReason::GitIgnored);
        }
        if matches(self.tool_ignore.as_ref(), pattern_path) {
            return Some(SkipReason::ToolIgnored);
        }

        None
    }
}

impl fmt::Debug for IgnoreRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IgnoreRules")
            .field("root", &self.root)
            .field("gitignore", &self.gitignore.is_some())
            .field("tool_ignore", &self.tool_ignore.is_some())
            .finish()
    }
}

/// First segment of `path` that names a skip directory.
fn skip_dir_segment(path: &Path) -> Option<String> {
    path.components().find_map(|component| match component {
        Component::Normal(part) => {
            let part = part.to_string_lossy();
            SKIP_DIRS
                .contains(&part.as_ref())
                .then(|| part.into_owned())
        }
        _ => None,
    })
}

fn matches(patterns: Option<&Gitignore>, relative: &Path) -> bool {
    patterns.is_some_and(|gi| {
        gi.matched_path_or_any_parents(relative, false).is_ignore()
    })
}

fn load_patterns(root: &Path, file_name: &str) -> Option<Gitignore> {
    let path = root.join(file_name);
    if !path.is_file() {
        return None;
    }

    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(&path) {
        warn!("failed to parse {file_name}: {err}");
        return None;
    }
    match builder.build() {
        Ok(gitignore) => {
            info!("loaded {file_name} ({} patterns)", gitignore.num_ignores());
            Some(gitignore)
        }
        Err(err) => {
            warn!("failed to parse {file_name}: {err}");
            None
        }
    }
}
