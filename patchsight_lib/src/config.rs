use std::time::Duration;

use crate::completion::{CompletionPolicy, OllamaConfig};

const DEFAULT_MAX_FILE_SIZE: u64 = 1_000_000;
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SourceDiscoveryConfig {
    /// Allowed file extensions, without the leading dot.
    pub extensions: Vec<String>,
    /// Name patterns matched against the last path segment of every directory
    /// and file. `*` matches any run of characters.
    pub exclude_patterns: Vec<String>,
    /// Files larger than this are tracked but never sent for summarisation.
    pub max_file_size: u64,
}

impl Default for SourceDiscoveryConfig {
    fn default() -> Self {
        Self {
            extensions: vec![
                "py", "js", "jsx", "ts", "tsx", "html", "css", "scss", "sass", "php", "rb",
                "java", "go", "rs", "c", "cpp", "h", "hpp", "cs", "swift", "kt", "sql", "xml",
                "sh", "bash", "ps1", "dockerfile", "vue",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            exclude_patterns: vec![
                "node_modules",
                "vendor",
                "__pycache__",
                ".github",
                ".git",
                "venv",
                "env",
                "projects",
                "notused",
                "dist",
                "build",
                "target",
                ".vscode",
                ".idea",
                ".DS_Store",
                "*.pyc",
                "*.pyo",
                "*.md",
                "yarn.lock",
                "LICENSE",
                "*.pyd",
                "*.so",
                "*.dll",
                "*.exe",
                "*.egg-info",
                "*.egg",
                "package-lock.json",
                "*.yaml",
                "dump*",
                "__init__.py",
                ".gitignore",
                ".gitattributes",
                ".gitmodules",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatchSightConfig {
    pub source_discovery: SourceDiscoveryConfig,
    pub completion: CompletionPolicy,
    pub ollama: OllamaConfig,
    /// Model used by the fallback backend once the primary exhausts its retries.
    pub fallback_model: Option<String>,
    /// Modification sessions untouched for longer than this are swept.
    pub session_ttl: Duration,
}

impl Default for PatchSightConfig {
    fn default() -> Self {
        Self {
            source_discovery: SourceDiscoveryConfig::default(),
            completion: CompletionPolicy::default(),
            ollama: OllamaConfig::default(),
            fallback_model: None,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}
