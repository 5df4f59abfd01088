use std::time::Duration;

use ollama_rs::models::ModelOptions;

const DEFAULT_MODEL: &str = "phi4-mini:3.8b";
const DEFAULT_HOST: &str = "http://localhost";
const DEFAULT_PORT: u16 = 11434;

/// Which kind of request a prompt belongs to; selects the model profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    FileSummary,
    ProjectSummary,
    Query,
    Modification,
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub model: String,
    pub temperature: f32,
    pub num_ctx: u64,
    pub num_predict: i32,
}

impl TaskConfig {
    fn with_defaults(temperature: f32, num_ctx: u64, num_predict: i32) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature,
            num_ctx,
            num_predict,
        }
    }

    pub fn options(&self) -> ModelOptions {
        ModelOptions::default()
            .temperature(self.temperature)
            .num_ctx(self.num_ctx)
            .num_predict(self.num_predict)
    }
}

#[derive(Debug, Clone)]
pub struct TaskProfiles {
    pub file_summary: TaskConfig,
    pub project_summary: TaskConfig,
    pub query: TaskConfig,
    pub modification: TaskConfig,
}

impl TaskProfiles {
    pub fn for_task(&self, task: Task) -> &TaskConfig {
        match task {
            Task::FileSummary => &self.file_summary,
            Task::ProjectSummary => &self.project_summary,
            Task::Query => &self.query,
            Task::Modification => &self.modification,
        }
    }

    pub fn set_model_for_all(&mut self, model: impl Into<String>) {
        let model = model.into();
        self.file_summary.model = model.clone();
        self.project_summary.model = model.clone();
        self.query.model = model.clone();
        self.modification.model = model;
    }
}

impl Default for TaskProfiles {
    fn default() -> Self {
        Self {
            file_summary: TaskConfig::with_defaults(0.2, 8192, 900),
            project_summary: TaskConfig::with_defaults(0.1, 8192, 900),
            query: TaskConfig::with_defaults(0.1, 8192, 1200),
            // Whole files come back verbatim, so leave generation unbounded.
            modification: TaskConfig::with_defaults(0.1, 16384, -1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
    pub lock_timeout: Duration,
    pub keep_alive_minutes: u64,
    pub tasks: TaskProfiles,
}

impl OllamaConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.tasks.set_model_for_all(model);
        self
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            lock_timeout: Duration::from_secs(30),
            keep_alive_minutes: 30,
            tasks: TaskProfiles::default(),
        }
    }
}

/// Retry envelope wrapped around every completion call.
#[derive(Debug, Clone)]
pub struct CompletionPolicy {
    /// Upper bound for a single attempt.
    pub timeout: Duration,
    /// Attempts against the primary backend after the first one.
    pub max_retries: u32,
    /// Sleep before the first retry; doubled after each further failure.
    pub backoff: Duration,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 2,
            backoff: Duration::from_secs(2),
        }
    }
}
