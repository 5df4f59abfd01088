//! Shared fixtures for patchsight integration tests.
//!
//! Every fixture owns throwaway storage and source roots and answers model
//! calls through [`Scripted`], so no test talks to a real server.

#![allow(dead_code)]

use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use patchsight::{
    PatchSight, PatchSightConfig,
    completion::{Completer, CompletionBackend, CompletionPolicy, CompletionRegistry, Task},
    project_manager::ProjectManager,
};
use tempfile::{TempDir, tempdir};

pub const CLIENT: &str = "scripted";

pub const SUMMARY_REPLY: &str =
    "<detailed>Reads input and prints it.</detailed>\n<concise>Prints things.</concise>";
pub const PROJECT_REPLY: &str = "A small demo project.";

type Reply = Box<dyn Fn(Task, &str) -> Result<String, String> + Send + Sync>;

/// Answers each call with a closure of the task and prompt, recording the task.
pub struct Scripted {
    reply: Reply,
    calls: Mutex<Vec<Task>>,
}

impl Scripted {
    pub fn new<F>(reply: F) -> Arc<Self>
    where
        F: Fn(Task, &str) -> Result<String, String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            reply: Box::new(reply),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Summaries succeed; query and modification calls return the given text.
    pub fn answering(query: &'static str, modification: &'static str) -> Arc<Self> {
        Self::new(move |task, _prompt| match task {
            Task::FileSummary => Ok(SUMMARY_REPLY.to_string()),
            Task::ProjectSummary => Ok(PROJECT_REPLY.to_string()),
            Task::Query => Ok(query.to_string()),
            Task::Modification => Ok(modification.to_string()),
        })
    }

    pub fn calls(&self, task: Task) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| **called == task)
            .count()
    }
}

#[async_trait]
impl CompletionBackend for Scripted {
    fn name(&self) -> &str {
        CLIENT
    }

    async fn complete(&self, task: Task, prompt: &str) -> Result<String, String> {
        self.calls.lock().unwrap().push(task);
        (self.reply)(task, prompt)
    }
}

pub struct Fixture {
    _storage: TempDir,
    pub source: TempDir,
    pub app: PatchSight,
    pub backend: Arc<Scripted>,
}

impl Fixture {
    pub fn root(&self) -> &Path {
        self.source.path()
    }

    pub fn write(&self, relative: &str, content: &str) {
        write_file(self.source.path(), relative, content);
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.source.path().join(relative)).unwrap()
    }
}

pub fn fixture(files: &[(&str, &str)], backend: Arc<Scripted>) -> Fixture {
    fixture_with(files, backend, |_| {})
}

pub fn fixture_with(
    files: &[(&str, &str)],
    backend: Arc<Scripted>,
    configure: impl FnOnce(&mut PatchSightConfig),
) -> Fixture {
    let storage = tempdir().unwrap();
    let source = tempdir().unwrap();
    for (relative, content) in files {
        write_file(source.path(), relative, content);
    }

    let mut config = PatchSightConfig::default();
    config.source_discovery.extensions = vec!["py".to_string()];
    config.completion = CompletionPolicy {
        timeout: Duration::from_secs(5),
        max_retries: 0,
        backoff: Duration::from_millis(1),
    };
    configure(&mut config);

    let completer = Completer::new(backend.clone(), config.completion.clone());
    let registry = CompletionRegistry::new(CLIENT, completer);
    let ctx = ProjectManager::new(storage.path()).new_project("demo", source.path());
    let app = PatchSight::new(config, ctx, registry);
    app.init().unwrap();

    Fixture {
        _storage: storage,
        source,
        app,
        backend,
    }
}

pub fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}
