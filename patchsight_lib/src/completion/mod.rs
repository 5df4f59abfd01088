mod config;
mod ollama;
pub mod prompts;
pub mod utils;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time;
use tracing::{info, warn};

use crate::error::{PatchSightError, Result};

pub use config::{CompletionPolicy, OllamaConfig, Task, TaskConfig, TaskProfiles};
pub use ollama::OllamaBackend;

/// A text-completion provider. Errors are plain strings; [`Completer`] turns
/// them into [`PatchSightError::Completion`] once every attempt is spent.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, task: Task, prompt: &str) -> std::result::Result<String, String>;
}

/// Primary backend with retries, then a single fallback attempt.
pub struct Completer {
    primary: Arc<dyn CompletionBackend>,
    fallback: Option<Arc<dyn CompletionBackend>>,
    policy: CompletionPolicy,
}

impl Completer {
    pub fn new(primary: Arc<dyn CompletionBackend>, policy: CompletionPolicy) -> Self {
        Self {
            primary,
            fallback: None,
            policy,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn CompletionBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn name(&self) -> &str {
        self.primary.name()
    }

    pub async fn complete(&self, task: Task, prompt: &str) -> Result<String> {
        self.complete_with(task, prompt, self.policy.timeout, self.policy.max_retries)
            .await
    }

    pub async fn complete_with(
        &self,
        task: Task,
        prompt: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<String> {
        let mut backoff = self.policy.backoff;
        let mut last_error = String::new();

        for attempt in 0..=max_retries {
            match attempt_once(self.primary.as_ref(), task, prompt, timeout).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    warn!(
                        client = self.primary.name(),
                        attempt = attempt + 1,
                        error = %err,
                        "completion attempt failed"
                    );
                    last_error = err;
                }
            }
            if attempt < max_retries {
                time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }

        let Some(fallback) = &self.fallback else {
            return Err(PatchSightError::completion(self.primary.name(), last_error));
        };

        info!(
            client = self.primary.name(),
            fallback = fallback.name(),
            "completion_fallback"
        );
        attempt_once(fallback.as_ref(), task, prompt, timeout)
            .await
            .map_err(|err| {
                PatchSightError::completion(
                    fallback.name(),
                    format!("primary '{}' failed: {last_error}; fallback failed: {err}", self.primary.name()),
                )
            })
    }
}

async fn attempt_once(
    backend: &dyn CompletionBackend,
    task: Task,
    prompt: &str,
    timeout: Duration,
) -> std::result::Result<String, String> {
    match time::timeout(timeout, backend.complete(task, prompt)).await {
        Ok(Ok(output)) => utils::ensure_non_empty(backend.name(), utils::strip_reasoning_tags(&output)),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(format!("request timed out after {}s", timeout.as_secs_f32())),
    }
}

/// Named completers selectable per request.
pub struct CompletionRegistry {
    completers: BTreeMap<String, Arc<Completer>>,
    default_client: String,
}

impl CompletionRegistry {
    pub fn new(default_client: impl Into<String>, completer: Completer) -> Self {
        let default_client = default_client.into();
        let mut completers = BTreeMap::new();
        completers.insert(default_client.clone(), Arc::new(completer));
        Self {
            completers,
            default_client,
        }
    }

    pub fn register(&mut self, selector: impl Into<String>, completer: Completer) {
        self.completers.insert(selector.into(), Arc::new(completer));
    }

    pub fn default_client(&self) -> &str {
        &self.default_client
    }

    pub fn clients(&self) -> impl Iterator<Item = &str> {
        self.completers.keys().map(String::as_str)
    }

    /// Resolves a selector, `None` meaning the default client.
    pub fn resolve(&self, selector: Option<&str>) -> Result<(String, Arc<Completer>)> {
        let selector = selector.unwrap_or(&self.default_client);
        self.completers
            .get(selector)
            .map(|completer| (selector.to_string(), Arc::clone(completer)))
            .ok_or_else(|| PatchSightError::UnknownClient(selector.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Scripted {
        name: &'static str,
        replies: Mutex<Vec<std::result::Result<String, String>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(name: &'static str, replies: Vec<std::result::Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CompletionBackend for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(&self, _task: Task, _prompt: &str) -> std::result::Result<String, String> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err("script exhausted".to_string()))
        }
    }

    fn fast_policy() -> CompletionPolicy {
        CompletionPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let primary = Scripted::new("primary", vec![Err("down"), Ok("<think>hm</think>done")]);
        let completer = Completer::new(primary.clone(), fast_policy());

        let out = completer.complete(Task::Query, "p").await.unwrap();
        assert_eq!(out, "done");
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn falls_back_once_after_retries() {
        let primary = Scripted::new("primary", vec![Err("a"), Err("b"), Err("c")]);
        let fallback = Scripted::new("fallback", vec![Ok("rescued")]);
        let completer = Completer::new(primary.clone(), fast_policy()).with_fallback(fallback.clone());

        let out = completer.complete(Task::FileSummary, "p").await.unwrap();
        assert_eq!(out, "rescued");
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn empty_output_counts_as_failure() {
        let primary = Scripted::new("primary", vec![Ok("<thought>only thinking</thought>")]);
        let completer = Completer::new(primary, fast_policy());

        let err = completer
            .complete_with(Task::Query, "p", Duration::from_secs(1), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PatchSightError::Completion { .. }));
    }

    #[tokio::test]
    async fn terminal_error_names_both_backends() {
        let primary = Scripted::new("primary", vec![Err("x")]);
        let fallback = Scripted::new("fallback", vec![Err("y")]);
        let completer = Completer::new(primary, fast_policy()).with_fallback(fallback);

        let err = completer
            .complete_with(Task::Query, "p", Duration::from_secs(1), 0)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("primary 'primary' failed: x"));
        assert!(message.contains("fallback failed: y"));
    }

    #[test]
    fn registry_rejects_unknown_selector() {
        let primary = Scripted::new("primary", vec![]);
        let mut registry = CompletionRegistry::new("local", Completer::new(primary.clone(), fast_policy()));
        registry.register("remote", Completer::new(primary, fast_policy()));

        assert_eq!(registry.resolve(None).unwrap().0, "local");
        assert_eq!(registry.resolve(Some("remote")).unwrap().0, "remote");
        assert!(matches!(
            registry.resolve(Some("nope")),
            Err(PatchSightError::UnknownClient(name)) if name == "nope"
        ));
        assert_eq!(registry.clients().collect::<Vec<_>>(), vec!["local", "remote"]);
    }
}
