use std::sync::Arc;

use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::{
        completion::request::GenerationRequest,
        parameters::{KeepAlive, TimeUnit},
    },
};
use tokio::{sync::Semaphore, time};
use tracing::debug;

use super::{CompletionBackend, OllamaConfig, Task};

/// Completion backend talking to a local Ollama server.
///
/// Requests are serialised through a semaphore so one model runs at a time;
/// backends built with [`OllamaBackend::sharing_lock_with`] queue behind the
/// same permit.
pub struct OllamaBackend {
    name: String,
    client: Ollama,
    config: OllamaConfig,
    lock: Arc<Semaphore>,
}

impl OllamaBackend {
    pub fn new(name: impl Into<String>, config: OllamaConfig) -> Self {
        Self {
            name: name.into(),
            client: Ollama::builder()
                .host(config.host.as_str())
                .port(config.port)
                .build(),
            config,
            lock: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn sharing_lock_with(
        name: impl Into<String>,
        config: OllamaConfig,
        other: &OllamaBackend,
    ) -> Self {
        Self {
            lock: Arc::clone(&other.lock),
            ..Self::new(name, config)
        }
    }

    pub fn model_name(&self, task: Task) -> &str {
        &self.config.tasks.for_task(task).model
    }
}

#[async_trait]
impl CompletionBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, task: Task, prompt: &str) -> Result<String, String> {
        let model_cfg = self.config.tasks.for_task(task);

        let _permit = match time::timeout(self.config.lock_timeout, self.lock.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(e)) => return Err(format!("failed to acquire lock: {e}")),
            Err(_) => {
                return Err(format!(
                    "timeout acquiring lock for model {}",
                    model_cfg.model
                ));
            }
        };

        debug!(
            client = %self.name,
            model = %model_cfg.model,
            prompt_bytes = prompt.len(),
            "ollama_generate"
        );

        let request = GenerationRequest::new(model_cfg.model.clone(), prompt.to_string())
            .keep_alive(KeepAlive::Until {
                time: self.config.keep_alive_minutes,
                unit: TimeUnit::Minutes,
            })
            .options(model_cfg.options());

        self.client
            .generate(request)
            .await
            .map(|response| response.response)
            .map_err(|err| format!("ollama error ({}): {err}", model_cfg.model))
    }
}
