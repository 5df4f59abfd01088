use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    completion::{Completer, Task, prompts, utils},
    error::{PatchSightError, Result},
    file_walker::normalize_relative_path,
    format_duration,
    project_manager::ProjectContext,
};

/// One file the model picked for a query, with what should change in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInstruction {
    pub file_path: String,
    #[serde(default)]
    pub concise_summary: String,
    #[serde(default)]
    pub instructions_to_modify: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub input_query: String,
    pub client: String,
    pub recommendations: Vec<FileInstruction>,
    /// Why the response could not be read as a recommendation list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub raw_response: String,
    /// Seconds spent waiting for the model.
    pub response_time: f64,
}

impl QueryEntry {
    /// Recommendations that name a file and carry instructions.
    pub fn actionable(&self) -> impl Iterator<Item = &FileInstruction> {
        self.recommendations.iter().filter(|item| {
            !item.file_path.trim().is_empty() && !item.instructions_to_modify.trim().is_empty()
        })
    }
}

pub struct QueryHandler<'a> {
    ctx: &'a ProjectContext,
}

impl<'a> QueryHandler<'a> {
    pub fn new(ctx: &'a ProjectContext) -> Self {
        Self { ctx }
    }

    /// Asks `completer` which files a request touches and records the answer
    /// in the query history. A response that is not a recommendation list is
    /// still recorded, with `parse_error` set.
    pub async fn process_query(
        &self,
        input_query: &str,
        client: &str,
        completer: &Completer,
    ) -> Result<QueryEntry> {
        let store = self.ctx.load_summary()?.ok_or_else(|| {
            PatchSightError::InvalidState(format!(
                "project '{}' has not been summarized yet",
                self.ctx.project_name()
            ))
        })?;

        let file_summaries: Vec<(&str, &str)> = store
            .files
            .iter()
            .map(|(path, entry)| {
                let concise = if entry.is_error() || entry.concise_summary.is_empty() {
                    "No concise summary available."
                } else {
                    entry.concise_summary.as_str()
                };
                (path.as_str(), concise)
            })
            .collect();
        let project_summary = if store.project_summary.trim().is_empty() {
            "No project summary available."
        } else {
            store.project_summary.as_str()
        };
        let prompt = prompts::build_query_prompt(input_query, project_summary, &file_summaries);

        info!(project = %self.ctx.project_name(), client, "process_query");
        let start = Instant::now();
        let raw_response = completer.complete(Task::Query, &prompt).await?;
        let elapsed = start.elapsed();

        let (recommendations, parse_error) = match parse_recommendations(&raw_response) {
            Ok(items) => (items, None),
            Err(reason) => {
                warn!(project = %self.ctx.project_name(), client, reason = %reason, "query response not parseable");
                (Vec::new(), Some(reason))
            }
        };

        let entry = QueryEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            input_query: input_query.to_string(),
            client: client.to_string(),
            recommendations,
            parse_error,
            raw_response,
            response_time: elapsed.as_secs_f64(),
        };

        {
            let _lock = self.ctx.lock()?;
            let mut history = self.ctx.load_query_history()?;
            history.push(entry.clone());
            self.ctx.save_query_history(&history)?;
            self.ctx.modify_record(|record| record.query_count += 1)?;
        }

        info!(
            query_id = %entry.id,
            recommendations = entry.recommendations.len(),
            elapsed = %format_duration(elapsed),
            "query recorded"
        );
        Ok(entry)
    }

    pub fn list_queries(&self) -> Result<Vec<QueryEntry>> {
        self.ctx.load_query_history()
    }

    pub fn find_query(&self, query_id: &str) -> Result<QueryEntry> {
        self.ctx
            .load_query_history()?
            .into_iter()
            .find(|entry| entry.id == query_id)
            .ok_or_else(|| PatchSightError::QueryNotFound(query_id.to_string()))
    }

    pub fn delete_query(&self, query_id: &str) -> Result<()> {
        let _lock = self.ctx.lock()?;
        let mut history = self.ctx.load_query_history()?;
        let before = history.len();
        history.retain(|entry| entry.id != query_id);
        if history.len() == before {
            return Err(PatchSightError::QueryNotFound(query_id.to_string()));
        }
        self.ctx.save_query_history(&history)?;
        info!(query_id, "query deleted");
        Ok(())
    }
}

/// Reads a model answer as a list of file instructions. A single object is
/// accepted as a one-element list; elements without a `file_path` are dropped.
pub fn parse_recommendations(raw: &str) -> std::result::Result<Vec<FileInstruction>, String> {
    let cleaned = utils::strip_reasoning_tags(raw);
    let value = utils::extract_json_value(&cleaned)
        .ok_or_else(|| "response contained no JSON".to_string())?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) if map.contains_key("file_path") => vec![Value::Object(map)],
        _ => return Err("response JSON was not a list of file instructions".to_string()),
    };

    let recommendations: Vec<FileInstruction> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<FileInstruction>(item).ok())
        .filter(|item| !item.file_path.trim().is_empty())
        .map(|mut item| {
            item.file_path = normalize_relative_path(&item.file_path);
            item
        })
        .collect();

    if recommendations.is_empty() {
        return Err("response JSON held no usable file instructions".to_string());
    }
    Ok(recommendations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_fenced_list() {
        let raw = "```json\n[{\"file_path\": \"lib\\\\a.py\", \"concise_summary\": \"s\", \"instructions_to_modify\": \"do it\"}]\n```";
        assert_eq!(
            parse_recommendations(raw).unwrap(),
            vec![FileInstruction {
                file_path: "lib/a.py".to_string(),
                concise_summary: "s".to_string(),
                instructions_to_modify: "do it".to_string(),
            }]
        );
    }

    #[test]
    fn wraps_single_object() {
        let raw = "{\"file_path\": \"a.py\", \"instructions_to_modify\": \"x\"}";
        let parsed = parse_recommendations(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].concise_summary, "");
    }

    #[test]
    fn drops_elements_without_path() {
        let raw = "[{\"note\": 1}, {\"file_path\": \"b.py\"}]";
        let parsed = parse_recommendations(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].file_path, "b.py");
    }

    #[test]
    fn prose_is_a_parse_error() {
        assert!(parse_recommendations("I would change main.py").is_err());
        assert!(parse_recommendations("{\"result\": \"nope\"}").is_err());
    }
}
