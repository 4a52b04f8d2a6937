//! The remote todo service (a Todoist-style REST API)
//!
//! Incremental reads go through the service's sync protocol: every read returns an opaque
//! token, and presenting that token next time yields only the delta since. The service
//! cannot fold completed items into that delta, so they come from a separate time-based
//! feed and are merged into the result.

use std::collections::HashMap;
use std::error::Error;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use url::Url;

use crate::rest::{expect_json, str_of, ApiError};
use crate::task::Task;
use crate::traits::TaskSource;

static SYNC_ENDPOINT: Lazy<Url> = Lazy::new(|| {
    Url::parse("https://api.todoist.com/sync/v9/").unwrap(/* the constant is a valid URL */)
});
static REST_ENDPOINT: Lazy<Url> = Lazy::new(|| {
    Url::parse("https://api.todoist.com/rest/v2/").unwrap(/* the constant is a valid URL */)
});

/// A client for the todo service.
pub struct TodoistClient {
    api_key: String,
    http: reqwest::Client,
}

impl TodoistClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
        }
    }

    async fn get(&self, url: Url, query: &[(&str, &str)]) -> Result<Value, Box<dyn Error>> {
        log::debug!("GET {} {:?}", url, query);
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        expect_json(response).await
    }

    async fn post(&self, url: Url, body: Value) -> Result<Value, Box<dyn Error>> {
        log::debug!("POST {} {}", url, body);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        expect_json(response).await
    }

    /// The service's projects, as an id → name map.
    async fn projects(&self) -> Result<HashMap<String, String>, Box<dyn Error>> {
        let data = self
            .get(SYNC_ENDPOINT.join("sync")?, &[("resource_types", r#"["projects"]"#)])
            .await?;

        let mut projects = HashMap::new();
        for project in data["projects"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
            projects.insert(id_of(&project["id"]), str_of(project, "name"));
        }
        Ok(projects)
    }

    /// The completed-items feed, since `since` (everything when `None`).
    async fn completed_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Value>, Box<dyn Error>> {
        let mut query = Vec::new();
        let since_str;
        if let Some(since) = since {
            since_str = since.format("%Y-%m-%dT%H:%M:%S").to_string();
            query.push(("since", since_str.as_str()));
        }

        let data = self.get(SYNC_ENDPOINT.join("completed/get_all")?, &query).await?;
        Ok(data["items"].as_array().cloned().unwrap_or_default())
    }
}

#[async_trait]
impl TaskSource for TodoistClient {
    async fn read_delta(
        &self,
        sync_token: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<(Vec<Task>, String), Box<dyn Error>> {
        let projects = self.projects().await?;
        let mut tasks = Vec::new();

        for item in self.completed_since(since).await? {
            tasks.push(Task::completed(id_of(&item["id"]), str_of(&item, "content")));
        }

        let data = self
            .get(
                SYNC_ENDPOINT.join("sync")?,
                &[
                    ("sync_token", sync_token.unwrap_or("*")),
                    ("resource_types", r#"["items"]"#),
                ],
            )
            .await?;

        let new_token = data["sync_token"]
            .as_str()
            .ok_or("No sync_token in the service's response")?
            .to_string();

        for item in data["items"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
            tasks.push(task_from_item(item, &projects));
        }

        Ok((tasks, new_token))
    }

    async fn create(&self, task: &Task) -> Result<String, Box<dyn Error>> {
        let data = self.post(REST_ENDPOINT.join("tasks")?, task_payload(task)).await?;
        let id = id_of(&data["id"]);
        if id.is_empty() {
            return Err("No id in the service's response to a task creation".into());
        }
        Ok(id)
    }

    async fn update(&self, task: &Task) -> Result<(), Box<dyn Error>> {
        let url = REST_ENDPOINT.join("tasks/")?.join(task.id())?;
        self.post(url, task_payload(task)).await?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, Box<dyn Error>> {
        let url = REST_ENDPOINT.join("tasks/")?.join(id)?;
        let response = self.http.get(url).bearer_auth(&self.api_key).send().await?;

        match response.status().as_u16() {
            404 => Ok(false),
            _ if response.status().is_success() => Ok(true),
            status => {
                let payload = response.json().await.unwrap_or(Value::Null);
                Err(Box::new(ApiError { status, payload }))
            }
        }
    }
}

/// The service's ids are strings nowadays, but numeric ids still show up in old data
fn id_of(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.as_u64().map(|n| n.to_string()).unwrap_or_default(),
    }
}

/// Normalize one raw item of the delta feed.
fn task_from_item(item: &Value, projects: &HashMap<String, String>) -> Task {
    let is_deleted = item["is_deleted"].as_bool().unwrap_or(false);

    let mut due = None;
    let mut recurrence = None;
    if is_deleted == false {
        if let Some(due_obj) = item["due"].as_object() {
            due = due_obj
                .get("date")
                .and_then(|d| d.as_str())
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
            if due_obj.get("is_recurring").and_then(|r| r.as_bool()).unwrap_or(false) {
                recurrence = due_obj.get("string").and_then(|s| s.as_str()).map(String::from);
            }
        }
    }

    let labels = item["labels"]
        .as_array()
        .map(|a| a.iter().filter_map(|l| l.as_str()).map(String::from).collect())
        .unwrap_or_default();

    let project = item["project_id"]
        .as_str()
        .and_then(|id| projects.get(id).cloned());

    Task::new(
        id_of(&item["id"]),
        str_of(item, "content"),
        str_of(item, "description"),
        item["priority"].as_u64().unwrap_or(1) as u8,
        due,
        project,
        labels,
        item["checked"].as_bool().unwrap_or(false),
        is_deleted,
        recurrence,
    )
}

/// The request body of a task creation/update.
fn task_payload(task: &Task) -> Value {
    let mut payload = json!({
        "content": task.content(),
        "description": task.description(),
        "priority": task.priority(),
        "labels": task.labels(),
    });

    // A recurrence rule has to go through the service's natural-language field; a plain due
    // date can be passed as-is
    if let Some(recurrence) = task.recurrence() {
        payload["due_string"] = json!(recurrence);
    } else if let Some(due) = task.due() {
        payload["due_date"] = json!(due.format("%Y-%m-%d").to_string());
    }

    payload
}
