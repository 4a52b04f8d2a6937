//! The sink (a Notion-style workspace)
//!
//! Events and tasks live as pages in two databases; a third database holds the projects
//! both of them point at through relations. The mapping between canonical records and the
//! sink's page-property schema lives here, in both directions: the task reconciler also
//! reads edited task pages back for its push phase.
//!
//! The scale conversions happen at this boundary only: the todo service counts priority
//! 1 (normal) to 4 (urgent), while the workspace displays the inverted scale, and labels
//! are stored snake_case remotely but displayed capitalized.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use url::Url;

use crate::event::Event;
use crate::rest::expect_json;
use crate::task::{SinkTask, Task};
use crate::traits::{EventSink, TaskSink};

static ENDPOINT: Lazy<Url> = Lazy::new(|| {
    Url::parse("https://api.notion.com/v1/").unwrap(/* the constant is a valid URL */)
});
const API_VERSION: &str = "2022-06-28";

const EVENT_ICON: &str = "https://www.notion.so/icons/calendar_gray.svg?mode=dark";
const BODY_ICON: &str = "https://www.notion.so/icons/drafts_gray.svg?mode=dark";

/// A client for the sink workspace.
pub struct NotionClient {
    api_key: String,
    calendar_db: String,
    tasks_db: String,
    projects_db: String,
    timezone: Tz,
    http: reqwest::Client,

    /// project name → project page id, fetched lazily and kept for the client's lifetime
    projects: Mutex<Option<HashMap<String, String>>>,
}

impl NotionClient {
    pub fn new(
        api_key: String,
        calendar_db: String,
        tasks_db: String,
        projects_db: String,
        timezone: Tz,
    ) -> Self {
        Self {
            api_key,
            calendar_db,
            tasks_db,
            projects_db,
            timezone,
            http: reqwest::Client::new(),
            projects: Mutex::new(None),
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, Box<dyn Error>> {
        let url = ENDPOINT.join(path)?;
        log::debug!("{} {}", method, url);
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header("Notion-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(&body);
        }
        expect_json(request.send().await?).await
    }

    async fn query_db(&self, db_id: &str, body: Value) -> Result<Vec<Value>, Box<dyn Error>> {
        let data = self
            .request(reqwest::Method::POST, &format!("databases/{}/query", db_id), Some(body))
            .await?;
        Ok(data["results"].as_array().cloned().unwrap_or_default())
    }

    /// Find a page by its external id property. Returns the page id.
    async fn find_in_db(&self, db_id: &str, external_id: &str) -> Result<Option<String>, Box<dyn Error>> {
        let results = self
            .query_db(
                db_id,
                json!({ "filter": { "property": "Id", "rich_text": { "equals": external_id } } }),
            )
            .await?;
        Ok(results.first().and_then(|page| page["id"].as_str()).map(String::from))
    }

    /// The project name → page id map, fetching it on first use.
    async fn project_ids(&self) -> Result<HashMap<String, String>, Box<dyn Error>> {
        if let Some(projects) = &*self.projects.lock().unwrap() {
            return Ok(projects.clone());
        }

        let results = self.query_db(&self.projects_db, json!({})).await?;
        let mut projects = HashMap::new();
        for page in &results {
            let name = plain_text(&page["properties"]["Name"]["title"]);
            if let (Some(name), Some(id)) = (name, page["id"].as_str()) {
                projects.insert(name, id.to_string());
            }
        }

        *self.projects.lock().unwrap() = Some(projects.clone());
        Ok(projects)
    }

    /// The relation value pointing at `project`, empty when the project is unknown here.
    async fn project_relation(&self, project: Option<&str>) -> Result<Value, Box<dyn Error>> {
        let projects = self.project_ids().await?;
        let ids: Vec<Value> = project
            .and_then(|name| projects.get(name))
            .map(|id| vec![json!({ "id": id })])
            .unwrap_or_default();
        Ok(Value::Array(ids))
    }

    /// The page's body text (the reverse of the description paragraph written on create).
    async fn page_description(&self, page_id: &str) -> Result<String, Box<dyn Error>> {
        let data = self
            .request(reqwest::Method::GET, &format!("blocks/{}/children", page_id), None)
            .await?;

        let mut paragraphs = Vec::new();
        for block in data["results"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
            if block["type"].as_str() == Some("paragraph") {
                if let Some(text) = plain_text(&block["paragraph"]["rich_text"]) {
                    paragraphs.push(text);
                }
            }
        }
        Ok(paragraphs.join("\n"))
    }

    async fn create_page(&self, db_id: &str, properties: Value, children: Vec<Value>, icon: Option<Value>) -> Result<(), Box<dyn Error>> {
        let mut body = json!({
            "parent": { "database_id": db_id },
            "properties": properties,
        });
        if children.is_empty() == false {
            body["children"] = Value::Array(children);
        }
        if let Some(icon) = icon {
            body["icon"] = icon;
        }
        self.request(reqwest::Method::POST, "pages", Some(body)).await?;
        Ok(())
    }

    // TODO: also rewrite the page content on update (needs the block endpoints; the
    // properties endpoint cannot touch children)
    async fn update_page(&self, page_id: &str, properties: Value, icon: Option<Value>) -> Result<(), Box<dyn Error>> {
        let mut body = json!({ "properties": properties });
        if let Some(icon) = icon {
            body["icon"] = icon;
        }
        self.request(reqwest::Method::PATCH, &format!("pages/{}", page_id), Some(body))
            .await?;
        Ok(())
    }

    async fn delete_page(&self, page_id: &str) -> Result<(), Box<dyn Error>> {
        self.request(reqwest::Method::DELETE, &format!("blocks/{}", page_id), None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for NotionClient {
    async fn find_event(&self, id: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.find_in_db(&self.calendar_db, id).await
    }

    async fn create_event(&self, event: &Event) -> Result<(), Box<dyn Error>> {
        let mut properties = event_properties(event, self.timezone);
        properties["Project"] = json!({ "relation": self.project_relation(event.project()).await? });
        self.create_page(&self.calendar_db, properties, event_children(event), Some(icon(EVENT_ICON)))
            .await
    }

    async fn update_event(&self, internal_id: &str, event: &Event) -> Result<(), Box<dyn Error>> {
        let mut properties = event_properties(event, self.timezone);
        properties["Project"] = json!({ "relation": self.project_relation(event.project()).await? });
        self.update_page(internal_id, properties, Some(icon(EVENT_ICON))).await
    }

    async fn delete_event(&self, internal_id: &str) -> Result<(), Box<dyn Error>> {
        self.delete_page(internal_id).await
    }
}

#[async_trait]
impl TaskSink for NotionClient {
    async fn find_task(&self, id: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.find_in_db(&self.tasks_db, id).await
    }

    async fn create_task(&self, task: &Task) -> Result<(), Box<dyn Error>> {
        let mut properties = task_properties(task);
        properties["Project"] = json!({ "relation": self.project_relation(task.project()).await? });
        self.create_page(&self.tasks_db, properties, task_children(task), None).await
    }

    async fn update_task(&self, internal_id: &str, task: &Task) -> Result<(), Box<dyn Error>> {
        let mut properties = task_properties(task);
        properties["Project"] = json!({ "relation": self.project_relation(task.project()).await? });
        self.update_page(internal_id, properties, None).await
    }

    async fn delete_task(&self, internal_id: &str) -> Result<(), Box<dyn Error>> {
        self.delete_page(internal_id).await
    }

    async fn update_task_id(&self, internal_id: &str, new_id: &str) -> Result<(), Box<dyn Error>> {
        self.update_page(internal_id, json!({ "Id": { "rich_text": rich_text(new_id) } }), None)
            .await
    }

    async fn tasks_edited_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SinkTask>, Box<dyn Error>> {
        let mut conditions = vec![json!({
            "timestamp": "last_edited_time",
            "last_edited_time": { "before": to.to_rfc3339() }
        })];
        if let Some(from) = from {
            conditions.push(json!({
                "timestamp": "last_edited_time",
                "last_edited_time": { "on_or_after": from.to_rfc3339() }
            }));
        }

        let pages = self
            .query_db(&self.tasks_db, json!({ "filter": { "and": conditions } }))
            .await?;

        let projects = self.project_ids().await?;
        let projects_by_id: HashMap<String, String> =
            projects.into_iter().map(|(name, id)| (id, name)).collect();

        let mut tasks = Vec::new();
        for page in &pages {
            let internal_id = match page["id"].as_str() {
                Some(id) => id,
                None => {
                    log::warn!("Task page without an id in the sink's response, ignoring it");
                    continue;
                }
            };
            let description = self.page_description(internal_id).await?;
            let project = page["properties"]["Project"]["relation"][0]["id"]
                .as_str()
                .and_then(|id| projects_by_id.get(id).cloned());
            tasks.push(sink_task_from_page(page, internal_id, project, description));
        }

        Ok(tasks)
    }
}

fn icon(url: &str) -> Value {
    json!({ "type": "external", "external": { "url": url } })
}

fn rich_text(content: &str) -> Value {
    json!([{ "text": { "content": content } }])
}

/// The concatenated plain text of a rich-text (or title) property value
fn plain_text(prop: &Value) -> Option<String> {
    let fragments = prop.as_array()?;
    if fragments.is_empty() {
        return None;
    }
    let text: String = fragments
        .iter()
        .map(|f| {
            f["plain_text"]
                .as_str()
                .or_else(|| f["text"]["content"].as_str())
                .unwrap_or_default()
        })
        .collect();
    Some(text)
}

/// The page properties of a calendar event (the project relation is filled in by the
/// client, which knows the project page ids).
fn event_properties(event: &Event, timezone: Tz) -> Value {
    let start = event.start().with_timezone(&timezone);
    let end = event.end().with_timezone(&timezone);

    json!({
        "Id": { "rich_text": rich_text(event.id()) },
        "Name": { "title": rich_text(event.subject()) },
        "Date": { "date": { "start": start.date_naive().to_string() } },
        "Span": { "date": {
            "start": start.to_rfc3339(),
            "end": end.to_rfc3339(),
            "time_zone": timezone.name(),
        } },
        "Tags": { "multi_select": [{ "name": "Meeting" }] },
        "Hours": { "number": event.duration_hours() },
    })
}

/// The body of an event becomes a callout block under the page.
fn event_children(event: &Event) -> Vec<Value> {
    if event.body().is_empty() {
        return Vec::new();
    }
    vec![json!({
        "object": "block",
        "type": "callout",
        "callout": {
            "icon": icon(BODY_ICON),
            "color": "gray_background",
            "rich_text": [{ "type": "text", "text": { "content": event.body() } }],
        }
    })]
}

/// The page properties of a task (project relation filled in by the client).
fn task_properties(task: &Task) -> Value {
    let mut properties = json!({
        "Id": { "rich_text": rich_text(task.id()) },
        "Name": { "title": rich_text(task.content()) },
        "Done": { "checkbox": task.checked() },
        "Tags": { "multi_select":
            task.labels().iter().map(|l| json!({ "name": display_label(l) })).collect::<Vec<_>>()
        },
    });

    if let Some(priority) = display_priority(task.priority()) {
        properties["Priority"] = json!({ "select": { "name": priority.to_string() } });
    }
    if let Some(due) = task.due() {
        properties["Date"] = json!({ "date": { "start": due.to_string() } });
    }
    if let Some(recurrence) = task.recurrence() {
        properties["Recurrence"] = json!({ "rich_text": rich_text(recurrence) });
    }

    properties
}

fn task_children(task: &Task) -> Vec<Value> {
    if task.description().is_empty() {
        return Vec::new();
    }
    vec![json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": {
            "rich_text": [{ "type": "text", "text": { "content": task.description() } }]
        }
    })]
}

/// Read a task page back into a canonical record.
fn sink_task_from_page(page: &Value, internal_id: &str, project: Option<String>, description: String) -> SinkTask {
    let properties = &page["properties"];

    let remote_id = plain_text(&properties["Id"]["rich_text"]);
    let content = plain_text(&properties["Name"]["title"]).unwrap_or_default();

    let priority = canonical_priority(
        properties["Priority"]["select"]["name"]
            .as_str()
            .and_then(|name| name.parse().ok()),
    );

    let due = properties["Date"]["date"]["start"]
        .as_str()
        .and_then(|date| date.get(..10))
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok());

    let labels = properties["Tags"]["multi_select"]
        .as_array()
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t["name"].as_str())
                .map(canonical_label)
                .collect()
        })
        .unwrap_or_default();

    let task = Task::new(
        remote_id.clone().unwrap_or_default(),
        content,
        description,
        priority,
        due,
        project,
        labels,
        properties["Done"]["checkbox"].as_bool().unwrap_or(false),
        page["archived"].as_bool().unwrap_or(false),
        plain_text(&properties["Recurrence"]["rich_text"]),
    );

    SinkTask::new(internal_id.to_string(), remote_id, task)
}

/// The priority as the sink displays it: the inverted scale, and nothing at all for a
/// normal-priority task.
fn display_priority(priority: u8) -> Option<u8> {
    if priority > 1 {
        Some(5 - priority.min(4))
    } else {
        None
    }
}

/// The inverse of [`display_priority`]
fn canonical_priority(select: Option<u8>) -> u8 {
    match select {
        Some(s) if s >= 1 && s <= 4 => 5 - s,
        _ => 1,
    }
}

/// `in_progress` → `In progress`
fn display_label(label: &str) -> String {
    let spaced = label.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// The inverse of [`display_label`]
fn canonical_label(label: &str) -> String {
    label.replace(' ', "_").to_lowercase()
}
