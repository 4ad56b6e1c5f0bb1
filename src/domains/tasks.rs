//! Task tracker facade.

use super::Domain;

tool_schema! {
    /// Filters for `get_tasks`; every field is optional.
    #[derive(Default)]
    GetTasks => "get_tasks" -> serde_json::Value {
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        priority: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    }
}

tool_schema! {
    #[derive(Default)]
    CreateTask => "create_task" -> serde_json::Value {
        title: String,
        priority: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        due_date: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tags: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_hours: Option<f64>,
    }
}

tool_schema! {
    /// `changes` are sent next to `task_id`, not nested.
    UpdateTask => "update_task" -> serde_json::Value {
        task_id: String,
        #[serde(flatten)]
        changes: serde_json::Map<String, serde_json::Value>,
    }
}

tool_schema! {
    GetTaskStats => "get_task_stats" -> serde_json::Value {}
}

domain_client!(TasksClient, Domain::Tasks);

impl TasksClient {
    pub async fn get_tasks(&self, filter: GetTasks) -> Option<serde_json::Value> {
        self.answer(&filter).await
    }

    pub async fn create_task(&self, task: CreateTask) -> Option<serde_json::Value> {
        self.answer(&task).await
    }

    pub async fn update_task(
        &self,
        task_id: &str,
        changes: serde_json::Map<String, serde_json::Value>,
    ) -> Option<serde_json::Value> {
        self.answer(&UpdateTask {
            task_id: task_id.to_string(),
            changes,
        })
        .await
    }

    pub async fn get_stats(&self) -> Option<serde_json::Value> {
        self.answer(&GetTaskStats {}).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::test_support::echo_client;

    #[tokio::test]
    async fn test_get_tasks_sends_only_set_filters() {
        let (client, _handle) = echo_client("tasks").await;
        let tasks = TasksClient::new(client);

        let echoed = tasks
            .get_tasks(GetTasks {
                status: Some("in_progress".into()),
                ..GetTasks::default()
            })
            .await
            .unwrap();
        assert_eq!(echoed["arguments"], serde_json::json!({"status": "in_progress"}));
    }

    #[tokio::test]
    async fn test_create_and_update() {
        let (client, _handle) = echo_client("tasks").await;
        let tasks = TasksClient::new(client);

        let echoed = tasks
            .create_task(CreateTask {
                title: "Rotate ssh keys".into(),
                priority: "high".into(),
                tags: Some(vec!["ops".into()]),
                estimated_hours: Some(1.5),
                ..CreateTask::default()
            })
            .await
            .unwrap();
        assert_eq!(
            echoed["arguments"],
            serde_json::json!({
                "title": "Rotate ssh keys",
                "priority": "high",
                "tags": ["ops"],
                "estimated_hours": 1.5,
            })
        );

        let mut changes = serde_json::Map::new();
        changes.insert("status".into(), "done".into());
        let echoed = tasks.update_task("task-7", changes).await.unwrap();
        assert_eq!(echoed["tool"], "update_task");
        assert_eq!(
            echoed["arguments"],
            serde_json::json!({"task_id": "task-7", "status": "done"})
        );
    }

    #[tokio::test]
    async fn test_stats_sends_empty_object() {
        let (client, handle) = echo_client("tasks").await;
        let tasks = TasksClient::new(client);

        let echoed = tasks.get_stats().await.unwrap();
        assert_eq!(echoed["arguments"], serde_json::json!({}));
        assert_eq!(handle.log().len(), 2);
    }
}
