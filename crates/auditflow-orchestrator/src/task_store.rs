use crate::conversation::ConversationEntry;
use async_trait::async_trait;
use auditflow_core::{AuditTask, AuditflowError, AuditflowResult, HitlRequest};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Persistence for project task lists, HITL requests and per-task conversation logs.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks of a project, in stored order. Unknown projects are empty.
    async fn tasks(&self, project_id: &str) -> AuditflowResult<Vec<AuditTask>>;

    /// Replace the whole task list of a project.
    async fn save_tasks(&self, project_id: &str, tasks: &[AuditTask]) -> AuditflowResult<()>;

    /// Replace one stored task, matched by id.
    async fn update_task(&self, task: &AuditTask) -> AuditflowResult<()>;

    /// Append entries to a task's conversation. Existing entries are never rewritten.
    async fn append_conversation(
        &self,
        task_id: Uuid,
        entries: &[ConversationEntry],
    ) -> AuditflowResult<()>;

    /// A task's conversation, oldest entry first.
    async fn conversation(&self, task_id: Uuid) -> AuditflowResult<Vec<ConversationEntry>>;

    /// Every HITL request filed for a project, in filing order.
    async fn requests(&self, project_id: &str) -> AuditflowResult<Vec<HitlRequest>>;

    /// Replace the stored HITL requests of a project.
    async fn save_requests(
        &self,
        project_id: &str,
        requests: &[HitlRequest],
    ) -> AuditflowResult<()>;

    /// Projects with a stored task list, sorted by name.
    async fn projects(&self) -> AuditflowResult<Vec<String>>;

    /// One task by id; [`AuditflowError::TaskNotFound`] if the project lacks it.
    async fn task(&self, project_id: &str, task_id: Uuid) -> AuditflowResult<AuditTask> {
        self.tasks(project_id)
            .await?
            .into_iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| AuditflowError::TaskNotFound(task_id.to_string()))
    }
}

fn replace_in(tasks: &mut [AuditTask], task: &AuditTask) -> AuditflowResult<()> {
    let slot = tasks
        .iter_mut()
        .find(|t| t.id == task.id)
        .ok_or_else(|| AuditflowError::TaskNotFound(task.id.to_string()))?;
    *slot = task.clone();
    Ok(())
}

// ---------------------------------------------------------------------------
// InMemoryTaskStore
// ---------------------------------------------------------------------------

/// Store that keeps everything in process memory. Used by tests and embedders.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Vec<AuditTask>>>,
    requests: RwLock<HashMap<String, Vec<HitlRequest>>>,
    conversations: RwLock<HashMap<Uuid, Vec<ConversationEntry>>>,
}

impl InMemoryTaskStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn tasks(&self, project_id: &str) -> AuditflowResult<Vec<AuditTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_tasks(&self, project_id: &str, tasks: &[AuditTask]) -> AuditflowResult<()> {
        self.tasks
            .write()
            .await
            .insert(project_id.to_string(), tasks.to_vec());
        Ok(())
    }

    async fn update_task(&self, task: &AuditTask) -> AuditflowResult<()> {
        let mut projects = self.tasks.write().await;
        let tasks = projects
            .get_mut(&task.project_id)
            .ok_or_else(|| AuditflowError::TaskNotFound(task.id.to_string()))?;
        replace_in(tasks, task)
    }

    async fn append_conversation(
        &self,
        task_id: Uuid,
        entries: &[ConversationEntry],
    ) -> AuditflowResult<()> {
        self.conversations
            .write()
            .await
            .entry(task_id)
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }

    async fn conversation(&self, task_id: Uuid) -> AuditflowResult<Vec<ConversationEntry>> {
        Ok(self
            .conversations
            .read()
            .await
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn requests(&self, project_id: &str) -> AuditflowResult<Vec<HitlRequest>> {
        Ok(self
            .requests
            .read()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_requests(
        &self,
        project_id: &str,
        requests: &[HitlRequest],
    ) -> AuditflowResult<()> {
        self.requests
            .write()
            .await
            .insert(project_id.to_string(), requests.to_vec());
        Ok(())
    }

    async fn projects(&self) -> AuditflowResult<Vec<String>> {
        let mut names: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// FileTaskStore
// ---------------------------------------------------------------------------

/// File-backed store.
///
/// Layout under the root directory:
/// - `<project>.tasks.json`: pretty-printed task array, rewritten on save
/// - `<project>.requests.json`: HITL requests of the project, rewritten on save
/// - `conversations/<task_id>.jsonl`: one conversation entry per line, append only
pub struct FileTaskStore {
    dir: PathBuf,
    // Serialises read-modify-write cycles on task files.
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    /// Open a store rooted at `dir`, creating the directory layout if needed.
    pub async fn new(dir: PathBuf) -> AuditflowResult<Self> {
        tokio::fs::create_dir_all(dir.join("conversations")).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn tasks_path(&self, project_id: &str) -> AuditflowResult<PathBuf> {
        self.project_file(project_id, "tasks")
    }

    fn requests_path(&self, project_id: &str) -> AuditflowResult<PathBuf> {
        self.project_file(project_id, "requests")
    }

    fn project_file(&self, project_id: &str, kind: &str) -> AuditflowResult<PathBuf> {
        let safe = !project_id.is_empty()
            && project_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !project_id.starts_with('.');
        if !safe {
            return Err(AuditflowError::Validation(format!(
                "project id '{project_id}' must be non-empty ASCII letters, digits, '-', '_' or '.'"
            )));
        }
        Ok(self.dir.join(format!("{project_id}.{kind}.json")))
    }

    fn conversation_path(&self, task_id: Uuid) -> PathBuf {
        self.dir.join("conversations").join(format!("{task_id}.jsonl"))
    }

    async fn read_tasks(&self, project_id: &str) -> AuditflowResult<Vec<AuditTask>> {
        read_json_array(&self.tasks_path(project_id)?).await
    }

    async fn write_tasks(&self, project_id: &str, tasks: &[AuditTask]) -> AuditflowResult<()> {
        write_json_array(&self.tasks_path(project_id)?, tasks).await?;
        debug!(project_id, count = tasks.len(), "Tasks written");
        Ok(())
    }
}

async fn read_json_array<T: serde::de::DeserializeOwned>(path: &Path) -> AuditflowResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&data)
        .map_err(|e| AuditflowError::Store(format!("Failed to parse {}: {e}", path.display())))
}

async fn write_json_array<T: serde::Serialize>(path: &Path, items: &[T]) -> AuditflowResult<()> {
    let json = serde_json::to_string_pretty(items)?;
    // Write-then-rename so readers never see a half-written file.
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn tasks(&self, project_id: &str) -> AuditflowResult<Vec<AuditTask>> {
        self.read_tasks(project_id).await
    }

    async fn save_tasks(&self, project_id: &str, tasks: &[AuditTask]) -> AuditflowResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_tasks(project_id, tasks).await
    }

    async fn update_task(&self, task: &AuditTask) -> AuditflowResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.read_tasks(&task.project_id).await?;
        replace_in(&mut tasks, task)?;
        self.write_tasks(&task.project_id, &tasks).await
    }

    async fn append_conversation(
        &self,
        task_id: Uuid,
        entries: &[ConversationEntry],
    ) -> AuditflowResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.conversation_path(task_id))
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn conversation(&self, task_id: Uuid) -> AuditflowResult<Vec<ConversationEntry>> {
        let path = self.conversation_path(task_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let entries = data
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    async fn requests(&self, project_id: &str) -> AuditflowResult<Vec<HitlRequest>> {
        read_json_array(&self.requests_path(project_id)?).await
    }

    async fn save_requests(
        &self,
        project_id: &str,
        requests: &[HitlRequest],
    ) -> AuditflowResult<()> {
        let path = self.requests_path(project_id)?;
        let _guard = self.write_lock.lock().await;
        write_json_array(&path, requests).await?;
        debug!(project_id, count = requests.len(), "HITL requests written");
        Ok(())
    }

    async fn projects(&self) -> AuditflowResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".tasks.json") {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::conversation::{MessageType, MANAGER_AGENT};
    use auditflow_core::{HitlRequestType, RiskLevel, TaskLevel, TaskStatus};
    use tempfile::TempDir;

    fn sample(project: &str) -> Vec<AuditTask> {
        let high = AuditTask::new(project, TaskLevel::High, "Cash", RiskLevel::High);
        let mid = AuditTask::new(project, TaskLevel::Mid, "Cash - Existence", RiskLevel::High)
            .with_parent(high.id);
        vec![high, mid]
    }

    fn entry(content: &str) -> ConversationEntry {
        ConversationEntry::new(MANAGER_AGENT, "worker", MessageType::Instruction, content)
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = FileTaskStore::new(tmp.path().to_path_buf()).await.unwrap();
        let tasks = sample("acme-2025");

        store.save_tasks("acme-2025", &tasks).await.unwrap();
        let loaded = store.tasks("acme-2025").await.unwrap();
        assert_eq!(loaded, tasks);
        assert_eq!(store.projects().await.unwrap(), vec!["acme-2025"]);
        assert!(store.tasks("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_update_task() {
        let tmp = TempDir::new().unwrap();
        let store = FileTaskStore::new(tmp.path().to_path_buf()).await.unwrap();
        let mut tasks = sample("p1");
        store.save_tasks("p1", &tasks).await.unwrap();

        tasks[1].transition_to(TaskStatus::InProgress).unwrap();
        store.update_task(&tasks[1]).await.unwrap();
        let reloaded = store.task("p1", tasks[1].id).await.unwrap();
        assert_eq!(reloaded.status, TaskStatus::InProgress);

        let stranger = AuditTask::new("p1", TaskLevel::High, "Ghost", RiskLevel::Low);
        assert!(matches!(
            store.update_task(&stranger).await.unwrap_err(),
            AuditflowError::TaskNotFound(_)
        ));
    }

    #[tokio::test]
    async fn file_store_keeps_requests_per_project() {
        let tmp = TempDir::new().unwrap();
        let tasks = sample("acme-2025");
        let request = HitlRequest::new(
            tasks[1].id,
            "acme-2025",
            HitlRequestType::UrgencyThreshold,
            88.0,
            "Review required: Cash - Existence",
        );
        {
            let store = FileTaskStore::new(tmp.path().to_path_buf()).await.unwrap();
            store.save_tasks("acme-2025", &tasks).await.unwrap();
            store
                .save_requests("acme-2025", &[request.clone()])
                .await
                .unwrap();
        }

        let reopened = FileTaskStore::new(tmp.path().to_path_buf()).await.unwrap();
        assert_eq!(reopened.requests("acme-2025").await.unwrap(), vec![request]);
        assert!(reopened.requests("other").await.unwrap().is_empty());
        assert_eq!(reopened.projects().await.unwrap(), vec!["acme-2025"]);
        assert!(reopened.save_requests("../escape", &[]).await.is_err());
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_project_ids() {
        let tmp = TempDir::new().unwrap();
        let store = FileTaskStore::new(tmp.path().to_path_buf()).await.unwrap();
        assert!(store.save_tasks("../escape", &[]).await.is_err());
        assert!(store.tasks("a/b").await.is_err());
    }

    #[tokio::test]
    async fn conversation_is_appended() {
        let tmp = TempDir::new().unwrap();
        let store = FileTaskStore::new(tmp.path().to_path_buf()).await.unwrap();
        let id = Uuid::new_v4();

        store.append_conversation(id, &[entry("one")]).await.unwrap();
        store
            .append_conversation(id, &[entry("two"), entry("three")])
            .await
            .unwrap();
        let log = store.conversation(id).await.unwrap();
        let contents: Vec<&str> = log.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert!(store.conversation(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_memory_store() {
        let store = InMemoryTaskStore::new();
        let tasks = sample("p1");
        store.save_tasks("p1", &tasks).await.unwrap();
        assert_eq!(store.tasks("p1").await.unwrap().len(), 2);
        assert!(matches!(
            store.task("p1", Uuid::new_v4()).await.unwrap_err(),
            AuditflowError::TaskNotFound(_)
        ));

        store.append_conversation(tasks[0].id, &[entry("x")]).await.unwrap();
        assert_eq!(store.conversation(tasks[0].id).await.unwrap().len(), 1);
    }
}
