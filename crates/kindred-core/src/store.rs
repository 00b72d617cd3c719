use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::buckets::{Buckets, compute_buckets_in};
use crate::task::Task;

/// Owns the authoritative task list. Readers borrow it; the only writer is
/// [`TaskStore::replace`], which swaps the whole snapshot in one step.
#[derive(Debug)]
pub struct TaskStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    tasks: Vec<Task>,
}

impl TaskStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        if !tasks_path.exists() {
            fs::write(&tasks_path, "")?;
        }

        let tasks = load_jsonl(&tasks_path).context("failed to load tasks.data")?;
        info!(
            data_dir = %data_dir.display(),
            tasks = tasks.len(),
            "opened task store"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            tasks,
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn find(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Persists `tasks` and makes them the current snapshot. On a write
    /// failure the previous snapshot stays in place.
    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub fn replace(&mut self, tasks: Vec<Task>) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, &tasks).context("failed to save tasks.data")?;
        self.tasks = tasks;
        Ok(())
    }

    /// Replaces the snapshot with the tasks in `path`, which may hold a JSON
    /// array or one task per line.
    #[tracing::instrument(skip(self, path), fields(file = %path.display()))]
    pub fn import_file(&mut self, path: &Path) -> anyhow::Result<usize> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let tasks = parse_snapshot(&raw)
            .with_context(|| format!("failed parsing {}", path.display()))?;
        let count = tasks.len();
        self.replace(tasks)?;
        info!(count, "imported tasks");
        Ok(count)
    }

    pub fn buckets_in(&self, selected: DateTime<Utc>, now: DateTime<Utc>, tz: &Tz) -> Buckets<'_> {
        compute_buckets_in(&self.tasks, selected, now, tz)
    }
}

pub fn parse_snapshot(raw: &str) -> anyhow::Result<Vec<Task>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        let tasks: Vec<Task> = serde_json::from_str(trimmed)?;
        debug!(count = tasks.len(), "parsed json array snapshot");
        return Ok(tasks);
    }

    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let task: Task =
            serde_json::from_str(line).with_context(|| format!("line {}", idx + 1))?;
        out.push(task);
    }
    debug!(count = out.len(), "parsed jsonl snapshot");
    Ok(out)
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Task>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let task: Task = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(task);
    }

    debug!(count = out.len(), "loaded tasks from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[Task]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for task in tasks {
        let serialized = serde_json::to_string(task)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{TaskStore, parse_snapshot};

    #[test]
    fn snapshot_accepts_array_and_jsonl() {
        let array = r#"[
            {"_id": "a", "content": "Stretch", "value": 1, "priority": 1, "categoryID": "c1", "public": true},
            {"id": "b", "content": "Read", "value": 2, "priority": 2, "categoryID": "c1", "public": false}
        ]"#;
        let tasks = parse_snapshot(array).expect("array");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "a");

        let jsonl = "\n{\"id\":\"c\",\"content\":\"Run\",\"value\":3,\"priority\":3,\"categoryID\":\"c2\",\"public\":true}\n\n";
        let tasks = parse_snapshot(jsonl).expect("jsonl");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].content, "Run");

        let err = parse_snapshot("{\"id\": 4}\n").expect_err("bad line");
        assert!(format!("{err:#}").contains("line 1"));
    }

    #[test]
    fn import_replaces_and_persists() {
        let temp = tempdir().expect("tempdir");
        let mut store = TaskStore::open(temp.path()).expect("open");
        assert!(store.tasks().is_empty());

        let snapshot = temp.path().join("snapshot.json");
        fs::write(
            &snapshot,
            r#"[{"id":"t1","content":"Journal","value":1,"priority":2,"categoryID":"c","public":true,"startDate":"2024-06-10","notes":"keep me"}]"#,
        )
        .expect("write snapshot");

        assert_eq!(store.import_file(&snapshot).expect("import"), 1);
        assert_eq!(store.find("t1").map(|t| t.content.as_str()), Some("Journal"));

        let reopened = TaskStore::open(temp.path()).expect("reopen");
        let task = reopened.find("t1").expect("persisted");
        assert_eq!(task.start_date.as_deref(), Some("2024-06-10"));
        assert_eq!(
            task.extra.get("notes").and_then(|v| v.as_str()),
            Some("keep me")
        );
    }

    #[test]
    fn failed_import_keeps_previous_snapshot() {
        let temp = tempdir().expect("tempdir");
        let mut store = TaskStore::open(temp.path()).expect("open");
        let good = temp.path().join("good.jsonl");
        fs::write(
            &good,
            "{\"id\":\"keep\",\"content\":\"x\",\"value\":0,\"priority\":1,\"categoryID\":\"c\",\"public\":false}\n",
        )
        .expect("write");
        store.import_file(&good).expect("import");

        let bad = temp.path().join("bad.json");
        fs::write(&bad, "[{\"id\": ").expect("write");
        assert!(store.import_file(&bad).is_err());
        assert_eq!(store.tasks().len(), 1);
        assert!(store.find("keep").is_some());
    }
}
