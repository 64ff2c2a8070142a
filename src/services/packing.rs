use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        folder::Folder,
        task::{PackingRecord, Progress, Task, TaskFields, TaskWithPackers},
    },
    services::{
        membership::require_access,
        notifier::{ChangeKind, ChangeNotifier},
    },
};

const TASK_COLUMNS: &str = "id, trip_id, folder_id, text, description, deadline, creator_id, \
     creator_name, created_at, updated_at";

fn required_text(raw: &str, what: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{what} is required")));
    }
    Ok(trimmed.to_string())
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[derive(Clone)]
pub struct PackingList {
    db: DbPool,
    notifier: ChangeNotifier,
}

impl PackingList {
    pub fn new(db: DbPool, notifier: ChangeNotifier) -> Self {
        Self { db, notifier }
    }

    async fn fetch_folder(&self, folder_id: &str) -> Result<Option<Folder>, AppError> {
        let folder = sqlx::query_as::<_, Folder>(
            "SELECT id, trip_id, name, created_at, updated_at FROM folders WHERE id = ?1",
        )
        .bind(folder_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(folder)
    }

    async fn fetch_task(&self, task_id: &str) -> Result<Option<Task>, AppError> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"
        ))
        .bind(task_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(task)
    }

    /// Loads a folder of the given trip after checking the caller may see the trip.
    async fn trip_folder(
        &self,
        trip_id: &str,
        folder_id: &str,
        caller_id: &str,
    ) -> Result<Folder, AppError> {
        require_access(&self.db, trip_id, caller_id).await?;
        self.fetch_folder(folder_id)
            .await?
            .filter(|folder| folder.trip_id == trip_id)
            .ok_or(AppError::NotFound)
    }

    async fn check_folder_in_trip(
        &self,
        folder_id: Option<&str>,
        trip_id: &str,
    ) -> Result<(), AppError> {
        let Some(folder_id) = folder_id else {
            return Ok(());
        };
        match self.fetch_folder(folder_id).await? {
            Some(folder) if folder.trip_id == trip_id => Ok(()),
            _ => Err(AppError::bad_request("Folder does not belong to this trip")),
        }
    }

    pub async fn add_folder(
        &self,
        trip_id: &str,
        name: &str,
        caller_id: &str,
    ) -> Result<Folder, AppError> {
        require_access(&self.db, trip_id, caller_id).await?;
        let name = required_text(name, "Folder name")?;

        let now = Utc::now();
        let folder = Folder {
            id: Uuid::new_v4().to_string(),
            trip_id: trip_id.to_string(),
            name,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO folders (id, trip_id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&folder.id)
        .bind(&folder.trip_id)
        .bind(&folder.name)
        .bind(folder.created_at)
        .bind(folder.updated_at)
        .execute(&self.db)
        .await?;

        debug!(trip_id, folder_id = %folder.id, "folder added");
        self.notifier.publish(trip_id, ChangeKind::FoldersChanged);
        Ok(folder)
    }

    pub async fn list_folders(&self, trip_id: &str, caller_id: &str) -> Result<Vec<Folder>, AppError> {
        require_access(&self.db, trip_id, caller_id).await?;
        let folders = sqlx::query_as::<_, Folder>(
            "SELECT id, trip_id, name, created_at, updated_at FROM folders \
             WHERE trip_id = ?1 ORDER BY created_at ASC",
        )
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;
        Ok(folders)
    }

    pub async fn rename_folder(
        &self,
        trip_id: &str,
        folder_id: &str,
        name: &str,
        caller_id: &str,
    ) -> Result<Folder, AppError> {
        let mut folder = self.trip_folder(trip_id, folder_id, caller_id).await?;
        folder.name = required_text(name, "Folder name")?;
        folder.updated_at = Utc::now();

        sqlx::query("UPDATE folders SET name = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(&folder.name)
            .bind(folder.updated_at)
            .bind(&folder.id)
            .execute(&self.db)
            .await?;

        self.notifier.publish(trip_id, ChangeKind::FoldersChanged);
        Ok(folder)
    }

    /// Removes a folder; its tasks stay on the list without a folder.
    pub async fn delete_folder(
        &self,
        trip_id: &str,
        folder_id: &str,
        caller_id: &str,
    ) -> Result<(), AppError> {
        let folder = self.trip_folder(trip_id, folder_id, caller_id).await?;

        let mut tx = self.db.begin().await?;
        let orphaned = sqlx::query("UPDATE tasks SET folder_id = NULL WHERE folder_id = ?1")
            .bind(&folder.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM folders WHERE id = ?1")
            .bind(&folder.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(trip_id, folder_id, orphaned, "folder deleted");
        self.notifier.publish(trip_id, ChangeKind::FoldersChanged);
        if orphaned > 0 {
            self.notifier.publish(trip_id, ChangeKind::TasksChanged);
        }
        Ok(())
    }

    pub async fn add_task(
        &self,
        trip_id: &str,
        fields: TaskFields,
        caller_id: &str,
    ) -> Result<Task, AppError> {
        require_access(&self.db, trip_id, caller_id).await?;
        let text = required_text(&fields.text, "Task text")?;
        let folder_id = normalize_optional(fields.folder_id);
        self.check_folder_in_trip(folder_id.as_deref(), trip_id)
            .await?;

        // Snapshot of the creator's name right now; later renames leave it alone.
        let creator_name = sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = ?1")
            .bind(caller_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            trip_id: trip_id.to_string(),
            folder_id,
            text,
            description: normalize_optional(fields.description),
            deadline: fields.deadline,
            creator_id: caller_id.to_string(),
            creator_name,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ))
        .bind(&task.id)
        .bind(&task.trip_id)
        .bind(&task.folder_id)
        .bind(&task.text)
        .bind(&task.description)
        .bind(task.deadline)
        .bind(&task.creator_id)
        .bind(&task.creator_name)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.db)
        .await?;

        debug!(trip_id, task_id = %task.id, "task added");
        self.notifier.publish(trip_id, ChangeKind::TasksChanged);
        Ok(task)
    }

    pub async fn list_tasks(
        &self,
        trip_id: &str,
        caller_id: &str,
    ) -> Result<Vec<TaskWithPackers>, AppError> {
        require_access(&self.db, trip_id, caller_id).await?;

        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE trip_id = ?1 ORDER BY created_at ASC"
        ))
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;

        let records = sqlx::query_as::<_, PackingRecord>(
            "SELECT p.id, p.task_id, p.user_id, p.user_name, p.packed_at \
             FROM packing_records p JOIN tasks t ON t.id = p.task_id \
             WHERE t.trip_id = ?1 ORDER BY p.packed_at ASC",
        )
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;

        let mut by_task: HashMap<String, Vec<PackingRecord>> = HashMap::new();
        for record in records {
            by_task.entry(record.task_id.clone()).or_default().push(record);
        }

        Ok(tasks
            .into_iter()
            .map(|task| {
                let packers = by_task.remove(&task.id).unwrap_or_default();
                TaskWithPackers { task, packers }
            })
            .collect())
    }

    /// Loads a task for a creator-only change: the caller must still have
    /// access to the trip and must be the one who added the task.
    async fn own_task(&self, task_id: &str, caller_id: &str) -> Result<Task, AppError> {
        let task = self.fetch_task(task_id).await?.ok_or(AppError::NotFound)?;
        require_access(&self.db, &task.trip_id, caller_id).await?;
        if task.creator_id != caller_id {
            return Err(AppError::Forbidden);
        }
        Ok(task)
    }

    pub async fn edit_task(
        &self,
        task_id: &str,
        fields: TaskFields,
        caller_id: &str,
    ) -> Result<Task, AppError> {
        let mut task = self.own_task(task_id, caller_id).await?;
        task.text = required_text(&fields.text, "Task text")?;
        task.description = normalize_optional(fields.description);
        task.deadline = fields.deadline;
        task.folder_id = normalize_optional(fields.folder_id);
        self.check_folder_in_trip(task.folder_id.as_deref(), &task.trip_id)
            .await?;
        task.updated_at = Utc::now();

        sqlx::query(
            "UPDATE tasks SET text = ?1, description = ?2, deadline = ?3, folder_id = ?4, updated_at = ?5 \
             WHERE id = ?6",
        )
        .bind(&task.text)
        .bind(&task.description)
        .bind(task.deadline)
        .bind(&task.folder_id)
        .bind(task.updated_at)
        .bind(&task.id)
        .execute(&self.db)
        .await?;

        self.notifier.publish(&task.trip_id, ChangeKind::TasksChanged);
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: &str, caller_id: &str) -> Result<(), AppError> {
        let task = self.own_task(task_id, caller_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM packing_records WHERE task_id = ?1")
            .bind(&task.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(&task.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(trip_id = %task.trip_id, task_id, "task deleted");
        self.notifier.publish(&task.trip_id, ChangeKind::TasksChanged);
        Ok(())
    }

    /// Flips the caller's packed mark on a task and returns the new state.
    /// Each user has their own mark, so concurrent togglers never collide.
    pub async fn toggle_packed(
        &self,
        task_id: &str,
        user_id: &str,
        display_name: &str,
    ) -> Result<bool, AppError> {
        let task = self.fetch_task(task_id).await?.ok_or(AppError::NotFound)?;
        require_access(&self.db, &task.trip_id, user_id).await?;

        let removed = sqlx::query("DELETE FROM packing_records WHERE task_id = ?1 AND user_id = ?2")
            .bind(&task.id)
            .bind(user_id)
            .execute(&self.db)
            .await?
            .rows_affected();

        let packed = if removed > 0 {
            false
        } else {
            sqlx::query(
                "INSERT INTO packing_records (id, task_id, user_id, user_name, packed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&task.id)
            .bind(user_id)
            .bind(display_name)
            .bind(Utc::now())
            .execute(&self.db)
            .await
            .map_err(|err| AppError::from_unique(err, "Already packed"))?;
            true
        };

        debug!(task_id, user_id, packed, "packed state toggled");
        self.notifier.publish(
            &task.trip_id,
            ChangeKind::PackersChanged {
                task_id: task.id.clone(),
            },
        );
        Ok(packed)
    }

    pub async fn packers(&self, task_id: &str, caller_id: &str) -> Result<Vec<PackingRecord>, AppError> {
        let task = self.fetch_task(task_id).await?.ok_or(AppError::NotFound)?;
        require_access(&self.db, &task.trip_id, caller_id).await?;
        let records = sqlx::query_as::<_, PackingRecord>(
            "SELECT id, task_id, user_id, user_name, packed_at FROM packing_records \
             WHERE task_id = ?1 ORDER BY packed_at ASC",
        )
        .bind(&task.id)
        .fetch_all(&self.db)
        .await?;
        Ok(records)
    }

    pub async fn progress(&self, trip_id: &str, user_id: &str) -> Result<Progress, AppError> {
        require_access(&self.db, trip_id, user_id).await?;
        let total_tasks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE trip_id = ?1")
            .bind(trip_id)
            .fetch_one(&self.db)
            .await?;
        let packed_by_me: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM packing_records p JOIN tasks t ON t.id = p.task_id \
             WHERE t.trip_id = ?1 AND p.user_id = ?2",
        )
        .bind(trip_id)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(Progress::new(total_tasks, packed_by_me))
    }
}
