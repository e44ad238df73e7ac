//! Chat projects, conversations, messages, attached resources and stars.
//!
//! Lives in the meta database. Deleting a conversation removes its
//! messages, their resources and their stars in one transaction; deleting
//! a project detaches (not deletes) its conversations.

use notestore_core::models::{now_ms, ChatMessage, Conversation, MessageResource, Project, Star};

use crate::backend::{transaction, Backend, Row, Statement, Value};
use crate::error::StorageResult;
use crate::repo::{bind_all, placeholders};

/// Fresh random id for a chat record.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub struct ChatRepo<'a, B: Backend> {
    db: &'a B,
}

fn project_from_row(row: &Row) -> StorageResult<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        folder_path: row.get("folder_path")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        archived: row.get("archived")?,
    })
}

fn conversation_from_row(row: &Row) -> StorageResult<Conversation> {
    Ok(Conversation {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        title: row.get("title")?,
        file_path: row.get("file_path")?,
        model: row.get("model")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        archived: row.get("archived")?,
    })
}

fn message_from_row(row: &Row) -> StorageResult<ChatMessage> {
    Ok(ChatMessage {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        role: row.get("role")?,
        content: row.get("content")?,
        model: row.get("model")?,
        token_usage_json: row.get("token_usage_json")?,
        created_at: row.get("created_at")?,
    })
}

fn resource_from_row(row: &Row) -> StorageResult<MessageResource> {
    Ok(MessageResource {
        id: row.get("id")?,
        message_id: row.get("message_id")?,
        kind: row.get("kind")?,
        source: row.get("source")?,
        summary: row.get("summary")?,
        created_at: row.get("created_at")?,
    })
}

fn star_from_row(row: &Row) -> StorageResult<Star> {
    Ok(Star {
        message_id: row.get("message_id")?,
        conversation_id: row.get("conversation_id")?,
        project_id: row.get("project_id")?,
        created_at: row.get("created_at")?,
    })
}

const PROJECT_COLUMNS: &str = "id, name, folder_path, created_at, updated_at, archived";
const CONVERSATION_COLUMNS: &str =
    "id, project_id, title, file_path, model, created_at, updated_at, archived";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, role, content, model, token_usage_json, created_at";

impl<'a, B: Backend> ChatRepo<'a, B> {
    pub fn new(db: &'a B) -> Self {
        Self { db }
    }

    // ---- projects ----

    pub async fn upsert_project(&self, project: &Project) -> StorageResult<()> {
        self.db
            .run(
                &Statement::new(
                    r#"
                    INSERT INTO chat_project (id, name, folder_path, created_at, updated_at, archived)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        folder_path = excluded.folder_path,
                        updated_at = excluded.updated_at,
                        archived = excluded.archived
                    "#,
                )
                .bind(project.id.as_str())
                .bind(project.name.as_str())
                .bind(project.folder_path.as_deref())
                .bind(project.created_at)
                .bind(project.updated_at)
                .bind(project.archived),
            )
            .await?;
        Ok(())
    }

    pub async fn get_project(&self, id: &str) -> StorageResult<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM chat_project WHERE id = ?");
        let row = self.db.get(&Statement::new(sql).bind(id)).await?;
        row.as_ref().map(project_from_row).transpose()
    }

    pub async fn list_projects(&self, include_archived: bool) -> StorageResult<Vec<Project>> {
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM chat_project WHERE archived = 0 OR ? ORDER BY updated_at DESC, id"
        );
        let rows = self.db.all(&Statement::new(sql).bind(include_archived)).await?;
        rows.iter().map(project_from_row).collect()
    }

    /// Delete a project. Its conversations stay, with `project_id` cleared.
    pub async fn delete_project(&self, id: &str) -> StorageResult<bool> {
        transaction(self.db, |db| {
            Box::pin(async move {
                db.run(
                    &Statement::new("UPDATE chat_conversation SET project_id = NULL WHERE project_id = ?")
                        .bind(id),
                )
                .await?;
                db.run(&Statement::new("UPDATE chat_star SET project_id = NULL WHERE project_id = ?").bind(id))
                    .await?;
                let res = db
                    .run(&Statement::new("DELETE FROM chat_project WHERE id = ?").bind(id))
                    .await?;
                Ok(res.changes > 0)
            })
        })
        .await
    }

    // ---- conversations ----

    pub async fn upsert_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        self.db
            .run(
                &Statement::new(
                    r#"
                    INSERT INTO chat_conversation (id, project_id, title, file_path, model,
                                                   created_at, updated_at, archived)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        project_id = excluded.project_id,
                        title = excluded.title,
                        file_path = excluded.file_path,
                        model = excluded.model,
                        updated_at = excluded.updated_at,
                        archived = excluded.archived
                    "#,
                )
                .bind(conversation.id.as_str())
                .bind(conversation.project_id.as_deref())
                .bind(conversation.title.as_str())
                .bind(conversation.file_path.as_deref())
                .bind(conversation.model.as_deref())
                .bind(conversation.created_at)
                .bind(conversation.updated_at)
                .bind(conversation.archived),
            )
            .await?;
        Ok(())
    }

    pub async fn get_conversation(&self, id: &str) -> StorageResult<Option<Conversation>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM chat_conversation WHERE id = ?");
        let row = self.db.get(&Statement::new(sql).bind(id)).await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    /// Conversations, newest activity first. `Some(project)` restricts to
    /// one project; `None` lists every conversation.
    pub async fn list_conversations(
        &self,
        project_id: Option<&str>,
        include_archived: bool,
    ) -> StorageResult<Vec<Conversation>> {
        let mut sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM chat_conversation WHERE (archived = 0 OR ?)"
        );
        let mut stmt_params: Vec<Value> = vec![include_archived.into()];
        if let Some(p) = project_id {
            sql.push_str(" AND project_id = ?");
            stmt_params.push(p.into());
        }
        sql.push_str(" ORDER BY updated_at DESC, id");
        let mut stmt = Statement::new(sql);
        stmt.params = stmt_params;
        let rows = self.db.all(&stmt).await?;
        rows.iter().map(conversation_from_row).collect()
    }

    pub async fn set_conversation_archived(&self, id: &str, archived: bool) -> StorageResult<bool> {
        let res = self
            .db
            .run(
                &Statement::new("UPDATE chat_conversation SET archived = ?, updated_at = ? WHERE id = ?")
                    .bind(archived)
                    .bind(now_ms())
                    .bind(id),
            )
            .await?;
        Ok(res.changes > 0)
    }

    /// Delete conversations with their messages, resources and stars.
    pub async fn delete_conversations(&self, ids: &[String]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        transaction(self.db, |db| {
            Box::pin(async move {
                let p = placeholders(ids.len());
                db.run(&bind_all(
                    Statement::new(format!(
                        "DELETE FROM chat_message_resource WHERE message_id IN \
                         (SELECT id FROM chat_message WHERE conversation_id IN ({p}))"
                    )),
                    ids,
                ))
                .await?;
                db.run(&bind_all(
                    Statement::new(format!("DELETE FROM chat_star WHERE conversation_id IN ({p})")),
                    ids,
                ))
                .await?;
                db.run(&bind_all(
                    Statement::new(format!("DELETE FROM chat_message WHERE conversation_id IN ({p})")),
                    ids,
                ))
                .await?;
                let res = db
                    .run(&bind_all(
                        Statement::new(format!("DELETE FROM chat_conversation WHERE id IN ({p})")),
                        ids,
                    ))
                    .await?;
                Ok(res.changes)
            })
        })
        .await
    }

    pub async fn delete_conversation(&self, id: &str) -> StorageResult<bool> {
        Ok(self.delete_conversations(&[id.to_string()]).await? > 0)
    }

    // ---- messages ----

    /// Append a message and bump the conversation's `updated_at`.
    pub async fn add_message(&self, message: &ChatMessage) -> StorageResult<()> {
        transaction(self.db, |db| {
            Box::pin(async move {
                db.run(
                    &Statement::new(
                        r#"
                        INSERT INTO chat_message (id, conversation_id, role, content, model,
                                                  token_usage_json, created_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT(id) DO UPDATE SET
                            content = excluded.content,
                            model = excluded.model,
                            token_usage_json = excluded.token_usage_json
                        "#,
                    )
                    .bind(message.id.as_str())
                    .bind(message.conversation_id.as_str())
                    .bind(message.role.as_str())
                    .bind(message.content.as_str())
                    .bind(message.model.as_deref())
                    .bind(message.token_usage_json.as_deref())
                    .bind(message.created_at),
                )
                .await?;
                db.run(
                    &Statement::new(
                        "UPDATE chat_conversation SET updated_at = MAX(updated_at, ?) WHERE id = ?",
                    )
                    .bind(message.created_at)
                    .bind(message.conversation_id.as_str()),
                )
                .await?;
                Ok(())
            })
        })
        .await
    }

    /// Messages of a conversation, oldest first.
    pub async fn messages(&self, conversation_id: &str) -> StorageResult<Vec<ChatMessage>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_message WHERE conversation_id = ? ORDER BY created_at, id"
        );
        let rows = self.db.all(&Statement::new(sql).bind(conversation_id)).await?;
        rows.iter().map(message_from_row).collect()
    }

    pub async fn delete_messages(&self, ids: &[String]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        transaction(self.db, |db| {
            Box::pin(async move {
                let p = placeholders(ids.len());
                for table in ["chat_message_resource", "chat_star"] {
                    db.run(&bind_all(
                        Statement::new(format!("DELETE FROM {table} WHERE message_id IN ({p})")),
                        ids,
                    ))
                    .await?;
                }
                let res = db
                    .run(&bind_all(
                        Statement::new(format!("DELETE FROM chat_message WHERE id IN ({p})")),
                        ids,
                    ))
                    .await?;
                Ok(res.changes)
            })
        })
        .await
    }

    // ---- resources ----

    pub async fn add_resource(&self, resource: &MessageResource) -> StorageResult<()> {
        self.db
            .run(
                &Statement::new(
                    r#"
                    INSERT INTO chat_message_resource (id, message_id, kind, source, summary, created_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET summary = excluded.summary
                    "#,
                )
                .bind(resource.id.as_str())
                .bind(resource.message_id.as_str())
                .bind(resource.kind.as_str())
                .bind(resource.source.as_str())
                .bind(resource.summary.as_deref())
                .bind(resource.created_at),
            )
            .await?;
        Ok(())
    }

    pub async fn resources(&self, message_id: &str) -> StorageResult<Vec<MessageResource>> {
        let rows = self
            .db
            .all(
                &Statement::new(
                    "SELECT id, message_id, kind, source, summary, created_at \
                     FROM chat_message_resource WHERE message_id = ? ORDER BY created_at, id",
                )
                .bind(message_id),
            )
            .await?;
        rows.iter().map(resource_from_row).collect()
    }

    // ---- stars ----

    pub async fn star(&self, star: &Star) -> StorageResult<()> {
        self.db
            .run(
                &Statement::new(
                    r#"
                    INSERT INTO chat_star (message_id, conversation_id, project_id, created_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(message_id) DO NOTHING
                    "#,
                )
                .bind(star.message_id.as_str())
                .bind(star.conversation_id.as_str())
                .bind(star.project_id.as_deref())
                .bind(star.created_at),
            )
            .await?;
        Ok(())
    }

    pub async fn unstar(&self, message_id: &str) -> StorageResult<bool> {
        let res = self
            .db
            .run(&Statement::new("DELETE FROM chat_star WHERE message_id = ?").bind(message_id))
            .await?;
        Ok(res.changes > 0)
    }

    /// Stars, newest first, optionally for one project.
    pub async fn stars(&self, project_id: Option<&str>) -> StorageResult<Vec<Star>> {
        let stmt = match project_id {
            Some(p) => Statement::new(
                "SELECT message_id, conversation_id, project_id, created_at FROM chat_star \
                 WHERE project_id = ? ORDER BY created_at DESC",
            )
            .bind(p),
            None => Statement::new(
                "SELECT message_id, conversation_id, project_id, created_at FROM chat_star \
                 ORDER BY created_at DESC",
            ),
        };
        let rows = self.db.all(&stmt).await?;
        rows.iter().map(star_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Database, EngineKind};
    use crate::migrate::{run_migrations, Schema};
    use std::time::Duration;

    async fn open(tmp: &tempfile::TempDir, kind: EngineKind) -> Database {
        let db = Database::open(kind, &tmp.path().join("meta.sqlite"), Duration::from_secs(5))
            .await
            .unwrap();
        run_migrations(&db, Schema::Meta).await.unwrap();
        db
    }

    fn conversation(id: &str, project_id: Option<&str>) -> Conversation {
        Conversation {
            id: id.into(),
            project_id: project_id.map(String::from),
            title: format!("Conversation {id}"),
            file_path: None,
            model: Some("local".into()),
            created_at: 10,
            updated_at: 10,
            archived: false,
        }
    }

    fn message(id: &str, conversation_id: &str, created_at: i64) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            conversation_id: conversation_id.into(),
            role: "user".into(),
            content: format!("hello {id}"),
            model: None,
            token_usage_json: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_messages_in_order_and_bump_conversation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = open(&tmp, EngineKind::Native).await;
        let chat = ChatRepo::new(&db);

        chat.upsert_conversation(&conversation("c1", None)).await.unwrap();
        chat.add_message(&message("m2", "c1", 30)).await.unwrap();
        chat.add_message(&message("m1", "c1", 20)).await.unwrap();

        let ids: Vec<String> = chat.messages("c1").await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(chat.get_conversation("c1").await.unwrap().unwrap().updated_at, 30);
    }

    #[tokio::test]
    async fn test_delete_conversation_cascades() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = open(&tmp, EngineKind::Paged).await;
        let chat = ChatRepo::new(&db);

        chat.upsert_conversation(&conversation("c1", Some("p1"))).await.unwrap();
        chat.add_message(&message("m1", "c1", 20)).await.unwrap();
        chat.add_resource(&MessageResource {
            id: new_id(),
            message_id: "m1".into(),
            kind: "note".into(),
            source: "notes/a.md".into(),
            summary: None,
            created_at: 21,
        })
        .await
        .unwrap();
        chat.star(&Star {
            message_id: "m1".into(),
            conversation_id: "c1".into(),
            project_id: Some("p1".into()),
            created_at: 22,
        })
        .await
        .unwrap();

        assert!(chat.delete_conversation("c1").await.unwrap());
        assert!(chat.messages("c1").await.unwrap().is_empty());
        assert!(chat.resources("m1").await.unwrap().is_empty());
        assert!(chat.stars(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_projects_and_archiving() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = open(&tmp, EngineKind::Native).await;
        let chat = ChatRepo::new(&db);

        chat.upsert_project(&Project {
            id: "p1".into(),
            name: "Research".into(),
            folder_path: Some("research".into()),
            created_at: 1,
            updated_at: 1,
            archived: false,
        })
        .await
        .unwrap();
        chat.upsert_conversation(&conversation("c1", Some("p1"))).await.unwrap();
        chat.upsert_conversation(&conversation("c2", Some("p1"))).await.unwrap();
        chat.set_conversation_archived("c2", true).await.unwrap();

        assert_eq!(chat.list_conversations(Some("p1"), false).await.unwrap().len(), 1);
        assert_eq!(chat.list_conversations(Some("p1"), true).await.unwrap().len(), 2);

        assert!(chat.delete_project("p1").await.unwrap());
        assert!(chat.list_projects(true).await.unwrap().is_empty());
        let detached = chat.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(detached.project_id, None);
    }

    #[test]
    fn test_new_id_is_unique() {
        assert_ne!(new_id(), new_id());
    }
}
