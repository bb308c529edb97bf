//! Chatgen Storage
//!
//! SQLite persistence for the last executed command of every chat

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tool name recorded for commands that ran a multi-step plan.
pub const MULTI_STEP_TOOL: &str = "multi_step";

/// One step of a stored multi-step plan, as authored by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub tool: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Everything needed to replay a command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandMetadata {
    pub tool: String,
    pub tool_args: serde_json::Value,
    pub plan: Option<Vec<PlanStep>>,
    pub is_multi_step: bool,
    pub prompt: Option<String>,
    pub result: Option<serde_json::Value>,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCommand {
    pub chat_id: String,
    pub message_id: String,
    pub metadata: CommandMetadata,
    pub timestamp: DateTime<Utc>,
}

struct RawCommandRow {
    chat_id: String,
    message_id: String,
    tool: String,
    tool_args: Option<String>,
    plan: Option<String>,
    is_multi_step: bool,
    prompt: Option<String>,
    result: Option<String>,
    failed: bool,
    timestamp: i64,
}

impl RawCommandRow {
    fn into_command(self) -> Result<StoredCommand> {
        let tool_args = match self.tool_args.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)
                .map_err(|e| anyhow!("Corrupt tool_args for chat {}: {}", self.chat_id, e))?,
            _ => serde_json::Value::Object(serde_json::Map::new()),
        };
        let plan = match self.plan.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(
                serde_json::from_str::<Vec<PlanStep>>(raw)
                    .map_err(|e| anyhow!("Corrupt plan for chat {}: {}", self.chat_id, e))?,
            ),
            _ => None,
        };
        let result = match self.result.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(
                serde_json::from_str(raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
            ),
            _ => None,
        };
        let timestamp = Utc
            .timestamp_millis_opt(self.timestamp)
            .single()
            .ok_or_else(|| anyhow!("Invalid timestamp {} in last_commands", self.timestamp))?;

        Ok(StoredCommand {
            chat_id: self.chat_id,
            message_id: self.message_id,
            metadata: CommandMetadata {
                tool: self.tool,
                tool_args,
                plan,
                is_multi_step: self.is_multi_step,
                prompt: self.prompt,
                result,
                failed: self.failed,
            },
            timestamp,
        })
    }
}

pub struct Storage {
    conn: rusqlite::Connection,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path.as_ref())?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS last_commands (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                tool TEXT NOT NULL,
                tool_args TEXT,
                plan TEXT,
                is_multi_step INTEGER NOT NULL DEFAULT 0,
                prompt TEXT,
                result TEXT,
                failed INTEGER NOT NULL DEFAULT 0,
                timestamp INTEGER NOT NULL
            );
            ",
        )?;

        Self::ensure_commands_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Upsert keyed by (chat, message), stamped with the current time.
    pub fn save_command(
        &self,
        chat_id: &str,
        message_id: &str,
        metadata: &CommandMetadata,
    ) -> Result<()> {
        self.save_command_at(chat_id, message_id, metadata, Utc::now())
    }

    pub fn save_command_at(
        &self,
        chat_id: &str,
        message_id: &str,
        metadata: &CommandMetadata,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let tool_args = serde_json::to_string(&metadata.tool_args)?;
        let plan = metadata
            .plan
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = metadata
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO last_commands
                (chat_id, message_id, tool, tool_args, plan, is_multi_step, prompt, result, failed, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(chat_id, message_id)
             DO UPDATE SET
                tool = excluded.tool,
                tool_args = excluded.tool_args,
                plan = excluded.plan,
                is_multi_step = excluded.is_multi_step,
                prompt = excluded.prompt,
                result = excluded.result,
                failed = excluded.failed,
                timestamp = excluded.timestamp",
            (
                chat_id,
                message_id,
                metadata.tool.as_str(),
                tool_args,
                plan,
                metadata.is_multi_step,
                metadata.prompt.as_deref(),
                result,
                metadata.failed,
                timestamp.timestamp_millis(),
            ),
        )?;
        Ok(())
    }

    /// Most recent command for the chat; newer timestamps win, insertion order breaks ties.
    pub fn get_last_command(&self, chat_id: &str) -> Result<Option<StoredCommand>> {
        let mut stmt = self.conn.prepare(
            "SELECT chat_id, message_id, tool, tool_args, plan, is_multi_step, prompt, result, failed, timestamp
             FROM last_commands
             WHERE chat_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT 1",
        )?;
        let row = stmt
            .query_row([chat_id], |row| {
                Ok(RawCommandRow {
                    chat_id: row.get(0)?,
                    message_id: row.get(1)?,
                    tool: row.get(2)?,
                    tool_args: row.get(3)?,
                    plan: row.get(4)?,
                    is_multi_step: row.get(5)?,
                    prompt: row.get(6)?,
                    result: row.get(7)?,
                    failed: row.get(8)?,
                    timestamp: row.get(9)?,
                })
            })
            .optional()?;

        row.map(RawCommandRow::into_command).transpose()
    }

    pub fn delete_commands_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM last_commands WHERE timestamp < ?1",
            [cutoff.timestamp_millis()],
        )?;
        Ok(deleted)
    }

    pub fn delete_all_commands(&self) -> Result<usize> {
        let deleted = self.conn.execute("DELETE FROM last_commands", [])?;
        Ok(deleted)
    }

    pub fn count_commands(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM last_commands", [], |row| row.get(0))?;
        Ok(count)
    }

    fn ensure_commands_schema(conn: &rusqlite::Connection) -> Result<()> {
        let mut has_failed = false;
        let mut stmt = conn.prepare("PRAGMA table_info(last_commands)")?;
        let columns = stmt.query_map([], |row| row.get::<_, String>(1))?;
        for col in columns {
            if col?.eq_ignore_ascii_case("failed") {
                has_failed = true;
                break;
            }
        }

        if !has_failed {
            conn.execute(
                "ALTER TABLE last_commands ADD COLUMN failed INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
        }

        // Older databases could hold several rows per (chat, message); keep the newest.
        conn.execute(
            "DELETE FROM last_commands
             WHERE id NOT IN (
                SELECT MAX(id)
                FROM last_commands
                GROUP BY chat_id, message_id
             )",
            [],
        )?;

        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_last_commands_chat_message
             ON last_commands(chat_id, message_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_last_commands_chat_ts
             ON last_commands(chat_id, timestamp)",
            [],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandMetadata, PlanStep, Storage, MULTI_STEP_TOOL};
    use chrono::{Duration, Utc};
    use rusqlite::Connection;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("chatgen-storage-{}-{}.db", name, ts))
    }

    fn image_command(provider: &str) -> CommandMetadata {
        CommandMetadata {
            tool: "create_image".to_string(),
            tool_args: serde_json::json!({"prompt": "a cat", "provider": provider}),
            prompt: Some("draw a cat".to_string()),
            result: Some(serde_json::json!({"url": "https://cdn.example/cat.png"})),
            ..CommandMetadata::default()
        }
    }

    #[test]
    fn get_last_returns_newest_command_per_chat() {
        let storage = Storage::new(temp_db_path("newest")).expect("storage init");
        let now = Utc::now();

        storage
            .save_command_at("chat-a", "m1", &image_command("openai"), now - Duration::minutes(5))
            .expect("save m1");
        storage
            .save_command_at("chat-a", "m2", &image_command("gemini"), now)
            .expect("save m2");
        storage
            .save_command_at("chat-b", "m3", &image_command("grok"), now)
            .expect("save m3");

        let last = storage
            .get_last_command("chat-a")
            .expect("query")
            .expect("command present");
        assert_eq!(last.message_id, "m2");
        assert_eq!(last.metadata.tool_args["provider"], "gemini");
        assert!(storage.get_last_command("chat-z").expect("query").is_none());
    }

    #[test]
    fn save_is_upsert_per_chat_and_message() {
        let storage = Storage::new(temp_db_path("upsert")).expect("storage init");
        let mut metadata = image_command("openai");
        storage.save_command("chat", "m1", &metadata).expect("first");
        metadata.failed = true;
        storage.save_command("chat", "m1", &metadata).expect("second");

        assert_eq!(storage.count_commands().expect("count"), 1);
        let last = storage
            .get_last_command("chat")
            .expect("query")
            .expect("present");
        assert!(last.metadata.failed);
    }

    #[test]
    fn multi_step_plan_survives_round_trip() {
        let storage = Storage::new(temp_db_path("plan")).expect("storage init");
        let mut parameters = serde_json::Map::new();
        parameters.insert("question".to_string(), serde_json::json!("Pizza?"));
        let metadata = CommandMetadata {
            tool: MULTI_STEP_TOOL.to_string(),
            is_multi_step: true,
            plan: Some(vec![
                PlanStep {
                    tool: "create_poll".to_string(),
                    action: "make a poll about pizza".to_string(),
                    parameters,
                },
                PlanStep {
                    tool: "create_image".to_string(),
                    action: "draw a pizza".to_string(),
                    parameters: serde_json::Map::new(),
                },
            ]),
            ..CommandMetadata::default()
        };
        storage.save_command("chat", "m1", &metadata).expect("save");

        let last = storage
            .get_last_command("chat")
            .expect("query")
            .expect("present");
        assert!(last.metadata.is_multi_step);
        assert_eq!(last.metadata.plan, metadata.plan);
    }

    #[test]
    fn cleanup_with_zero_ttl_removes_everything_older_than_now() {
        let storage = Storage::new(temp_db_path("ttl")).expect("storage init");
        let now = Utc::now();
        storage
            .save_command_at("a", "1", &image_command("openai"), now - Duration::days(40))
            .expect("old");
        storage
            .save_command_at("b", "2", &image_command("openai"), now - Duration::seconds(1))
            .expect("recent");

        let deleted = storage.delete_commands_older_than(now).expect("cleanup");
        assert_eq!(deleted, 2);
        assert_eq!(storage.count_commands().expect("count"), 0);
    }

    #[test]
    fn cleanup_keeps_commands_inside_ttl() {
        let storage = Storage::new(temp_db_path("ttl-keep")).expect("storage init");
        let now = Utc::now();
        storage
            .save_command_at("a", "1", &image_command("openai"), now - Duration::days(40))
            .expect("old");
        storage
            .save_command_at("a", "2", &image_command("openai"), now - Duration::days(2))
            .expect("recent");

        let deleted = storage
            .delete_commands_older_than(now - Duration::days(30))
            .expect("cleanup");
        assert_eq!(deleted, 1);
        let last = storage.get_last_command("a").expect("query").expect("kept");
        assert_eq!(last.message_id, "2");
    }

    #[test]
    fn migrates_legacy_table_without_failed_column() {
        let path = temp_db_path("legacy");
        let conn = Connection::open(&path).expect("open");
        conn.execute_batch(
            "
            CREATE TABLE last_commands (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                tool TEXT NOT NULL,
                tool_args TEXT,
                plan TEXT,
                is_multi_step INTEGER NOT NULL DEFAULT 0,
                prompt TEXT,
                result TEXT,
                timestamp INTEGER NOT NULL
            );
            INSERT INTO last_commands (chat_id, message_id, tool, tool_args, timestamp)
            VALUES ('legacy', 'm1', 'create_video', '{\"prompt\":\"waves\"}', 1000);
            INSERT INTO last_commands (chat_id, message_id, tool, tool_args, timestamp)
            VALUES ('legacy', 'm1', 'create_video', '{\"prompt\":\"waves v2\"}', 2000);
            ",
        )
        .expect("seed legacy");
        drop(conn);

        let storage = Storage::new(&path).expect("migrated storage");
        assert_eq!(storage.count_commands().expect("count"), 1);
        let last = storage
            .get_last_command("legacy")
            .expect("query")
            .expect("present");
        assert!(!last.metadata.failed);
        assert_eq!(last.metadata.tool_args["prompt"], "waves v2");
    }
}
