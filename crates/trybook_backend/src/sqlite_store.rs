use anyhow::{Context as _, anyhow};
use rand::{Rng as _, rngs::OsRng};
use rusqlite::{Connection, OptionalExtension as _, params};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use trybook_domain::{
    CloneRecord, Intent, NotebookEntry, NotebookMeta, NotebookSummary, OutputSlot, short_commit,
};

const LATEST_SCHEMA_VERSION: u32 = 3;

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/0001_init.sql"
        )),
    ),
    (
        2,
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/0002_entry_output_claude.sql"
        )),
    ),
    (
        3,
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/0003_entry_intent.sql"
        )),
    ),
];

const NOW_SQL: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

pub type LoadedNotebook = (NotebookMeta, Vec<NotebookEntry>);

/// Handle to the SQLite worker thread. All statements run on one connection,
/// one command at a time.
#[derive(Clone)]
pub struct SqliteStore {
    tx: mpsc::Sender<DbCommand>,
}

enum DbCommand {
    UpsertClone {
        org: String,
        repo: String,
        branch: String,
        commit_sha: String,
        reply: mpsc::Sender<anyhow::Result<()>>,
    },
    GetClone {
        org: String,
        repo: String,
        reply: mpsc::Sender<anyhow::Result<Option<CloneRecord>>>,
    },
    CreateNotebook {
        org: String,
        repo: String,
        branch: String,
        worktree: String,
        commit_sha: String,
        reply: mpsc::Sender<anyhow::Result<String>>,
    },
    ListNotebooks {
        limit: usize,
        reply: mpsc::Sender<anyhow::Result<Vec<NotebookSummary>>>,
    },
    LoadNotebook {
        id: String,
        reply: mpsc::Sender<anyhow::Result<Option<LoadedNotebook>>>,
    },
    LoadNotebookMeta {
        id: String,
        reply: mpsc::Sender<anyhow::Result<Option<NotebookMeta>>>,
    },
    AppendEntry {
        notebook_id: String,
        prompt: String,
        reply: mpsc::Sender<anyhow::Result<u32>>,
    },
    LoadEntryPrompt {
        notebook_id: String,
        index: u32,
        reply: mpsc::Sender<anyhow::Result<Option<String>>>,
    },
    SetEntryOutput {
        notebook_id: String,
        index: u32,
        slot: OutputSlot,
        text: String,
        reply: mpsc::Sender<anyhow::Result<()>>,
    },
    SetEntryIntent {
        notebook_id: String,
        index: u32,
        intent: Intent,
        reply: mpsc::Sender<anyhow::Result<()>>,
    },
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<DbCommand>();

        std::thread::Builder::new()
            .name("trybook-sqlite".to_owned())
            .spawn(move || {
                let mut db = SqliteDatabase::open(&db_path);
                if let Err(err) = &db {
                    tracing::error!(error = %format!("{err:#}"), "failed to open sqlite store");
                }
                while let Ok(cmd) = rx.recv() {
                    match (&mut db, cmd) {
                        (
                            Ok(db),
                            DbCommand::UpsertClone {
                                org,
                                repo,
                                branch,
                                commit_sha,
                                reply,
                            },
                        ) => {
                            let _ = reply.send(db.upsert_clone(&org, &repo, &branch, &commit_sha));
                        }
                        (Ok(db), DbCommand::GetClone { org, repo, reply }) => {
                            let _ = reply.send(db.get_clone(&org, &repo));
                        }
                        (
                            Ok(db),
                            DbCommand::CreateNotebook {
                                org,
                                repo,
                                branch,
                                worktree,
                                commit_sha,
                                reply,
                            },
                        ) => {
                            let _ = reply.send(db.create_notebook(
                                &org,
                                &repo,
                                &branch,
                                &worktree,
                                &commit_sha,
                            ));
                        }
                        (Ok(db), DbCommand::ListNotebooks { limit, reply }) => {
                            let _ = reply.send(db.list_notebooks(limit));
                        }
                        (Ok(db), DbCommand::LoadNotebook { id, reply }) => {
                            let _ = reply.send(db.load_notebook(&id));
                        }
                        (Ok(db), DbCommand::LoadNotebookMeta { id, reply }) => {
                            let _ = reply.send(db.load_notebook_meta(&id));
                        }
                        (
                            Ok(db),
                            DbCommand::AppendEntry {
                                notebook_id,
                                prompt,
                                reply,
                            },
                        ) => {
                            let _ = reply.send(db.append_entry(&notebook_id, &prompt));
                        }
                        (
                            Ok(db),
                            DbCommand::LoadEntryPrompt {
                                notebook_id,
                                index,
                                reply,
                            },
                        ) => {
                            let _ = reply.send(db.load_entry_prompt(&notebook_id, index));
                        }
                        (
                            Ok(db),
                            DbCommand::SetEntryOutput {
                                notebook_id,
                                index,
                                slot,
                                text,
                                reply,
                            },
                        ) => {
                            let _ =
                                reply.send(db.set_entry_output(&notebook_id, index, slot, &text));
                        }
                        (
                            Ok(db),
                            DbCommand::SetEntryIntent {
                                notebook_id,
                                index,
                                intent,
                                reply,
                            },
                        ) => {
                            let _ = reply.send(db.set_entry_intent(&notebook_id, index, intent));
                        }
                        (Err(err), cmd) => {
                            respond_db_open_error(err, cmd);
                        }
                    }
                }
            })
            .context("failed to spawn sqlite worker thread")?;

        Ok(Self { tx })
    }

    pub fn upsert_clone(
        &self,
        org: String,
        repo: String,
        branch: String,
        commit_sha: String,
    ) -> anyhow::Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::UpsertClone {
                org,
                repo,
                branch,
                commit_sha,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    pub fn get_clone(&self, org: String, repo: String) -> anyhow::Result<Option<CloneRecord>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::GetClone {
                org,
                repo,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    /// Inserts a notebook row for an already-created worktree and returns
    /// the generated notebook id.
    pub fn create_notebook(
        &self,
        org: String,
        repo: String,
        branch: String,
        worktree: String,
        commit_sha: String,
    ) -> anyhow::Result<String> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::CreateNotebook {
                org,
                repo,
                branch,
                worktree,
                commit_sha,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    pub fn list_notebooks(&self, limit: usize) -> anyhow::Result<Vec<NotebookSummary>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::ListNotebooks {
                limit,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    pub fn load_notebook(&self, id: String) -> anyhow::Result<Option<LoadedNotebook>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::LoadNotebook {
                id,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    /// The notebook row alone, without its entries.
    pub fn load_notebook_meta(&self, id: String) -> anyhow::Result<Option<NotebookMeta>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::LoadNotebookMeta {
                id,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    pub fn append_entry(&self, notebook_id: String, prompt: String) -> anyhow::Result<u32> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::AppendEntry {
                notebook_id,
                prompt,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    pub fn load_entry_prompt(
        &self,
        notebook_id: String,
        index: u32,
    ) -> anyhow::Result<Option<String>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::LoadEntryPrompt {
                notebook_id,
                index,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    pub fn set_entry_output(
        &self,
        notebook_id: String,
        index: u32,
        slot: OutputSlot,
        text: String,
    ) -> anyhow::Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::SetEntryOutput {
                notebook_id,
                index,
                slot,
                text,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    pub fn set_entry_intent(
        &self,
        notebook_id: String,
        index: u32,
        intent: Intent,
    ) -> anyhow::Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::SetEntryIntent {
                notebook_id,
                index,
                intent,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }
}

fn respond_db_open_error(err: &anyhow::Error, cmd: DbCommand) {
    let message = format!("{err:#}");
    match cmd {
        DbCommand::UpsertClone { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::GetClone { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::CreateNotebook { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::ListNotebooks { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::LoadNotebook { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::LoadNotebookMeta { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::AppendEntry { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::LoadEntryPrompt { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::SetEntryOutput { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::SetEntryIntent { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
    }
}

struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut conn = Connection::open(db_path)
            .with_context(|| format!("failed to open sqlite db {}", db_path.display()))?;

        configure_connection(&mut conn).context("failed to configure sqlite connection")?;
        apply_migrations(&mut conn).context("failed to apply sqlite migrations")?;

        Ok(Self { conn })
    }

    fn upsert_clone(
        &mut self,
        org: &str,
        repo: &str,
        branch: &str,
        commit_sha: &str,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO clones (org, repo, branch, commit_sha)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(org, repo) DO UPDATE SET
                     branch = excluded.branch,
                     commit_sha = excluded.commit_sha,
                     updated_at = {NOW_SQL}"
            ),
            params![org, repo, branch, commit_sha],
        )?;
        Ok(())
    }

    fn get_clone(&mut self, org: &str, repo: &str) -> anyhow::Result<Option<CloneRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT org, repo, branch, commit_sha, created_at, updated_at
                 FROM clones WHERE org = ?1 AND repo = ?2",
                params![org, repo],
                |row| {
                    Ok(CloneRecord {
                        org: row.get(0)?,
                        repo: row.get(1)?,
                        branch: row.get(2)?,
                        commit_sha: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn create_notebook(
        &mut self,
        org: &str,
        repo: &str,
        branch: &str,
        worktree: &str,
        commit_sha: &str,
    ) -> anyhow::Result<String> {
        let id = generate_notebook_id();
        self.conn
            .execute(
                "INSERT INTO notebooks (id, org, repo, branch, worktree, commit_sha)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, org, repo, branch, worktree, commit_sha],
            )
            .context("failed to insert notebook")?;
        Ok(id)
    }

    fn list_notebooks(&mut self, limit: usize) -> anyhow::Result<Vec<NotebookSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, org, repo, branch, commit_sha, created_at
             FROM notebooks
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let sha: String = row.get(4)?;
            Ok(NotebookSummary {
                id: row.get(0)?,
                org: row.get(1)?,
                repo: row.get(2)?,
                branch: row.get(3)?,
                commit_short: short_commit(&sha),
                created_at: row.get(5)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn load_notebook_meta(&mut self, id: &str) -> anyhow::Result<Option<NotebookMeta>> {
        let meta = self
            .conn
            .query_row(
                "SELECT id, org, repo, branch, worktree, commit_sha, created_at
                 FROM notebooks WHERE id = ?1",
                params![id],
                |row| {
                    Ok(NotebookMeta {
                        id: row.get(0)?,
                        org: row.get(1)?,
                        repo: row.get(2)?,
                        branch: row.get(3)?,
                        worktree: row.get(4)?,
                        commit_sha: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    fn load_notebook(&mut self, id: &str) -> anyhow::Result<Option<LoadedNotebook>> {
        let Some(meta) = self.load_notebook_meta(id)? else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT idx, prompt, output, output_claude, intent, created_at, updated_at
             FROM notebook_entries
             WHERE notebook_id = ?1
             ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            let intent: String = row.get(4)?;
            Ok(NotebookEntry {
                index: row.get::<_, i64>(0)? as u32,
                prompt: row.get(1)?,
                output: row.get(2)?,
                output_claude: row.get(3)?,
                intent: Intent::normalize(&intent),
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(Some((meta, entries)))
    }

    /// Index assignment and insert are one statement, so two appends to the
    /// same notebook can never observe the same `MAX(idx)`.
    fn append_entry(&mut self, notebook_id: &str, prompt: &str) -> anyhow::Result<u32> {
        let idx: i64 = self
            .conn
            .query_row(
                "INSERT INTO notebook_entries (notebook_id, idx, prompt)
                 SELECT ?1, COALESCE(MAX(idx), -1) + 1, ?2
                 FROM notebook_entries
                 WHERE notebook_id = ?1
                 RETURNING idx",
                params![notebook_id, prompt],
                |row| row.get(0),
            )
            .context("failed to append notebook entry")?;
        Ok(idx as u32)
    }

    fn load_entry_prompt(&mut self, notebook_id: &str, index: u32) -> anyhow::Result<Option<String>> {
        let prompt = self
            .conn
            .query_row(
                "SELECT prompt FROM notebook_entries WHERE notebook_id = ?1 AND idx = ?2",
                params![notebook_id, index as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(prompt)
    }

    fn set_entry_output(
        &mut self,
        notebook_id: &str,
        index: u32,
        slot: OutputSlot,
        text: &str,
    ) -> anyhow::Result<()> {
        let column = slot.column();
        self.conn.execute(
            &format!(
                "UPDATE notebook_entries
                 SET {column} = ?3, updated_at = {NOW_SQL}
                 WHERE notebook_id = ?1 AND idx = ?2"
            ),
            params![notebook_id, index as i64, text],
        )?;
        Ok(())
    }

    fn set_entry_intent(
        &mut self,
        notebook_id: &str,
        index: u32,
        intent: Intent,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            &format!(
                "UPDATE notebook_entries
                 SET intent = ?3, updated_at = {NOW_SQL}
                 WHERE notebook_id = ?1 AND idx = ?2"
            ),
            params![notebook_id, index as i64, intent.as_str()],
        )?;
        Ok(())
    }
}

fn generate_notebook_id() -> String {
    let bytes: [u8; 12] = OsRng.r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn configure_connection(conn: &mut Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
    .context("failed to apply sqlite PRAGMAs")?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    let current: u32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
        .context("failed to read user_version")? as u32;

    if current > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "sqlite schema version is newer than this build: db={}, app={}",
            current,
            LATEST_SCHEMA_VERSION
        ));
    }

    if current == LATEST_SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch("BEGIN IMMEDIATE;")
        .context("failed to begin migration transaction")?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration v{version:04}"))?;
        conn.pragma_update(None, "user_version", *version as i64)
            .context("failed to update user_version")?;
    }

    conn.execute_batch("COMMIT;")
        .context("failed to commit migration transaction")?;
    Ok(())
}
