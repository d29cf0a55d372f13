//! SQLite-backed bookkeeping for the pipeline.
//!
//! One row per canonical URL, first write wins. The `curated` and `sent`
//! flags only ever move false -> true. Schema changes are additive and
//! applied once at open, gated on `PRAGMA user_version`.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use thiserror::Error;

use crate::models::{Article, Category, Edition, EditionStatus, EditorPick, Scores};
use crate::run::RunContext;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Versioned migrations. Entry N upgrades the schema to user_version N+1.
/// Never edit a shipped entry; append a new one.
const MIGRATIONS: &[&str] = &[
    // v1: original single-score schema plus subscribers and editor picks.
    "
    CREATE TABLE IF NOT EXISTS articles (
        url             TEXT PRIMARY KEY,
        title           TEXT NOT NULL,
        source          TEXT NOT NULL,
        raw_content     TEXT NOT NULL DEFAULT '',
        summary         TEXT NOT NULL DEFAULT '',
        category        TEXT NOT NULL DEFAULT 'uncategorized',
        relevance_score REAL NOT NULL DEFAULT 0.0,
        collected_at    TEXT NOT NULL,
        curated         INTEGER NOT NULL DEFAULT 0,
        sent            INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS subscribers (
        email         TEXT PRIMARY KEY,
        subscribed_at TEXT NOT NULL,
        active        INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS editor_picks (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        url        TEXT NOT NULL UNIQUE,
        title      TEXT,
        note       TEXT,
        used       INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
    ",
    // v2: multi-dimensional scores (defaults keep old rows valid),
    // editions, the usage ledger, and run records.
    "
    ALTER TABLE articles ADD COLUMN impact_score REAL NOT NULL DEFAULT 0.0;
    ALTER TABLE articles ADD COLUMN actionability_score REAL NOT NULL DEFAULT 0.0;
    ALTER TABLE articles ADD COLUMN source_quality_score REAL NOT NULL DEFAULT 0.0;
    ALTER TABLE articles ADD COLUMN recency_bonus REAL NOT NULL DEFAULT 0.0;
    ALTER TABLE articles ADD COLUMN final_score REAL NOT NULL DEFAULT 0.0;

    CREATE TABLE IF NOT EXISTS editions (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id     TEXT NOT NULL,
        subject    TEXT NOT NULL,
        body       TEXT NOT NULL,
        urls       TEXT NOT NULL DEFAULT '[]',
        topics     TEXT NOT NULL DEFAULT '[]',
        status     TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS api_usage (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id        TEXT NOT NULL,
        model         TEXT NOT NULL,
        step          TEXT NOT NULL,
        input_tokens  INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        created_at    TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pipeline_runs (
        run_id             TEXT PRIMARY KEY,
        status             TEXT NOT NULL DEFAULT 'running',
        started_at         TEXT NOT NULL,
        finished_at        TEXT,
        duration_seconds   REAL,
        articles_collected INTEGER NOT NULL DEFAULT 0,
        articles_curated   INTEGER NOT NULL DEFAULT 0,
        articles_selected  INTEGER NOT NULL DEFAULT 0,
        emails_sent        INTEGER NOT NULL DEFAULT 0,
        emails_failed      INTEGER NOT NULL DEFAULT 0,
        error_message      TEXT
    );
    ",
];

const ARTICLE_COLUMNS: &str = "url, title, source, raw_content, summary, category, \
     relevance_score, impact_score, actionability_score, source_quality_score, \
     recency_bonus, final_score, collected_at, curated, sent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Observability snapshot of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub status: String,
    pub articles_collected: i64,
    pub articles_curated: i64,
    pub articles_selected: i64,
    pub emails_sent: i64,
    pub emails_failed: i64,
    pub error_message: Option<String>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // journal_mode returns a row, so query_row rather than execute.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        let store = Self { conn };
        store.apply_migrations()?;
        Ok(store)
    }

    fn apply_migrations(&self) -> Result<()> {
        let current: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))?;

        for (i, migration) in MIGRATIONS.iter().enumerate() {
            let target = (i + 1) as i64;
            if current >= target {
                continue;
            }
            self.conn.execute_batch(&format!(
                "BEGIN;\n{migration}\nPRAGMA user_version = {target};\nCOMMIT;"
            ))?;
            tracing::debug!(version = target, "applied schema migration");
        }
        Ok(())
    }

    // ---- articles -----------------------------------------------------

    /// Insert an article. Returns true if inserted, false if the URL was
    /// already known (first write wins, later attempts are no-ops).
    pub fn insert_article(&self, article: &Article) -> Result<bool> {
        let changed = self.conn.execute(
            &format!("INSERT OR IGNORE INTO articles ({ARTICLE_COLUMNS}) \
                      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"),
            params![
                article.url,
                article.title,
                article.source,
                article.raw_content,
                article.summary,
                article.category.as_str(),
                article.scores.relevance,
                article.scores.impact,
                article.scores.actionability,
                article.scores.source_quality,
                article.scores.recency_bonus,
                article.final_score,
                article.collected_at.to_rfc3339(),
                article.curated,
                article.sent,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Insert a batch; returns the count of newly inserted rows.
    pub fn insert_articles(&self, articles: &[Article]) -> Result<usize> {
        let mut inserted = 0;
        for article in articles {
            if self.insert_article(article)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Articles still awaiting curation (enrichment also works off this set).
    pub fn uncurated_articles(&self) -> Result<Vec<Article>> {
        self.query_articles("WHERE curated = 0 AND sent = 0 ORDER BY url ASC")
    }

    /// The selector's pool: curated, unsent, sorted descending by the
    /// effective score (final_score, falling back to the raw relevance
    /// score for pre-multi-score rows), with URL as deterministic tiebreak.
    pub fn selection_pool(&self) -> Result<Vec<Article>> {
        self.query_articles(
            "WHERE curated = 1 AND sent = 0 \
             ORDER BY CASE WHEN final_score > 0 THEN final_score ELSE relevance_score END DESC, \
             url ASC",
        )
    }

    fn query_articles(&self, clause: &str) -> Result<Vec<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles {clause}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_article)?;
        let mut articles = Vec::new();
        for row in rows {
            articles.push(row?);
        }
        Ok(articles)
    }

    /// Record the judge's verdict. Curated is monotonic: this is the only
    /// write path and it always sets curated = 1.
    pub fn update_curation(
        &self,
        url: &str,
        summary: &str,
        category: Category,
        scores: &Scores,
        final_score: f64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE articles SET summary = ?1, category = ?2, relevance_score = ?3, \
             impact_score = ?4, actionability_score = ?5, source_quality_score = ?6, \
             recency_bonus = ?7, final_score = ?8, curated = 1 WHERE url = ?9",
            params![
                summary,
                category.as_str(),
                scores.relevance,
                scores.impact,
                scores.actionability,
                scores.source_quality,
                scores.recency_bonus,
                final_score,
                url,
            ],
        )?;
        Ok(())
    }

    /// Overwrite scraped content. Enrichment is idempotent, so re-running
    /// this for the same URL is safe.
    pub fn update_content(&self, url: &str, raw_content: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE articles SET raw_content = ?1 WHERE url = ?2",
            params![raw_content, url],
        )?;
        Ok(())
    }

    /// Bulk-mark a finalized shortlist as sent. All-or-nothing per URL list.
    pub fn mark_sent(&mut self, urls: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE articles SET sent = 1 WHERE url = ?1")?;
            for url in urls {
                stmt.execute([url])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ---- editions -----------------------------------------------------

    pub fn save_pending_edition(
        &self,
        run: &RunContext,
        subject: &str,
        body: &str,
        urls: &[String],
        topics: &[String],
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO editions (run_id, subject, body, urls, topics, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            params![
                run.run_id,
                subject,
                body,
                serde_json::to_string(urls)?,
                serde_json::to_string(topics)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The most recent pending edition, if any.
    pub fn pending_edition(&self) -> Result<Option<Edition>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, run_id, subject, body, urls, topics, status, created_at \
                 FROM editions WHERE status = 'pending' ORDER BY id DESC LIMIT 1",
                [],
                row_to_edition,
            )
            .optional()?;
        Ok(row)
    }

    pub fn mark_edition_sent(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE editions SET status = 'sent' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn mark_edition_discarded(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE editions SET status = 'discarded' WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(())
    }

    /// Thematic metadata of recently sent editions, newest first. Read-only
    /// input for the compiler so it can avoid repeating topics.
    pub fn recent_edition_topics(&self, editions: usize) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT topics FROM editions WHERE status = 'sent' ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([editions as i64], |r| r.get::<_, String>(0))?;
        let mut topics = Vec::new();
        for row in rows {
            let parsed: Vec<String> = serde_json::from_str(&row?)?;
            topics.extend(parsed);
        }
        Ok(topics)
    }

    // ---- subscribers --------------------------------------------------

    pub fn add_subscriber(&self, email: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO subscribers (email, subscribed_at, active) VALUES (?1, ?2, 1)",
            params![email, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn deactivate_subscriber(&self, email: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE subscribers SET active = 0 WHERE email = ?1",
            params![email],
        )?;
        Ok(())
    }

    pub fn active_subscribers(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT email FROM subscribers WHERE active = 1 ORDER BY email ASC")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        let mut emails = Vec::new();
        for row in rows {
            emails.push(row?);
        }
        Ok(emails)
    }

    // ---- editor picks -------------------------------------------------

    pub fn add_editor_pick(&self, url: &str, title: Option<&str>, note: Option<&str>) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO editor_picks (url, title, note, used, created_at) \
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![url, title, note, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn unused_editor_picks(&self) -> Result<Vec<EditorPick>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, title, note FROM editor_picks WHERE used = 0 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(EditorPick {
                id: r.get(0)?,
                url: r.get(1)?,
                title: r.get(2)?,
                note: r.get(3)?,
            })
        })?;
        let mut picks = Vec::new();
        for row in rows {
            picks.push(row?);
        }
        Ok(picks)
    }

    pub fn mark_editor_pick_used(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE editor_picks SET used = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    // ---- usage ledger -------------------------------------------------

    pub fn log_api_usage(
        &self,
        run: &RunContext,
        model: &str,
        step: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO api_usage (run_id, model, step, input_tokens, output_tokens, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.run_id,
                model,
                step,
                input_tokens as i64,
                output_tokens as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ---- pipeline runs ------------------------------------------------

    pub fn create_run(&self) -> Result<RunContext> {
        let run = RunContext::generate();
        self.conn.execute(
            "INSERT INTO pipeline_runs (run_id, status, started_at) VALUES (?1, 'running', ?2)",
            params![run.run_id, run.started_at.to_rfc3339()],
        )?;
        Ok(run)
    }

    pub fn record_collected(&self, run: &RunContext, count: usize) -> Result<()> {
        self.set_run_count(run, "articles_collected", count)
    }

    pub fn record_curated(&self, run: &RunContext, count: usize) -> Result<()> {
        self.set_run_count(run, "articles_curated", count)
    }

    pub fn record_selected(&self, run: &RunContext, count: usize) -> Result<()> {
        self.set_run_count(run, "articles_selected", count)
    }

    fn set_run_count(&self, run: &RunContext, column: &str, count: usize) -> Result<()> {
        // column names come from the private callers above, never from input
        self.conn.execute(
            &format!("UPDATE pipeline_runs SET {column} = ?1 WHERE run_id = ?2"),
            params![count as i64, run.run_id],
        )?;
        Ok(())
    }

    pub fn record_emails(&self, run: &RunContext, sent: usize, failed: usize) -> Result<()> {
        self.conn.execute(
            "UPDATE pipeline_runs SET emails_sent = ?1, emails_failed = ?2 WHERE run_id = ?3",
            params![sent as i64, failed as i64, run.run_id],
        )?;
        Ok(())
    }

    pub fn finish_run(
        &self,
        run: &RunContext,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let finished = Utc::now();
        let duration = (finished - run.started_at).num_milliseconds() as f64 / 1000.0;
        self.conn.execute(
            "UPDATE pipeline_runs SET status = ?1, finished_at = ?2, duration_seconds = ?3, \
             error_message = ?4 WHERE run_id = ?5",
            params![
                status.as_str(),
                finished.to_rfc3339(),
                duration,
                error_message,
                run.run_id,
            ],
        )?;
        Ok(())
    }

    /// Watchdog: runs stuck in `running` longer than `max_age` are
    /// reclassified as failed. Returns the number reclaimed.
    pub fn fail_stale_runs(&self, max_age: Duration) -> Result<usize> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE pipeline_runs SET status = 'failed', finished_at = ?1, \
             error_message = 'reclaimed by stale-run watchdog' \
             WHERE status = 'running' AND started_at < ?2",
            params![Utc::now().to_rfc3339(), cutoff],
        )?;
        Ok(changed)
    }

    pub fn run_record(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, status, articles_collected, articles_curated, \
                 articles_selected, emails_sent, emails_failed, error_message \
                 FROM pipeline_runs WHERE run_id = ?1",
                params![run_id],
                |r| {
                    Ok(RunRecord {
                        run_id: r.get(0)?,
                        status: r.get(1)?,
                        articles_collected: r.get(2)?,
                        articles_curated: r.get(3)?,
                        articles_selected: r.get(4)?,
                        emails_sent: r.get(5)?,
                        emails_failed: r.get(6)?,
                        error_message: r.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

fn row_to_article(row: &Row<'_>) -> rusqlite::Result<Article> {
    let category: String = row.get(5)?;
    let collected_at: String = row.get(12)?;
    let collected_at = collected_at
        .parse::<DateTime<Utc>>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Article {
        url: row.get(0)?,
        title: row.get(1)?,
        source: row.get(2)?,
        raw_content: row.get(3)?,
        summary: row.get(4)?,
        category: Category::parse_lossy(&category),
        scores: Scores {
            relevance: row.get(6)?,
            impact: row.get(7)?,
            actionability: row.get(8)?,
            source_quality: row.get(9)?,
            recency_bonus: row.get(10)?,
        },
        final_score: row.get(11)?,
        collected_at,
        curated: row.get(13)?,
        sent: row.get(14)?,
    })
}

fn row_to_edition(row: &Row<'_>) -> rusqlite::Result<Edition> {
    let urls: String = row.get(4)?;
    let topics: String = row.get(5)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(Edition {
        id: row.get(0)?,
        run_id: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        urls: serde_json::from_str(&urls).unwrap_or_default(),
        topics: serde_json::from_str(&topics).unwrap_or_default(),
        status: EditionStatus::parse_lossy(&status),
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e)))?,
    })
}
