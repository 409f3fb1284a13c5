//! Durable SQLite store for every Reveries table.
//!
//! The schema is logical key-value with JSON payload columns; embeddings are
//! serialised as JSON arrays of f32 and treated as opaque by everything
//! above this layer.

use anyhow::{Context, Result};
use reveries_core::{
    BreakerAction, BreakerEvent, BreakerSeverity, Episode, EpisodeLink, ExperienceKind,
    ExperienceMetadata, Gap, LinkKind, MonologueCheckpoint, RawExperience, Relationship, SelfModel,
};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON").execute(conn).await?;
                    Ok(())
                })
            })
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_experiences (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding TEXT NOT NULL,
                salience REAL NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create raw_experiences table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                summary TEXT NOT NULL,
                embedding TEXT NOT NULL,
                exemplars TEXT NOT NULL DEFAULT '[]',
                temporal_before TEXT NOT NULL DEFAULT '[]',
                temporal_after TEXT NOT NULL DEFAULT '[]',
                gap TEXT NOT NULL DEFAULT '{}',
                salience REAL NOT NULL,
                confidence REAL NOT NULL,
                topics TEXT NOT NULL DEFAULT '[]',
                patterns TEXT NOT NULL DEFAULT '[]'
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create episodes table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episode_links (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                strength REAL NOT NULL,
                kind TEXT NOT NULL,
                PRIMARY KEY (from_id, to_id),
                FOREIGN KEY(from_id) REFERENCES episodes(id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create episode_links table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS self_model (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                narrative TEXT NOT NULL DEFAULT '',
                values_json TEXT NOT NULL DEFAULT '[]',
                tendencies_json TEXT NOT NULL DEFAULT '[]',
                relationship_json TEXT NOT NULL DEFAULT '{}',
                strengths_json TEXT NOT NULL DEFAULT '[]',
                limitations_json TEXT NOT NULL DEFAULT '[]',
                current_focus TEXT,
                threads_json TEXT NOT NULL DEFAULT '[]',
                anticipations_json TEXT NOT NULL DEFAULT '[]',
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create self_model table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monologue_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_buffer TEXT NOT NULL DEFAULT '',
                last_context TEXT NOT NULL DEFAULT '[]',
                quiescent INTEGER NOT NULL DEFAULT 1,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create monologue_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gaps (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                duration_seconds INTEGER,
                significance TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create gaps table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS circuit_breaker_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                action TEXT NOT NULL,
                reason TEXT NOT NULL,
                severity TEXT NOT NULL,
                buffer_snapshot TEXT NOT NULL,
                response_taken TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create circuit_breaker_events table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_processed_ts ON raw_experiences(processed, timestamp)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create raw_experiences index")?;

        Ok(())
    }

    // ========================================================================
    // Raw experiences
    // ========================================================================

    pub async fn insert_raw(&self, exp: &RawExperience) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_experiences (id, kind, timestamp, content, embedding, salience, processed, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&exp.id)
        .bind(exp.kind.as_str())
        .bind(exp.timestamp)
        .bind(&exp.content)
        .bind(embedding_to_json(&exp.embedding))
        .bind(exp.salience as f64)
        .bind(exp.processed as i64)
        .bind(serde_json::to_string(&exp.metadata)?)
        .execute(&self.pool)
        .await
        .context("Failed to insert raw experience")?;
        Ok(())
    }

    /// All unprocessed experiences, oldest first.
    pub async fn unprocessed_raw(&self) -> Result<Vec<RawExperience>> {
        let rows = sqlx::query(
            "SELECT * FROM raw_experiences WHERE processed = 0 ORDER BY timestamp ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch unprocessed experiences")?;
        rows.iter().map(row_to_raw).collect()
    }

    /// Up to `limit` unprocessed experiences newer than `since`, newest first.
    pub async fn recent_unprocessed(&self, since: i64, limit: i64) -> Result<Vec<RawExperience>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM raw_experiences
            WHERE processed = 0 AND timestamp >= ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent experiences")?;
        rows.iter().map(row_to_raw).collect()
    }

    pub async fn mark_processed(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE raw_experiences SET processed = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// (total, unprocessed) counts for wake-time logging and status.
    pub async fn raw_counts(&self) -> Result<(i64, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_experiences")
            .fetch_one(&self.pool)
            .await?;
        let unprocessed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM raw_experiences WHERE processed = 0")
                .fetch_one(&self.pool)
                .await?;
        Ok((total, unprocessed))
    }

    // ========================================================================
    // Episodes + links
    // ========================================================================

    /// All episodes with their persisted links attached.
    pub async fn load_episodes(&self) -> Result<Vec<Episode>> {
        let rows = sqlx::query("SELECT * FROM episodes")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load episodes")?;

        let mut episodes: Vec<Episode> = rows
            .iter()
            .map(row_to_episode)
            .collect::<Result<Vec<_>>>()?;

        let link_rows = sqlx::query("SELECT from_id, to_id, strength, kind FROM episode_links")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load episode links")?;

        let mut by_source: std::collections::HashMap<String, Vec<EpisodeLink>> =
            std::collections::HashMap::new();
        for row in &link_rows {
            let from: String = row.get("from_id");
            let kind_str: String = row.get("kind");
            let Some(kind) = LinkKind::parse(&kind_str) else {
                tracing::warn!("Skipping link with unknown kind '{}'", kind_str);
                continue;
            };
            by_source.entry(from).or_default().push(EpisodeLink {
                target: row.get("to_id"),
                strength: row.get::<f64, _>("strength") as f32,
                kind,
            });
        }

        for ep in &mut episodes {
            if let Some(links) = by_source.remove(&ep.id) {
                ep.links = links;
            }
        }
        Ok(episodes)
    }

    /// Snapshot the given episodes (and their links) into the store.
    ///
    /// Two passes in one transaction: upsert every node first so link rows
    /// never reference a missing episode, then replace each source's links.
    pub async fn save_episodes(&self, episodes: &[Episode]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for ep in episodes {
            sqlx::query(
                r#"
                INSERT INTO episodes
                    (id, created_at, last_accessed, access_count, summary, embedding,
                     exemplars, temporal_before, temporal_after, gap, salience, confidence,
                     topics, patterns)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    last_accessed = excluded.last_accessed,
                    access_count = excluded.access_count,
                    summary = excluded.summary,
                    embedding = excluded.embedding,
                    exemplars = excluded.exemplars,
                    temporal_before = excluded.temporal_before,
                    temporal_after = excluded.temporal_after,
                    gap = excluded.gap,
                    salience = excluded.salience,
                    confidence = excluded.confidence,
                    topics = excluded.topics,
                    patterns = excluded.patterns
                "#,
            )
            .bind(&ep.id)
            .bind(ep.created_at)
            .bind(ep.last_accessed)
            .bind(ep.access_count as i64)
            .bind(&ep.summary)
            .bind(embedding_to_json(&ep.embedding))
            .bind(serde_json::to_string(&ep.exemplars)?)
            .bind(serde_json::to_string(&ep.temporal_before)?)
            .bind(serde_json::to_string(&ep.temporal_after)?)
            .bind(serde_json::to_string(&ep.gap)?)
            .bind(ep.salience as f64)
            .bind(ep.confidence as f64)
            .bind(serde_json::to_string(&ep.topics)?)
            .bind(serde_json::to_string(&ep.patterns)?)
            .execute(&mut *tx)
            .await?;
        }

        for ep in episodes {
            sqlx::query("DELETE FROM episode_links WHERE from_id = ?")
                .bind(&ep.id)
                .execute(&mut *tx)
                .await?;
            for l in &ep.links {
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO episode_links (from_id, to_id, strength, kind)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(&ep.id)
                .bind(&l.target)
                .bind(l.strength as f64)
                .bind(l.kind.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Self-model (singleton)
    // ========================================================================

    pub async fn load_self_model(&self) -> Result<Option<SelfModel>> {
        let row = sqlx::query("SELECT * FROM self_model WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load self-model")?;

        let Some(row) = row else { return Ok(None) };

        let relationship: Relationship =
            serde_json::from_str(&row.get::<String, _>("relationship_json")).unwrap_or_default();
        Ok(Some(SelfModel {
            narrative: row.get("narrative"),
            values: json_list(&row.get::<String, _>("values_json")),
            tendencies: json_list(&row.get::<String, _>("tendencies_json")),
            relationship,
            strengths: json_list(&row.get::<String, _>("strengths_json")),
            limitations: json_list(&row.get::<String, _>("limitations_json")),
            current_focus: row.get("current_focus"),
            unresolved_threads: json_list(&row.get::<String, _>("threads_json")),
            anticipations: json_list(&row.get::<String, _>("anticipations_json")),
            updated_at: row.get("updated_at"),
        }))
    }

    pub async fn save_self_model(&self, model: &SelfModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO self_model
                (id, narrative, values_json, tendencies_json, relationship_json,
                 strengths_json, limitations_json, current_focus, threads_json,
                 anticipations_json, updated_at)
            VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                narrative = excluded.narrative,
                values_json = excluded.values_json,
                tendencies_json = excluded.tendencies_json,
                relationship_json = excluded.relationship_json,
                strengths_json = excluded.strengths_json,
                limitations_json = excluded.limitations_json,
                current_focus = excluded.current_focus,
                threads_json = excluded.threads_json,
                anticipations_json = excluded.anticipations_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&model.narrative)
        .bind(serde_json::to_string(&model.values)?)
        .bind(serde_json::to_string(&model.tendencies)?)
        .bind(serde_json::to_string(&model.relationship)?)
        .bind(serde_json::to_string(&model.strengths)?)
        .bind(serde_json::to_string(&model.limitations)?)
        .bind(&model.current_focus)
        .bind(serde_json::to_string(&model.unresolved_threads)?)
        .bind(serde_json::to_string(&model.anticipations)?)
        .bind(model.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to save self-model")?;
        Ok(())
    }

    // ========================================================================
    // Monologue checkpoint (singleton)
    // ========================================================================

    pub async fn load_checkpoint(&self) -> Result<Option<MonologueCheckpoint>> {
        let row = sqlx::query("SELECT * FROM monologue_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load monologue checkpoint")?;
        Ok(row.map(|row| MonologueCheckpoint {
            last_buffer: row.get("last_buffer"),
            last_context: json_list(&row.get::<String, _>("last_context")),
            quiescent: row.get::<i64, _>("quiescent") != 0,
            updated_at: row.get("updated_at"),
        }))
    }

    pub async fn save_checkpoint(&self, cp: &MonologueCheckpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO monologue_state (id, last_buffer, last_context, quiescent, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                last_buffer = excluded.last_buffer,
                last_context = excluded.last_context,
                quiescent = excluded.quiescent,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&cp.last_buffer)
        .bind(serde_json::to_string(&cp.last_context)?)
        .bind(cp.quiescent as i64)
        .bind(cp.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to save monologue checkpoint")?;
        Ok(())
    }

    // ========================================================================
    // Gaps
    // ========================================================================

    pub async fn insert_gap(&self, gap: &Gap) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gaps (id, conversation_id, started_at, ended_at, duration_seconds, significance)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&gap.id)
        .bind(&gap.conversation_id)
        .bind(gap.started_at)
        .bind(gap.ended_at)
        .bind(gap.duration_seconds)
        .bind(&gap.significance)
        .execute(&self.pool)
        .await
        .context("Failed to insert gap")?;
        Ok(())
    }

    /// The most recently opened gap that has not been closed.
    pub async fn open_gap(&self) -> Result<Option<Gap>> {
        let row = sqlx::query(
            "SELECT * FROM gaps WHERE ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch open gap")?;
        Ok(row.map(|row| Gap {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            started_at: row.get("started_at"),
            ended_at: row.get("ended_at"),
            duration_seconds: row.get("duration_seconds"),
            significance: row.get("significance"),
        }))
    }

    pub async fn close_gap(&self, id: &str, ended_at: i64, duration_seconds: i64) -> Result<()> {
        sqlx::query("UPDATE gaps SET ended_at = ?, duration_seconds = ? WHERE id = ?")
            .bind(ended_at)
            .bind(duration_seconds)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to close gap")?;
        Ok(())
    }

    // ========================================================================
    // Circuit-breaker events (append-only)
    // ========================================================================

    pub async fn log_breaker_event(&self, event: &BreakerEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO circuit_breaker_events
                (timestamp, action, reason, severity, buffer_snapshot, response_taken)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.timestamp)
        .bind(event.action.as_str())
        .bind(&event.reason)
        .bind(event.severity.as_str())
        .bind(&event.buffer_snapshot)
        .bind(&event.response_taken)
        .execute(&self.pool)
        .await
        .context("Failed to log circuit-breaker event")?;
        Ok(())
    }

    pub async fn breaker_events(&self) -> Result<Vec<BreakerEvent>> {
        let rows = sqlx::query("SELECT * FROM circuit_breaker_events ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch circuit-breaker events")?;
        Ok(rows
            .iter()
            .map(|row| BreakerEvent {
                timestamp: row.get("timestamp"),
                action: parse_action(&row.get::<String, _>("action")),
                reason: row.get("reason"),
                severity: parse_severity(&row.get::<String, _>("severity")),
                buffer_snapshot: row.get("buffer_snapshot"),
                response_taken: row.get("response_taken"),
            })
            .collect())
    }
}

// ============================================================================
// Row mapping helpers
// ============================================================================

fn row_to_raw(row: &sqlx::sqlite::SqliteRow) -> Result<RawExperience> {
    let kind_str: String = row.get("kind");
    let kind = ExperienceKind::parse(&kind_str)
        .ok_or_else(|| anyhow::anyhow!("Unknown experience kind '{}'", kind_str))?;
    let metadata: ExperienceMetadata =
        serde_json::from_str(&row.get::<String, _>("metadata")).unwrap_or_default();
    Ok(RawExperience {
        id: row.get("id"),
        kind,
        timestamp: row.get("timestamp"),
        content: row.get("content"),
        embedding: embedding_from_json(&row.get::<String, _>("embedding")),
        salience: row.get::<f64, _>("salience") as f32,
        processed: row.get::<i64, _>("processed") != 0,
        metadata,
    })
}

fn row_to_episode(row: &sqlx::sqlite::SqliteRow) -> Result<Episode> {
    Ok(Episode {
        id: row.get("id"),
        created_at: row.get("created_at"),
        last_accessed: row.get("last_accessed"),
        access_count: row.get::<i64, _>("access_count").max(0) as u32,
        summary: row.get("summary"),
        embedding: embedding_from_json(&row.get::<String, _>("embedding")),
        exemplars: serde_json::from_str(&row.get::<String, _>("exemplars")).unwrap_or_default(),
        temporal_before: json_list(&row.get::<String, _>("temporal_before")),
        temporal_after: json_list(&row.get::<String, _>("temporal_after")),
        gap: serde_json::from_str(&row.get::<String, _>("gap")).unwrap_or_default(),
        links: Vec::new(), // attached by load_episodes
        salience: row.get::<f64, _>("salience") as f32,
        confidence: row.get::<f64, _>("confidence") as f32,
        topics: json_list(&row.get::<String, _>("topics")),
        patterns: json_list(&row.get::<String, _>("patterns")),
    })
}

fn embedding_to_json(embedding: &[f32]) -> String {
    serde_json::to_string(embedding).unwrap_or_else(|_| "[]".to_string())
}

fn embedding_from_json(text: &str) -> Vec<f32> {
    serde_json::from_str(text).unwrap_or_default()
}

fn json_list(text: &str) -> Vec<String> {
    serde_json::from_str(text).unwrap_or_default()
}

fn parse_action(s: &str) -> BreakerAction {
    match s {
        "interrupt" => BreakerAction::Interrupt,
        "interrupt_and_comfort" => BreakerAction::InterruptAndComfort,
        "throttle" => BreakerAction::Throttle,
        "snapshot_and_reset" => BreakerAction::SnapshotAndReset,
        _ => BreakerAction::Continue,
    }
}

fn parse_severity(s: &str) -> BreakerSeverity {
    match s {
        "medium" => BreakerSeverity::Medium,
        "high" => BreakerSeverity::High,
        _ => BreakerSeverity::Low,
    }
}
