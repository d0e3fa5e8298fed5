mod state;
mod violation;

use std::{path::Path, sync::Arc};

use sqlx::{Row, sqlite::SqliteRow};
use state::StoreState;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

pub use violation::{
    ANONYMOUS_USER, ImageStore, NewViolation, VIOLATION_TYPE_NO_HELMET, Violation, ViolationRepository,
};

/// SQLite-backed violation store plus a local directory for uploaded images.
#[derive(Debug, Clone)]
pub struct ViolationDb {
    state: Arc<StoreState>,
}

impl ViolationDb {
    pub async fn new<P: AsRef<Path>, Q: AsRef<Path>>(db_file: P, image_root: Q) -> anyhow::Result<Self> {
        Ok(Self {
            state: Arc::new(StoreState::new(db_file, image_root).await?),
        })
    }

    pub fn image_root(&self) -> &Path {
        self.state.image_root()
    }

    /// Close the pool; any further call fails.
    pub async fn close(&self) {
        self.state.close().await;
    }
}

fn violation_from_row(row: &SqliteRow) -> anyhow::Result<Violation> {
    let timestamp: String = row.try_get("timestamp")?;
    Ok(Violation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        timestamp: OffsetDateTime::parse(&timestamp, &Rfc3339)?,
        image_reference: row.try_get("image_reference")?,
        plate_text: row.try_get("plate_text")?,
        plate_confidence: row.try_get("plate_confidence")?,
        has_helmet: row.try_get("has_helmet")?,
        violation_type: row.try_get("violation_type")?,
        _guard: (),
    })
}

const SELECT_VIOLATION: &str = r#"SELECT id, user_id, timestamp, image_reference, plate_text,
    plate_confidence, has_helmet, violation_type FROM violation"#;

impl ViolationRepository for ViolationDb {
    async fn append(&self, violation: &NewViolation) -> anyhow::Result<Violation> {
        let id = Uuid::new_v4().to_string();
        let timestamp = OffsetDateTime::now_utc();
        let timestamp_str = timestamp.format(&Rfc3339)?;

        sqlx::query(
            r#"INSERT INTO violation
                (id, user_id, timestamp, image_reference, plate_text, plate_confidence, has_helmet, violation_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&id)
        .bind(&violation.user_id)
        .bind(&timestamp_str)
        .bind(&violation.image_reference)
        .bind(&violation.plate_text)
        .bind(violation.plate_confidence)
        .bind(violation.has_helmet)
        .bind(&violation.violation_type)
        .execute(self.state.pool())
        .await?;

        Ok(Violation {
            id,
            user_id: violation.user_id.clone(),
            timestamp,
            image_reference: violation.image_reference.clone(),
            plate_text: violation.plate_text.clone(),
            plate_confidence: violation.plate_confidence,
            has_helmet: violation.has_helmet,
            violation_type: violation.violation_type.clone(),
            _guard: (),
        })
    }

    async fn get_violation_by_id(&self, id: &str) -> anyhow::Result<Option<Violation>> {
        let query = format!("{} WHERE id = $1", SELECT_VIOLATION);
        sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.state.pool())
            .await?
            .map(|row| violation_from_row(&row))
            .transpose()
    }

    async fn list_violations(&self) -> anyhow::Result<Vec<Violation>> {
        let query = format!("{} ORDER BY seq ASC", SELECT_VIOLATION);
        sqlx::query(&query)
            .fetch_all(self.state.pool())
            .await?
            .iter()
            .map(violation_from_row)
            .collect()
    }

    async fn count_violations(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM violation")
            .fetch_one(self.state.pool())
            .await?;
        Ok(count as u64)
    }
}

impl ImageStore for ViolationDb {
    async fn store_image(&self, bytes: &[u8], extension: &str) -> anyhow::Result<String> {
        self.state.store_image(bytes, extension).await
    }

    async fn remove_image(&self, reference: &str) -> anyhow::Result<()> {
        self.state.remove_image(reference).await
    }
}
