use std::path::{Path, PathBuf};

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tokio::fs as async_fs;
use tracing::info;
use uuid::Uuid;

const IMAGE_SUBDIR: &str = "violations";

pub(super) struct StoreState {
    db_file: PathBuf,
    image_root: PathBuf,
    pool: SqlitePool,
}

impl std::fmt::Debug for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreState")
            .field("db_file", &self.db_file)
            .field("image_root", &self.image_root)
            .finish()
    }
}

impl StoreState {
    pub(super) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Write image bytes under `<image_root>/violations/`, returning the relative reference.
    pub(super) async fn store_image(&self, bytes: &[u8], extension: &str) -> anyhow::Result<String> {
        let images_dir = self.image_root.join(IMAGE_SUBDIR);
        async_fs::create_dir_all(&images_dir)
            .await
            .with_context(|| format!("Failed to create image directory {:?}", images_dir))?;

        let extension = extension.trim_start_matches('.');
        let img_fname = if extension.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}.{}", Uuid::new_v4(), extension)
        };
        let dest_path = images_dir.join(&img_fname);
        async_fs::write(&dest_path, bytes)
            .await
            .with_context(|| format!("Failed to write image to {:?}", dest_path))?;

        Ok(format!("{}/{}", IMAGE_SUBDIR, img_fname))
    }

    pub(super) async fn remove_image(&self, reference: &str) -> anyhow::Result<()> {
        let Some(file_name) = reference.strip_prefix(&format!("{}/", IMAGE_SUBDIR)) else {
            anyhow::bail!("Not a stored image reference: {}", reference);
        };
        if file_name.is_empty() || file_name.contains(['/', '\\']) || file_name.starts_with('.') {
            anyhow::bail!("Not a stored image reference: {}", reference);
        }

        let path = self.image_root.join(IMAGE_SUBDIR).join(file_name);
        async_fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to remove image {:?}", path))
    }

    pub(super) fn image_root(&self) -> &Path {
        &self.image_root
    }

    pub(super) async fn new<P: AsRef<Path>, Q: AsRef<Path>>(db_file: P, image_root: Q) -> anyhow::Result<Self> {
        let db_file = db_file.as_ref().to_path_buf();
        let image_root = image_root.as_ref().to_path_buf();

        if let Some(parent) = db_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                anyhow::bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(&db_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_opts)
            .await
            .with_context(|| format!("Failed to open violation database {:?}", db_file))?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!(db = %db_file.display(), images = %image_root.display(), "Violation store opened");
        Ok(Self {
            db_file,
            image_root,
            pool,
        })
    }

    pub(super) async fn close(&self) {
        self.pool.close().await;
    }
}
