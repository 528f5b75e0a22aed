use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use mysql_async::{FromValueError, Pool, Row, from_row_opt, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{config::DRConfig, db::DbBackend, unix_time};
use api::{
    photo::{Photo, PhotoAsset, PhotoMetadata, PhotoRecord, PhotoUpdate, PhotoUuid},
    search::PhotoFilter,
    tag::Tag,
};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MariaDbConfig {
    pub url: String,
}

// metadata and tags are stored as json documents, since neither is ever
// queried by anything but the search filter
const MIGRATION: &str = r"
    CREATE TABLE IF NOT EXISTS photos (
        photo_uuid BIGINT NOT NULL PRIMARY KEY,
        uid VARCHAR(64) NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        filename VARCHAR(255) NOT NULL,
        path VARCHAR(255) NOT NULL,
        thumb_path VARCHAR(255) NOT NULL,
        digest CHAR(64) NOT NULL,
        size BIGINT UNSIGNED NOT NULL,
        mime VARCHAR(255) NOT NULL,
        metadata JSON,
        tags JSON NOT NULL,
        ctime BIGINT NOT NULL,
        mtime BIGINT NOT NULL,
        INDEX photos_uid_ctime (uid, ctime),
        INDEX photos_digest (digest),
        INDEX photos_filename (filename)
    )";

const PHOTO_COLUMNS: &str = r"
    photo_uuid, uid, title, description, filename, path, thumb_path, digest, size, mime, metadata, tags, ctime, mtime";

// shared by the search and count queries so that the total always agrees with the page
const SEARCH_CONDITIONS: &str = r"
    uid = :uid
    AND (:start IS NULL OR ctime >= :start)
    AND (:end IS NULL OR ctime <= :end)
    AND (:tag IS NULL OR JSON_SEARCH(LOWER(tags), 'one', :tag, NULL, '$[*].name') IS NOT NULL)
    AND (:pattern IS NULL
        OR LOWER(title) LIKE :pattern
        OR LOWER(description) LIKE :pattern
        OR JSON_SEARCH(LOWER(tags), 'one', :pattern, NULL, '$[*].name') IS NOT NULL)";

// escape the LIKE/JSON_SEARCH wildcards in user input
fn escape_wildcards(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn take<T: FromValue>(row: &mut Row, column: &str) -> Result<T> {
    row.take_opt(column)
        .ok_or_else(|| anyhow::Error::msg(format!("missing column {column}")))?
        .map_err(|err: FromValueError| {
            anyhow::Error::msg(format!("invalid value in column {column}: {err:?}"))
        })
}

fn record_from_row(mut row: Row) -> Result<PhotoRecord> {
    let photo_uuid: PhotoUuid = take(&mut row, "photo_uuid")?;

    let metadata = match take::<Option<String>>(&mut row, "metadata")? {
        Some(doc) => serde_json::from_str::<Option<PhotoMetadata>>(&doc)?,
        None => None,
    };

    let tags = serde_json::from_str::<Vec<Tag>>(&take::<String>(&mut row, "tags")?)?;

    Ok(PhotoRecord {
        photo_uuid,
        photo: Photo {
            uid: take(&mut row, "uid")?,
            title: take(&mut row, "title")?,
            description: take(&mut row, "description")?,
            asset: PhotoAsset {
                filename: take(&mut row, "filename")?,
                path: take(&mut row, "path")?,
                thumb_path: take(&mut row, "thumb_path")?,
            },
            digest: take(&mut row, "digest")?,
            size: take(&mut row, "size")?,
            mime: take(&mut row, "mime")?,
            metadata,
            tags,
            ctime: take(&mut row, "ctime")?,
            mtime: take(&mut row, "mtime")?,
        },
    })
}

pub struct MariaDBBackend {
    pool: Pool,
}

#[async_trait]
impl DbBackend for MariaDBBackend {
    fn new(config: Arc<DRConfig>) -> Result<Self> {
        info!("creating MariaDB connection pool");

        let mariadb = config
            .mariadb
            .as_ref()
            .ok_or_else(|| anyhow::Error::msg("missing [config.mariadb] table"))?;

        Ok(Self {
            pool: Pool::from_url(mariadb.url.as_str())?,
        })
    }

    #[instrument(skip_all)]
    async fn migrate(&self) -> anyhow::Result<()> {
        debug!("creating photos table");

        MIGRATION.ignore(self.pool.get_conn().await?).await?;

        Ok(())
    }

    #[instrument(skip_all)]
    async fn add_photo(&self, photo: Photo) -> anyhow::Result<PhotoUuid> {
        debug!({ filename = photo.asset.filename }, "adding photo");

        let mut result = r"
            INSERT INTO photos (photo_uuid, uid, title, description, filename, path, thumb_path, digest, size, mime, metadata, tags, ctime, mtime)
            VALUES (
                UUID_SHORT(),
                :uid,
                :title,
                :description,
                :filename,
                :path,
                :thumb_path,
                :digest,
                :size,
                :mime,
                :metadata,
                :tags,
                :ctime,
                :mtime
            )
            RETURNING photo_uuid"
            .with(params! {
                "uid" => photo.uid.clone(),
                "title" => photo.title.clone(),
                "description" => photo.description.clone(),
                "filename" => photo.asset.filename.clone(),
                "path" => photo.asset.path.clone(),
                "thumb_path" => photo.asset.thumb_path.clone(),
                "digest" => photo.digest.clone(),
                "size" => photo.size,
                "mime" => photo.mime.clone(),
                "metadata" => photo.metadata.as_ref().map(serde_json::to_string).transpose()?,
                "tags" => serde_json::to_string(&photo.tags)?,
                "ctime" => photo.ctime,
                "mtime" => photo.mtime,
            })
            .run(self.pool.get_conn().await?)
            .await?
            .collect::<Row>()
            .await?;

        let row = result
            .pop()
            .ok_or_else(|| anyhow::Error::msg("failed to add photo"))?;

        let data = from_row_opt::<PhotoUuid>(row)?;

        debug!({ filename = photo.asset.filename, photo_uuid = data }, "added photo");

        Ok(data)
    }

    #[instrument(skip_all)]
    async fn get_photo(&self, photo_uuid: PhotoUuid) -> anyhow::Result<Option<Photo>> {
        debug!({ photo_uuid = photo_uuid }, "getting photo details");

        let mut result = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE photo_uuid = :photo_uuid")
            .with(params! {
                "photo_uuid" => photo_uuid,
            })
            .run(self.pool.get_conn().await?)
            .await?
            .collect::<Row>()
            .await?;

        match result.pop() {
            Some(row) => Ok(Some(record_from_row(row)?.photo)),
            None => Ok(None),
        }
    }

    #[instrument(skip_all)]
    async fn find_photo_by_digest(&self, digest: String) -> anyhow::Result<Option<PhotoRecord>> {
        debug!({ digest = digest }, "searching for photo by digest");

        let mut result = format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE digest = :digest ORDER BY photo_uuid LIMIT 1"
        )
        .with(params! {
            "digest" => digest,
        })
        .run(self.pool.get_conn().await?)
        .await?
        .collect::<Row>()
        .await?;

        result.pop().map(record_from_row).transpose()
    }

    #[instrument(skip_all)]
    async fn update_photo(&self, photo_uuid: PhotoUuid, update: PhotoUpdate) -> anyhow::Result<()> {
        debug!({ photo_uuid = photo_uuid }, "updating photo details");

        // COALESCE keeps the current value for every field the update leaves as None
        r"
            UPDATE photos SET
                title = COALESCE(:title, title),
                description = COALESCE(:description, description),
                tags = COALESCE(:tags, tags),
                mtime = :mtime
            WHERE photo_uuid = :photo_uuid"
            .with(params! {
                "title" => update.title,
                "description" => update.description,
                "tags" => update.tags.as_ref().map(serde_json::to_string).transpose()?,
                "mtime" => unix_time(),
                "photo_uuid" => photo_uuid,
            })
            .ignore(self.pool.get_conn().await?)
            .await?;

        Ok(())
    }

    #[instrument(skip_all)]
    async fn delete_photo(&self, photo_uuid: PhotoUuid) -> anyhow::Result<()> {
        debug!({ photo_uuid = photo_uuid }, "deleting photo");

        r"
            DELETE FROM photos WHERE photo_uuid = :photo_uuid"
            .with(params! {
                "photo_uuid" => photo_uuid,
            })
            .ignore(self.pool.get_conn().await?)
            .await?;

        Ok(())
    }

    #[instrument(skip_all)]
    async fn count_photos_by_filename(&self, filename: String) -> anyhow::Result<u64> {
        debug!({ filename = filename }, "counting photo references");

        let mut result = r"
            SELECT COUNT(*) FROM photos WHERE filename = :filename"
            .with(params! {
                "filename" => filename,
            })
            .run(self.pool.get_conn().await?)
            .await?
            .collect::<Row>()
            .await?;

        let row = result
            .pop()
            .ok_or_else(|| anyhow::Error::msg("failed to count photos"))?;

        Ok(from_row_opt::<u64>(row)?)
    }

    #[instrument(skip_all)]
    async fn search_photos(
        &self,
        uid: String,
        filter: PhotoFilter,
    ) -> anyhow::Result<(Vec<PhotoRecord>, u64)> {
        let filter = filter.normalized();

        debug!({ uid = uid, filter = ?filter }, "searching photos");

        let tag = filter.tag.as_ref().map(|t| escape_wildcards(&t.to_lowercase()));
        let pattern = if filter.query.is_empty() {
            None
        } else {
            Some(format!("%{}%", escape_wildcards(&filter.query.to_lowercase())))
        };

        let conditions = params! {
            "uid" => uid.clone(),
            "start" => filter.start,
            "end" => filter.end,
            "tag" => tag.clone(),
            "pattern" => pattern.clone(),
        };

        let mut count_result = format!("SELECT COUNT(*) FROM photos WHERE {SEARCH_CONDITIONS}")
            .with(conditions)
            .run(self.pool.get_conn().await?)
            .await?
            .collect::<Row>()
            .await?;

        let total = match count_result.pop() {
            Some(row) => from_row_opt::<u64>(row)?,
            None => 0,
        };

        let result = format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE {SEARCH_CONDITIONS}
            ORDER BY ctime DESC, photo_uuid DESC
            LIMIT :limit OFFSET :offset"
        )
        .with(params! {
            "uid" => uid.clone(),
            "start" => filter.start,
            "end" => filter.end,
            "tag" => tag.clone(),
            "pattern" => pattern.clone(),
            "limit" => filter.limit,
            "offset" => filter.offset(),
        })
        .run(self.pool.get_conn().await?)
        .await?
        .collect::<Row>()
        .await?;

        let data = result
            .into_iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;

        debug!({ uid = uid, total = total, returned = data.len() }, "found photos");

        Ok((data, total))
    }
}
