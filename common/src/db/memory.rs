use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::{config::DRConfig, db::DbBackend, unix_time};
use api::{
    photo::{Photo, PhotoRecord, PhotoUpdate, PhotoUuid},
    search::PhotoFilter,
};

// in-process repository
//
// nothing survives a restart, which makes this suitable for tests and for
// kicking the tyres on a fresh install
#[derive(Debug)]
pub struct MemoryBackend {
    photos: DashMap<PhotoUuid, Photo>,
    next_uuid: AtomicI64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend {
            photos: DashMap::new(),
            next_uuid: AtomicI64::new(1),
        }
    }
}

// does this photo pass every part of the filter except paging
fn matches(photo: &Photo, uid: &str, filter: &PhotoFilter) -> bool {
    if photo.uid != uid {
        return false;
    }

    if let Some(start) = filter.start {
        if photo.ctime < start {
            return false;
        }
    }

    if let Some(end) = filter.end {
        if photo.ctime > end {
            return false;
        }
    }

    if let Some(tag) = &filter.tag {
        let tag = tag.to_lowercase();
        if !photo.tags.iter().any(|t| t.name.to_lowercase() == tag) {
            return false;
        }
    }

    if !filter.query.is_empty() {
        let query = filter.query.to_lowercase();
        let found = photo.title.to_lowercase().contains(&query)
            || photo.description.to_lowercase().contains(&query)
            || photo
                .tags
                .iter()
                .any(|t| t.name.to_lowercase().contains(&query));

        if !found {
            return false;
        }
    }

    true
}

#[async_trait]
impl DbBackend for MemoryBackend {
    fn new(_config: Arc<DRConfig>) -> Result<Self> {
        info!("creating in-memory repository");

        Ok(Self::default())
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    #[instrument(skip_all)]
    async fn add_photo(&self, photo: Photo) -> anyhow::Result<PhotoUuid> {
        let photo_uuid = self.next_uuid.fetch_add(1, Ordering::Relaxed);

        debug!({ photo_uuid = photo_uuid, filename = photo.asset.filename }, "adding photo");

        self.photos.insert(photo_uuid, photo);

        Ok(photo_uuid)
    }

    async fn get_photo(&self, photo_uuid: PhotoUuid) -> anyhow::Result<Option<Photo>> {
        Ok(self.photos.get(&photo_uuid).map(|p| p.value().clone()))
    }

    async fn find_photo_by_digest(&self, digest: String) -> anyhow::Result<Option<PhotoRecord>> {
        // oldest record wins, matching the sql backend's ordering
        let found = self
            .photos
            .iter()
            .filter(|entry| entry.value().digest == digest)
            .min_by_key(|entry| *entry.key())
            .map(|entry| PhotoRecord {
                photo_uuid: *entry.key(),
                photo: entry.value().clone(),
            });

        Ok(found)
    }

    #[instrument(skip_all)]
    async fn update_photo(&self, photo_uuid: PhotoUuid, update: PhotoUpdate) -> anyhow::Result<()> {
        debug!({ photo_uuid = photo_uuid }, "updating photo");

        let mut photo = self
            .photos
            .get_mut(&photo_uuid)
            .ok_or_else(|| anyhow::Error::msg(format!("no photo with uuid {photo_uuid}")))?;

        if let Some(title) = update.title {
            photo.title = title;
        }

        if let Some(description) = update.description {
            photo.description = description;
        }

        if let Some(tags) = update.tags {
            photo.tags = tags;
        }

        photo.mtime = unix_time();

        Ok(())
    }

    async fn delete_photo(&self, photo_uuid: PhotoUuid) -> anyhow::Result<()> {
        self.photos.remove(&photo_uuid);
        Ok(())
    }

    async fn count_photos_by_filename(&self, filename: String) -> anyhow::Result<u64> {
        let count = self
            .photos
            .iter()
            .filter(|entry| entry.value().asset.filename == filename)
            .count();

        Ok(count as u64)
    }

    #[instrument(skip_all)]
    async fn search_photos(
        &self,
        uid: String,
        filter: PhotoFilter,
    ) -> anyhow::Result<(Vec<PhotoRecord>, u64)> {
        let filter = filter.normalized();

        let mut found = self
            .photos
            .iter()
            .filter(|entry| matches(entry.value(), &uid, &filter))
            .map(|entry| PhotoRecord {
                photo_uuid: *entry.key(),
                photo: entry.value().clone(),
            })
            .collect::<Vec<_>>();

        found.sort_by(|a, b| {
            b.photo
                .ctime
                .cmp(&a.photo.ctime)
                .then(b.photo_uuid.cmp(&a.photo_uuid))
        });

        let total = found.len() as u64;

        let page = found
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect::<Vec<_>>();

        debug!({ uid = uid, total = total, returned = page.len() }, "searched photos");

        Ok((page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use api::{photo::PhotoAsset, tag::Tag};

    fn photo(uid: &str, title: &str, filename: &str, ctime: i64, tags: &[&str]) -> Photo {
        Photo {
            uid: uid.to_owned(),
            title: title.to_owned(),
            description: String::new(),
            asset: PhotoAsset {
                filename: filename.to_owned(),
                path: format!("/uploads/{filename}"),
                thumb_path: format!("/uploads/thumb_{filename}"),
            },
            digest: format!("digest-{filename}"),
            size: 1,
            mime: String::from("image/jpeg"),
            metadata: None,
            tags: tags.iter().map(|t| Tag::user(*t)).collect(),
            ctime,
            mtime: ctime,
        }
    }

    #[tokio::test]
    async fn add_get_update_delete() {
        let db = MemoryBackend::default();

        let uuid = db.add_photo(photo("alice", "a", "a.jpg", 10, &[])).await.unwrap();
        assert_eq!(db.get_photo(uuid).await.unwrap().unwrap().title, "a");

        db.update_photo(
            uuid,
            PhotoUpdate {
                title: Some(String::from("renamed")),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let updated = db.get_photo(uuid).await.unwrap().unwrap();
        assert_eq!(updated.title, "renamed");
        assert!(updated.mtime >= 10);

        db.delete_photo(uuid).await.unwrap();
        assert!(db.get_photo(uuid).await.unwrap().is_none());
        assert!(db.update_photo(uuid, PhotoUpdate::default()).await.is_err());
    }

    #[tokio::test]
    async fn filename_references_are_counted_across_owners() {
        let db = MemoryBackend::default();

        db.add_photo(photo("alice", "a", "shared.jpg", 1, &[])).await.unwrap();
        db.add_photo(photo("bob", "b", "shared.jpg", 2, &[])).await.unwrap();
        db.add_photo(photo("bob", "c", "other.jpg", 3, &[])).await.unwrap();

        assert_eq!(db.count_photos_by_filename(String::from("shared.jpg")).await.unwrap(), 2);
        assert_eq!(db.count_photos_by_filename(String::from("gone.jpg")).await.unwrap(), 0);

        let found = db
            .find_photo_by_digest(String::from("digest-shared.jpg"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.photo.uid, "alice");
    }

    async fn search(db: &MemoryBackend, filter: PhotoFilter) -> (Vec<PhotoRecord>, u64) {
        db.search_photos(String::from("alice"), filter).await.unwrap()
    }

    #[tokio::test]
    async fn search_filters_and_pages() {
        let db = MemoryBackend::default();

        db.add_photo(photo("alice", "Beach day", "1.jpg", 100, &["sunset"])).await.unwrap();
        db.add_photo(photo("alice", "City", "2.jpg", 200, &["Night"])).await.unwrap();
        db.add_photo(photo("alice", "Forest", "3.jpg", 300, &["trees", "night"])).await.unwrap();
        db.add_photo(photo("bob", "Beach", "4.jpg", 400, &["sunset"])).await.unwrap();

        let (all, total) = search(&db, PhotoFilter::default()).await;
        assert_eq!(total, 3);
        let titles = all.iter().map(|r| r.photo.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Forest", "City", "Beach day"]);

        let (tagged, total) = search(&db, PhotoFilter {
            tag: Some(String::from("NIGHT")),
            ..Default::default()
        })
        .await;
        assert_eq!(total, 2);
        assert!(tagged.iter().all(|r| r.photo.title != "Beach day"));

        let (queried, _) = search(&db, PhotoFilter {
            query: String::from("sun"),
            ..Default::default()
        })
        .await;
        assert_eq!(queried.len(), 1);
        assert_eq!(queried[0].photo.title, "Beach day");

        let (ranged, _) = search(&db, PhotoFilter {
            start: Some(150),
            end: Some(300),
            ..Default::default()
        })
        .await;
        assert_eq!(ranged.len(), 2);

        let (paged, total) = search(&db, PhotoFilter {
            page: 2,
            limit: 2,
            ..Default::default()
        })
        .await;
        assert_eq!(total, 3);
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].photo.title, "Beach day");
    }
}
