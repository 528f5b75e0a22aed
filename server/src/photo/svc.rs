use std::sync::Arc;

use anyhow::Result;
use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use tokio::{sync::Mutex, task::spawn_blocking};
use tracing::{Level, debug, info, instrument, warn};

use crate::db::DbClient;
use crate::photo::{DRPhotoService, PhotoError, PhotoUpload, UploadOutcome, msg::PhotoMsg};
use crate::service::{
    DRInner, DRM, DRMReceiver, DRMRegistry, DRMSender, DarkroomService, ServiceType,
    spawn_message_loop,
};
use crate::task::{enrich::EnrichmentOutcome, schedule_enrichment};
use api::{
    photo::{EditPhotoReq, Photo, PhotoAsset, PhotoMetadata, PhotoRecord, PhotoUpdate, PhotoUuid},
    search::{PhotoFilter, SearchPhotosResp},
    tag::Tag,
};
use common::{
    config::DRConfig,
    media::{
        MediaError, guess_mime,
        image::{create_image_thumbnail, edit_image, extract_metadata},
        mime_for_extension, normalize_edit_extension,
    },
    store::{
        ContentStore, StoredAsset, digest_file, extension_of, public_path, stem_of,
        thumbnail_name, unique_nanos,
    },
    tags::{build_heuristic_tags, merge_tags},
    unix_time,
};

pub struct PhotoService {
    config: Arc<DRConfig>,
    receiver: Arc<Mutex<DRMReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
}

#[async_trait]
impl DarkroomService for PhotoService {
    type Inner = PhotoRunner;

    fn create(config: Arc<DRConfig>, registry: &DRMRegistry) -> Result<Self> {
        let (tx, rx) = tokio::sync::mpsc::channel::<DRM>(1024);

        registry.insert(ServiceType::Photo, tx)?;

        Ok(PhotoService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
        })
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &DRMRegistry) -> Result<()> {
        info!("starting photo service");

        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(PhotoRunner::new(self.config.clone(), registry.clone())?);

        state.store.ensure_root().await?;

        self.handle
            .set(spawn_message_loop("photo", receiver, state));

        debug!("started photo service");
        Ok(())
    }
}

pub struct PhotoRunner {
    config: Arc<DRConfig>,
    registry: DRMRegistry,
    store: ContentStore,
    db: DbClient,
    task_sender: DRMSender,
}

#[async_trait]
impl DRInner for PhotoRunner {
    fn new(config: Arc<DRConfig>, registry: DRMRegistry) -> Result<Self> {
        Ok(PhotoRunner {
            config: config.clone(),
            registry: registry.clone(),
            store: ContentStore::new(config.fs.upload_dir.clone()),
            db: DbClient::new(&config, &registry)?,
            task_sender: registry.get(&ServiceType::Task)?,
        })
    }

    fn registry(&self) -> DRMRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, drm: DRM) -> Result<()> {
        match drm {
            DRM::Photo(message) => match message {
                PhotoMsg::UploadPhoto { resp, uid, upload } => {
                    self.respond(resp, self.upload_photo(uid, upload)).await
                }
                PhotoMsg::GetPhoto {
                    resp,
                    uid,
                    photo_uuid,
                } => self.respond(resp, self.get_photo(uid, photo_uuid)).await,
                PhotoMsg::SearchPhotos { resp, uid, filter } => {
                    self.respond(resp, self.search_photos(uid, filter)).await
                }
                PhotoMsg::UpdatePhoto {
                    resp,
                    uid,
                    photo_uuid,
                    update,
                } => {
                    self.respond(resp, self.update_photo(uid, photo_uuid, update))
                        .await
                }
                PhotoMsg::DeletePhoto {
                    resp,
                    uid,
                    photo_uuid,
                } => self.respond(resp, self.delete_photo(uid, photo_uuid)).await,
                PhotoMsg::EditPhoto {
                    resp,
                    uid,
                    photo_uuid,
                    edit,
                } => {
                    self.respond(resp, self.edit_photo(uid, photo_uuid, edit))
                        .await
                }
                PhotoMsg::GenerateTags {
                    resp,
                    uid,
                    photo_uuid,
                } => self.respond(resp, self.generate_tags(uid, photo_uuid)).await,
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}

impl PhotoRunner {
    // the record, provided it exists and belongs to uid
    async fn owned_photo(&self, uid: &str, photo_uuid: PhotoUuid) -> Result<Photo> {
        let photo = self
            .db
            .get_photo(photo_uuid)
            .await?
            .ok_or(PhotoError::NotFound)?;

        if photo.uid != uid {
            return Err(PhotoError::Forbidden.into());
        }

        Ok(photo)
    }

    // thumbnail for a stored file, or the file itself if one cannot be made
    #[instrument(skip(self))]
    async fn derive_thumbnail(&self, filename: &str) -> String {
        let thumbnail = thumbnail_name(filename);

        let source = self.store.disk_path(filename);
        let target = self.store.disk_path(&thumbnail);
        let width = self.config.fs.thumbnail_width;

        match spawn_blocking(move || create_image_thumbnail(&source, &target, width)).await {
            Ok(Ok(())) => thumbnail,
            Ok(Err(err)) => {
                warn!({ error = %err }, "failed to create thumbnail, using original");
                filename.to_owned()
            }
            Err(err) => {
                warn!({ error = %err }, "thumbnail task failed, using original");
                filename.to_owned()
            }
        }
    }

    // remove a freshly written asset whose record never made it to the repository
    async fn discard_asset(&self, filename: &str, thumbnail: &str) {
        self.store.remove(filename).await;

        if thumbnail != filename {
            self.store.remove(thumbnail).await;
        }
    }

    // everything about a new asset that is derived from the file itself
    async fn ingest_asset(
        &self,
        stored: &StoredAsset,
        upload_filename: &str,
        declared_mime: Option<String>,
    ) -> (PhotoAsset, String, Vec<Tag>, Option<PhotoMetadata>) {
        let path = self.store.disk_path(&stored.filename);
        let metadata = spawn_blocking(move || extract_metadata(&path))
            .await
            .ok()
            .flatten();

        let thumbnail = self.derive_thumbnail(&stored.filename).await;

        let mime = declared_mime
            .map(|m| m.trim().to_owned())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| guess_mime(upload_filename));

        let tags = build_heuristic_tags(metadata.as_ref(), &extension_of(upload_filename), &mime);

        let asset = PhotoAsset {
            filename: stored.filename.clone(),
            path: public_path(&stored.filename),
            thumb_path: public_path(&thumbnail),
        };

        (asset, mime, tags, metadata)
    }
}

#[async_trait]
impl DRPhotoService for PhotoRunner {
    #[instrument(skip(self, upload), fields(filename = %upload.filename))]
    async fn upload_photo(&self, uid: String, upload: PhotoUpload) -> Result<UploadOutcome> {
        let PhotoUpload {
            filename,
            mime,
            stream,
        } = upload;

        let staged = self.store.stage(stream).await?;

        let now = unix_time();

        let (photo, fresh) = match self.db.find_photo_by_digest(staged.digest.clone()).await? {
            Some(existing) => {
                debug!(
                    { digest = staged.digest, photo_uuid = existing.photo_uuid },
                    "content already stored, reusing asset"
                );

                // removes the staging file
                drop(staged);

                let existing = existing.photo;
                let tags = build_heuristic_tags(
                    existing.metadata.as_ref(),
                    &extension_of(&existing.asset.filename),
                    &existing.mime,
                );

                let photo = Photo {
                    uid: uid.clone(),
                    title: filename,
                    description: String::new(),
                    asset: existing.asset,
                    digest: existing.digest,
                    size: existing.size,
                    mime: existing.mime,
                    metadata: existing.metadata,
                    tags,
                    ctime: now,
                    mtime: now,
                };

                (photo, false)
            }
            None => {
                let stored = self.store.commit(staged, &extension_of(&filename)).await?;

                let (asset, mime, tags, metadata) =
                    self.ingest_asset(&stored, &filename, mime).await;

                let photo = Photo {
                    uid: uid.clone(),
                    title: filename,
                    description: String::new(),
                    asset,
                    digest: stored.digest,
                    size: stored.size,
                    mime,
                    metadata,
                    tags,
                    ctime: now,
                    mtime: now,
                };

                (photo, true)
            }
        };

        let photo_uuid = match self.db.add_photo(photo.clone()).await {
            Ok(photo_uuid) => photo_uuid,
            Err(err) => {
                if fresh {
                    self.discard_asset(&photo.asset.path, &photo.asset.thumb_path)
                        .await;
                }
                return Err(err);
            }
        };

        debug!({ photo_uuid = photo_uuid, digest = photo.digest }, "stored photo");

        let enrichment = if self.config.ai.enabled {
            match schedule_enrichment(&self.task_sender, photo_uuid, uid).await {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!({ photo_uuid = photo_uuid, error = %err }, "failed to schedule enrichment");
                    None
                }
            }
        } else {
            None
        };

        Ok(UploadOutcome {
            record: PhotoRecord { photo_uuid, photo },
            enrichment,
        })
    }

    #[instrument(skip(self))]
    async fn get_photo(&self, uid: String, photo_uuid: PhotoUuid) -> Result<PhotoRecord> {
        let photo = self.owned_photo(&uid, photo_uuid).await?;

        Ok(PhotoRecord { photo_uuid, photo })
    }

    #[instrument(skip(self))]
    async fn search_photos(&self, uid: String, filter: PhotoFilter) -> Result<SearchPhotosResp> {
        let filter = filter.normalized();

        let (photos, total) = self.db.search_photos(uid, filter.clone()).await?;

        Ok(SearchPhotosResp {
            photos,
            total,
            page: filter.page,
            limit: filter.limit,
        })
    }

    #[instrument(skip(self, update))]
    async fn update_photo(
        &self,
        uid: String,
        photo_uuid: PhotoUuid,
        update: PhotoUpdate,
    ) -> Result<PhotoRecord> {
        let photo = self.owned_photo(&uid, photo_uuid).await?;

        if update.is_empty() {
            return Ok(PhotoRecord { photo_uuid, photo });
        }

        let update = PhotoUpdate {
            title: update.title.map(|t| t.trim().to_owned()),
            description: update.description.map(|d| d.trim().to_owned()),
            tags: update.tags.map(|tags| merge_tags(&[], &tags)),
        };

        self.db.update_photo(photo_uuid, update).await?;

        self.get_photo(uid, photo_uuid).await
    }

    #[instrument(skip(self))]
    async fn delete_photo(&self, uid: String, photo_uuid: PhotoUuid) -> Result<()> {
        let photo = self.owned_photo(&uid, photo_uuid).await?;

        self.db.delete_photo(photo_uuid).await?;

        let asset = photo.asset;
        if asset.filename.is_empty() {
            return Ok(());
        }

        // the row is already gone, so a failed count leaves the file in place
        // rather than failing a delete the user can no longer retry
        let remaining = match self.db.count_photos_by_filename(asset.filename.clone()).await {
            Ok(remaining) => remaining,
            Err(err) => {
                warn!({ filename = asset.filename, error = %err }, "failed to count references, keeping file");
                return Ok(());
            }
        };

        if remaining > 0 {
            debug!({ filename = asset.filename, remaining = remaining }, "file still referenced");
            return Ok(());
        }

        debug!({ filename = asset.filename }, "removing unreferenced file");

        self.store.remove(&asset.path).await;

        if !asset.thumb_path.is_empty() && asset.thumb_path != asset.path {
            self.store.remove(&asset.thumb_path).await;
        }

        Ok(())
    }

    #[instrument(skip(self, edit))]
    async fn edit_photo(
        &self,
        uid: String,
        photo_uuid: PhotoUuid,
        edit: EditPhotoReq,
    ) -> Result<PhotoRecord> {
        let source = self.owned_photo(&uid, photo_uuid).await?;

        let source_path = self
            .store
            .resolve_disk_path(&source.asset.path)
            .ok_or_else(|| anyhow::Error::msg("failed to resolve photo file path"))?;

        let ext = normalize_edit_extension(&extension_of(&source.asset.filename));
        let filename = format!(
            "edit_{}_{}{}",
            unique_nanos(),
            stem_of(&source.asset.filename),
            ext
        );

        let target = self.store.disk_path(&filename);
        let edited = {
            let target = target.clone();
            spawn_blocking(move || edit_image(&source_path, &target, &edit)).await?
        };

        match edited {
            Ok(()) => {}
            Err(err @ MediaError::UnsupportedFormat(_)) => {
                self.store.remove(&filename).await;
                return Err(PhotoError::UnsupportedImage(err.to_string()).into());
            }
            Err(err) => {
                self.store.remove(&filename).await;
                return Err(err.into());
            }
        }

        let thumbnail = self.derive_thumbnail(&filename).await;

        let (digest, size) = match digest_file(&target).await {
            Ok(found) => found,
            Err(err) => {
                self.discard_asset(&filename, &thumbnail).await;
                return Err(err);
            }
        };

        let mime = mime_for_extension(ext)
            .map(str::to_owned)
            .unwrap_or_else(|| source.mime.clone());

        let now = unix_time();

        let photo = Photo {
            title: format!("Edited from: {}", source.title),
            asset: PhotoAsset {
                filename: filename.clone(),
                path: public_path(&filename),
                thumb_path: public_path(&thumbnail),
            },
            digest,
            size,
            mime,
            ctime: now,
            mtime: now,
            ..source
        };

        let edited_uuid = match self.db.add_photo(photo.clone()).await {
            Ok(edited_uuid) => edited_uuid,
            Err(err) => {
                self.discard_asset(&filename, &thumbnail).await;
                return Err(err);
            }
        };

        debug!({ photo_uuid = photo_uuid, edited_uuid = edited_uuid, filename = filename }, "stored edit");

        Ok(PhotoRecord {
            photo_uuid: edited_uuid,
            photo,
        })
    }

    #[instrument(skip(self))]
    async fn generate_tags(&self, uid: String, photo_uuid: PhotoUuid) -> Result<PhotoRecord> {
        self.owned_photo(&uid, photo_uuid).await?;

        let handle = schedule_enrichment(&self.task_sender, photo_uuid, uid.clone()).await?;

        match handle.finished().await {
            EnrichmentOutcome::Merged { added } => {
                debug!({ added = added }, "tags generated");
                self.get_photo(uid, photo_uuid).await
            }
            EnrichmentOutcome::Skipped(err) => Err(err.into()),
            EnrichmentOutcome::Failed(err) => Err(anyhow::Error::msg(err)),
            EnrichmentOutcome::TimedOut => Err(anyhow::Error::msg("ai tagging timed out")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::harness::{BrokenStream, Harness, SlowTagger, StaticTagger, png_bytes};
    use crate::photo::{PhotoError, PhotoUpload};
    use crate::task::enrich::EnrichmentOutcome;
    use api::{
        photo::{CropRect, EditPhotoReq, PhotoUpdate},
        search::PhotoFilter,
        tag::{Tag, TagSource, tag_names},
    };
    use common::{
        store::{public_path, thumbnail_name},
        tagger::TaggerError,
    };

    fn photo_error(err: &anyhow::Error) -> Option<&PhotoError> {
        err.downcast_ref::<PhotoError>()
    }

    #[tokio::test]
    async fn upload_stores_file_thumbnail_and_record() {
        let harness = Harness::builder().start().await;
        let bytes = png_bytes(800, 600);

        let outcome = harness.upload("alice", "beach.png", bytes.clone()).await.unwrap();
        let photo = &outcome.record.photo;

        assert!(outcome.enrichment.is_none());
        assert_eq!(photo.uid, "alice");
        assert_eq!(photo.title, "beach.png");
        assert_eq!(photo.description, "");
        assert_eq!(photo.size, bytes.len() as u64);
        assert_eq!(photo.digest.len(), 64);
        assert_eq!(photo.mime, "image/png");
        assert_eq!(photo.ctime, photo.mtime);
        assert!(photo.asset.filename.ends_with(".png"));
        assert_eq!(photo.asset.path, public_path(&photo.asset.filename));
        assert_eq!(
            photo.asset.thumb_path,
            public_path(&thumbnail_name(&photo.asset.filename))
        );
        assert_eq!(tag_names(&photo.tags), vec!["png"]);
        assert!(photo.tags.iter().all(|t| t.source == TagSource::Ai));

        assert!(harness.file_exists(&photo.asset.path));
        assert!(harness.file_exists(&photo.asset.thumb_path));
        assert_eq!(harness.staging_files(), 0);

        let thumbnail = image::open(harness.disk_path(&photo.asset.thumb_path)).unwrap();
        assert_eq!((thumbnail.width(), thumbnail.height()), (400, 300));

        let stored = harness
            .photos
            .get_photo(String::from("alice"), outcome.record.photo_uuid)
            .await
            .unwrap();
        assert_eq!(stored, outcome.record);
    }

    #[tokio::test]
    async fn broken_stream_persists_nothing() {
        let harness = Harness::builder().start().await;

        let upload = PhotoUpload {
            filename: String::from("cut.png"),
            mime: Some(String::from("image/png")),
            stream: Box::new(BrokenStream::new(&png_bytes(64, 64)[..32])),
        };

        let err = harness
            .photos
            .upload_photo(String::from("alice"), upload)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("connection reset"));

        let found = harness
            .photos
            .search_photos(String::from("alice"), PhotoFilter::default())
            .await
            .unwrap();
        assert_eq!(found.total, 0);
        assert!(harness.stored_files().is_empty());
    }

    #[tokio::test]
    async fn declared_mime_wins_over_extension() {
        let harness = Harness::builder().start().await;

        let outcome = harness
            .upload_with_mime("alice", "shot.bin", png_bytes(20, 20), Some("image/png"))
            .await
            .unwrap();

        assert_eq!(outcome.record.photo.mime, "image/png");
        assert_eq!(tag_names(&outcome.record.photo.tags), vec!["bin", "png"]);
    }

    #[tokio::test]
    async fn duplicate_content_reuses_asset() {
        let harness = Harness::builder().start().await;
        let bytes = png_bytes(64, 48);

        let first = harness.upload("alice", "one.png", bytes.clone()).await.unwrap();
        let files = harness.stored_files();

        let second = harness.upload("bob", "two.PNG", bytes).await.unwrap();

        assert_ne!(first.record.photo_uuid, second.record.photo_uuid);
        assert_eq!(second.record.photo.uid, "bob");
        assert_eq!(second.record.photo.title, "two.PNG");
        assert_eq!(second.record.photo.asset, first.record.photo.asset);
        assert_eq!(second.record.photo.digest, first.record.photo.digest);
        assert_eq!(second.record.photo.size, first.record.photo.size);
        assert_eq!(second.record.photo.mime, first.record.photo.mime);
        assert_eq!(tag_names(&second.record.photo.tags), vec!["png"]);

        assert_eq!(harness.stored_files(), files);
        assert_eq!(harness.staging_files(), 0);
    }

    #[tokio::test]
    async fn shared_file_outlives_first_delete() {
        let harness = Harness::builder().start().await;
        let bytes = png_bytes(64, 48);

        let first = harness.upload("alice", "one.png", bytes.clone()).await.unwrap();
        let second = harness.upload("bob", "two.png", bytes).await.unwrap();
        let asset = first.record.photo.asset.clone();

        harness
            .photos
            .delete_photo(String::from("alice"), first.record.photo_uuid)
            .await
            .unwrap();

        assert!(harness.file_exists(&asset.path));
        assert!(harness.file_exists(&asset.thumb_path));

        let err = harness
            .photos
            .get_photo(String::from("alice"), first.record.photo_uuid)
            .await
            .unwrap_err();
        assert_eq!(photo_error(&err), Some(&PhotoError::NotFound));

        harness
            .photos
            .delete_photo(String::from("bob"), second.record.photo_uuid)
            .await
            .unwrap();

        assert!(!harness.file_exists(&asset.path));
        assert!(!harness.file_exists(&asset.thumb_path));
    }

    #[tokio::test]
    async fn other_users_are_forbidden() {
        let harness = Harness::builder().start().await;

        let outcome = harness.upload("alice", "mine.png", png_bytes(16, 16)).await.unwrap();
        let photo_uuid = outcome.record.photo_uuid;
        let bob = || String::from("bob");

        let err = harness.photos.get_photo(bob(), photo_uuid).await.unwrap_err();
        assert_eq!(photo_error(&err), Some(&PhotoError::Forbidden));

        let update = PhotoUpdate {
            title: Some(String::from("stolen")),
            ..Default::default()
        };
        let err = harness
            .photos
            .update_photo(bob(), photo_uuid, update)
            .await
            .unwrap_err();
        assert_eq!(photo_error(&err), Some(&PhotoError::Forbidden));

        let err = harness.photos.delete_photo(bob(), photo_uuid).await.unwrap_err();
        assert_eq!(photo_error(&err), Some(&PhotoError::Forbidden));

        let err = harness
            .photos
            .edit_photo(bob(), photo_uuid, EditPhotoReq::default())
            .await
            .unwrap_err();
        assert_eq!(photo_error(&err), Some(&PhotoError::Forbidden));

        let err = harness.photos.get_photo(bob(), 9999).await.unwrap_err();
        assert_eq!(photo_error(&err), Some(&PhotoError::NotFound));

        let kept = harness
            .photos
            .get_photo(String::from("alice"), photo_uuid)
            .await
            .unwrap();
        assert_eq!(kept, outcome.record);
        assert!(harness.file_exists(&kept.photo.asset.path));
    }

    #[tokio::test]
    async fn updates_are_normalised() {
        let harness = Harness::builder().start().await;

        let outcome = harness.upload("alice", "raw.png", png_bytes(16, 16)).await.unwrap();
        let photo_uuid = outcome.record.photo_uuid;

        let unchanged = harness
            .photos
            .update_photo(String::from("alice"), photo_uuid, PhotoUpdate::default())
            .await
            .unwrap();
        assert_eq!(unchanged, outcome.record);

        let update = PhotoUpdate {
            title: Some(String::from("  Sunset  ")),
            description: Some(String::from(" over the bay ")),
            tags: Some(vec![
                Tag::user(" beach "),
                Tag::user("Beach"),
                Tag::user(""),
                Tag::user("\"sea\""),
            ]),
        };

        let updated = harness
            .photos
            .update_photo(String::from("alice"), photo_uuid, update)
            .await
            .unwrap();

        assert_eq!(updated.photo.title, "Sunset");
        assert_eq!(updated.photo.description, "over the bay");
        assert_eq!(tag_names(&updated.photo.tags), vec!["beach", "sea"]);
        assert_eq!(updated.photo.asset, outcome.record.photo.asset);
    }

    #[tokio::test]
    async fn search_filters_by_tag_and_query() {
        let harness = Harness::builder().start().await;

        let mut uuids = Vec::new();
        for (i, name) in ["a.png", "b.png", "c.png"].into_iter().enumerate() {
            let outcome = harness
                .upload("alice", name, png_bytes(10 + i as u32, 10))
                .await
                .unwrap();
            uuids.push(outcome.record.photo_uuid);
        }
        harness.upload("bob", "d.png", png_bytes(40, 10)).await.unwrap();

        harness
            .photos
            .update_photo(
                String::from("alice"),
                uuids[1],
                PhotoUpdate::tags(vec![Tag::user("holiday")]),
            )
            .await
            .unwrap();

        let all = harness
            .photos
            .search_photos(String::from("alice"), PhotoFilter::default())
            .await
            .unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.page, 1);
        assert_eq!(all.limit, 20);

        let tagged = harness
            .photos
            .search_photos(
                String::from("alice"),
                PhotoFilter {
                    tag: Some(String::from("HOLIDAY")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(tagged.total, 1);
        assert_eq!(tagged.photos[0].photo_uuid, uuids[1]);

        let queried = harness
            .photos
            .search_photos(
                String::from("alice"),
                PhotoFilter {
                    query: String::from("c.p"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(queried.total, 1);
        assert_eq!(queried.photos[0].photo_uuid, uuids[2]);

        let paged = harness
            .photos
            .search_photos(
                String::from("alice"),
                PhotoFilter {
                    page: 0,
                    limit: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(paged.total, 3);
        assert_eq!(paged.page, 1);
        assert_eq!(paged.photos.len(), 2);
    }

    #[tokio::test]
    async fn edit_creates_new_record() {
        let harness = Harness::builder().start().await;

        let outcome = harness.upload("alice", "wide.png", png_bytes(200, 100)).await.unwrap();
        let source = outcome.record;

        harness
            .photos
            .update_photo(
                String::from("alice"),
                source.photo_uuid,
                PhotoUpdate {
                    description: Some(String::from("original")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let edit = EditPhotoReq {
            // runs past the right and bottom edges, so it is clamped to 50x60
            crop: Some(CropRect {
                x: 150,
                y: 40,
                width: 500,
                height: 500,
            }),
            brightness: 20.0,
            ..Default::default()
        };

        let edited = harness
            .photos
            .edit_photo(String::from("alice"), source.photo_uuid, edit)
            .await
            .unwrap();

        assert_ne!(edited.photo_uuid, source.photo_uuid);
        assert_eq!(edited.photo.uid, "alice");
        assert_eq!(edited.photo.title, "Edited from: wide.png");
        assert_eq!(edited.photo.description, "original");
        assert_eq!(edited.photo.tags, source.photo.tags);
        assert_eq!(edited.photo.mime, "image/png");
        assert!(edited.photo.asset.filename.starts_with("edit_"));
        assert!(edited.photo.asset.filename.ends_with(".png"));
        assert_ne!(edited.photo.digest, source.photo.digest);
        assert!(harness.file_exists(&edited.photo.asset.thumb_path));

        let image = image::open(harness.disk_path(&edited.photo.asset.path)).unwrap();
        assert_eq!((image.width(), image.height()), (50, 60));

        // the source record and file are untouched
        let original = harness
            .photos
            .get_photo(String::from("alice"), source.photo_uuid)
            .await
            .unwrap();
        assert_eq!(original.photo.asset, source.photo.asset);
        assert_eq!(original.photo.digest, source.photo.digest);
        assert!(harness.file_exists(&source.photo.asset.path));
    }

    #[tokio::test]
    async fn undecodable_uploads_fall_back_and_refuse_edits() {
        let harness = Harness::builder().start().await;

        let outcome = harness
            .upload("alice", "notes.png", b"definitely not an image".to_vec())
            .await
            .unwrap();
        let photo = outcome.record.photo;

        assert_eq!(photo.asset.thumb_path, photo.asset.path);
        assert!(photo.metadata.is_none());

        let files = harness.stored_files();

        let err = harness
            .photos
            .edit_photo(
                String::from("alice"),
                outcome.record.photo_uuid,
                EditPhotoReq::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            photo_error(&err),
            Some(PhotoError::UnsupportedImage(_))
        ));
        assert_eq!(harness.stored_files(), files);

        harness
            .photos
            .delete_photo(String::from("alice"), outcome.record.photo_uuid)
            .await
            .unwrap();
        assert!(!harness.file_exists(&photo.asset.path));
    }

    #[tokio::test]
    async fn upload_schedules_enrichment_when_enabled() {
        let harness = Harness::builder()
            .tagger(StaticTagger::handle(vec![Tag::ai("sunset"), Tag::ai("PNG")]))
            .ai_enabled(true)
            .start()
            .await;

        let outcome = harness.upload("alice", "sky.png", png_bytes(32, 32)).await.unwrap();

        let handle = outcome.enrichment.unwrap();
        assert_eq!(handle.finished().await, EnrichmentOutcome::Merged { added: 1 });

        let photo = harness
            .photos
            .get_photo(String::from("alice"), outcome.record.photo_uuid)
            .await
            .unwrap();
        assert_eq!(tag_names(&photo.photo.tags), vec!["png", "sunset"]);
    }

    #[tokio::test]
    async fn slow_enrichment_never_blocks_upload() {
        let harness = Harness::builder()
            .tagger(SlowTagger::handle(Duration::from_secs(30)))
            .ai_enabled(true)
            .ai_timeout(1)
            .start()
            .await;

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            harness.upload("alice", "late.png", png_bytes(32, 32)),
        )
        .await
        .unwrap()
        .unwrap();

        let handle = outcome.enrichment.unwrap();
        assert_eq!(handle.finished().await, EnrichmentOutcome::TimedOut);

        let photo = harness
            .photos
            .get_photo(String::from("alice"), outcome.record.photo_uuid)
            .await
            .unwrap();
        assert_eq!(photo.photo.tags, outcome.record.photo.tags);
    }

    #[tokio::test]
    async fn generate_tags_returns_refreshed_record() {
        let harness = Harness::builder()
            .tagger(StaticTagger::handle(vec![Tag::ai("cat").with_score(0.8)]))
            .start()
            .await;

        let outcome = harness.upload("alice", "pet.png", png_bytes(32, 32)).await.unwrap();
        assert!(outcome.enrichment.is_none());

        let record = harness
            .photos
            .generate_tags(String::from("alice"), outcome.record.photo_uuid)
            .await
            .unwrap();

        assert_eq!(tag_names(&record.photo.tags), vec!["png", "cat"]);
        assert_eq!(record.photo.tags[1].score, Some(0.8));

        let err = harness
            .photos
            .generate_tags(String::from("bob"), outcome.record.photo_uuid)
            .await
            .unwrap_err();
        assert_eq!(photo_error(&err), Some(&PhotoError::Forbidden));
    }

    #[tokio::test]
    async fn generate_tags_distinguishes_disabled_from_unconfigured() {
        for expected in [
            TaggerError::Disabled,
            TaggerError::NotConfigured(String::from("api_key is empty")),
        ] {
            let harness = Harness::builder().tagger(Err(expected.clone())).start().await;

            let outcome = harness.upload("alice", "x.png", png_bytes(8, 8)).await.unwrap();

            let err = harness
                .photos
                .generate_tags(String::from("alice"), outcome.record.photo_uuid)
                .await
                .unwrap_err();

            assert_eq!(err.downcast_ref::<TaggerError>(), Some(&expected));
        }
    }
}
