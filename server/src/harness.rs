// in-process server for the service tests
//
// wires the db, task and photo services together over a MemoryBackend and a
// temporary upload directory, with the tagger swapped for a stub
use std::{
    io::{self, Cursor},
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncRead, ReadBuf};

use crate::db::{DbClient, svc::DbService};
use crate::photo::{PhotoClient, PhotoUpload, UploadOutcome, svc::PhotoService};
use crate::service::{DRMRegistry, DRMSender, DarkroomService, ServiceType};
use crate::task::svc::TaskService;
use api::{
    photo::{Photo, PhotoAsset},
    tag::Tag,
};
use common::{
    config::DRConfig,
    db::MemoryBackend,
    server::{DbConfig, DbDriver, FsConfig, HttpConfig, TaskConfig},
    store::public_path,
    tagger::{AiConfig, ImageTagger, TaggerError, TaggerHandle},
};

pub struct StaticTagger(Vec<Tag>);

impl StaticTagger {
    pub fn handle(tags: Vec<Tag>) -> TaggerHandle {
        Ok(Arc::new(StaticTagger(tags)))
    }
}

#[async_trait]
impl ImageTagger for StaticTagger {
    async fn generate_tags(&self, path: &Path) -> Result<Vec<Tag>, TaggerError> {
        if !path.is_file() {
            return Err(TaggerError::Image(format!("{} is missing", path.display())));
        }

        Ok(self.0.clone())
    }
}

pub struct SlowTagger(Duration);

impl SlowTagger {
    pub fn handle(delay: Duration) -> TaggerHandle {
        Ok(Arc::new(SlowTagger(delay)))
    }
}

#[async_trait]
impl ImageTagger for SlowTagger {
    async fn generate_tags(&self, _path: &Path) -> Result<Vec<Tag>, TaggerError> {
        tokio::time::sleep(self.0).await;

        Ok(vec![Tag::ai("slow")])
    }
}

// a client that hangs up after sending a few bytes
pub struct BrokenStream {
    head: Vec<u8>,
}

impl BrokenStream {
    pub fn new(head: &[u8]) -> Self {
        BrokenStream {
            head: head.to_vec(),
        }
    }
}

impl AsyncRead for BrokenStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.head.is_empty() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset",
            )));
        }

        let n = self.head.len().min(buf.remaining());
        buf.put_slice(&self.head[..n]);
        self.head.drain(..n);

        Poll::Ready(Ok(()))
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

// a record pointing at a real file in the upload directory, not yet persisted
pub async fn sample_photo(harness: &Harness, uid: &str, filename: &str) -> Photo {
    std::fs::write(harness.dir.path().join(filename), png_bytes(16, 16)).unwrap();

    Photo {
        uid: uid.to_owned(),
        title: filename.to_owned(),
        description: String::new(),
        asset: PhotoAsset {
            filename: filename.to_owned(),
            path: public_path(filename),
            thumb_path: public_path(filename),
        },
        digest: String::new(),
        size: 0,
        mime: String::from("image/png"),
        metadata: None,
        tags: Vec::new(),
        ctime: 0,
        mtime: 0,
    }
}

pub struct HarnessBuilder {
    tagger: TaggerHandle,
    ai_enabled: bool,
    ai_timeout: u64,
    enrich_threads: usize,
}

impl HarnessBuilder {
    pub fn tagger(mut self, tagger: TaggerHandle) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn ai_enabled(mut self, enabled: bool) -> Self {
        self.ai_enabled = enabled;
        self
    }

    pub fn ai_timeout(mut self, secs: u64) -> Self {
        self.ai_timeout = secs;
        self
    }

    pub fn enrich_threads(mut self, threads: usize) -> Self {
        self.enrich_threads = threads;
        self
    }

    pub async fn start(self) -> Harness {
        let dir = TempDir::new().unwrap();

        let config = Arc::new(DRConfig {
            fs: FsConfig {
                upload_dir: dir.path().to_path_buf(),
                thumbnail_width: 400,
            },
            db: DbConfig {
                driver: DbDriver::Memory,
                timeout: 10,
            },
            http: HttpConfig {
                socket: String::from("127.0.0.1:0"),
                user_header: String::from("x-forwarded-user"),
                max_upload_mb: 64,
            },
            task: TaskConfig {
                enrich_threads: self.enrich_threads,
            },
            ai: AiConfig {
                enabled: self.ai_enabled,
                timeout: self.ai_timeout,
                ..Default::default()
            },
            mariadb: None,
        });

        let registry = DRMRegistry::new();

        let db_svc = DbService::<MemoryBackend>::create(config.clone(), &registry).unwrap();
        let task_svc = TaskService::create(config.clone(), &registry)
            .unwrap()
            .with_tagger(self.tagger);
        let photo_svc = PhotoService::create(config.clone(), &registry).unwrap();

        db_svc.start(&registry).await.unwrap();
        task_svc.start(&registry).await.unwrap();
        photo_svc.start(&registry).await.unwrap();

        Harness {
            db: DbClient::new(&config, &registry).unwrap(),
            photos: PhotoClient::new(&registry).unwrap(),
            dir,
            registry,
            _services: (db_svc, task_svc, photo_svc),
        }
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub registry: DRMRegistry,
    pub db: DbClient,
    pub photos: PhotoClient,
    _services: (DbService<MemoryBackend>, TaskService, PhotoService),
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            tagger: Err(TaggerError::Disabled),
            ai_enabled: false,
            ai_timeout: 20,
            enrich_threads: 4,
        }
    }

    pub fn task_sender(&self) -> DRMSender {
        self.registry.get(&ServiceType::Task).unwrap()
    }

    pub async fn upload(
        &self,
        uid: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<UploadOutcome> {
        self.upload_with_mime(uid, filename, bytes, None).await
    }

    pub async fn upload_with_mime(
        &self,
        uid: &str,
        filename: &str,
        bytes: Vec<u8>,
        mime: Option<&str>,
    ) -> anyhow::Result<UploadOutcome> {
        let upload = PhotoUpload {
            filename: filename.to_owned(),
            mime: mime.map(str::to_owned),
            stream: Box::new(Cursor::new(bytes)),
        };

        self.photos.upload_photo(uid.to_owned(), upload).await
    }

    // disk location of a public path
    pub fn disk_path(&self, public: &str) -> PathBuf {
        let name = Path::new(public).file_name().unwrap();
        self.dir.path().join(name)
    }

    pub fn file_exists(&self, public: &str) -> bool {
        self.disk_path(public).is_file()
    }

    pub fn stored_files(&self) -> Vec<String> {
        let mut names = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn staging_files(&self) -> usize {
        self.stored_files()
            .iter()
            .filter(|name| name.starts_with(".staging_"))
            .count()
    }
}
