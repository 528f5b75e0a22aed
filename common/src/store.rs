use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicI64, Ordering},
};

use anyhow::Result;
use chrono::Local;
use hex::encode;
use sha2::{Digest, Sha256};
use tokio::{
    fs::{File, create_dir_all, remove_file, rename, try_exists},
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
};
use tracing::{debug, instrument, warn};

use api::upload_url;

const CHUNK_SIZE: usize = 64 * 1024;

const MAX_EXTENSION_LEN: usize = 10;

// process-wide strictly increasing nanosecond clock
//
// generated filenames embed this value, so two uploads landing in the same
// nanosecond (or a clock step backwards) must still get distinct names
static LAST_NANOS: AtomicI64 = AtomicI64::new(0);

pub fn unique_nanos() -> i64 {
    let now = Local::now().timestamp_nanos_opt().unwrap_or(0);

    let mut last = LAST_NANOS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_NANOS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

// lowercase, alphanumeric extension with a leading dot, or nothing at all
//
// the extension comes from a client-supplied filename, so anything odd is
// dropped rather than written to disk
pub fn sanitize_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();

    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return String::new();
    }

    format!(".{ext}")
}

// extension of a client filename, including the dot
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default()
}

// filename without its final extension
pub fn stem_of(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_owned()
}

pub fn thumbnail_name(filename: &str) -> String {
    format!("thumb_{}.jpg", stem_of(filename))
}

pub fn public_path(filename: &str) -> String {
    upload_url(filename)
}

// an upload that has been hashed and written to a staging file, but not yet
// given its final name
//
// dropping a StagedAsset without committing it removes the staging file, which
// is exactly what should happen when the content turns out to be a duplicate
#[derive(Debug)]
pub struct StagedAsset {
    pub digest: String,
    pub size: u64,
    path: PathBuf,
    committed: bool,
}

impl Drop for StagedAsset {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!({ path = ?self.path, error = %err }, "failed to clean up staging file");
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredAsset {
    pub filename: String,
    pub digest: String,
    pub size: u64,
}

// flat directory of content-addressed files
//
// the store only knows about filenames; the orchestrator decides which
// records point at which files, and thus when a file may be removed
#[derive(Clone, Debug)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ContentStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn disk_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    // hash the stream while writing it to a hidden staging file
    #[instrument(skip_all)]
    pub async fn stage<R: AsyncRead + Unpin>(&self, reader: R) -> Result<StagedAsset> {
        self.ensure_root().await?;

        // the guard exists before the first byte is written so that a failed
        // read or write still cleans up after itself
        let mut staged = StagedAsset {
            digest: String::new(),
            size: 0,
            path: self.root.join(format!(".staging_{}", unique_nanos())),
            committed: false,
        };

        let mut file = File::create(&staged.path).await?;
        let mut reader = BufReader::with_capacity(CHUNK_SIZE, reader);
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }

            hasher.update(&buffer[..n]);
            file.write_all(&buffer[..n]).await?;
            staged.size += n as u64;
        }

        file.flush().await?;
        drop(file);

        staged.digest = encode(hasher.finalize());

        debug!({ digest = staged.digest, size = staged.size }, "staged upload");

        Ok(staged)
    }

    // give a staged upload its permanent name
    #[instrument(skip_all)]
    pub async fn commit(&self, mut staged: StagedAsset, ext: &str) -> Result<StoredAsset> {
        let filename = format!(
            "{}_{}{}",
            unique_nanos(),
            &staged.digest[..8.min(staged.digest.len())],
            sanitize_extension(ext)
        );

        rename(&staged.path, self.root.join(&filename)).await?;
        staged.committed = true;

        debug!({ digest = staged.digest, filename = filename }, "committed upload");

        Ok(StoredAsset {
            filename,
            digest: staged.digest.clone(),
            size: staged.size,
        })
    }

    pub async fn put<R: AsyncRead + Unpin>(&self, reader: R, ext: &str) -> Result<StoredAsset> {
        let staged = self.stage(reader).await?;
        self.commit(staged, ext).await
    }

    pub async fn contains(&self, filename: &str) -> bool {
        match self.resolve_disk_path(filename) {
            Some(path) => try_exists(path).await.unwrap_or(false),
            None => false,
        }
    }

    // best-effort removal
    //
    // a file that cannot be removed is orphaned on disk, which is preferable
    // to failing an operation whose database half already happened
    #[instrument(skip(self))]
    pub async fn remove(&self, filename: &str) {
        let Some(path) = self.resolve_disk_path(filename) else {
            warn!("refusing to remove unresolvable filename");
            return;
        };

        match remove_file(&path).await {
            Ok(()) => debug!("removed file"),
            Err(err) => warn!({ path = ?path, error = %err }, "failed to remove file"),
        }
    }

    // map a public path (or bare filename) to a location inside the store
    //
    // only the final path component is kept, so "/uploads/../../etc/passwd"
    // resolves to "<root>/passwd" and never escapes the store
    pub fn resolve_disk_path(&self, public_path: &str) -> Option<PathBuf> {
        let name = Path::new(public_path.trim()).file_name()?.to_str()?;

        if name.is_empty() || name == "." || name == ".." {
            return None;
        }

        Some(self.root.join(name))
    }
}

// sha-256 digest and size of a file already on disk
pub async fn digest_file(path: &Path) -> Result<(String, u64)> {
    let file = File::open(path).await?;

    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }

        hasher.update(&buffer[..n]);
        size += n as u64;
    }

    Ok((encode(hasher.finalize()), size))
}
