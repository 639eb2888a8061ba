//! src/services/object_store.rs
//!
//! LocalObjectStore: the storage side of the direct upload channel. Payloads
//! live on local disk sharded beneath `base_path/{shard}/{shard}/{object_id}`.
//! The store has no knowledge of metadata rows; access is gated by the
//! storage tokens verified in the handlers.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{0}` already exists")]
    AlreadyExists(Uuid),
    #[error("object `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Summary of a stored payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub id: Uuid,
    pub size_bytes: u64,
    pub etag: String,
}

/// State of an object's payload on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Stored,
    /// A write has started but not been published yet.
    Uploading,
    Absent,
}

#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    /// Base directory on disk where object payloads are stored.
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Two-level shard directories from MD5(object id), as lowercase hex.
    fn object_shards(id: Uuid) -> (String, String) {
        let digest = md5::compute(id.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, id: Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(id);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(id.to_string());
        path
    }

    /// Temp files are named `.tmp-{id}-{nonce}` so in-flight writes can be
    /// attributed to their object.
    fn temp_prefix(id: Uuid) -> String {
        format!(".tmp-{id}-")
    }

    /// Whether the payload for `id` is published, still being written, or
    /// absent.
    pub async fn presence(&self, id: Uuid) -> ObjectStoreResult<Presence> {
        let file_path = self.object_path(id);
        if fs::try_exists(&file_path).await? {
            return Ok(Presence::Stored);
        }
        let Some(parent) = file_path.parent() else {
            return Ok(Presence::Absent);
        };

        let mut entries = match fs::read_dir(parent).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Presence::Absent),
            Err(err) => return Err(err.into()),
        };
        let prefix = Self::temp_prefix(id);
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(Presence::Uploading);
            }
        }
        Ok(Presence::Absent)
    }

    /// Stream a payload to disk. The object becomes visible only once fully
    /// written and synced. Each id can be written once; a second write is
    /// rejected with `AlreadyExists` and leaves the first payload intact.
    pub async fn put_stream<S>(&self, id: Uuid, stream: S) -> ObjectStoreResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let file_path = self.object_path(id);
        if fs::try_exists(&file_path).await? {
            return Err(ObjectStoreError::AlreadyExists(id));
        }

        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{}{}", Self::temp_prefix(id), Uuid::new_v4().simple()));

        let written = write_to(&tmp_path, stream).await;
        let (size_bytes, etag) = match written {
            Ok(summary) => summary,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        };

        // hard_link fails if the target exists, so publishing is create-only
        // even when two writers hold the same credential.
        let published = fs::hard_link(&tmp_path, &file_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        match published {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(ObjectStoreError::AlreadyExists(id));
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }

        tracing::debug!(%id, size_bytes, path = %file_path.display(), "stored object payload");
        Ok(StoredObject {
            id,
            size_bytes,
            etag,
        })
    }

    /// Open a payload for reading.
    pub async fn open(&self, id: Uuid) -> ObjectStoreResult<(File, u64)> {
        let file = File::open(self.object_path(id)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound(id)
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }
}

/// Write the stream to `path`, returning the byte count and MD5 etag.
async fn write_to<S>(path: &Path, stream: S) -> io::Result<(u64, String)>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: u64 = 0;
    let mut digest = Context::new();

    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as u64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok((size_bytes, format!("{:x}", digest.compute())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::io::AsyncReadExt;

    fn body(parts: &[&'static str]) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn put_then_open_round_trips_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let id = Uuid::new_v4();

        let stored = store.put_stream(id, body(&["hello ", "world"])).await.unwrap();
        assert_eq!(stored.size_bytes, 11);
        assert_eq!(stored.etag, format!("{:x}", md5::compute(b"hello world")));
        assert_eq!(store.presence(id).await.unwrap(), Presence::Stored);

        let (mut file, len) = store.open(id).await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(len, 11);
        assert_eq!(buf, b"hello world");
    }

    #[tokio::test]
    async fn second_write_to_same_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let id = Uuid::new_v4();

        store.put_stream(id, body(&["first"])).await.unwrap();
        let err = store.put_stream(id, body(&["second"])).await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::AlreadyExists(e) if e == id));

        let (mut file, _) = store.open(id).await.unwrap();
        let mut buf = String::new();
        file.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "first");
    }

    #[tokio::test]
    async fn failed_stream_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let id = Uuid::new_v4();

        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ]);
        assert!(store.put_stream(id, broken).await.is_err());
        assert_eq!(store.presence(id).await.unwrap(), Presence::Absent);

        let parent = store.object_path(id).parent().unwrap().to_path_buf();
        let mut entries = fs::read_dir(parent).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unfinished_write_is_reported_as_uploading() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert_eq!(store.presence(id).await.unwrap(), Presence::Absent);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let held = stream::once(async move {
            let _ = rx.await;
            Ok(Bytes::from_static(b"late"))
        });
        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.put_stream(id, held).await })
        };

        let mut presence = Presence::Absent;
        for _ in 0..200 {
            presence = store.presence(id).await.unwrap();
            if presence == Presence::Uploading {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(presence, Presence::Uploading);
        assert_eq!(store.presence(other).await.unwrap(), Presence::Absent);

        tx.send(()).unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(store.presence(id).await.unwrap(), Presence::Stored);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store.open(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound(_)));
    }
}
