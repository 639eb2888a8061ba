//! Test doubles shared by the unit and router tests.

use crate::{
    db,
    models::{
        credential::UploadCredential,
        object::{ObjectMetadata, ObjectMetadataDraft},
        user::UserId,
    },
    services::{
        credentials::{CredentialIssuer, IssuerError},
        metadata_store::{MetadataStore, StoreError, StoreResult},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

/// Single-connection in-memory database with the schema applied.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    db::run_migrations(&pool).await.expect("apply migrations");
    Arc::new(pool)
}

/// Wraps a real store, counts calls and can be told to fail.
pub struct CountingStore {
    inner: Arc<dyn MetadataStore>,
    inserts: AtomicUsize,
    deletes: AtomicUsize,
    fail_inserts: bool,
    fail_deletes: bool,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            inserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_inserts: false,
            fail_deletes: false,
        }
    }

    pub fn failing_inserts(mut self) -> Self {
        self.fail_inserts = true;
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for CountingStore {
    async fn insert(&self, draft: ObjectMetadataDraft) -> StoreResult<ObjectMetadata> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.insert(draft).await
    }

    async fn delete_by_id(&self, id: Uuid) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.delete_by_id(id).await
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<ObjectMetadata>> {
        self.inner.find_by_id(id).await
    }

    async fn list_by_owner(&self, owner: UserId) -> StoreResult<Vec<ObjectMetadata>> {
        self.inner.list_by_owner(owner).await
    }

    async fn list_created_between(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<ObjectMetadata>> {
        self.inner.list_created_between(since, until).await
    }
}

/// Refuses every request and remembers which ids were asked for.
#[derive(Default)]
pub struct FailingIssuer {
    attempted: Mutex<Vec<Uuid>>,
}

impl FailingIssuer {
    pub fn attempted_ids(&self) -> Vec<Uuid> {
        self.attempted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialIssuer for FailingIssuer {
    async fn issue_upload_credential(&self, object_id: Uuid) -> Result<UploadCredential, IssuerError> {
        self.attempted.lock().unwrap().push(object_id);
        Err(IssuerError::Refused("forced failure".into()))
    }

    async fn issue_read_credential(&self, object_id: Uuid) -> Result<UploadCredential, IssuerError> {
        self.attempted.lock().unwrap().push(object_id);
        Err(IssuerError::Refused("forced failure".into()))
    }
}

/// Issues dummy upload credentials but refuses every read credential.
#[derive(Default)]
pub struct ReadRefusingIssuer {
    reads: AtomicUsize,
}

impl ReadRefusingIssuer {
    pub fn read_attempts(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialIssuer for ReadRefusingIssuer {
    async fn issue_upload_credential(&self, object_id: Uuid) -> Result<UploadCredential, IssuerError> {
        Ok(UploadCredential {
            target_url: format!("http://storage.test/{object_id}"),
            token: format!("token-{object_id}"),
            method: "PUT".into(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        })
    }

    async fn issue_read_credential(&self, _object_id: Uuid) -> Result<UploadCredential, IssuerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(IssuerError::Refused("previews unavailable".into()))
    }
}

/// Issues dummy credentials and records whether the metadata row for each
/// requested id already existed at the time of the request.
pub struct OrderCheckingIssuer {
    store: Arc<dyn MetadataStore>,
    calls: AtomicUsize,
    violations: AtomicUsize,
    ids: Mutex<HashSet<Uuid>>,
}

impl OrderCheckingIssuer {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            calls: AtomicUsize::new(0),
            violations: AtomicUsize::new(0),
            ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn distinct_ids(&self) -> usize {
        self.ids.lock().unwrap().len()
    }
}

#[async_trait]
impl CredentialIssuer for OrderCheckingIssuer {
    async fn issue_upload_credential(&self, object_id: Uuid) -> Result<UploadCredential, IssuerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !matches!(self.store.find_by_id(object_id).await, Ok(Some(_))) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.ids.lock().unwrap().insert(object_id);
        Ok(UploadCredential {
            target_url: format!("http://storage.test/{object_id}"),
            token: format!("token-{object_id}"),
            method: "PUT".into(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        })
    }

    async fn issue_read_credential(&self, object_id: Uuid) -> Result<UploadCredential, IssuerError> {
        Ok(UploadCredential {
            target_url: format!("http://storage.test/{object_id}?token=read"),
            token: "read".into(),
            method: "GET".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}
