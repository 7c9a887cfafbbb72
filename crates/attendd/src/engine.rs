use crate::store::{FaceRecord, FaceStore, Identity, NewFace, StoreError};
use attend_core::{Embedding, EuclideanMatcher, GalleryEntry, MatchError, MatchResult, Matcher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

pub type Gallery = Vec<GalleryEntry<Identity>>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("match error: {0}")]
    Match(#[from] MatchError),
    #[error("embedding must have {expected} values, got {actual}")]
    InvalidEmbedding { expected: usize, actual: usize },
    #[error("embedding contains non-finite values")]
    NonFiniteEmbedding,
}

/// Recognition engine shared by all request handlers.
///
/// Holds an immutable gallery snapshot behind an `Arc`. Matching clones the
/// `Arc` and works on that snapshot; writers publish a new snapshot rather
/// than mutating the one readers may hold.
///
/// Writers (register, remove, refresh) serialize on `writer` for the whole
/// store-then-publish sequence. The `RwLock` is only taken to swap the `Arc`,
/// so recognition never waits on SQLite.
pub struct Engine {
    matcher: EuclideanMatcher,
    store: FaceStore,
    gallery: RwLock<Arc<Gallery>>,
    writer: Mutex<()>,
    embedding_dim: usize,
}

impl Engine {
    /// Build the engine and load the initial gallery from the store.
    pub async fn load(
        store: FaceStore,
        matcher: EuclideanMatcher,
        embedding_dim: usize,
    ) -> Result<Self, EngineError> {
        let gallery = store.load_gallery().await?;
        tracing::info!(
            entries = gallery.len(),
            tolerance = matcher.tolerance().value(),
            policy = ?matcher.policy(),
            "gallery loaded"
        );
        Ok(Self {
            matcher,
            store,
            gallery: RwLock::new(Arc::new(gallery)),
            writer: Mutex::new(()),
            embedding_dim,
        })
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Current gallery snapshot.
    pub async fn snapshot(&self) -> Arc<Gallery> {
        self.gallery.read().await.clone()
    }

    /// Match a query embedding against the current gallery.
    pub async fn recognize(&self, query: &Embedding) -> Result<MatchResult<Identity>, EngineError> {
        self.check_embedding(query)?;
        let gallery = self.snapshot().await;
        let result = self.matcher.compare(query, gallery.as_slice())?;

        match &result {
            MatchResult::Match {
                identity,
                distance,
                confidence,
                ..
            } => tracing::info!(
                user_id = identity.user_id,
                distance,
                confidence,
                "face recognized"
            ),
            MatchResult::NoMatch => {
                tracing::info!(gallery = gallery.len(), "no matching face")
            }
        }
        Ok(result)
    }

    /// Store a new reference face and publish it to the gallery.
    pub async fn register(&self, face: NewFace) -> Result<FaceRecord, EngineError> {
        self.check_embedding(&face.embedding)?;
        let entry = GalleryEntry::new(
            Identity {
                user_id: face.user_id,
                name: face.name.clone(),
            },
            face.embedding.clone(),
        );
        // Held across the insert so snapshot order follows face id order.
        let _writer = self.writer.lock().await;
        let record = self.store.insert_face(face).await?;

        let mut next = Gallery::clone(&*self.snapshot().await);
        // A re-registration renames the user everywhere.
        for existing in next.iter_mut() {
            if existing.identity.user_id == entry.identity.user_id {
                existing.identity.name = entry.identity.name.clone();
            }
        }
        next.push(entry);
        self.publish(next).await;

        Ok(record)
    }

    pub async fn list_faces(&self, user_id: Option<i64>) -> Result<Vec<FaceRecord>, EngineError> {
        Ok(self.store.list_faces(user_id).await?)
    }

    /// Delete a stored face and reload the gallery. Returns false if unknown.
    pub async fn remove_face(&self, face_id: i64) -> Result<bool, EngineError> {
        let _writer = self.writer.lock().await;
        if !self.store.remove_face(face_id).await? {
            return Ok(false);
        }
        self.reload().await?;
        Ok(true)
    }

    /// Reload the gallery from the store and publish it. Returns the entry count.
    pub async fn refresh(&self) -> Result<usize, EngineError> {
        let _writer = self.writer.lock().await;
        self.reload().await
    }

    /// True if the store answers a trivial query.
    pub async fn store_healthy(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "store health check failed");
                false
            }
        }
    }

    // Caller holds `writer`.
    async fn reload(&self) -> Result<usize, EngineError> {
        let gallery = self.store.load_gallery().await?;
        let count = gallery.len();
        self.publish(gallery).await;
        tracing::info!(entries = count, "gallery refreshed");
        Ok(count)
    }

    async fn publish(&self, gallery: Gallery) {
        *self.gallery.write().await = Arc::new(gallery);
    }

    fn check_embedding(&self, embedding: &Embedding) -> Result<(), EngineError> {
        if embedding.len() != self.embedding_dim {
            return Err(EngineError::InvalidEmbedding {
                expected: self.embedding_dim,
                actual: embedding.len(),
            });
        }
        if embedding.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(EngineError::NonFiniteEmbedding);
        }
        Ok(())
    }
}
