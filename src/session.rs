use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::Result;
use crate::knowledge::KnowledgeStore;
use crate::models::{SessionSnapshot, Turn, UploadedPdf};

/// Everything one browser session owns. Handlers receive it by value and
/// hand back the next value, so a failed action never leaves a half-applied state.
#[derive(Clone)]
pub struct SessionContext {
    pub id: Uuid,
    pub db_path: PathBuf,
    pub store: Arc<dyn KnowledgeStore>,
    pub messages: Vec<Turn>,
    pub pdf_added: bool,
    pub upload: Option<UploadedPdf>,
    /// One-shot status line shown on the next render
    pub notice: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(id: Uuid, db_path: PathBuf, store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            id,
            db_path,
            store,
            messages: Vec::new(),
            pdf_added: false,
            upload: None,
            notice: None,
            created_at: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.to_string(),
            pdf_added: self.pdf_added,
            pending_upload: self.upload.as_ref().map(|u| u.file_name.clone()),
            messages: self.messages.clone(),
            created_at: self.created_at,
        }
    }
}

/// Builds the knowledge store for a freshly created session directory
pub type StoreFactory =
    Arc<dyn Fn(&Path) -> Result<Arc<dyn KnowledgeStore>> + Send + Sync + 'static>;

pub type SharedSession = Arc<Mutex<SessionContext>>;

struct Entry {
    session: SharedSession,
    last_seen: DateTime<Utc>,
}

/// Live sessions keyed by id. Each session sits behind its own async mutex,
/// so actions within a session run one at a time while sessions stay independent.
/// A session untouched for longer than `idle_ttl` is dropped on the next lookup.
pub struct SessionRegistry {
    root: Option<PathBuf>,
    factory: StoreFactory,
    idle_ttl: Duration,
    sessions: RwLock<HashMap<Uuid, Entry>>,
}

impl SessionRegistry {
    pub fn new(root: Option<PathBuf>, idle_ttl: Duration, factory: StoreFactory) -> Self {
        Self {
            root,
            factory,
            idle_ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a live session and mark it as seen
    pub async fn get(&self, id: &Uuid) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        entry.last_seen = Utc::now();
        Some(entry.session.clone())
    }

    /// Create a session with its own index directory. The directory is kept
    /// after the session ends.
    pub async fn create(&self) -> Result<(Uuid, SharedSession)> {
        let id = Uuid::new_v4();
        let mut builder = tempfile::Builder::new();
        builder.prefix("pdf-chat-");
        let dir = match &self.root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let db_path = dir.keep();

        let store = (self.factory)(&db_path)?;
        tracing::info!(session = %id, db_path = %db_path.display(), "Created session");

        let session = Arc::new(Mutex::new(SessionContext::new(id, db_path, store)));
        self.sessions.write().await.insert(
            id,
            Entry {
                session: session.clone(),
                last_seen: Utc::now(),
            },
        );
        Ok((id, session))
    }

    /// Drop sessions idle for at least the TTL as of `now`. Index directories
    /// stay on disk. A session still referenced by an in-flight request is kept.
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let idle = now
                .signed_duration_since(entry.last_seen)
                .to_std()
                .is_ok_and(|age| age >= self.idle_ttl);
            if !idle || Arc::strong_count(&entry.session) > 1 {
                return true;
            }
            tracing::info!(session = %id, "Dropping idle session");
            false
        });
        before - sessions.len()
    }

    /// Look up `id`, creating a new session when it is absent or unknown.
    /// The flag is true when a session was created.
    pub async fn get_or_create(&self, id: Option<Uuid>) -> Result<(Uuid, SharedSession, bool)> {
        self.sweep_idle(Utc::now()).await;
        if let Some(id) = id {
            if let Some(session) = self.get(&id).await {
                return Ok((id, session, false));
            }
            tracing::debug!(session = %id, "Unknown session id, starting a new session");
        }
        let (id, session) = self.create().await?;
        Ok((id, session, true))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
