pub mod models;

use models::{SessionId, SessionSummary, Turn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session id: {0:?}")]
    InvalidId(String),
    #[error("Transcript I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt transcript {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Cannot encode transcript: {0}")]
    Encode(serde_json::Error),
}

/// One pretty-printed JSON transcript per session id:
///
/// ```text
/// memory_dir/
/// ├── 0f8a…-uuid.json
/// └── student_42.json
/// ```
pub struct SessionStore {
    dir: PathBuf,
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, SessionError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    /// Turns for `id` in order; an unknown id yields an empty transcript.
    pub async fn load(&self, id: &SessionId) -> Result<Vec<Turn>, SessionError> {
        let path = self.path_for(id);
        match fs::read(&path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| SessionError::Corrupt { path, source })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the whole transcript. Written to a temp file and renamed
    /// so readers never see a partial file.
    pub async fn save(&self, id: &SessionId, turns: &[Turn]) -> Result<(), SessionError> {
        let path = self.path_for(id);
        let tmp = self.dir.join(format!(".{}.json.tmp", id.as_str()));
        let json = serde_json::to_vec_pretty(turns).map_err(SessionError::Encode)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn lock_for(&self, id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.clone()).or_default().clone()
    }

    /// Drop the id's lock entry once no other append holds or waits on it.
    fn release_lock(&self, id: &SessionId) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    /// Append a question/answer pair. Appends to the same id are serialized
    /// within this process; separate processes still race (last write wins).
    pub async fn append_exchange(
        &self,
        id: &SessionId,
        question: &str,
        answer: &str,
    ) -> Result<usize, SessionError> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(id, question, answer).await
        };
        drop(lock);
        self.release_lock(id);
        result
    }

    async fn append_locked(
        &self,
        id: &SessionId,
        question: &str,
        answer: &str,
    ) -> Result<usize, SessionError> {
        let mut turns = self.load(id).await?;
        turns.push(Turn::user(question));
        turns.push(Turn::assistant(answer));
        self.save(id, &turns).await?;
        tracing::debug!(session_id = %id, turns = turns.len(), "transcript saved");
        Ok(turns.len())
    }

    /// Summaries of every stored transcript, sorted by session id.
    pub async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(id) = SessionId::parse(stem) else {
                continue;
            };
            match self.load(&id).await {
                Ok(turns) => sessions.push(SessionSummary {
                    session_id: id.to_string(),
                    message_count: turns.len(),
                    last_message: turns.last().map(|t| t.content.clone()),
                }),
                Err(e) => tracing::warn!(session_id = %id, error = %e, "skipping unreadable transcript"),
            }
        }
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(sessions)
    }
}
