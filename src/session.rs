//! Who a session is recorded for, passed explicitly to the acquisition loop and the sinks.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

static SEQ: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: String,

    /// Unique for every started session.
    pub session_id: String,

    /// The participant agreed to share this stream. Uploading sinks skip epochs otherwise.
    pub share: bool,

    /// Passed on untouched to the sinks.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, share: bool) -> SessionContext {
        SessionContext {
            user_id: user_id.into(),
            session_id: new_session_id(),
            share,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Same user and consent, fresh session id.
    pub fn renew(&self) -> SessionContext {
        SessionContext {
            session_id: new_session_id(),
            ..self.clone()
        }
    }
}

fn new_session_id() -> String {
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:04}", Utc::now().format("%Y%m%dT%H%M%S%.3f"), seq % 10000)
}
