use crate::engine::MatchingEngine;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// Matching engine shared by every connection
    pub engine: MatchingEngine,
    /// Shared secret for the WebSocket upgrade; empty disables the check
    master_password: String,
}

impl AppState {
    pub fn new(engine: MatchingEngine, master_password: impl Into<String>) -> Self {
        Self {
            engine,
            master_password: master_password.into(),
        }
    }

    /// True if the upgrade may proceed with the presented secret
    pub fn secret_matches(&self, presented: Option<&str>) -> bool {
        self.master_password.is_empty() || presented == Some(self.master_password.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::websocket::WriterCache;
    use std::sync::Arc;

    fn state(password: &str) -> AppState {
        let engine = MatchingEngine::new(
            Arc::new(InMemoryDirectory::new()),
            Arc::new(WriterCache::new()),
        );
        AppState::new(engine, password)
    }

    #[test]
    fn test_open_hub_accepts_anything() {
        let s = state("");
        assert!(s.secret_matches(None));
        assert!(s.secret_matches(Some("x")));
    }

    #[test]
    fn test_protected_hub() {
        let s = state("s3cret");
        assert!(s.secret_matches(Some("s3cret")));
        assert!(!s.secret_matches(Some("nope")));
        assert!(!s.secret_matches(None));
    }
}
