//! ChatGPT-mode credential store.
//!
//! The auth record lives on disk and is shared with other tools, so reads
//! honor the file's mtime and writes go through a temp file plus rename.
//! A process-wide mutex serializes refreshes: when several requests observe
//! an expiring token at once, exactly one refresh call goes out and the rest
//! reuse its result.

use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::GatewayError;

const DEFAULT_TOKEN_ENDPOINT: &str = "https://auth.openai.com/oauth/token";
const OAUTH_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

/// Refresh this long before the recorded expiry.
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(300);

/// The persisted auth record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CodexAuthRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: u64,
    pub account_id: String,
}

impl CodexAuthRecord {
    fn expires_soon(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.expires_at.saturating_sub(now) < EXPIRY_SAFETY_MARGIN.as_secs()
    }
}

#[derive(Debug)]
struct CachedRecord {
    record: CodexAuthRecord,
    file_mtime: Option<SystemTime>,
}

/// Headers an authenticated Codex request needs.
#[derive(Debug)]
pub(crate) struct CodexAuthHeaders {
    pub bearer: SecretString,
    pub account_id: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Seconds from now.
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    grant_type: &'a str,
    refresh_token: &'a str,
    scope: &'a str,
}

#[derive(Debug)]
pub(crate) struct CodexAuthStore {
    path: PathBuf,
    token_endpoint: String,
    client: reqwest::Client,
    cache: Mutex<Option<CachedRecord>>,
}

impl CodexAuthStore {
    pub fn new(path: PathBuf) -> Self {
        Self::with_token_endpoint(path, DEFAULT_TOKEN_ENDPOINT.to_string())
    }

    pub fn with_token_endpoint(path: PathBuf, token_endpoint: String) -> Self {
        Self {
            path,
            token_endpoint,
            client: reqwest::Client::new(),
            cache: Mutex::new(None),
        }
    }

    /// Current bearer token and account id, refreshing first when the record
    /// is about to expire.
    pub async fn get_headers(&self) -> crate::Result<CodexAuthHeaders> {
        let mut cache = self.cache.lock().await;

        let record = self.current_record(&mut cache)?;

        let record = if record.expires_soon() {
            log::debug!("ChatGPT access token expires soon, refreshing");
            self.refresh_locked(&mut cache, record).await?
        } else {
            record
        };

        Ok(CodexAuthHeaders {
            bearer: SecretString::from(record.access_token),
            account_id: record.account_id,
        })
    }

    /// Unconditional refresh, used after an upstream 401.
    pub async fn force_refresh(&self) -> crate::Result<()> {
        let mut cache = self.cache.lock().await;
        let record = self.current_record(&mut cache)?;
        self.refresh_locked(&mut cache, record).await?;
        Ok(())
    }

    /// Read the record, re-loading from disk when the file is newer than the
    /// cached copy. Must be called with the cache mutex held.
    fn current_record(&self, cache: &mut Option<CachedRecord>) -> crate::Result<CodexAuthRecord> {
        let file_mtime = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();

        if let Some(cached) = cache.as_ref() {
            if cached.file_mtime == file_mtime {
                return Ok(cached.record.clone());
            }
            log::debug!("ChatGPT auth record changed on disk, re-reading");
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            GatewayError::AuthenticationFailed(format!(
                "Cannot read ChatGPT auth record at {}: {e}",
                self.path.display()
            ))
        })?;

        let record: CodexAuthRecord = serde_json::from_str(&content).map_err(|e| {
            GatewayError::AuthenticationFailed(format!(
                "Malformed ChatGPT auth record at {}: {e}",
                self.path.display()
            ))
        })?;

        *cache = Some(CachedRecord {
            record: record.clone(),
            file_mtime,
        });

        Ok(record)
    }

    async fn refresh_locked(
        &self,
        cache: &mut Option<CachedRecord>,
        record: CodexAuthRecord,
    ) -> crate::Result<CodexAuthRecord> {
        let body = RefreshRequest {
            client_id: OAUTH_CLIENT_ID,
            grant_type: "refresh_token",
            refresh_token: &record.refresh_token,
            scope: "openid profile email",
        };

        let response = self
            .client
            .post(&self.token_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::ConnectionError(format!("Token refresh request failed: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("ChatGPT token refresh failed ({status}): {error_text}");
            return Err(GatewayError::AuthenticationFailed(format!(
                "Token refresh rejected ({status})"
            )));
        }

        let refreshed: RefreshResponse = response.json().await.map_err(|e| {
            log::error!("Malformed token refresh response: {e}");
            GatewayError::AuthenticationFailed("Malformed token refresh response".to_string())
        })?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let updated = CodexAuthRecord {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.unwrap_or(record.refresh_token),
            expires_at: now + refreshed.expires_in.unwrap_or(3600),
            account_id: record.account_id,
        };

        write_record(&self.path, &updated)?;

        let file_mtime = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        *cache = Some(CachedRecord {
            record: updated.clone(),
            file_mtime,
        });

        log::info!("ChatGPT access token refreshed");

        Ok(updated)
    }
}

/// Atomic rewrite: temp file in the same directory, 0600, then rename.
fn write_record(path: &Path, record: &CodexAuthRecord) -> crate::Result<()> {
    let serialized = serde_json::to_vec_pretty(record).map_err(|e| {
        log::error!("Failed to serialize auth record: {e}");
        GatewayError::Internal(None)
    })?;

    let tmp_path = path.with_extension("json.tmp");

    let io_error = |e: std::io::Error| {
        log::error!("Failed to persist auth record at {}: {e}", path.display());
        GatewayError::Internal(None)
    };

    std::fs::write(&tmp_path, serialized).map_err(io_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).map_err(io_error)?;
    }

    std::fs::rename(&tmp_path, path).map_err(io_error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, routing::post};
    use serde_json::json;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };
    use tokio::net::TcpListener;

    fn write_auth_file(dir: &Path, expires_at: u64) -> PathBuf {
        let path = dir.join("auth.json");
        let record = CodexAuthRecord {
            access_token: "old-token".into(),
            refresh_token: "refresh-1".into(),
            expires_at,
            account_id: "acct_1".into(),
        };
        std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();
        path
    }

    fn far_future() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 86_400
    }

    async fn spawn_token_endpoint(counter: Arc<AtomicU32>) -> String {
        async fn handle(State(counter): State<Arc<AtomicU32>>) -> Json<serde_json::Value> {
            counter.fetch_add(1, Ordering::SeqCst);
            Json(json!({
                "access_token": "new-token",
                "refresh_token": "refresh-2",
                "expires_in": 86400
            }))
        }

        let app = Router::new().route("/oauth/token", post(handle)).with_state(counter);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{address}/oauth/token")
    }

    #[tokio::test]
    async fn valid_record_is_served_without_refreshing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_auth_file(dir.path(), far_future());

        let counter = Arc::new(AtomicU32::new(0));
        let endpoint = spawn_token_endpoint(counter.clone()).await;

        let store = CodexAuthStore::with_token_endpoint(path, endpoint);
        let headers = store.get_headers().await.unwrap();

        assert_eq!(headers.account_id, "acct_1");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expiring_record_triggers_exactly_one_refresh_across_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_auth_file(dir.path(), 1);

        let counter = Arc::new(AtomicU32::new(0));
        let endpoint = spawn_token_endpoint(counter.clone()).await;

        let store = Arc::new(CodexAuthStore::with_token_endpoint(path.clone(), endpoint));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.get_headers().await.unwrap() }));
        }

        for handle in handles {
            let headers = handle.await.unwrap();
            assert_eq!(headers.account_id, "acct_1");
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The renewed record was persisted atomically.
        let on_disk: CodexAuthRecord = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.access_token, "new-token");
        assert_eq!(on_disk.refresh_token, "refresh-2");
    }

    #[tokio::test]
    async fn force_refresh_always_calls_the_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_auth_file(dir.path(), far_future());

        let counter = Arc::new(AtomicU32::new(0));
        let endpoint = spawn_token_endpoint(counter.clone()).await;

        let store = CodexAuthStore::with_token_endpoint(path, endpoint);
        store.force_refresh().await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let headers = store.get_headers().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        use secrecy::ExposeSecret;
        assert_eq!(headers.bearer.expose_secret(), "new-token");
    }

    #[tokio::test]
    async fn missing_record_surfaces_an_authentication_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CodexAuthStore::new(dir.path().join("absent.json"));

        let error = store.get_headers().await.unwrap_err();
        assert!(matches!(error, GatewayError::AuthenticationFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn persisted_record_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = write_auth_file(dir.path(), 1);

        let counter = Arc::new(AtomicU32::new(0));
        let endpoint = spawn_token_endpoint(counter).await;

        let store = CodexAuthStore::with_token_endpoint(path.clone(), endpoint);
        store.get_headers().await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
