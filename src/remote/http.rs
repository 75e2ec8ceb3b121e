use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use tracing::debug;

use super::{DirectoryService, Envelope};
use crate::entry::{Entry, EntryId, EntryPatch};
use crate::error::{Result, WorkspaceError};

/// REST adapter for the directory service.
///
/// Routes, relative to `base_url`:
/// - `GET    /entries?parentId=&search=`
/// - `POST   /entries`            `{ name, parentId, kind: "folder" }`
/// - `PATCH  /entries/{id}`       `{ name?, parentId?, starred? }`
/// - `DELETE /entries/{id}`
/// - `POST   /storage/sign`       `{ path, expiresIn }`
/// - `GET    /storage/public?path=`
/// - `PUT    /storage/object?path=`
pub struct HttpDirectory {
    client: Client,
    base_url: String,
}

impl HttpDirectory {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| WorkspaceError::Unauthenticated)?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route.trim_start_matches('/'))
    }

    /// Send a request and decode the envelope, mapping bare HTTP failures.
    async fn send(&self, request: RequestBuilder) -> Result<Envelope> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        match serde_json::from_slice::<Envelope>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(e) => {
                debug!(%status, error = %e, "response is not an envelope");
                Err(status_error(status))
            }
        }
    }
}

/// Error for a response whose body could not be read as an envelope.
fn status_error(status: StatusCode) -> WorkspaceError {
    match status {
        StatusCode::UNAUTHORIZED => WorkspaceError::Unauthenticated,
        StatusCode::FORBIDDEN => WorkspaceError::Forbidden,
        StatusCode::NOT_FOUND => WorkspaceError::NotFound(status.to_string()),
        StatusCode::CONFLICT => WorkspaceError::NameConflict(status.to_string()),
        s if s.is_server_error() => WorkspaceError::Network(s.to_string()),
        s => WorkspaceError::Decode(s.to_string()),
    }
}

#[async_trait]
impl DirectoryService for HttpDirectory {
    async fn list(&self, parent_id: Option<&EntryId>, search: Option<&str>) -> Result<Vec<Entry>> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(parent) = parent_id {
            query.push(("parentId", parent.as_str()));
        }
        if let Some(search) = search {
            query.push(("search", search));
        }
        let request = self.client.get(self.url("entries")).query(&query);
        self.send(request).await?.into_items().map_err(|e| match e {
            WorkspaceError::Remote { message, .. } => WorkspaceError::LoadFailed(message),
            other => other,
        })
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&EntryId>) -> Result<Entry> {
        let body = json!({ "name": name, "parentId": parent_id, "kind": "folder" });
        let request = self.client.post(self.url("entries")).json(&body);
        self.send(request).await?.into_item()
    }

    async fn patch(&self, id: &EntryId, patch: &EntryPatch) -> Result<Entry> {
        let route = format!("entries/{}", id);
        let request = self.client.patch(self.url(&route)).json(patch);
        self.send(request).await?.into_item()
    }

    async fn delete(&self, id: &EntryId) -> Result<()> {
        let route = format!("entries/{}", id);
        let request = self.client.delete(self.url(&route));
        self.send(request).await?.check().map(|_| ())
    }

    async fn signed_url(&self, storage_path: &str, ttl: Duration) -> Result<String> {
        let body = json!({ "path": storage_path, "expiresIn": ttl.as_secs() });
        let request = self.client.post(self.url("storage/sign")).json(&body);
        self.send(request).await?.into_url()
    }

    async fn public_url(&self, storage_path: &str) -> Result<String> {
        let request = self
            .client
            .get(self.url("storage/public"))
            .query(&[("path", storage_path)]);
        self.send(request).await?.into_url()
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WorkspaceError::FileUrlUnavailable(format!("{}: {}", status, url)));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String> {
        let request = self
            .client
            .put(self.url("storage/object"))
            .query(&[("path", path)])
            .body(bytes);
        let envelope = self.send(request).await?.check()?;
        Ok(envelope.path.unwrap_or_else(|| path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let dir =
            HttpDirectory::new("https://api.example.com/v1/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(dir.url("/entries"), "https://api.example.com/v1/entries");
        assert_eq!(dir.url("storage/sign"), "https://api.example.com/v1/storage/sign");
    }

    #[test]
    fn bare_status_codes_map_to_categories() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED),
            WorkspaceError::Unauthenticated
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN),
            WorkspaceError::Forbidden
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY),
            WorkspaceError::Network(_)
        ));
    }

    #[test]
    fn invalid_token_is_rejected() {
        let result = HttpDirectory::new("http://localhost", Some("bad\ntoken"), Duration::from_secs(5));
        assert!(matches!(result, Err(WorkspaceError::Unauthenticated)));
    }
}
