//! Google Cloud Storage backend over the JSON API.
//!
//! Speaks the JSON API directly with `reqwest`: media downloads, multipart
//! uploads with `ifGenerationMatch` preconditions, metadata patches and paged
//! listings. Credentials come from `gcp_auth` application default
//! credentials unless the client is anonymous or carries a static token.
//!
//! Uploads stream the body, so a writer's bytes flow straight into the request
//! without buffering the whole object.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use gcp_auth::TokenProvider;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::config::GcsClientOptions;
use crate::error::{Error, Result};
use crate::observability::Redacted;
use crate::storage::{
    ByteStream, DeleteResult, Generation, ObjectAttrs, ObjectMeta, StorageBackend,
    WritePrecondition, WriteResult,
};

const GCS_SCOPES: &[&str] = &["https://www.googleapis.com/auth/devstorage.read_write"];

/// Longest error body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

enum Auth {
    Anonymous,
    Static(Redacted<String>),
    Provider(Arc<dyn TokenProvider>),
}

/// Storage backend for one GCS bucket.
pub struct GcsBackend {
    http: reqwest::Client,
    endpoint: String,
    bucket: String,
    user_project: Option<String>,
    auth: Auth,
}

impl std::fmt::Debug for GcsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = match self.auth {
            Auth::Anonymous => "anonymous",
            Auth::Static(_) => "static-token",
            Auth::Provider(_) => "<TokenProvider>",
        };
        f.debug_struct("GcsBackend")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("auth", &auth)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    name: String,
    #[serde(default)]
    size: Option<String>,
    generation: String,
    #[serde(default)]
    time_created: Option<DateTime<Utc>>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    cache_control: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

impl ObjectResource {
    fn into_meta(self) -> Result<ObjectMeta> {
        let generation: Generation = self.generation.parse()?;
        let size = match self.size {
            Some(s) => s
                .parse::<u64>()
                .map_err(|e| Error::transport(format!("invalid object size {s:?}: {e}")))?,
            None => 0,
        };
        let created = self.time_created.unwrap_or_else(Utc::now);
        Ok(ObjectMeta {
            name: self.name,
            size,
            generation,
            created,
            updated: self.updated.unwrap_or(created),
            content_type: self.content_type,
            cache_control: self.cache_control,
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

fn transport(context: &str, e: reqwest::Error) -> Error {
    Error::transport_with_source(format!("{context}: {e}"), e)
}

/// Maps a non-success response to an error, keeping a truncated body.
async fn status_error(resp: Response, path: &str) -> Error {
    let status = resp.status();
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("object not found: {path}")),
        StatusCode::PRECONDITION_FAILED => Error::precondition(format!("{status}: {body}")),
        StatusCode::BAD_REQUEST => Error::InvalidArgument(format!("{status}: {body}")),
        _ => Error::transport(format!("{status}: {body}")),
    }
}

/// JSON object resource for uploads and patches.
fn attrs_resource(name: Option<&str>, attrs: &ObjectAttrs) -> Map<String, Value> {
    let mut resource = Map::new();
    if let Some(name) = name {
        resource.insert("name".into(), Value::String(name.to_string()));
    }
    if let Some(ct) = &attrs.content_type {
        resource.insert("contentType".into(), Value::String(ct.clone()));
    }
    if let Some(cc) = &attrs.cache_control {
        resource.insert("cacheControl".into(), Value::String(cc.clone()));
    }
    if let Some(md) = &attrs.metadata {
        let md = md
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        resource.insert("metadata".into(), Value::Object(md));
    }
    resource
}

fn precondition_param(precondition: WritePrecondition) -> Option<String> {
    match precondition {
        WritePrecondition::None => None,
        WritePrecondition::DoesNotExist => Some("0".to_string()),
        WritePrecondition::GenerationMatch(g) => Some(g.to_string()),
    }
}

impl GcsBackend {
    /// Creates a backend for `bucket`.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid, the HTTP client cannot be
    /// built, or application default credentials cannot be discovered.
    pub async fn new(bucket: &str, options: &GcsClientOptions) -> Result<Self> {
        options.validate()?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| transport("failed to build HTTP client", e))?;

        let auth = if options.anonymous {
            Auth::Anonymous
        } else if let Some(token) = &options.access_token {
            Auth::Static(token.clone())
        } else {
            let provider = gcp_auth::provider().await.map_err(|e| {
                Error::transport(format!("failed to initialize GCP authentication: {e}"))
            })?;
            Auth::Provider(provider)
        };

        tracing::debug!(
            bucket,
            endpoint = options.endpoint(),
            anonymous = options.anonymous,
            "created GCS backend"
        );

        Ok(Self {
            http,
            endpoint: options.endpoint().to_string(),
            bucket: bucket.to_string(),
            user_project: options.user_project.clone(),
            auth,
        })
    }

    fn url(&self, api_root: &str, object: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{api_root}", self.endpoint))
            .map_err(|e| Error::InvalidArgument(format!("invalid endpoint: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| Error::InvalidArgument("endpoint cannot be a base URL".into()))?;
            segments.push("b").push(&self.bucket).push("o");
            if let Some(object) = object {
                segments.push(object);
            }
        }
        if let Some(project) = &self.user_project {
            url.query_pairs_mut().append_pair("userProject", project);
        }
        Ok(url)
    }

    fn object_url(&self, object: &str) -> Result<Url> {
        self.url("storage/v1", Some(object))
    }

    async fn authorize(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        match &self.auth {
            Auth::Anonymous => Ok(req),
            Auth::Static(token) => Ok(req.bearer_auth(token.expose())),
            Auth::Provider(provider) => {
                let token = provider
                    .token(GCS_SCOPES)
                    .await
                    .map_err(|e| Error::transport(format!("failed to get GCS token: {e}")))?;
                Ok(req.bearer_auth(token.as_str()))
            }
        }
    }

    async fn send(&self, req: RequestBuilder, context: &str) -> Result<Response> {
        self.authorize(req)
            .await?
            .send()
            .await
            .map_err(|e| transport(context, e))
    }

    async fn fetch_media(&self, path: &str) -> Result<Response> {
        let mut url = self.object_url(path)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let resp = self.send(self.http.get(url), "download failed").await?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(status_error(resp, path).await)
        }
    }
}

#[async_trait]
impl StorageBackend for GcsBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.fetch_media(path)
            .await?
            .bytes()
            .await
            .map_err(|e| transport("read body failed", e))
    }

    async fn get_stream(&self, path: &str) -> Result<ByteStream> {
        let resp = self.fetch_media(path).await?;
        Ok(Box::pin(
            resp.bytes_stream()
                .map_err(|e| transport("read body failed", e)),
        ))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let body: ByteStream = Box::pin(futures::stream::once(async move { Ok(data) }));
        self.put_stream(path, body, attrs, precondition).await
    }

    async fn put_stream(
        &self,
        path: &str,
        body: ByteStream,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut url = self.url("upload/storage/v1", None)?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");
        if let Some(g) = precondition_param(precondition) {
            url.query_pairs_mut().append_pair("ifGenerationMatch", &g);
        }

        let boundary = format!("fleet-{}", Ulid::new());
        let resource = Value::Object(attrs_resource(Some(path), attrs));
        let media_type = attrs
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        let head = Bytes::from(format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{resource}\r\n--{boundary}\r\nContent-Type: {media_type}\r\n\r\n"
        ));
        let tail = Bytes::from(format!("\r\n--{boundary}--\r\n"));
        let stream = futures::stream::once(async move { Ok::<_, Error>(head) })
            .chain(body)
            .chain(futures::stream::once(async move { Ok(tail) }));

        let req = self
            .http
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(reqwest::Body::wrap_stream(stream));
        let resp = self.send(req, "upload failed").await?;

        match resp.status() {
            StatusCode::PRECONDITION_FAILED => Ok(WriteResult::PreconditionFailed { current: None }),
            s if s.is_success() => {
                let resource: ObjectResource = resp
                    .json()
                    .await
                    .map_err(|e| transport("invalid upload response", e))?;
                Ok(WriteResult::Success {
                    generation: resource.generation.parse()?,
                })
            }
            _ => Err(status_error(resp, path).await),
        }
    }

    async fn delete(&self, path: &str, precondition: WritePrecondition) -> Result<DeleteResult> {
        let mut url = self.object_url(path)?;
        if let Some(g) = precondition_param(precondition) {
            url.query_pairs_mut().append_pair("ifGenerationMatch", &g);
        }
        let resp = self.send(self.http.delete(url), "delete failed").await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(DeleteResult::NotFound),
            StatusCode::PRECONDITION_FAILED => Ok(DeleteResult::PreconditionFailed),
            s if s.is_success() => Ok(DeleteResult::Deleted),
            _ => Err(status_error(resp, path).await),
        }
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let url = self.object_url(path)?;
        let resp = self.send(self.http.get(url), "stat failed").await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let resource: ObjectResource = resp
                    .json()
                    .await
                    .map_err(|e| transport("invalid object resource", e))?;
                resource.into_meta().map(Some)
            }
            _ => Err(status_error(resp, path).await),
        }
    }

    async fn update(&self, path: &str, attrs: &ObjectAttrs) -> Result<ObjectMeta> {
        let mut patch = attrs_resource(None, attrs);

        // PATCH merges metadata keys; null out the ones being replaced away.
        if let Some(new_metadata) = &attrs.metadata {
            let current = self
                .head(path)
                .await?
                .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))?;
            let mut merged: Map<String, Value> = current
                .metadata
                .keys()
                .filter(|k| !new_metadata.contains_key(*k))
                .map(|k| (k.clone(), Value::Null))
                .collect();
            for (k, v) in new_metadata {
                merged.insert(k.clone(), Value::String(v.clone()));
            }
            patch.insert("metadata".into(), Value::Object(merged));
        }

        let url = self.object_url(path)?;
        let resp = self
            .send(self.http.patch(url).json(&Value::Object(patch)), "update failed")
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp, path).await);
        }
        let resource: ObjectResource = resp
            .json()
            .await
            .map_err(|e| transport("invalid object resource", e))?;
        resource.into_meta()
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut listed = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url("storage/v1", None)?;
            {
                let mut query = url.query_pairs_mut();
                if !prefix.is_empty() {
                    query.append_pair("prefix", prefix);
                }
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let resp = self.send(self.http.get(url), "list failed").await?;
            if !resp.status().is_success() {
                return Err(status_error(resp, prefix).await);
            }
            let page: ListResponse = resp
                .json()
                .await
                .map_err(|e| transport("invalid list response", e))?;
            for item in page.items {
                listed.push(item.into_meta()?);
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(listed)
    }
}
