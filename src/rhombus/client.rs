// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP client for the Rhombus cloud API and camera media sessions.
//!
//! Footage is served as DASH VOD: the camera's MPD URI template is filled in
//! with the window, the MPD names an init segment and numbered 2 s media
//! segments, and every media request carries a federated session cookie.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::{Result, SetupError, SourceError, VaultError};
use crate::model::{Camera, SegmentDescriptor, TimeWindow};
use crate::rhombus::mpd::{segment_uri, MpdInfo};
use crate::source::{FootageSource, Scope, ScopeResolver, SegmentListing};

const FEDERATED_TOKEN_PATH: &str = "/api/org/generateFederatedSessionToken";
const CAMERA_STATES_PATH: &str = "/api/camera/getMinimalCameraStateList";
const MEDIA_URIS_PATH: &str = "/api/camera/getMediaUris";

/// Cameras in this state are offline and are never asked for footage.
const OFFLINE_STATUS: &str = "RED";

/// Federated media session cookie and when it was issued.
#[derive(Debug, Clone)]
struct MediaSession {
    cookie: String,
    issued: Instant,
}

impl MediaSession {
    fn new(token: &str) -> Self {
        Self { cookie: format!("RSESSIONID=RFT:{token}"), issued: Instant::now() }
    }

    /// Renew once 90% of the lifetime has passed.
    fn is_stale(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.issued) >= ttl - ttl / 10
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FederatedToken {
    federated_session_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraStateList {
    #[serde(default)]
    camera_states: Vec<CameraState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraState {
    uuid: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    location_uuid: Option<String>,
    #[serde(default)]
    connection_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaUris {
    #[serde(default)]
    wan_vod_mpd_uri_template: Option<String>,
    #[serde(default)]
    lan_vod_mpd_uris_templates: Vec<String>,
}

pub struct RhombusClient {
    api: Client,
    media: Client,
    base_url: String,
    api_key: String,
    auth_scheme: &'static str,
    use_wan: bool,
    session_ttl: Duration,
    session: RwLock<MediaSession>,
}

impl RhombusClient {
    /// Build the HTTP clients and open a federated media session. Fails
    /// with a setup error when the credentials are rejected.
    pub async fn connect(cfg: &ApiConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VaultError::Config("api_key is required".into()))?;
        let timeout = Duration::from_secs(cfg.request_timeout_secs);

        let mut api = Client::builder().timeout(timeout);
        let auth_scheme = match (&cfg.cert, &cfg.private_key) {
            (Some(cert), Some(key)) => {
                let mut pem = tokio::fs::read(cert)
                    .await
                    .map_err(|e| VaultError::Config(format!("Cannot read cert {cert:?}: {e}")))?;
                pem.push(b'\n');
                pem.extend(
                    tokio::fs::read(key)
                        .await
                        .map_err(|e| VaultError::Config(format!("Cannot read private key {key:?}: {e}")))?,
                );
                let identity = reqwest::Identity::from_pem(&pem)
                    .map_err(|e| VaultError::Config(format!("Invalid client certificate: {e}")))?;
                api = api.identity(identity);
                "api"
            }
            _ => "api-token",
        };
        let api = api
            .build()
            .map_err(|e| VaultError::Config(format!("Cannot build API client: {e}")))?;
        // LAN cameras present self-signed certificates.
        let media = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| VaultError::Config(format!("Cannot build media client: {e}")))?;

        let client = Self {
            api,
            media,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            auth_scheme,
            use_wan: cfg.use_wan,
            session_ttl: Duration::from_secs(cfg.session_duration_secs),
            session: RwLock::new(MediaSession::new("")),
        };

        client.renew_session().await.map_err(SetupError::from)?;
        info!(scheme = auth_scheme, wan = cfg.use_wan, "Rhombus session established");
        Ok(client)
    }

    /// Request a fresh federated session token and install it for media
    /// requests.
    async fn renew_session(&self) -> std::result::Result<(), SourceError> {
        let token: FederatedToken = self
            .post_json(FEDERATED_TOKEN_PATH, json!({ "durationSec": self.session_ttl.as_secs() }))
            .await?;
        *self.session.write() = MediaSession::new(&token.federated_session_token);
        debug!(ttl_secs = self.session_ttl.as_secs(), "Media session renewed");
        Ok(())
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> std::result::Result<T, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url, "API request");
        let resp = self
            .api
            .post(&url)
            .header("accept", "application/json")
            .header("x-auth-scheme", self.auth_scheme)
            .header("x-auth-apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        check_status(resp, &url)?
            .json::<T>()
            .await
            .map_err(|e| SourceError::Protocol(format!("{path}: {e}")))
    }

    /// GET a media URI. The session is renewed when close to expiry, and
    /// once more if the camera rejects it anyway.
    async fn media_get(&self, uri: &str) -> std::result::Result<Response, SourceError> {
        if self.session.read().is_stale(self.session_ttl, Instant::now()) {
            self.renew_session().await?;
        }
        match self.media_request(uri).await {
            Err(SourceError::Unauthorized(reason)) => {
                warn!(uri, reason, "Media session rejected, renewing");
                self.renew_session().await?;
                self.media_request(uri).await
            }
            res => res,
        }
    }

    async fn media_request(&self, uri: &str) -> std::result::Result<Response, SourceError> {
        let cookie = self.session.read().cookie.clone();
        let resp = self
            .media
            .get(uri)
            .header("x-auth-scheme", self.auth_scheme)
            .header("x-auth-apikey", &self.api_key)
            .header("Cookie", cookie)
            .send()
            .await
            .map_err(map_transport)?;
        check_status(resp, uri)
    }

    async fn mpd_template(&self, camera: &Camera) -> std::result::Result<String, SourceError> {
        let uris: MediaUris = self.post_json(MEDIA_URIS_PATH, json!({ "cameraUuid": camera.id })).await?;
        let template = if self.use_wan {
            uris.wan_vod_mpd_uri_template
        } else {
            uris.lan_vod_mpd_uris_templates.into_iter().next()
        };
        template.ok_or_else(|| {
            SourceError::Protocol(format!(
                "camera {} has no {} VOD template",
                camera.id,
                if self.use_wan { "WAN" } else { "LAN" }
            ))
        })
    }
}

#[async_trait]
impl FootageSource for RhombusClient {
    async fn list_segments(
        &self,
        camera: &Camera,
        window: &TimeWindow,
    ) -> std::result::Result<SegmentListing, SourceError> {
        let mpd_uri = self
            .mpd_template(camera)
            .await?
            .replace("{START_TIME}", &window.start().to_string())
            .replace("{DURATION}", &window.duration().to_string());
        debug!(camera = camera.id, mpd_uri, "Opening media session");

        let doc = self.media_get(&mpd_uri).await?.text().await.map_err(map_transport)?;
        let info = MpdInfo::parse(&doc)?;

        let count = window.duration().div_ceil(info.segment_secs);
        let seg_len = info.segment_secs as i64;
        let mut segments = Vec::with_capacity(count as usize);
        for index in 0..count {
            let name = info.segment_name(index);
            let locator = segment_uri(&mpd_uri, &name)
                .ok_or_else(|| SourceError::Protocol(format!("cannot derive segment URI from {mpd_uri}")))?;
            let start = window.start() + index as i64 * seg_len;
            segments.push(SegmentDescriptor::new(camera.id.clone(), start, start + seg_len, locator));
        }

        let init_uri = segment_uri(&mpd_uri, &info.init)
            .ok_or_else(|| SourceError::Protocol(format!("cannot derive init URI from {mpd_uri}")))?;
        let init = read_body(self.media_get(&init_uri).await?).await?;

        Ok(SegmentListing { segments, init: Some(init) })
    }

    async fn fetch_segment(&self, segment: &SegmentDescriptor) -> std::result::Result<Bytes, SourceError> {
        let resp = self.media_get(&segment.locator).await?;
        read_body(resp).await
    }
}

#[async_trait]
impl ScopeResolver for RhombusClient {
    async fn resolve(&self, scope: &Scope) -> std::result::Result<Vec<Camera>, SourceError> {
        let list: CameraStateList = self.post_json(CAMERA_STATES_PATH, json!({})).await?;
        let online: Vec<Camera> = list
            .camera_states
            .into_iter()
            .filter(|c| c.connection_status.as_deref() != Some(OFFLINE_STATUS))
            .map(|c| Camera { id: c.uuid, name: c.name, location_id: c.location_uuid })
            .collect();
        debug!(online = online.len(), %scope, "Camera states fetched");
        scope.select(online)
    }
}

/// Read a body fully, flagging bodies shorter than their `Content-Length`.
async fn read_body(resp: Response) -> std::result::Result<Bytes, SourceError> {
    let expected = resp.content_length();
    let body = resp.bytes().await.map_err(map_transport)?;
    match expected {
        Some(expected) if expected != body.len() as u64 => Err(SourceError::Truncated {
            expected,
            actual: body.len() as u64,
        }),
        _ => Ok(body),
    }
}

fn check_status(resp: Response, what: &str) -> std::result::Result<Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(classify_status(status, what))
}

fn classify_status(status: StatusCode, what: &str) -> SourceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SourceError::Unauthorized(format!("{status} for {what}"))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => SourceError::NotFound(what.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SourceError::Server { status: status.as_u16(), message: what.to_string() }
        }
        s if s.is_server_error() => SourceError::Server { status: s.as_u16(), message: what.to_string() },
        s => SourceError::Protocol(format!("unexpected status {s} for {what}")),
    }
}

fn map_transport(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(e.to_string())
    } else if e.is_decode() {
        SourceError::Protocol(e.to_string())
    } else {
        SourceError::Network(e.to_string())
    }
}
