//! Typed REST client for the journey-log service.
//!
//! The [`JourneyLog`] trait is the seam the orchestrator and tests program
//! against; [`JourneyLogHttpClient`] is the production implementation over a
//! pooled `reqwest` client. Reads are safe to retry; mutations are issued
//! exactly once by construction of the orchestrator.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::config::JourneyLogConfig;
use crate::journey::types::{
    CharacterContext, CombatState, NarrativeTurn, Poi, PoiCreate, Quest,
};
use crate::observability::redact::body_preview;
use crate::types::{CharacterId, JourneyLogError, TraceId};

/// Header carrying the per-turn correlation id to the store.
pub const TRACE_HEADER: &str = "x-trace-id";

const BODY_PREVIEW_BYTES: usize = 256;

/// Operations against the journey-log store.
#[async_trait]
pub trait JourneyLog: Send + Sync {
    /// Fetch the character context snapshot. Idempotent.
    async fn context(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        recent_n: usize,
        include_pois: bool,
    ) -> Result<CharacterContext, JourneyLogError>;

    /// Sample up to `n` prior points of interest. Idempotent.
    async fn random_pois(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        n: usize,
    ) -> Result<Vec<Poi>, JourneyLogError>;

    async fn put_quest(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        quest: &Quest,
    ) -> Result<(), JourneyLogError>;

    async fn delete_quest(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
    ) -> Result<(), JourneyLogError>;

    async fn put_combat(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        combat: &CombatState,
    ) -> Result<(), JourneyLogError>;

    async fn post_poi(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        poi: &PoiCreate,
    ) -> Result<(), JourneyLogError>;

    async fn post_narrative(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        turn: &NarrativeTurn,
    ) -> Result<(), JourneyLogError>;
}

/// HTTP implementation of [`JourneyLog`].
pub struct JourneyLogHttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl JourneyLogHttpClient {
    pub fn new(config: &JourneyLogConfig) -> Result<Self, JourneyLogError> {
        let parsed = Url::parse(&config.base_url)
            .map_err(|e| JourneyLogError::InvalidBaseUrl(e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(JourneyLogError::InvalidBaseUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| JourneyLogError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn character_url(&self, character_id: &CharacterId, suffix: &str) -> String {
        format!("{}/characters/{}/{}", self.base_url, character_id, suffix)
    }

    fn map_transport(err: reqwest::Error) -> JourneyLogError {
        if err.is_timeout() {
            JourneyLogError::Timeout
        } else {
            JourneyLogError::Transport(err.to_string())
        }
    }

    async fn remote_error(response: reqwest::Response) -> JourneyLogError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        JourneyLogError::RemoteError {
            status,
            body_prefix: body_preview(&body, BODY_PREVIEW_BYTES),
        }
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, JourneyLogError> {
        response
            .json::<T>()
            .await
            .map_err(|e| JourneyLogError::Decode(e.to_string()))
    }

    async fn send_write<B: Serialize + Sync>(
        &self,
        trace: &TraceId,
        method: reqwest::Method,
        url: String,
        body: Option<&B>,
    ) -> Result<(), JourneyLogError> {
        let mut request = self
            .http
            .request(method, &url)
            .header(TRACE_HEADER, trace.as_str());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(Self::map_transport)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::remote_error(response).await)
        }
    }
}

#[async_trait]
impl JourneyLog for JourneyLogHttpClient {
    async fn context(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        recent_n: usize,
        include_pois: bool,
    ) -> Result<CharacterContext, JourneyLogError> {
        let url = self.character_url(character_id, "context");
        let response = self
            .http
            .get(&url)
            .query(&[
                ("recent_n", recent_n.to_string()),
                ("include_pois", include_pois.to_string()),
            ])
            .header(TRACE_HEADER, trace.as_str())
            .send()
            .await
            .map_err(Self::map_transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(JourneyLogError::CharacterNotFound {
                character_id: character_id.clone(),
            }),
            status if status.is_success() => Self::read_json(response).await,
            _ => Err(Self::remote_error(response).await),
        }
    }

    async fn random_pois(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        n: usize,
    ) -> Result<Vec<Poi>, JourneyLogError> {
        let url = self.character_url(character_id, "pois/random");
        let response = self
            .http
            .get(&url)
            .query(&[("n", n.to_string())])
            .header(TRACE_HEADER, trace.as_str())
            .send()
            .await
            .map_err(Self::map_transport)?;

        if response.status().is_success() {
            Self::read_json(response).await
        } else {
            Err(Self::remote_error(response).await)
        }
    }

    async fn put_quest(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        quest: &Quest,
    ) -> Result<(), JourneyLogError> {
        let url = self.character_url(character_id, "quest");
        self.send_write(trace, reqwest::Method::PUT, url, Some(quest))
            .await
    }

    async fn delete_quest(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
    ) -> Result<(), JourneyLogError> {
        let url = self.character_url(character_id, "quest");
        self.send_write::<()>(trace, reqwest::Method::DELETE, url, None)
            .await
    }

    async fn put_combat(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        combat: &CombatState,
    ) -> Result<(), JourneyLogError> {
        let url = self.character_url(character_id, "combat");
        self.send_write(trace, reqwest::Method::PUT, url, Some(combat))
            .await
    }

    async fn post_poi(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        poi: &PoiCreate,
    ) -> Result<(), JourneyLogError> {
        let url = self.character_url(character_id, "pois");
        self.send_write(trace, reqwest::Method::POST, url, Some(poi))
            .await
    }

    async fn post_narrative(
        &self,
        trace: &TraceId,
        character_id: &CharacterId,
        turn: &NarrativeTurn,
    ) -> Result<(), JourneyLogError> {
        let url = self.character_url(character_id, "narrative");
        self.send_write(trace, reqwest::Method::POST, url, Some(turn))
            .await
    }
}
