use super::expression::Expression;
use super::{CatalogImage, ImageRecord, ImageryService, PixelsRequest};
use crate::config::ServiceSettings;
use crate::error::{ServiceError, SessionError};
use anyhow::Result;
use futures_util::TryStreamExt;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::Write;
use std::time::Duration;
use url::Url;

pub const PROJECT_VAR: &str = "EarthEngine_Project";
const PROJECT_VAR_FALLBACK: &str = "EARTHENGINE_PROJECT";
pub const TOKEN_VAR: &str = "EARTHENGINE_TOKEN";

const USER_PROJECT_HEADER: &str = "x-goog-user-project";

pub struct Credentials {
    pub project: String,
    pub token: String,
}

impl Credentials {
    /// Project id and an OAuth access token (e.g. from `gcloud auth print-access-token`).
    pub fn from_env() -> Result<Self, SessionError> {
        let project = env::var(PROJECT_VAR)
            .or_else(|_| env::var(PROJECT_VAR_FALLBACK))
            .map_err(|_| SessionError::MissingVar(PROJECT_VAR))?;
        let token = env::var(TOKEN_VAR).map_err(|_| SessionError::MissingVar(TOKEN_VAR))?;
        Ok(Self { project, token })
    }
}

pub struct Session {
    client: Client,
    api_root: Url,
    project: String,
    page_size: Option<u32>,
}

impl Session {
    /// Build an authenticated client and check it against the project's algorithm listing.
    pub async fn initialize(credentials: Credentials, settings: &ServiceSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credentials.token))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_PROJECT_HEADER,
            HeaderValue::from_str(&credentials.project)?,
        );

        let mut builder = Client::builder().default_headers(headers);
        if let Some(secs) = settings.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let session = Self {
            client: builder.build()?,
            api_root: Url::parse(&settings.api_root)?,
            project: credentials.project,
            page_size: settings.page_size,
        };

        let url = session.project_url("algorithms")?;
        debug!("GET {url}");
        ensure_success(session.client.get(url).send().await?).await?;
        info!("Earth Engine session ready for project {}", session.project);

        Ok(session)
    }

    fn project_url(self: &Self, method: &str) -> Result<Url> {
        let url = self
            .api_root
            .join(&format!("projects/{}/{}", self.project, method))?;
        Ok(url)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeImagesRequest<'a> {
    expression: &'a Expression,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeImagesResponse {
    #[serde(default)]
    images: Vec<CatalogImage>,
    next_page_token: Option<String>,
}

impl ImageryService for Session {
    async fn compute_images(self: &Self, expression: &Expression) -> Result<Vec<ImageRecord>> {
        let url = self.project_url("imageCollection:computeImages")?;
        let mut records = vec![];
        let mut page_token: Option<String> = None;

        loop {
            let request = ComputeImagesRequest {
                expression,
                page_size: self.page_size,
                page_token: page_token.as_deref(),
            };
            debug!("POST {url} (page token: {page_token:?})");
            let response = self.client.post(url.clone()).json(&request).send().await?;
            let page: ComputeImagesResponse = ensure_success(response).await?.json().await?;

            for image in page.images {
                records.push(ImageRecord::try_from(image)?);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(records)
    }

    async fn compute_pixels<W: Write>(
        self: &Self,
        request: &PixelsRequest,
        sink: &mut W,
    ) -> Result<u64> {
        let url = self.project_url("image:computePixels")?;
        debug!("POST {url}");
        let response = self.client.post(url).json(request).send().await?;
        let mut stream = ensure_success(response).await?.bytes_stream();

        let mut byte_count = 0_u64;
        while let Some(bytes) = stream.try_next().await? {
            sink.write_all(&bytes)?;
            byte_count += bytes.len() as u64;
        }
        sink.flush()?;

        Ok(byte_count)
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        message: error_message(&body),
    }
    .into())
}

/// Google APIs wrap failures as `{"error": {"code": .., "message": .., "status": ..}}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}
