// src/client/api.rs

//! Backend calls made by the candidate client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use super::error::ClientError;
use crate::{
    exam::{ModuleId, ModuleScore},
    models::{
        exam_code::{Resolution, VerifyExamRequest},
        session::{
            CompleteExamRequest, CompleteExamResponse, CompleteModuleResponse,
            ReportViolationRequest, SessionSnapshot, StartExamRequest, StartExamResponse,
            ViolationResponse,
        },
        user::{LoginResponse, MeResponse},
    },
    utils::jwt::FINGERPRINT_HEADER,
};

/// The backend as the candidate client sees it.
///
/// `token` is the session token from [`ExamApi::start_exam`], except for
/// [`ExamApi::get_my_profile`] which takes a login token.
#[async_trait]
pub trait ExamApi: Send + Sync {
    async fn verify_exam_id(&self, code: &str) -> Result<Resolution, ClientError>;

    async fn start_exam(&self, request: &StartExamRequest) -> Result<StartExamResponse, ClientError>;

    async fn get_session(&self, token: &str) -> Result<SessionSnapshot, ClientError>;

    async fn enter_module(&self, token: &str, module: ModuleId) -> Result<SessionSnapshot, ClientError>;

    async fn complete_module(
        &self,
        token: &str,
        module: ModuleId,
        score: &ModuleScore,
    ) -> Result<CompleteModuleResponse, ClientError>;

    async fn report_violation(
        &self,
        token: &str,
        request: &ReportViolationRequest,
    ) -> Result<ViolationResponse, ClientError>;

    /// Ends the session once the local violation limit is reached.
    async fn terminate_session(&self, token: &str) -> Result<SessionSnapshot, ClientError>;

    async fn complete_exam(
        &self,
        token: &str,
        request: &CompleteExamRequest,
    ) -> Result<CompleteExamResponse, ClientError>;

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError>;

    async fn get_my_profile(&self, token: &str) -> Result<MeResponse, ClientError>;
}

/// [`ExamApi`] over HTTP.
///
/// Every call carries the browser fingerprint the session is bound to.
#[derive(Debug, Clone)]
pub struct HttpExamApi {
    http: reqwest::Client,
    base_url: Url,
    fingerprint: String,
}

impl HttpExamApi {
    pub fn new(base_url: &str, fingerprint: impl Into<String>) -> Result<Self, ClientError> {
        // join() drops the last path segment unless the base ends with '/'
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidBaseUrl(base));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url,
            fingerprint: fingerprint.into(),
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    fn post(&self, path: &str) -> Result<RequestBuilder, ClientError> {
        Ok(self.http.post(self.url(path)?))
    }

    fn get(&self, path: &str) -> Result<RequestBuilder, ClientError> {
        Ok(self.http.get(self.url(path)?))
    }

    fn session(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .bearer_auth(token)
            .header(FINGERPRINT_HEADER, &self.fingerprint)
    }
}

/// Turns non-success statuses into [`ClientError::Api`], using the backend's
/// `{"error": ...}` body when there is one.
async fn check_response(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ClientError> {
    let resp = check_response(builder.send().await?).await?;
    Ok(resp.json::<T>().await?)
}

#[async_trait]
impl ExamApi for HttpExamApi {
    async fn verify_exam_id(&self, code: &str) -> Result<Resolution, ClientError> {
        let request = VerifyExamRequest {
            code: code.to_string(),
        };
        send_json(self.post("api/exam/verify")?.json(&request)).await
    }

    async fn start_exam(&self, request: &StartExamRequest) -> Result<StartExamResponse, ClientError> {
        send_json(
            self.post("api/exam/start")?
                .header(FINGERPRINT_HEADER, &self.fingerprint)
                .json(request),
        )
        .await
    }

    async fn get_session(&self, token: &str) -> Result<SessionSnapshot, ClientError> {
        send_json(self.session(self.get("api/exam/session")?, token)).await
    }

    async fn enter_module(&self, token: &str, module: ModuleId) -> Result<SessionSnapshot, ClientError> {
        let path = format!("api/exam/session/modules/{}/enter", module);
        send_json(self.session(self.post(&path)?, token)).await
    }

    async fn complete_module(
        &self,
        token: &str,
        module: ModuleId,
        score: &ModuleScore,
    ) -> Result<CompleteModuleResponse, ClientError> {
        let path = format!("api/exam/session/modules/{}/complete", module);
        send_json(self.session(self.post(&path)?, token).json(score)).await
    }

    async fn report_violation(
        &self,
        token: &str,
        request: &ReportViolationRequest,
    ) -> Result<ViolationResponse, ClientError> {
        send_json(
            self.session(self.post("api/exam/session/violations")?, token)
                .json(request),
        )
        .await
    }

    async fn terminate_session(&self, token: &str) -> Result<SessionSnapshot, ClientError> {
        send_json(self.session(self.post("api/exam/session/terminate")?, token)).await
    }

    async fn complete_exam(
        &self,
        token: &str,
        request: &CompleteExamRequest,
    ) -> Result<CompleteExamResponse, ClientError> {
        send_json(
            self.session(self.post("api/exam/session/complete")?, token)
                .json(request),
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        send_json(
            self.post("api/auth/login")?
                .json(&json!({ "email": email, "password": password })),
        )
        .await
    }

    async fn get_my_profile(&self, token: &str) -> Result<MeResponse, ClientError> {
        send_json(self.get("api/profile/me")?.bearer_auth(token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_its_path() {
        let api = HttpExamApi::new("http://localhost:3000/exam", "fp-12345678").unwrap();
        assert_eq!(
            api.url("api/exam/verify").unwrap().as_str(),
            "http://localhost:3000/exam/api/exam/verify"
        );
    }

    #[test]
    fn rejects_non_http_base_url() {
        assert!(matches!(
            HttpExamApi::new("ftp://example.com", "fp-12345678"),
            Err(ClientError::InvalidBaseUrl(_))
        ));
        assert!(HttpExamApi::new("not a url", "fp-12345678").is_err());
    }
}
