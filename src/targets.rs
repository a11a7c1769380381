use crate::config::{TriggerSettings, UrlTarget, WorkflowTarget};
use crate::fetch::display_location;
use reqwest::{Client, StatusCode};
use serde_json::json;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("GH_DISPATCH_TOKEN is not configured")]
    MissingToken,
    #[error("request to {location} failed: {message}")]
    Request { location: String, message: String },
    #[error("{location} answered HTTP {status}: {body}")]
    Status {
        location: String,
        status: u16,
        body: String,
    },
}

/// Starts targets that run somewhere else: a generator URL or a GitHub workflow.
#[derive(Clone)]
pub struct RemoteTrigger {
    http: Client,
    github_token: Option<String>,
    github_api_base: String,
}

impl RemoteTrigger {
    pub fn new(http: Client, settings: &TriggerSettings) -> Self {
        Self {
            http,
            github_token: settings
                .github_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            github_api_base: settings.github_api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Plain GET; any 2xx means the generator accepted the request.
    pub async fn hit_url(&self, target: &UrlTarget) -> Result<(), RemoteError> {
        let location = display_location(&target.url);
        let response = self
            .http
            .get(&target.url)
            .send()
            .await
            .map_err(|err| RemoteError::Request {
                location: location.clone(),
                message: err.without_url().to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                location,
                status: status.as_u16(),
                body: String::new(),
            });
        }
        info!(target = "feeds.webhook", %location, status = status.as_u16(), "remote generator triggered");
        Ok(())
    }

    /// `workflow_dispatch`; GitHub answers 204 when the run is queued.
    pub async fn dispatch_workflow(&self, target: &WorkflowTarget) -> Result<(), RemoteError> {
        let token = self.github_token.as_deref().ok_or(RemoteError::MissingToken)?;
        let url = format!(
            "{}/repos/{}/{}/actions/workflows/{}/dispatches",
            self.github_api_base, target.owner, target.repo, target.workflow
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&json!({ "ref": target.git_ref }))
            .send()
            .await
            .map_err(|err| RemoteError::Request {
                location: url.clone(),
                message: err.without_url().to_string(),
            })?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                location: url,
                status: status.as_u16(),
                body,
            });
        }
        info!(
            target = "feeds.webhook",
            repo = %format!("{}/{}", target.owner, target.repo),
            workflow = %target.workflow,
            "workflow dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;
    use crate::http::build_client;
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::{get, post},
    };
    use serde_json::Value;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn trigger(base: &str, token: Option<&str>) -> RemoteTrigger {
        let settings = TriggerSettings {
            github_token: token.map(str::to_string),
            github_api_base: base.to_string(),
            ..TriggerSettings::default()
        };
        RemoteTrigger::new(
            build_client(&HttpSettings::default()).expect("client"),
            &settings,
        )
    }

    fn workflow() -> WorkflowTarget {
        WorkflowTarget {
            title: Some("EPICENTER".into()),
            owner: "acme".into(),
            repo: "epicenter-feed".into(),
            workflow: "update.yml".into(),
            git_ref: "main".into(),
        }
    }

    #[tokio::test]
    async fn dispatches_workflow_with_token_and_ref() {
        let router = Router::new().route(
            "/repos/{owner}/{repo}/actions/workflows/{workflow}/dispatches",
            post(
                |Path((owner, repo, workflow)): Path<(String, String, String)>,
                 headers: HeaderMap,
                 Json(body): Json<Value>| async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer gh-token");
                    if authorized
                        && owner == "acme"
                        && repo == "epicenter-feed"
                        && workflow == "update.yml"
                        && body["ref"] == "main"
                    {
                        AxumStatus::NO_CONTENT
                    } else {
                        AxumStatus::UNPROCESSABLE_ENTITY
                    }
                },
            ),
        );
        let base = serve(router).await;
        trigger(&base, Some("gh-token"))
            .dispatch_workflow(&workflow())
            .await
            .expect("dispatched");

        let err = trigger(&base, Some("other"))
            .dispatch_workflow(&workflow())
            .await
            .expect_err("rejected");
        assert!(matches!(err, RemoteError::Status { status: 422, .. }));
    }

    #[tokio::test]
    async fn workflow_needs_token() {
        let err = trigger("http://127.0.0.1:9", None)
            .dispatch_workflow(&workflow())
            .await
            .expect_err("no token");
        assert!(matches!(err, RemoteError::MissingToken));
    }

    #[tokio::test]
    async fn url_target_accepts_any_success() {
        let router = Router::new()
            .route("/generate/hotline", get(|| async { AxumStatus::ACCEPTED }))
            .route("/generate/broken", get(|| async { AxumStatus::BAD_GATEWAY }));
        let base = serve(router).await;
        let remote = trigger(&base, None);

        remote
            .hit_url(&UrlTarget {
                title: None,
                url: format!("{base}/generate/hotline"),
            })
            .await
            .expect("started");
        let err = remote
            .hit_url(&UrlTarget {
                title: None,
                url: format!("{base}/generate/broken"),
            })
            .await
            .expect_err("502");
        assert!(matches!(err, RemoteError::Status { status: 502, .. }));
    }
}
