use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use splatview_vfs::ImageUpload;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{FetchPolicy, JobId, JobStatus, RemoteConfig, RemoteError};

const TOO_EARLY: u16 = 425;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessResponse {
    job_id: String,
    #[serde(default)]
    status: String,
}

/// A job the server accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone)]
pub struct JobClient {
    client: reqwest::Client,
    base: Url,
    policy: FetchPolicy,
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RemoteError::Cancelled),
        res = fut => res,
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status == StatusCode::ACCEPTED || status.as_u16() == TOO_EARLY {
        return Err(RemoteError::NotReady);
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(RemoteError::Server {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

impl JobClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let base = Url::parse(&config.server_url)
            .map_err(|e| RemoteError::InvalidUrl(format!("{}: {e}", config.server_url)))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(config.server_url.clone()));
        }

        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if config.no_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base,
            policy: config.fetch_policy(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_e| RemoteError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Upload images and start a reconstruction job.
    pub async fn submit(
        &self,
        images: Vec<ImageUpload>,
        cancel: &CancellationToken,
    ) -> Result<SubmittedJob, RemoteError> {
        let url = self.endpoint(["process"])?;
        log::info!("Uploading {} images to {url}", images.len());

        let mut form = Form::new();
        for image in images {
            let part = Part::bytes(image.bytes)
                .file_name(image.name)
                .mime_str(image.mime)?;
            form = form.part("images", part);
        }

        cancellable(cancel, async {
            let response = self.client.post(url).multipart(form).send().await?;
            let response = check_status(response).await?;
            let status_code = response.status().as_u16();
            let body = response.bytes().await?;

            let parsed: ProcessResponse = serde_json::from_slice(&body)
                .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
            let job = SubmittedJob {
                id: JobId::new(parsed.job_id),
                status: JobStatus::from(parsed.status.as_str()),
            };

            if job.status == JobStatus::Failed {
                return Err(RemoteError::Server {
                    status: status_code,
                    message: format!("job {} failed", job.id),
                });
            }
            log::info!("Submitted job {} ({})", job.id, job.status);
            Ok(job)
        })
        .await
    }

    /// Fetch the result of a job once.
    pub async fn fetch(&self, job: &JobId, cancel: &CancellationToken) -> Result<Bytes, RemoteError> {
        let url = self.endpoint(["result", job.as_str()])?;

        cancellable(cancel, async {
            let response = self.client.get(url).send().await?;
            let response = check_status(response).await?;
            let status = response.status().as_u16();
            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Err(RemoteError::Server {
                    status,
                    message: "empty result".to_owned(),
                });
            }
            log::info!("Fetched {} bytes for job {job}", bytes.len());
            Ok(bytes)
        })
        .await
    }

    /// Fetch the result of a job following the configured policy.
    pub async fn fetch_result(
        &self,
        job: &JobId,
        cancel: &CancellationToken,
    ) -> Result<Bytes, RemoteError> {
        let FetchPolicy::Poll { interval, timeout } = self.policy else {
            return self.fetch(job, cancel).await;
        };

        let deadline = Instant::now() + timeout;
        loop {
            match self.fetch(job, cancel).await {
                Err(RemoteError::NotReady) => {
                    if Instant::now() + interval > deadline {
                        return Err(RemoteError::PollTimeout(timeout));
                    }
                    log::debug!("Job {job} not ready, retrying in {interval:?}");
                    sleep(interval, cancel).await?;
                }
                other => return other,
            }
        }
    }
}

async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), RemoteError> {
    cancellable(cancel, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::Json;
    use axum::Router;
    use axum::extract::{Multipart, Path, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}/")
    }

    fn client(server_url: String, poll_interval: Option<Duration>) -> JobClient {
        JobClient::new(&RemoteConfig {
            server_url,
            poll_interval,
            poll_timeout: Duration::from_millis(300),
            no_proxy: true,
            ..Default::default()
        })
        .unwrap()
    }

    fn upload(name: &str, mime: &'static str) -> ImageUpload {
        ImageUpload {
            name: name.to_owned(),
            mime,
            bytes: vec![1, 2, 3],
        }
    }

    type Parts = Arc<Mutex<Vec<(String, String, String)>>>;

    async fn accept_images(
        State(parts): State<Parts>,
        mut multipart: Multipart,
    ) -> Json<serde_json::Value> {
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_owned();
            let file_name = field.file_name().unwrap_or_default().to_owned();
            let mime = field.content_type().unwrap_or_default().to_owned();
            let _ = field.bytes().await.unwrap();
            parts.lock().unwrap().push((name, file_name, mime));
        }
        Json(serde_json::json!({ "jobId": "job-42", "status": "queued" }))
    }

    #[tokio::test]
    async fn test_submit_sends_multipart() {
        let parts = Parts::default();
        let router = Router::new()
            .route("/process", post(accept_images))
            .with_state(parts.clone());
        let client = client(serve(router).await, None);

        let job = client
            .submit(
                vec![upload("a.jpg", "image/jpeg"), upload("b.png", "image/png")],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(job.id, JobId::new("job-42"));
        assert_eq!(job.status, JobStatus::Queued);

        let parts = parts.lock().unwrap().clone();
        assert_eq!(
            parts,
            vec![
                ("images".to_owned(), "a.jpg".to_owned(), "image/jpeg".to_owned()),
                ("images".to_owned(), "b.png".to_owned(), "image/png".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn test_submit_errors() {
        let router = Router::new()
            .route(
                "/process",
                post(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "reconstruction crashed") }),
            )
            .route(
                "/v2/process",
                post(|| async { Json(serde_json::json!({ "jobId": "7", "status": "failed" })) }),
            );
        let base = serve(router).await;
        let cancel = CancellationToken::new();

        let err = client(base.clone(), None)
            .submit(vec![upload("a.jpg", "image/jpeg")], &cancel)
            .await
            .unwrap_err();
        match err {
            RemoteError::Server { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "reconstruction crashed");
            }
            other => panic!("Unexpected error {other:?}"),
        }

        // A job the server marks as failed straight away is an error too.
        let err = client(format!("{base}v2/"), None)
            .submit(vec![upload("a.jpg", "image/jpeg")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Server { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_fetch_once_and_poll() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/result/:job_id",
                get(
                    |State(calls): State<Arc<AtomicUsize>>, Path(job_id): Path<String>| async move {
                        assert_eq!(job_id, "job-42");
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            (AxumStatus::ACCEPTED, Vec::new())
                        } else {
                            (AxumStatus::OK, b"ply\n".to_vec())
                        }
                    },
                ),
            )
            .with_state(calls.clone());
        let base = serve(router).await;
        let job = JobId::new("job-42");
        let cancel = CancellationToken::new();

        // Without polling a pending job is reported as is.
        let err = client(base.clone(), None)
            .fetch_result(&job, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotReady));

        let bytes = client(base, Some(Duration::from_millis(10)))
            .fetch_result(&job, &cancel)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"ply\n");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_timeout() {
        let router = Router::new().route(
            "/result/:job_id",
            get(|| async { (AxumStatus::from_u16(425).unwrap(), "") }),
        );
        let client = client(serve(router).await, Some(Duration::from_millis(50)));

        let err = client
            .fetch_result(&JobId::new("slow"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::PollTimeout(_)));
    }

    #[tokio::test]
    async fn test_cancel_aborts_request() {
        let router = Router::new().route(
            "/result/:job_id",
            get(|| async {
                std::future::pending::<()>().await;
                "never"
            }),
        );
        let client = client(serve(router).await, None);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = client
            .fetch(&JobId::new("stuck"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Cancelled));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(format!("http://{addr}/"), None)
            .fetch(&JobId::new("1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
    }

    #[tokio::test]
    async fn test_endpoints() {
        let nested = client("http://example.com/api".to_owned(), None);
        assert_eq!(
            nested.endpoint(["result", "a b"]).unwrap().as_str(),
            "http://example.com/api/result/a%20b"
        );

        let root = client("http://example.com/".to_owned(), None);
        assert_eq!(
            root.endpoint(["process"]).unwrap().as_str(),
            "http://example.com/process"
        );

        for url in ["not a url", "ftp://example.com/", "mailto:me@example.com"] {
            let result = JobClient::new(&RemoteConfig {
                server_url: url.to_owned(),
                ..Default::default()
            });
            assert!(matches!(result, Err(RemoteError::InvalidUrl(_))), "{url}");
        }
    }
}
