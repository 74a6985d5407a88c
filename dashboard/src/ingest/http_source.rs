use super::PageSource;
use crate::model::{PageBody, Query};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use std::num::NonZeroU32;
use std::time::Duration;
use trends_core::config::ApiConfig;
use trends_core::{Error, Result};
use tracing::{debug, instrument};

pub struct HttpSource {
    client: reqwest::Client,
    endpoint: String,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl HttpSource {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let limiter = NonZeroU32::new(config.requests_per_second)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            limiter,
        })
    }
}

#[async_trait]
impl PageSource for HttpSource {
    #[instrument(skip(self, query), fields(endpoint = %self.endpoint))]
    async fn fetch_page(&self, query: &Query, page: u32) -> Result<PageBody> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let params = query.params(page)?;

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() >= 400 {
            let body = response.text().await?;
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        if status == StatusCode::NO_CONTENT {
            debug!(page, "Upstream reported no content");
            return Ok(PageBody::NoContent);
        }

        let bytes = response.bytes().await?;
        let body = String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Data(format!("page {} is not valid UTF-8: {}", page, e)))?;

        debug!(page, bytes = body.len(), status = status.as_u16(), "Fetched page");

        Ok(PageBody::Content(body))
    }

    fn source_id(&self) -> &str {
        "coronavirus-api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metric, OutputFormat, SchemaProfile};
    use trends_core::config::SchemaVersion;
    use trends_core::Config;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_for(server: &MockServer) -> HttpSource {
        let mut api = Config::default().api;
        api.endpoint = format!("{}/v1/data", server.uri());
        api.requests_per_second = 0;
        HttpSource::new(&api).expect("client builds")
    }

    fn csv_query() -> Query {
        SchemaProfile::new(SchemaVersion::V1)
            .query(Metric::Cases, "region", OutputFormat::Csv)
            .unwrap()
    }

    #[tokio::test]
    async fn sends_query_parameters_and_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("filters", "areaType=region"))
            .and(query_param("format", "csv"))
            .and(query_param("page", "2"))
            .and(query_param(
                "structure",
                r#"{"date":"date","name":"areaName","code":"areaCode","daily":"newCasesBySpecimenDate","cumulative":"cumCasesBySpecimenDate"}"#,
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string("date,name\n2020-03-01,London"))
            .expect(1)
            .mount(&server)
            .await;

        let body = source_for(&server).fetch_page(&csv_query(), 2).await.unwrap();

        assert_eq!(body, PageBody::Content("date,name\n2020-03-01,London".to_string()));
    }

    #[tokio::test]
    async fn no_content_status_ends_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let body = source_for(&server).fetch_page(&csv_query(), 1).await.unwrap();

        assert_eq!(body, PageBody::NoContent);
    }

    #[tokio::test]
    async fn client_error_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Invalid filter: areaType"))
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_page(&csv_query(), 1).await.unwrap_err();

        match err {
            Error::Upstream { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "Invalid filter: areaType");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_error_body_is_a_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Promises more body than it sends, then hangs up
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\npartial")
                .await;
        });

        let mut api = Config::default().api;
        api.endpoint = format!("http://{}/v1/data", addr);
        api.requests_per_second = 0;
        let source = HttpSource::new(&api).unwrap();

        let err = source.fetch_page(&csv_query(), 1).await.unwrap_err();

        assert!(matches!(err, Error::Transport(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn invalid_utf8_page_is_a_data_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0xfd]))
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_page(&csv_query(), 1).await.unwrap_err();

        assert!(matches!(err, Error::Data(_)), "got {err:?}");
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn slow_upstream_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let mut api = Config::default().api;
        api.endpoint = server.uri();
        api.request_timeout_secs = 1;
        api.requests_per_second = 0;
        let source = HttpSource::new(&api).unwrap();

        let err = source.fetch_page(&csv_query(), 1).await.unwrap_err();

        assert!(matches!(err, Error::Transport(ref e) if e.is_timeout()), "got {err:?}");
    }

    #[tokio::test]
    async fn paced_source_still_serves_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x"))
            .expect(2)
            .mount(&server)
            .await;

        let mut api = Config::default().api;
        api.endpoint = server.uri();
        api.requests_per_second = 10;
        let source = HttpSource::new(&api).unwrap();

        for page in 1..=2 {
            source.fetch_page(&csv_query(), page).await.unwrap();
        }
    }
}
