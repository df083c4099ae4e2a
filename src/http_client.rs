use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub type HttpError = Box<dyn std::error::Error + Send + Sync>;

/// Outbound HTTP used for processor submissions and health probes. Every call
/// carries its own timeout.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, HttpError>;

    async fn post_json(
        &self,
        url: &str,
        body: String,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError>;
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: String,
    pub is_success: bool,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }
}

pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(64)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self { client })
    }

    async fn into_response(response: reqwest::Response) -> Result<HttpResponse, HttpError> {
        let status_code = response.status().as_u16();
        let is_success = response.status().is_success();
        let body = response.text().await?;

        Ok(HttpResponse {
            status_code,
            body,
            is_success,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, HttpError> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        Self::into_response(response).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: String,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(timeout)
            .send()
            .await?;
        Self::into_response(response).await
    }
}

#[derive(Clone, Debug)]
pub enum MockReply {
    Response { status_code: u16, body: String },
    Error(String),
}

impl MockReply {
    fn into_result(self) -> Result<HttpResponse, HttpError> {
        match self {
            MockReply::Response { status_code, body } => Ok(HttpResponse {
                status_code,
                body,
                is_success: (200..300).contains(&status_code),
            }),
            MockReply::Error(message) => Err(message.into()),
        }
    }
}

#[derive(Default)]
struct MockState {
    // The last reply of a script repeats once the earlier ones are used up.
    scripts: HashMap<String, VecDeque<MockReply>>,
    delays: HashMap<String, Duration>,
    calls: HashMap<String, Vec<Option<String>>>,
}

/// Scriptable stand-in for the upstream processors, keyed by URL.
pub struct MockHttpClient {
    state: Mutex<MockState>,
    default_reply: MockReply,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            default_reply: MockReply::Response {
                status_code: 404,
                body: "Not Found".to_string(),
            },
        }
    }

    pub fn with_response(self, url: &str, status_code: u16, body: &str) -> Self {
        self.set_response(url, status_code, body);
        self
    }

    pub fn with_responses(self, url: &str, replies: &[(u16, &str)]) -> Self {
        let script = replies
            .iter()
            .map(|(status_code, body)| MockReply::Response {
                status_code: *status_code,
                body: body.to_string(),
            })
            .collect();
        self.lock().scripts.insert(url.to_string(), script);
        self
    }

    pub fn with_error(self, url: &str, message: &str) -> Self {
        self.set_error(url, message);
        self
    }

    /// Holds every reply for `url` back by `delay`.
    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        self.lock().delays.insert(url.to_string(), delay);
        self
    }

    pub fn with_default_response(mut self, status_code: u16, body: &str) -> Self {
        self.default_reply = MockReply::Response {
            status_code,
            body: body.to_string(),
        };
        self
    }

    /// Replaces whatever is scripted for `url`.
    pub fn set_response(&self, url: &str, status_code: u16, body: &str) {
        let reply = MockReply::Response {
            status_code,
            body: body.to_string(),
        };
        self.lock()
            .scripts
            .insert(url.to_string(), VecDeque::from([reply]));
    }

    pub fn set_error(&self, url: &str, message: &str) {
        self.lock().scripts.insert(
            url.to_string(),
            VecDeque::from([MockReply::Error(message.to_string())]),
        );
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.lock().calls.get(url).map_or(0, Vec::len)
    }

    /// Bodies sent to `url` with `post_json`, in call order.
    pub fn posted_bodies(&self, url: &str) -> Vec<String> {
        self.lock()
            .calls
            .get(url)
            .map(|calls| calls.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reply(&self, url: &str, body: Option<String>) -> (MockReply, Option<Duration>) {
        let mut state = self.lock();
        state.calls.entry(url.to_string()).or_default().push(body);
        let delay = state.delays.get(url).copied();
        let reply = match state.scripts.get_mut(url) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };
        (reply.unwrap_or_else(|| self.default_reply.clone()), delay)
    }

    async fn reply(&self, url: &str, body: Option<String>) -> Result<HttpResponse, HttpError> {
        let (reply, delay) = self.next_reply(url, body);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        reply.into_result()
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, HttpError> {
        self.reply(url, None).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: String,
        _timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        self.reply(url, Some(body)).await
    }
}
