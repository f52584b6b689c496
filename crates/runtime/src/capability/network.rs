//! `network`: outbound HTTP for guests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use policy::{CapabilityRequest, Policy};
use reqwest::{Client, Method, Url};
use tokio::runtime::Handle;

use super::{Capability, CapabilityError, string_arg, string_map_arg};
use crate::Result;
use crate::sandbox::Sandbox;
use crate::value::ScriptValue;

/// Timeout applied to each request unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const PRELUDE: &str = r#"
local get, post = __network_get, __network_post
__network_get, __network_post = nil, nil
network = {
  get = function(url, headers) return get(url, headers) end,
  post = function(url, body, headers) return post(url, body, headers) end,
}
"#;

/// HTTP client shared by every sandbox it is installed into.
///
/// Guest code is synchronous, so each call blocks the guest thread on the
/// ambient tokio runtime until the response arrives or the timeout fires.
/// The sandbox must therefore run on a blocking thread of that runtime.
#[derive(Debug, Clone)]
pub struct NetworkModule {
    client: Client,
    timeout: Duration,
    policy: Arc<Policy>,
}

/// A request body as handed over by the guest.
enum Body {
    Empty,
    Text(String),
    Json(serde_json::Value),
}

impl NetworkModule {
    pub fn new(policy: Arc<Policy>) -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            policy,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `GET url`, returning `{status, headers, body}`.
    pub fn get(
        &self,
        url: &str,
        headers: BTreeMap<String, String>,
    ) -> std::result::Result<ScriptValue, CapabilityError> {
        self.request(Method::GET, url, Body::Empty, headers)
    }

    /// `POST url`. A table body is sent as JSON; anything else as text.
    pub fn post(
        &self,
        url: &str,
        body: &ScriptValue,
        headers: BTreeMap<String, String>,
    ) -> std::result::Result<ScriptValue, CapabilityError> {
        let body = match body {
            ScriptValue::Nil => Body::Empty,
            ScriptValue::List(_) | ScriptValue::Map(_) => Body::Json(body.to_json()),
            scalar => Body::Text(scalar.to_string()),
        };
        self.request(Method::POST, url, body, headers)
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        body: Body,
        headers: BTreeMap<String, String>,
    ) -> std::result::Result<ScriptValue, CapabilityError> {
        let parsed = Url::parse(url)
            .map_err(|e| CapabilityError::InvalidArgument(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CapabilityError::InvalidArgument(format!(
                "unsupported url scheme '{}'",
                parsed.scheme()
            )));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| CapabilityError::InvalidArgument(format!("url '{url}' has no host")))?;
        self.policy.require(&CapabilityRequest::net_http(host))?;

        let handle = Handle::try_current().map_err(|_| {
            CapabilityError::Unavailable("network calls need a tokio runtime".to_string())
        })?;

        let mut builder = self.client.request(method.clone(), parsed);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        builder = match body {
            Body::Empty => builder,
            Body::Text(text) => builder.body(text),
            Body::Json(value) => builder.json(&value),
        };

        tracing::debug!(%method, url, "guest http request");
        let timeout = self.timeout;
        let outcome = handle.block_on(async move {
            tokio::time::timeout(timeout, async move {
                let response = builder.send().await?;
                let status = response.status().as_u16();
                let mut headers: BTreeMap<String, ScriptValue> = BTreeMap::new();
                for (name, value) in response.headers() {
                    let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                    match headers.get_mut(name.as_str()) {
                        Some(ScriptValue::Str(existing)) => {
                            existing.push_str(", ");
                            existing.push_str(&value);
                        }
                        _ => {
                            headers.insert(name.as_str().to_string(), ScriptValue::Str(value));
                        }
                    }
                }
                let body = response.text().await?;
                Ok::<_, reqwest::Error>((status, headers, body))
            })
            .await
        });

        let (status, headers, body) = outcome
            .map_err(|_| CapabilityError::Timeout(timeout))?
            .map_err(|e| CapabilityError::Network(e.to_string()))?;

        let mut response = BTreeMap::new();
        response.insert("status".to_string(), ScriptValue::from(status));
        response.insert("headers".to_string(), ScriptValue::Map(headers));
        response.insert("body".to_string(), ScriptValue::Str(body));
        Ok(ScriptValue::Map(response))
    }
}

impl Capability for NetworkModule {
    fn name(&self) -> &'static str {
        "network"
    }

    fn install(self: Arc<Self>, sandbox: &Sandbox) -> Result<()> {
        let this = Arc::clone(&self);
        sandbox.bind_function("__network_get", move |args| {
            let url = string_arg(&args, 0, "network.get")?;
            let headers = string_map_arg(&args, 1, "network.get")?;
            this.get(&url, headers)
        })?;

        let this = self;
        sandbox.bind_function("__network_post", move |args| {
            let url = string_arg(&args, 0, "network.post")?;
            let body = args.get(1).cloned().unwrap_or_default();
            let headers = string_map_arg(&args, 2, "network.post")?;
            this.post(&url, &body, headers)
        })?;

        sandbox.exec("network", PRELUDE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn open_policy() -> Arc<Policy> {
        Arc::new(
            Policy::parse(
                r#"
                [allow]
                net_http = ["127.0.0.1"]
                "#,
            )
            .unwrap(),
        )
    }

    /// Answer every connection with `200 OK`, echoing the request line
    /// and body back in the response body.
    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut len = 0;
                    // Read until the headers and any declared body are in.
                    loop {
                        let n = socket.read(&mut buf[len..]).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        len += n;
                        let text = String::from_utf8_lossy(&buf[..len]).into_owned();
                        if let Some(end) = text.find("\r\n\r\n") {
                            let declared = text
                                .lines()
                                .find_map(|l| {
                                    l.to_ascii_lowercase()
                                        .strip_prefix("content-length:")
                                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                                })
                                .unwrap_or(0);
                            if len >= end + 4 + declared {
                                break;
                            }
                        }
                    }
                    let text = String::from_utf8_lossy(&buf[..len]).into_owned();
                    let request_line = text.lines().next().unwrap_or_default().to_string();
                    let body = text.split("\r\n\r\n").nth(1).unwrap_or_default();
                    let payload = format!("{request_line}|{body}");
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Echo: yes\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                        payload.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_returns_status_headers_and_body() {
        let base = echo_server().await;
        let module = NetworkModule::new(open_policy());

        let response = tokio::task::spawn_blocking(move || {
            module.get(&format!("{base}/hello"), BTreeMap::new())
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(response.get("status"), Some(&ScriptValue::Number(200.0)));
        let headers = response.get("headers").unwrap();
        assert_eq!(headers.get("x-echo").and_then(ScriptValue::as_str), Some("yes"));
        let body = response.get("body").and_then(ScriptValue::as_str).unwrap();
        assert!(body.starts_with("GET /hello HTTP/1.1|"), "{body}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn post_sends_tables_as_json() {
        let base = echo_server().await;
        let module = NetworkModule::new(open_policy());

        let mut payload = BTreeMap::new();
        payload.insert("n".to_string(), ScriptValue::Number(1.0));
        let body = ScriptValue::Map(payload);

        let response = tokio::task::spawn_blocking(move || module.post(&base, &body, BTreeMap::new()))
            .await
            .unwrap()
            .unwrap();
        let echoed = response.get("body").and_then(ScriptValue::as_str).unwrap();
        assert!(echoed.ends_with(r#"|{"n":1}"#), "{echoed}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_servers_time_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let module = NetworkModule::new(open_policy()).with_timeout(Duration::from_millis(200));
        let err = tokio::task::spawn_blocking(move || {
            module.get(&format!("http://{addr}/"), BTreeMap::new())
        })
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, CapabilityError::Timeout(d) if d == Duration::from_millis(200)));
    }

    #[test]
    fn policy_and_url_checks_come_first() {
        let denied = NetworkModule::new(Arc::new(Policy::restrictive()));
        assert!(matches!(
            denied.get("http://example.com/", BTreeMap::new()),
            Err(CapabilityError::Denied(_))
        ));

        let module = NetworkModule::new(open_policy());
        assert!(matches!(
            module.get("file:///etc/passwd", BTreeMap::new()),
            Err(CapabilityError::InvalidArgument(_))
        ));
        assert!(matches!(
            module.get("not a url", BTreeMap::new()),
            Err(CapabilityError::InvalidArgument(_))
        ));
    }

    #[test]
    fn requires_a_runtime() {
        let module = NetworkModule::new(open_policy());
        assert!(matches!(
            module.get("http://127.0.0.1:9/", BTreeMap::new()),
            Err(CapabilityError::Unavailable(_))
        ));
    }
}
