use std::time::{Duration, Instant};

use async_trait::async_trait;
use scraper::{Html, Node};
use serde_json::Value;
use tracing::debug;

use crate::error::TransportError;

/// What representation the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Html,
    Lines,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    Get,
    PostJson(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub url: String,
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(&'static str, &'static str)>,
    pub expect: Expect,
}

impl PageRequest {
    pub fn get(url: impl Into<String>, expect: Expect) -> Self {
        PageRequest {
            url: url.into(),
            method: Method::Get,
            query: Vec::new(),
            headers: Vec::new(),
            expect,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        PageRequest {
            url: url.into(),
            method: Method::PostJson(body),
            query: Vec::new(),
            headers: Vec::new(),
            expect: Expect::Json,
        }
    }

    pub fn with_query(mut self, query: &[(&str, &str)]) -> Self {
        self.query = query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self
    }

    pub fn with_headers(mut self, headers: &[(&'static str, &'static str)]) -> Self {
        self.headers = headers.to_vec();
        self
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Html(String),
    Lines(Vec<String>),
    Json(Value),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Html(_) => "html",
            Payload::Lines(_) => "lines",
            Payload::Json(_) => "json",
        }
    }
}

/// Transport capability. The pipeline never talks to the network directly.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> Result<Payload, TransportError>;
}

/// Plain HTTP transport. Pages that need a browser to render will come back
/// thin; pointing the scraper at a rendering proxy is the caller's business.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::from_reqwest("<client>", e))?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<Payload, TransportError> {
        let url = request.url.as_str();
        let mut builder = match &request.method {
            Method::Get => self.client.get(url),
            Method::PostJson(body) => self.client.post(url).json(body),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (k, v) in &request.headers {
            builder = builder.header(*k, *v);
        }

        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        debug!(url, bytes = body.len(), ms = start.elapsed().as_millis() as u64, "fetched");

        match request.expect {
            Expect::Html => Ok(Payload::Html(body)),
            Expect::Lines => Ok(Payload::Lines(rendered_lines(&body))),
            Expect::Json => serde_json::from_str(&body)
                .map(Payload::Json)
                .map_err(|e| TransportError::Decode {
                    url: url.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Approximate a page's rendered body text as one entry per text node,
/// trimmed, in document order. Blank nodes are dropped.
pub fn rendered_lines(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut lines = Vec::new();
    for node in doc.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| match a.value() {
            Node::Element(el) => SKIPPED_TAGS.contains(&el.name()),
            _ => false,
        });
        if hidden {
            continue;
        }
        for part in text.lines() {
            let part = part.trim();
            if !part.is_empty() {
                lines.push(part.to_string());
            }
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_lines_skip_scripts_and_blanks() {
        let html = r#"<html><head><title>t</title></head><body>
            <div>Showing all results for telma</div>
            <script>var x = 1;</script>
            <p>Telma 40 Tablet</p>
            <p>  </p>
            <span>₹ 213.5</span>
        </body></html>"#;
        assert_eq!(
            rendered_lines(html),
            vec!["Showing all results for telma", "Telma 40 Tablet", "₹ 213.5"]
        );
    }

    #[test]
    fn request_builders() {
        let r = PageRequest::get("https://x.in/s", Expect::Lines).with_query(&[("q", "telma")]);
        assert_eq!(r.query, vec![("q".to_string(), "telma".to_string())]);
        assert_eq!(r.method, Method::Get);

        let p = PageRequest::post_json("https://x.in/api", serde_json::json!({"drugName": "telma"}));
        assert_eq!(p.expect, Expect::Json);
    }
}
