//! 上游转发
//!
//! 网关自身不处理的请求转发给站点应用。

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use civic_config::UpstreamConfig;
use civic_errors::{AppError, AppResult};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::problem::problem_response;
use crate::state::AppState;

/// 逐跳头，不跨代理转发
const HOP_BY_HOP: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// 上游站点
pub struct Upstream {
    client: reqwest::Client,
    base_url: String,
    body_limit: usize,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig, body_limit: usize) -> AppResult<Self> {
        // 只限制建连和单次读取，流式响应（如聊天）可以持续更久
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::config(format!("Failed to build upstream client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            body_limit,
        })
    }

    /// 转发请求并返回上游响应
    pub async fn forward(&self, req: Request) -> AppResult<Response> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path_and_query);

        let body = self.read_body(body).await?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            append_forwarded_for(&mut headers, &peer.ip().to_string());
        }

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::timeout(format!("Upstream request timed out: {}", e))
                } else {
                    AppError::external_service(format!("Upstream request failed: {}", e))
                }
            })?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    /// 读取请求体，超过上限时返回 413
    async fn read_body(&self, body: Body) -> AppResult<Vec<u8>> {
        let mut stream = body.into_data_stream();
        let mut buf = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| AppError::validation(format!("Request body unreadable: {}", e)))?;
            if buf.len() + chunk.len() > self.body_limit {
                return Err(AppError::payload_too_large(format!(
                    "Request body exceeds {} bytes",
                    self.body_limit
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// 在已有的 `X-Forwarded-For` 链末尾追加对端地址
fn append_forwarded_for(headers: &mut HeaderMap, peer: &str) {
    let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, peer),
        _ => peer.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// 兜底处理器：转发给上游，未配置上游时返回 404
pub async fn forward(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();

    let Some(upstream) = &state.upstream else {
        return problem_response(AppError::not_found("No upstream configured"), &path);
    };

    match upstream.forward(req).await {
        Ok(response) => response,
        Err(e) => {
            if e.is_infrastructure() {
                warn!(error = %e, path = %path, "Upstream forwarding failed");
            } else {
                debug!(error = %e, path = %path, "Request rejected before forwarding");
            }
            problem_response(e, &path)
        }
    }
}
