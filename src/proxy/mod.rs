pub mod context;

use crate::error::Rejection;
use crate::pipeline::SecurityPipeline;
use async_trait::async_trait;
use bytes::Bytes;
use context::ProxyContext;
use log::{error, warn};
use pingora::http::ResponseHeader;
use pingora::prelude::*;
use pingora::upstreams::peer::HttpPeer;
use pingora_proxy::{ProxyHttp, Session};
use std::net::IpAddr;
use std::sync::Arc;

/// Reverse proxy that runs the security pipeline in front of one upstream.
pub struct SecurityProxy {
    pub pipeline: Arc<SecurityPipeline>,
    pub upstream_addr: (String, u16),
}

impl SecurityProxy {
    pub fn new(upstream_addr: (String, u16), pipeline: Arc<SecurityPipeline>) -> Self {
        Self {
            pipeline,
            upstream_addr,
        }
    }

    fn get_client_ip(&self, session: &Session) -> String {
        let peer = session
            .client_addr()
            .and_then(|addr| addr.as_inet())
            .map(|addr| addr.ip());
        let forwarded_for = session
            .req_header()
            .headers
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok());
        resolve_client_ip(peer, forwarded_for, self.pipeline.trust_forwarded_for())
    }
}

/// Client address for filtering: the first `X-Forwarded-For` entry when
/// trusted, otherwise the peer IP without its port.
pub fn resolve_client_ip(peer: Option<IpAddr>, forwarded_for: Option<&str>, trust: bool) -> String {
    if trust {
        let first = forwarded_for
            .and_then(|xff| xff.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = first {
            return ip.to_string();
        }
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn write_rejection(session: &mut Session, rejection: &Rejection) -> Result<()> {
    let body = Bytes::from(rejection.to_json());
    let mut header = ResponseHeader::build(rejection.status_code(), Some(3))?;
    header.insert_header(http::header::CONTENT_TYPE, "application/json")?;
    header.insert_header(http::header::CONTENT_LENGTH, body.len().to_string())?;
    session.write_response_header(Box::new(header), false).await?;
    session.write_response_body(Some(body), true).await?;
    Ok(())
}

#[async_trait]
impl ProxyHttp for SecurityProxy {
    type CTX = ProxyContext;

    fn new_ctx(&self) -> Self::CTX {
        ProxyContext::new()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool>
    where
        Self::CTX: Send + Sync,
    {
        ctx.client_ip = self.get_client_ip(session);

        match self.pipeline.inspect(&ctx.client_ip, session.req_header()) {
            Ok(admission) => {
                ctx.fingerprint = admission.fingerprint;
                ctx.admitted = true;
                Ok(false)
            }
            Err(rejection) => {
                if let Err(e) = write_rejection(session, &rejection).await {
                    error!("Failed to send rejection to {}: {}", ctx.client_ip, e);
                }
                Ok(true)
            }
        }
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        if !ctx.admitted {
            return Err(pingora::Error::new_str(
                "Request blocked by security policy",
            ));
        }

        let peer = Box::new(HttpPeer::new(
            (self.upstream_addr.0.as_str(), self.upstream_addr.1),
            false,
            "".to_string(),
        ));
        Ok(peer)
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()>
    where
        Self::CTX: Send + Sync,
    {
        if ctx.admitted {
            for (name, value) in self.pipeline.security_headers() {
                upstream_response.insert_header(name, value)?;
            }
        }
        Ok(())
    }

    async fn logging(
        &self,
        session: &mut Session,
        e: Option<&pingora::Error>,
        ctx: &mut Self::CTX,
    ) {
        if let Some(error) = e {
            warn!(
                "Request failed - IP: {}, Method: {}, URI: {}, Error: {}",
                ctx.client_ip,
                session.req_header().method,
                session.req_header().uri,
                error
            );
        }

        if !ctx.admitted {
            return;
        }

        let status = session
            .response_written()
            .map_or(0, |resp| resp.status.as_u16());
        self.pipeline.log_request_processed(
            &ctx.client_ip,
            session.req_header(),
            ctx.fingerprint.as_deref(),
            status,
            ctx.elapsed_ms(),
        );
    }
}
