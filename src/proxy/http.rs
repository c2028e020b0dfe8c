//! Plain HTTP forwarding and forwarding of intercepted HTTPS requests.
//!
//! Every request passes through the [`RequestFilter`](super::filter::RequestFilter)
//! before it is sent anywhere. Upstream failures become `502` responses so a
//! keep-alive client connection survives them.

use std::net::SocketAddr;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HOST, HeaderValue};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::body::{ProxyBody, text_response};
use super::decision::{TLS_PORT, split_host_port};
use super::error::{ProxyError, ProxyResult};
use super::filter::{FilterOutcome, RequestContext, denial_response};
use super::server::ProxyState;
use super::tls::server_name;
use crate::telemetry::{self, Event, ServeTimer};

/// Body of the `400` for origin-form requests without a `Host` header.
pub const NO_HOST_BODY: &str = "Cannot handle requests without Host header, e.g., HTTP 1.0";

/// Protocol label for a destination port.
pub fn protocol_for_port(port: Option<u16>) -> &'static str {
    match port {
        Some(TLS_PORT) => "https",
        None | Some(80) => "http",
        Some(_) => "tcp",
    }
}

/// Template for the `serve.<protocol>.<host>` timer.
pub fn serve_event(protocol: &str, host: &str, url: Option<&str>) -> Event {
    let host = if host.is_empty() { "*" } else { host };
    let event = Event::new(format!("serve.{}.{}", protocol, host))
        .with(telemetry::HOST, host)
        .with(telemetry::PROTOCOL, protocol);
    match url {
        Some(url) => event.with(telemetry::URL, url),
        None => event,
    }
}

/// Give an origin-form request an absolute URI built from its `Host` header.
///
/// Requests that already carry an authority are returned unchanged.
pub fn to_absolute<B>(mut req: Request<B>) -> Result<Request<B>, Response<ProxyBody>> {
    if req.uri().authority().is_some() {
        return Ok(req);
    }
    let Some(host) = req.headers().get(HOST).and_then(|h| h.to_str().ok()) else {
        return Err(text_response(StatusCode::BAD_REQUEST, NO_HOST_BODY));
    };
    let path = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let uri = match format!("http://{}{}", host, path).parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            debug!("Unusable Host header {:?}: {}", host, e);
            return Err(text_response(StatusCode::BAD_REQUEST, "Malformed Host header"));
        }
    };
    *req.uri_mut() = uri;
    Ok(req)
}

/// Handle a non-CONNECT request on the HTTP listener.
pub async fn handle_http(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    state: &ProxyState,
) -> ProxyResult<Response<ProxyBody>> {
    let mut req = match to_absolute(req) {
        Ok(req) => req,
        Err(response) => return Ok(response),
    };

    let host = req.uri().host().unwrap_or_default().to_string();
    let url = req.uri().to_string();
    let _timer = ServeTimer::start(
        state.tracker.clone(),
        serve_event(protocol_for_port(req.uri().port_u16()), &host, Some(&url)),
    );

    if let FilterOutcome::Deny(response) =
        state.filter.filter(&req, &RequestContext::plain(remote_addr))
    {
        return Ok(response);
    }

    req.headers_mut().remove("proxy-connection");
    debug!("Forwarding {} {}", req.method(), url);

    match state.http_client.request(req).await {
        Ok(response) => Ok(response.map(|body| body.boxed())),
        Err(e) => {
            warn!("Upstream request to {} failed: {}", host, e);
            Ok(text_response(StatusCode::BAD_GATEWAY, "Bad gateway"))
        }
    }
}

/// Pin an intercepted request to the one host it will be sent to.
///
/// The destination is the URI authority if the request has one, else the
/// `Host` header, else `default_host`. An authority that names a different
/// host or port than `Host` is denied. On success the request is in origin
/// form with `Host` set to the destination, which is what the filter checks
/// and the forwarder dials.
pub fn pin_destination<B>(
    mut req: Request<B>,
    default_host: Option<&str>,
) -> Result<(Request<B>, String), Response<ProxyBody>> {
    let host_header = match req.headers().get(HOST).map(|h| h.to_str()) {
        None => None,
        Some(Ok(host)) if host.is_empty() => None,
        Some(Ok(host)) => Some(host.to_string()),
        Some(Err(_)) => {
            return Err(text_response(StatusCode::BAD_REQUEST, "Malformed Host header"));
        }
    };
    let target = req
        .uri()
        .authority()
        .map(|a| strip_userinfo(a.as_str()).to_string());

    let destination = match (target, host_header) {
        (Some(target), Some(host)) if !same_authority(&target, &host) => {
            warn!(
                target: "sni_warden::audit",
                host = host.as_str(),
                request_target = target.as_str(),
                decision = "deny",
                "request target does not match Host"
            );
            return Err(denial_response());
        }
        (Some(target), _) => target,
        (None, Some(host)) => host,
        (None, None) => match default_host {
            Some(host) => host.to_string(),
            None => return Err(text_response(StatusCode::BAD_REQUEST, NO_HOST_BODY)),
        },
    };

    let Ok(value) = HeaderValue::from_str(&destination) else {
        return Err(text_response(StatusCode::BAD_REQUEST, "Malformed Host header"));
    };
    req.headers_mut().insert(HOST, value);

    if req.uri().authority().is_some() {
        let path = req
            .uri()
            .path_and_query()
            .map_or_else(|| "/".to_string(), |p| p.as_str().to_string());
        match path.parse::<Uri>() {
            Ok(uri) => *req.uri_mut() = uri,
            Err(e) => {
                debug!("Unusable request path {:?}: {}", path, e);
                return Err(text_response(StatusCode::BAD_REQUEST, "Malformed request target"));
            }
        }
    }
    Ok((req, destination))
}

fn strip_userinfo(authority: &str) -> &str {
    authority.rsplit('@').next().unwrap_or(authority)
}

/// Same host and port, with a missing port meaning 443.
fn same_authority(a: &str, b: &str) -> bool {
    let (a_host, a_port) = split_host_port(a);
    let (b_host, b_port) = split_host_port(b);
    a_host.eq_ignore_ascii_case(b_host) && a_port.unwrap_or(TLS_PORT) == b_port.unwrap_or(TLS_PORT)
}

/// Handle one request decrypted from an intercepted TLS session.
///
/// `default_host` names the intercepted target and stands in for a missing
/// `Host` header; it is `None` for wildcard sessions.
pub async fn handle_intercepted(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    default_host: Option<&str>,
    state: &ProxyState,
) -> Response<ProxyBody> {
    let (req, destination) = match pin_destination(req, default_host) {
        Ok(pinned) => pinned,
        Err(response) => return response,
    };
    let (host, port) = split_host_port(&destination);
    let _timer = ServeTimer::start(
        state.tracker.clone(),
        serve_event("https", host, Some(req.uri().path())),
    );

    if let FilterOutcome::Deny(response) =
        state.filter.filter(&req, &RequestContext::tunneled(remote_addr))
    {
        return response;
    }

    match forward_tls(req, host, port.unwrap_or(TLS_PORT), state).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Intercepted request to {} failed: {}", host, e);
            text_response(StatusCode::BAD_GATEWAY, "Bad gateway")
        }
    }
}

/// Send `req` to `host:port` over a fresh, verified TLS connection.
async fn forward_tls(
    req: Request<Incoming>,
    host: &str,
    port: u16,
    state: &ProxyState,
) -> ProxyResult<Response<ProxyBody>> {
    let connector = state
        .tls_connector
        .as_ref()
        .ok_or_else(|| ProxyError::Tls("no upstream trust roots available".into()))?;

    let addr = format!("{}:{}", host, port);
    let upstream = TcpStream::connect(&addr)
        .await
        .map_err(|e| ProxyError::UpstreamConnect {
            addr: addr.clone(),
            message: e.to_string(),
        })?;

    let upstream_tls = connector
        .connect(server_name(host)?, upstream)
        .await
        .map_err(|e| ProxyError::Tls(format!("Upstream TLS handshake failed: {}", e)))?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(upstream_tls)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Upstream connection closed: {}", e);
        }
    });

    let response = sender.send_request(req).await?;
    Ok(response.map(|body| body.boxed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_protocol_for_port() {
        assert_eq!(protocol_for_port(Some(443)), "https");
        assert_eq!(protocol_for_port(Some(80)), "http");
        assert_eq!(protocol_for_port(None), "http");
        assert_eq!(protocol_for_port(Some(8080)), "tcp");
    }

    #[test]
    fn test_serve_event_shape() {
        let event = serve_event("http", "example.com", Some("http://example.com/a"));
        assert_eq!(event.name(), "serve.http.example.com");
        assert_eq!(event.text(telemetry::HOST), Some("example.com"));
        assert_eq!(event.text(telemetry::PROTOCOL), Some("http"));
        assert_eq!(event.text(telemetry::URL), Some("http://example.com/a"));

        let anonymous = serve_event("https", "", None);
        assert_eq!(anonymous.name(), "serve.https.*");
        assert!(anonymous.property(telemetry::URL).is_none());
    }

    #[test]
    fn test_absolute_uri_untouched() {
        let req = Request::get("http://example.com/x").body(()).unwrap();
        let req = to_absolute(req).unwrap();
        assert_eq!(req.uri(), "http://example.com/x");
    }

    #[test]
    fn test_origin_form_rewritten_from_host() {
        let req = Request::get("/path?q=1")
            .header(HOST, "example.com:8080")
            .body(())
            .unwrap();
        let req = to_absolute(req).unwrap();
        assert_eq!(req.uri(), "http://example.com:8080/path?q=1");
    }

    #[tokio::test]
    async fn test_origin_form_without_host_rejected() {
        let req = Request::get("/").body(()).unwrap();
        let response = to_absolute(req).unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], NO_HOST_BODY.as_bytes());
    }

    #[test]
    fn test_intercepted_origin_form_keeps_host() {
        let req = Request::get("/a?b=1")
            .header(HOST, "good.example")
            .body(())
            .unwrap();
        let (req, destination) = pin_destination(req, Some("ignored.example")).unwrap();
        assert_eq!(destination, "good.example");
        assert_eq!(req.uri(), "/a?b=1");
        assert_eq!(req.headers()[HOST], "good.example");
    }

    #[test]
    fn test_intercepted_default_host_fills_missing_host() {
        let req = Request::get("/").body(()).unwrap();
        let (req, destination) = pin_destination(req, Some("target.example")).unwrap();
        assert_eq!(destination, "target.example");
        assert_eq!(req.headers()[HOST], "target.example");

        let req = Request::get("/").body(()).unwrap();
        let response = pin_destination(req, None).unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_intercepted_absolute_uri_becomes_origin_form() {
        let req = Request::get("https://user@good.example/x")
            .header(HOST, "GOOD.example:443")
            .body(())
            .unwrap();
        let (req, destination) = pin_destination(req, None).unwrap();
        assert_eq!(destination, "good.example");
        assert_eq!(req.uri(), "/x");
        assert_eq!(req.headers()[HOST], "good.example");

        // Without a Host header the URI authority is the destination.
        let req = Request::get("https://good.example:8443/").body(()).unwrap();
        let (_, destination) = pin_destination(req, Some("other.example")).unwrap();
        assert_eq!(destination, "good.example:8443");
    }

    #[test]
    fn test_intercepted_target_differing_from_host_denied() {
        let req = Request::get("https://good.example/")
            .header(HOST, "evil.example")
            .body(())
            .unwrap();
        let response = pin_destination(req, None).unwrap_err();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let req = Request::get("https://good.example/")
            .header(HOST, "good.example:8443")
            .body(())
            .unwrap();
        assert_eq!(
            pin_destination(req, None).unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_garbage_host_rejected() {
        let req = Request::get("/").header(HOST, "bad host").body(()).unwrap();
        assert_eq!(
            to_absolute(req).unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
