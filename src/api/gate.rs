//! Gated HTTP surface.
//!
//! Every request, whatever its path, goes through the admission gate first.

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use log::debug;

use crate::core::{Admission, AdmissionGate};

pub const FORWARDED_FOR: &str = "X-Forwarded-For";
pub const WELCOME_PAGE: &str = "<html><body><h1>Welcome to DoS Test Server</h1></body></html>";

/// Identity used when neither a forwarded-for header nor a peer address exists
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Source identity of a request: the forwarded-for header verbatim when
/// present and non-empty, else the peer IP address.
///
/// Header bytes outside visible ASCII are decoded lossily so such a header
/// still names the source instead of falling back to the peer.
pub fn source_identity(req: &HttpRequest) -> String {
    if let Some(forwarded) = req
        .headers()
        .get(FORWARDED_FOR)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .filter(|value| !value.is_empty())
    {
        return forwarded;
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}

/// Default service of the gated server
pub async fn admit(req: HttpRequest, gate: web::Data<AdmissionGate>) -> HttpResponse {
    let source = source_identity(&req);
    metrics::increment_counter!("flow_shield_requests_attempted_total");

    match gate.admit(&source) {
        Admission::Rejected => {
            debug!("Rejected request from blocked source {}", source);
            HttpResponse::Forbidden().force_close().finish()
        }
        Admission::Served if req.path() == "/" => HttpResponse::Found()
            .insert_header((header::LOCATION, "/index.html"))
            .finish(),
        Admission::Served => HttpResponse::Ok()
            .content_type("text/html; charset=UTF-8")
            .body(WELCOME_PAGE),
    }
}
