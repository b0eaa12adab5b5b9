use axum::http::HeaderMap;

use crate::models::RequestMeta;

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (first hop only), then `x-real-ip`.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

pub fn request_meta(headers: &HeaderMap) -> RequestMeta {
    let (ip_address, user_agent) = extract_request_info(headers);
    RequestMeta {
        ip_address,
        user_agent,
    }
}
