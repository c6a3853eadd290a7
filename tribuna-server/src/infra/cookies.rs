use axum::http::{HeaderMap, header};

/// Session and event cookies as set by the login flow.
pub const SESSION_COOKIE: &str = "session_id";
pub const EVENT_COOKIE: &str = "current_event_id";

/// Extract one cookie value from the request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn finds_cookie_among_several() {
        let headers = headers_with("theme=dark; session_id=abc-123; current_event_id=7");
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE).as_deref(),
            Some("abc-123")
        );
        assert_eq!(cookie_value(&headers, EVENT_COOKIE).as_deref(), Some("7"));
    }

    #[test]
    fn missing_cookie_is_none() {
        let headers = headers_with("theme=dark");
        assert_eq!(cookie_value(&headers, SESSION_COOKIE), None);
        assert_eq!(cookie_value(&HeaderMap::new(), SESSION_COOKIE), None);
    }
}
