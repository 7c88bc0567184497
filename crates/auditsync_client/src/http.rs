//! Shared HTTP response helpers.

use crate::error::ApiError;
use reqwest::blocking::Response;

/// Check a response for common error conditions.
///
/// Returns the response unchanged on success. A 429 becomes
/// [`ApiError::RateLimited`] with the `Retry-After` delay; any other
/// non-success status becomes [`ApiError::Api`] carrying the body.
pub fn check_response(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status().as_u16();
    if resp.status().is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = if status == 429 {
        String::new()
    } else {
        resp.text().unwrap_or_default()
    };
    Err(status_error(status, retry_after.as_deref(), body))
}

fn status_error(status: u16, retry_after: Option<&str>, body: String) -> ApiError {
    if status == 429 {
        return ApiError::RateLimited {
            retry_after_secs: parse_retry_after(retry_after),
        };
    }
    ApiError::Api {
        status,
        message: body,
    }
}

/// Parse a `Retry-After` value as seconds, falling back to 60 s.
fn parse_retry_after(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_retry_after_from_header() {
        assert_eq!(parse_retry_after(Some("120")), 120);
    }

    #[test]
    fn parse_retry_after_falls_back() {
        assert_eq!(parse_retry_after(None), 60);
        assert_eq!(parse_retry_after(Some("soon")), 60);
    }

    #[test]
    fn rate_limit_is_mapped() {
        let err = status_error(429, Some("5"), String::new());
        assert!(matches!(err, ApiError::RateLimited { retry_after_secs: 5 }));
    }

    #[test]
    fn error_status_keeps_body() {
        let err = status_error(404, None, "no such audit".to_string());
        assert!(err.is_not_found());
        assert!(err.to_string().contains("no such audit"));
    }
}
