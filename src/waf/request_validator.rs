use pingora::http::RequestHeader;
use std::borrow::Cow;
use std::collections::HashSet;

use super::patterns::{
    PatternSet, COMMAND_INJECTION_PATTERNS, SQL_INJECTION_PATTERNS, XSS_PATTERNS,
};
use crate::config::SecurityConfig;
use crate::error::{MatchLocation, PatternFamily, ValidationError};

/// Decode percent-escapes (and `+` as space) for pattern scanning.
///
/// Escapes that don't form valid UTF-8 become U+FFFD, so one bad escape
/// never hides the rest of the input.
pub fn decode_for_scan(input: &str) -> Cow<'_, str> {
    if !input.contains('%') && !input.contains('+') {
        return Cow::Borrowed(input);
    }
    let spaced = input.replace('+', " ");
    let decoded = urlencoding::decode_binary(spaced.as_bytes());
    Cow::Owned(String::from_utf8_lossy(&decoded).into_owned())
}

/// Header value as text; non-ASCII (obs-text) bytes become U+FFFD.
pub fn header_text(value: &http::HeaderValue) -> Cow<'_, str> {
    String::from_utf8_lossy(value.as_bytes())
}

/// Declared body size from `Content-Length`; absent or unparsable counts as zero.
pub fn declared_content_length(request: &RequestHeader) -> u64 {
    request
        .headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

/// Combined byte length of every header name and value.
pub fn header_bytes(request: &RequestHeader) -> usize {
    request
        .headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len())
        .sum()
}

/// Number of distinct query parameter keys.
pub fn query_param_count(request: &RequestHeader) -> usize {
    let Some(query) = request.uri.query() else {
        return 0;
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            decode_for_scan(key).into_owned()
        })
        .collect::<HashSet<_>>()
        .len()
}

/// Structural limits plus SQL-injection, XSS and command-injection scans.
///
/// Checks run cheapest first: declared size, header bytes and query
/// parameter count are all bounded before any regex sees the input.
/// Holds no mutable state.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    max_request_size: u64,
    max_header_size: usize,
    max_query_params: usize,
    sql_injection: PatternSet,
    xss: PatternSet,
    command_injection: PatternSet,
}

impl RequestValidator {
    pub fn new(config: &SecurityConfig) -> Self {
        let family = |enabled: bool, name: &str, table: &[(&'static str, &'static str)]| {
            if enabled {
                PatternSet::compile(name, table)
            } else {
                PatternSet::empty()
            }
        };

        Self {
            max_request_size: config.max_request_size,
            max_header_size: config.max_header_size,
            max_query_params: config.max_query_params,
            sql_injection: family(
                config.enable_sql_injection_filter,
                "SQL injection",
                SQL_INJECTION_PATTERNS,
            ),
            xss: family(config.enable_xss_filter, "XSS", XSS_PATTERNS),
            command_injection: family(
                config.enable_command_injection_filter,
                "command injection",
                COMMAND_INJECTION_PATTERNS,
            ),
        }
    }

    pub fn validate(&self, request: &RequestHeader) -> Result<(), ValidationError> {
        if declared_content_length(request) > self.max_request_size {
            return Err(ValidationError::RequestTooLarge {
                limit: self.max_request_size,
            });
        }

        if header_bytes(request) > self.max_header_size {
            return Err(ValidationError::HeadersTooLarge {
                limit: self.max_header_size,
            });
        }

        if query_param_count(request) > self.max_query_params {
            return Err(ValidationError::TooManyQueryParams {
                limit: self.max_query_params,
            });
        }

        let url = request.uri.to_string();
        let decoded = decode_for_scan(&url);
        let url_inputs = [url.as_str(), decoded.as_ref()];

        for (family, patterns) in [
            (PatternFamily::SqlInjection, &self.sql_injection),
            (PatternFamily::Xss, &self.xss),
            (PatternFamily::CommandInjection, &self.command_injection),
        ] {
            if let Some(pattern) = patterns.first_match(&url_inputs) {
                return Err(ValidationError::MaliciousPattern {
                    family,
                    location: MatchLocation::Url,
                    pattern,
                });
            }
        }

        for value in request.headers.values() {
            let value = header_text(value);
            let decoded = decode_for_scan(&value);
            let inputs = [value.as_ref(), decoded.as_ref()];

            for (family, patterns) in [
                (PatternFamily::SqlInjection, &self.sql_injection),
                (PatternFamily::Xss, &self.xss),
            ] {
                if let Some(pattern) = patterns.first_match(&inputs) {
                    return Err(ValidationError::MaliciousPattern {
                        family,
                        location: MatchLocation::Headers,
                        pattern,
                    });
                }
            }
        }

        Ok(())
    }
}
