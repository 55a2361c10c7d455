//! # URI
//!
//! Protocol and schema URLs are persisted in normalized form: lowercased
//! scheme and authority, no trailing slash.

use crate::{Result, unexpected};

/// Normalize a protocol or schema URL.
///
/// # Errors
///
/// Fails when the URL has no scheme.
pub fn clean(url: &str) -> Result<String> {
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(unexpected!("invalid URL: {url}"));
    };
    if rest.is_empty() {
        return Err(unexpected!("invalid URL: {url}"));
    }

    let (authority, path) = rest.split_once('/').map_or((rest, ""), |(a, p)| (a, p));
    let mut cleaned = format!("{}://{}", scheme.to_lowercase(), authority.to_lowercase());
    if !path.is_empty() {
        cleaned.push('/');
        cleaned.push_str(path.trim_end_matches('/'));
    }

    Ok(cleaned)
}

/// Verify a URL is already in normalized form.
///
/// # Errors
///
/// Fails when the URL is invalid or not normalized.
pub fn validate(url: &str) -> Result<()> {
    if clean(url)? != url {
        return Err(unexpected!("URL {url} is not normalized"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_scheme_and_slash() {
        assert_eq!(clean("HTTP://Example.com/Chat/").expect("should clean"), "http://example.com/Chat");
        assert_eq!(clean("https://example.com").expect("should clean"), "https://example.com");
    }

    #[test]
    fn rejects_unnormalized() {
        assert!(validate("http://example.com/chat").is_ok());
        assert!(validate("http://example.com/chat/").is_err());
        assert!(validate("example.com/chat").is_err());
    }
}
