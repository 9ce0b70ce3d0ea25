use url::Url;

use super::CatalogError;

/// Parse a repository URL and check its scheme
///
/// Only `https` is accepted; develop mode additionally allows plain `http`.
pub fn validate_repository_url(raw: &str, develop_mode: bool) -> Result<Url, CatalogError> {
    let invalid = |message: String| CatalogError::InvalidUrl {
        url: raw.to_string(),
        message,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "https" => {}
        "http" if develop_mode => {}
        "http" => return Err(invalid("http is only allowed in develop mode".to_string())),
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_is_always_accepted() {
        assert!(validate_repository_url("https://repo.example.com/index.yaml", false).is_ok());
    }

    #[test]
    fn http_needs_develop_mode() {
        let raw = "http://repo.example.com/index.yaml";
        assert!(matches!(
            validate_repository_url(raw, false),
            Err(CatalogError::InvalidUrl { .. })
        ));
        assert!(validate_repository_url(raw, true).is_ok());
    }

    #[test]
    fn other_schemes_and_garbage_are_rejected() {
        assert!(validate_repository_url("ftp://repo.example.com/index.yaml", true).is_err());
        assert!(validate_repository_url("file:///tmp/index.yaml", true).is_err());
        assert!(validate_repository_url("not a url", true).is_err());
    }
}
