use url::Url;

use crate::error::AppError;

const SITE_DOMAIN: &str = "devpost.com";

/// Canonical form of a hackathon URL.
///
/// Adds `https://` when the scheme is missing, requires a host on the
/// target site, and drops the trailing slash, query and fragment.
pub fn normalize_hackathon_url(raw: &str) -> Result<String, AppError> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        return Err(AppError::InvalidUrl("Hackathon URL is required".into()));
    }

    let lower = candidate.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        candidate.to_string()
    } else {
        format!("https://{candidate}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|e| AppError::InvalidUrl(format!("'{}' is not a valid URL: {e}", raw.trim())))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::InvalidUrl(format!(
            "URL scheme '{}' is not allowed",
            parsed.scheme()
        )));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(AppError::InvalidUrl(
            "URLs with credentials are not allowed".into(),
        ));
    }
    if parsed.port().is_some() {
        return Err(AppError::InvalidUrl("URLs with a port are not allowed".into()));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::InvalidUrl("URL has no host".into()))?;
    if !is_site_host(host) {
        return Err(AppError::InvalidUrl(format!(
            "Only {SITE_DOMAIN} hackathon URLs are allowed, got '{host}'"
        )));
    }

    let path = parsed.path().trim_end_matches('/');
    Ok(format!("{}://{}{}", parsed.scheme(), host, path))
}

fn is_site_host(host: &str) -> bool {
    host == SITE_DOMAIN || host.ends_with(&format!(".{SITE_DOMAIN}"))
}

/// Whether `challenge_url` points into the hackathon at `target_url`:
/// same host, and a path under the target's path.
pub fn same_hackathon(target_url: &str, challenge_url: &str) -> bool {
    let (Ok(target), Ok(challenge)) = (Url::parse(target_url), Url::parse(challenge_url)) else {
        return false;
    };

    match (target.host_str(), challenge.host_str()) {
        (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => {}
        _ => return false,
    }

    let target_path = target.path().trim_end_matches('/');
    if target_path.is_empty() {
        return true;
    }
    challenge.path().trim_end_matches('/').starts_with(target_path)
}
