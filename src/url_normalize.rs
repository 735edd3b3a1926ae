//! URL normalization for dedup (§4.A).
//!
//! `normalize` resolves a candidate URL against a source URL, then lowercases
//! scheme and host, strips the fragment, strips the default port for the
//! scheme, and collapses duplicate path slashes. It is deterministic and
//! idempotent: `normalize(normalize(x, s), s) == normalize(x, s)`.

use url::Url;

/// Resolves `candidate` against `source` and canonicalizes it. Returns
/// `None` when the candidate is empty, unparsable, uses a non-HTTP(S)
/// scheme, or has a host without a dot.
pub fn normalize(candidate: &str, source: &Url) -> Option<Url> {
    if candidate.trim().is_empty() {
        return None;
    }

    let mut resolved = source.join(candidate).ok()?;

    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }

    let host = resolved.host_str()?.to_string();
    if !host.contains('.') {
        return None;
    }

    resolved.set_fragment(None);

    lowercase_scheme_and_host(&mut resolved, &host);
    strip_default_port(&mut resolved);
    collapse_duplicate_slashes(&mut resolved);

    Some(resolved)
}

fn lowercase_scheme_and_host(url: &mut Url, host: &str) {
    let lower_host = host.to_lowercase();
    if lower_host != host {
        // `Url::set_host` re-parses, which is the only safe way to mutate
        // authority in the `url` crate's API.
        let _ = url.set_host(Some(&lower_host));
    }
    // `url` already lowercases `scheme()` on parse (RFC 3986 requires it),
    // so there is nothing further to do for the scheme.
}

fn strip_default_port(url: &mut Url) {
    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }
}

fn collapse_duplicate_slashes(url: &mut Url) {
    let path = url.path();
    if !path.contains("//") {
        return;
    }
    let mut collapsed = String::with_capacity(path.len());
    let mut prev_was_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if prev_was_slash {
                continue;
            }
            prev_was_slash = true;
        } else {
            prev_was_slash = false;
        }
        collapsed.push(ch);
    }
    if collapsed.is_empty() {
        collapsed.push('/');
    }
    url.set_path(&collapsed);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> Url {
        Url::parse("https://Example.com/base/").unwrap()
    }

    #[test]
    fn resolves_relative_against_source() {
        let n = normalize("/foo/bar", &src()).unwrap();
        assert_eq!(n.as_str(), "https://example.com/foo/bar");
    }

    #[test]
    fn lowercases_scheme_and_host() {
        let n = normalize("HTTPS://EXAMPLE.com/Path", &src()).unwrap();
        assert_eq!(n.host_str().unwrap(), "example.com");
    }

    #[test]
    fn strips_fragment() {
        let n = normalize("/foo#section", &src()).unwrap();
        assert!(n.fragment().is_none());
        assert_eq!(n.path(), "/foo");
    }

    #[test]
    fn preserves_query() {
        let n = normalize("/foo?x=1", &src()).unwrap();
        assert_eq!(n.query(), Some("x=1"));
    }

    #[test]
    fn strips_default_port() {
        let n = normalize("https://example.com:443/foo", &src()).unwrap();
        assert_eq!(n.port(), None);
        let n2 = normalize("http://example.com:80/foo", &src()).unwrap();
        assert_eq!(n2.port(), None);
    }

    #[test]
    fn preserves_non_default_port() {
        let n = normalize("https://example.com:8443/foo", &src()).unwrap();
        assert_eq!(n.port(), Some(8443));
    }

    #[test]
    fn collapses_duplicate_slashes() {
        let n = normalize("//example.com//foo//bar", &src()).unwrap();
        assert_eq!(n.path(), "/foo/bar");
    }

    #[test]
    fn rejects_empty() {
        assert!(normalize("", &src()).is_none());
        assert!(normalize("   ", &src()).is_none());
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(normalize("ftp://example.com/x", &src()).is_none());
        assert!(normalize("mailto:a@example.com", &src()).is_none());
        assert!(normalize("javascript:void(0)", &src()).is_none());
    }

    #[test]
    fn rejects_host_without_dot() {
        assert!(normalize("https://localhost/x", &src()).is_none());
    }

    #[test]
    fn is_idempotent() {
        let s = src();
        let once = normalize("/foo//bar#frag", &s).unwrap();
        let twice = normalize(once.as_str(), &s).unwrap();
        assert_eq!(once, twice);
    }
}
