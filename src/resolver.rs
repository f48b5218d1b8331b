//! Addressing-mode detection and Xtream URL construction
//!
//! Everything here is pure: the same config always yields the same URLs.
//! Credentials are inserted into query strings as-is, without escaping.

use crate::config::StreamSourceConfig;

/// Derived addressing information for a config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub playlist_url: String,
    pub probe_url: String,
    pub is_direct_m3u: bool,
}

/// Host is itself a playlist URL, or credentials are incomplete
pub fn is_direct_m3u(config: &StreamSourceConfig) -> bool {
    config.host_dns.contains(".m3u")
        || config.host_dns.contains("playlist")
        || config.username.is_empty()
        || config.password.is_empty()
}

pub fn resolve(config: &StreamSourceConfig) -> ResolvedSource {
    resolve_host(config, &config.host_dns)
}

/// Same addressing against `alternative_dns`, for credentialed configs that have one
pub fn resolve_alternative(config: &StreamSourceConfig) -> Option<ResolvedSource> {
    let alt = config.alternative_dns.trim();
    if alt.is_empty() || is_direct_m3u(config) {
        return None;
    }
    Some(resolve_host(config, alt))
}

/// Write the derived fields back into the config
pub fn apply(config: &mut StreamSourceConfig) {
    let resolved = resolve(config);
    config.is_direct_m3u = resolved.is_direct_m3u;
    config.playlist_url = resolved.playlist_url;
}

fn resolve_host(config: &StreamSourceConfig, host: &str) -> ResolvedSource {
    if is_direct_m3u(config) {
        return ResolvedSource {
            playlist_url: host.to_string(),
            probe_url: host.to_string(),
            is_direct_m3u: true,
        };
    }

    let base = base_url(host, &config.port);
    ResolvedSource {
        playlist_url: playlist_url(&base, config),
        probe_url: probe_url(&base, config),
        is_direct_m3u: false,
    }
}

/// `http://` when no scheme is given, plus `:port` when a port is configured
/// and the host does not already carry one
pub fn base_url(host: &str, port: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    let mut base = if host.starts_with("http") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };

    let port = port.trim();
    if !port.is_empty() && !has_explicit_port(&base) {
        base.push(':');
        base.push_str(port);
    }
    base
}

fn has_explicit_port(base: &str) -> bool {
    let authority = base.split_once("://").map(|(_, rest)| rest).unwrap_or(base);
    let authority = authority.split('/').next().unwrap_or(authority);
    match authority.rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn playlist_url(base: &str, config: &StreamSourceConfig) -> String {
    format!(
        "{}/get.php?username={}&password={}&type=m3u_plus&output={}",
        base,
        config.username,
        config.password,
        config.playlist_format.as_str()
    )
}

fn probe_url(base: &str, config: &StreamSourceConfig) -> String {
    format!(
        "{}/player_api.php?username={}&password={}&action=get_info",
        base, config.username, config.password
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaylistFormat;

    fn credentialed(host: &str) -> StreamSourceConfig {
        StreamSourceConfig {
            host_dns: host.to_string(),
            username: "john".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_credentials_use_host_verbatim() {
        for (user, pass) in [("", "secret"), ("john", ""), ("", "")] {
            let config = StreamSourceConfig {
                host_dns: "http://provider.tv/list".to_string(),
                username: user.to_string(),
                password: pass.to_string(),
                ..Default::default()
            };
            let resolved = resolve(&config);
            assert!(resolved.is_direct_m3u);
            assert_eq!(resolved.playlist_url, config.host_dns);
        }
    }

    #[test]
    fn test_playlist_host_is_direct_even_with_credentials() {
        let resolved = resolve(&credentialed("http://cdn.example.com/tv.m3u"));
        assert!(resolved.is_direct_m3u);
        assert_eq!(resolved.playlist_url, "http://cdn.example.com/tv.m3u");

        let resolved = resolve(&credentialed("http://example.com/playlist/42"));
        assert!(resolved.is_direct_m3u);
    }

    #[test]
    fn test_credentialed_url_with_default_port() {
        let resolved = resolve(&credentialed("example.com"));
        assert!(!resolved.is_direct_m3u);
        assert_eq!(
            resolved.playlist_url,
            "http://example.com:80/get.php?username=john&password=secret&type=m3u_plus&output=ts"
        );
        assert_eq!(
            resolved.probe_url,
            "http://example.com:80/player_api.php?username=john&password=secret&action=get_info"
        );
    }

    #[test]
    fn test_credentialed_url_has_single_get_segment_with_format() {
        let mut config = credentialed("https://example.com/");
        config.port = String::new();
        config.playlist_format = PlaylistFormat::Hls;
        let url = resolve(&config).playlist_url;
        assert_eq!(url.matches("get.php?username=").count(), 1);
        assert_eq!(
            url,
            "https://example.com/get.php?username=john&password=secret&type=m3u_plus&output=hls"
        );
    }

    #[test]
    fn test_existing_port_is_not_duplicated() {
        assert_eq!(base_url("http://example.com:8080", "80"), "http://example.com:8080");
        assert_eq!(base_url("example.com", "25461"), "http://example.com:25461");
        assert_eq!(base_url("example.com", " "), "http://example.com");
    }

    #[test]
    fn test_apply_writes_derived_fields() {
        let mut config = credentialed("example.com");
        apply(&mut config);
        assert!(!config.is_direct_m3u);
        assert!(config.playlist_url.starts_with("http://example.com:80/get.php"));
    }

    #[test]
    fn test_alternative_host() {
        let mut config = credentialed("example.com");
        assert!(resolve_alternative(&config).is_none());

        config.alternative_dns = "backup.example.net".to_string();
        let alt = resolve_alternative(&config).unwrap();
        assert!(alt.playlist_url.starts_with("http://backup.example.net:80/get.php?"));

        config.password.clear();
        assert!(resolve_alternative(&config).is_none());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let config = credentialed("example.com");
        assert_eq!(resolve(&config), resolve(&config));
    }
}
