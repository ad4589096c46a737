use relayget_core::models::settings::ProxySettings;

/// Proxy URL shared by reqwest and the extractor's `--proxy` flag.
pub fn proxy_url(proxy: &ProxySettings) -> Option<String> {
    if !proxy.enabled || proxy.host.is_empty() {
        return None;
    }
    let scheme = match proxy.proxy_type.as_str() {
        "socks5" => "socks5",
        "https" => "https",
        _ => "http",
    };
    if !proxy.username.is_empty() {
        Some(format!(
            "{}://{}:{}@{}:{}",
            scheme, proxy.username, proxy.password, proxy.host, proxy.port
        ))
    } else {
        Some(format!("{}://{}:{}", scheme, proxy.host, proxy.port))
    }
}

pub fn apply_proxy(
    builder: reqwest::ClientBuilder,
    proxy: &ProxySettings,
) -> reqwest::ClientBuilder {
    let Some(url) = proxy_url(proxy) else {
        return builder;
    };
    match reqwest::Proxy::all(&url) {
        Ok(p) => builder.proxy(p),
        Err(e) => {
            tracing::warn!("[http] invalid proxy URL: {}", e);
            builder
        }
    }
}

pub fn client(proxy: &ProxySettings, user_agent: &str) -> anyhow::Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(std::time::Duration::from_secs(30));
    Ok(apply_proxy(builder, proxy).build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(kind: &str, user: &str) -> ProxySettings {
        ProxySettings {
            enabled: true,
            proxy_type: kind.into(),
            host: "10.0.0.2".into(),
            port: 1080,
            username: user.into(),
            password: if user.is_empty() { String::new() } else { "pw".into() },
        }
    }

    #[test]
    fn disabled_proxy_yields_none() {
        assert!(proxy_url(&ProxySettings::default()).is_none());
    }

    #[test]
    fn socks_with_credentials() {
        assert_eq!(
            proxy_url(&proxy("socks5", "bob")).as_deref(),
            Some("socks5://bob:pw@10.0.0.2:1080")
        );
    }

    #[test]
    fn unknown_type_falls_back_to_http() {
        assert_eq!(proxy_url(&proxy("weird", "")).as_deref(), Some("http://10.0.0.2:1080"));
    }
}
