//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports valid, addresses well-formed)
//! - Check cross-field rules (TLS vs ACME, credential pairing)
//!
//! # Design Decisions
//! - Validation is a pure function: (key, payload) → Result
//! - Never reads store state; callers re-read the current version
//!   just before commit
//! - Fails fast with the first offending field named

use url::Url;

use crate::config::schema::{ConfigKey, ConfigPayload, Hysteria2Config, Socks5Config};
use crate::error::{Error, Result};

/// Validate a proposed payload for a document key.
pub fn validate(key: ConfigKey, payload: &ConfigPayload) -> Result<()> {
    if !payload.matches_key(key) {
        return Err(Error::validation(
            "payload",
            format!("payload type does not match key {key}"),
        ));
    }
    match payload {
        ConfigPayload::Hysteria2(config) => validate_hysteria2(config),
        ConfigPayload::Socks5(config) => validate_socks5(config),
    }
}

fn validate_hysteria2(config: &Hysteria2Config) -> Result<()> {
    validate_listen("listen", &config.listen)?;

    if config.tls.is_some() && config.acme.is_some() {
        return Err(Error::validation(
            "tls",
            "tls and acme modes are mutually exclusive",
        ));
    }
    if let Some(tls) = &config.tls {
        if tls.cert_path.is_empty() {
            return Err(Error::validation("tls.cert_path", "must not be empty"));
        }
        if tls.key_path.is_empty() {
            return Err(Error::validation("tls.key_path", "must not be empty"));
        }
    }
    if let Some(acme) = &config.acme {
        if acme.domains.is_empty() {
            return Err(Error::validation(
                "acme.domains",
                "at least one domain is required",
            ));
        }
        if acme.domains.iter().any(|d| d.is_empty()) {
            return Err(Error::validation("acme.domains", "domains must not be empty"));
        }
        if acme.dir.is_empty() {
            return Err(Error::validation("acme.dir", "must not be empty"));
        }
    }

    if config.masquerade.enabled {
        let url = Url::parse(&config.masquerade.target).map_err(|e| {
            Error::validation("masquerade.target", format!("not a valid URL: {e}"))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::validation(
                "masquerade.target",
                "scheme must be http or https",
            ));
        }
    }

    if let Some(ranges) = &config.port_hopping {
        if !ranges.is_empty() {
            validate_port_hopping(ranges)?;
        }
    }

    Ok(())
}

fn validate_socks5(config: &Socks5Config) -> Result<()> {
    validate_listen("listen", &config.listen)?;

    match (&config.username, &config.password) {
        (Some(user), Some(pass)) => {
            if user.is_empty() {
                return Err(Error::validation("username", "must not be empty"));
            }
            if pass.is_empty() {
                return Err(Error::validation("password", "must not be empty"));
            }
        }
        (Some(_), None) => {
            return Err(Error::validation("password", "required when username is set"));
        }
        (None, Some(_)) => {
            return Err(Error::validation("username", "required when password is set"));
        }
        (None, None) => {}
    }

    Ok(())
}

/// Check that `value` is a syntactically valid host:port with port 1-65535.
fn validate_listen(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    let Some((host, port)) = value.rsplit_once(':') else {
        return Err(Error::validation(field, "expected host:port"));
    };
    if host.is_empty() {
        return Err(Error::validation(field, "host must not be empty"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::validation(
            field,
            format!("port {port:?} is not in 1-65535"),
        )),
        Ok(_) => Ok(()),
    }
}

/// Check a port hopping expression: comma-separated ports or ascending ranges.
fn validate_port_hopping(ranges: &str) -> Result<()> {
    for part in ranges.split(',') {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_hop_port(lo)?;
                let hi = parse_hop_port(hi)?;
                if lo >= hi {
                    return Err(Error::validation(
                        "port_hopping",
                        format!("range {part} is not ascending"),
                    ));
                }
            }
            None => {
                parse_hop_port(part)?;
            }
        }
    }
    Ok(())
}

fn parse_hop_port(s: &str) -> Result<u16> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::validation(
            "port_hopping",
            format!("{s:?} is not a port"),
        )),
        Ok(p) => Ok(p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AcmeSettings, TlsFiles};

    fn hysteria2(listen: &str) -> Hysteria2Config {
        Hysteria2Config {
            listen: listen.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_minimal_hysteria2() {
        let payload = ConfigPayload::Hysteria2(hysteria2("0.0.0.0:443"));
        assert!(validate(ConfigKey::Hysteria2Node1, &payload).is_ok());
    }

    #[test]
    fn rejects_payload_key_mismatch() {
        let payload = ConfigPayload::Hysteria2(hysteria2("0.0.0.0:443"));
        assert!(validate(ConfigKey::Socks5, &payload).is_err());
    }

    #[test]
    fn rejects_bad_listen() {
        for listen in ["", "no-port", ":443", "host:0", "host:99999", "host:https"] {
            let payload = ConfigPayload::Hysteria2(hysteria2(listen));
            assert!(
                validate(ConfigKey::Hysteria2Node1, &payload).is_err(),
                "listen {listen:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_tls_and_acme_together() {
        let mut config = hysteria2("0.0.0.0:443");
        config.tls = Some(TlsFiles {
            cert_path: "/tmp/a.crt".into(),
            key_path: "/tmp/a.key".into(),
        });
        config.acme = Some(AcmeSettings {
            domains: vec!["example.com".into()],
            ca: "letsencrypt".into(),
            dir: "/tmp/acme".into(),
        });
        let payload = ConfigPayload::Hysteria2(config);
        assert!(validate(ConfigKey::Hysteria2Node1, &payload).is_err());
    }

    #[test]
    fn rejects_masquerade_without_valid_url() {
        let mut config = hysteria2("0.0.0.0:443");
        config.masquerade.enabled = true;
        config.masquerade.target = "not a url".into();
        let payload = ConfigPayload::Hysteria2(config);
        let err = validate(ConfigKey::Hysteria2Node1, &payload).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "masquerade.target"));
    }

    #[test]
    fn port_hopping_ranges() {
        let mut config = hysteria2("0.0.0.0:443");
        for (expr, ok) in [
            ("20000-25000", true),
            ("20000-25000,31000", true,),
            ("31000", true),
            ("25000-20000", false),
            ("20000-", false),
            ("abc", false),
        ] {
            config.port_hopping = Some(expr.to_string());
            let payload = ConfigPayload::Hysteria2(config.clone());
            assert_eq!(
                validate(ConfigKey::Hysteria2Node1, &payload).is_ok(),
                ok,
                "expr {expr:?}"
            );
        }
    }

    #[test]
    fn socks5_credentials_are_all_or_nothing() {
        let mut config = Socks5Config {
            listen: "127.0.0.1:1080".into(),
            ..Default::default()
        };
        assert!(validate(ConfigKey::Socks5, &ConfigPayload::Socks5(config.clone())).is_ok());

        config.username = Some("user".into());
        assert!(validate(ConfigKey::Socks5, &ConfigPayload::Socks5(config.clone())).is_err());

        config.password = Some("".into());
        assert!(validate(ConfigKey::Socks5, &ConfigPayload::Socks5(config.clone())).is_err());

        config.password = Some("secret".into());
        assert!(validate(ConfigKey::Socks5, &ConfigPayload::Socks5(config)).is_ok());
    }
}
