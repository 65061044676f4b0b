use crate::InfraError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::io::Read;
use std::sync::Arc;
use tracing::debug;
use ureq::tls::{parse_pem, PemItem, RootCerts, TlsConfig};

/// Where and how to reach a director's API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorEndpoint {
    /// Base URL, e.g. `https://10.0.0.6:25555`.
    pub address: String,
    pub username: String,
    pub password: String,
    /// PEM CA bundle the director's certificate chains to.
    pub ca_cert: String,
}

pub trait DirectorClient: Send + Sync {
    fn update_cloud_config(&self, manifest: &[u8]) -> Result<(), InfraError>;
}

pub trait DirectorClientFactory: Send + Sync {
    fn connect(&self, endpoint: &DirectorEndpoint) -> Result<Box<dyn DirectorClient>, InfraError>;
}

/// Director API client over HTTPS with basic auth.
pub struct HttpDirectorClient {
    endpoint: DirectorEndpoint,
    agent: ureq::Agent,
}

impl HttpDirectorClient {
    pub fn new(endpoint: DirectorEndpoint) -> Result<Self, InfraError> {
        let agent = if endpoint.ca_cert.trim().is_empty() {
            ureq::Agent::new_with_defaults()
        } else {
            let certs: Vec<_> = parse_pem(endpoint.ca_cert.as_bytes())
                .filter_map(|item| match item {
                    Ok(PemItem::Certificate(cert)) => Some(cert.to_owned()),
                    _ => None,
                })
                .collect();
            if certs.is_empty() {
                return Err(InfraError::parse("director CA", "no certificates found"));
            }
            let tls = TlsConfig::builder()
                .root_certs(RootCerts::Specific(Arc::new(certs)))
                .build();
            let config = ureq::Agent::config_builder().tls_config(tls).build();
            ureq::Agent::new_with_config(config)
        };
        Ok(Self { endpoint, agent })
    }

    fn authorization(&self) -> String {
        let token = STANDARD.encode(format!(
            "{}:{}",
            self.endpoint.username, self.endpoint.password
        ));
        format!("Basic {token}")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint.address.trim_end_matches('/'))
    }
}

impl DirectorClient for HttpDirectorClient {
    fn update_cloud_config(&self, manifest: &[u8]) -> Result<(), InfraError> {
        let url = self.url("/cloud_configs");
        debug!("POST {url} ({} bytes)", manifest.len());
        let resp = match self
            .agent
            .post(&url)
            .header("Authorization", &self.authorization())
            .header("Content-Type", "text/yaml")
            .send(manifest)
        {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(InfraError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => return Err(InfraError::Http(e.to_string())),
        };

        let code = resp.status().as_u16();
        if code >= 400 {
            let mut body = String::new();
            let _ = resp.into_body().into_reader().read_to_string(&mut body);
            return Err(InfraError::Http(format!(
                "HTTP {code} for {url}: {}",
                body.trim()
            )));
        }
        Ok(())
    }
}

pub struct HttpDirectorClientFactory;

impl DirectorClientFactory for HttpDirectorClientFactory {
    fn connect(&self, endpoint: &DirectorEndpoint) -> Result<Box<dyn DirectorClient>, InfraError> {
        Ok(Box::new(HttpDirectorClient::new(endpoint.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> DirectorEndpoint {
        DirectorEndpoint {
            address: "https://10.0.0.6:25555/".to_owned(),
            username: "admin".to_owned(),
            password: "secret".to_owned(),
            ca_cert: String::new(),
        }
    }

    #[test]
    fn basic_auth_header() {
        let client = HttpDirectorClient::new(endpoint()).unwrap();
        assert_eq!(client.authorization(), "Basic YWRtaW46c2VjcmV0");
    }

    #[test]
    fn url_strips_trailing_slash() {
        let client = HttpDirectorClient::new(endpoint()).unwrap();
        assert_eq!(
            client.url("/cloud_configs"),
            "https://10.0.0.6:25555/cloud_configs"
        );
    }

    #[test]
    fn ca_without_certificates_rejected() {
        let mut ep = endpoint();
        ep.ca_cert = "not a pem".to_owned();
        assert!(matches!(
            HttpDirectorClient::new(ep),
            Err(InfraError::Parse { .. })
        ));
    }
}
