// Delta Dore cloud account lookup
//
// The gateway password is usually not known to the user: it is provisioned
// by the vendor and retrievable from the cloud "sites management" API once
// logged in with the account credentials. The relay WebSocket itself
// still authenticates with Digest.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

const DEFAULT_DISCOVERY_URL: &str = "https://deltadoreadb2ciot.b2clogin.com/deltadoreadb2ciot.onmicrosoft.com/v2.0/.well-known/openid-configuration?p=B2C_1_AccountProviderROPC_SignIn";
const DEFAULT_SITES_URL: &str = "https://prod.iotdeltadore.com/sitesmanagement/api/v1/sites";
const DEFAULT_CLIENT_ID: &str = "8782839f-3264-472a-ab87-4d4e23524da4";
const DEFAULT_SCOPE: &str = "openid profile offline_access \
    https://deltadoreadb2ciot.onmicrosoft.com/iotapi/sites_management_allowed \
    https://deltadoreadb2ciot.onmicrosoft.com/iotapi/sites_management_gateway_credentials \
    https://deltadoreadb2ciot.onmicrosoft.com/iotapi/websocket_remote_access";

/// Account credentials for the vendor cloud.
#[derive(Debug, Clone)]
pub struct CloudCredentials {
    pub email: String,
    pub password: SecretString,
}

/// Endpoints and OAuth client parameters for the cloud lookup.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// OpenID configuration document advertising the token endpoint.
    pub discovery_url: String,
    /// Sites management collection.
    pub sites_url: String,
    pub client_id: String,
    pub scope: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            discovery_url: DEFAULT_DISCOVERY_URL.into(),
            sites_url: DEFAULT_SITES_URL.into(),
            client_id: DEFAULT_CLIENT_ID.into(),
            scope: DEFAULT_SCOPE.into(),
        }
    }
}

/// A gateway registered on the account.
#[derive(Debug, Clone)]
pub struct CloudGateway {
    pub mac: String,
    pub password: Option<SecretString>,
    pub site_name: Option<String>,
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
    token_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SitesResponse {
    #[serde(default)]
    sites: Vec<Site>,
}

#[derive(Debug, Deserialize)]
struct Site {
    #[serde(default)]
    name: Option<String>,
    gateway: Option<SiteGateway>,
}

#[derive(Debug, Deserialize)]
struct SiteGateway {
    mac: String,
    #[serde(default)]
    password: Option<String>,
}

// ── CloudClient ──────────────────────────────────────────────────────

/// HTTP client for the cloud account API.
pub struct CloudClient {
    http: reqwest::Client,
    config: CloudConfig,
}

impl CloudClient {
    pub fn new(config: CloudConfig, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, config })
    }

    /// Create a cloud client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, config: CloudConfig) -> Self {
        Self { http, config }
    }

    /// Log in with the resource-owner password grant, returning a bearer token.
    pub async fn login(&self, credentials: &CloudCredentials) -> Result<SecretString, Error> {
        let discovery_url = Url::parse(&self.config.discovery_url)?;
        debug!(url = %discovery_url, "fetching OpenID configuration");
        let discovery: OpenIdConfiguration = self
            .http
            .get(discovery_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let token_url = Url::parse(&discovery.token_endpoint)?;
        debug!(url = %token_url, "requesting access token");

        let resp = self
            .http
            .post(token_url)
            .form(&[
                ("grant_type", "password"),
                ("username", credentials.email.as_str()),
                ("password", credentials.password.expose_secret()),
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Cloud {
                message: format!("login failed (HTTP {status}): {body}"),
            });
        }

        let token: TokenResponse = resp.json().await?;
        Ok(SecretString::from(token.access_token))
    }

    /// List gateways on the account, optionally filtered by MAC.
    pub async fn list_gateways(
        &self,
        token: &SecretString,
        gateway_mac: Option<&str>,
    ) -> Result<Vec<CloudGateway>, Error> {
        let mut url = Url::parse(&self.config.sites_url)?;
        if let Some(mac) = gateway_mac {
            url.query_pairs_mut().append_pair("gateway_mac", mac);
        }
        debug!(url = %url, "listing sites");

        let resp = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Cloud {
                message: format!("site lookup failed (HTTP {status}): {body}"),
            });
        }

        let sites: SitesResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.clone(),
            })?;

        Ok(sites
            .sites
            .into_iter()
            .filter_map(|site| {
                let gateway = site.gateway?;
                Some(CloudGateway {
                    mac: gateway.mac,
                    password: gateway.password.map(SecretString::from),
                    site_name: site.name,
                })
            })
            .collect())
    }

    /// Resolve the password of one gateway.
    pub async fn gateway_password(
        &self,
        credentials: &CloudCredentials,
        mac: &str,
    ) -> Result<SecretString, Error> {
        let token = self.login(credentials).await?;
        let gateways = self.list_gateways(&token, Some(mac)).await?;
        gateways
            .into_iter()
            .find(|g| same_mac(&g.mac, mac))
            .and_then(|g| g.password)
            .ok_or_else(|| Error::Cloud {
                message: format!("no password for gateway {mac} on this account"),
            })
    }

    /// Find the first gateway on the account (used when no MAC is configured).
    pub async fn first_gateway(&self, credentials: &CloudCredentials) -> Result<CloudGateway, Error> {
        let token = self.login(credentials).await?;
        self.list_gateways(&token, None)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Cloud {
                message: "no gateway registered on this account".into(),
            })
    }
}

/// Compare MAC addresses ignoring case and separators.
pub fn same_mac(a: &str, b: &str) -> bool {
    let norm = |s: &str| {
        s.chars()
            .filter(char::is_ascii_hexdigit)
            .map(|c| c.to_ascii_uppercase())
            .collect::<String>()
    };
    norm(a) == norm(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_comparison_ignores_format() {
        assert!(same_mac("00:1A:25:01:02:03", "001a25010203"));
        assert!(!same_mac("001A25010203", "001A25010204"));
    }

    #[test]
    fn default_config_points_at_vendor() {
        let config = CloudConfig::default();
        assert!(config.sites_url.starts_with("https://prod.iotdeltadore.com/"));
        assert!(config.scope.contains("sites_management_gateway_credentials"));
    }
}
