//! Client for npm-compatible package registries

use std::collections::BTreeMap;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::Settings;
use crate::error::{Result, SkillError};
use crate::reference::{ParsedReference, VersionSpec};
use crate::resolver::tags;

const USER_AGENT: &str = concat!("skillpm/", env!("CARGO_PKG_VERSION"));
const LATEST_TAG: &str = "latest";

#[derive(Debug, Deserialize)]
struct PackageDocument {
    #[serde(rename = "dist-tags", default)]
    dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    versions: BTreeMap<String, VersionDocument>,
}

#[derive(Debug, Deserialize)]
struct VersionDocument {
    dist: DistDocument,
}

#[derive(Debug, Deserialize)]
struct DistDocument {
    tarball: String,
    #[serde(default)]
    integrity: Option<String>,
}

/// One concrete published version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRelease {
    pub version: String,
    pub tarball: String,
    pub integrity: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    token: Option<String>,
}

impl RegistryClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.http_timeout)
            .build()
            .map_err(|e| SkillError::network(&settings.registry_url, e))?;
        Ok(Self {
            http,
            token: settings.token.clone(),
        })
    }

    /// Metadata URL; scoped names are sent as `@scope%2Fname`.
    pub fn package_url(registry_url: &str, scope: Option<&str>, name: &str) -> String {
        let base = registry_url.trim_end_matches('/');
        match scope {
            Some(scope) => format!("{base}/@{scope}%2F{name}"),
            None => format!("{base}/{name}"),
        }
    }

    /// Pick the concrete version `reference` asks for.
    pub async fn resolve(
        &self,
        reference: &ParsedReference,
        registry_url: &str,
    ) -> Result<RegistryRelease> {
        let url = Self::package_url(registry_url, reference.scope.as_deref(), &reference.name);
        let document = self.metadata(reference, &url, registry_url).await?;
        let version = select_version(&document, &reference.version).ok_or_else(|| {
            SkillError::VersionNotFound {
                reference: reference.raw.clone(),
                requested: reference.version.to_string(),
            }
        })?;

        let dist = &document
            .versions
            .get(&version)
            .ok_or_else(|| SkillError::VersionNotFound {
                reference: reference.raw.clone(),
                requested: version.clone(),
            })?
            .dist;
        debug!("Resolved {} to {} ({})", reference.raw, version, dist.tarball);

        Ok(RegistryRelease {
            version,
            tarball: dist.tarball.clone(),
            integrity: dist.integrity.clone(),
        })
    }

    async fn metadata(
        &self,
        reference: &ParsedReference,
        url: &str,
        registry_url: &str,
    ) -> Result<PackageDocument> {
        let response = self
            .authorized(self.http.get(url), url, registry_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SkillError::network(&reference.raw, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SkillError::VersionNotFound {
                reference: reference.raw.clone(),
                requested: reference.version.to_string(),
            });
        }
        let response = response
            .error_for_status()
            .map_err(|e| SkillError::network(&reference.raw, e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SkillError::network(&reference.raw, e))?;
        serde_json::from_slice(&bytes).map_err(|e| SkillError::manifest(url, e))
    }

    /// Download an artifact, sending the token only to the registry host.
    pub async fn download(
        &self,
        reference: &str,
        url: &str,
        registry_url: &str,
    ) -> Result<Vec<u8>> {
        debug!("Downloading {}", url);
        let bytes = self
            .authorized(self.http.get(url), url, registry_url)
            .send()
            .await
            .map_err(|e| SkillError::network(reference, e))?
            .error_for_status()
            .map_err(|e| SkillError::network(reference, e))?
            .bytes()
            .await
            .map_err(|e| SkillError::network(reference, e))?;
        Ok(bytes.to_vec())
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        registry_url: &str,
    ) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) if same_host(url, registry_url) => request.bearer_auth(token),
            _ => request,
        }
    }
}

fn same_host(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.host_str().is_some()
                && a.host_str() == b.host_str()
                && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}

fn select_version(document: &PackageDocument, spec: &VersionSpec) -> Option<String> {
    let published = || document.versions.keys().map(String::as_str);
    match spec {
        VersionSpec::Unspecified | VersionSpec::Latest => document
            .dist_tags
            .get(LATEST_TAG)
            .cloned()
            .or_else(|| tags::highest(published()).map(str::to_string)),
        VersionSpec::Exact(wanted) => {
            if document.versions.contains_key(wanted) {
                Some(wanted.clone())
            } else {
                // `pdf@beta` names a dist-tag
                document.dist_tags.get(wanted).cloned()
            }
        }
        VersionSpec::Range(range) => tags::highest_matching(published(), range).map(str::to_string),
        VersionSpec::Branch(_) | VersionSpec::Commit(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn document() -> PackageDocument {
        serde_json::from_str(
            r#"{
              "name": "pdf",
              "dist-tags": {"latest": "1.2.0", "beta": "2.0.0-beta.1"},
              "versions": {
                "1.0.0": {"dist": {"tarball": "https://r.example/pdf-1.0.0.tgz"}},
                "1.2.0": {"dist": {
                  "tarball": "https://r.example/pdf-1.2.0.tgz",
                  "integrity": "sha512-abc"
                }},
                "1.3.0-rc.1": {"dist": {"tarball": "https://r.example/pdf-1.3.0-rc.1.tgz"}},
                "2.0.0-beta.1": {"dist": {"tarball": "https://r.example/pdf-2.0.0-beta.1.tgz"}}
              }
            }"#,
        )
        .expect("document")
    }

    #[test]
    fn selects_versions() {
        let doc = document();
        assert_eq!(select_version(&doc, &VersionSpec::Latest).as_deref(), Some("1.2.0"));
        assert_eq!(select_version(&doc, &VersionSpec::Unspecified).as_deref(), Some("1.2.0"));
        assert_eq!(
            select_version(&doc, &VersionSpec::Exact("1.0.0".into())).as_deref(),
            Some("1.0.0")
        );
        assert_eq!(
            select_version(&doc, &VersionSpec::Exact("beta".into())).as_deref(),
            Some("2.0.0-beta.1")
        );
        assert_eq!(
            select_version(&doc, &VersionSpec::Range("^1.0".into())).as_deref(),
            Some("1.2.0")
        );
        assert_eq!(select_version(&doc, &VersionSpec::Exact("9.9.9".into())), None);
    }

    #[test]
    fn scoped_package_url_is_encoded() {
        assert_eq!(
            RegistryClient::package_url("https://r.example/", Some("acme"), "pdf"),
            "https://r.example/@acme%2Fpdf"
        );
        assert_eq!(
            RegistryClient::package_url("https://r.example", None, "pdf"),
            "https://r.example/pdf"
        );
    }

    #[test]
    fn token_is_scoped_to_registry_host() {
        assert!(same_host("https://r.example/a.tgz", "https://r.example"));
        assert!(!same_host("https://cdn.example/a.tgz", "https://r.example"));
        assert!(!same_host("http://r.example:8080/a", "http://r.example"));
    }

    /// Serves one JSON document and records the Authorization header.
    fn serve_once(body: String) -> (String, Arc<Mutex<Option<String>>>, thread::JoinHandle<()>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
        let addr = server.server_addr().to_ip().expect("ip listener");
        let seen = Arc::new(Mutex::new(None));
        let seen_in_thread = Arc::clone(&seen);
        let handle = thread::spawn(move || {
            if let Ok(request) = server.recv() {
                let auth = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.to_string());
                *seen_in_thread.lock().expect("lock") = auth;
                let _ = request.respond(tiny_http::Response::from_string(body));
            }
        });
        (format!("http://{addr}"), seen, handle)
    }

    #[tokio::test]
    async fn resolves_against_a_live_registry() {
        let document = serde_json::json!({
            "dist-tags": {"latest": "1.0.0"},
            "versions": {
                "1.0.0": {"dist": {"tarball": "http://elsewhere/p.tgz", "integrity": "sha512-x"}}
            }
        });
        let (base, seen, handle) = serve_once(document.to_string());
        let settings = Settings {
            registry_url: base.clone(),
            token: Some("secret".into()),
            ..Settings::default()
        };
        let client = RegistryClient::new(&settings).expect("client");
        let parsed = ParsedReference::parse("@acme/pdf").expect("parse");

        let release = client.resolve(&parsed, &base).await.expect("resolve");
        handle.join().expect("server thread");

        assert_eq!(release.version, "1.0.0");
        assert_eq!(release.tarball, "http://elsewhere/p.tgz");
        assert_eq!(release.integrity.as_deref(), Some("sha512-x"));
        assert_eq!(seen.lock().expect("lock").as_deref(), Some("Bearer secret"));
    }
}
