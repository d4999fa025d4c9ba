//! Registry and archive installs against a local HTTP server

use std::collections::HashMap;
use std::thread;

use skillpm_core::integrity;
use skillpm_core::{InstallOptions, InstallScope, InstallStatus, Settings, SkillError, SkillManager};

fn tarball(prefix: &str, body: &str) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in [("SKILL.md", body), ("scripts/run.sh", "echo run")] {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{prefix}{name}"), contents.as_bytes())
            .expect("append");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

/// Serves fixed bodies by request path until the test process exits.
fn serve(routes: impl FnOnce(&str) -> HashMap<String, Vec<u8>>) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
    let addr = server.server_addr().to_ip().expect("ip listener");
    let base = format!("http://{addr}");
    let routes = routes(&base);
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let response = match routes.get(request.url()) {
                Some(body) => tiny_http::Response::from_data(body.clone()),
                None => tiny_http::Response::from_data(b"not found".to_vec())
                    .with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });
    base
}

/// A registry publishing `pdf@1.0.0` with the given `dist.integrity`.
fn registry(integrity: impl FnOnce(&[u8]) -> String) -> String {
    let bytes = tarball("package/", "---\nname: pdf\ndescription: PDF tools\n---\n");
    let integrity = integrity(&bytes);
    serve(move |base| {
        let document = serde_json::json!({
            "name": "pdf",
            "dist-tags": {"latest": "1.0.0"},
            "versions": {
                "1.0.0": {
                    "dist": {"tarball": format!("{base}/pdf-1.0.0.tgz"), "integrity": integrity}
                }
            }
        });
        HashMap::from([
            ("/pdf".to_string(), document.to_string().into_bytes()),
            ("/pdf-1.0.0.tgz".to_string(), bytes),
        ])
    })
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    settings: Settings,
}

impl Fixture {
    fn new(registry_url: String) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("project");
        std::fs::create_dir_all(&root).expect("mkdir");
        let settings = Settings {
            cache_dir: dir.path().join("cache"),
            registry_url,
            ..Settings::default()
        };
        Self {
            root,
            settings,
            _dir: dir,
        }
    }

    fn manager(&self) -> SkillManager {
        SkillManager::open(&self.settings, InstallScope::project(&self.root)).expect("manager")
    }
}

#[tokio::test]
async fn registry_install_verifies_and_records_integrity() {
    let mut expected = String::new();
    let base = registry(|bytes| {
        expected = integrity::sri_sha256(bytes);
        expected.clone()
    });
    let fx = Fixture::new(base);
    let mut manager = fx.manager();

    let outcome = manager
        .install_one("pdf@1.0.0", &InstallOptions::default())
        .await
        .expect("install");
    assert_eq!(outcome.skill, "pdf");
    assert_eq!(outcome.version, "1.0.0");
    assert_eq!(outcome.status, InstallStatus::Installed);

    let installed = fx.root.join(".agents/skills/pdf");
    assert!(installed.join("SKILL.md").is_file());
    assert!(installed.join("scripts/run.sh").is_file());

    let entry = manager.lock().get("pdf").expect("locked");
    assert_eq!(entry.resolved_version, "1.0.0");
    assert_eq!(entry.integrity.as_deref(), Some(expected.as_str()));
    assert_eq!(manager.list_cached().expect("list").len(), 1);
}

#[tokio::test]
async fn integrity_mismatch_leaves_no_trace() {
    let base = registry(|_| integrity::sri_sha256(b"some other tarball"));
    let fx = Fixture::new(base);
    let mut manager = fx.manager();

    let err = manager
        .install_one("pdf@1.0.0", &InstallOptions::default())
        .await
        .expect_err("digest does not match");
    assert!(matches!(err, SkillError::Integrity { .. }), "got {err:?}");

    assert!(manager.list_cached().expect("list").is_empty());
    assert!(manager.lock().get("pdf").is_none());
    assert!(!fx.root.join(".agents/skills/pdf").exists());
    assert!(!fx.root.join("skills.lock").exists());
}

#[tokio::test]
async fn archive_url_installs_under_its_file_stem() {
    let bytes = tarball("", "---\nname: lint\n---\n");
    let base = serve(move |_| HashMap::from([("/lint.tar.gz".to_string(), bytes)]));
    let fx = Fixture::new("http://127.0.0.1:9".to_string());
    let mut manager = fx.manager();

    let reference = format!("{base}/lint.tar.gz");
    let outcome = manager
        .install_one(&reference, &InstallOptions::default())
        .await
        .expect("install");
    assert_eq!(outcome.skill, "lint");
    assert!(fx.root.join(".agents/skills/lint/SKILL.md").is_file());

    let entry = manager.lock().get("lint").expect("locked");
    assert!(entry.integrity.as_deref().is_some_and(|i| i.starts_with("sha256-")));

    let missing = manager
        .install_one(&format!("{base}/gone.tar.gz"), &InstallOptions::default())
        .await
        .expect_err("404");
    assert!(matches!(missing, SkillError::Network { .. }), "got {missing:?}");
}
