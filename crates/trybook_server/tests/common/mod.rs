#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use trybook_backend::{AgentRegistry, ServiceOptions};
use trybook_domain::AgentModel;
use trybook_server::{AuthConfig, ServerConfig, StartedServer};

pub struct TestServer {
    pub server: StartedServer,
    pub client: reqwest::Client,
    pub dir: tempfile::TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.server.addr)
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    pub async fn create_notebook(&self, input: &str) -> serde_json::Value {
        let resp = self
            .client
            .post(self.url("/api/notebooks"))
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        resp.json().await.unwrap()
    }

    pub async fn append(&self, nb: &str, prompt: &str) -> u64 {
        let resp = self
            .client
            .post(self.url(&format!("/api/notebooks/{nb}/entries")))
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = resp.json().await.unwrap();
        body["index"].as_u64().unwrap()
    }

    pub async fn run_request(&self, nb: &str, idx: &str, model: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/run"))
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(format!("nb={nb}&idx={idx}&model={model}"))
            .send()
            .await
            .unwrap()
    }

    /// Runs to completion and returns the streamed body.
    pub async fn run(&self, nb: &str, idx: u64, model: &str) -> String {
        let resp = self.run_request(nb, &idx.to_string(), model).await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        resp.text().await.unwrap()
    }

    pub async fn notebook(&self, nb: &str) -> serde_json::Value {
        let resp = self
            .client
            .get(self.url(&format!("/api/notebooks/{nb}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        resp.json().await.unwrap()
    }

    pub async fn head(&self, nb: &str) -> String {
        let resp = self
            .client
            .get(self.url(&format!("/api/head?nb={nb}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        resp.text().await.unwrap()
    }
}

pub async fn start(auth: AuthConfig) -> TestServer {
    start_with_shutdown(auth, std::future::pending()).await
}

pub async fn start_with_shutdown(
    auth: AuthConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let remotes = dir.path().join("remotes");
    let bin = dir.path().join("bin");
    std::fs::create_dir_all(&remotes).unwrap();
    std::fs::create_dir_all(&bin).unwrap();
    bare_remote(&remotes, "acme", "widgets");

    let agents = AgentRegistry::default()
        .with_executable(AgentModel::Router, fake_agent(&bin, "llm", ROUTER_SCRIPT))
        .with_executable(AgentModel::Gemini, fake_agent(&bin, "gemini", GEMINI_SCRIPT))
        .with_executable(AgentModel::Claude, fake_agent(&bin, "claude", CLAUDE_SCRIPT))
        .with_executable(AgentModel::Aider, fake_agent(&bin, "aider", AIDER_SCRIPT));

    let mut service = ServiceOptions::with_root(dir.path().join("root"));
    service.remote_base = format!("file://{}", remotes.display());
    service.git_timeout = Duration::from_secs(60);
    service.agents = agents;

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server =
        trybook_server::start_server_with_shutdown(addr, ServerConfig { auth, service }, shutdown)
            .await
            .unwrap();

    TestServer {
        server,
        client: reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap(),
        dir,
    }
}

/// Router: `$3` is the wrapped prompt.
const ROUTER_SCRIPT: &str = r#"case "$3" in
  *"add input validation"*) echo "Edit" ;;
  *) echo "question" ;;
esac"#;

/// Gemini: `$2` is the prompt.
const GEMINI_SCRIPT: &str = r#"case "$2" in
  *"sleep"*) echo "thinking"; exec sleep 30 ;;
  *"fail"*) echo "partial gemini"; exit 4 ;;
esac
echo "gemini: $2""#;

/// Claude reads the prompt from stdin.
const CLAUDE_SCRIPT: &str = r#"printf 'claude: '
cat"#;

/// Aider: the prompt is the last argument; it commits to the worktree.
const AIDER_SCRIPT: &str = r#"for arg in "$@"; do last="$arg"; done
echo "$last" >> NOTES.md
git add NOTES.md
git -c user.name=aider -c user.email=aider@example.invalid commit -q -m "$last"
echo "applied: $last""#;

pub fn fake_agent(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "trybook")
        .env("GIT_AUTHOR_EMAIL", "trybook@example.invalid")
        .env("GIT_COMMITTER_NAME", "trybook")
        .env("GIT_COMMITTER_EMAIL", "trybook@example.invalid")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn bare_remote(remotes: &Path, org: &str, repo: &str) {
    let seed = remotes.join(format!(".seed-{org}-{repo}"));
    std::fs::create_dir_all(&seed).unwrap();
    git(&seed, &["init", "-q"]);
    git(&seed, &["checkout", "-q", "-b", "main"]);
    std::fs::write(seed.join("README.md"), format!("# {repo}\n")).unwrap();
    git(&seed, &["add", "README.md"]);
    git(&seed, &["commit", "-q", "-m", "initial"]);

    let bare = remotes.join(org).join(format!("{repo}.git"));
    std::fs::create_dir_all(bare.parent().unwrap()).unwrap();
    git(
        remotes,
        &[
            "clone",
            "-q",
            "--bare",
            seed.to_str().unwrap(),
            bare.to_str().unwrap(),
        ],
    );
}
