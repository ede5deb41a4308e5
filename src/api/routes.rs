//! Router, shared state and server lifecycle.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::pages;
use super::upload::{self, FORM_OVERHEAD_BYTES};
use crate::catalog::TaskCatalog;
use crate::config::Config;
use crate::groups::GroupDirectory;
use crate::storage::SubmissionStore;
use crate::templates::Templates;

/// Shared application state. Read-only once the server is running.
pub struct AppState {
    pub config: Config,
    /// Ordered task list
    pub catalog: TaskCatalog,
    /// Token -> group mapping
    pub groups: GroupDirectory,
    pub templates: Templates,
    /// Per-group submission storage
    pub store: SubmissionStore,
}

impl AppState {
    /// Load the catalog, group directory and templates named by `config`.
    pub fn load(config: Config) -> anyhow::Result<Self> {
        let catalog = TaskCatalog::load(&config.tasks_file)?;
        tracing::info!(
            "Loaded {} tasks from {}",
            catalog.len(),
            config.tasks_file.display()
        );

        let groups = GroupDirectory::load(&config.groups_file)?;
        tracing::info!(
            "Loaded {} tokens from {}",
            groups.len(),
            config.groups_file.display()
        );

        let templates = Templates::load(&config.template_path)
            .with_context(|| format!("Failed to load templates from {}", config.template_path.display()))?;

        let store = SubmissionStore::new(config.storage_path.clone());
        tracing::info!("Storing submissions under {}", store.root().display());

        Ok(Self {
            config,
            catalog,
            groups,
            templates,
            store,
        })
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_add(FORM_OVERHEAD_BYTES)
        .try_into()
        .unwrap_or(usize::MAX);

    let upload_route = Router::new()
        .route("/upload", post(upload::upload))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        .route("/", get(pages::index))
        .route("/tasks", get(pages::list_tasks))
        .route("/event", get(pages::event))
        .merge(upload_route)
        .nest_service("/static", ServeDir::new(&state.config.static_path))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::load(config)?);
    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Task, TaskKind};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use tower::ServiceExt;

    const BOUNDARY: &str = "bingo-test-boundary";

    struct TestApp {
        _dir: tempfile::TempDir,
        app: Router,
        storage: PathBuf,
    }

    fn test_app() -> TestApp {
        let dir = tempfile::tempdir().expect("tempdir");
        let template_path = dir.path().join("template");
        let static_path = dir.path().join("static");
        std::fs::create_dir_all(&template_path).unwrap();
        std::fs::create_dir_all(&static_path).unwrap();
        std::fs::write(template_path.join("index.tmpl"), "<h1>Rally</h1>").unwrap();
        std::fs::write(
            template_path.join("event.tmpl"),
            "{{ group }}|{{ token }}|{% for t in tasks %}[{{ t.id }}:{{ t.task }}:{{ t.type }}]{% endfor %}",
        )
        .unwrap();
        std::fs::write(static_path.join("style.css"), "body { color: red; }").unwrap();

        let config = Config {
            template_path: template_path.clone(),
            static_path,
            storage_path: dir.path().join("storage"),
            ..Config::default()
        };
        let catalog = TaskCatalog::from_tasks(vec![
            Task::new("Find a red car", TaskKind::Image),
            Task::new("Name the dean", TaskKind::Text),
        ]);
        let groups = GroupDirectory::new(HashMap::from([(
            "abc123".to_string(),
            "teamA".to_string(),
        )]))
        .unwrap();

        let state = AppState {
            store: SubmissionStore::new(config.storage_path.clone()),
            templates: Templates::load(&template_path).unwrap(),
            catalog,
            groups,
            config,
        };
        let storage = state.config.storage_path.clone();
        TestApp {
            _dir: dir,
            app: router(Arc::new(state)),
            storage,
        }
    }

    fn multipart_body(fields: &[(&str, &str)], files: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        for file in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"photo.jpg\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(file);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn post_multipart(app: &Router, fields: &[(&str, &str)], files: &[&[u8]]) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/upload")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={BOUNDARY}"),
                    )
                    .body(Body::from(multipart_body(fields, files)))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn post_form(app: &Router, body: &str) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/upload")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(res: Response) -> String {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn stored_files(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn file_upload_is_stored_under_group_and_redirects() {
        let t = test_app();
        let bytes: &[u8] = b"\x89PNG fake image bytes";
        let res = post_multipart(&t.app, &[("task", "0"), ("token", "abc123")], &[bytes]).await;

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            res.headers().get(header::LOCATION).unwrap(),
            "/event?token=abc123"
        );

        let files = stored_files(&t.storage.join("teamA"));
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_str().unwrap().to_string();
        let timestamp = name
            .strip_prefix("0_")
            .and_then(|n| n.strip_suffix(".image"))
            .expect("name is {task}_{timestamp}.{kind}");
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert_eq!(std::fs::read(&files[0]).unwrap(), bytes);
        assert!(stored_files(&t.storage.join(".staging")).is_empty());
    }

    #[tokio::test]
    async fn upload_at_limit_succeeds_and_one_byte_more_fails() {
        let t = test_app();
        let limit = crate::config::DEFAULT_MAX_UPLOAD_BYTES as usize;

        let exact = vec![7u8; limit];
        let res = post_multipart(&t.app, &[("task", "0"), ("token", "abc123")], &[exact.as_slice()]).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let over = vec![7u8; limit + 1];
        let res = post_multipart(&t.app, &[("task", "0"), ("token", "abc123")], &[over.as_slice()]).await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_text(res).await, "maximum file size is 10.000MB");

        assert_eq!(stored_files(&t.storage.join("teamA")).len(), 1);
        assert!(stored_files(&t.storage.join(".staging")).is_empty());
    }

    #[tokio::test]
    async fn task_field_is_validated() {
        let t = test_app();

        let res = post_multipart(&t.app, &[("token", "abc123")], &[b"x".as_slice()]).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(res).await, "task id missing");

        for bad in ["zero", "-1", "", "1.5"] {
            let res = post_multipart(&t.app, &[("task", bad), ("token", "abc123")], &[b"x".as_slice()]).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_text(res).await, "invalid task id");
        }
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let t = test_app();
        let res = post_multipart(&t.app, &[("task", "2"), ("token", "abc123")], &[b"x".as_slice()]).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(res).await, "task does not exist");
    }

    #[tokio::test]
    async fn token_is_required_and_must_be_known() {
        let t = test_app();

        let res = post_multipart(&t.app, &[("task", "0")], &[b"x".as_slice()]).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(res).await, "token is missing");

        for task in ["0", "99"] {
            let res =
                post_multipart(&t.app, &[("task", task), ("token", "stranger")], &[b"x".as_slice()]).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_text(res).await, "invalid token");
        }
        assert!(stored_files(&t.storage).iter().all(|p| p.ends_with(".staging")));
    }

    #[tokio::test]
    async fn exactly_one_file_is_required() {
        let t = test_app();

        let res = post_multipart(&t.app, &[("task", "0"), ("token", "abc123")], &[]).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(res).await, "missing file");

        let res =
            post_multipart(&t.app, &[("task", "0"), ("token", "abc123")], &[b"a".as_slice(), b"b".as_slice()]).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(res).await, "only one file may be uploaded");
        assert!(stored_files(&t.storage.join("teamA")).is_empty());
    }

    #[tokio::test]
    async fn file_part_with_empty_filename_is_missing_file() {
        let t = test_app();
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"task\"\r\n\r\n0\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"token\"\r\n\r\nabc123\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\r\n\
             --{BOUNDARY}--\r\n"
        );
        let res = t
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/upload")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={BOUNDARY}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(res).await, "missing file");
        assert!(stored_files(&t.storage.join("teamA")).is_empty());
    }

    #[tokio::test]
    async fn rejected_uploads_leave_no_staging_files() {
        let t = test_app();

        let res = post_multipart(&t.app, &[("task", "0"), ("token", "nope")], &[b"x".as_slice()]).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let res = post_multipart(&t.app, &[("task", "9"), ("token", "abc123")], &[b"x".as_slice()]).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let res =
            post_multipart(&t.app, &[("task", "0"), ("token", "abc123")], &[b"a".as_slice(), b"b".as_slice()]).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        assert!(stored_files(&t.storage.join(".staging")).is_empty());
        assert!(stored_files(&t.storage.join("teamA")).is_empty());
    }

    #[tokio::test]
    async fn request_over_body_limit_is_too_large() {
        let t = test_app();
        let limit = crate::config::DEFAULT_MAX_UPLOAD_BYTES as usize + FORM_OVERHEAD_BYTES as usize;

        let body = format!("task=1&token=abc123&text={}", "a".repeat(limit));
        let res = post_form(&t.app, &body).await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_text(res).await, "maximum file size is 10.000MB");

        let padding = "b".repeat(limit);
        let res = post_multipart(
            &t.app,
            &[("task", "0"), ("token", "abc123"), ("note", padding.as_str())],
            &[b"x".as_slice()],
        )
        .await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_text(res).await, "maximum file size is 10.000MB");

        assert!(stored_files(&t.storage.join("teamA")).is_empty());
        assert!(stored_files(&t.storage.join(".staging")).is_empty());
    }

    #[tokio::test]
    async fn content_type_is_validated() {
        let t = test_app();

        let res = t
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/upload")
                    .body(Body::from("task=0"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(res).await, "no content-type specified");

        for (content_type, expected) in [
            ("application/json", "invalid content type"),
            ("multipart/form-data", "invalid boundary"),
            ("multipart/form-data; boundary=", "invalid boundary"),
        ] {
            let res = t
                .app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/upload")
                        .header(header::CONTENT_TYPE, content_type)
                        .body(Body::from("{}"))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_text(res).await, expected);
        }
    }

    #[tokio::test]
    async fn text_answer_is_stored_verbatim() {
        let t = test_app();
        let res = post_form(&t.app, "task=1&token=abc123&text=Professor+Plum%21").await;

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            res.headers().get(header::LOCATION).unwrap(),
            "/event?token=abc123"
        );
        let files = stored_files(&t.storage.join("teamA"));
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("1_") && name.ends_with(".text"));
        assert_eq!(std::fs::read_to_string(&files[0]).unwrap(), "Professor Plum!");
    }

    #[tokio::test]
    async fn text_answer_must_not_be_empty() {
        let t = test_app();
        for body in ["task=1&token=abc123", "task=1&token=abc123&text="] {
            let res = post_form(&t.app, body).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_text(res).await, "text is missing");
        }
    }

    #[tokio::test]
    async fn text_answer_over_limit_is_too_large() {
        let t = test_app();
        let limit = crate::config::DEFAULT_MAX_UPLOAD_BYTES as usize;

        let body = format!("task=1&token=abc123&text={}", "a".repeat(limit + 1));
        let res = post_form(&t.app, &body).await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_text(res).await, "maximum file size is 10.000MB");
        assert!(stored_files(&t.storage.join("teamA")).is_empty());

        let body = format!("task=1&token=abc123&text={}", "a".repeat(limit));
        let res = post_form(&t.app, &body).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn task_list_is_served_as_json() {
        let t = test_app();
        let res = get(&t.app, "/tasks").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body: serde_json::Value = serde_json::from_str(&body_text(res).await).unwrap();
        assert_eq!(
            body,
            serde_json::json!([
                {"task": "Find a red car", "type": "image"},
                {"task": "Name the dean", "type": "text"}
            ])
        );
    }

    #[tokio::test]
    async fn event_page_requires_a_known_token() {
        let t = test_app();

        for (uri, expected) in [
            ("/event", "token is missing"),
            ("/event?token=", "token is missing"),
            ("/event?token=stranger", "invalid token"),
        ] {
            let res = get(&t.app, uri).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_text(res).await, expected);
        }

        let res = get(&t.app, "/event?token=abc123").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            body_text(res).await,
            "teamA|abc123|[0:Find a red car:image][1:Name the dean:text]"
        );
    }

    #[tokio::test]
    async fn landing_page_and_static_assets() {
        let t = test_app();

        let res = get(&t.app, "/").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_text(res).await, "<h1>Rally</h1>");

        let res = get(&t.app, "/static/style.css").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_text(res).await, "body { color: red; }");

        let res = get(&t.app, "/static/missing.css").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
