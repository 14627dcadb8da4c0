//! End-to-end runs of the coordinator against a wiremock backend.
//!
//! Server launching is disabled (`--no-launch`); the stub plays the role of
//! the already running backend.

use clap::Parser;
use fetch_harness::config::{Cli, Config};
use fetch_harness::coordinator::run;
use fetch_harness::errors::HarnessError;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn build_config(server: &MockServer, log_dir: &TempDir, extra: &[&str]) -> Config {
    let base = format!("{}/db", server.uri());
    let log_dir = log_dir.path().to_str().unwrap().to_string();
    let mut argv = vec![
        "fetch_harness",
        "fastapi",
        "db",
        "--no-launch",
        "--base-url",
        base.as_str(),
        "--log-dir",
        log_dir.as_str(),
    ];
    argv.extend_from_slice(extra);
    Config::try_from(Cli::try_parse_from(argv).unwrap()).unwrap()
}

fn lines_with_category<'a>(log: &'a str, needle: &str) -> Vec<&'a str> {
    log.lines().filter(|l| l.contains(needle)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_run_collects_every_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/db/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ja": "Fushigidane"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/db/[2-6]$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ja": "Other"})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = build_config(&server, &dir, &[]);
    let report = run(&config).await.expect("run should succeed");

    assert_eq!(report.succeeded, 6);
    assert_eq!(report.failed, 0);
    assert_eq!(report.results.len(), 6);
    let first = report.results.iter().find(|r| r.task_id == 1).unwrap();
    assert_eq!(first.value, "Fushigidane");

    let mut ids: Vec<u32> = report.results.iter().map(|r| r.task_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

    // At least eight per-task step events for each of the six tasks, plus the
    // coordinator's own events.
    assert!(report.events >= 8 * 6 + 20, "only {} events", report.events);

    let plain = std::fs::read_to_string(&report.plain_log).unwrap();
    let markup = std::fs::read_to_string(&report.markup_log).unwrap();
    assert_eq!(plain.lines().count() as u64, report.events);
    assert_eq!(
        markup.lines().filter(|l| l.starts_with("<span")).count() as u64,
        report.events
    );
    assert!(markup.ends_with("</pre></body></html>\n"));
    assert!(report
        .plain_log
        .ends_with("threads_fastapi_db_not_delay.log"));

    assert_eq!(lines_with_category(&plain, "task complete").len(), 6);
    assert_eq!(lines_with_category(&plain, "result: ").len(), 6);
    assert!(plain.contains("result: 1 -> Fushigidane"));
    assert!(plain.lines().last().unwrap().contains("all complete"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_task_is_logged_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/db/3"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "missing"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/db/[124-6]$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ja": "x"})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = build_config(&server, &dir, &[]);
    let report = run(&config).await.expect("task failures do not fail the run");

    assert_eq!(report.succeeded, 5);
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded + report.failed, 6);
    assert!(report.results.iter().all(|r| r.task_id != 3));

    let plain = std::fs::read_to_string(&report.plain_log).unwrap();
    let errors = lines_with_category(&plain, "fetch failed");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("404"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_more_tasks_than_workers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ja": "y"})))
        .expect(40)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = build_config(&server, &dir, &["--workers", "3", "--tasks", "40"]);
    let report = run(&config).await.unwrap();

    assert_eq!(report.succeeded, 40);
    assert_eq!(report.results.len(), 40);

    let plain = std::fs::read_to_string(&report.plain_log).unwrap();
    assert_eq!(lines_with_category(&plain, "shutdown signal received").len(), 3);
    assert_eq!(lines_with_category(&plain, "worker stopped").len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_backend_fails_every_task() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let base = format!("http://127.0.0.1:{}/json", port);
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().to_str().unwrap();
    let cli = Cli::try_parse_from([
        "fetch_harness",
        "flask",
        "json",
        "--no-launch",
        "--base-url",
        base.as_str(),
        "--log-dir",
        log_dir,
    ])
    .unwrap();
    let config = Config::try_from(cli).unwrap();

    let report = run(&config).await.unwrap();
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 6);
    assert!(report.results.is_empty());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_that_exits_early_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().to_str().unwrap();
    // `true` exits immediately, standing in for a server script that crashed.
    let cli = Cli::try_parse_from([
        "fetch_harness",
        "flask",
        "db",
        "--python",
        "true",
        "--settle-delay",
        "200ms",
        "--log-dir",
        log_dir,
    ])
    .unwrap();
    let config = Config::try_from(cli).unwrap();

    let err = run(&config).await.unwrap_err();
    assert!(matches!(err, HarnessError::ServerExited(_)));

    let plain = std::fs::read_to_string(config.plain_log_path()).unwrap();
    assert!(plain.contains("server not ready"));
    assert!(!plain.contains("starting workers"));
    let markup = std::fs::read_to_string(config.markup_log_path()).unwrap();
    assert!(markup.contains("<span class=\"error\">"));
    assert!(markup.ends_with("</pre></body></html>\n"));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_launched_server_is_terminated_after_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ja": "z"})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let base = format!("{}/db", server.uri());
    let log_dir = dir.path().join("log");
    let server_dir = dir.path().join("server");
    std::fs::create_dir_all(&server_dir).unwrap();
    // A shell script standing in for a long-running server process.
    std::fs::write(server_dir.join("flask_server.py"), "exec sleep 30\n").unwrap();

    let cli = Cli::try_parse_from([
        "fetch_harness",
        "flask",
        "db",
        "--python",
        "sh",
        "--server-dir",
        server_dir.to_str().unwrap(),
        "--settle-delay",
        "100ms",
        "--base-url",
        base.as_str(),
        "--log-dir",
        log_dir.to_str().unwrap(),
    ])
    .unwrap();
    let config = Config::try_from(cli).unwrap();

    let report = run(&config).await.unwrap();
    assert_eq!(report.succeeded, 6);

    let plain = std::fs::read_to_string(&report.plain_log).unwrap();
    assert!(plain.contains("server terminate sent"));
    assert!(plain.contains("server stopped"));
    let finish = plain.find("all complete").unwrap();
    let stop = plain.find("server stop start").unwrap();
    assert!(finish < stop);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ready_probe_waits_for_answering_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ja": "probe-ok"})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let base = format!("{}/db", server.uri());
    let log_dir = dir.path().join("log");
    let server_dir = dir.path().join("server");
    std::fs::create_dir_all(&server_dir).unwrap();
    std::fs::write(server_dir.join("fast_server.py"), "exec sleep 30\n").unwrap();

    let cli = Cli::try_parse_from([
        "fetch_harness",
        "fastapi",
        "db",
        "--python",
        "sh",
        "--server-dir",
        server_dir.to_str().unwrap(),
        "--settle-delay",
        "50ms",
        "--ready-probe",
        "--ready-timeout",
        "5s",
        "--base-url",
        base.as_str(),
        "--log-dir",
        log_dir.to_str().unwrap(),
    ])
    .unwrap();
    let config = Config::try_from(cli).unwrap();

    let report = run(&config).await.expect("probe should see the backend");
    assert_eq!(report.succeeded, 6);

    let plain = std::fs::read_to_string(&report.plain_log).unwrap();
    let probe = plain.find("readiness probe: ").unwrap();
    let answered = plain.find("server answered after").unwrap();
    let launched = plain.find("server launch complete").unwrap();
    let workers = plain.find("starting workers").unwrap();
    assert!(probe < answered && answered < launched && launched < workers);
    assert!(plain.contains(&format!("readiness probe: {}/1", base)));
}
