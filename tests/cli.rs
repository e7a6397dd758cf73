//! End-to-end tests driving the `lxs` binary: init, load, classify,
//! aggregate, baseline, detect, stats.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn lxs_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("lxs");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    // Collector dump: three documents per day over ten quiet days plus an
    // elevated final day. source_id encodes the day so the classify fixture
    // can be keyed to the generated document ids later.
    let mut docs = String::new();
    for day in 1..=11 {
        for j in 0..3 {
            docs.push_str(&format!(
                concat!(
                    r#"{{"source":"forum","source_id":"d{:02}-{}","topic":"ai","#,
                    r#""created_at":"2024-06-{:02}T12:00:00Z","body":"the deadline is tomorrow"}}"#,
                    "\n"
                ),
                day, j, day
            ));
        }
    }
    fs::write(root.join("docs.jsonl"), docs).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/lxs.sqlite"

[aggregation]
min_samples = 2

[detection]
significance_level = 0.0001
control_windows = 3
seed = 42
"#,
        root.display()
    );

    let config_path = config_dir.join("lxs.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_lxs(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = lxs_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lxs binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// `(id, source_id)` for every stored document, read straight from the
/// database file the binary wrote.
fn stored_document_ids(root: &Path) -> Vec<(String, String)> {
    let db_path = root.join("data").join("lxs.sqlite");
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite:{}", db_path.display()))
            .await
            .unwrap();
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, source_id FROM documents ORDER BY source_id")
                .fetch_all(&pool)
                .await
                .unwrap();
        pool.close().await;
        rows
    })
}

/// Write a classifier fixture keyed by the real document ids: quiet scores
/// for days 1-10, elevated certainty on day 11.
fn write_scores_fixture(root: &Path, out: &Path) {
    let mut lines = String::new();
    for (id, source_id) in stored_document_ids(root) {
        let day: u32 = source_id[1..3].parse().unwrap();
        let certainty = if day == 11 {
            0.45
        } else {
            0.17 + 0.001 * day as f64
        };
        lines.push_str(&format!(
            "{{\"document_id\":\"{}\",\"scores\":{{\"certainty\":{}}}}}\n",
            id, certainty
        ));
    }
    fs::write(out, lines).unwrap();
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_lxs(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));

    let (_, stderr, ok) = run_lxs(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn full_pipeline_load_classify_detect() {
    let (tmp, config) = setup_test_env();
    let root = tmp.path();

    let (_, stderr, ok) = run_lxs(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);

    let docs = root.join("docs.jsonl");
    let (stdout, stderr, ok) = run_lxs(&config, &["load", docs.to_str().unwrap(), "--dry-run"]);
    assert!(ok, "dry-run load failed: {}", stderr);
    assert!(stdout.contains("documents found: 33"), "{}", stdout);

    let (stdout, stderr, ok) = run_lxs(&config, &["load", docs.to_str().unwrap(), "--limit", "5"]);
    assert!(ok, "limited load failed: {}", stderr);
    assert!(stdout.contains("documents upserted: 5"), "{}", stdout);

    let (stdout, stderr, ok) = run_lxs(&config, &["load", docs.to_str().unwrap()]);
    assert!(ok, "load failed: {}", stderr);
    assert!(stdout.contains("documents upserted: 33"), "{}", stdout);

    let scores = root.join("scores.jsonl");
    write_scores_fixture(root, &scores);
    let (stdout, stderr, ok) = run_lxs(
        &config,
        &["classify", scores.to_str().unwrap(), "--with-tokens"],
    );
    assert!(ok, "classify failed: {}", stderr);
    assert!(stdout.contains("documents classified: 33"), "{}", stdout);
    assert!(stdout.contains("word tokens written: 132"), "{}", stdout);

    // Each day's three documents share one vector, so the store holds one
    // record per day rather than one per document.
    assert!(stdout.contains("distinct classification records: 11"), "{}", stdout);

    let (stats_out, _, ok) = run_lxs(&config, &["stats"]);
    assert!(ok);
    assert!(stats_out.contains("Classified:      33 / 33"), "{}", stats_out);

    let (stdout, stderr, ok) = run_lxs(
        &config,
        &[
            "aggregate",
            "--from", "2024-06-01",
            "--to", "2024-06-30",
            "--group-by", "day",
        ],
    );
    assert!(ok, "aggregate failed: {}", stderr);
    assert!(stdout.contains("2024-06-01"), "{}", stdout);
    assert!(stdout.contains("2024-06-11"), "{}", stdout);

    let (stdout, stderr, ok) = run_lxs(
        &config,
        &[
            "baseline", "certainty",
            "--from", "2024-06-01",
            "--to", "2024-06-10",
        ],
    );
    assert!(ok, "baseline failed: {}", stderr);
    assert!(stdout.contains("days with data: 10"), "{}", stdout);

    let (stdout, stderr, ok) = run_lxs(
        &config,
        &[
            "detect", "certainty",
            "--from", "2024-06-11",
            "--to", "2024-06-11",
            "--baseline-from", "2024-06-01",
            "--baseline-to", "2024-06-10",
        ],
    );
    assert!(ok, "detect failed: {}", stderr);
    assert!(stdout.contains("window mean:"), "{}", stdout);
    assert!(stdout.contains("anomalous:"), "{}", stdout);

    // A window inside the reference period must be refused.
    let (_, stderr, ok) = run_lxs(
        &config,
        &[
            "detect", "certainty",
            "--from", "2024-06-05",
            "--to", "2024-06-06",
            "--baseline-from", "2024-06-01",
            "--baseline-to", "2024-06-10",
        ],
    );
    assert!(!ok);
    assert!(stderr.contains("overlaps"), "{}", stderr);
}

#[test]
fn reclassification_is_rejected_without_overwrite() {
    let (tmp, config) = setup_test_env();
    let root = tmp.path();

    run_lxs(&config, &["init"]);
    run_lxs(&config, &["load", root.join("docs.jsonl").to_str().unwrap()]);

    let scores = root.join("scores.jsonl");
    write_scores_fixture(root, &scores);
    run_lxs(&config, &["classify", scores.to_str().unwrap()]);

    // Second pass without --overwrite: everything is skipped, nothing fails.
    let (stdout, stderr, ok) = run_lxs(&config, &["classify", scores.to_str().unwrap()]);
    assert!(ok, "re-classify failed: {}", stderr);
    assert!(stdout.contains("documents classified: 0"), "{}", stdout);
    assert!(stdout.contains("skipped (already classified): 33"), "{}", stdout);
}
