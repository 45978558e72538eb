#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn canopyctl(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("canopyctl").unwrap();
    cmd.env_remove("CANOPY_CONFIG")
        .env("RUST_LOG", "warn")
        .arg("--db")
        .arg(db);
    cmd
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

fn file(id: &str, parent: &str, name: &str, size: u64, trashed: bool) -> Value {
    json!({
        "id": id,
        "parent_id": parent,
        "name": name,
        "is_trashed": trashed,
        "ctime": "2024-05-01T10:00:00Z",
        "mtime": "2024-05-02T10:00:00Z",
        "kind": "file",
        "mime_type": "text/plain",
        "hash": "abc123",
        "size": size,
    })
}

fn seed(db: &Path, temp: &TempDir) {
    canopyctl(db)
        .args(["init", "--root-id", "root"])
        .assert()
        .success();

    let changes = json!([
        {
            "action": "upsert",
            "node": {
                "id": "docs",
                "parent_id": "root",
                "name": "docs",
                "is_trashed": false,
                "ctime": "2024-05-01T10:00:00Z",
                "mtime": "2024-05-01T10:00:00Z",
                "kind": "directory",
            }
        },
        { "action": "upsert", "node": file("readme", "docs", "readme.txt", 120, false) },
        { "action": "upsert", "node": file("old", "docs", "old.txt", 80, true) },
        { "action": "upsert", "node": file("lost", "gone", "lost.txt", 5, false) },
    ]);
    let changes_path = temp.path().join("changes.json");
    fs::write(&changes_path, changes.to_string()).unwrap();

    let report = stdout_json(
        canopyctl(db)
            .arg("apply")
            .arg(&changes_path)
            .args(["--cursor", "page-1"]),
    );
    assert_eq!(report["applied"], 4);
    assert_eq!(report["cursor"], "page-1");
}

#[test]
fn init_creates_root_once() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("drive.sqlite");

    let root = stdout_json(canopyctl(&db).args(["init", "--root-id", "r1"]));
    assert_eq!(root["id"], "r1");
    assert_eq!(root["kind"], "directory");
    assert!(db.exists());

    // A second init keeps the existing root.
    let again = stdout_json(canopyctl(&db).args(["init", "--root-id", "r2"]));
    assert_eq!(again["id"], "r1");

    canopyctl(&db)
        .arg("cursor")
        .assert()
        .success()
        .stdout("\n");
}

#[test]
fn browse_seeded_tree() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("drive.sqlite");
    seed(&db, &temp);

    canopyctl(&db)
        .arg("cursor")
        .assert()
        .success()
        .stdout("page-1\n");

    let node = stdout_json(canopyctl(&db).args(["stat", "/docs/readme.txt"]));
    assert_eq!(node["id"], "readme");
    assert_eq!(node["size"], 120);

    let children = stdout_json(canopyctl(&db).args(["ls", "/docs"]));
    let names: Vec<&str> = children
        .as_array()
        .unwrap()
        .iter()
        .map(|node| node["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["old.txt", "readme.txt"]);

    canopyctl(&db)
        .args(["path", "readme"])
        .assert()
        .success()
        .stdout("/docs/readme.txt\n");

    let trashed = stdout_json(canopyctl(&db).arg("trash"));
    assert_eq!(trashed.as_array().unwrap().len(), 1);
    assert_eq!(trashed[0]["id"], "old");

    let found = stdout_json(canopyctl(&db).args(["find", r"^(readme|lost)\."]));
    assert_eq!(found.as_array().unwrap().len(), 2);

    let diagnosis = stdout_json(canopyctl(&db).arg("diagnose"));
    assert_eq!(diagnosis["uploaded_size"], 125);
    assert_eq!(diagnosis["orphans"][0]["id"], "lost");
    let shared: Vec<&str> = diagnosis["shared_parents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| node["id"].as_str().unwrap())
        .collect();
    assert_eq!(shared, ["docs"]);
}

#[test]
fn lookup_failures_are_reported() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("drive.sqlite");
    seed(&db, &temp);

    canopyctl(&db)
        .args(["stat", "/docs/missing.txt"])
        .assert()
        .failure()
        .stderr(contains("not found"));

    canopyctl(&db)
        .args(["stat", "docs"])
        .assert()
        .failure()
        .stderr(contains("invalid argument"));

    canopyctl(&db)
        .args(["find", "("])
        .assert()
        .failure()
        .stderr(contains("invalid pattern"));
}

#[test]
fn malformed_batch_leaves_cursor() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("drive.sqlite");
    seed(&db, &temp);

    let changes_path = temp.path().join("bad.json");
    fs::write(&changes_path, r#"[{"action": "rename"}]"#).unwrap();
    canopyctl(&db)
        .arg("apply")
        .arg(&changes_path)
        .args(["--cursor", "page-2"])
        .assert()
        .failure()
        .stderr(contains("failed to parse change actions"));

    canopyctl(&db)
        .arg("cursor")
        .assert()
        .success()
        .stdout("page-1\n");
}

#[test]
fn apply_reads_stdin() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("drive.sqlite");
    seed(&db, &temp);

    let changes = json!([{ "action": "remove", "id": "lost" }]);
    canopyctl(&db)
        .args(["apply", "-", "--cursor", "page-2"])
        .write_stdin(changes.to_string())
        .assert()
        .success();

    let diagnosis = stdout_json(canopyctl(&db).arg("diagnose"));
    assert_eq!(diagnosis["orphans"].as_array().unwrap().len(), 0);
}

#[test]
fn config_from_file_and_environment() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("from-file.sqlite");
    let config_path = temp.path().join("canopy.toml");
    fs::write(
        &config_path,
        format!(
            "[metadata]\ntype = \"blocking\"\npath = {:?}\nworkers = 2\n",
            db.display().to_string()
        ),
    )
    .unwrap();

    Command::cargo_bin("canopyctl")
        .unwrap()
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(&config_path)
        .args(["init", "--root-id", "cfg-root"])
        .assert()
        .success();
    assert!(db.exists());

    let env_db = temp.path().join("from-env.sqlite");
    Command::cargo_bin("canopyctl")
        .unwrap()
        .env_remove("CANOPY_CONFIG")
        .env("RUST_LOG", "warn")
        .env("CANOPY_METADATA__TYPE", "native")
        .env("CANOPY_METADATA__PATH", &env_db)
        .env("CANOPY_METADATA__LOCK_TIMEOUT_MS", "250")
        .args(["init", "--root-id", "env-root"])
        .assert()
        .success()
        .stdout(contains("env-root"));
    assert!(env_db.exists());

    Command::cargo_bin("canopyctl")
        .unwrap()
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(temp.path().join("missing.toml"))
        .arg("cursor")
        .assert()
        .failure()
        .stderr(contains("does not exist"));
}
