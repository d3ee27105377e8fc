use assert_cmd::prelude::*;
use std::process::Command;
use tempfile::TempDir;

#[test]
fn print_config_merges_file_and_environment() {
    let temp = TempDir::new().expect("tempdir");
    let config_path = temp.path().join("semindex.toml");
    std::fs::write(
        &config_path,
        "[chunker]\nchunk_size = 256\n\n[store]\nmax_vectors = 5000\n",
    )
    .expect("write config");

    Command::new(assert_cmd::cargo::cargo_bin!("semindex"))
        .env_remove("SEMINDEX_CONFIG")
        .env("SEMINDEX_CHUNK_OVERLAP", "20")
        .args(["--quiet", "--print-config", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicates::str::contains("chunk_size = 256"))
        .stdout(predicates::str::contains("overlap = 20"))
        .stdout(predicates::str::contains("max_vectors = 5000"))
        .stdout(predicates::str::contains("model_id = \"all-MiniLM-L6-v2\""));
}

#[test]
fn missing_config_file_fails_with_context() {
    let temp = TempDir::new().expect("tempdir");
    Command::new(assert_cmd::cargo::cargo_bin!("semindex"))
        .args(["--quiet", "--print-config", "--config"])
        .arg(temp.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicates::str::contains("Failed to load configuration"));
}

#[test]
fn invalid_override_is_rejected() {
    Command::new(assert_cmd::cargo::cargo_bin!("semindex"))
        .env_remove("SEMINDEX_CONFIG")
        .env("SEMINDEX_MAX_FAILURE_RATE", "2.0")
        .args(["--quiet", "--print-config"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("max_failure_rate"));
}
