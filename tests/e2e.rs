use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn have_system_ffmpeg() -> bool {
    which::which("ffmpeg").is_ok()
}

#[test]
fn rejects_a_malformed_recording_url() {
    let td = assert_fs::TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("bbb-recover").unwrap();
    cmd.arg("https://example.org/not/a/recording")
        .arg("--working-dir")
        .arg(td.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("does not look like a BBB playback link"));
}

#[test]
fn rejects_force_width_without_force_height() {
    let td = assert_fs::TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("bbb-recover").unwrap();
    cmd.arg("https://bbb.example.org/playback/presentation/2.3/1a2b3c4d-1111-2222-3333-444455556666")
        .arg("--working-dir")
        .arg(td.path())
        .arg("--force-width")
        .arg("1280");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--force-width and --force-height"));
}

#[test]
fn batch_mode_writes_failed_txt_for_unreachable_urls() {
    if !have_system_ffmpeg() {
        eprintln!("skipping: no system ffmpeg, and this test doesn't need a sidecar download");
        return;
    }
    let td = assert_fs::TempDir::new().unwrap();
    let list = td.child("urls.txt");
    list.write_str("https://bbb.invalid.example/playback/presentation/2.3/1a2b3c4d-1111-2222-3333-444455556666\n")
        .unwrap();
    let out_dir = td.child("out");

    let mut cmd = Command::cargo_bin("bbb-recover").unwrap();
    cmd.arg("--batch")
        .arg(list.path())
        .arg("--working-dir")
        .arg(td.path())
        .arg("--output-dir")
        .arg(out_dir.path());

    cmd.assert().success();
    out_dir.child("failed.txt").assert(predicate::path::exists());
}
