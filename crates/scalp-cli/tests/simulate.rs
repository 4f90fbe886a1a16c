use assert_cmd::Command;
use scalp_lib::io::read_csv_matrix;
use serde_json::Value;
use tempfile::tempdir;

#[test]
fn simulate_writes_a_readable_matrix() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("synthetic.csv");
    let mut cmd = Command::cargo_bin("scalp").unwrap();
    cmd.args([
        "simulate",
        "--channels",
        "3",
        "--seconds",
        "2",
        "--fs",
        "128",
        "--seed",
        "7",
        "--out",
        out.to_str().unwrap(),
    ]);
    let stdout = cmd.assert().success().get_output().stdout.clone();
    let summary: Value = serde_json::from_slice(&stdout).unwrap();
    assert_eq!(summary["channels"], 3);
    assert_eq!(summary["samples"], 256);
    let matrix = read_csv_matrix(&out).unwrap();
    assert_eq!(matrix.channel_count(), 3);
    assert_eq!(matrix.sample_count(), 256);
}

#[test]
fn same_seed_reproduces_the_recording() {
    let temp = tempdir().unwrap();
    let first = temp.path().join("first.csv");
    let second = temp.path().join("second.csv");
    for path in [&first, &second] {
        Command::cargo_bin("scalp")
            .unwrap()
            .args([
                "simulate",
                "--channels",
                "2",
                "--seconds",
                "1",
                "--fs",
                "64",
                "--seed",
                "42",
                "--out",
                path.to_str().unwrap(),
            ])
            .assert()
            .success();
    }
    assert_eq!(
        read_csv_matrix(&first).unwrap(),
        read_csv_matrix(&second).unwrap()
    );
}
