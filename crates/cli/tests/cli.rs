use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const SCRIPT: &str = "
    initialize {
        initializeMutationRate(1e-6);
        initializeMutationType('m1', 0.5, 'f', 0.0);
        initializeGenomicElementType('g1', m1, 1.0);
        initializeGenomicElement(g1, 0, 9999);
        initializeRecombinationRate(1e-8);
    }
    1 early { sim.addSubpop('p1', 10); }
    5 late { print('generations done: ' + sim.generation); }
";

fn write_script(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("model.dms");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_runs_script_and_prints_output() {
    let temp = tempdir().unwrap();
    let script = write_script(&temp, SCRIPT);

    let mut cmd = Command::cargo_bin("demevo").unwrap();
    cmd.arg(&script)
        .arg("--seed")
        .arg("42")
        .assert()
        .success()
        .stdout(predicate::str::contains("generations done: 5"))
        .stderr(predicate::str::contains("// seed: 42"))
        .stderr(predicate::str::contains("finished at generation"));
}

#[test]
fn test_seed_reproducibility() {
    let temp = tempdir().unwrap();
    let script = write_script(
        &temp,
        "
        initialize {
            initializeMutationRate(1e-6);
            initializeMutationType('m1', 0.5, 'f', 0.0);
            initializeGenomicElementType('g1', m1, 1.0);
            initializeGenomicElement(g1, 0, 9999);
            initializeRecombinationRate(1e-8);
        }
        1 early { sim.addSubpop('p1', 10); }
        3 late { print(runif(1)); }
        ",
    );

    let run = || {
        let mut cmd = Command::cargo_bin("demevo").unwrap();
        let assert = cmd.arg(&script).arg("--seed").arg("7").assert().success();
        String::from_utf8(assert.get_output().stdout.clone()).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_dump_file_written() {
    let temp = tempdir().unwrap();
    let script = write_script(&temp, SCRIPT);
    let dump = temp.path().join("pop.txt");

    let mut cmd = Command::cargo_bin("demevo").unwrap();
    cmd.arg(&script)
        .arg("--seed")
        .arg("1")
        .arg("--dump")
        .arg(&dump)
        .assert()
        .success();

    let text = std::fs::read_to_string(&dump).unwrap();
    assert!(text.starts_with("#OUT:"));
    assert!(text.contains("Populations:"));
}

#[test]
fn test_generation_cap() {
    let temp = tempdir().unwrap();
    let script = write_script(&temp, SCRIPT);

    let mut cmd = Command::cargo_bin("demevo").unwrap();
    cmd.arg(&script)
        .arg("--seed")
        .arg("1")
        .arg("--generations")
        .arg("2")
        .assert()
        .success()
        .stderr(predicate::str::contains("finished at generation 3"));
}

#[test]
fn test_missing_script_fails() {
    let mut cmd = Command::cargo_bin("demevo").unwrap();
    cmd.arg("no-such-file.dms")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read script"));
}

#[test]
fn test_script_error_fails_with_position() {
    let temp = tempdir().unwrap();
    let script = write_script(
        &temp,
        "
        initialize {
            initializeMutationRate(1e-6);
            initializeMutationType('m1', 0.5, 'f', 0.0);
            initializeGenomicElementType('g1', m1, 1.0);
            initializeGenomicElement(g1, 0, 9999);
            initializeRecombinationRate(1e-8);
        }
        1 early { sim.addSubpop('p1', 10); }
        2 early { noSuchVariable + 1; }
        5 late { }
        ",
    );

    let mut cmd = Command::cargo_bin("demevo").unwrap();
    cmd.arg(&script)
        .arg("--seed")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("name error"));
}
