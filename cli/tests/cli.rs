use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn rocket(args: &[&str], dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rocket"))
        .args(args)
        .arg("--no-color")
        .current_dir(dir)
        .output()
        .expect("failed to run rocket")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn fixtures_pass() {
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let output = rocket(&["test", fixtures.to_str().unwrap()], Path::new("."));
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stderr(&output).contains("test result: ok."));
}

#[test]
fn single_category() {
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let output = rocket(
        &["test", fixtures.to_str().unwrap(), "--category", "macros"],
        Path::new("."),
    );
    assert!(output.status.success(), "{}", stderr(&output));
    let err = stderr(&output);
    assert!(err.contains("macros"));
    assert!(!err.contains("references"));
}

#[test]
fn new_then_build() {
    let dir = tempfile::tempdir().unwrap();
    let output = rocket(&["new", "handbook"], dir.path());
    assert!(output.status.success(), "{}", stderr(&output));

    let project = dir.path().join("handbook");
    fs::create_dir_all(project.join("content/guide")).unwrap();
    fs::write(
        project.join("content/guide/setup.rocket"),
        "(:h1 \"Setup\")\n\nBack to (:ref \"index#handbook\" \"the start\").",
    )
    .unwrap();

    let output = rocket(&["build", "--project", "handbook"], dir.path());
    assert!(output.status.success(), "{}", stderr(&output));

    let index = fs::read_to_string(project.join("build/index.html")).unwrap();
    assert!(index.contains("<title>handbook</title>"));
    assert!(index.contains("Welcome to version 0.1.0 of the documentation."));

    let setup = fs::read_to_string(project.join("build/guide/setup/index.html")).unwrap();
    assert!(setup.contains("<title>Setup - handbook</title>"));
    assert!(setup.contains("<a href=\"/#handbook\">the start</a>"));
}

#[test]
fn check_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    rocket(&["new", "docs"], dir.path());
    let output = rocket(&["build", "--project", "docs", "--check"], dir.path());
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(!dir.path().join("docs/build").exists());
}

#[test]
fn build_errors_are_reported_with_locations() {
    let dir = tempfile::tempdir().unwrap();
    rocket(&["new", "broken"], dir.path());
    fs::write(
        dir.path().join("broken/content/index.rocket"),
        "Fine.\n\n(:undefined-thing)\n",
    )
    .unwrap();

    let output = rocket(&["build", "--project", "broken"], dir.path());
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("unresolved name `undefined-thing`"), "{}", err);
    assert!(err.contains("index.rocket:3:1"), "{}", err);
    assert!(!dir.path().join("broken/build").exists());
}

#[test]
fn invalid_project_name() {
    let dir = tempfile::tempdir().unwrap();
    let output = rocket(&["new", "my-docs"], dir.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid project name"));
}
