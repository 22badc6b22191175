use assert_cmd::Command;
use tempfile::tempdir;

fn cmd(db_path: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("tranche-cli").unwrap();
    cmd.env("TRANCHE_DB_PATH", db_path);
    cmd.current_dir(db_path.parent().unwrap());
    cmd
}

fn stdout_of(command: &mut Command) -> String {
    let output = command.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap()
}

#[test]
fn init_creates_database() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("register.db");
    let out = stdout_of(cmd(&db).arg("init"));
    assert!(out.contains("initialized register"));
    assert!(db.exists());
}

#[test]
fn end_to_end_create_flow() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("register.db");

    cmd(&db).args(["bank", "add", "B001", "Bank 1"]).assert().success();

    let out = stdout_of(cmd(&db).args([
        "line",
        "add",
        "B001",
        "CHF",
        "80000000",
        "Yes",
        "2026-01-01",
    ]));
    assert!(out.contains("CL001"), "unexpected output: {out}");

    let out = stdout_of(cmd(&db).args([
        "advance",
        "add",
        "Bank 1",
        "CL001",
        "CHF",
        "10000000",
        "10000.0",
        "2026-01-10",
        "2026-02-10",
        "2026-02-05",
    ]));
    assert!(out.contains("FV0001"), "unexpected output: {out}");

    let out = stdout_of(cmd(&db).args(["seq", "credit_lines"]));
    assert!(out.contains("credit_lines = 1"));
}

#[test]
fn unknown_setting_key_is_rejected() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("register.db");
    cmd(&db)
        .args(["settings", "set", "favourite_colour", "blue"])
        .assert()
        .failure();
}
