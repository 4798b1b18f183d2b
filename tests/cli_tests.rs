use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn settle_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("settle"))
}

const MEMBERSHIP: &str = "\
unit_code,billing_month,description,quantity,unit_price,excluded,bank_transfer,aigran,taxable
1110001,2025-11,Kids class,10,550,false,false,,
1110001,2025-11,Kids class,5,550,true,false,,
1110001,2025-11,Adult class,ten,550,,,,
";

/// Initialized config dir with the scenario membership rows in place.
fn setup() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settle-config");

    settle_cmd()
        .args(["-C", config_path.to_str().unwrap(), "init"])
        .assert()
        .success();

    fs::write(config_path.join("sources/membership.csv"), MEMBERSHIP).unwrap();
    (temp_dir, config_path)
}

fn generate(config_path: &Path, unit: &str) -> assert_cmd::assert::Assert {
    settle_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "generate",
            "--unit",
            unit,
            "--month",
            "2025-11",
            "--date",
            "2025-11-25",
        ])
        .assert()
}

#[test]
fn test_help() {
    settle_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Monthly invoice settlement"));
}

#[test]
fn test_version() {
    settle_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("settle"));
}

#[test]
fn test_init_creates_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settle-config");

    settle_cmd()
        .args(["-C", config_path.to_str().unwrap(), "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized settle config"));

    assert!(config_path.join("config.toml").exists());
    assert!(config_path.join("units.toml").exists());
    assert!(config_path.join("sources/membership.csv").exists());
    assert!(config_path.join("sources/material.csv").exists());
    assert!(config_path.join("sources/adjustment.csv").exists());
}

#[test]
fn test_init_fails_if_exists() {
    let (_temp_dir, config_path) = setup();

    settle_cmd()
        .args(["-C", config_path.to_str().unwrap(), "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_status_without_init() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nonexistent");

    settle_cmd()
        .args(["-C", config_path.to_str().unwrap(), "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_units_list() {
    let (_temp_dir, config_path) = setup();

    settle_cmd()
        .args(["-C", config_path.to_str().unwrap(), "units"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1110001"))
        .stdout(predicate::str::contains("Example Branch"))
        .stdout(predicate::str::contains("branch"));
}

#[test]
fn test_status() {
    let (_temp_dir, config_path) = setup();

    settle_cmd()
        .args(["-C", config_path.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Settlement Status"))
        .stdout(predicate::str::contains("Tax rate:         0.1"))
        .stdout(predicate::str::contains("Next invoice:"))
        .stdout(predicate::str::contains("-0001"));
}

#[test]
fn test_generate_unknown_unit() {
    let (_temp_dir, config_path) = setup();

    generate(&config_path, "9999999")
        .failure()
        .stderr(predicate::str::contains("Unit '9999999' not found"));
}

#[test]
fn test_generate_invalid_month() {
    let (_temp_dir, config_path) = setup();

    settle_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "generate",
            "--unit",
            "1110001",
            "--month",
            "2025-13",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid billing month '2025-13'"));
}

#[test]
fn test_generate_drops_excluded_and_reports_bad_rows() {
    let (_temp_dir, config_path) = setup();

    generate(&config_path, "1110001")
        .success()
        .stdout(predicate::str::contains("Generated 202511-0001"))
        .stdout(predicate::str::contains("Lines:      1"))
        .stdout(predicate::str::contains("Subtotal:   ¥5,500"))
        .stdout(predicate::str::contains("Tax:        ¥550"))
        .stdout(predicate::str::contains("Total:      ¥6,050"))
        .stdout(predicate::str::contains("Skipped rows: 1"))
        .stdout(predicate::str::contains("membership row 4"));

    assert!(config_path.join("state.toml").exists());
}

#[test]
fn test_generate_skips_only_own_bad_rows() {
    let (_temp_dir, config_path) = setup();
    let mut csv = MEMBERSHIP.to_string();
    csv.push_str("2220002,2025-11,Adult class,many,550,,,,\n");
    fs::write(config_path.join("sources/membership.csv"), csv).unwrap();

    generate(&config_path, "1110001")
        .success()
        .stdout(predicate::str::contains("Skipped rows: 1"))
        .stdout(predicate::str::contains("membership row 4"))
        .stdout(predicate::str::contains("membership row 5").not());
}

#[test]
fn test_regenerate_supersedes_previous_version() {
    let (_temp_dir, config_path) = setup();

    generate(&config_path, "1110001").success();
    generate(&config_path, "1110001")
        .success()
        .stdout(predicate::str::contains("Generated 202511-0002"))
        .stdout(predicate::str::contains("Supersedes: 202511-0001"));

    settle_cmd()
        .args(["-C", config_path.to_str().unwrap(), "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("202511-0002"))
        .stdout(predicate::str::contains("202511-0001").not());

    settle_cmd()
        .args(["-C", config_path.to_str().unwrap(), "list", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("superseded"))
        .stdout(predicate::str::contains("current"))
        .stdout(predicate::str::contains("Total: 2 invoices, ¥6,050 billed"));

    settle_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "show",
            "202511-0002",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"supersedes\": 1"))
        .stdout(predicate::str::contains("\"total_amount\": 6050"));
}

#[test]
fn test_missing_tax_rate_aborts_before_writing() {
    let (_temp_dir, config_path) = setup();
    fs::write(
        config_path.join("config.toml"),
        "[company]\nname = \"HQ\"\n\n[billing]\nrebate_rate = 10\n",
    )
    .unwrap();

    generate(&config_path, "1110001")
        .failure()
        .stderr(predicate::str::contains("tax_rate is missing"));

    assert!(!config_path.join("state.toml").exists());
}

#[test]
fn test_import_expenses_then_generate() {
    let (temp_dir, config_path) = setup();
    let csv = temp_dir.path().join("expenses.csv");
    fs::write(
        &csv,
        "unit_code,billing_month,date,description,amount,expense_type
1110001,2025-11,2025-11-03,Hall rental,8000,非課税分
1110001,2025-11,2025-11-31,Snacks,500,課税分
",
    )
    .unwrap();

    settle_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "import",
            csv.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Total:     2"))
        .stdout(predicate::str::contains("Succeeded: 1"))
        .stdout(predicate::str::contains("Failed:    1"))
        .stdout(predicate::str::contains("expense row 3"));

    // 5500 taxable + 8000 non-taxable; tax only on the membership line
    generate(&config_path, "1110001")
        .success()
        .stdout(predicate::str::contains("Subtotal:   ¥13,500"))
        .stdout(predicate::str::contains("Tax:        ¥550"))
        .stdout(predicate::str::contains("Total:      ¥14,050"));
}

#[test]
fn test_paid_period_rejects_expense_import() {
    let (temp_dir, config_path) = setup();
    generate(&config_path, "1110001").success();

    settle_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "mark",
            "202511-0001",
            "--status",
            "paid",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Marked 202511-0001 as PAID"));

    let csv = temp_dir.path().join("expenses.csv");
    fs::write(
        &csv,
        "unit_code,billing_month,date,description,amount,expense_type
1110001,2025-11,2025-11-03,Hall rental,8000,課税分
",
    )
    .unwrap();

    settle_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "import",
            csv.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Failed:    1"))
        .stdout(predicate::str::contains("is closed"));
}

#[test]
fn test_payment_reduces_remaining_on_regeneration() {
    let (_temp_dir, config_path) = setup();
    generate(&config_path, "1110001").success();

    settle_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "add-payment",
            "--unit",
            "1110001",
            "--month",
            "2025-11",
            "6000",
            "--date",
            "2025-11-28",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded ¥6,000 payment"));

    generate(&config_path, "1110001")
        .success()
        .stdout(predicate::str::contains("Remaining:  ¥50"));
}

#[test]
fn test_generate_all_reports_per_unit() {
    let (_temp_dir, config_path) = setup();
    fs::write(
        config_path.join("units.toml"),
        r#"[1110001]
name = "Example Branch"
unit_type = "branch"

[2220002]
name = "Example Classroom"
unit_type = "classroom"
"#,
    )
    .unwrap();

    settle_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "generate-all",
            "--month",
            "2025-11",
            "--date",
            "2025-11-25",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("1110001"))
        .stdout(predicate::str::contains("2220002"))
        .stdout(predicate::str::contains("202511-0001"))
        .stdout(predicate::str::contains("202511-0002"))
        .stdout(predicate::str::contains("Generated 2 of 2 units for 2025-11"));
}

#[test]
fn test_show_unknown_invoice() {
    let (_temp_dir, config_path) = setup();

    settle_cmd()
        .args(["-C", config_path.to_str().unwrap(), "show", "202511-0099"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invoice '202511-0099' not found"));
}
