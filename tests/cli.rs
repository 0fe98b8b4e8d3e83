use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon \
                             abandon abandon abandon abandon abandon about";

fn bin() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bitwill"));
    cmd.env_remove("BITWILL_CONFIG")
        .env_remove("BITWILL_DATA_DIR")
        .env_remove("BITWILL_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

fn import_known_wallet(data_dir: &Path) {
    bin()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["wallet", "import", "-"])
        .write_stdin(ABANDON_ABOUT)
        .assert()
        .success()
        .stdout(predicate::str::contains("wallet imported"));
}

#[test]
fn mnemonic_generate_prints_requested_word_count() {
    let out = bin()
        .args(["mnemonic", "generate", "--words", "24"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let phrase = String::from_utf8(out).unwrap();
    assert_eq!(phrase.split_whitespace().count(), 24);
}

#[test]
fn mnemonic_generate_rejects_odd_sizes() {
    bin()
        .args(["mnemonic", "generate", "--words", "13"])
        .assert()
        .failure();
}

#[test]
fn mnemonic_validate_sets_exit_code() {
    bin()
        .args(["mnemonic", "validate", ABANDON_ABOUT])
        .assert()
        .success()
        .stdout("valid\n");

    bin()
        .args(["mnemonic", "validate"])
        .args(["abandon"; 12])
        .assert()
        .failure()
        .stdout("invalid\n");
}

#[test]
fn password_check_reports_feedback() {
    bin()
        .args(["password", "check", "Str0ng!Passphrase"])
        .assert()
        .success()
        .stdout(predicate::str::contains("score: 5/5"));

    bin()
        .args(["password", "check", "short"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Include numbers"));
}

#[test]
fn password_generate_honors_length() {
    let out = bin()
        .args(["password", "generate", "--length", "20"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(String::from_utf8(out).unwrap().trim_end().chars().count(), 20);
}

#[test]
fn btc_conversions() {
    bin()
        .args(["btc", "format", "-5847392"])
        .assert()
        .success()
        .stdout("-0.05847392\n");

    bin()
        .args(["btc", "sats", "0.05847392"])
        .assert()
        .success()
        .stdout("5847392\n");

    bin()
        .args(["btc", "sats", "0.123456789"])
        .assert()
        .failure();
}

#[test]
fn wallet_import_then_show() {
    let dir = tempdir().unwrap();
    import_known_wallet(dir.path());
    assert!(dir.path().join("bitwill-wallet.json").exists());

    bin()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["wallet", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA"))
        .stdout(predicate::str::contains("xpub6BosfCnifzxcFwrSzQiqu2DBVTshkCXacvNsWGYJVVhhawA7d4R5WSWGFNbi8Aw6ZRc1brxMyWMzG3DSSSSoekkudhUd9yLb6qx39T9nMdj"));

    bin()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["wallet", "show", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"path\": \"m/44'/0'/0'/0/2\""))
        .stdout(predicate::str::contains("abandon").not());
}

#[test]
fn wallet_import_refuses_eighteen_words() {
    let dir = tempdir().unwrap();

    bin()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["wallet", "import", "-"])
        .write_stdin(
            "legal winner thank year wave sausage worth useful legal winner \
             thank year wave sausage worth useful legal will",
        )
        .assert()
        .failure();

    assert!(!dir.path().join("bitwill-wallet.json").exists());
}

#[test]
fn wallet_show_without_wallet_fails() {
    let dir = tempdir().unwrap();

    bin()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["wallet", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no wallet found"));
}

#[test]
fn wallet_create_with_auto_challenge() {
    let dir = tempdir().unwrap();

    bin()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["--network", "test"])
        .args(["wallet", "create", "--yes", "--accounts", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wallet created"))
        .stdout(predicate::str::contains("m/44'/1'/0'/0/1"))
        .stdout(predicate::str::contains("m/44'/1'/0'/0/2").not());

    bin()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["wallet", "create", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn add_account_branch_and_reset() {
    let dir = tempdir().unwrap();
    import_known_wallet(dir.path());

    bin()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["wallet", "add-account"])
        .assert()
        .success()
        .stdout(predicate::str::contains("m/44'/0'/0'/0/3"));

    bin()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["wallet", "branch", "internal"])
        .assert()
        .success()
        .stdout(predicate::str::contains("m/44'/0'/0'/1/3"));

    bin()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["wallet", "reset", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wallet removed"));

    assert!(!dir.path().join("bitwill-wallet.json").exists());
}

#[test]
fn text_backup_restores_into_another_directory() {
    let source = tempdir().unwrap();
    let target = tempdir().unwrap();
    let backup = source.path().join("seed.txt");
    import_known_wallet(source.path());

    bin()
        .arg("--data-dir")
        .arg(source.path())
        .args(["backup", "export-text"])
        .arg(&backup)
        .assert()
        .success();

    let text = std::fs::read_to_string(&backup).unwrap();
    assert!(text.starts_with("BITCOIN SEED PHRASE - KEEP SECURE"));
    assert!(text.contains("12. about"));

    // exporting twice never overwrites
    bin()
        .arg("--data-dir")
        .arg(source.path())
        .args(["backup", "export-text"])
        .arg(&backup)
        .assert()
        .failure();

    bin()
        .arg("--data-dir")
        .arg(target.path())
        .args(["backup", "import"])
        .arg(&backup)
        .assert()
        .success()
        .stdout(predicate::str::contains("1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA"));
}

#[test]
fn json_backup_needs_its_password() {
    let source = tempdir().unwrap();
    let target = tempdir().unwrap();
    let backup = source.path().join("backup.json");
    import_known_wallet(source.path());

    bin()
        .env("BITWILL_PASSWORD", "backup-pass")
        .arg("--data-dir")
        .arg(source.path())
        .args(["backup", "export-json"])
        .arg(&backup)
        .assert()
        .success();

    let json = std::fs::read_to_string(&backup).unwrap();
    assert!(json.contains("wallet-backup"));
    assert!(!json.contains("abandon"));

    bin()
        .env("BITWILL_PASSWORD", "other-pass")
        .arg("--data-dir")
        .arg(target.path())
        .args(["backup", "import"])
        .arg(&backup)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid password or corrupted data."));

    bin()
        .env("BITWILL_PASSWORD", "backup-pass")
        .arg("--data-dir")
        .arg(target.path())
        .args(["backup", "import"])
        .arg(&backup)
        .assert()
        .success()
        .stdout(predicate::str::contains("wallet restored"));
}

#[test]
fn qr_payload_round_trip() {
    let dir = tempdir().unwrap();
    import_known_wallet(dir.path());

    let out = bin()
        .env("BITWILL_PASSWORD", "qr-pass-123")
        .arg("--data-dir")
        .arg(dir.path())
        .args(["qr", "encode"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let payload = String::from_utf8(out).unwrap().trim().to_string();
    assert_eq!(payload.split(':').count(), 3);

    bin()
        .env("BITWILL_PASSWORD", "qr-pass-123")
        .args(["qr", "decode", &payload])
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{ABANDON_ABOUT}\n")));
}

#[test]
fn document_encrypt_inspect_decrypt() {
    let dir = tempdir().unwrap();
    let original = dir.path().join("will.txt");
    let package = dir.path().join("will.pkg");
    let restored = dir.path().join("restored.txt");
    std::fs::write(&original, b"Last will and testament of the key holder.").unwrap();

    bin()
        .env("BITWILL_PASSWORD", "weak")
        .args(["document", "encrypt"])
        .arg(&original)
        .arg("--out")
        .arg(&package)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Include numbers"));
    assert!(!package.exists());

    bin()
        .env("BITWILL_PASSWORD", "Str0ng!Passphrase")
        .args(["document", "encrypt"])
        .arg(&original)
        .arg("--out")
        .arg(&package)
        .assert()
        .success()
        .stdout(predicate::str::contains("42 Bytes"));

    bin()
        .args(["document", "inspect"])
        .arg(&package)
        .assert()
        .success()
        .stdout(predicate::str::contains("will.txt"))
        .stdout(predicate::str::contains("sha256:"));

    bin()
        .env("BITWILL_PASSWORD", "Str0ng!Passphrase")
        .args(["document", "decrypt"])
        .arg(&package)
        .arg("--out")
        .arg(&restored)
        .assert()
        .success()
        .stdout(predicate::str::contains("text/plain"));

    assert_eq!(
        std::fs::read(&restored).unwrap(),
        b"Last will and testament of the key holder."
    );
}

#[test]
fn config_file_selects_segwit() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("bitwill.json");
    std::fs::write(
        &config,
        format!(
            r#"{{ "data_dir": {:?}, "address_type": "p2wpkh", "account_count": 1 }}"#,
            dir.path().join("data")
        ),
    )
    .unwrap();

    bin()
        .arg("--config")
        .arg(&config)
        .args(["wallet", "import", "-"])
        .write_stdin(ABANDON_ABOUT)
        .assert()
        .success()
        .stdout(predicate::str::contains("bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"))
        .stdout(predicate::str::contains("m/84'/0'/0'/0/1").not());
}
