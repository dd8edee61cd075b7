use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn bin() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pwcrypt"));
    cmd.env_remove("PWCRYPT_TIER").env_remove("RUST_LOG");
    cmd
}

// low-cost parameters so the tests don't spend their time in PBKDF2
fn encrypt(input: &Path, output: &Path, password: &str) -> assert_cmd::assert::Assert {
    bin()
        .env("PWCRYPT_PASSWORD", password)
        .arg("encrypt")
        .arg(input)
        .arg(output)
        .args(["--key-bits", "128", "--iterations", "10", "--salt-size", "16"])
        .assert()
}

fn decrypt(input: &Path, output: &Path, password: &str) -> assert_cmd::assert::Assert {
    bin()
        .env("PWCRYPT_PASSWORD", password)
        .arg("decrypt")
        .arg(input)
        .arg(output)
        .assert()
}

#[test]
fn encrypt_then_decrypt_roundtrip() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    let sealed = dir.path().join("plain.txt.pwcr");
    let restored = dir.path().join("restored.txt");
    fs::write(&plain, "hello world\n".repeat(1000)).unwrap();

    encrypt(&plain, &sealed, "pw")
        .success()
        .stdout(predicate::str::contains("encrypted 12000 bytes"));

    let container = fs::read(&sealed).unwrap();
    assert_eq!(&container[..4], b"PWCR");

    decrypt(&sealed, &restored, "pw")
        .success()
        .stdout(predicate::str::contains("decrypted 12000 bytes"));

    assert_eq!(fs::read(&plain).unwrap(), fs::read(&restored).unwrap());
}

#[test]
fn password_can_be_piped() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    let sealed = dir.path().join("sealed.pwcr");
    let restored = dir.path().join("restored.txt");
    fs::write(&plain, b"piped").unwrap();

    bin()
        .env_remove("PWCRYPT_PASSWORD")
        .arg("encrypt")
        .arg(&plain)
        .arg(&sealed)
        .args(["--tier", "minimum"])
        .write_stdin("from stdin\n")
        .assert()
        .success();

    bin()
        .env_remove("PWCRYPT_PASSWORD")
        .arg("decrypt")
        .arg(&sealed)
        .arg(&restored)
        .write_stdin("from stdin\n")
        .assert()
        .success();

    assert_eq!(fs::read(&restored).unwrap(), b"piped");
}

#[test]
fn wrong_password_fails() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    let sealed = dir.path().join("sealed.pwcr");
    let restored = dir.path().join("restored.txt");
    fs::write(&plain, b"secret").unwrap();

    encrypt(&plain, &sealed, "right").success();

    decrypt(&sealed, &restored, "wrong")
        .failure()
        .stderr(predicate::str::contains("invalid password"));

    assert!(!restored.exists());
}

#[test]
fn existing_output_needs_force() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    let sealed = dir.path().join("sealed.pwcr");
    fs::write(&plain, b"data").unwrap();
    fs::write(&sealed, b"keep me").unwrap();

    encrypt(&plain, &sealed, "pw")
        .failure()
        .stderr(predicate::str::contains("--force"));
    assert_eq!(fs::read(&sealed).unwrap(), b"keep me");

    bin()
        .env("PWCRYPT_PASSWORD", "pw")
        .arg("encrypt")
        .arg(&plain)
        .arg(&sealed)
        .args(["--tier", "minimum", "--force"])
        .assert()
        .success();
    assert_eq!(&fs::read(&sealed).unwrap()[..4], b"PWCR");
}

#[test]
fn incomplete_custom_parameters_fail() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    fs::write(&plain, b"data").unwrap();

    bin()
        .env("PWCRYPT_PASSWORD", "pw")
        .arg("encrypt")
        .arg(&plain)
        .arg(dir.path().join("out.pwcr"))
        .args(["--key-bits", "256"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn inspect_shows_parameters_without_password() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    let sealed = dir.path().join("sealed.pwcr");
    fs::write(&plain, b"data").unwrap();

    bin()
        .env("PWCRYPT_PASSWORD", "pw")
        .arg("encrypt")
        .arg(&plain)
        .arg(&sealed)
        .args(["--key-bits", "192", "--iterations", "12", "--salt-size", "8"])
        .args(["--mode", "cbc", "--no-compress"])
        .assert()
        .success();

    bin()
        .env_remove("PWCRYPT_PASSWORD")
        .arg("inspect")
        .arg(&sealed)
        .assert()
        .success()
        .stdout(predicate::str::contains("AES-CBC"))
        .stdout(predicate::str::contains("compressed:  no"))
        .stdout(predicate::str::contains("192 bits"))
        .stdout(predicate::str::contains("iterations:  12"));
}

#[test]
fn digest_is_recorded_and_used_for_decryption() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    fs::write(&plain, b"digest").unwrap();

    for (digest, label) in [
        ("sha1", "PBKDF2-HMAC-SHA1"),
        ("sha256", "PBKDF2-HMAC-SHA256"),
        ("sha512", "PBKDF2-HMAC-SHA512"),
    ] {
        let sealed = dir.path().join(format!("{digest}.pwcr"));
        let restored = dir.path().join(format!("{digest}.txt"));

        bin()
            .env("PWCRYPT_PASSWORD", "pw")
            .arg("encrypt")
            .arg(&plain)
            .arg(&sealed)
            .args(["--tier", "minimum", "--digest", digest])
            .assert()
            .success();

        bin()
            .arg("inspect")
            .arg(&sealed)
            .assert()
            .success()
            .stdout(predicate::str::contains(label));

        decrypt(&sealed, &restored, "pw").success();
        assert_eq!(fs::read(&restored).unwrap(), b"digest");
    }
}

#[test]
fn inspect_rejects_non_container() {
    let dir = tempdir().unwrap();
    let junk = dir.path().join("junk.bin");
    fs::write(&junk, b"definitely not a container").unwrap();

    bin()
        .arg("inspect")
        .arg(&junk)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a pwcrypt container"));
}

#[test]
fn progress_is_printed_to_stderr() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.bin");
    let sealed = dir.path().join("sealed.pwcr");
    fs::write(&plain, vec![1u8; 300_000]).unwrap();

    bin()
        .env("PWCRYPT_PASSWORD", "pw")
        .arg("encrypt")
        .arg(&plain)
        .arg(&sealed)
        .args(["--tier", "minimum", "--progress"])
        .assert()
        .success()
        .stderr(predicate::str::contains("100%"));
}

#[test]
fn same_input_and_output_is_rejected() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    fs::write(&plain, b"data").unwrap();

    encrypt(&plain, &plain, "pw")
        .failure()
        .stderr(predicate::str::contains("must be different"));
    assert_eq!(fs::read(&plain).unwrap(), b"data");
}
