use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

const BLOCK_SIZE: usize = 512;

fn get_abt_cmd() -> Command {
    Command::cargo_bin("abt").unwrap()
}

fn header_checksum(block: &[u8]) -> i64 {
    let mut sum: i64 = 0;
    for (i, &b) in block.iter().enumerate() {
        if (148..156).contains(&i) {
            sum += i64::from(b' ');
        } else {
            sum += i64::from(b);
        }
    }
    sum
}

fn file_entry(name: &str, payload: &[u8]) -> Vec<u8> {
    let mut block = [0u8; BLOCK_SIZE];
    block[0..name.len()].copy_from_slice(name.as_bytes());
    block[100..107].copy_from_slice(b"0000600");
    block[108..115].copy_from_slice(b"0001750");
    block[116..123].copy_from_slice(b"0001750");
    let size_field = format!("{:011o}", payload.len());
    block[124..124 + size_field.len()].copy_from_slice(size_field.as_bytes());
    block[136..147].copy_from_slice(b"14000000000");
    block[156] = b'0';
    block[257..265].copy_from_slice(b"ustar\x0000");
    let chksum = format!("{:06o}\0 ", header_checksum(&block));
    block[148..156].copy_from_slice(chksum.as_bytes());

    let mut out = block.to_vec();
    out.extend_from_slice(payload);
    let rem = payload.len() % BLOCK_SIZE;
    if rem != 0 {
        out.extend(std::iter::repeat(0u8).take(BLOCK_SIZE - rem));
    }
    out
}

fn sample_tar() -> Vec<u8> {
    let mut tar = Vec::new();
    tar.extend(file_entry("shared/data.xml", b"<data/>"));
    tar.extend(file_entry("apps/com.a/_manifest", b"manifest a"));
    tar.extend(file_entry("apps/com.a/f.dat", b"payload of a"));
    tar.extend(file_entry("apps/com.b/_manifest", b"manifest b"));
    tar.extend(vec![0u8; 2 * BLOCK_SIZE]);
    tar
}

fn plain_archive(version: u32, tar: &[u8]) -> Vec<u8> {
    let mut out = format!("ANDROID BACKUP\n{}\n0\nnone\n", version).into_bytes();
    out.extend_from_slice(tar);
    out
}

fn write_fixture(dir: &std::path::Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    path
}

#[test]
fn test_ls_plain_archive() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fixture(dir.path(), "backup.ab", &plain_archive(2, &sample_tar()));

    let mut cmd = get_abt_cmd();
    cmd.arg("ls").arg(&input);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "# Android Backup, version: 2, compression: 0, encryption: none",
        ))
        .stdout(predicate::str::contains("apps/com.a/_manifest"))
        .stdout(predicate::str::contains("shared/data.xml"))
        .stdout(predicate::str::contains("-rw------- 1000/1000"));
}

#[test]
fn test_ls_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fixture(dir.path(), "garbage.ab", b"TARBALL OF DOOM\n");

    let mut cmd = get_abt_cmd();
    cmd.arg("ls").arg(&input);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not an Android Backup file"));
}

#[test]
fn test_unwrap_then_wrap_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let tar = sample_tar();
    let input = write_fixture(dir.path(), "backup.ab", &plain_archive(5, &tar));

    get_abt_cmd().arg("unwrap").arg(&input).assert().success();
    let unwrapped = dir.path().join("backup.tar");
    assert_eq!(std::fs::read(&unwrapped).unwrap(), tar);

    let rewrapped = dir.path().join("rewrapped.ab");
    get_abt_cmd()
        .arg("wrap")
        .arg("--output-version=5")
        .arg(&unwrapped)
        .arg(&rewrapped)
        .assert()
        .success();
    assert_eq!(std::fs::read(&rewrapped).unwrap(), plain_archive(5, &tar));
}

#[test]
fn test_rewrap_compress_and_strip() {
    let dir = tempfile::tempdir().unwrap();
    let tar = sample_tar();
    let input = write_fixture(dir.path(), "backup.ab", &plain_archive(2, &tar));

    let compressed = dir.path().join("compressed.ab");
    get_abt_cmd().arg("rewrap").arg("-c").arg(&input).arg(&compressed).assert().success();
    let compressed_bytes = std::fs::read(&compressed).unwrap();
    assert!(compressed_bytes.starts_with(b"ANDROID BACKUP\n2\n1\nnone\n"));
    assert!(compressed_bytes.len() < plain_archive(2, &tar).len());

    // default output name is <stem>.stripped.ab
    get_abt_cmd().arg("strip").arg(&compressed).assert().success();
    let stripped = dir.path().join("compressed.stripped.ab");
    assert_eq!(std::fs::read(&stripped).unwrap(), plain_archive(2, &tar));
}

#[test]
fn test_rewrap_keep_compression() {
    let dir = tempfile::tempdir().unwrap();
    let tar = sample_tar();
    let input = write_fixture(dir.path(), "backup.ab", &plain_archive(2, &tar));

    let compressed = dir.path().join("compressed.ab");
    get_abt_cmd().arg("rewrap").arg("-c").arg(&input).arg(&compressed).assert().success();

    let kept = dir.path().join("kept.ab");
    get_abt_cmd().arg("rewrap").arg("-k").arg(&compressed).arg(&kept).assert().success();
    // -k copies the body bytes verbatim
    assert_eq!(std::fs::read(&kept).unwrap(), std::fs::read(&compressed).unwrap());
}

#[test]
fn test_rewrap_refuses_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fixture(dir.path(), "backup.ab", &plain_archive(2, &sample_tar()));
    write_fixture(dir.path(), "backup.stripped.ab", b"already here");

    let mut cmd = get_abt_cmd();
    cmd.arg("rewrap").arg(&input);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("refusing to overwrite"));
}

#[test]
fn test_encrypted_round_trip_with_passphrase_options() {
    let dir = tempfile::tempdir().unwrap();
    let tar = sample_tar();
    let input = write_fixture(dir.path(), "backup.ab", &plain_archive(3, &tar));

    let sealed = dir.path().join("sealed.ab");
    get_abt_cmd()
        .arg("rewrap")
        .arg("-e")
        .arg("--output-passphrase")
        .arg("hunter2")
        .arg("--output-iterations")
        .arg("100")
        .arg(&input)
        .arg(&sealed)
        .assert()
        .success();
    let sealed_bytes = std::fs::read(&sealed).unwrap();
    assert!(sealed_bytes.starts_with(b"ANDROID BACKUP\n3\n0\nAES-256\n"));

    let opened = dir.path().join("opened.ab");
    get_abt_cmd()
        .arg("strip")
        .arg("-p")
        .arg("hunter2")
        .arg(&sealed)
        .arg(&opened)
        .assert()
        .success();
    assert_eq!(std::fs::read(&opened).unwrap(), plain_archive(3, &tar));
}

#[test]
fn test_wrong_passphrase_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fixture(dir.path(), "backup.ab", &plain_archive(3, &sample_tar()));

    let sealed = dir.path().join("sealed.ab");
    get_abt_cmd()
        .arg("rewrap")
        .arg("-e")
        .arg("--output-passphrase")
        .arg("hunter2")
        .arg("--output-iterations")
        .arg("100")
        .arg(&input)
        .arg(&sealed)
        .assert()
        .success();

    let mut cmd = get_abt_cmd();
    cmd.arg("ls").arg("-p").arg("wrong").arg(&sealed);
    cmd.assert().failure().code(1).stderr(predicate::str::contains("passphrase"));
}

#[test]
fn test_sibling_passphrase_file_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fixture(dir.path(), "backup.ab", &plain_archive(3, &sample_tar()));

    let sealed = dir.path().join("sealed.ab");
    get_abt_cmd()
        .arg("rewrap")
        .arg("-e")
        .arg("--output-passphrase")
        .arg("hunter2")
        .arg("--output-iterations")
        .arg("100")
        .arg(&input)
        .arg(&sealed)
        .assert()
        .success();
    write_fixture(dir.path(), "sealed.passphrase.txt", b"hunter2");

    let mut cmd = get_abt_cmd();
    cmd.arg("ls").arg(&sealed);
    cmd.assert().success().stdout(predicate::str::contains("apps/com.a/_manifest"));
}

#[test]
fn test_split_and_merge_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let tar = sample_tar();
    let input = write_fixture(dir.path(), "backup.ab", &plain_archive(2, &tar));
    let prefix = dir.path().join("piece").to_string_lossy().into_owned();

    get_abt_cmd()
        .arg("split")
        .arg("--prefix")
        .arg(&prefix)
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("# Android Backup, version: 2, compression: 0"));

    let piece = |name: &str| dir.path().join(name);
    assert!(piece("piece_000_.ab").exists());
    assert!(piece("piece_001_com.a.ab").exists());
    assert!(piece("piece_002_com.b.ab").exists());

    let merged = dir.path().join("merged.ab");
    get_abt_cmd()
        .arg("merge")
        .arg(piece("piece_000_.ab"))
        .arg(piece("piece_001_com.a.ab"))
        .arg(piece("piece_002_com.b.ab"))
        .arg(&merged)
        .assert()
        .success();
    assert_eq!(std::fs::read(&merged).unwrap(), plain_archive(2, &tar));
}

#[test]
fn test_merge_rejects_version_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let tar = sample_tar();
    let v2 = write_fixture(dir.path(), "v2.ab", &plain_archive(2, &tar));
    let v3 = write_fixture(dir.path(), "v3.ab", &plain_archive(3, &tar));
    let out = dir.path().join("merged.ab");

    let mut cmd = get_abt_cmd();
    cmd.arg("merge").arg(&v2).arg(&v3).arg(&out);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("different versions"));
}

#[test]
fn test_markdown_help() {
    let mut cmd = get_abt_cmd();
    cmd.arg("--markdown");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("# abt"))
        .stdout(predicate::str::contains("## Subcommands"));
}

#[test]
fn test_missing_input_file() {
    let mut cmd = get_abt_cmd();
    cmd.arg("ls").arg("/does/not/exist.ab");
    cmd.assert().failure().code(1).stderr(predicate::str::contains("does not exist"));
}
