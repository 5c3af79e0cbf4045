use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const FID: &str = "[0x200000400:0x1:0x0]";

fn blobtier(store: &Path) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("blobtier")?;
    cmd.env("STORAGE_ACCOUNT", "acct")
        .env("STORAGE_KEY", "s3cr3t")
        .env_remove("RUST_LOG")
        .arg("--store")
        .arg(store);
    Ok(cmd)
}

#[test]
fn test_cli_archive_import_restore_remove_cycle() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup: a mount root exposing one file under its FID path
    let store_dir = tempdir()?;
    let mount = tempdir()?;
    let fid_dir = mount.path().join(".lustre/fid");
    fs::create_dir_all(&fid_dir)?;
    let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 241) as u8).collect();
    fs::write(fid_dir.join(FID), &payload)?;

    // 2. Archive it
    let mut cmd = blobtier(store_dir.path())?;
    cmd.arg("archive")
        .arg("--fid")
        .arg(FID)
        .arg("--path")
        .arg("/proj/a.dat")
        .arg("--container")
        .arg("arch")
        .arg("--mount-root")
        .arg(mount.path())
        .arg("--block-size")
        .arg("16384")
        .arg("--create-container");
    cmd.assert()
        .success()
        .stdout(
            predicate::str::contains("\"identity\":\"proj/a.dat\"")
                .and(predicate::str::contains("az://arch/proj/a.dat"))
                .and(predicate::str::contains("\"actual_length\":70000")),
        );

    // 3. Import the container into a fresh namespace
    let namespace = tempdir()?;
    let journal = namespace.path().join("ids.jsonl");
    let mut cmd = blobtier(store_dir.path())?;
    cmd.arg("import")
        .arg("arch")
        .arg("--root")
        .arg(namespace.path().join("ns"))
        .arg("--identity-file")
        .arg(&journal);
    cmd.assert().success().stdout(predicate::str::contains("imported 1 of 1 objects"));

    let placeholder = fs::metadata(namespace.path().join("ns/proj/a.dat"))?;
    assert_eq!(placeholder.len(), 70_000);
    assert!(fs::read_to_string(&journal)?.contains("az://arch/proj/a.dat"));

    // 4. Restore into a new file
    let out = tempdir()?;
    let target = out.path().join("restored.dat");
    let mut cmd = blobtier(store_dir.path())?;
    cmd.arg("restore")
        .arg("--identity")
        .arg("az://arch/proj/a.dat")
        .arg("--write-path")
        .arg(&target);
    cmd.assert().success();
    assert_eq!(fs::read(&target)?, payload);

    // 5. Remove twice; the second call finds nothing and still succeeds
    for _ in 0..2 {
        let mut cmd = blobtier(store_dir.path())?;
        cmd.arg("remove").arg("--identity").arg("proj/a.dat").arg("--container").arg("arch");
        cmd.assert().success();
    }

    let mut cmd = blobtier(store_dir.path())?;
    cmd.arg("restore")
        .arg("--identity")
        .arg("az://arch/proj/a.dat")
        .arg("--write-path")
        .arg(out.path().join("again.dat"));
    cmd.assert().failure().stderr(predicate::str::contains("not found"));

    Ok(())
}

#[test]
fn test_cli_requires_credentials() -> Result<(), Box<dyn std::error::Error>> {
    let store_dir = tempdir()?;
    let mut cmd = Command::cargo_bin("blobtier")?;
    cmd.env_remove("STORAGE_ACCOUNT")
        .env_remove("STORAGE_KEY")
        .arg("--store")
        .arg(store_dir.path())
        .arg("import")
        .arg("data")
        .arg("--identity-file")
        .arg(store_dir.path().join("ids.jsonl"));
    cmd.assert().failure().stderr(predicate::str::contains("storage account is not set"));
    Ok(())
}

#[test]
fn test_cli_import_missing_container_fails() -> Result<(), Box<dyn std::error::Error>> {
    let store_dir = tempdir()?;
    let root = tempdir()?;
    let mut cmd = blobtier(store_dir.path())?;
    cmd.arg("import")
        .arg("absent")
        .arg("--root")
        .arg(root.path())
        .arg("--identity-file")
        .arg(root.path().join("ids.jsonl"));
    cmd.assert().failure().stderr(predicate::str::contains("listing container 'absent' failed"));
    Ok(())
}

#[test]
fn test_cli_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let store_dir = tempdir()?;
    let config_dir = tempdir()?;
    let config = config_dir.path().join("blobtier.json");
    fs::write(
        &config,
        format!(
            r#"{{"store_root": "{}", "mover": {{"container": "cfg", "credential": {{"account": "acct", "key": "s3cr3t"}}}}}}"#,
            store_dir.path().display()
        ),
    )?;

    // Removing an object that was never archived succeeds, so this exercises config
    // loading end to end without any other setup.
    let mut cmd = Command::cargo_bin("blobtier")?;
    cmd.env_remove("STORAGE_ACCOUNT")
        .env_remove("STORAGE_KEY")
        .arg("--config")
        .arg(&config)
        .arg("remove")
        .arg("--identity")
        .arg("nothing/here");
    cmd.assert().success().stdout(predicate::str::contains("\"kind\":\"remove\""));
    Ok(())
}
