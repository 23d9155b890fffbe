use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradecutd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradecutd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn backup_archives_the_database_with_a_checksummed_manifest() {
    let workspace = temp_dir("gradecut-backup");
    let dest = temp_dir("gradecut-backup-dest");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sections.create",
        json!({ "name": "BIO220 3/5" }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.create",
        json!({ "destDir": dest.to_string_lossy() }),
    );
    let path = PathBuf::from(
        created
            .get("path")
            .and_then(|v| v.as_str())
            .expect("backup path"),
    );
    assert!(path.is_file(), "backup file exists");
    assert_eq!(
        created.get("format").and_then(|v| v.as_str()),
        Some("gradecut-backup-v1")
    );
    assert_eq!(created.get("entryCount").and_then(|v| v.as_u64()), Some(2));
    let reported_sha = created
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .expect("dbSha256")
        .to_string();

    let file = std::fs::File::open(&path).expect("open backup");
    let mut archive = zip::ZipArchive::new(file).expect("read zip");

    let mut manifest_text = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest_text)
        .expect("read manifest");
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).expect("manifest json");
    assert_eq!(
        manifest.get("format").and_then(|v| v.as_str()),
        Some("gradecut-backup-v1")
    );
    assert_eq!(
        manifest.get("dbSha256").and_then(|v| v.as_str()),
        Some(reported_sha.as_str())
    );

    // The archived database bytes hash to the manifest checksum.
    let mut db_bytes = Vec::new();
    archive
        .by_name("db/gradecut.sqlite3")
        .expect("db entry")
        .read_to_end(&mut db_bytes)
        .expect("read db entry");
    let mut hasher = Sha256::new();
    hasher.update(&db_bytes);
    assert_eq!(format!("{:x}", hasher.finalize()), reported_sha);
}
