use serde_json::json;
use std::io::{BufRead, BufReader, Write};
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
fn recompute_with_unchanged_inputs_is_identical() {
    let workspace = temp_dir("gradecut-idempotent");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let section = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sections.create",
        json!({ "name": "PHY210 2/3" }),
    );
    let section_id = section
        .get("sectionId")
        .and_then(|v| v.as_str())
        .expect("sectionId")
        .to_string();

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.add",
        json!({
            "sectionId": section_id,
            "students": [
                { "firstName": "Oat", "lastName": "R" },
                { "firstName": "Prae", "lastName": "N" },
                { "firstName": "Win", "lastName": "B" }
            ]
        }),
    );
    let student_ids: Vec<String> = added
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students")
        .iter()
        .map(|s| {
            s.get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string()
        })
        .collect();

    let item = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "items.add",
        json!({ "sectionId": section_id, "title": "Final", "maxScore": 60.0 }),
    );
    let item_id = item
        .get("itemId")
        .and_then(|v| v.as_str())
        .expect("itemId")
        .to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scores.save",
        json!({
            "sectionId": section_id,
            "itemId": item_id,
            "entries": [
                { "studentId": student_ids[0], "value": 51.0 },
                { "studentId": student_ids[1], "value": 33.0 },
                { "studentId": student_ids[2], "value": 20.5 }
            ]
        }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "compute-1",
        "grades.compute",
        json!({ "sectionId": section_id }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "compute-2",
        "grades.compute",
        json!({ "sectionId": section_id }),
    );

    assert_eq!(first.get("students"), second.get("students"));
    assert_eq!(first.get("distribution"), second.get("distribution"));

    // 51/60 = 85.0 -> A, 33/60 = 55.0 -> D+, 20.5/60 = 34.17 -> F.
    let students = first.get("students").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(students[0].get("grade").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(students[0].get("percentage").and_then(|v| v.as_f64()), Some(85.0));
    assert_eq!(students[1].get("grade").and_then(|v| v.as_str()), Some("D+"));
    assert_eq!(students[2].get("grade").and_then(|v| v.as_str()), Some("F"));
    assert_eq!(
        students[2].get("percentage").and_then(|v| v.as_f64()),
        Some(34.17)
    );
}
