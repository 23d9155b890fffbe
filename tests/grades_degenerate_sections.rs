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
fn empty_roster_yields_a_zeroed_but_complete_distribution() {
    let workspace = temp_dir("gradecut-empty-roster");
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
        json!({ "name": "ART100 1/9" }),
    );
    let section_id = section
        .get("sectionId")
        .and_then(|v| v.as_str())
        .expect("sectionId")
        .to_string();

    let computed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.compute",
        json!({ "sectionId": section_id }),
    );
    assert_eq!(
        computed.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    let dist = computed.get("distribution").expect("distribution");
    assert_eq!(dist.get("studentCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(
        dist.get("averagePercentage").and_then(|v| v.as_f64()),
        Some(0.0)
    );
    assert_eq!(dist.get("passCount").and_then(|v| v.as_u64()), Some(0));

    // Every configured band plus the fail band is present at zero, so
    // consumers never special-case an absent key.
    let counts = dist
        .get("countsByGrade")
        .and_then(|v| v.as_object())
        .expect("countsByGrade");
    assert_eq!(counts.len(), 8);
    for label in ["A", "B+", "B", "C+", "C", "D+", "D", "F"] {
        assert_eq!(
            counts.get(label).and_then(|v| v.as_u64()),
            Some(0),
            "band {}",
            label
        );
    }
}

#[test]
fn items_without_a_positive_maximum_do_not_participate() {
    let workspace = temp_dir("gradecut-zero-max");
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
        json!({ "name": "MUS130 2/7" }),
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
            "students": [{ "firstName": "Fah", "lastName": "J" }]
        }),
    );
    let student_id = added
        .pointer("/students/0/studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    // One real item and one zero-max placeholder.
    let item = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "items.add",
        json!({ "sectionId": section_id, "title": "Homework", "maxScore": 40.0 }),
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
        "items.add",
        json!({ "sectionId": section_id, "title": "Placeholder", "maxScore": 0.0 }),
    );

    // totalMax only counts participating items.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "items.list",
        json!({ "sectionId": section_id }),
    );
    assert_eq!(listed.get("totalMax").and_then(|v| v.as_f64()), Some(40.0));
    assert_eq!(
        listed.get("items").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "scores.save",
        json!({
            "sectionId": section_id,
            "itemId": item_id,
            "entries": [{ "studentId": student_id, "value": 30.0 }]
        }),
    );

    let computed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grades.compute",
        json!({ "sectionId": section_id }),
    );
    let row = computed.pointer("/students/0").expect("row");
    assert_eq!(row.get("maxPossible").and_then(|v| v.as_f64()), Some(40.0));
    assert_eq!(row.get("percentage").and_then(|v| v.as_f64()), Some(75.0));
    assert_eq!(row.get("grade").and_then(|v| v.as_str()), Some("B+"));

    // Deleting the only participating item leaves a defined zero result.
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "items.delete",
        json!({ "itemId": item_id }),
    );
    let recomputed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "grades.compute",
        json!({ "sectionId": section_id }),
    );
    let row = recomputed.pointer("/students/0").expect("row");
    assert_eq!(row.get("totalScore").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(row.get("maxPossible").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(row.get("percentage").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(row.get("grade").and_then(|v| v.as_str()), Some("F"));
}
