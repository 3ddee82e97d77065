#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_efsrtd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn efsrtd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

/// Sends a request that must succeed and returns its `result`.
pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// Sends a request that must fail and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

pub fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string field {} in {}", key, v))
        .to_string()
}

pub fn f64_field(v: &Value, key: &str) -> f64 {
    v.get(key)
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| panic!("missing number field {} in {}", key, v))
}

/// A selected workspace with one student, one teacher, one module and one practice.
pub struct Fixture {
    pub workspace: PathBuf,
    pub student_id: String,
    pub teacher_id: String,
    pub module_id: String,
    pub practice_id: String,
}

pub fn create_user(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    username: &str,
    first: &str,
    last: &str,
    role: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("user-{}", username),
        "users.create",
        json!({
            "username": username,
            "firstName": first,
            "lastName": last,
            "role": role,
        }),
    );
    str_field(&created, "userId")
}

pub fn setup_practice(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> Fixture {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "fx-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = create_user(stdin, reader, "ana.quispe", "Ana", "Quispe", "STUDENT");
    let teacher_id = create_user(stdin, reader, "luis.rojas", "Luis", "Rojas", "TEACHER");
    let module = request_ok(
        stdin,
        reader,
        "fx-module",
        "modules.create",
        json!({
            "name": "Soporte tecnico",
            "description": "Mantenimiento de equipos",
            "kind": "MODULE_1",
        }),
    );
    let module_id = str_field(&module, "moduleId");
    let practice = request_ok(
        stdin,
        reader,
        "fx-practice",
        "practices.create",
        json!({
            "studentId": student_id,
            "moduleId": module_id,
            "supervisorId": teacher_id,
            "startDate": "2024-03-04",
            "endDate": "2024-05-31",
        }),
    );
    let practice_id = str_field(&practice, "practiceId");
    Fixture {
        workspace,
        student_id,
        teacher_id,
        module_id,
        practice_id,
    }
}

pub fn record_present(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    practice_id: &str,
    date: &str,
    scores: [u32; 3],
) -> Value {
    request_ok(
        stdin,
        reader,
        &format!("att-{}", date),
        "attendance.record",
        json!({
            "practiceId": practice_id,
            "date": date,
            "status": "PRESENT",
            "punctuality": "ON_TIME",
            "criteria": {
                "conceptual": scores[0],
                "procedural": scores[1],
                "attitudinal": scores[2],
            },
        }),
    )
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}
