#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const TEACHER: &str = "teacher-1";

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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn send_line(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, line: &str) -> serde_json::Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");

    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    assert!(!out.trim().is_empty(), "empty response for {}", line);
    serde_json::from_str(out.trim()).expect("parse response json")
}

/// Full response envelope, success or not.
pub fn request(
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
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
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
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn score(student: &str, subject: &str, component: &str, exam: f64, component_score: f64) -> serde_json::Value {
    json!({
        "studentId": student,
        "subjectId": subject,
        "examScore": exam,
        "classAssessmentScores": { component: component_score }
    })
}

/// One grade level across three 2024 trimesters plus an empty 2025 trimester. Every
/// subject has a single component, so final = (exam + component) / 2.
///
/// | subject      | s1 | s2 | s3 |
/// |--------------|----|----|----|
/// | math-y24t1   | 92 | 92 | 75 |
/// | math-y24t2   | 89 | 55 | 80 |
/// | sci-y24t2    | 93 | 45 | 80 |
/// | math-y24t3   | 95 | 45 | 80 |
pub fn school_dataset() -> serde_json::Value {
    json!({
        "teacherId": TEACHER,
        "gradeLevels": [{ "id": "g7", "name": "Grade 7", "sortOrder": 7 }],
        "academicYears": [
            { "id": "y24", "name": "2024-2025", "startYear": 2024 },
            { "id": "y25", "name": "2025-2026", "startYear": 2025 }
        ],
        "trimesters": [
            { "id": "y24t1", "academicYearId": "y24", "name": "T1", "sortOrder": 1 },
            { "id": "y24t2", "academicYearId": "y24", "name": "T2", "sortOrder": 2 },
            { "id": "y24t3", "academicYearId": "y24", "name": "T3", "sortOrder": 3 },
            { "id": "y25t1", "academicYearId": "y25", "name": "T1", "sortOrder": 1 }
        ],
        "subjects": [
            { "id": "math-y24t1", "name": "Math", "gradeLevelId": "g7", "academicYearId": "y24", "trimesterId": "y24t1" },
            { "id": "math-y24t2", "name": "Math", "gradeLevelId": "g7", "academicYearId": "y24", "trimesterId": "y24t2" },
            { "id": "sci-y24t2", "name": "Science", "gradeLevelId": "g7", "academicYearId": "y24", "trimesterId": "y24t2" },
            { "id": "math-y24t3", "name": "Math", "gradeLevelId": "g7", "academicYearId": "y24", "trimesterId": "y24t3" }
        ],
        "components": [
            { "id": "quiz-m1", "subjectId": "math-y24t1", "name": "Quiz", "weight": 50 },
            { "id": "quiz-m2", "subjectId": "math-y24t2", "name": "Quiz", "weight": 50 },
            { "id": "lab-s2", "subjectId": "sci-y24t2", "name": "Lab", "weight": 50 },
            { "id": "quiz-m3", "subjectId": "math-y24t3", "name": "Quiz", "weight": 50 }
        ],
        "students": [
            { "id": "s1", "firstName": "Ada", "lastName": "Lovelace", "gradeLevelId": "g7" },
            { "id": "s2", "firstName": "Alan", "lastName": "Turing", "gradeLevelId": "g7" },
            { "id": "s3", "firstName": "Grace", "lastName": "Hopper", "gradeLevelId": "g7" }
        ],
        "scores": [
            score("s1", "math-y24t1", "quiz-m1", 92.0, 92.0),
            score("s2", "math-y24t1", "quiz-m1", 90.0, 94.0),
            score("s3", "math-y24t1", "quiz-m1", 70.0, 80.0),
            score("s1", "math-y24t2", "quiz-m2", 88.0, 90.0),
            score("s2", "math-y24t2", "quiz-m2", 60.0, 50.0),
            score("s3", "math-y24t2", "quiz-m2", 80.0, 80.0),
            score("s1", "sci-y24t2", "lab-s2", 90.0, 96.0),
            score("s2", "sci-y24t2", "lab-s2", 40.0, 50.0),
            score("s3", "sci-y24t2", "lab-s2", 78.0, 82.0),
            score("s1", "math-y24t3", "quiz-m3", 95.0, 95.0),
            score("s2", "math-y24t3", "quiz-m3", 50.0, 40.0),
            score("s3", "math-y24t3", "quiz-m3", 80.0, 80.0)
        ]
    })
}

/// Spawns a sidecar on a fresh workspace with [`school_dataset`] imported.
pub fn seeded_sidecar(prefix: &str) -> (Child, ChildStdin, BufReader<ChildStdout>, PathBuf) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "seed-import", "dataset.import", school_dataset());
    (child, stdin, reader, workspace)
}
