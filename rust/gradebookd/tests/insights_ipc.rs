mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, seeded_sidecar, TEACHER};

#[test]
fn at_risk_flags_declining_failing_student() {
    let (_child, mut stdin, mut reader, _ws) = seeded_sidecar("gradebook-insights-risk");

    let resp = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "insights.get",
        json!({ "teacherId": TEACHER, "type": "at-risk" }),
    );
    assert_eq!(resp.get("type").and_then(|v| v.as_str()), Some("at-risk"));
    let flagged = resp.get("insights").and_then(|v| v.as_array()).expect("list");
    assert_eq!(flagged.len(), 1);
    let s2 = &flagged[0];
    assert_eq!(s2.get("studentId").and_then(|v| v.as_str()), Some("s2"));
    assert_eq!(s2.get("average").and_then(|v| v.as_f64()), Some(59.3));
    // below pass 40 + declining 25 + two failing subjects 30
    assert_eq!(s2.get("riskScore").and_then(|v| v.as_u64()), Some(95));
    assert_eq!(s2.get("trend").and_then(|v| v.as_str()), Some("declining"));
    assert_eq!(
        s2.get("riskFactors").and_then(|v| v.as_array()).map(|v| v.len()),
        Some(3)
    );
}

#[test]
fn top_performers_and_summary() {
    let (_child, mut stdin, mut reader, _ws) = seeded_sidecar("gradebook-insights-top");

    let top = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "insights.get",
        json!({ "teacherId": TEACHER, "type": "top-performers" }),
    );
    let list = top.get("insights").and_then(|v| v.as_array()).expect("list");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].get("studentId").and_then(|v| v.as_str()), Some("s1"));
    assert_eq!(list[0].get("average").and_then(|v| v.as_f64()), Some(92.3));
    let strongest = list[0]
        .get("strongestSubjects")
        .and_then(|v| v.as_array())
        .expect("strongest");
    assert_eq!(strongest.len(), 3);
    assert_eq!(strongest[0].get("finalScore").and_then(|v| v.as_f64()), Some(95.0));

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "insights.get",
        json!({ "teacherId": TEACHER, "type": "summary" }),
    );
    let s = summary.get("insights").expect("summary");
    assert_eq!(s.get("studentCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(s.get("recordCount").and_then(|v| v.as_u64()), Some(12));
    let top_subjects = s.get("topSubjects").and_then(|v| v.as_array()).expect("topSubjects");
    // Math offerings pool across trimesters
    assert_eq!(top_subjects.len(), 2);
    assert!(s
        .get("narrative")
        .and_then(|v| v.as_str())
        .map(|t| t.starts_with("Class average is"))
        .unwrap_or(false));
}

#[test]
fn anomalies_and_all() {
    let (_child, mut stdin, mut reader, _ws) = seeded_sidecar("gradebook-insights-anomalies");

    let anomalies = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "insights.get",
        json!({ "teacherId": TEACHER, "type": "anomalies" }),
    );
    let list = anomalies.get("insights").and_then(|v| v.as_array()).expect("list");
    assert!(list.iter().any(|a| {
        a.get("studentId").and_then(|v| v.as_str()) == Some("s2")
            && a.get("kind").and_then(|v| v.as_str()) == Some("sudden_drop")
    }));

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "insights.get",
        json!({ "teacherId": TEACHER, "type": "all" }),
    );
    let insights = all.get("insights").expect("all");
    for key in ["atRisk", "topPerformers", "summary", "anomalies"] {
        assert!(insights.get(key).is_some(), "missing {}", key);
    }
}

#[test]
fn unknown_type_and_missing_teacher_are_bad_params() {
    let (_child, mut stdin, mut reader, _ws) = seeded_sidecar("gradebook-insights-errors");

    let bad_type = request(
        &mut stdin,
        &mut reader,
        "1",
        "insights.get",
        json!({ "teacherId": TEACHER, "type": "best-students" }),
    );
    assert_eq!(error_code(&bad_type), Some("bad_params"));

    let no_teacher = request(
        &mut stdin,
        &mut reader,
        "2",
        "insights.get",
        json!({ "type": "summary" }),
    );
    assert_eq!(error_code(&no_teacher), Some("bad_params"));

    // another teacher sees an empty school, not this one's students
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "insights.get",
        json!({ "teacherId": "teacher-2", "type": "summary" }),
    );
    assert_eq!(
        other
            .get("insights")
            .and_then(|s| s.get("recordCount"))
            .and_then(|v| v.as_u64()),
        Some(0)
    );
}
