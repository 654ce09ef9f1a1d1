use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
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
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn class_snapshot() -> serde_json::Value {
    json!({
        "students": [
            { "id": "st1", "firstName": "Ada", "lastName": "Lovelace" },
            { "id": "st2", "firstName": "Alan", "lastName": "Turing" },
            { "id": "st3", "firstName": "Grace", "lastName": "Hopper" }
        ],
        "assignments": [
            {
                "id": "quiz1",
                "name": "Quiz 1",
                "totalPoints": 99,
                "sections": [
                    { "id": "qa", "assignmentId": "quiz1", "name": "A", "points": 10 },
                    { "id": "qb", "assignmentId": "quiz1", "name": "B", "points": 10 }
                ]
            },
            { "id": "essay", "name": "Essay", "totalPoints": 100 },
            {
                "id": "lab",
                "name": "Lab",
                "sections": [
                    { "id": "lab-setup", "assignmentId": "lab", "name": "Setup", "points": 5 },
                    { "id": "lab-report", "assignmentId": "lab", "name": "Report", "points": 15 }
                ]
            }
        ],
        "subjects": [
            {
                "id": "math",
                "name": "Math",
                "gradedAssignmentIds": ["quiz1"],
                "sectionIds": ["lab-report"],
                "defaultGradeScale": "letters"
            },
            {
                "id": "english",
                "name": "English",
                "gradedAssignmentIds": ["essay"],
                "sectionIds": []
            }
        ],
        "scores": [
            { "studentId": "st1", "assignmentId": "quiz1", "sectionId": "qa", "score": 8, "excused": false },
            { "studentId": "st1", "assignmentId": "lab", "sectionId": "lab-report", "score": 12, "excused": false },
            { "studentId": "st1", "assignmentId": "essay", "score": 89.9, "excused": false },
            { "studentId": "st2", "assignmentId": "quiz1", "sectionId": "qa", "score": 10, "excused": false },
            { "studentId": "st2", "assignmentId": "quiz1", "sectionId": "qb", "score": 0, "excused": true },
            { "studentId": "st2", "assignmentId": "lab", "sectionId": "lab-report", "score": 15, "excused": false },
            { "studentId": "st2", "assignmentId": "essay", "score": 0, "excused": true },
            { "studentId": "st3", "assignmentId": "quiz1", "sectionId": "qa", "score": 3, "excused": false },
            { "studentId": "st3", "assignmentId": "quiz1", "sectionId": "deleted-section", "score": 10, "excused": false },
            { "studentId": "st3", "assignmentId": "lab", "sectionId": "lab-report", "score": 9, "excused": false },
            { "studentId": "st3", "assignmentId": "essay", "score": 70, "excused": false }
        ],
        "scales": [
            {
                "id": "letters",
                "name": "Letters",
                "grades": [
                    { "name": "A", "minPercentage": 90, "maxPercentage": 100 },
                    { "name": "B", "minPercentage": 80, "maxPercentage": 89 },
                    { "name": "C", "minPercentage": 70, "maxPercentage": 79 },
                    { "name": "D", "minPercentage": 60, "maxPercentage": 69 },
                    { "name": "F", "minPercentage": 0, "maxPercentage": 59 }
                ]
            },
            {
                "id": "pf",
                "name": "Pass/Fail",
                "grades": [
                    { "name": "Pass", "minPercentage": 50, "maxPercentage": 100 },
                    { "name": "Fail", "minPercentage": 0, "maxPercentage": 49 }
                ]
            }
        ]
    })
}

#[test]
fn report_grid_and_missing_issues_match_scoring_rules() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.report",
        class_snapshot(),
    );

    // st1 math: quiz A 8/10, B missing, lab report 12/15 => 20/25 = 80%.
    let st1 = &report["grid"]["math"]["st1"];
    assert_eq!(st1["kind"], json!("graded"));
    assert_eq!(st1["label"], json!("B"));
    assert_eq!(st1["percent"], json!(80));
    assert_eq!(st1["possible"], json!(25.0));

    // st2 math: quiz B excused => 25/25.
    assert_eq!(report["grid"]["math"]["st2"]["label"], json!("A"));

    // st3: orphaned section score is ignored, B is missing => 12/25 = 48%.
    let st3 = &report["grid"]["math"]["st3"];
    assert_eq!(st3["percent"], json!(48));
    assert_eq!(st3["label"], json!("F"));

    // english has no default scale; falls back to the first scale.
    assert_eq!(report["grid"]["english"]["st1"]["label"], json!("B"));
    assert_eq!(report["grid"]["english"]["st1"]["percent"], json!(89));
    let st2_english = &report["grid"]["english"]["st2"];
    assert_eq!(st2_english["kind"], json!("na"));
    assert_eq!(st2_english["label"], json!("N/A"));
    assert_eq!(st2_english["reason"], json!("No graded items"));
    assert_eq!(report["scalesUsed"]["english"], json!("letters"));

    let math_issues = report["issues"]["math"].as_array().expect("math issues");
    assert_eq!(math_issues.len(), 1);
    assert_eq!(math_issues[0]["assignmentName"], json!("Quiz 1"));
    assert_eq!(math_issues[0]["itemName"], json!("B"));
    assert_eq!(math_issues[0]["sectionId"], json!("qb"));
    assert_eq!(
        math_issues[0]["studentNames"],
        json!(["Ada Lovelace", "Grace Hopper"])
    );
    assert_eq!(report["issues"]["english"], json!([]));
    assert_eq!(report["scaleWarnings"], json!([]));

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.report",
        class_snapshot(),
    );
    assert_eq!(report, again);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn request_scale_selection_and_first_match_overlap() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let mut snapshot = class_snapshot();
    snapshot["scaleSelections"] = json!({ "math": "overlap" });
    snapshot["scales"]
        .as_array_mut()
        .expect("scales")
        .push(json!({
            "id": "overlap",
            "name": "Overlap",
            "grades": [
                { "name": "A", "minPercentage": 0, "maxPercentage": 100 },
                { "name": "B", "minPercentage": 50, "maxPercentage": 100 }
            ]
        }));

    let report = request_ok(&mut stdin, &mut reader, "1", "grades.report", snapshot);
    assert_eq!(report["grid"]["math"]["st1"]["label"], json!("A"));
    assert_eq!(report["scalesUsed"]["math"], json!("overlap"));
    let warnings = report["scaleWarnings"].as_array().expect("warnings");
    assert!(warnings
        .iter()
        .any(|w| w["scaleId"] == json!("overlap") && w["kind"] == json!("overlap")));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unknown_student_score_is_a_contract_error() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let mut snapshot = class_snapshot();
    snapshot["scores"]
        .as_array_mut()
        .expect("scores")
        .push(json!({ "studentId": "nobody", "assignmentId": "essay", "score": 5 }));
    let resp = request(&mut stdin, &mut reader, "1", "grades.report", snapshot);
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("unknown_student"));
    assert_eq!(resp["error"]["details"]["studentIds"], json!(["nobody"]));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn aggregate_and_resolve_methods_expose_single_steps() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let agg = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.aggregate",
        json!({
            "studentId": "st1",
            "assignment": {
                "id": "quiz1",
                "name": "Quiz 1",
                "sections": [
                    { "id": "qa", "assignmentId": "quiz1", "name": "A", "points": 10 },
                    { "id": "qb", "assignmentId": "quiz1", "name": "B", "points": 10 }
                ]
            },
            "scores": [
                { "studentId": "st1", "assignmentId": "quiz1", "sectionId": "qa", "score": 8 }
            ]
        }),
    );
    assert_eq!(agg["earned"], json!(8.0));
    assert_eq!(agg["possible"], json!(10.0));
    assert_eq!(agg["percent"]["floored"], json!(80));
    assert_eq!(agg["missingItems"][0]["sectionName"], json!("B"));

    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.resolve",
        json!({
            "earned": 89.9,
            "possible": 100,
            "scale": {
                "id": "s",
                "name": "Letters",
                "grades": [
                    { "name": "A", "minPercentage": 90, "maxPercentage": 100 },
                    { "name": "B", "minPercentage": 80, "maxPercentage": 89 }
                ]
            }
        }),
    );
    assert_eq!(resolved, json!({ "kind": "graded", "label": "B", "percent": 89 }));

    let no_scale = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.resolve",
        json!({ "earned": 5, "possible": 10 }),
    );
    assert_eq!(no_scale["kind"], json!("na"));
    assert_eq!(no_scale["reason"], json!("No grade scale selected"));

    let bad = request(
        &mut stdin,
        &mut reader,
        "4",
        "grades.resolve",
        json!({ "earned": "lots", "possible": 10 }),
    );
    assert_eq!(bad["error"]["code"], json!("bad_params"));

    let validated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.scales.validate",
        json!({
            "scales": [{
                "id": "gappy",
                "name": "Gappy",
                "grades": [
                    { "name": "A", "minPercentage": 90, "maxPercentage": 100 },
                    { "name": "C", "minPercentage": 0, "maxPercentage": 79 }
                ]
            }]
        }),
    );
    let warnings = validated["warnings"].as_array().expect("warnings");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["kind"], json!("gap"));
    assert_eq!(warnings[0]["message"], json!("no grade covers 80..=89"));

    drop(stdin);
    let _ = child.wait();
}
