use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const EDITOR: &str = "ana@example.org";

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

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_visitd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn visitd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    fn open(workspace: &Path) -> Self {
        let mut s = Self::spawn();
        s.ok("workspace.select", json!({ "path": workspace.to_string_lossy() }));
        s
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value["id"].as_str(), Some(id.as_str()));
        value
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(value["ok"], true, "{} failed: {}", method, value);
        value["result"].clone()
    }

    fn fail(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(value["ok"], false, "{} unexpectedly succeeded: {}", method, value);
        value["error"].clone()
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn seed(s: &mut Sidecar) -> i64 {
    let institution = s.ok("admin.institutions.create", json!({ "name": "IE San Jose" }))["institutionId"]
        .as_i64()
        .expect("institution id");
    let professional = s.ok(
        "admin.professionals.create",
        json!({ "name": "Marta Gil", "email": "marta@example.org" }),
    )["professionalId"]
        .as_i64()
        .expect("professional id");
    let accompaniment = s.ok(
        "admin.accompaniments.create",
        json!({ "professionalId": professional, "institutionId": institution }),
    )["accompanimentId"]
        .as_i64()
        .expect("accompaniment id");
    for (catalog, name) in [
        ("work_lines", "Reading"),
        ("work_lines", "Study Plans"),
        ("institutional_roles", "Teacher"),
        ("institutional_roles", "Parent"),
    ] {
        s.ok("admin.catalog.add", json!({ "catalog": catalog, "name": name }));
    }
    s.ok(
        "admin.catalog.add",
        json!({ "catalog": "cutoff_weeks", "startsOn": "2026-03-02", "endsOn": "2026-03-08" }),
    );
    accompaniment
}

fn edit(s: &mut Sidecar, doc: &str, cell: &str, value: serde_json::Value) -> serde_json::Value {
    s.ok(
        "document.edit",
        json!({ "documentId": doc, "cell": cell, "value": value, "editor": EDITOR }),
    )
}

#[test]
fn visit_runs_from_provisioning_to_locked_report() {
    let workspace = temp_dir("visitd-lifecycle");
    let mut s = Sidecar::open(&workspace);
    let accompaniment = seed(&mut s);

    let provisioned = s.ok(
        "visits.provision",
        json!({ "accompanimentId": accompaniment, "count": 2 }),
    );
    assert_eq!(provisioned["created"], 2);
    assert!(provisioned["progress"].as_array().map(|p| !p.is_empty()).unwrap_or(false));
    let docs: Vec<String> = provisioned["visits"]
        .as_array()
        .expect("visits")
        .iter()
        .map(|v| v["documentId"].as_str().expect("document id").to_string())
        .collect();

    let again = s.ok(
        "visits.provision",
        json!({ "accompanimentId": accompaniment, "count": 2 }),
    );
    assert_eq!(again["created"], 0);

    let out_of_order = s.fail(
        "visit.start",
        json!({ "documentId": docs[1], "participantCount": 2, "date": "2026-03-03" }),
    );
    assert_eq!(out_of_order["code"], "sequence_mismatch");
    assert_eq!(out_of_order["details"]["expected"], 1);
    assert_eq!(out_of_order["details"]["actual"], 2);

    let outside_week = s.fail(
        "visit.start",
        json!({ "documentId": docs[0], "participantCount": 2, "date": "2026-03-10" }),
    );
    assert_eq!(outside_week["code"], "no_cutoff_week");

    let early = s.fail("visit.finalize", json!({ "documentId": docs[0] }));
    assert_eq!(early["code"], "not_started");

    let started = s.ok(
        "visit.start",
        json!({ "documentId": docs[0], "participantCount": 2, "date": "2026-03-03" }),
    );
    assert_eq!(started["sequenceNumber"], 1);
    assert_eq!(started["institutionName"], "IE San Jose");

    let twice = s.fail(
        "visit.start",
        json!({ "documentId": docs[0], "participantCount": 2, "date": "2026-03-03" }),
    );
    assert_eq!(twice["code"], "already_started");

    let protected = s.fail(
        "document.edit",
        json!({ "documentId": docs[0], "cell": "I8", "value": 7, "editor": EDITOR }),
    );
    assert_eq!(protected["code"], "validation_failed");

    edit(&mut s, &docs[0], "L8", json!(2));
    edit(&mut s, &docs[0], "I9", json!("Work Line"));
    let work_line = edit(&mut s, &docs[0], "I11", json!("Reading"));
    assert_eq!(work_line["trigger"], "workLineArea");
    assert_eq!(work_line["dirty"], true);
    edit(&mut s, &docs[0], "I13", json!("Follow up the reading plan"));
    edit(&mut s, &docs[0], "B21", json!("Ana Ruiz"));

    let short = s.fail("visit.finalize", json!({ "documentId": docs[0] }));
    assert_eq!(short["code"], "validation_failed");
    assert!(short["message"].as_str().unwrap_or("").contains("missing 1"));

    edit(&mut s, &docs[0], "B22", json!("Luis Mora"));

    let notes = s.ok(
        "visit.notes.stage",
        json!({
            "documentId": docs[0],
            "workingLine": "Reading",
            "category": "achievements",
            "text": "reading plan agreed",
        }),
    );
    assert!(notes["summaries"]["achievements"]
        .as_str()
        .unwrap_or("")
        .contains("reading plan agreed"));

    let staged = s.ok(
        "visit.evidence.stage",
        json!({
            "documentId": docs[0],
            "files": [
                { "type": "Attendance", "name": "list.pdf", "mimeType": "application/pdf", "dataBase64": "AQID" },
                { "type": "", "name": "orphan.pdf", "dataBase64": "AQID" },
            ],
        }),
    );
    assert_eq!(staged["staged"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(staged["failures"].as_array().map(|a| a.len()), Some(1));

    let status = s.ok("visit.status", json!({ "documentId": docs[0] }));
    assert_eq!(status["status"], "in_progress");
    assert_eq!(status["dirty"], true);

    let done = s.ok("visit.finalize", json!({ "documentId": docs[0] }));
    assert_eq!(done["notes"]["inserted"], 1);
    assert_eq!(done["evidenceInserted"], 1);
    assert_eq!(done["workLines"], 1);
    assert!(done["message"]
        .as_str()
        .unwrap_or("")
        .starts_with("Visit 1 finalized"));

    let status = s.ok("visit.status", json!({ "documentId": docs[0] }));
    assert_eq!(status["status"], "finalized");

    let sheet = s.ok("document.get", json!({ "documentId": docs[0] }))["sheet"].clone();
    let protections = sheet["protections"].as_array().expect("protections");
    assert_eq!(protections.len(), 1);
    assert!(protections[0]["range"].is_null());

    let again = s.fail("visit.finalize", json!({ "documentId": docs[0] }));
    assert_eq!(again["code"], "validation_failed");

    let second = s.ok(
        "visit.start",
        json!({ "documentId": docs[1], "participantCount": 1, "date": "2026-03-05" }),
    );
    assert_eq!(second["sequenceNumber"], 2);

    let listed = s.ok("visits.list", json!({ "accompanimentId": accompaniment }));
    assert_eq!(listed["lastStartedSequence"], 2);
    s.finish();
}

#[test]
fn staged_notes_survive_a_restart_and_abandon_clears_them() {
    let workspace = temp_dir("visitd-restart");
    let mut s = Sidecar::open(&workspace);
    let accompaniment = seed(&mut s);
    let doc = s.ok(
        "visits.provision",
        json!({ "accompanimentId": accompaniment, "count": 1 }),
    )["visits"][0]["documentId"]
        .as_str()
        .expect("document id")
        .to_string();

    let not_started = s.fail(
        "visit.notes.stage",
        json!({ "documentId": doc, "workingLine": "Reading", "category": "agreements", "text": "x" }),
    );
    assert_eq!(not_started["code"], "not_started");

    s.ok(
        "visit.start",
        json!({ "documentId": doc, "participantCount": 1, "date": "2026-03-04" }),
    );
    s.ok(
        "visit.notes.stage",
        json!({ "documentId": doc, "workingLine": "Reading", "category": "agreements", "text": "weekly call" }),
    );
    s.finish();

    let mut s = Sidecar::open(&workspace);
    let notes = s.ok("visit.notes.get", json!({ "documentId": doc }));
    assert_eq!(notes["notes"]["Reading"]["agreements"], json!(["weekly call"]));
    let status = s.ok("visit.status", json!({ "documentId": doc }));
    assert_eq!(status["status"], "in_progress");

    s.ok("visit.abandon", json!({ "documentId": doc }));
    let notes = s.ok("visit.notes.get", json!({ "documentId": doc }));
    assert_eq!(notes["notes"], json!({}));
    let sheet = s.ok("document.get", json!({ "documentId": doc }))["sheet"].clone();
    assert_eq!(sheet["cells"]["T19"], "No evidence uploaded.");
    s.finish();
}
