mod test_utils;

use serde_json::json;
use test_utils::{temp_dir, Sidecar};

#[test]
fn requests_before_workspace_select_report_no_workspace() {
    let mut sidecar = Sidecar::spawn();
    let health = sidecar.ok("health", json!({}));
    assert_eq!(health["workspacePath"], serde_json::Value::Null);
    assert_eq!(health["pollIntervalSeconds"], 30);
    assert_eq!(health["signedIn"], false);

    assert_eq!(sidecar.err_code("users.list", json!({})), "no_workspace");
    assert_eq!(sidecar.err_code("logs.today", json!({})), "no_workspace");
}

#[test]
fn unknown_methods_and_bad_json_get_error_envelopes() {
    let mut sidecar = Sidecar::spawn();
    let resp = sidecar.call("grades.compute", json!({}));
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "not_implemented");
    assert_eq!(resp["error"]["message"], "unknown method: grades.compute");

    let resp = sidecar.send_raw("{not json");
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_json");

    // The loop keeps serving after a bad line.
    sidecar.ok("health", json!({}));
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let (mut sidecar, workspace) = Sidecar::with_workspace("labdesk-router-smoke");
    let bundle_out = workspace.join("out").join("smoke.labdesk.zip");

    let methods = [
        ("auth.session", json!({})),
        ("auth.timeoutLogout", json!({ "userId": 1 })),
        ("users.list", json!({})),
        ("departments.list", json!({})),
        ("subjects.list", json!({})),
        ("classes.list", json!({})),
        ("classes.byEdpCode", json!({ "edpCode": "NONE" })),
        ("classes.teacherList", json!({ "teacherUserId": 1 })),
        ("attendance.student", json!({ "userId": 1 })),
        ("logs.today", json!({})),
        ("logs.all", json!({})),
        ("logs.dates", json!({})),
        ("logs.archivedSheets", json!({})),
        ("logs.archivedGrouped", json!({})),
        ("feedback.pending", json!({})),
        ("feedback.forwarded", json!({})),
        ("registration.pending", json!({})),
        ("dashboard.admin", json!({})),
        ("dashboard.workingStudent", json!({})),
        ("dashboard.teacher", json!({ "userId": 1 })),
        ("dashboard.student", json!({ "userId": 1 })),
        ("backup.exportWorkspaceBundle", json!({ "outPath": bundle_out.to_string_lossy() })),
    ];
    for (method, params) in methods {
        let resp = sidecar.call(method, params);
        assert_eq!(resp["ok"], true, "{} failed: {}", method, resp);
    }

    // Handlers reached with bad params still answer with their own codes.
    for method in [
        "users.create",
        "users.updatePhoto",
        "departments.create",
        "classes.create",
        "classes.enrollmentCandidates",
        "attendance.generate",
        "feedback.forward",
        "registration.submit",
        "backup.importWorkspaceBundle",
    ] {
        let code = sidecar.err_code(method, json!({}));
        assert_ne!(code, "not_implemented", "{} fell through the router", method);
    }

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn stale_fetches_are_answered_without_running() {
    let (mut sidecar, workspace) = Sidecar::with_workspace("labdesk-fetch-seq");

    let fresh = sidecar.ok("users.list", json!({ "fetchSeq": 5 }));
    assert!(fresh["users"].is_array());

    let stale = sidecar.ok("users.list", json!({ "fetchSeq": 3 }));
    assert_eq!(stale["stale"], true);
    assert_eq!(stale["fetchSeq"], 3);
    assert_eq!(stale["latestFetchSeq"], 5);

    // Sequences are tracked per method.
    let other = sidecar.ok("logs.today", json!({ "fetchSeq": 1 }));
    assert!(other["logs"].is_array());

    // Selecting a workspace starts the count over.
    let again = temp_dir("labdesk-fetch-seq-2");
    sidecar.ok("workspace.select", json!({ "path": again.to_string_lossy() }));
    let reset = sidecar.ok("users.list", json!({ "fetchSeq": 1 }));
    assert!(reset["users"].is_array());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(again);
}
