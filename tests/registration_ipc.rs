mod test_utils;

use serde_json::{json, Value};
use test_utils::Sidecar;

fn form(student_id: &str, email: &str) -> Value {
    json!({
        "studentId": student_id,
        "firstName": "Ben",
        "lastName": "Reyes",
        "email": email,
        "contactNumber": "0917-123-4567",
        "password": "s3cret-pass",
        "confirmPassword": "s3cret-pass",
    })
}

#[test]
fn self_registration_waits_for_approval() {
    let (mut sidecar, workspace) = Sidecar::with_workspace("labdesk-registration");

    let mut bad = form("2024-0202", "ben@example.com");
    bad["confirmPassword"] = json!("other-pass");
    assert_eq!(sidecar.err_code("registration.submit", bad), "bad_params");
    assert_eq!(
        sidecar.err_code("registration.submit", form("2024-0202", "not-an-email")),
        "bad_params"
    );

    let submitted = sidecar.ok("registration.submit", form("2024-0202", "ben@example.com"));
    assert_eq!(submitted["status"], "pending");
    let user_id = submitted["userId"].as_i64().expect("user id");

    assert_eq!(
        sidecar.err_code("registration.submit", form("2024-0203", "BEN@example.com")),
        "conflict"
    );
    assert_eq!(
        sidecar.err_code("registration.submit", form("2024-0202", "other@example.com")),
        "conflict"
    );

    assert_eq!(
        sidecar.err_code("auth.login", json!({ "username": "2024-0202", "password": "s3cret-pass" })),
        "forbidden"
    );

    let pending = sidecar.ok("registration.pending", json!({}))["registrations"].clone();
    assert_eq!(pending[0]["user_id"], user_id);
    assert_eq!(pending[0]["student_id"], "2024-0202");

    assert_eq!(
        sidecar.err_code("registration.process", json!({ "userId": user_id, "action": "reject" })),
        "bad_params"
    );
    assert_eq!(
        sidecar.err_code("registration.process", json!({ "userId": user_id, "action": "hold" })),
        "bad_params"
    );

    let processed = sidecar.ok(
        "registration.process",
        json!({ "userId": user_id, "action": "approve", "approvedBy": 1 }),
    );
    assert_eq!(processed["status"], "approved");
    assert_eq!(sidecar.ok("registration.pending", json!({}))["registrations"], json!([]));

    // Already processed.
    assert_eq!(
        sidecar.err_code("registration.process", json!({ "userId": user_id, "action": "approve" })),
        "not_found"
    );

    let session = sidecar.login("2024-0202", "s3cret-pass");
    assert_eq!(session["role"], "student");
    assert_eq!(session["student_id"], "2024-0202");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn rejected_registrations_cannot_sign_in() {
    let (mut sidecar, workspace) = Sidecar::with_workspace("labdesk-registration-reject");

    let submitted = sidecar.ok("registration.submit", form("2024-0300", "carl@example.com"));
    let user_id = submitted["userId"].as_i64().expect("user id");
    let processed = sidecar.ok(
        "registration.process",
        json!({ "userId": user_id, "action": "reject", "rejectionReason": "not enrolled this term" }),
    );
    assert_eq!(processed["status"], "rejected");

    assert_eq!(
        sidecar.err_code("auth.login", json!({ "username": "2024-0300", "password": "s3cret-pass" })),
        "forbidden"
    );

    let _ = std::fs::remove_dir_all(workspace);
}
