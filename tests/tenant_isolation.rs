mod support;

use serde_json::json;
use support::{new_class, new_student, str_at, Sidecar};

#[test]
fn rows_of_one_school_are_invisible_to_another() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let mut sc = Sidecar::spawn();
    sc.open(workspace.path());

    let north = sc.admin_school("North");
    let class_id = new_class(&mut sc, "9B");
    let student_id = new_student(&mut sc, &class_id, "N-1", "Grace", "Hopper");

    let south = sc.admin_school("South");
    assert_ne!(north, south);

    let classes = sc.ok("classes.list", json!({}));
    assert_eq!(classes["classes"], json!([]));
    let students = sc.ok("students.list", json!({}));
    assert_eq!(students["students"], json!([]));

    assert_eq!(
        sc.fail("classes.get", json!({ "id": class_id }))["code"],
        json!("not_found")
    );
    assert_eq!(
        sc.fail(
            "classes.update",
            json!({ "id": class_id, "patch": { "name": "stolen" } })
        )["code"],
        json!("not_found")
    );
    assert_eq!(
        sc.fail("students.delete", json!({ "id": student_id }))["code"],
        json!("not_found")
    );
    // A foreign class id cannot be used as a reference either.
    assert_eq!(
        sc.fail(
            "students.create",
            json!({
                "classId": class_id,
                "admissionNo": "S-1",
                "firstName": "Alan",
                "lastName": "Turing",
            })
        )["code"],
        json!("not_found")
    );

    // Natural keys are unique per school, not globally.
    let south_class = new_class(&mut sc, "9B");
    assert_ne!(south_class, class_id);

    sc.ok(
        "session.set",
        json!({ "schoolId": north, "userId": "admin-1", "role": "admin" }),
    );
    let got = sc.ok("classes.get", json!({ "id": class_id }));
    assert_eq!(str_at(&got["class"], "name"), "9B");
    assert_eq!(str_at(&got["class"], "schoolId"), north);
    let students = sc.ok("students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(1));

    let history = sc.ok("history.list", json!({}));
    for entry in history["entries"].as_array().expect("entries") {
        assert_ne!(entry["entityId"], json!(south_class));
    }
}
