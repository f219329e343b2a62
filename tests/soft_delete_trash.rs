mod support;

use serde_json::json;
use support::{new_class, new_student, str_at, Sidecar};

#[test]
fn deleted_rows_leave_lists_and_come_back_from_trash() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let mut sc = Sidecar::spawn();
    sc.open(workspace.path());
    sc.admin_school("Trashmore");

    let dep = sc.ok("departments.create", json!({ "name": "Science" }));
    let dep_id = str_at(&dep, "departmentId").to_string();

    let resp = sc.request("departments.delete", json!({ "id": dep_id }));
    assert_eq!(resp["ok"], json!(true));
    assert_eq!(resp["revalidate"], json!("/dashboard/departments"));
    let trash_id = str_at(&resp["result"], "trashId").to_string();

    let listed = sc.ok("departments.list", json!({}));
    assert_eq!(listed["departments"], json!([]));
    assert_eq!(
        sc.fail("departments.get", json!({ "id": dep_id }))["code"],
        json!("not_found")
    );
    assert_eq!(
        sc.fail("departments.delete", json!({ "id": dep_id }))["code"],
        json!("not_found")
    );

    let trash = sc.ok("trash.list", json!({ "entityType": "department" }));
    let entries = trash["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["entityId"], json!(dep_id));
    assert_eq!(entries[0]["snapshot"]["name"], json!("Science"));
    assert_eq!(entries[0]["snapshot"]["delFlag"], json!(1));
    assert_eq!(entries[0]["snapshot"]["deletedBy"], json!("admin-1"));

    // The name is free again while the original sits in the trash...
    let dup = sc.ok("departments.create", json!({ "name": "Science" }));
    let dup_id = str_at(&dup, "departmentId").to_string();
    // ...so restoring it would collide.
    assert_eq!(
        sc.fail("trash.restore", json!({ "id": trash_id }))["code"],
        json!("conflict")
    );

    sc.ok("departments.delete", json!({ "id": dup_id }));
    let restored = sc.ok("trash.restore", json!({ "id": trash_id }));
    assert_eq!(restored["entityId"], json!(dep_id));
    let got = sc.ok("departments.get", json!({ "id": dep_id }));
    assert_eq!(got["department"]["actionType"], json!("restore"));
    assert_eq!(got["department"]["delFlag"], json!(0));

    assert_eq!(
        sc.fail("trash.restore", json!({ "id": trash_id }))["code"],
        json!("not_found")
    );
}

#[test]
fn purge_removes_for_good_unless_still_referenced() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let mut sc = Sidecar::spawn();
    sc.open(workspace.path());
    sc.admin_school("Purgeton");

    let class_id = new_class(&mut sc, "3A");
    let student_id = new_student(&mut sc, &class_id, "X-1", "Kim", "Lee");

    assert_eq!(
        sc.fail("classes.delete", json!({ "id": class_id }))["code"],
        json!("conflict")
    );

    let removed = sc.ok("students.delete", json!({ "id": student_id }));
    let student_trash = str_at(&removed, "trashId").to_string();
    let removed = sc.ok("classes.delete", json!({ "id": class_id }));
    let class_trash = str_at(&removed, "trashId").to_string();

    // The trashed student row still points at the class.
    assert_eq!(
        sc.fail("trash.purge", json!({ "id": class_trash }))["code"],
        json!("conflict")
    );

    let resp = sc.request("trash.purge", json!({ "id": student_trash }));
    assert_eq!(resp["ok"], json!(true));
    assert_eq!(resp["revalidate"], json!("/dashboard/students"));
    sc.ok("trash.purge", json!({ "id": class_trash }));

    let trash = sc.ok("trash.list", json!({}));
    assert_eq!(trash["entries"], json!([]));
    assert_eq!(
        sc.fail("trash.restore", json!({ "id": class_trash }))["code"],
        json!("not_found")
    );
}

#[test]
fn every_mutation_lands_in_history_newest_first() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let mut sc = Sidecar::spawn();
    sc.open(workspace.path());
    sc.admin_school("Chronicle");

    let class_id = new_class(&mut sc, "1A");
    sc.ok(
        "classes.update",
        json!({ "id": class_id, "patch": { "section": "North" } }),
    );
    sc.ok("classes.delete", json!({ "id": class_id }));

    let history = sc.ok(
        "history.list",
        json!({ "entityType": "class", "entityId": class_id }),
    );
    let actions: Vec<&str> = history["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|e| e["actionType"].as_str().expect("actionType"))
        .collect();
    assert_eq!(actions, vec!["delete", "update", "create"]);
    assert_eq!(history["entries"][0]["performedBy"], json!("admin-1"));

    let limited = sc.ok("history.list", json!({ "limit": 1 }));
    assert_eq!(limited["entries"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(
        sc.fail("history.list", json!({ "entityType": "spaceship" }))["code"],
        json!("bad_params")
    );
}

#[test]
fn restore_waits_for_the_class_a_student_belongs_to() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let mut sc = Sidecar::spawn();
    sc.open(workspace.path());
    sc.admin_school("Order Matters");

    let class_id = new_class(&mut sc, "5C");
    let student_id = new_student(&mut sc, &class_id, "O-1", "Ida", "Wells");

    let removed = sc.ok("students.delete", json!({ "id": student_id }));
    let student_trash = str_at(&removed, "trashId").to_string();
    let removed = sc.ok("classes.delete", json!({ "id": class_id }));
    let class_trash = str_at(&removed, "trashId").to_string();

    let e = sc.fail("trash.restore", json!({ "id": student_trash }));
    assert_eq!(e["code"], json!("conflict"));
    assert_eq!(
        sc.fail("students.get", json!({ "id": student_id }))["code"],
        json!("not_found")
    );
    assert_eq!(
        sc.ok("trash.list", json!({}))["entries"].as_array().map(|e| e.len()),
        Some(2)
    );

    sc.ok("trash.restore", json!({ "id": class_trash }));
    sc.ok("trash.restore", json!({ "id": student_trash }));
    let student = sc.ok("students.get", json!({ "id": student_id }));
    assert_eq!(student["student"]["classId"], json!(class_id));
    assert_eq!(
        sc.fail("classes.delete", json!({ "id": class_id }))["code"],
        json!("conflict")
    );
}
