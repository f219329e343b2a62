mod support;

use serde_json::json;
use support::{new_class, new_student, Sidecar};

#[test]
fn salary_generation_is_idempotent_and_paid_rows_are_final() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let mut sc = Sidecar::spawn();
    sc.open(workspace.path());
    sc.admin_school("Payroll High");

    sc.ok(
        "employees.create",
        json!({ "firstName": "Ann", "lastName": "Able", "salary": 1200.0 }),
    );
    sc.ok(
        "employees.create",
        json!({ "firstName": "Bob", "lastName": "Baker", "salary": 900.0 }),
    );
    sc.ok(
        "employees.create",
        json!({ "firstName": "Cat", "lastName": "Cole", "salary": 800.0, "active": false }),
    );

    let first = sc.ok("salary.generate", json!({ "month": "2024-09" }));
    let created = first["created"].as_array().expect("created").clone();
    assert_eq!(created.len(), 2);
    assert_eq!(first["skipped"], json!(0));

    let again = sc.ok("salary.generate", json!({ "month": "2024-09" }));
    assert_eq!(again["created"], json!([]));
    assert_eq!(again["skipped"], json!(2));

    assert_eq!(
        sc.fail("salary.generate", json!({ "month": "2024-13" }))["code"],
        json!("bad_params")
    );

    let listed = sc.ok("salary.list", json!({ "month": "2024-09" }));
    let payments = listed["payments"].as_array().expect("payments");
    assert_eq!(payments.len(), 2);
    assert!(payments.iter().all(|p| p["status"] == json!("pending")));
    let mut amounts: Vec<f64> = payments
        .iter()
        .map(|p| p["amount"].as_f64().expect("amount"))
        .collect();
    amounts.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
    assert_eq!(amounts, vec![900.0, 1200.0]);
    assert_eq!(sc.ok("salary.list", json!({ "month": "2024-10" }))["payments"], json!([]));

    let payment_id = created[0].as_str().expect("payment id").to_string();
    let adjusted = sc.ok(
        "salary.update",
        json!({ "id": payment_id, "patch": { "amount": 1250.5 } }),
    );
    assert_eq!(adjusted["payment"]["amount"], json!(1250.5));

    let paid = sc.ok("salary.pay", json!({ "id": payment_id, "paidOn": "2024-09-30" }));
    assert_eq!(paid["payment"]["status"], json!("paid"));
    assert_eq!(paid["payment"]["paidOn"], json!("2024-09-30"));

    assert_eq!(
        sc.fail("salary.pay", json!({ "id": payment_id }))["code"],
        json!("conflict")
    );
    assert_eq!(
        sc.fail("salary.update", json!({ "id": payment_id, "patch": { "amount": 1.0 } }))["code"],
        json!("conflict")
    );
    assert_eq!(
        sc.fail("salary.pay", json!({ "id": "no-such-payment" }))["code"],
        json!("not_found")
    );

    // A deleted payment frees the month for that employee.
    let other_id = created[1].as_str().expect("payment id").to_string();
    sc.ok("salary.delete", json!({ "id": other_id }));
    let refill = sc.ok("salary.generate", json!({ "month": "2024-09" }));
    assert_eq!(refill["created"].as_array().map(|c| c.len()), Some(1));
    assert_eq!(refill["skipped"], json!(1));
}

#[test]
fn attendance_marks_only_the_roster_and_summarises() {
    let workspace = tempfile::tempdir().expect("temp workspace");
    let mut sc = Sidecar::spawn();
    sc.open(workspace.path());
    sc.admin_school("Roll Call");

    let class_a = new_class(&mut sc, "4A");
    let class_b = new_class(&mut sc, "4B");
    let ada = new_student(&mut sc, &class_a, "R-1", "Ada", "Adams");
    let ben = new_student(&mut sc, &class_a, "R-2", "Ben", "Brown");
    let outsider = new_student(&mut sc, &class_b, "R-3", "Cy", "Cruz");

    let e = sc.fail(
        "attendance.mark",
        json!({
            "classId": class_a,
            "date": "2024-09-02",
            "entries": [
                { "studentId": ada, "status": "present" },
                { "studentId": outsider, "status": "present" }
            ]
        }),
    );
    assert_eq!(e["code"], json!("bad_params"));
    assert_eq!(e["details"]["studentIds"], json!([outsider]));
    let day = sc.ok("attendance.day", json!({ "classId": class_a, "date": "2024-09-02" }));
    assert!(day["students"]
        .as_array()
        .expect("students")
        .iter()
        .all(|s| s["status"].is_null()));

    let resp = sc.request(
        "attendance.mark",
        json!({
            "classId": class_a,
            "date": "2024-09-02",
            "entries": [
                { "studentId": ada, "status": "present" },
                { "studentId": ben, "status": "absent" }
            ]
        }),
    );
    assert_eq!(resp["ok"], json!(true));
    assert_eq!(resp["revalidate"], json!("/dashboard/attendance"));
    assert_eq!(resp["result"]["marked"], json!(2));

    // Re-marking a day overwrites instead of duplicating.
    sc.ok(
        "attendance.mark",
        json!({
            "classId": class_a,
            "date": "2024-09-02",
            "entries": [{ "studentId": ben, "status": "late" }]
        }),
    );
    sc.ok(
        "attendance.mark",
        json!({
            "classId": class_a,
            "date": "2024-09-03",
            "entries": [
                { "studentId": ada, "status": "absent" },
                { "studentId": ben, "status": "excused" }
            ]
        }),
    );

    let day = sc.ok("attendance.day", json!({ "classId": class_a, "date": "2024-09-02" }));
    let students = day["students"].as_array().expect("students");
    assert_eq!(students.len(), 2);
    assert_eq!(students[0]["displayName"], json!("Adams, Ada"));
    assert_eq!(students[0]["status"], json!("present"));
    assert_eq!(students[1]["status"], json!("late"));

    let summary = sc.ok(
        "attendance.summary",
        json!({ "classId": class_a, "from": "2024-09-01", "to": "2024-09-30" }),
    );
    assert_eq!(summary["class"]["total"], json!(4));
    assert_eq!(summary["class"]["present"], json!(1));
    assert_eq!(summary["class"]["late"], json!(1));
    assert_eq!(summary["class"]["attendanceRate"], json!(0.5));
    let ada_row = &summary["students"][0];
    assert_eq!(ada_row["studentId"], json!(ada));
    assert_eq!(ada_row["attendanceRate"], json!(0.5));

    let empty = sc.ok(
        "attendance.summary",
        json!({ "classId": class_b, "from": "2024-09-01", "to": "2024-09-30" }),
    );
    assert!(empty["class"]["attendanceRate"].is_null());
    assert_eq!(
        sc.fail(
            "attendance.summary",
            json!({ "classId": class_a, "from": "2024-10-01", "to": "2024-09-01" })
        )["code"],
        json!("bad_params")
    );

    let history = sc.ok("history.list", json!({ "entityType": "attendance" }));
    assert_eq!(history["entries"].as_array().map(|e| e.len()), Some(3));
}
