mod test_support;

use serde_json::json;
use std::io::Write;
use test_support::{read_response, request, spawn_sidecar, temp_dir};

#[test]
fn requests_before_workspace_select_answer_no_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());
    assert!(health["result"]["version"].as_str().is_some());

    for (i, method) in [
        "campuses.list",
        "setup.get",
        "students.list",
        "mall.products.list",
        "cart.get",
        "dashboard.summary",
    ]
    .iter()
    .enumerate()
    {
        let id = format!("nw-{}", i);
        let resp = request(&mut stdin, &mut reader, &id, method, json!({}));
        assert_eq!(resp["ok"], false, "{}", method);
        assert_eq!(resp["error"]["code"], "no_workspace", "{}", method);
    }

    let _ = child.kill();
}

#[test]
fn malformed_lines_and_unknown_methods() {
    let workspace = temp_dir("campusd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let bad = read_response(&mut reader);
    assert_eq!(bad["ok"], false);
    assert_eq!(bad["error"]["code"], "bad_json");
    assert!(bad.get("id").is_none());

    let missing = request(&mut stdin, &mut reader, "1", "workspace.select", json!({}));
    assert_eq!(missing["error"]["code"], "bad_params");

    let selected = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], true);
    assert!(workspace.join("campusd.sqlite3").is_file());

    let unknown = request(&mut stdin, &mut reader, "3", "classes.create", json!({}));
    assert_eq!(unknown["error"]["code"], "not_implemented");

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn every_family_is_routed() {
    let workspace = temp_dir("campusd-router-families");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "0",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let methods = [
        "setup.get",
        "setup.update",
        "campuses.save",
        "campuses.list",
        "campuses.get",
        "campuses.delete",
        "classrooms.list",
        "classrooms.create",
        "classrooms.update",
        "classrooms.delete",
        "staff.list",
        "staff.create",
        "staff.update",
        "staff.delete",
        "cashiers.add",
        "cashiers.list",
        "cashiers.update",
        "cashiers.delete",
        "cashiers.verify",
        "students.list",
        "students.create",
        "students.update",
        "students.delete",
        "students.reorder",
        "courses.list",
        "courses.create",
        "courses.update",
        "courses.delete",
        "courses.detail",
        "courses.enroll",
        "courses.unenroll",
        "courses.forStudent",
        "schedule.slots.create",
        "schedule.slots.update",
        "schedule.slots.delete",
        "schedule.slots.list",
        "schedule.weekly",
        "schedule.byTeacher",
        "schedule.byClassroom",
        "mall.products.list",
        "mall.products.get",
        "mall.products.upsert",
        "mall.products.delete",
        "mall.categories",
        "cart.get",
        "cart.add",
        "cart.updateQuantity",
        "cart.remove",
        "cart.clear",
        "orders.checkout",
        "orders.list",
        "orders.get",
        "orders.updateStatus",
        "lessonPlans.create",
        "lessonPlans.update",
        "lessonPlans.list",
        "lessonPlans.get",
        "lessonPlans.delete",
        "scoring.open",
        "scoring.setScore",
        "scoring.submit",
        "scoring.list",
        "attendance.monthOpen",
        "attendance.setStudentDay",
        "attendance.bulkStampDay",
        "attendance.summary",
        "dashboard.summary",
    ];
    for (i, method) in methods.iter().enumerate() {
        let id = format!("m-{}", i);
        let resp = request(&mut stdin, &mut reader, &id, method, json!({}));
        if resp["ok"] == false {
            assert_ne!(resp["error"]["code"], "not_implemented", "{}", method);
            assert_ne!(resp["error"]["code"], "no_workspace", "{}", method);
        }
    }

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}
