mod test_support;

use serde_json::json;
use test_support::{array, str_field, Sidecar};

#[test]
fn campus_upsert_list_and_guarded_delete() {
    let mut s = Sidecar::start("campusd-campuses");

    let created = s.ok(
        "campuses.save",
        json!({ "campus": { "name": "North Campus", "phone": "010-62345678" } }),
    );
    assert_eq!(created["created"], true);
    let campus_id = str_field(&created, "campusId");

    let updated = s.ok(
        "campuses.save",
        json!({ "campus": { "id": campus_id, "principal": "Li Wei" } }),
    );
    assert_eq!(updated["created"], false);

    let got = s.ok("campuses.get", json!({ "campusId": campus_id }));
    assert_eq!(got["campus"]["name"], "North Campus");
    assert_eq!(got["campus"]["principal"], "Li Wei");

    let list = s.ok("campuses.list", json!({}));
    let schools = array(&list, "schools");
    assert_eq!(schools.len(), 1);
    assert_eq!(schools[0]["schoolId"], campus_id.as_str());
    assert_eq!(schools[0]["schoolName"], "North Campus");

    let bad = s.err("campuses.save", json!({ "campus": { "name": " ", "phone": "12345" } }));
    assert_eq!(bad["code"], "validation_failed");
    let fields: Vec<&str> = array(&bad["details"], "fields")
        .iter()
        .filter_map(|f| f["field"].as_str())
        .collect();
    assert!(fields.contains(&"name"));
    assert!(fields.contains(&"phone"));

    let student_id = s.student(&campus_id, "Zhang San", "13800138000");
    assert_eq!(
        s.err_code("campuses.delete", json!({ "campusId": campus_id })),
        "conflict"
    );
    s.ok("students.delete", json!({ "studentId": student_id }));
    s.ok("campuses.delete", json!({ "campusId": campus_id }));
    assert_eq!(
        s.err_code("campuses.get", json!({ "campusId": campus_id })),
        "not_found"
    );
}

#[test]
fn classrooms_and_staff_crud_with_reference_guards() {
    let mut s = Sidecar::start("campusd-rooms-staff");
    let campus_id = s.campus("East");

    let room = s.ok(
        "classrooms.create",
        json!({ "campusId": campus_id, "name": "Room 101", "capacity": 30 }),
    );
    let room_id = str_field(&room, "classroomId");
    let updated = s.ok(
        "classrooms.update",
        json!({ "classroomId": room_id, "patch": { "location": "Floor 1" } }),
    );
    assert_eq!(updated["classroom"]["location"], "Floor 1");
    assert_eq!(
        s.err_code(
            "classrooms.create",
            json!({ "campusId": campus_id, "name": "Tiny", "capacity": 0 })
        ),
        "validation_failed"
    );

    let teacher = s.ok(
        "staff.create",
        json!({
            "campusId": campus_id,
            "name": "Wang Fang",
            "phone": "13912345678",
            "role": "teacher",
            "subjects": ["math", "physics"]
        }),
    );
    let teacher_id = str_field(&teacher, "staffId");
    s.ok(
        "staff.create",
        json!({ "campusId": campus_id, "name": "Chen Jie", "phone": "13912345679", "role": "admin" }),
    );
    assert_eq!(
        s.err_code(
            "staff.create",
            json!({ "campusId": campus_id, "name": "X", "phone": "13912345670", "role": "janitor" })
        ),
        "validation_failed"
    );

    let teachers = s.ok("staff.list", json!({ "campusId": campus_id, "role": "teacher" }));
    let teachers = array(&teachers, "staff");
    assert_eq!(teachers.len(), 1);
    assert_eq!(teachers[0]["subjects"], json!(["math", "physics"]));

    s.ok(
        "staff.update",
        json!({ "staffId": teacher_id, "patch": { "active": false } }),
    );
    let active = s.ok("staff.list", json!({ "campusId": campus_id }));
    assert_eq!(array(&active, "staff").len(), 1);
    let all = s.ok("staff.list", json!({ "campusId": campus_id, "includeInactive": true }));
    assert_eq!(array(&all, "staff").len(), 2);

    let course = s.ok(
        "courses.create",
        json!({
            "campusId": campus_id,
            "name": "Algebra",
            "category": "math",
            "teacherId": teacher_id,
            "classroomId": room_id,
            "price": 1200,
            "capacity": 10
        }),
    );
    let course_id = str_field(&course, "courseId");
    let slot = s.ok(
        "schedule.slots.create",
        json!({ "courseId": course_id, "date": "2026-10-12", "startTime": "09:00", "endTime": "10:30" }),
    );
    let slot_id = str_field(&slot["slot"], "id");

    assert_eq!(
        s.err_code("classrooms.delete", json!({ "classroomId": room_id })),
        "conflict"
    );
    assert_eq!(
        s.err_code("staff.delete", json!({ "staffId": teacher_id })),
        "conflict"
    );

    s.ok("schedule.slots.delete", json!({ "slotId": slot_id }));
    s.ok("classrooms.delete", json!({ "classroomId": room_id }));
    s.ok("staff.delete", json!({ "staffId": teacher_id }));

    let detail = s.ok("courses.detail", json!({ "courseId": course_id }));
    assert!(detail["course"]["teacherId"].is_null());
    assert!(detail["course"]["classroomId"].is_null());
}

#[test]
fn cashier_accounts_are_unique_paged_and_verifiable() {
    let mut s = Sidecar::start("campusd-cashiers");
    let campus_id = s.campus("West");
    let other_campus = s.campus("South");

    let added = s.ok(
        "cashiers.add",
        json!({
            "campusId": campus_id,
            "name": "Liu Yang",
            "account": "front01",
            "password": "secret1",
            "phone": "13700001111",
            "idNumber": "11010519491231002X"
        }),
    );
    let cashier_id = str_field(&added, "cashierId");

    assert_eq!(
        s.err_code(
            "cashiers.add",
            json!({
                "campusId": campus_id,
                "name": "Dup",
                "account": "front01",
                "password": "secret2",
                "phone": "13700001112"
            })
        ),
        "conflict"
    );
    // Same account on another campus is fine.
    s.ok(
        "cashiers.add",
        json!({
            "campusId": other_campus,
            "name": "Other",
            "account": "front01",
            "password": "secret3",
            "phone": "13700001113"
        }),
    );

    let bad_id = s.err(
        "cashiers.add",
        json!({
            "campusId": campus_id,
            "name": "Bad Id",
            "account": "front02",
            "password": "secret4",
            "phone": "13700001114",
            "idNumber": "110105194912310021"
        }),
    );
    assert_eq!(bad_id["code"], "validation_failed");
    assert_eq!(bad_id["details"]["fields"][0]["field"], "idNumber");

    for i in 0..4 {
        s.ok(
            "cashiers.add",
            json!({
                "campusId": campus_id,
                "name": format!("Clerk {}", i),
                "account": format!("clerk{}", i),
                "password": "password",
                "phone": format!("1350000000{}", i)
            }),
        );
    }
    let page = s.ok(
        "cashiers.list",
        json!({ "campusId": campus_id, "page": 2, "pageSize": 2 }),
    );
    assert_eq!(page["total"], 5);
    assert_eq!(page["page"], 2);
    assert_eq!(array(&page, "cashiers").len(), 2);
    let found = s.ok("cashiers.list", json!({ "campusId": campus_id, "keyword": "LIU" }));
    assert_eq!(found["total"], 1);
    assert!(found["cashiers"][0].get("passwordDigest").is_none());

    let ok = s.ok(
        "cashiers.verify",
        json!({ "campusId": campus_id, "account": "front01", "password": "secret1" }),
    );
    assert_eq!(ok["valid"], true);
    assert_eq!(ok["cashierId"], cashier_id.as_str());
    let wrong = s.ok(
        "cashiers.verify",
        json!({ "campusId": campus_id, "account": "front01", "password": "nope" }),
    );
    assert_eq!(wrong["valid"], false);

    s.ok(
        "cashiers.update",
        json!({ "cashierId": cashier_id, "patch": { "password": "changed1" } }),
    );
    let old = s.ok(
        "cashiers.verify",
        json!({ "campusId": campus_id, "account": "front01", "password": "secret1" }),
    );
    assert_eq!(old["valid"], false);
    let new = s.ok(
        "cashiers.verify",
        json!({ "campusId": campus_id, "account": "front01", "password": "changed1" }),
    );
    assert_eq!(new["valid"], true);

    s.ok("cashiers.delete", json!({ "cashierId": cashier_id }));
    assert_eq!(
        s.err_code("cashiers.delete", json!({ "cashierId": cashier_id })),
        "not_found"
    );
}
