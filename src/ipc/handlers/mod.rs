pub mod attendance;
pub mod campuses;
pub mod cart;
pub mod cashiers;
pub mod classrooms;
pub mod core;
pub mod courses;
pub mod dashboard;
pub mod lesson_plans;
pub mod mall;
pub mod orders;
pub mod schedule;
pub mod setup;
pub mod staff;
pub mod students;
