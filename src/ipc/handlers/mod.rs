pub mod assignments;
pub mod attendance;
pub mod awards;
pub mod backup;
pub mod classes;
pub mod core;
pub mod departments;
pub mod employees;
pub mod history;
pub mod inventory;
pub mod parents;
pub mod postal;
pub mod roles;
pub mod salary;
pub mod students;
