pub mod attendance;
pub mod auth;
pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod dashboard;
pub mod departments;
pub mod feedback;
pub mod logs;
pub mod registration;
pub mod users;
