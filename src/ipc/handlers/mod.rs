pub mod core;
pub mod grading;
pub mod marks;
pub mod session;
