// src/models/mod.rs

pub mod exam_code;
pub mod question_set;
pub mod session;
pub mod user;
