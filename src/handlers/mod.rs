// src/handlers/mod.rs

pub mod admin;
pub mod auth;
pub mod exam;
pub mod proctoring;
pub mod profile;
pub mod question_set;
