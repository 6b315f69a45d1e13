pub mod admin;
pub mod config;
pub mod core;
pub mod documents;
pub mod staging;
pub mod teachers;
pub mod visits;
