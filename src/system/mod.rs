//! System-level routes and utilities

pub mod health_check;
