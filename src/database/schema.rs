// Database schema definitions and migrations

pub const AUDIT_RECORDS_SCHEMA: &str = include_str!("../../migrations/001_audit_records.sql");
pub const APPROVAL_REQUESTS_SCHEMA: &str = include_str!("../../migrations/002_approval_requests.sql");
