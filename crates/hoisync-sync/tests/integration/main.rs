//! Integration tests for hoisync-sync
//!
//! The transport runs against an in-process tus server built on wiremock
//! and an in-memory SQLite state store. The coordinator runs against
//! hand-written port mocks.


mod test_transport;
mod test_wakeup;
