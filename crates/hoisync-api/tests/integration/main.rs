//! Integration tests for hoisync-api
//!
//! Uses wiremock to simulate the backup server and verifies the metadata
//! client and the tus protocol client end to end.


mod test_catalog;
mod test_tus;
