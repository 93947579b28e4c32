//! Integration tests for foldsync-remote
//!
//! Uses wiremock to simulate the remote transfer API and verifies the
//! requests the client sends and how responses are classified.

mod common;

mod test_listing;
mod test_transfers;
