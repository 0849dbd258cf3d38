//! Library surface behind the `kiln-server` binary, split out so
//! integration tests can drive `http::build_app` directly through
//! `tower::ServiceExt` without a real listener — the same `server_core`/
//! `server` bin split `fourthplaces-mntogether` uses for the same reason.

pub mod http;
pub mod scheduler;
