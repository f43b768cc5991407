//! Central ingest (§4.5): authenticated HTTP ingress and optional
//! unauthenticated UDP ingress, both funneling into [`crate::storage::Storage`]
//! and both triggering the same background shipper forward on success.

pub mod http;
pub mod udp;
