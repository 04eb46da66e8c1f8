use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::error::{Result, SugaError};

/// Disjoint port ranges per role so a stray service cannot shadow the
/// resource API or an entrypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    ResourceApi,
    Service,
    Entrypoint,
    Trigger,
    Database,
}

impl PortRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortRole::ResourceApi => "resource-api",
            PortRole::Service => "service",
            PortRole::Entrypoint => "entrypoint",
            PortRole::Trigger => "trigger",
            PortRole::Database => "database",
        }
    }

    fn range(&self) -> (u16, u16) {
        match self {
            PortRole::ResourceApi => (50051, 50151),
            PortRole::Service => (4001, 4999),
            PortRole::Entrypoint => (3000, 3999),
            PortRole::Trigger => (8400, 8499),
            PortRole::Database => (5433, 5533),
        }
    }
}

/// Ports handed out so far, process-wide, so concurrent allocations cannot
/// collide before the consumer binds.
static RESERVED: Lazy<Mutex<HashSet<u16>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Takes the next free OS port from the role's range.
pub fn reserve_port(role: PortRole) -> Result<u16> {
    let (start, end) = role.range();
    let mut reserved = RESERVED.lock().expect("port registry lock");
    for port in start..=end {
        if reserved.contains(&port) {
            continue;
        }
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            reserved.insert(port);
            return Ok(port);
        }
    }
    Err(SugaError::PortExhausted {
        role: role.as_str().to_string(),
        start,
        end,
    })
}

/// Releases a reservation (used on startup failure paths).
pub fn release_port(port: u16) {
    RESERVED.lock().expect("port registry lock").remove(&port);
}
