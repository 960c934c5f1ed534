//! Destination tokens accepted by `send_text`.
//!
//! - `^all` (or `!ffffffff`) broadcasts to every reachable node
//! - `^local` addresses the attached radio itself
//! - `!1a2b3c4d` is a node number in hex
//! - anything else is matched against the `user.id` of known nodes

use super::DeviceError;
use std::fmt;
use std::str::FromStr;

pub const BROADCAST_ADDR: &str = "^all";
pub const LOCAL_ADDR: &str = "^local";
pub const BROADCAST_NUM: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Broadcast,
    Local,
    Node(u32),
    UserId(String),
}

impl FromStr for Destination {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == BROADCAST_ADDR {
            return Ok(Destination::Broadcast);
        }
        if s == LOCAL_ADDR {
            return Ok(Destination::Local);
        }
        if let Some(hex) = s.strip_prefix('!') {
            let num = u32::from_str_radix(hex, 16)
                .map_err(|_| DeviceError::InvalidDestination(s.to_string()))?;
            return Ok(if num == BROADCAST_NUM {
                Destination::Broadcast
            } else {
                Destination::Node(num)
            });
        }
        if s.is_empty() {
            return Err(DeviceError::InvalidDestination(s.to_string()));
        }
        Ok(Destination::UserId(s.to_string()))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Broadcast => f.write_str(BROADCAST_ADDR),
            Destination::Local => f.write_str(LOCAL_ADDR),
            Destination::Node(num) => write!(f, "{}", node_id(*num)),
            Destination::UserId(id) => f.write_str(id),
        }
    }
}

/// Canonical `!xxxxxxxx` id for a node number.
pub fn node_id(num: u32) -> String {
    format!("!{:08x}", num)
}
