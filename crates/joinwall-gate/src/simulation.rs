//! Synthetic addresses for bot-side flows that never see a real client IP.
//!
//! Nothing here reflects where a request came from. Use it only for tests and
//! simulated registrations, never on the request admission path.

use std::net::Ipv4Addr;

/// `192.168.1.(user_id mod 255)`.
pub fn synthetic_ip_for_user(user_id: u64) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, (user_id % 255) as u8)
}
