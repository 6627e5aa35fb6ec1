//! Identifier (jid) helpers.
//!
//! A jid is the canonical per-user or per-group address in the messaging
//! protocol: `{user}@{server}`, optionally carrying a device suffix in the
//! user part (`{user}:{device}@{server}`). All identifier comparison in the
//! crate goes through the normalized form produced here.

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const LEGACY_USER_SERVER: &str = "c.us";
pub const GROUP_SERVER: &str = "g.us";
pub const LID_SERVER: &str = "lid";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const STATUS_JID: &str = "status@broadcast";

/// Normalize a jid to its canonical `{user}@{server}` form: the device
/// suffix is stripped and the legacy user server is rewritten. Anything that
/// does not look like a jid normalizes to the empty string.
pub fn normalize(jid: &str) -> String {
    let Some((user, server)) = jid.split_once('@') else {
        return String::new();
    };
    let user = user.split(':').next().unwrap_or(user);
    let server = if server == LEGACY_USER_SERVER {
        USER_SERVER
    } else {
        server
    };
    format!("{user}@{server}")
}

pub fn is_group(jid: &str) -> bool {
    jid.ends_with(GROUP_SERVER)
}

pub fn is_lid(jid: &str) -> bool {
    jid.ends_with(LID_SERVER)
}

pub fn is_broadcast(jid: &str) -> bool {
    jid.ends_with(BROADCAST_SERVER)
}

/// Status/broadcast sentinel chats carry the real chat identity in the
/// participant field, not in the remote jid.
pub fn is_status(jid: &str) -> bool {
    jid.starts_with("status")
}

/// First run of 8 or more consecutive ASCII digits in an identifier.
pub fn digit_run(jid: &str) -> Option<&str> {
    let bytes = jid.as_bytes();
    let mut start = None;
    for (i, b) in bytes.iter().enumerate() {
        match (b.is_ascii_digit(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s >= 8 {
                    return Some(&jid[s..i]);
                }
                start = None;
            }
            _ => {}
        }
    }
    match start {
        Some(s) if bytes.len() - s >= 8 => Some(&jid[s..]),
        _ => None,
    }
}

/// Whether two identifiers name the same user, compared by their 8+ digit
/// runs. This tolerates differing identifier encodings (device suffixes,
/// lid vs phone servers) at the cost of conflating numbers that share a
/// long common run; the tolerance is the contract.
pub fn same_user_digits(a: &str, b: &str) -> bool {
    match (digit_run(a), digit_run(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
