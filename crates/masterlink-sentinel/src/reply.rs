//! Parsing of the sentinel's `get-master-addr-by-name` reply.
//!
//! A healthy reply is a two-element array:
//!
//! ```text
//! *2\r\n$9\r\n127.0.0.1\r\n$4\r\n6379\r\n
//! ```
//!
//! Split on `\r\n`, field 2 is the host and field 4 is the port. Anything
//! shorter (a nil array when the name is unknown, an error line) is
//! malformed.

use crate::error::{ResolveError, ResolveResult};

/// The query line sent to the sentinel.
pub fn query(master_name: &str) -> String {
    format!("sentinel get-master-addr-by-name {master_name}\n")
}

/// Extract `host:port` from a raw reply.
pub fn parse_master_addr(reply: &str) -> ResolveResult<String> {
    let fields: Vec<&str> = reply.split("\r\n").collect();
    if fields.len() < 5 {
        return Err(ResolveError::MalformedReply {
            fields: fields.len(),
        });
    }

    let host = fields[2];
    let port = fields[4];
    if host.contains(':') && !host.starts_with('[') {
        // Bare IPv6 literal.
        Ok(format!("[{host}]:{port}"))
    } else {
        Ok(format!("{host}:{port}"))
    }
}

/// Whether `reply` holds a whole sentinel answer.
///
/// A sentinel keeps the connection open after replying, so the reader
/// cannot wait for EOF. Complete means every line is `\r\n`-terminated
/// and either an error/status line, a nil or empty array, or an array
/// whose elements have all arrived. Non-RESP text is complete once five
/// terminated fields are in.
pub fn is_complete(reply: &str) -> bool {
    let Some(body) = reply.strip_suffix("\r\n") else {
        return false;
    };
    let mut lines = body.split("\r\n");
    let header = lines.next().unwrap_or_default();

    match header.as_bytes().first() {
        Some(b'-' | b'+' | b':') => true,
        Some(b'*') => match header[1..].parse::<i64>() {
            Ok(len) if len <= 0 => true,
            Ok(len) => (0..len).all(|_| match lines.next() {
                Some(line) if line.starts_with('$') && !line.starts_with("$-") => {
                    lines.next().is_some()
                }
                Some(_) => true,
                None => false,
            }),
            Err(_) => true,
        },
        _ => reply.split("\r\n").count() > 5,
    }
}
