use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::util::{escape, split_unescaped, split_unescaped_once, unescape};

/// upper bound for one wire datagram, headers included
pub const MAX_DATAGRAM_SIZE: usize = 512;

const FIELD_DELIMITER: char = ':';
const SEPARATOR: char = '@';

/// characters that must be backslash-escaped inside extra header keys/values
const WIRE_SPECIALS: &[char] = &[':', '@', '|'];

/// One decoded wire datagram:
/// `seq:count:routeChecksum:messageChecksum[:key:value]*@payload`
///
/// `seq` is 1-based; `count` is the total number of fragments of the logical message the
/// payload slice belongs to. The route travels as its checksum only - the receiver resolves
/// it back to the registered path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub seq: u32,
    pub count: u32,
    pub route_checksum: Checksum,
    pub message_checksum: Checksum,
    pub headers: Vec<(String, String)>,
    pub payload: String,
}

/// Encodes a `(route, message, headers)` triple into one or more datagrams of at most
/// [MAX_DATAGRAM_SIZE] bytes each, slicing the message left to right. An empty message still
/// yields exactly one fragment with an empty payload.
pub fn encode(route: &str, message: &str, headers: &[(String, String)]) -> Result<Vec<String>> {
    let checksum_route = Checksum::of(route).to_string();
    let checksum_message = Checksum::of(message).to_string();

    let mut extra = String::new();
    for (key, value) in headers {
        extra.push(FIELD_DELIMITER);
        extra.push_str(&escape(key, WIRE_SPECIALS));
        extra.push(FIELD_DELIMITER);
        extra.push_str(&escape(value, WIRE_SPECIALS));
    }

    let fixed_len = checksum_route.len() + checksum_message.len() + extra.len();
    let mut parts = fragment_count(message.len(), fixed_len)?;

    // the fixed point above is byte arithmetic; slicing at UTF-8 character boundaries can push
    // a cut back a few bytes, and early fragments with fewer seq digits get a few bytes more,
    // so re-slice until the count embedded in the header matches the slices actually produced
    loop {
        let shared = format!("{parts}:{checksum_route}:{checksum_message}{extra}@");
        let slices = slice_payload(message, shared.len())?;
        if slices.len() == parts {
            return Ok(slices
                .iter()
                .enumerate()
                .map(|(i, slice)| format!("{}:{shared}{slice}", i + 1))
                .collect());
        }
        parts = slices.len();
    }
}

/// Greedily slices the message into per-fragment payloads, each filling the byte budget left
/// by its header, cut back to the nearest character boundary.
fn slice_payload(message: &str, shared_len: usize) -> Result<Vec<&str>> {
    let mut slices = Vec::new();
    let mut remaining = message;
    loop {
        let prefix_len = decimal_digits(slices.len() + 1) + 1;
        let overhead = prefix_len + shared_len;
        if overhead >= MAX_DATAGRAM_SIZE {
            return Err(Error::InvalidArgument(format!(
                "headers take {} bytes and leave no payload room in a {}-byte datagram",
                overhead, MAX_DATAGRAM_SIZE
            )));
        }
        let budget = MAX_DATAGRAM_SIZE - overhead;

        let mut cut = budget.min(remaining.len());
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 && !remaining.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "headers take {} bytes and leave no room for a whole character in a {}-byte \
                 datagram",
                overhead, MAX_DATAGRAM_SIZE
            )));
        }

        slices.push(&remaining[..cut]);
        remaining = &remaining[cut..];
        if remaining.is_empty() {
            return Ok(slices);
        }
    }
}

/// The packet count depends on the header length, and the header length (via the digit count
/// of `count` and of each `seq`) depends on the packet count - so iterate to the fixed point,
/// starting from the estimate that ignores header overhead entirely.
fn fragment_count(message_len: usize, fixed_header_len: usize) -> Result<usize> {
    if message_len == 0 {
        return Ok(1);
    }

    let mut parts = message_len.div_ceil(MAX_DATAGRAM_SIZE);
    loop {
        // worst case per fragment: "<seq>:<count>:<cr>:<cm><extra>@" with digits(seq) at its
        // maximum of digits(count); the three field delimiters and the separator add 4
        let overhead = decimal_digits(parts) * 2 + fixed_header_len + 4;
        if overhead >= MAX_DATAGRAM_SIZE {
            return Err(Error::InvalidArgument(format!(
                "headers take {} bytes and leave no payload room in a {}-byte datagram",
                overhead, MAX_DATAGRAM_SIZE
            )));
        }

        let budget = MAX_DATAGRAM_SIZE - overhead;
        let needed = message_len.div_ceil(budget);
        if needed == parts {
            return Ok(parts);
        }
        parts = needed;
    }
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Decodes one received datagram. Any malformed header makes the whole frame undecodable;
/// the caller drops it without affecting other in-progress reassembly.
pub fn decode(datagram: &[u8]) -> Result<Fragment> {
    let text = std::str::from_utf8(datagram)
        .map_err(|_| Error::MalformedFrame("datagram is not valid UTF-8".to_string()))?;

    let (header_block, payload) = split_unescaped_once(text, SEPARATOR).ok_or_else(|| {
        Error::MalformedFrame("missing header/payload separator".to_string())
    })?;

    let tokens = split_unescaped(header_block, FIELD_DELIMITER);
    if tokens.len() < 4 {
        return Err(Error::MalformedFrame(format!(
            "header block has {} fields, expected at least 4",
            tokens.len()
        )));
    }

    let seq: u32 = tokens[0]
        .parse()
        .map_err(|_| Error::MalformedFrame(format!("not a sequence number: {:?}", tokens[0])))?;
    let count: u32 = tokens[1]
        .parse()
        .map_err(|_| Error::MalformedFrame(format!("not a part count: {:?}", tokens[1])))?;
    if count == 0 || seq == 0 || seq > count {
        return Err(Error::MalformedFrame(format!(
            "sequence number {} outside 1..={}",
            seq, count
        )));
    }

    let route_checksum: Checksum = tokens[2].parse()?;
    let message_checksum: Checksum = tokens[3].parse()?;

    let mut headers = Vec::new();
    for pair in tokens[4..].chunks(2) {
        match pair {
            [key, value] => headers.push((unescape(key), unescape(value))),
            _ => {
                return Err(Error::MalformedFrame(format!(
                    "dangling extra header key: {:?}",
                    pair[0]
                )))
            }
        }
    }

    Ok(Fragment {
        seq,
        count,
        route_checksum,
        message_checksum,
        headers,
        payload: payload.to_string(),
    })
}
