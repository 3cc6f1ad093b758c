//! Line-level rewrites of SDP text.
//!
//! Every function here is pure and preserves the line separator of its input
//! (`\r\n` for real engines, bare `\n` is tolerated). Lines that are not
//! targeted by a rewrite are copied byte for byte.

use crate::utils::random_ice_chars;

/// Attribute prefix of the negotiation token marker.
pub const TOKEN_MARKER: &str = "a=x-offer-token:";

const ICE_UFRAG: &str = "a=ice-ufrag:";
const ICE_PWD: &str = "a=ice-pwd:";
const RTPMAP: &str = "a=rtpmap:";

const UFRAG_LEN: usize = 16;
const PWD_LEN: usize = 32;

fn separator(sdp: &str) -> &'static str {
    if sdp.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Moves the payload type of `codec` to the front of the `m=<kind>` line.
///
/// Only the first section of the requested kind is examined, and only
/// `a=rtpmap` lines inside that section are considered. When the section or
/// the codec is missing the input is returned unchanged.
pub fn prefer_codec(sdp: &str, kind: &str, codec: &str) -> String {
    let sep = separator(sdp);
    let mut lines: Vec<String> = sdp.split(sep).map(str::to_owned).collect();

    let header = format!("m={kind} ");
    let Some(mline_index) = lines.iter().position(|line| line.starts_with(&header)) else {
        return sdp.to_owned();
    };

    let payload_type = lines[mline_index + 1..]
        .iter()
        .take_while(|line| !line.starts_with("m="))
        .find_map(|line| rtpmap_payload_type(line, codec));
    let Some(payload_type) = payload_type else {
        return sdp.to_owned();
    };

    let mut fields: Vec<&str> = lines[mline_index].split(' ').collect();
    if fields.len() < 4 {
        return sdp.to_owned();
    }
    let Some(position) = fields[3..].iter().position(|pt| *pt == payload_type) else {
        return sdp.to_owned();
    };
    let moved = fields.remove(3 + position);
    fields.insert(3, moved);
    lines[mline_index] = fields.join(" ");

    lines.join(sep)
}

/// `a=rtpmap:<pt> <name>/<clock>[/<channels>]` → `<pt>` when `<name>` matches.
fn rtpmap_payload_type<'a>(line: &'a str, codec: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(RTPMAP)?;
    let (payload_type, encoding) = rest.split_once(' ')?;
    let name = encoding.split('/').next()?;
    name.eq_ignore_ascii_case(codec).then_some(payload_type)
}

/// Appends (or replaces) the token marker line.
pub fn embed_token(sdp: &str, token: &str) -> String {
    let sep = separator(sdp);
    let mut out: String = sdp
        .split(sep)
        .filter(|line| !line.starts_with(TOKEN_MARKER))
        .collect::<Vec<_>>()
        .join(sep);
    if !out.is_empty() && !out.ends_with(sep) {
        out.push_str(sep);
    }
    out.push_str(TOKEN_MARKER);
    out.push_str(token);
    out.push_str(sep);
    out
}

/// Token carried by the marker line, if any.
pub fn extract_token(sdp: &str) -> Option<&str> {
    sdp.lines()
        .find_map(|line| line.strip_prefix(TOKEN_MARKER))
        .map(|token| token.trim_end_matches('\r'))
}

/// Exact-string check for a marker carrying `token`.
pub fn contains_token(sdp: &str, token: &str) -> bool {
    !token.is_empty()
        && sdp
            .lines()
            .filter_map(|line| line.strip_prefix(TOKEN_MARKER))
            .any(|found| found.trim_end_matches('\r') == token)
}

/// Replaces every `a=ice-ufrag`/`a=ice-pwd` value with fresh random values.
///
/// One pair is generated per call and shared by all sections, since bundled
/// sections must agree on their credentials.
pub fn regenerate_ice_credentials(sdp: &str) -> String {
    let sep = separator(sdp);
    let ufrag = random_ice_chars(UFRAG_LEN);
    let pwd = random_ice_chars(PWD_LEN);

    sdp.split(sep)
        .map(|line| {
            if line.starts_with(ICE_UFRAG) {
                format!("{ICE_UFRAG}{ufrag}")
            } else if line.starts_with(ICE_PWD) {
                format!("{ICE_PWD}{pwd}")
            } else {
                line.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(sep)
}

/// Values of the first `a=ice-ufrag` and `a=ice-pwd` lines.
pub fn ice_credentials(sdp: &str) -> Option<(&str, &str)> {
    let ufrag = sdp.lines().find_map(|line| line.strip_prefix(ICE_UFRAG))?;
    let pwd = sdp.lines().find_map(|line| line.strip_prefix(ICE_PWD))?;
    Some((ufrag.trim_end_matches('\r'), pwd.trim_end_matches('\r')))
}
