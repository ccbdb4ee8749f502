//! Line framing for the verifier request/response channel.
//!
//! There are no request identifiers: a response belongs to the request
//! immediately before it, so callers must keep one request in flight.

use crate::signing::Verdict;

pub const VERIFY_PREFIX: &str = "VERIFY:";
pub const RESULT_PREFIX: &str = "AUTH_RESULT:";

pub fn encode_request(signed_packet: &str) -> String {
    format!("{VERIFY_PREFIX}{signed_packet}\n")
}

/// Returns the signed packet carried by a request line, if it is one.
pub fn decode_request(line: &str) -> Option<&str> {
    strip_line_ending(line).strip_prefix(VERIFY_PREFIX)
}

pub fn encode_response(verdict: Verdict) -> String {
    format!("{RESULT_PREFIX}{verdict}\n")
}

/// Returns the verdict carried by a response line. Anything else on the
/// channel, including unknown verdict words, yields `None`.
pub fn decode_response(line: &str) -> Option<Verdict> {
    strip_line_ending(line)
        .strip_prefix(RESULT_PREFIX)
        .and_then(|v| v.parse().ok())
}

fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}
