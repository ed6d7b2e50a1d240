pub mod sdp_type;
pub mod session_description;

use rand::Rng;

use crate::ice::ice_candidate::RTCIceCandidateInit;
use crate::{SDP_ATTRIBUTE_CANDIDATE, SDP_ATTRIBUTE_TRICKLE};

pub(crate) const ATTRIBUTE_ICE_UFRAG: &str = "a=ice-ufrag:";
pub(crate) const ATTRIBUTE_ICE_PWD: &str = "a=ice-pwd:";
pub(crate) const ATTRIBUTE_GROUP_BUNDLE: &str = "a=group:BUNDLE";
pub(crate) const ATTRIBUTE_MID: &str = "a=mid:";
const MEDIA_LINE_PREFIX: &str = "m=";

/// Result of one composition pass over a raw description: the rewritten
/// text plus the candidate records stripped out of it, ready to trickle to
/// the remote peer.
pub(crate) struct ComposedDescription {
    pub(crate) sdp: String,
    pub(crate) candidates: Vec<RTCIceCandidateInit>,
}

/// Generates the session-level preamble that per-slot media sections are
/// rendered against.
pub(crate) fn base_description() -> String {
    let session_id: u32 = rand::rng().random();
    format!("v=0\r\no=- {session_id} 2 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n")
}

/// Collects the media tag of every m-line, in order. The tag doubles as the
/// section's media identifier.
pub(crate) fn media_section_ids(raw: &str) -> Vec<String> {
    raw.lines()
        .filter(|line| line.starts_with(MEDIA_LINE_PREFIX))
        .map(|line| {
            line[MEDIA_LINE_PREFIX.len()..]
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_owned()
        })
        .collect()
}

/// Counts the media sections of a description.
pub(crate) fn media_section_count(raw: &str) -> usize {
    raw.lines()
        .filter(|line| line.starts_with(MEDIA_LINE_PREFIX))
        .count()
}

/// Rewrites a raw description for the wire in one line scan:
///
/// * candidate attribute lines are stripped from the body and returned as
///   candidate records carrying their section's m-line index, media
///   identifier and ICE credential fragment;
/// * a trickle support marker is injected after each ICE password line;
/// * one media identifier line is injected per section;
/// * with `bundle` set and more than one section, a single group line
///   naming every media identifier is injected before the first m-line.
pub(crate) fn compose(raw: &str, bundle: bool) -> ComposedDescription {
    let mids = media_section_ids(raw);
    let inject_group = bundle && mids.len() > 1;

    let mut sdp = String::with_capacity(raw.len());
    let mut candidates = vec![];
    let mut section: Option<usize> = None;
    let mut ufrag: Option<String> = None;
    let mut group_injected = false;

    for line in raw.lines() {
        if let Some(fragment) = line.strip_prefix(ATTRIBUTE_ICE_UFRAG) {
            ufrag = Some(fragment.to_owned());
        }

        if line.starts_with(SDP_ATTRIBUTE_CANDIDATE) {
            let index = section.unwrap_or(0);
            candidates.push(RTCIceCandidateInit {
                candidate: line["a=".len()..].to_owned(),
                sdp_mid: mids.get(index).cloned(),
                sdp_mline_index: Some(index as u16),
                username_fragment: ufrag.clone(),
            });
            continue;
        }

        if line.starts_with(MEDIA_LINE_PREFIX) {
            let index = section.map_or(0, |i| i + 1);
            section = Some(index);

            if inject_group && !group_injected {
                sdp.push_str(ATTRIBUTE_GROUP_BUNDLE);
                for mid in &mids {
                    sdp.push(' ');
                    sdp.push_str(mid);
                }
                sdp.push_str("\r\n");
                group_injected = true;
            }

            push_line(&mut sdp, line);
            if let Some(mid) = mids.get(index) {
                sdp.push_str(ATTRIBUTE_MID);
                sdp.push_str(mid);
                sdp.push_str("\r\n");
            }
            continue;
        }

        push_line(&mut sdp, line);

        if line.starts_with(ATTRIBUTE_ICE_PWD) {
            sdp.push_str(SDP_ATTRIBUTE_TRICKLE);
            sdp.push_str("\r\n");
        }
    }

    ComposedDescription { sdp, candidates }
}

/// Appends accumulated candidate records back onto a description body as
/// attribute lines.
pub(crate) fn merge_candidates(sdp: &str, candidates: &[RTCIceCandidateInit]) -> String {
    let mut merged = String::with_capacity(sdp.len() + candidates.len() * 64);
    merged.push_str(sdp);
    if !merged.is_empty() && !merged.ends_with('\n') {
        merged.push_str("\r\n");
    }
    for candidate in candidates {
        merged.push_str("a=");
        merged.push_str(&candidate.candidate);
        merged.push_str("\r\n");
    }
    merged
}

/// Single linear scan for the bundle group marker, independent of any
/// structured parse the media engine performs on the same text.
pub(crate) fn has_bundle_group(sdp: &str) -> bool {
    sdp.lines()
        .any(|line| line.starts_with(ATTRIBUTE_GROUP_BUNDLE))
}

fn push_line(sdp: &mut String, line: &str) {
    sdp.push_str(line);
    sdp.push_str("\r\n");
}
