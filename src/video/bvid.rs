use once_cell::sync::Lazy;
use regex::Regex;

/// Page URL (`https://www.bilibili.com/video/BV…`) or bare `BV…` id, with any
/// trailing path, query or fragment.
const INPUT_PATTERN: &str =
    r"^(?:https?://(?:www\.|m\.)?bilibili\.com/video/)?(BV[0-9A-Za-z]+)(?:[/?#].*)?$";

const BVID_PATTERN: &str = r"^BV[0-9A-Za-z]+$";

static INPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(INPUT_PATTERN).expect("BV input pattern is a valid regex"));
static BVID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(BVID_PATTERN).expect("BV id pattern is a valid regex"));

/// Pull the `BV…` identifier out of user input.
#[must_use]
pub fn extract_bvid(input: &str) -> Option<String> {
    INPUT_RE
        .captures(input.trim())
        .and_then(|captures| captures.get(1))
        .map(|bvid| bvid.as_str().to_string())
}

/// A bare identifier, safe to use as a file name.
#[must_use]
pub fn valid_bvid(bvid: &str) -> bool {
    BVID_RE.is_match(bvid)
}
