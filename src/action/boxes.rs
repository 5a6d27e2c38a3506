//! Coordinate box parsing and normalization.
//!
//! Boxes arrive as `(x,y)`, `(x1,y1,x2,y2)`, `[..]`, or markup such as
//! `<point>x y</point>`, on whatever grid the model was trained on. They are
//! normalized to screen fractions and re-serialized as `[x1,y1,x2,y2]`.

use regex::Regex;
use std::sync::LazyLock;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid number regex"));

static POINT_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<point>(.*?)</point>").expect("valid point regex"));

static BBOX_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<bbox>(.*?)</bbox>").expect("valid bbox regex"));

/// Reference grid used when no factors are supplied.
pub const DEFAULT_FACTOR: f64 = 1000.0;

/// Extract the numbers of a box value, in order.
pub fn parse_box(value: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(value)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect()
}

/// Canonical serialization: `[x1,y1,x2,y2]`.
///
/// Every value carries a decimal point, so edge boxes read `[1.0,1.0,1.0,1.0]`.
pub fn format_box(coords: &[f64; 4]) -> String {
    let parts: Vec<String> = coords.iter().map(|c| format_coord(*c)).collect();
    format!("[{}]", parts.join(","))
}

fn format_coord(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') || !value.is_finite() {
        text
    } else {
        format!("{}.0", text)
    }
}

/// True for text already in canonical normalized form, e.g. `[0.1,0.2,0.1,0.2]`.
///
/// Requires every value in `[0,1]` and at least one written with a decimal
/// point, so raw grid points like `(1,1)` are still divided.
fn is_normalized(value: &str, coords: &[f64]) -> bool {
    value.contains('.') && coords.iter().all(|c| (0.0..=1.0).contains(c))
}

/// Normalize a box value by `(width_factor, height_factor)`.
///
/// Returns None when the value does not hold 2 or 4 numbers, or when a
/// factor is not a positive finite number.
pub fn normalize_box(value: &str, factors: (f64, f64)) -> Option<String> {
    let coords = parse_box(value);
    let (fw, fh) = factors;
    if !(fw.is_finite() && fw > 0.0 && fh.is_finite() && fh > 0.0) {
        return None;
    }
    let four = match coords.as_slice() {
        [x, y] => [*x, *y, *x, *y],
        [x1, y1, x2, y2] => [*x1, *y1, *x2, *y2],
        _ => return None,
    };

    if is_normalized(value, &coords) {
        return Some(format_box(&four));
    }

    Some(format_box(&[four[0] / fw, four[1] / fh, four[2] / fw, four[3] / fh]))
}

/// Rewrite box markup into plain tuples so the call grammar can read it.
pub fn strip_box_markup(text: &str) -> String {
    let text = text.replace("<|box_start|>", "").replace("<|box_end|>", "");
    let text = POINT_TAG_RE.replace_all(&text, |caps: &regex::Captures| tuple_from(&caps[1]));
    BBOX_TAG_RE
        .replace_all(&text, |caps: &regex::Captures| tuple_from(&caps[1]))
        .into_owned()
}

fn tuple_from(inner: &str) -> String {
    let nums: Vec<String> = NUMBER_RE.find_iter(inner).map(|m| m.as_str().to_string()).collect();
    format!("({})", nums.join(","))
}

/// Center of a normalized box.
pub fn box_center(coords: &[f64; 4]) -> (f64, f64) {
    ((coords[0] + coords[2]) / 2.0, (coords[1] + coords[3]) / 2.0)
}

/// Parse a canonical box string into exactly four values.
pub fn parse_canonical(value: &str) -> Option<[f64; 4]> {
    match parse_box(value).as_slice() {
        [x, y] => Some([*x, *y, *x, *y]),
        [x1, y1, x2, y2] => Some([*x1, *y1, *x2, *y2]),
        _ => None,
    }
}
