//! SVG container codec: hex payload inside a fixed document template.
//!
//! At least 2x overhead; the fallback for hosts that re-compress or reject
//! PNG uploads but serve SVG documents untouched.

use super::CodecError;

const PRE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<!DOCTYPE svg PUBLIC "-//W3C//DTD SVG 1.0//EN" "http://www.w3.org/TR/2001/PR-SVG-20010719/DTD/svg10.dtd">
<svg width="5cm" height="2cm" viewBox="125 134 83 39" xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
  <g>
    <rect style="fill: #ffffff" x="126" y="135" width="80" height="36" rx="10" ry="10"/>
    <rect style="fill: none; fill-opacity:0; stroke-width: 2; stroke: #000000" x="126" y="135" width="80" height="36" rx="10" ry="10"/>
    <text font-size="12.7998" style="fill: #000000;text-anchor:middle;font-family:sans-serif;font-style:normal;font-weight:normal" x="166" y="156.9">
      <tspan x="166" y="156.9">"#;

const POST: &str = r#"</tspan>
    </text>
  </g>
</svg>"#;

pub fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut out = String::with_capacity(PRE.len() + POST.len() + payload.len() * 2);
    out.push_str(PRE);
    out.push_str(&hex::encode(payload));
    out.push_str(POST);
    out.into_bytes()
}

pub fn unwrap(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let text = std::str::from_utf8(data)
        .map_err(|_| CodecError::Unwrap("SVG container is not UTF-8".into()))?;
    let inner = text
        .strip_prefix(PRE)
        .ok_or_else(|| CodecError::Unwrap("document does not start with the expected SVG prolog".into()))?
        .strip_suffix(POST)
        .ok_or_else(|| CodecError::Unwrap("document does not end with the expected SVG epilog".into()))?;
    hex::decode(inner).map_err(|e| CodecError::Unwrap(format!("bad hex payload: {e}")))
}
