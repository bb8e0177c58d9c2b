//! Content-type negotiation.
//!
//! Picks the highest-q-weighted acceptable type the deployment supports.
//! Ties break on candidate order; no acceptable match falls back to the
//! configured default (plain text out of the box).

pub fn negotiate(accept: &str, supported: &[String], fallback: &str) -> String {
    let mut best: Option<(f32, &str)> = None;

    for candidate in accept.split(',') {
        let mut parts = candidate.split(';');
        let Some(media) = parts.next().map(str::trim) else {
            continue;
        };
        if media.is_empty() {
            continue;
        }
        let weight = parts
            .filter_map(|param| {
                let (name, value) = param.split_once('=')?;
                if name.trim().eq_ignore_ascii_case("q") {
                    value.trim().parse::<f32>().ok()
                } else {
                    None
                }
            })
            .next()
            .unwrap_or(1.0);
        if weight <= 0.0 {
            continue;
        }
        let Some(matched) = match_supported(media, supported) else {
            continue;
        };
        // Strictly-greater keeps the earliest candidate on ties.
        let better = match best {
            None => true,
            Some((best_weight, _)) => weight > best_weight,
        };
        if better {
            best = Some((weight, matched));
        }
    }

    best.map(|(_, matched)| matched.to_string())
        .unwrap_or_else(|| fallback.to_string())
}

fn match_supported<'a>(media: &str, supported: &'a [String]) -> Option<&'a str> {
    if media == "*/*" {
        return supported.first().map(String::as_str);
    }
    if let Some(prefix) = media.strip_suffix("/*") {
        return supported
            .iter()
            .map(String::as_str)
            .find(|candidate| candidate.starts_with(prefix) && candidate[prefix.len()..].starts_with('/'));
    }
    supported
        .iter()
        .map(String::as_str)
        .find(|candidate| candidate.eq_ignore_ascii_case(media))
}
