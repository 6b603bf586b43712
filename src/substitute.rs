//! `$key` substitution shared by the fetcher, the loader and the index
//! renderer.

use indexmap::IndexMap;

/// Ordered parameter map for substitution.
pub type Params = IndexMap<String, String>;

/// Replaces every `$key` occurrence in `input` with its value from `params`.
///
/// The input is scanned once, left to right. At each `$` the longest run of
/// `[A-Za-z0-9_]` characters is taken and the longest prefix of that run that
/// names a known parameter is replaced. Produced output is never re-scanned,
/// so values containing `$other` do not trigger further expansion. A `$run`
/// with no known prefix is kept verbatim.
#[must_use]
pub fn substitute(input: &str, params: &Params) -> String {
    if params.is_empty() || !input.contains('$') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let run_len = after
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(after.len());
        let run = &after[..run_len];

        let mut matched = 0;
        for len in (1..=run.len()).rev() {
            if let Some(value) = params.get(&run[..len]) {
                out.push_str(value);
                matched = len;
                break;
            }
        }
        if matched == 0 {
            out.push('$');
            out.push_str(run);
        } else {
            out.push_str(&run[matched..]);
        }
        rest = &after[run_len..];
    }
    out.push_str(rest);
    out
}
