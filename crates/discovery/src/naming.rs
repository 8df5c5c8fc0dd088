/// `"my-cool_app"` → `"My Cool App"`.
pub(crate) fn display_name(raw: &str) -> String {
    let spaced: String = raw
        .chars()
        .map(|c| if c == '-' || c == '_' { ' ' } else { c })
        .collect();
    title_case(&spaced)
}

/// Upper-cases the first letter of each word and lower-cases the rest.
pub(crate) fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut at_word_start = true;
    for c in raw.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// First DNS label of a host, as a display name.
pub(crate) fn name_from_host(host: &str) -> String {
    let label = host.split('.').next().unwrap_or(host);
    display_name(label)
}
