/// Convert heading text to an anchor slug.
///
/// Lowercases, keeps alphanumerics, collapses runs of whitespace, `-` and
/// `_` into a single `-`, and drops everything else. Text with no usable
/// characters becomes `section`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;

    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        slug.push_str("section");
    }
    slug
}
