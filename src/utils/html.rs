/// Sanitizes user-supplied text before it is stored.
///
/// Whitelist-based: safe inline tags survive, `<script>`, `<iframe>` and
/// event-handler attributes are stripped along with their content.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Sanitizes and trims an optional field; blank results become `None`.
pub fn clean_optional(input: Option<&str>) -> Option<String> {
    input
        .map(|value| clean_html(value.trim()))
        .filter(|value| !value.is_empty())
}
