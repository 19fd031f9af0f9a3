// src/utils/html.rs

use std::collections::HashSet;

/// Sanitizes question-set HTML before it is stored.
///
/// Passages keep their formatting tags and tables; scripts, frames, event
/// handler attributes and inline styles are removed. `<mark>` is stripped
/// too because highlight markup is added on the candidate's side only.
pub fn sanitize_passage(input: &str) -> String {
    let mut tags: HashSet<&str> = ammonia::Builder::default().clone_tags();
    tags.remove("mark");
    tags.insert("audio");
    tags.insert("source");

    ammonia::Builder::default()
        .tags(tags)
        .add_tag_attributes("audio", &["controls", "src"])
        .add_tag_attributes("source", &["src", "type"])
        .clean(input)
        .to_string()
}
