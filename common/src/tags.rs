use std::collections::HashSet;

use api::{photo::PhotoMetadata, tag::Tag};

// strip the stray quoting and NULs that show up in exif strings and model output
pub fn clean_tag_name(name: &str) -> &str {
    name.trim_matches(|c| c == '"' || c == '\0').trim()
}

// accumulates tags, dropping empty names and case-insensitive repeats
struct TagSet {
    seen: HashSet<String>,
    tags: Vec<Tag>,
}

impl TagSet {
    fn with_capacity(n: usize) -> Self {
        TagSet {
            seen: HashSet::with_capacity(n),
            tags: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, mut tag: Tag) {
        let name = clean_tag_name(&tag.name);
        if name.is_empty() {
            return;
        }

        if !self.seen.insert(name.to_lowercase()) {
            return;
        }

        tag.name = name.to_owned();
        self.tags.push(tag);
    }
}

// tags derived from the file itself, before any provider has seen it
//
// in order: extension, media subtype, camera make, model, lens, ISO<n>, and GPS
// when a location is present
pub fn build_heuristic_tags(metadata: Option<&PhotoMetadata>, ext: &str, mime: &str) -> Vec<Tag> {
    let mut set = TagSet::with_capacity(8);

    let ext = ext.trim().to_lowercase();
    set.push(Tag::ai(ext.trim_start_matches('.')));

    if let Some((_, subtype)) = mime.split_once('/') {
        set.push(Tag::ai(subtype.trim()));
    }

    let Some(metadata) = metadata else {
        return set.tags;
    };

    for value in [&metadata.make, &metadata.model, &metadata.lens]
        .into_iter()
        .flatten()
    {
        set.push(Tag::ai(value.as_str()));
    }

    if let Some(iso) = metadata.iso.filter(|iso| *iso > 0) {
        set.push(Tag::ai(format!("ISO{iso}")));
    }

    if metadata.gps.is_some() {
        set.push(Tag::ai("GPS"));
    }

    set.tags
}

// union of two tag lists
//
// existing tags keep their position and their source/score; incoming tags are
// appended in order, skipping any name already present (ignoring case)
pub fn merge_tags(existing: &[Tag], incoming: &[Tag]) -> Vec<Tag> {
    let mut set = TagSet::with_capacity(existing.len() + incoming.len());

    for tag in existing.iter().chain(incoming) {
        set.push(tag.clone());
    }

    set.tags
}

// number of tags in `after` that were not in `before`
pub fn count_added(before: &[Tag], after: &[Tag]) -> usize {
    let before = before
        .iter()
        .map(|t| clean_tag_name(&t.name).to_lowercase())
        .collect::<HashSet<_>>();

    after
        .iter()
        .filter(|t| !before.contains(&t.name.to_lowercase()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    use api::{
        photo::GpsCoordinate,
        tag::{TagSource, tag_names},
    };

    #[test]
    fn merge_keeps_first_occurrence() {
        let existing = vec![Tag::user("Beach"), Tag::user("sunset")];
        let incoming = vec![Tag::ai("beach"), Tag::ai("Dog")];

        let merged = merge_tags(&existing, &incoming);

        assert_eq!(tag_names(&merged), vec!["Beach", "sunset", "Dog"]);
        assert_eq!(merged[0].source, TagSource::User);
        assert_eq!(merged[2].source, TagSource::Ai);
    }

    #[test]
    fn merge_cleans_names() {
        let incoming = vec![
            Tag::ai("\"cat\""),
            Tag::ai("  "),
            Tag::ai("\0"),
            Tag::ai("CAT"),
            Tag::ai(" night ").with_score(0.5),
        ];

        let merged = merge_tags(&[], &incoming);

        assert_eq!(tag_names(&merged), vec!["cat", "night"]);
        assert_eq!(merged[1].score, Some(0.5));
    }

    #[test]
    fn merge_with_nothing_new_is_identity() {
        let existing = vec![Tag::user("a"), Tag::ai("b")];

        assert_eq!(merge_tags(&existing, &[Tag::ai("A")]), existing);
        assert_eq!(count_added(&existing, &existing), 0);
    }

    #[test]
    fn heuristics_without_metadata() {
        let tags = build_heuristic_tags(None, ".JPG", "image/jpeg");

        assert_eq!(tag_names(&tags), vec!["jpg", "jpeg"]);
        assert!(tags.iter().all(|t| t.source == TagSource::Ai));
    }

    #[test]
    fn heuristics_dedup_extension_and_subtype() {
        let tags = build_heuristic_tags(None, ".png", "image/png");

        assert_eq!(tag_names(&tags), vec!["png"]);
    }

    #[test]
    fn heuristics_from_metadata() {
        let metadata = PhotoMetadata {
            make: Some("Canon".to_owned()),
            model: Some("EOS R5".to_owned()),
            lens: Some("".to_owned()),
            iso: Some(200),
            gps: Some(GpsCoordinate {
                latitude: 1.0,
                longitude: 2.0,
            }),
            ..Default::default()
        };

        let tags = build_heuristic_tags(Some(&metadata), ".jpg", "image/jpeg");

        assert_eq!(
            tag_names(&tags),
            vec!["jpg", "jpeg", "Canon", "EOS R5", "ISO200", "GPS"]
        );
    }

    #[test]
    fn heuristics_skip_zero_iso_and_bad_mime() {
        let metadata = PhotoMetadata {
            iso: Some(0),
            ..Default::default()
        };

        let tags = build_heuristic_tags(Some(&metadata), "", "garbage");

        assert!(tags.is_empty());
    }
}
