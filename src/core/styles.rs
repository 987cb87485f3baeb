use crate::core::state::ImageStyle;

const BUILTIN: &[(&str, &str, &str, &str)] = &[
    (
        "watercolor",
        "Watercolor",
        "https://picsum.photos/seed/watercolor/200/200",
        "A beautiful and whimsical watercolor illustration, soft and dreamy.",
    ),
    (
        "cartoon",
        "Cartoon",
        "https://picsum.photos/seed/cartoon/200/200",
        "A fun and vibrant cartoon style, with bold outlines and bright colors.",
    ),
    (
        "storybook",
        "Classic Storybook",
        "https://picsum.photos/seed/storybook/200/200",
        "A classic, detailed storybook illustration style, rich in texture and detail.",
    ),
    (
        "pixel_art",
        "Pixel Art",
        "https://picsum.photos/seed/pixelart/200/200",
        "A colorful and charming pixel art style, reminiscent of classic video games.",
    ),
    (
        "anime",
        "Anime",
        "https://picsum.photos/seed/anime/200/200",
        "A vibrant and expressive anime style, with sharp lines and dramatic lighting.",
    ),
    (
        "claymation",
        "Claymation",
        "https://picsum.photos/seed/claymation/200/200",
        "A charming claymation style, with visible fingerprints and textures, as if sculpted from clay.",
    ),
];

pub fn builtin_styles() -> Vec<ImageStyle> {
    BUILTIN
        .iter()
        .map(|(id, name, preview, prompt)| ImageStyle {
            id: id.to_string(),
            name: name.to_string(),
            preview_ref: preview.to_string(),
            style_prompt_fragment: prompt.to_string(),
        })
        .collect()
}

pub fn find_style<'a>(styles: &'a [ImageStyle], id: &str) -> Option<&'a ImageStyle> {
    styles.iter().find(|s| s.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_ids_are_unique() {
        let styles = builtin_styles();
        let ids: HashSet<_> = styles.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), styles.len());
        assert_eq!(styles[0].id, "watercolor");
    }

    #[test]
    fn test_find_style() {
        let styles = builtin_styles();
        assert_eq!(find_style(&styles, "anime").unwrap().name, "Anime");
        assert!(find_style(&styles, "oil").is_none());
    }
}
