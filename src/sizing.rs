pub const LABEL_FONT_SIZE: f64 = 16.0;

/// Per-character width multiplier for a label of `len` characters.
/// Short labels get generous padding; long ones are packed tighter.
fn band_multiplier(len: usize) -> f64 {
    match len {
        1 => 2.0,
        2 => 1.5,
        3 => 1.1,
        4..=5 => 1.0,
        6 => 0.8,
        7..=10 => 0.7,
        _ => 0.6,
    }
}

/// Rendered width of a node whose label is `label`. Only the character
/// count matters; an empty label has zero width.
pub fn estimate_width(label: &str) -> f64 {
    let len = label.chars().count();
    LABEL_FONT_SIZE * len as f64 * band_multiplier(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_follow_label_length() {
        assert_eq!(estimate_width("A"), 32.0);
        assert_eq!(estimate_width("FR"), 48.0);
        assert_eq!(estimate_width("ABCD"), 64.0);
        assert_eq!(estimate_width("ABCDE"), 80.0);
        assert_eq!(estimate_width("abcdefghijkl"), 16.0 * 12.0 * 0.6);
    }

    #[test]
    fn empty_label_is_well_defined() {
        assert_eq!(estimate_width(""), 0.0);
    }

    #[test]
    fn depends_only_on_character_count() {
        assert_eq!(estimate_width("north"), estimate_width("sud_1"));
        assert_eq!(estimate_width("éé"), estimate_width("ab"));
    }

    #[test]
    fn non_empty_labels_are_positive() {
        let mut label = String::new();
        for _ in 0..40 {
            label.push('x');
            assert!(estimate_width(&label) > 0.0, "width for {label:?}");
        }
    }

    #[test]
    fn not_monotonic_across_bands() {
        // Six characters at 0.8 are narrower than five at 1.0.
        assert!(estimate_width("abcdef") < estimate_width("abcde"));
    }
}
