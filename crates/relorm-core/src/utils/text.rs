//! Identifier helpers used to derive table and column names.
//!
//! Entity and attribute names are CamelCase (`CarDriver`, `OwnerID`); tables
//! and columns are snake_case, with tables pluralized (`car_drivers`).

use convert_case::{Case, Casing};

/// Converts a CamelCase identifier to snake_case.
///
/// # Examples
///
/// ```
/// use relorm_core::utils::text::snake_case;
///
/// assert_eq!(snake_case("CarDriver"), "car_driver");
/// assert_eq!(snake_case("OwnerID"), "owner_id");
/// assert_eq!(snake_case("brand"), "brand");
/// ```
pub fn snake_case(s: &str) -> String {
    s.to_case(Case::Snake)
}

/// Returns the English plural of a lowercase word.
///
/// Only the regular inflections are handled: `-y` after a consonant becomes
/// `-ies`, sibilant endings take `-es`, and everything else takes `-s`.
///
/// # Examples
///
/// ```
/// use relorm_core::utils::text::pluralize;
///
/// assert_eq!(pluralize("car"), "cars");
/// assert_eq!(pluralize("category"), "categories");
/// assert_eq!(pluralize("box"), "boxes");
/// assert_eq!(pluralize("key"), "keys");
/// ```
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if before.is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{stem}ies");
        }
        return format!("{word}s");
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|end| word.ends_with(end)) {
        return format!("{word}es");
    }
    format!("{word}s")
}

/// Converts a CamelCase identifier into a pluralized snake_case table name.
///
/// Only the last word is pluralized.
///
/// # Examples
///
/// ```
/// use relorm_core::utils::text::snake_plural;
///
/// assert_eq!(snake_plural("Car"), "cars");
/// assert_eq!(snake_plural("CarDriver"), "car_drivers");
/// assert_eq!(snake_plural("Category"), "categories");
/// ```
pub fn snake_plural(s: &str) -> String {
    let snake = snake_case(s);
    match snake.rsplit_once('_') {
        Some((head, last)) => format!("{head}_{}", pluralize(last)),
        None => pluralize(&snake),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case_acronym_suffix() {
        assert_eq!(snake_case("CarID"), "car_id");
        assert_eq!(snake_case("CarType"), "car_type");
        assert_eq!(snake_case("CreatedAt"), "created_at");
    }

    #[test]
    fn test_pluralize_vowel_y() {
        assert_eq!(pluralize("day"), "days");
    }

    #[test]
    fn test_pluralize_sibilants() {
        assert_eq!(pluralize("bus"), "buses");
        assert_eq!(pluralize("church"), "churches");
        assert_eq!(pluralize("dish"), "dishes");
    }

    #[test]
    fn test_pluralize_empty() {
        assert_eq!(pluralize(""), "");
    }

    #[test]
    fn test_snake_plural_multiword() {
        assert_eq!(snake_plural("Owner"), "owners");
        assert_eq!(snake_plural("Wheel"), "wheels");
        assert_eq!(snake_plural("Component"), "components");
        assert_eq!(snake_plural("BodyCategory"), "body_categories");
    }
}
