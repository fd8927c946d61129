use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StudyError;

/// One row of the public class search response.
///
/// The endpoint returns one row per section, so the same course appears
/// several times.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub catalog_nbr: String,
    #[serde(default)]
    pub descr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub code: String,
    pub title: String,
}

/// Builds the display code, e.g. `("cs", "2100")` -> `"CS 2100"`.
pub fn course_code(subject: &str, number: &str) -> Result<String, StudyError> {
    let subject = subject.trim();
    let number = number.trim();
    if subject.is_empty() || number.is_empty() {
        return Err(StudyError::InvalidValue(
            "course subject and number must not be empty".into(),
        ));
    }
    if !subject.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(StudyError::InvalidValue(format!(
            "invalid course subject: {subject}"
        )));
    }
    if !number.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StudyError::InvalidValue(format!(
            "invalid course number: {number}"
        )));
    }
    Ok(format!(
        "{} {}",
        subject.to_ascii_uppercase(),
        number.to_ascii_uppercase()
    ))
}

/// Normalizes user input such as `"cs2100"`, `"CS  2100"` or `"Cs 2100"`.
pub fn normalize_course_code(input: &str) -> Result<String, StudyError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let split = compact
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| StudyError::InvalidValue(format!("invalid course code: {input}")))?;
    let (subject, number) = compact.split_at(split);
    course_code(subject, number)
}

/// Parses one catalog page. An empty page marks the end of the listing.
pub fn parse_page(body: &str) -> Result<Vec<CatalogEntry>, StudyError> {
    serde_json::from_str(body)
        .map_err(|e| StudyError::InvalidValue(format!("invalid catalog page: {e}")))
}

/// Deduplicates entries by course code, keeping the first non-empty title,
/// and returns them sorted by code.
pub fn collect_courses<'a>(entries: impl IntoIterator<Item = &'a CatalogEntry>) -> Vec<Course> {
    let mut by_code: BTreeMap<String, String> = BTreeMap::new();
    for entry in entries {
        let Ok(code) = course_code(&entry.subject, &entry.catalog_nbr) else {
            continue;
        };
        let title = entry.descr.trim();
        let slot = by_code.entry(code).or_default();
        if slot.is_empty() && !title.is_empty() {
            *slot = title.to_string();
        }
    }
    by_code
        .into_iter()
        .map(|(code, title)| Course { code, title })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_code_uppercases() {
        assert_eq!(course_code("cs", "2100").unwrap(), "CS 2100");
        assert_eq!(course_code(" MATH ", "3351").unwrap(), "MATH 3351");
        assert!(course_code("", "2100").is_err());
        assert!(course_code("C$", "2100").is_err());
    }

    #[test]
    fn normalize_accepts_common_spellings() {
        assert_eq!(normalize_course_code("cs2100").unwrap(), "CS 2100");
        assert_eq!(normalize_course_code("CS  2100").unwrap(), "CS 2100");
        assert_eq!(normalize_course_code("Stat 3120").unwrap(), "STAT 3120");
        assert!(normalize_course_code("calculus").is_err());
        assert!(normalize_course_code("2100").is_err());
    }

    #[test]
    fn parse_empty_page() {
        assert!(parse_page("[]").unwrap().is_empty());
        assert!(parse_page("{\"oops\": 1}").is_err());
    }

    #[test]
    fn collect_dedupes_sections() {
        let body = r#"[
            {"subject": "CS", "catalog_nbr": "2100", "descr": "Data Structures and Algorithms 1", "class_section": "001"},
            {"subject": "CS", "catalog_nbr": "2100", "descr": "", "class_section": "002"},
            {"subject": "APMA", "catalog_nbr": "3080", "descr": "Linear Algebra"},
            {"subject": "", "catalog_nbr": "1000", "descr": "Broken"}
        ]"#;
        let entries = parse_page(body).unwrap();
        let courses = collect_courses(&entries);
        assert_eq!(
            courses,
            vec![
                Course {
                    code: "APMA 3080".into(),
                    title: "Linear Algebra".into()
                },
                Course {
                    code: "CS 2100".into(),
                    title: "Data Structures and Algorithms 1".into()
                },
            ]
        );
    }
}
