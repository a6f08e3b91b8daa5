use std::path::Path;

/// Reads class labels, one per line. A missing or unreadable file yields
/// an empty list.
pub fn load_labels(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(raw) => raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            log::warn!("class labels {} unavailable: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Label for a class id, falling back to the numeric id.
pub fn label_for(labels: &[String], class_id: u32) -> String {
    labels
        .get(class_id as usize)
        .cloned()
        .unwrap_or_else(|| format!("class{}", class_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_non_empty_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.txt");
        std::fs::write(&path, "pothole\n\n  crack \n").unwrap();
        let labels = load_labels(&path);
        assert_eq!(labels, vec!["pothole".to_string(), "crack".to_string()]);
        assert_eq!(label_for(&labels, 1), "crack");
        assert_eq!(label_for(&labels, 7), "class7");
    }

    #[test]
    fn missing_file_gives_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_labels(&dir.path().join("nope.txt")).is_empty());
    }
}
