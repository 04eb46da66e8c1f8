use std::fmt;

use serde::Serialize;

/// One problem found in an intent document, located by dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Aggregate outcome of validating an intent document. Never fatal on its
/// own; callers decide whether a non-empty report aborts the operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub errors: Vec<ValidationError>,
}

impl Report {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError::new(path, message));
    }

    pub fn merge(&mut self, other: Report) {
        self.errors.extend(other.errors);
    }

    /// Echo the document with `# <-- message` annotations appended to the
    /// lines that declare the offending keys, aligned to one column.
    pub fn annotate(&self, source: &str) -> String {
        let lines: Vec<&str> = source.lines().collect();
        let mut notes: Vec<Option<String>> = vec![None; lines.len()];
        let mut unlocated: Vec<&ValidationError> = Vec::new();

        for error in &self.errors {
            match locate(&lines, &error.path) {
                Some(idx) => {
                    let slot = &mut notes[idx];
                    match slot {
                        Some(existing) => {
                            existing.push_str("; ");
                            existing.push_str(&error.message);
                        }
                        None => *slot = Some(error.message.clone()),
                    }
                }
                None => unlocated.push(error),
            }
        }

        let column = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| notes[*i].is_some())
            .map(|(_, l)| l.len())
            .max()
            .unwrap_or(0)
            + 2;

        let mut out = String::new();
        for (i, line) in lines.iter().enumerate() {
            out.push_str(line);
            if let Some(note) = &notes[i] {
                for _ in line.len()..column {
                    out.push(' ');
                }
                out.push_str("# <-- ");
                out.push_str(note);
            }
            out.push('\n');
        }
        for error in unlocated {
            out.push_str(&format!("# <-- {}: {}\n", error.path, error.message));
        }
        out
    }
}

/// Finds the line declaring the deepest path segment that appears as a YAML
/// key, walking segments outward so `services.api.container` still lands on
/// the `container:` line even when inner segments are synthetic.
fn locate(lines: &[&str], path: &str) -> Option<usize> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    for segment in segments.iter().rev() {
        let needle = format!("{segment}:");
        if let Some(idx) = lines
            .iter()
            .position(|line| line.trim_start().starts_with(&needle))
        {
            return Some(idx);
        }
    }
    None
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "validation failed with {} error(s):", self.errors.len())?;
        for error in &self.errors {
            writeln!(f, "- {}: {}", error.path, error.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotates_offending_lines_in_one_column() {
        let source = "name: app\ntarget: bogus\nservices:\n  api:\n    container: {}\n";
        let mut report = Report::default();
        report.push("target", "must look like team/platform@revision");
        report.push("services.api.container", "exactly one of image/docker");

        let annotated = report.annotate(source);
        let annotated_lines: Vec<&str> = annotated.lines().collect();
        assert!(annotated_lines[1].contains("# <-- must look like"));
        assert!(annotated_lines[4].contains("# <-- exactly one of image/docker"));
        let col_a = annotated_lines[1].find("# <--").unwrap();
        let col_b = annotated_lines[4].find("# <--").unwrap();
        assert_eq!(col_a, col_b, "annotations share a column");
    }

    #[test]
    fn unlocated_errors_trail_the_echo() {
        let mut report = Report::default();
        report.push("target", "required");
        let annotated = report.annotate("name: app\n");
        assert!(annotated.ends_with("# <-- target: required\n"));
    }
}
