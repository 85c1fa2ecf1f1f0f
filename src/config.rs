/// Line-oriented dataset configuration
///
/// A dataset is described by a small directive file, one `key=value` pair
/// per line:
///
/// ```text
/// classes=2
/// road
/// background
/// localized_error=kitti
/// training=train.tensors
/// testing=test.tensors
/// ```
///
/// `classes=N` is followed by exactly N lines, each one class name.
/// Unrecognized lines are ignored.
use std::io::BufRead;
use std::path::PathBuf;

use crate::weighting::{self, LocalizedErrorFn};
use crate::{DatasetError, Result};

/// Parsed dataset configuration.
#[derive(Debug, Clone, Default)]
pub struct DatasetConfig {
    /// Number of classes in the label maps.
    pub classes: usize,

    /// Ordered class names, one per class.
    pub class_names: Vec<String>,

    /// Weighting policy name from the `localized_error` directive, if any.
    pub localized_error: Option<String>,

    /// Training tensor stream file; `None` leaves the partition empty.
    pub training: Option<PathBuf>,

    /// Testing tensor stream file; `None` leaves the partition empty.
    pub testing: Option<PathBuf>,
}

impl DatasetConfig {
    /// Parse a directive file from its start.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut config = Self::default();
        let mut lines = reader.lines();

        while let Some(line) = lines.next() {
            let line = line?;

            if let Some(count) = parse_count(&line, "classes") {
                config.classes = count;
                for parsed in 0..count {
                    match lines.next() {
                        Some(name) => config.class_names.push(name?.trim_end().to_string()),
                        None => {
                            return Err(DatasetError::Config(format!(
                                "classes={count} declared but the file ends after {parsed} names"
                            )))
                        }
                    }
                }
            } else if let Some(name) = parse_value(&line, "localized_error") {
                config.localized_error = Some(name.to_string());
            } else if let Some(path) = parse_value(&line, "training") {
                config.training = Some(PathBuf::from(path));
            } else if let Some(path) = parse_value(&line, "testing") {
                config.testing = Some(PathBuf::from(path));
            }
        }

        log::debug!(
            "dataset config: {} classes, training={:?}, testing={:?}",
            config.classes,
            config.training,
            config.testing
        );
        Ok(config)
    }

    /// The weighting callback selected by the `localized_error` directive,
    /// or the uniform default when the directive is absent.
    pub fn error_function(&self) -> LocalizedErrorFn {
        match &self.localized_error {
            Some(name) => weighting::localized_error_by_name(name),
            None => weighting::default_localized_error,
        }
    }
}

/// Split a `key=value` line, tolerating surrounding whitespace.
/// `None` if the line is not this key's directive.
fn parse_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.trim_start().strip_prefix(key)?;
    let rest = rest.trim_start().strip_prefix('=')?;
    Some(rest.trim())
}

fn parse_count(line: &str, key: &str) -> Option<usize> {
    parse_value(line, key)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_full_config() {
        let text = "\
classes=2
road
background
localized_error=kitti
training=/data/train.tensors
testing=/data/test.tensors
";
        let config = DatasetConfig::parse(Cursor::new(text)).unwrap();
        assert_eq!(config.classes, 2);
        assert_eq!(config.class_names, vec!["road", "background"]);
        assert_eq!(config.localized_error.as_deref(), Some("kitti"));
        assert_eq!(
            config.training.as_deref().unwrap().to_str(),
            Some("/data/train.tensors")
        );
        assert_eq!(
            config.testing.as_deref().unwrap().to_str(),
            Some("/data/test.tensors")
        );
    }

    #[test]
    fn test_unrecognized_lines_are_ignored() {
        let text = "\
# a comment of sorts
speed=fast
training=train.tensors
trailing garbage
";
        let config = DatasetConfig::parse(Cursor::new(text)).unwrap();
        assert_eq!(config.classes, 0);
        assert!(config.testing.is_none());
        assert_eq!(
            config.training.as_deref().unwrap().to_str(),
            Some("train.tensors")
        );
    }

    #[test]
    fn test_whitespace_around_directives() {
        let text = "  training =  spaced.tensors  \n";
        let config = DatasetConfig::parse(Cursor::new(text)).unwrap();
        assert_eq!(
            config.training.as_deref().unwrap().to_str(),
            Some("spaced.tensors")
        );
    }

    #[test]
    fn test_missing_class_names_is_an_error() {
        let text = "classes=3\nroad\n";
        let err = DatasetConfig::parse(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, DatasetError::Config(_)));
    }

    #[test]
    fn test_error_function_resolution() {
        let mut config = DatasetConfig::default();
        assert_eq!((config.error_function())(3, 0), 1.0);

        config.localized_error = Some("kitti".to_string());
        assert_eq!((config.error_function())(3, 0), 0.0);

        config.localized_error = Some("mystery".to_string());
        assert_eq!((config.error_function())(3, 0), 1.0);
    }

    #[test]
    fn test_prefix_keys_do_not_match() {
        let text = "trainingset=oops.tensors\n";
        let config = DatasetConfig::parse(Cursor::new(text)).unwrap();
        assert!(config.training.is_none());
    }
}
