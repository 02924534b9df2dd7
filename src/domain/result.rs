//! Result type alias for geosync

use super::errors::SyncError;

/// Result of every fallible library call
///
/// ```
/// use geosync::domain::result::Result;
/// use geosync::domain::errors::SyncError;
///
/// fn require_id(raw: Option<&str>) -> Result<u64> {
///     raw.ok_or_else(|| SyncError::Schema("identifier missing".to_string()))?
///         .parse()
///         .map_err(|e| SyncError::Schema(format!("identifier not numeric: {e}")))
/// }
///
/// assert_eq!(require_id(Some("42")).unwrap(), 42);
/// assert!(require_id(None).is_err());
/// ```
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_layer(raw: &str) -> Result<u64> {
        raw.parse()
            .map_err(|e| SyncError::Usage(format!("layer id '{raw}': {e}")))
    }

    #[test]
    fn test_question_mark_keeps_error_class() {
        fn wrapper() -> Result<u64> {
            let id = parse_layer("abc")?;
            Ok(id + 1)
        }

        let err = wrapper().unwrap_err();
        assert!(matches!(err, SyncError::Usage(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
