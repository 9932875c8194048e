//! MQTT topic filter validation and topic matching.
//!
//! Filters are validated once when a subscription list is submitted; matching
//! then runs for every incoming PUBLISH against every registered filter, so it
//! works on raw bytes in a single pass.

use core::fmt;

/// Maximum topic name/filter length in bytes (UTF-8 encoded).
pub const MAX_TOPIC_LENGTH: usize = 65535;

const LEVEL_SEPARATOR: u8 = b'/';
const SINGLE_LEVEL_WILDCARD: u8 = b'+';
const MULTI_LEVEL_WILDCARD: u8 = b'#';

/// Error type for topic validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicValidationError {
    /// Topic is empty (zero length).
    Empty,
    /// Topic exceeds maximum length.
    TooLong,
    /// Topic name contains a null character.
    ContainsNullChar,
    /// Topic name contains `+` or `#`.
    WildcardInTopicName,
    /// Single-level wildcard (+) must occupy entire level.
    InvalidSingleLevelWildcard,
    /// Multi-level wildcard (#) must be at end and occupy entire level.
    InvalidMultiLevelWildcard,
}

impl fmt::Display for TopicValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicValidationError::Empty => write!(f, "topic cannot be empty"),
            TopicValidationError::TooLong => {
                write!(f, "topic exceeds maximum length of {} bytes", MAX_TOPIC_LENGTH)
            }
            TopicValidationError::ContainsNullChar => {
                write!(f, "topic name cannot contain null character")
            }
            TopicValidationError::WildcardInTopicName => {
                write!(f, "wildcard characters (+, #) not allowed in topic names")
            }
            TopicValidationError::InvalidSingleLevelWildcard => {
                write!(f, "single-level wildcard (+) must occupy entire topic level")
            }
            TopicValidationError::InvalidMultiLevelWildcard => {
                write!(
                    f,
                    "multi-level wildcard (#) must be at end and occupy entire level"
                )
            }
        }
    }
}

impl std::error::Error for TopicValidationError {}

/// Validate a topic name carried by a PUBLISH, in either direction.
///
/// Topic names must not be empty, must fit in a 16-bit length prefix, and
/// may contain neither null characters nor wildcards.
///
/// # Examples
///
/// ```
/// use courier_core::topic::validate_topic_name;
///
/// assert!(validate_topic_name("sensors/temperature/room1").is_ok());
/// assert!(validate_topic_name("sensors/+/room1").is_err());
/// ```
pub fn validate_topic_name(topic_name: &str) -> Result<(), TopicValidationError> {
    if topic_name.is_empty() {
        return Err(TopicValidationError::Empty);
    }

    if topic_name.len() > MAX_TOPIC_LENGTH {
        return Err(TopicValidationError::TooLong);
    }

    if topic_name.contains('\0') {
        return Err(TopicValidationError::ContainsNullChar);
    }

    if topic_name.contains(|c: char| c == '+' || c == '#') {
        return Err(TopicValidationError::WildcardInTopicName);
    }

    Ok(())
}

/// Validate a topic filter for subscribing.
///
/// Topic filters must not be empty, must fit in a 16-bit length prefix, and
/// must place wildcards on whole levels:
/// - `+` is preceded by `/` unless first, and followed by `/` unless last
/// - `#` is the last character and, unless standalone, preceded by `/`
///
/// # Examples
///
/// ```
/// use courier_core::topic::validate_topic_filter;
///
/// assert!(validate_topic_filter("sensors/+/room1").is_ok());
/// assert!(validate_topic_filter("sensors/#").is_ok());
/// assert!(validate_topic_filter("sensors/temp+/room1").is_err());
/// assert!(validate_topic_filter("sensors/#/room1").is_err());
/// ```
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicValidationError> {
    if filter.is_empty() {
        return Err(TopicValidationError::Empty);
    }

    if filter.len() > MAX_TOPIC_LENGTH {
        return Err(TopicValidationError::TooLong);
    }

    let bytes = filter.as_bytes();
    let last = bytes.len() - 1;

    for (i, &c) in bytes.iter().enumerate() {
        match c {
            SINGLE_LEVEL_WILDCARD => {
                if i > 0 && bytes[i - 1] != LEVEL_SEPARATOR {
                    return Err(TopicValidationError::InvalidSingleLevelWildcard);
                }

                if i < last && bytes[i + 1] != LEVEL_SEPARATOR {
                    return Err(TopicValidationError::InvalidSingleLevelWildcard);
                }
            }
            MULTI_LEVEL_WILDCARD => {
                if i != last {
                    return Err(TopicValidationError::InvalidMultiLevelWildcard);
                }

                if i > 0 && bytes[i - 1] != LEVEL_SEPARATOR {
                    return Err(TopicValidationError::InvalidMultiLevelWildcard);
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Checks whether `topic_name` is covered by `filter`.
///
/// With `exact_only` the two are compared byte for byte, which is how a
/// literal filter is looked up in a subscription list. Otherwise `+` consumes
/// exactly one level and a trailing `#` consumes the rest of the topic,
/// including no levels at all (`aws/#` matches `aws`).
///
/// The filter is assumed to have passed [`validate_topic_filter`].
///
/// # Examples
///
/// ```
/// use courier_core::topic::topic_matches;
///
/// assert!(topic_matches("/+", "/aws", false));
/// assert!(!topic_matches("/+", "aws", false));
/// assert!(topic_matches("aws/#", "aws", false));
/// assert!(!topic_matches("aws/+", "aws/iot", true));
/// ```
pub fn topic_matches(filter: &str, topic_name: &str, exact_only: bool) -> bool {
    if exact_only {
        return filter.as_bytes() == topic_name.as_bytes();
    }

    let filter = filter.as_bytes();
    let name = topic_name.as_bytes();

    let (mut f, mut n) = (0, 0);

    while f < filter.len() && n < name.len() {
        if filter[f] == name[n] {
            f += 1;
            n += 1;
            continue;
        }

        match filter[f] {
            SINGLE_LEVEL_WILDCARD => {
                while n < name.len() && name[n] != LEVEL_SEPARATOR {
                    n += 1;
                }

                f += 1;
            }
            MULTI_LEVEL_WILDCARD => return is_level_wildcard(filter, f),
            _ => return false,
        }
    }

    if n < name.len() {
        return false;
    }

    // The topic name is used up; whatever is left of the filter may only
    // match zero remaining characters.
    match &filter[f..] {
        [] => true,
        [LEVEL_SEPARATOR, MULTI_LEVEL_WILDCARD] => true,
        [SINGLE_LEVEL_WILDCARD] | [MULTI_LEVEL_WILDCARD] => is_level_wildcard(filter, f),
        _ => false,
    }
}

/// A wildcard at `index` only stands for a level when it starts one.
fn is_level_wildcard(filter: &[u8], index: usize) -> bool {
    let at_level_start = index == 0 || filter[index - 1] == LEVEL_SEPARATOR;

    match filter[index] {
        MULTI_LEVEL_WILDCARD => at_level_start && index + 1 == filter.len(),
        _ => at_level_start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_topic_filters() {
        assert!(validate_topic_filter("a").is_ok());
        assert!(validate_topic_filter("a/b/c").is_ok());
        assert!(validate_topic_filter("+").is_ok());
        assert!(validate_topic_filter("+/+/+").is_ok());
        assert!(validate_topic_filter("sensors/+/room1").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("sensors/#").is_ok());
        assert!(validate_topic_filter("+/#").is_ok());
        assert!(validate_topic_filter("/").is_ok());
        assert!(validate_topic_filter("/+").is_ok());
        assert!(validate_topic_filter("/#").is_ok());
        assert!(validate_topic_filter("aws//+").is_ok());
    }

    #[test]
    fn test_topic_filter_empty() {
        assert_eq!(validate_topic_filter(""), Err(TopicValidationError::Empty));
    }

    #[test]
    fn test_topic_filter_too_long() {
        let long_filter = "a".repeat(MAX_TOPIC_LENGTH + 1);
        assert_eq!(
            validate_topic_filter(&long_filter),
            Err(TopicValidationError::TooLong)
        );

        let max_filter = "a".repeat(MAX_TOPIC_LENGTH);
        assert!(validate_topic_filter(&max_filter).is_ok());
    }

    #[test]
    fn test_topic_filter_invalid_single_wildcard() {
        for filter in ["a+", "+a", "a/b+", "a/+b/c", "++", "/+a"] {
            assert_eq!(
                validate_topic_filter(filter),
                Err(TopicValidationError::InvalidSingleLevelWildcard),
                "{}",
                filter
            );
        }
    }

    #[test]
    fn test_topic_filter_invalid_multi_wildcard() {
        for filter in ["a#", "#/a", "a/#/b", "a/b#", "##"] {
            assert_eq!(
                validate_topic_filter(filter),
                Err(TopicValidationError::InvalidMultiLevelWildcard),
                "{}",
                filter
            );
        }
    }

    #[test]
    fn test_topic_names() {
        assert!(validate_topic_name("a").is_ok());
        assert!(validate_topic_name("/leading/slash").is_ok());
        assert!(validate_topic_name("$SYS/broker/clients").is_ok());
        assert!(validate_topic_name(&"t".repeat(MAX_TOPIC_LENGTH)).is_ok());

        assert_eq!(validate_topic_name(""), Err(TopicValidationError::Empty));
        assert_eq!(
            validate_topic_name(&"t".repeat(MAX_TOPIC_LENGTH + 4)),
            Err(TopicValidationError::TooLong)
        );
        assert_eq!(
            validate_topic_name("a\0b"),
            Err(TopicValidationError::ContainsNullChar)
        );

        for name in ["a/+/c", "a/+x/c", "#", "a/b#"] {
            assert_eq!(
                validate_topic_name(name),
                Err(TopicValidationError::WildcardInTopicName),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_exact_match_is_byte_equality() {
        assert!(topic_matches("/exact", "/exact", true));
        assert!(!topic_matches("/+", "/aws", true));
        assert!(topic_matches("/+", "/+", true));
        assert!(!topic_matches("/exact", "/ExAcT", true));
    }

    #[test]
    fn test_wildcard_matches() {
        let cases = [
            ("/exact", "/exact"),
            ("/+", "/aws"),
            ("/aws/+", "/aws/iot"),
            ("/aws/+/shadow", "/aws/iot/shadow"),
            ("/aws/+/+", "/aws/iot/shadow"),
            ("aws/+", "aws/"),
            ("+/+", "/aws"),
            ("aws/+/iot", "aws//iot"),
            ("aws//+", "aws//iot"),
            ("aws/+/+/iot", "aws///iot"),
            ("#", "/aws/iot/shadow"),
            ("#", "aws"),
            ("/#", "/aws/iot/shadow"),
            ("aws/iot/#", "aws/iot/shadow"),
            ("aws/iot/#", "aws/iot/shadow/thing"),
            ("aws/#", "aws"),
            ("aws/+/shadow/#", "aws/iot/shadow/thing/temp"),
        ];

        for (filter, name) in cases {
            assert!(topic_matches(filter, name, false), "{} / {}", filter, name);
        }
    }

    #[test]
    fn test_wildcard_mismatches() {
        let cases = [
            ("/toolong", "/short"),
            ("/exact", "/ExAcT"),
            ("aws/iot", "aws/"),
            ("aws/", "aws"),
            ("aws/+", "aws/iot/shadow"),
            ("aws/+/thing", "aws/iot/shadow"),
            ("+", "/aws"),
            ("/+", "aws"),
            ("iot/#", "aws/iot/shadow"),
            ("/#", "aws/iot"),
            ("iot/+/#", "aws/iot/shadow"),
            ("sport/+", "sport"),
        ];

        for (filter, name) in cases {
            assert!(!topic_matches(filter, name, false), "{} / {}", filter, name);
        }
    }
}
