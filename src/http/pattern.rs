//! Route patterns.
//!
//! A route is either a literal path or a structural matcher. Both are tested
//! through [`Pattern::matches`].

use std::{collections::HashMap, fmt::Debug, sync::Arc};

/// Named parts of a path captured by a structural pattern.
pub type Captures = HashMap<String, String>;

/// Something which can match a path structurally.
pub trait PathMatcher: Send + Sync + Debug {
    /// Returns the captures if the path matches.
    fn matches(&self, path: &str) -> Option<Captures>;
}

/// How a route selects paths.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// The path must equal this exactly.
    Literal(String),

    /// The matcher decides.
    Structural(Arc<dyn PathMatcher>),
}

impl Pattern {
    /// A structural pattern from any matcher.
    pub fn structural(matcher: impl PathMatcher + 'static) -> Self {
        Self::Structural(Arc::new(matcher))
    }

    /// Match a path.
    /// Literal patterns capture nothing.
    pub fn matches(&self, path: &str) -> Option<Captures> {
        match self {
            Pattern::Literal(literal) => (literal == path).then(Captures::new),
            Pattern::Structural(matcher) => matcher.matches(path),
        }
    }

    /// Is this a [`Pattern::Structural`]?
    pub fn is_structural(&self) -> bool {
        matches!(self, Pattern::Structural(_))
    }
}

impl From<&str> for Pattern {
    fn from(literal: &str) -> Self {
        Self::Literal(literal.into())
    }
}

impl From<String> for Pattern {
    fn from(literal: String) -> Self {
        Self::Literal(literal)
    }
}

impl From<Template> for Pattern {
    fn from(template: Template) -> Self {
        Self::structural(template)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture {
        name: String,
        /// Empty means anything goes.
        allowed: Vec<String>,
    },
}

/// A path template such as `/set/{field}`.
///
/// `{name}` matches exactly one non-empty segment.
/// `{name:a|b}` only matches the segments `a` or `b`.
/// Everything else must match literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template.
    pub fn new(template: &str) -> Self {
        let segments = template
            .split('/')
            .map(|segment| {
                let Some(capture) = segment
                    .strip_prefix('{')
                    .and_then(|rest| rest.strip_suffix('}'))
                else {
                    return Segment::Literal(segment.into());
                };

                let (name, allowed) = match capture.split_once(':') {
                    Some((name, allowed)) => (
                        name,
                        allowed
                            .split('|')
                            .filter(|choice| !choice.is_empty())
                            .map(Into::into)
                            .collect(),
                    ),
                    None => (capture, vec![]),
                };

                if name.is_empty() {
                    Segment::Literal(segment.into())
                } else {
                    Segment::Capture {
                        name: name.into(),
                        allowed,
                    }
                }
            })
            .collect();

        Self { segments }
    }
}

impl PathMatcher for Template {
    fn matches(&self, path: &str) -> Option<Captures> {
        let parts = path.split('/').collect::<Vec<_>>();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut captures = Captures::new();

        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Capture { name, allowed }
                    if !part.is_empty()
                        && (allowed.is_empty() || allowed.iter().any(|choice| choice == part)) =>
                {
                    captures.insert(name.clone(), part.into());
                }
                _ => return None,
            }
        }

        Some(captures)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn literal_needs_equality() {
        let pattern = Pattern::from("/status");

        assert_eq!(pattern.matches("/status"), Some(Captures::new()));
        assert_eq!(pattern.matches("/status/"), None);
        assert_eq!(pattern.matches("/"), None);
        assert!(!pattern.is_structural());
    }

    #[test]
    fn template_captures_segments() {
        let pattern = Pattern::from(Template::new("/set/{field}/to/{value}"));

        let captures = pattern.matches("/set/gms/to/3").unwrap();

        assert_eq!(captures["field"], "gms");
        assert_eq!(captures["value"], "3");
        assert!(pattern.is_structural());
    }

    #[test]
    fn template_rejects_other_shapes() {
        let template = Template::new("/set/{field}");

        assert_eq!(template.matches("/set"), None);
        assert_eq!(template.matches("/set/"), None);
        assert_eq!(template.matches("/set/gms/extra"), None);
        assert_eq!(template.matches("/get/gms"), None);
    }

    #[test]
    fn template_alternatives_limit_a_capture() {
        let template = Template::new("/set/{field:gms|atc}");

        assert_eq!(template.matches("/set/gms").unwrap()["field"], "gms");
        assert_eq!(template.matches("/set/atc").unwrap()["field"], "atc");
        assert_eq!(template.matches("/set/hvg"), None);
        assert_eq!(template.matches("/set/gmsx"), None);
        assert_eq!(template.matches("/set/"), None);
    }

    #[test]
    fn custom_matchers() {
        #[derive(Debug)]
        struct Numeric;

        impl PathMatcher for Numeric {
            fn matches(&self, path: &str) -> Option<Captures> {
                let digits = path.strip_prefix('/')?;
                digits
                    .parse::<u32>()
                    .ok()
                    .map(|_| Captures::from([("n".to_owned(), digits.to_owned())]))
            }
        }

        let pattern = Pattern::structural(Numeric);

        assert_eq!(pattern.matches("/12").unwrap()["n"], "12");
        assert_eq!(pattern.matches("/x"), None);
    }
}
