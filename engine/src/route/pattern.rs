//! Topic patterns and the mediator's routing table.
//!
//! Patterns are dot-separated segments matched against a topic's segments:
//!
//! | segment   | matches                                     |
//! |-----------|---------------------------------------------|
//! | `orders`  | exactly the segment `orders`                |
//! | `*`       | exactly one segment                         |
//! | `#`       | zero or more trailing segments (last only)  |
//!
//! When several patterns match a topic, the most specific one wins. Specificity compares,
//! in order: the number of literal segments, then the number of `*` segments, then whether
//! the pattern is anchored (has no trailing `#`). More is more specific in each case.
//! Two matching patterns with equal specificity are ambiguous.

use std::{cmp::Ordering, fmt, str::FromStr};

use crate::{
    error::{ConfigurationError, RouteError},
    event::Topic,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(Box<str>),
    Any,
    Tail,
}

/// A parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    text: Box<str>,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parses and validates a pattern.
    pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
        if text.is_empty() {
            return Err(ConfigurationError::EmptyPattern);
        }

        let parts: Vec<&str> = text.split('.').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (index, part) in parts.into_iter().enumerate() {
            let segment = match part {
                "" => {
                    return Err(ConfigurationError::EmptySegment {
                        pattern: text.to_owned(),
                    });
                }
                "*" => Segment::Any,
                "#" if index == last => Segment::Tail,
                "#" => {
                    return Err(ConfigurationError::MisplacedTail {
                        pattern: text.to_owned(),
                    });
                }
                _ if part.contains(['*', '#']) => {
                    return Err(ConfigurationError::MixedSegment {
                        pattern: text.to_owned(),
                        segment: part.to_owned(),
                    });
                }
                _ => Segment::Literal(part.into()),
            };
            segments.push(segment);
        }

        Ok(Self {
            text: text.into(),
            segments,
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns `true` if `topic` matches this pattern.
    pub fn matches(&self, topic: &Topic) -> bool {
        let mut parts = topic.segments();

        for segment in &self.segments {
            match segment {
                Segment::Tail => return true,
                Segment::Any => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(literal) => {
                    if parts.next() != Some(&**literal) {
                        return false;
                    }
                }
            }
        }

        parts.next().is_none()
    }

    pub fn specificity(&self) -> Specificity {
        let mut specificity = Specificity {
            literals: 0,
            wildcards: 0,
            anchored: true,
        };
        for segment in &self.segments {
            match segment {
                Segment::Literal(_) => specificity.literals += 1,
                Segment::Any => specificity.wildcards += 1,
                Segment::Tail => specificity.anchored = false,
            }
        }
        specificity
    }
}

impl FromStr for Pattern {
    type Err = ConfigurationError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// How specific a pattern is. Greater is more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Specificity {
    literals: usize,
    wildcards: usize,
    anchored: bool,
}

/// One entry of a routing table: events whose topic matches `pattern` go to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pattern: Pattern,
    specificity: Specificity,
    target: Topic,
}

impl Route {
    #[inline]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    #[inline]
    pub fn target(&self) -> &Topic {
        &self.target
    }
}

/// A validated, immutable routing table.
#[derive(Debug, Clone)]
pub struct Table {
    routes: Vec<Route>,
    targets: Vec<Topic>,
}

impl Table {
    /// Validates `(pattern, target)` pairs into a table.
    ///
    /// Fails if the table is empty, any pattern is malformed or declared twice, or any target
    /// is empty.
    pub fn new<I, S, T>(routes: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut table = Self {
            routes: Vec::new(),
            targets: Vec::new(),
        };

        for (pattern, target) in routes {
            let pattern = Pattern::parse(pattern.as_ref())?;
            let target = target.as_ref();

            if target.is_empty() {
                return Err(ConfigurationError::EmptyTarget {
                    pattern: pattern.as_str().to_owned(),
                });
            }
            if table.routes.iter().any(|route| route.pattern == pattern) {
                return Err(ConfigurationError::DuplicatePattern {
                    pattern: pattern.as_str().to_owned(),
                });
            }

            let target = Topic::new(target);
            if !table.targets.contains(&target) {
                table.targets.push(target.clone());
            }
            table.routes.push(Route {
                specificity: pattern.specificity(),
                pattern,
                target,
            });
        }

        if table.routes.is_empty() {
            return Err(ConfigurationError::EmptyTable);
        }

        Ok(table)
    }

    /// Routes in declaration order.
    #[inline]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Distinct targets in order of first declaration.
    #[inline]
    pub fn targets(&self) -> &[Topic] {
        &self.targets
    }

    /// Finds the single most specific route matching `topic`.
    pub fn resolve(&self, topic: &Topic) -> Result<&Route, RouteError> {
        let mut best: Option<&Route> = None;
        let mut tied: Vec<&Route> = Vec::new();

        for route in self.routes.iter().filter(|route| route.pattern.matches(topic)) {
            let Some(current) = best else {
                best = Some(route);
                continue;
            };
            match route.specificity.cmp(&current.specificity) {
                Ordering::Greater => {
                    best = Some(route);
                    tied.clear();
                }
                Ordering::Equal => tied.push(route),
                Ordering::Less => {}
            }
        }

        match best {
            None => Err(RouteError::NoRoute {
                topic: topic.clone(),
            }),
            Some(route) if tied.is_empty() => Ok(route),
            Some(route) => Err(RouteError::AmbiguousRoute {
                topic: topic.clone(),
                patterns: std::iter::once(route)
                    .chain(tied)
                    .map(|route| route.pattern.as_str().to_owned())
                    .collect(),
            }),
        }
    }
}
