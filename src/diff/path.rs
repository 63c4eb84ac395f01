use std::fmt;
use std::str::FromStr;

use crate::Error;
use crate::Result;

/// One step of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Struct field or mapping key
    Field(String),
    /// Ordered-sequence element
    Index(usize),
}

/// Dotted/indexed address of a field, e.g. `Services[0].Hooks` or `DataSource.cache`
///
/// The empty path addresses the whole value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidPath {
            path: raw.to_string(),
            message: message.to_string(),
        };

        let mut segments = Vec::new();
        let mut chars = raw.chars().peekable();
        let mut field = String::new();
        // True right after a '.', where a field name is mandatory
        let mut expect_field = false;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if field.is_empty() {
                        if segments.is_empty() || expect_field {
                            return Err(invalid("empty field name"));
                        }
                    } else {
                        segments.push(PathSegment::Field(std::mem::take(&mut field)));
                    }
                    expect_field = true;
                }
                '[' => {
                    if !field.is_empty() {
                        segments.push(PathSegment::Field(std::mem::take(&mut field)));
                    } else if expect_field {
                        return Err(invalid("empty field name"));
                    }
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            Some(_) => return Err(invalid("index must be a non-negative integer")),
                            None => return Err(invalid("unclosed '['")),
                        }
                    }
                    let index = digits.parse::<usize>().map_err(|_| invalid("empty index"))?;
                    segments.push(PathSegment::Index(index));
                    expect_field = false;
                    if let Some(next) = chars.peek() {
                        if *next != '.' && *next != '[' {
                            return Err(invalid("expected '.' or '[' after index"));
                        }
                    }
                }
                ']' => return Err(invalid("unexpected ']'")),
                _ => {
                    field.push(c);
                    expect_field = false;
                }
            }
        }

        if expect_field {
            return Err(invalid("trailing '.'"));
        }
        if !field.is_empty() {
            segments.push(PathSegment::Field(field));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn child(
        &self,
        name: impl Into<String>,
    ) -> Self {
        let mut path = self.clone();
        path.segments.push(PathSegment::Field(name.into()));
        path
    }

    pub fn index(
        &self,
        index: usize,
    ) -> Self {
        let mut path = self.clone();
        path.segments.push(PathSegment::Index(index));
        path
    }

    /// True when `self` equals `other` or is one of its ancestors
    pub fn is_prefix_of(
        &self,
        other: &FieldPath,
    ) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Remainder of `self` below `prefix`, if `prefix` is a strict ancestor
    pub fn strip_prefix(
        &self,
        prefix: &FieldPath,
    ) -> Option<FieldPath> {
        let rest = self.segments.strip_prefix(prefix.segments.as_slice())?;
        if rest.is_empty() {
            return None;
        }
        Some(FieldPath { segments: rest.to_vec() })
    }

    pub(crate) fn push(
        &mut self,
        segment: PathSegment,
    ) {
        self.segments.push(segment);
    }

    pub(crate) fn pop(&mut self) {
        self.segments.pop();
    }
}

impl fmt::Display for FieldPath {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Field(name) if i == 0 => write!(f, "{name}")?,
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
