// src/spec/parse.rs

//! Parser for the textual spec syntax
//!
//! Grammar: `name[@version][+variant|~variant|variant=value]*[%compiler[@version]][^dep-spec]*`
//!
//! Sigil parts may be glued (`hdf5@>=1.12+mpi%gcc@12`) or whitespace
//! separated (`hdf5 +mpi %gcc`). Whitespace-separated `-variant` disables a
//! variant; inside a token `-` is an ordinary name character. `arch=<target>`
//! sets the target field. Every `^` introduces a dependency constraint
//! attached to the root spec.

use crate::error::{Error, Result};
use crate::variant::{VariantConstraint, VariantValue};
use crate::version::VersionConstraint;

use super::{CompilerConstraint, DepRequest, Spec};

/// Parse a complete spec string, including `^` dependency constraints
pub fn parse_spec(input: &str) -> Result<Spec> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::Parse("empty spec string".to_string()));
    }

    let mut segments = input.split('^');
    let root_text = segments.next().unwrap_or_default();
    let mut root = parse_node(root_text)?;

    for dep_text in segments {
        let dep = parse_node(dep_text)?;
        root.deps.push(DepRequest::new(dep));
    }

    Ok(root)
}

/// Parse one node's worth of spec text (no `^` inside)
fn parse_node(text: &str) -> Result<Spec> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::Parse("empty spec segment".to_string()));
    }

    let mut spec: Option<Spec> = None;

    for word in text.split_whitespace() {
        let mut cursor = Cursor::new(word);

        if spec.is_none() {
            let name = cursor.take_name();
            if name.is_empty() {
                return Err(Error::Parse(format!("spec must start with a package name: '{}'", text)));
            }
            spec = Some(Spec::named(name));
        } else if cursor.peek() == Some('-') {
            // Whitespace-separated disable form: `-variant`
            cursor.advance();
            let name = cursor.take_name();
            if name.is_empty() || !cursor.at_end() {
                return Err(Error::Parse(format!("invalid variant token '{}'", word)));
            }
            set_variant(spec.as_mut().unwrap(), name, VariantConstraint::Bool(false))?;
            continue;
        } else if !word.starts_with(['@', '+', '~', '%']) && !word.contains('=') {
            return Err(Error::Parse(format!("unexpected token '{}' in spec", word)));
        }

        let spec = spec.as_mut().unwrap();
        parse_parts(&mut cursor, spec)?;
    }

    spec.ok_or_else(|| Error::Parse(format!("no package name in '{}'", text)))
}

/// Consume sigil-delimited parts from the cursor into the spec
fn parse_parts(cursor: &mut Cursor, spec: &mut Spec) -> Result<()> {
    loop {
        match cursor.peek() {
            None => return Ok(()),
            Some('@') => {
                cursor.advance();
                let text = cursor.take_until(&['+', '~', '%']);
                if text.is_empty() {
                    return Err(Error::Parse(format!(
                        "missing version after '@' on {}",
                        spec.name
                    )));
                }
                spec.version = spec.version.intersect(&VersionConstraint::parse(text)?);
            }
            Some('+') => {
                cursor.advance();
                let name = cursor.take_name();
                if name.is_empty() {
                    return Err(Error::Parse("missing variant name after '+'".to_string()));
                }
                set_variant(spec, name, VariantConstraint::Bool(true))?;
            }
            Some('~') => {
                cursor.advance();
                let name = cursor.take_name();
                if name.is_empty() {
                    return Err(Error::Parse("missing variant name after '~'".to_string()));
                }
                set_variant(spec, name, VariantConstraint::Bool(false))?;
            }
            Some('%') => {
                cursor.advance();
                let name = cursor.take_name();
                if name.is_empty() {
                    return Err(Error::Parse("missing compiler name after '%'".to_string()));
                }
                let version = if cursor.peek() == Some('@') {
                    cursor.advance();
                    VersionConstraint::parse(cursor.take_until(&['+', '~', '%']))?
                } else {
                    VersionConstraint::Any
                };
                if spec.compiler.is_some() {
                    return Err(Error::Parse(format!(
                        "duplicate compiler constraint on {}",
                        spec.name
                    )));
                }
                spec.compiler = Some(CompilerConstraint { name, version });
            }
            Some(_) => {
                // `name=value` variant assignment, or `arch=<target>`
                let name = cursor.take_name();
                if cursor.peek() != Some('=') || name.is_empty() {
                    return Err(Error::Parse(format!(
                        "unexpected text '{}' in spec",
                        cursor.rest()
                    )));
                }
                cursor.advance();
                let value = cursor.take_until(&['+', '~', '%']);
                if value.is_empty() {
                    return Err(Error::Parse(format!("missing value for '{}='", name)));
                }
                if name == "arch" || name == "target" {
                    spec.target = Some(value.to_string());
                } else {
                    let parsed = VariantValue::parse(value)?;
                    let constraint = match parsed {
                        VariantValue::Multi(set) => VariantConstraint::Includes(set),
                        VariantValue::Single(v) => VariantConstraint::Value(v),
                        VariantValue::Bool(_) => unreachable!("parse never yields Bool"),
                    };
                    set_variant(spec, name, constraint)?;
                }
            }
        }
    }
}

fn set_variant(spec: &mut Spec, name: String, constraint: VariantConstraint) -> Result<()> {
    if let Some(existing) = spec.variants.get(&name) {
        if existing != &constraint {
            return Err(Error::Parse(format!(
                "conflicting constraints for variant '{}' on {}",
                name, spec.name
            )));
        }
    }
    spec.variants.insert(name, constraint);
    Ok(())
}

/// Simple character cursor over one whitespace-free token
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    /// Consume name characters (alphanumeric plus `-`, `_`, `.`)
    fn take_name(&mut self) -> String {
        let rest = self.rest();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(rest.len());
        self.pos += end;
        rest[..end].to_string()
    }

    /// Consume characters until one of the given sigils
    fn take_until(&mut self, stops: &[char]) -> &'a str {
        let rest = self.rest();
        let end = rest.find(|c: char| stops.contains(&c)).unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_bare_name() {
        let spec = parse_spec("zlib").unwrap();
        assert_eq!(spec.name, "zlib");
        assert!(spec.version.is_any());
        assert!(spec.deps.is_empty());
    }

    #[test]
    fn test_parse_version_constraint() {
        let spec = parse_spec("zlib@>=1.2").unwrap();
        assert!(spec.version.satisfies(&v("1.2.13")));
        assert!(!spec.version.satisfies(&v("1.1")));
    }

    #[test]
    fn test_parse_glued_variants_and_compiler() {
        let spec = parse_spec("hdf5@>=1.12+mpi~fortran%gcc@12").unwrap();
        assert_eq!(spec.name, "hdf5");
        assert_eq!(
            spec.variants.get("mpi"),
            Some(&VariantConstraint::Bool(true))
        );
        assert_eq!(
            spec.variants.get("fortran"),
            Some(&VariantConstraint::Bool(false))
        );
        let compiler = spec.compiler.unwrap();
        assert_eq!(compiler.name, "gcc");
        assert!(compiler.version.satisfies(&v("12")));
    }

    #[test]
    fn test_parse_value_variant_and_arch() {
        let spec = parse_spec("cmake build_type=Release arch=x86_64").unwrap();
        assert_eq!(
            spec.variants.get("build_type"),
            Some(&VariantConstraint::Value("Release".to_string()))
        );
        assert_eq!(spec.target.as_deref(), Some("x86_64"));
    }

    #[test]
    fn test_parse_multi_value_variant() {
        let spec = parse_spec("gcc languages=c,cxx,fortran").unwrap();
        match spec.variants.get("languages") {
            Some(VariantConstraint::Includes(set)) => {
                assert_eq!(set.len(), 3);
                assert!(set.contains("fortran"));
            }
            other => panic!("unexpected constraint: {:?}", other),
        }
    }

    #[test]
    fn test_parse_whitespace_disable() {
        let spec = parse_spec("hdf5 -mpi").unwrap();
        assert_eq!(
            spec.variants.get("mpi"),
            Some(&VariantConstraint::Bool(false))
        );
    }

    #[test]
    fn test_parse_dependencies() {
        let spec = parse_spec("trilinos+mpi ^openmpi@>=4 ^zlib@1.2.13").unwrap();
        assert_eq!(spec.deps.len(), 2);
        assert_eq!(spec.deps[0].spec.name, "openmpi");
        assert!(spec.deps[0].spec.version.satisfies(&v("4.1.5")));
        assert_eq!(spec.deps[1].spec.name, "zlib");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_spec("").is_err());
        assert!(parse_spec("@1.2").is_err());
        assert!(parse_spec("zlib@").is_err());
        assert!(parse_spec("zlib +").is_err());
        assert!(parse_spec("zlib %gcc %clang").is_err());
        assert!(parse_spec("zlib stray").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for text in [
            "zlib@>=1.2",
            "hdf5+mpi~fortran",
            "trilinos+mpi ^openmpi@>=4 ^zlib",
        ] {
            let spec = parse_spec(text).unwrap();
            let reparsed = parse_spec(&spec.to_string()).unwrap();
            assert_eq!(spec, reparsed);
        }
    }
}
