//! The static type system used by the type-check and memory-layout passes.
//!
//! Internally every pass matches on the [`Type`] enum directly; `Display` is
//! the only place a type becomes a string, and it follows the diagnostic
//! conventions used for function signatures and error messages (`"integer"`,
//! `"float"`, a class name, `"<base>[]"` for arrays, `"typeerror"` for the
//! error sentinel).

use std::fmt;

/// A static type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Integer,
    Float,
    Void,
    /// A user-defined class, named.
    Class(String),
    /// An array of some base type with one dimension per `[]` in the
    /// declaration. `None` means the dimension size wasn't given (only valid
    /// for an `fParam`'s leading dimension).
    Array(Box<Type>, Vec<Option<u32>>),
    /// The sentinel produced whenever an expression's type cannot be
    /// determined; propagates through the rest of an expression so a single
    /// root cause doesn't cascade into a wall of follow-on errors.
    TypeError,
}

impl Type {
    /// True for any non-`integer`/`float`/`typeerror` type: classes and
    /// arrays of classes are "class types" for member-access purposes.
    pub fn is_class_type(&self) -> bool {
        !matches!(self, Type::Integer | Type::Float | Type::TypeError)
    }

    /// The element type, stripping away any array dimensions.
    pub fn base(&self) -> &Type {
        match self {
            Type::Array(base, _) => base.base(),
            other => other,
        }
    }

    /// Size in bytes of one scalar value of this type (not multiplied by any
    /// array dimensions). `class_size` resolves a class name to its computed
    /// size; integer/float/void have fixed sizes.
    pub fn scalar_size(&self, class_size: impl Fn(&str) -> Option<u32>) -> u32 {
        match self {
            Type::Integer => 4,
            Type::Float => 8,
            Type::Void | Type::TypeError => 0,
            Type::Class(name) => class_size(name).unwrap_or(0),
            Type::Array(base, _) => base.scalar_size(class_size),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Integer => write!(f, "integer"),
            Type::Float => write!(f, "float"),
            Type::Void => write!(f, "void"),
            Type::Class(name) => write!(f, "{name}"),
            Type::TypeError => write!(f, "typeerror"),
            Type::Array(base, dims) => {
                write!(f, "{base}")?;
                for _ in dims {
                    write!(f, "[]")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_spec_conventions() {
        assert_eq!(Type::Integer.to_string(), "integer");
        assert_eq!(Type::Float.to_string(), "float");
        assert_eq!(Type::TypeError.to_string(), "typeerror");
        assert_eq!(Type::Class("Shape".into()).to_string(), "Shape");
        assert_eq!(
            Type::Array(Box::new(Type::Integer), vec![Some(3), Some(4)]).to_string(),
            "integer[][]"
        );
    }

    #[test]
    fn is_class_type_excludes_primitives_and_error() {
        assert!(!Type::Integer.is_class_type());
        assert!(!Type::Float.is_class_type());
        assert!(!Type::TypeError.is_class_type());
        assert!(Type::Class("Shape".into()).is_class_type());
    }

    #[test]
    fn scalar_size_uses_base_type() {
        let arr = Type::Array(Box::new(Type::Float), vec![Some(10)]);
        assert_eq!(arr.scalar_size(|_| None), 8);
        let cls = Type::Class("Point".into());
        assert_eq!(cls.scalar_size(|n| if n == "Point" { Some(8) } else { None }), 8);
    }
}
