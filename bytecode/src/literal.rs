use core::fmt;

use crate::method::CompiledMethod;

/// A constant referenced from the instruction stream by pool index.
#[derive(Debug, Clone)]
pub enum Literal {
    Symbol(String),
    String(String),
    Integer(i64),
    /// Decimal digits of an integer that does not fit `i64`.
    BigInteger(String),
    Float(f64),
    Regex { source: String, flags: u32 },
    /// A nested method, block or body compiled as its own unit.
    Method(Box<CompiledMethod>),
    /// Starts out nil; the code fills it in with `set_literal`.
    Cache,
}

impl Literal {
    pub fn symbol(name: impl Into<String>) -> Self {
        Literal::Symbol(name.into())
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Literal::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_method(&self) -> Option<&CompiledMethod> {
        match self {
            Literal::Method(m) => Some(m),
            _ => None,
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        use Literal::*;
        match (self, other) {
            (Symbol(a), Symbol(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (BigInteger(a), BigInteger(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (
                Regex {
                    source: a,
                    flags: fa,
                },
                Regex {
                    source: b,
                    flags: fb,
                },
            ) => a == b && fa == fb,
            (Method(a), Method(b)) => a == b,
            (Cache, Cache) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Symbol(s) => write!(f, ":{s}"),
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::Integer(i) => write!(f, "{i}"),
            Literal::BigInteger(s) => f.write_str(s),
            Literal::Float(x) => write!(f, "{x:?}"),
            Literal::Regex { source, flags } => {
                write!(f, "/{source}/")?;
                if *flags != 0 {
                    write!(f, "{flags}")?;
                }
                Ok(())
            }
            Literal::Method(m) => write!(f, "#<{} {}>", m.kind, m.name),
            Literal::Cache => f.write_str("#<cache>"),
        }
    }
}

/// Insertion-ordered literal pool.
///
/// Everything except nested methods and caches is deduplicated, so the
/// same symbol referenced twice shares one index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiteralPool {
    items: Vec<Literal>,
}

impl LiteralPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, lit: Literal) -> u32 {
        if !matches!(lit, Literal::Method(_) | Literal::Cache) {
            if let Some(i) = self.find(&lit) {
                return i;
            }
        }
        self.items.push(lit);
        (self.items.len() - 1) as u32
    }

    pub fn find(&self, lit: &Literal) -> Option<u32> {
        self.items.iter().position(|l| l == lit).map(|i| i as u32)
    }

    pub fn get(&self, idx: u32) -> Option<&Literal> {
        self.items.get(idx as usize)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Literal> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_values() {
        let mut pool = LiteralPool::new();
        let a = pool.add(Literal::symbol("foo"));
        let b = pool.add(Literal::String("foo".into()));
        let c = pool.add(Literal::symbol("foo"));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn floats_compare_by_bits() {
        let mut pool = LiteralPool::new();
        let a = pool.add(Literal::Float(0.0));
        let b = pool.add(Literal::Float(-0.0));
        let c = pool.add(Literal::Float(f64::NAN));
        let d = pool.add(Literal::Float(f64::NAN));
        assert_ne!(a, b);
        assert_eq!(c, d);
    }

    #[test]
    fn caches_are_never_shared() {
        let mut pool = LiteralPool::new();
        let a = pool.add(Literal::Cache);
        let b = pool.add(Literal::Cache);
        assert_ne!(a, b);
        assert_eq!(pool.get(b), Some(&Literal::Cache));
    }

    #[test]
    fn methods_always_append() {
        let mut pool = LiteralPool::new();
        let m = CompiledMethod::empty("x");
        let a = pool.add(Literal::Method(Box::new(m.clone())));
        let b = pool.add(Literal::Method(Box::new(m)));
        assert_ne!(a, b);
    }
}
