//! Generator functions and the per-run table of default generators.
//!
//! A generator is anything that can turn a [`Source`] into a value. Plain
//! functions and closures of the shape `Fn(&mut Source) -> Draw<T>` already
//! are generators, so user-defined and built-in generators compose freely.

use crate::error::Draw;
use crate::source::Source;

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait Generator<T> {
    fn generate(&self, source: &mut Source) -> Draw<T>;
}

impl<T, F> Generator<T> for F
where
    F: Fn(&mut Source) -> Draw<T>,
{
    fn generate(&self, source: &mut Source) -> Draw<T> {
        self(source)
    }
}

/// A generator that can sit in a shared registry.
pub type SharedGenerator<T> = Arc<dyn Fn(&mut Source) -> Draw<T> + Send + Sync>;

/// Explicit lookup table from a type to the generator used for it.
///
/// Built once before any trial starts and handed to each Source behind an
/// `Arc`; Sources never mutate it.
#[derive(Default)]
pub struct GeneratorRegistry {
    generators: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    names: Vec<&'static str>,
}

impl GeneratorRegistry {
    pub fn new() -> GeneratorRegistry {
        GeneratorRegistry::default()
    }

    /// A registry with generators for the primitive types and `String`.
    pub fn with_defaults() -> GeneratorRegistry {
        let mut registry = GeneratorRegistry::new();
        registry
            .register(|s: &mut Source| s.get_bool())
            .register(|s: &mut Source| s.get_i8(..))
            .register(|s: &mut Source| s.get_i16(..))
            .register(|s: &mut Source| s.get_i32(..))
            .register(|s: &mut Source| s.get_i64(..))
            .register(|s: &mut Source| s.get_u8(..))
            .register(|s: &mut Source| s.get_u16(..))
            .register(|s: &mut Source| s.get_u32(..))
            .register(|s: &mut Source| s.get_u64(..))
            .register(|s: &mut Source| s.get_real_f32(..))
            .register(|s: &mut Source| s.get_real_f64(..))
            .register(|s: &mut Source| s.get_char())
            .register(|s: &mut Source| s.get_string(..));
        registry
    }

    /// Registers (or replaces) the generator for `T`.
    pub fn register<T: 'static>(
        &mut self,
        generator: impl Fn(&mut Source) -> Draw<T> + Send + Sync + 'static,
    ) -> &mut Self {
        let shared: SharedGenerator<T> = Arc::new(generator);
        if self
            .generators
            .insert(TypeId::of::<T>(), Box::new(shared))
            .is_none()
        {
            self.names.push(type_name::<T>());
        }
        self
    }

    pub fn get<T: 'static>(&self) -> Option<SharedGenerator<T>> {
        self.generators
            .get(&TypeId::of::<T>())
            .and_then(|generator| generator.downcast_ref::<SharedGenerator<T>>())
            .cloned()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.generators.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("types", &self.names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        x: i8,
        y: i8,
    }

    fn point(source: &mut Source) -> Draw<Point> {
        Ok(Point {
            x: source.get_i8(..)?,
            y: source.get_i8(..)?,
        })
    }

    #[test]
    fn functions_are_generators() {
        let mut source = Source::from_bytes(vec![1, 2]);
        assert_eq!(point.generate(&mut source).unwrap(), Point { x: 1, y: 2 });
    }

    #[test]
    fn defaults_cover_primitives() {
        let registry = GeneratorRegistry::with_defaults();
        assert!(registry.contains::<i32>());
        assert!(registry.contains::<String>());
        assert!(!registry.contains::<Point>());
        assert_eq!(registry.len(), 13);
    }

    #[test]
    fn registered_generators_are_looked_up_by_type() {
        let mut registry = GeneratorRegistry::new();
        registry.register(point);
        let generator = registry.get::<Point>().unwrap();
        let mut source = Source::from_bytes(vec![0xff, 0x7f]);
        assert_eq!(generator(&mut source).unwrap(), Point { x: -1, y: 127 });
        assert!(registry.get::<i32>().is_none());
    }

    #[test]
    fn reregistering_replaces() {
        let mut registry = GeneratorRegistry::new();
        registry.register(|_: &mut Source| Ok(1u8));
        registry.register(|_: &mut Source| Ok(2u8));
        assert_eq!(registry.len(), 1);
        let mut source = Source::from_bytes(vec![]);
        assert_eq!(registry.get::<u8>().unwrap()(&mut source).unwrap(), 2);
    }
}
