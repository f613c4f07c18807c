/// Resolution context for tracking locals, fields and their kinds
use super::ValueKind;
use crate::fragment::Field;
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Place {
    Local(u16),
    Field(u16),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub place: Place,
    pub kind: ValueKind,
}

#[derive(Debug)]
struct Scope {
    names: HashMap<String, Binding>,
    base_slot: usize,
}

/// Context maintained during resolution
///
/// The root scope holds `def` locals and lives for the whole method body;
/// every `let` pushes a scope whose slots are released when it is popped.
#[derive(Debug)]
pub struct ResolveContext {
    fields: HashMap<String, Binding>,
    scopes: Vec<Scope>,
    next_slot: usize,
    max_slots: usize,
}

impl ResolveContext {
    pub fn new(fields: &[Field]) -> Result<Self, String> {
        let mut bindings = HashMap::new();
        for (index, field) in fields.iter().enumerate() {
            let index = u16::try_from(index).map_err(|_| "too many host bindings".to_string())?;
            bindings.insert(
                field.name.clone(),
                Binding {
                    place: Place::Field(index),
                    kind: ValueKind::of(&field.init),
                },
            );
        }

        Ok(Self {
            fields: bindings,
            scopes: vec![Scope {
                names: HashMap::new(),
                base_slot: 0,
            }],
            next_slot: 0,
            max_slots: 0,
        })
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope {
            names: HashMap::new(),
            base_slot: self.next_slot,
        });
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "root scope must not be popped");
        if self.scopes.len() > 1 {
            if let Some(scope) = self.scopes.pop() {
                self.next_slot = scope.base_slot;
            }
        }
    }

    /// Declare a local in the innermost scope and return its slot
    pub fn declare_local(&mut self, name: &str, kind: ValueKind) -> Result<u16, String> {
        let slot = u16::try_from(self.next_slot).map_err(|_| "too many local variables".to_string())?;
        self.next_slot += 1;
        self.max_slots = self.max_slots.max(self.next_slot);

        let binding = Binding {
            place: Place::Local(slot),
            kind,
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.to_string(), binding);
        }
        Ok(slot)
    }

    /// Innermost local first, then host fields
    pub fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.names.get(name).copied())
            .or_else(|| self.fields.get(name).copied())
    }

    /// Number of local slots the method needs
    pub fn local_count(&self) -> usize {
        self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Value;

    #[test]
    fn locals_shadow_fields() {
        let fields = vec![Field {
            name: "x".to_string(),
            init: Value::Int(1),
        }];
        let mut context = ResolveContext::new(&fields).unwrap();
        assert_eq!(context.lookup("x").map(|b| b.place), Some(Place::Field(0)));

        context.push_scope();
        let slot = context.declare_local("x", ValueKind::String).unwrap();
        assert_eq!(context.lookup("x"), Some(Binding { place: Place::Local(slot), kind: ValueKind::String }));

        context.pop_scope();
        assert_eq!(context.lookup("x").map(|b| b.kind), Some(ValueKind::Number));
    }

    #[test]
    fn popped_slots_are_reused_but_counted_once() {
        let mut context = ResolveContext::new(&[]).unwrap();
        context.push_scope();
        assert_eq!(context.declare_local("a", ValueKind::Number), Ok(0));
        assert_eq!(context.declare_local("b", ValueKind::Number), Ok(1));
        context.pop_scope();
        context.push_scope();
        assert_eq!(context.declare_local("c", ValueKind::Number), Ok(0));
        context.pop_scope();
        assert_eq!(context.local_count(), 2);
        assert_eq!(context.lookup("a"), None);
    }
}
