//! Lexical scopes and local slot allocation.
//!
//! Every unit that owns locals gets a [`Scope`]. Block scopes stack on top
//! of the scope of their defining method or script; a lookup walks the
//! stack innermost first and stops after the first scope that is not a
//! block, counting the block boundaries it crosses.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Script,
    Method,
    Block,
    /// Class, module or singleton-class body.
    Body,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub slot: u32,
    pub parameter: bool,
    /// Only meaningful for parameters.
    pub required: bool,
    pub assigned: bool,
    /// Referenced from a nested block.
    pub captured: bool,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    vars: Vec<Variable>,
}

impl Scope {
    pub fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            vars: Vec::new(),
        }
    }

    /// Slot of `name`, allocating the next one on first declaration.
    pub fn declare(&mut self, name: &str) -> u32 {
        if let Some(v) = self.vars.iter().find(|v| v.name == name) {
            return v.slot;
        }
        let slot = self.vars.len() as u32;
        self.vars.push(Variable {
            name: name.to_string(),
            slot,
            parameter: false,
            required: false,
            assigned: false,
            captured: false,
        });
        slot
    }

    pub fn declare_parameter(&mut self, name: &str, required: bool) -> u32 {
        let slot = self.declare(name);
        let v = &mut self.vars[slot as usize];
        v.parameter = true;
        v.required = required;
        slot
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.vars.iter_mut().find(|v| v.name == name)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Local names in slot order.
    pub fn finalize(self) -> Vec<String> {
        self.vars.into_iter().map(|v| v.name).collect()
    }
}

/// Where a name resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub slot: u32,
    /// Block boundaries crossed; 0 means the innermost scope.
    pub depth: u32,
}

/// The scopes active during one compilation, innermost last.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new(root: ScopeKind) -> Self {
        Self {
            scopes: vec![Scope::new(root)],
        }
    }

    pub fn push(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope::new(kind));
    }

    /// Remove the innermost scope. The root scope is never popped.
    pub fn pop(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    pub fn current(&self) -> &Scope {
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Look `name` up from the innermost scope outwards.
    ///
    /// A miss with `allow_create` declares the name in the innermost
    /// scope; a miss without it leaves every scope untouched.
    pub fn resolve(&mut self, name: &str, allow_create: bool) -> Option<Resolved> {
        let mut depth = 0;
        for scope in self.scopes.iter_mut().rev() {
            if let Some(var) = scope.get_mut(name) {
                if depth > 0 {
                    var.captured = true;
                }
                return Some(Resolved {
                    slot: var.slot,
                    depth,
                });
            }
            if scope.kind != ScopeKind::Block {
                break;
            }
            depth += 1;
        }
        if !allow_create {
            return None;
        }
        let slot = self.current_mut().declare(name);
        Some(Resolved { slot, depth: 0 })
    }

    /// Resolve for a read, declaring the name on a miss.
    pub fn lookup(&mut self, name: &str) -> Resolved {
        match self.resolve(name, true) {
            Some(r) => r,
            None => Resolved {
                slot: self.current_mut().declare(name),
                depth: 0,
            },
        }
    }

    /// Resolve for a store, marking the variable assigned.
    pub fn resolve_assign(&mut self, name: &str) -> Resolved {
        let resolved = self.lookup(name);
        let owner = self.scopes.len() - 1 - resolved.depth as usize;
        if let Some(var) = self.scopes[owner].get_mut(name) {
            var.assigned = true;
        }
        resolved
    }
}
