use crate::bitset::VarMask;
use crate::common::{Name, NumTy, Result};
use crate::types::TypeRefMask;

use hashbrown::HashMap;

use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

/// A variable of one routine. Handles are handed out densely, in order of first use, and are only
/// meaningful to the [FlowContext] that issued them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarHandle(pub(crate) NumTy);

impl VarHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Routine-wide flow information.
///
/// The merged arrays accumulate every type a variable has been given in any flow state of the
/// routine, across every pass. They only grow until the routine is invalidated.
#[derive(Debug, Clone)]
pub struct FlowContext {
    id: NumTy,
    handles: HashMap<Name, VarHandle>,
    names: Vec<Name>,
    merged: Vec<TypeRefMask>,
    return_type: TypeRefMask,
    used: VarMask,
    refs: VarMask,
    statics: HashMap<VarHandle, TypeRefMask>,
}

impl Default for FlowContext {
    fn default() -> FlowContext {
        FlowContext::new()
    }
}

impl FlowContext {
    pub fn new() -> FlowContext {
        FlowContext {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            handles: Default::default(),
            names: Default::default(),
            merged: Default::default(),
            return_type: TypeRefMask::VOID,
            used: VarMask::empty(),
            refs: VarMask::empty(),
            statics: Default::default(),
        }
    }

    /// Identifies this context; flow states remember the context they were created for.
    pub fn id(&self) -> NumTy {
        self.id
    }

    pub fn get_or_create_handle(&mut self, name: &Name) -> VarHandle {
        if let Some(h) = self.handles.get(name) {
            return *h;
        }
        let h = VarHandle(self.names.len() as NumTy);
        self.names.push(name.clone());
        self.merged.push(TypeRefMask::VOID);
        self.handles.insert(name.clone(), h);
        h
    }

    pub fn handle(&self, name: &str) -> Option<VarHandle> {
        self.handles.get(name).cloned()
    }

    pub fn num_vars(&self) -> usize {
        self.names.len()
    }

    fn check(&self, h: VarHandle) -> Result<()> {
        if h.index() >= self.names.len() {
            return err!(
                "variable handle {} out of range for flow context {} ({} variables)",
                h.0,
                self.id,
                self.names.len()
            );
        }
        Ok(())
    }

    pub fn name(&self, h: VarHandle) -> Result<&Name> {
        self.check(h)?;
        Ok(&self.names[h.index()])
    }

    /// Accumulates `mask` into the routine-wide type of `h`. Returns true if it grew.
    pub fn merge_in(&mut self, h: VarHandle, mask: TypeRefMask) -> Result<bool> {
        self.check(h)?;
        let slot = &mut self.merged[h.index()];
        let next = *slot | mask;
        let changed = next != *slot;
        *slot = next;
        Ok(changed)
    }

    pub fn merged_type(&self, h: VarHandle) -> Result<TypeRefMask> {
        self.check(h)?;
        Ok(self.merged[h.index()])
    }

    pub fn mark_used(&mut self, h: VarHandle) -> Result<()> {
        self.check(h)?;
        self.used.set(h.index());
        Ok(())
    }

    /// Untracked variables count as used.
    pub fn is_used(&self, h: VarHandle) -> bool {
        self.used.get(h.index())
    }

    pub fn set_reference(&mut self, h: VarHandle) -> Result<()> {
        self.check(h)?;
        self.refs.set(h.index());
        Ok(())
    }

    /// Whether `h` may be aliased (a by-reference parameter, a global, or a static). Untracked
    /// variables may always be aliased.
    pub fn is_reference(&self, h: VarHandle) -> bool {
        self.refs.get(h.index())
    }

    /// Accumulates the type of a returned value. Returns true if the return type grew.
    pub fn merge_return(&mut self, mask: TypeRefMask) -> bool {
        let next = self.return_type | mask;
        let changed = next != self.return_type;
        self.return_type = next;
        changed
    }

    pub fn return_type(&self) -> TypeRefMask {
        self.return_type
    }

    /// Accumulates the type of a static variable. Returns true if the variable was already
    /// declared and its type grew.
    pub fn merge_static(&mut self, h: VarHandle, mask: TypeRefMask) -> Result<bool> {
        self.check(h)?;
        self.refs.set(h.index());
        Ok(match self.statics.get_mut(&h) {
            Some(t) => {
                let next = *t | mask;
                let changed = next != *t;
                *t = next;
                changed
            }
            None => {
                self.statics.insert(h, mask);
                false
            }
        })
    }

    pub fn static_type(&self, h: VarHandle) -> Option<TypeRefMask> {
        self.statics.get(&h).cloned()
    }

    /// Forget everything learned about this routine. Handles stay valid.
    pub fn invalidate(&mut self) {
        for m in self.merged.iter_mut() {
            *m = TypeRefMask::VOID;
        }
        self.return_type = TypeRefMask::VOID;
        self.used = VarMask::empty();
        self.statics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_stable_and_dense() {
        let mut ctx = FlowContext::new();
        let x = ctx.get_or_create_handle(&"x".into());
        let y = ctx.get_or_create_handle(&"y".into());
        assert_eq!(ctx.get_or_create_handle(&"x".into()), x);
        assert_eq!((x.index(), y.index()), (0, 1));
        assert_eq!(ctx.handle("y"), Some(y));
        assert_eq!(ctx.handle("z"), None);
        assert_eq!(&**ctx.name(y).unwrap(), "y");
    }

    #[test]
    fn merged_types_only_grow() {
        let mut ctx = FlowContext::new();
        let x = ctx.get_or_create_handle(&"x".into());
        assert!(ctx.merge_in(x, TypeRefMask::LONG).unwrap());
        assert!(!ctx.merge_in(x, TypeRefMask::LONG).unwrap());
        assert!(ctx.merge_in(x, TypeRefMask::NULL).unwrap());
        assert_eq!(
            ctx.merged_type(x).unwrap(),
            TypeRefMask::LONG | TypeRefMask::NULL
        );
        ctx.invalidate();
        assert!(ctx.merged_type(x).unwrap().is_void());
        assert_eq!(ctx.handle("x"), Some(x));
    }

    #[test]
    fn foreign_handles_are_internal_errors() {
        let mut a = FlowContext::new();
        let b = FlowContext::new();
        assert_ne!(a.id(), b.id());
        let h = a.get_or_create_handle(&"x".into());
        let err = b.merged_type(h).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn statics_report_growth_after_declaration() {
        let mut ctx = FlowContext::new();
        let s = ctx.get_or_create_handle(&"s".into());
        assert!(!ctx.merge_static(s, TypeRefMask::LONG).unwrap());
        assert!(ctx.is_reference(s));
        assert!(!ctx.merge_static(s, TypeRefMask::LONG).unwrap());
        assert!(ctx.merge_static(s, TypeRefMask::STRING).unwrap());
    }
}
