use crate::error::{SchemeError, SchemeResult};
use crate::heap::Traced;
use crate::value::{EnvRef, ValueRef};

/// Contents of a root slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Root {
    Value(ValueRef),
    Env(EnvRef),
}

impl Root {
    fn traced(self) -> Traced {
        match self {
            Root::Value(v) => Traced::Value(v),
            Root::Env(e) => Traced::Env(e),
        }
    }
}

/// Position of a frame on the stack, returned by `push` and checked by `pop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameId(usize);

impl FrameId {
    pub fn depth(self) -> usize {
        self.0
    }
}

/// A registered local. The collector reads the slot's current contents, so
/// storing into it after registration is always visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootSlot {
    frame: usize,
    index: usize,
}

/// One nested evaluation.
#[derive(Debug, Default)]
pub struct Frame {
    pub env: Option<EnvRef>,
    pub expr: Option<ValueRef>,
    /// Result of the most recently completed nested evaluation.
    pub child_result: Option<ValueRef>,
    roots: Vec<Option<Root>>,
}

impl Frame {
    fn new(env: Option<EnvRef>, expr: Option<ValueRef>) -> Self {
        Frame {
            env,
            expr,
            child_result: None,
            roots: Vec::new(),
        }
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }
}

/// Explicit evaluation stack, pushed and popped in lock-step with
/// `Machine::evaluate`. Frame 0 is the root frame: it is never popped and
/// receives the result of each top-level evaluation.
#[derive(Debug)]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    pub fn new() -> Self {
        FrameStack {
            frames: vec![Frame::new(None, None)],
        }
    }

    /// Number of frames above the root frame.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn push(&mut self, env: EnvRef, expr: ValueRef) -> FrameId {
        self.frames.push(Frame::new(Some(env), Some(expr)));
        FrameId(self.frames.len() - 1)
    }

    /// Hand `result` to the parent frame's child-result slot and discard the
    /// frame along with its root slots. The frame must be the top one.
    pub fn pop(&mut self, id: FrameId, result: Option<ValueRef>) -> SchemeResult<()> {
        let top = self.frames.len() - 1;
        if id.0 == 0 {
            return Err(SchemeError::StackDiscipline(
                "attempted to pop the root frame".to_string(),
            ));
        }
        if id.0 != top {
            return Err(SchemeError::StackDiscipline(format!(
                "popped frame {} while frame {} is on top",
                id.0, top
            )));
        }
        self.frames[top - 1].child_result = result;
        self.frames.pop();
        Ok(())
    }

    pub fn top(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    pub fn root_frame(&self) -> &Frame {
        &self.frames[0]
    }

    /// Clear the root frame's roots and child result. Any frames still above
    /// it (left behind by an aborted evaluation) are discarded too.
    pub fn reset_root(&mut self) {
        self.frames.truncate(1);
        self.frames[0] = Frame::new(None, None);
    }

    /// Register an empty root slot in the top frame.
    pub fn register(&mut self) -> RootSlot {
        let frame = self.frames.len() - 1;
        let roots = &mut self.frames[frame].roots;
        roots.push(None);
        RootSlot {
            frame,
            index: roots.len() - 1,
        }
    }

    /// Register a slot already holding `v`.
    pub fn root_value(&mut self, v: ValueRef) -> RootSlot {
        let slot = self.register();
        self.set_value(slot, v);
        slot
    }

    pub fn set_value(&mut self, slot: RootSlot, v: ValueRef) {
        self.frames[slot.frame].roots[slot.index] = Some(Root::Value(v));
    }

    pub fn set_env(&mut self, slot: RootSlot, e: EnvRef) {
        self.frames[slot.frame].roots[slot.index] = Some(Root::Env(e));
    }

    pub fn value(&self, slot: RootSlot) -> Option<ValueRef> {
        match self.frames[slot.frame].roots[slot.index] {
            Some(Root::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Visit everything on the stack the collector must treat as reachable.
    pub fn for_each_root(&self, mut f: impl FnMut(Traced)) {
        for frame in &self.frames {
            if let Some(env) = frame.env {
                f(Traced::Env(env));
            }
            if let Some(expr) = frame.expr {
                f(Traced::Value(expr));
            }
            if let Some(child) = frame.child_result {
                f(Traced::Value(child));
            }
            for root in frame.roots.iter().flatten() {
                f(root.traced());
            }
        }
    }
}

impl Default for FrameStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_delivers_result_to_parent() {
        let mut stack = FrameStack::new();
        let outer = stack.push(EnvRef(0), ValueRef(1));
        let inner = stack.push(EnvRef(0), ValueRef(2));
        assert_eq!(stack.depth(), 2);

        stack.pop(inner, Some(ValueRef(7))).unwrap();
        assert_eq!(stack.top().child_result, Some(ValueRef(7)));
        stack.pop(outer, Some(ValueRef(8))).unwrap();
        assert_eq!(stack.root_frame().child_result, Some(ValueRef(8)));
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn out_of_order_pop_is_a_violation() {
        let mut stack = FrameStack::new();
        let outer = stack.push(EnvRef(0), ValueRef(1));
        let _inner = stack.push(EnvRef(0), ValueRef(2));
        let err = stack.pop(outer, None).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, SchemeError::StackDiscipline(_)));
    }

    #[test]
    fn root_frame_cannot_be_popped() {
        let mut stack = FrameStack::new();
        let err = stack.pop(FrameId(0), None).unwrap_err();
        assert!(matches!(err, SchemeError::StackDiscipline(_)));
    }

    #[test]
    fn roots_see_latest_contents_and_die_with_their_frame() {
        let mut stack = FrameStack::new();
        let frame = stack.push(EnvRef(3), ValueRef(4));
        let slot = stack.register();
        assert_eq!(stack.value(slot), None);
        stack.set_value(slot, ValueRef(10));
        stack.set_value(slot, ValueRef(11));
        let env_slot = stack.register();
        stack.set_env(env_slot, EnvRef(5));

        let mut seen = Vec::new();
        stack.for_each_root(|t| seen.push(t));
        assert!(seen.contains(&Traced::Value(ValueRef(11))));
        assert!(!seen.contains(&Traced::Value(ValueRef(10))));
        assert!(seen.contains(&Traced::Env(EnvRef(5))));

        stack.pop(frame, None).unwrap();
        let mut after = Vec::new();
        stack.for_each_root(|t| after.push(t));
        assert!(after.is_empty());
    }

    #[test]
    fn reset_root_discards_abandoned_frames() {
        let mut stack = FrameStack::new();
        stack.push(EnvRef(0), ValueRef(1));
        stack.push(EnvRef(0), ValueRef(2));
        stack.reset_root();
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.root_frame().child_result, None);
        assert_eq!(stack.root_frame().root_count(), 0);
    }
}
