//! lexical scope tracking for the reference walk
//!
//! A [ScopeStack] is a stack of [Frame]s. Each frame maps variable names (including `.` for the
//! implicit context and `$` for the root) to a [Binding]. Frames are pushed when entering a
//! control structure and popped on its `end`; [ScopeStack::scoped] keeps this symmetric.
use indexmap::IndexMap;

pub const DOT: &str = ".";
pub const ROOT: &str = "$";

/// What a name refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Binding {
    /// the root of the value tree
    Root,
    /// one element of the list (or map) at this canonical path
    ElementOf(String),
    /// exactly the value at this canonical path
    BoundTo(String),
    /// not statically known
    Dynamic,
}

impl Binding {
    /// Canonical base path for field access, `None` when not statically resolvable
    pub fn path(&self) -> Option<&str> {
        match self {
            Binding::Root => Some(""),
            Binding::BoundTo(path) => Some(path),
            Binding::ElementOf(_) | Binding::Dynamic => None,
        }
    }

    /// Binding for `base.steps`
    pub fn extend(&self, steps: &[String]) -> Binding {
        match self.path() {
            Some(base) => {
                let path = steps
                    .iter()
                    .fold(base.to_string(), |path, step| crate::tree::join(&path, step));
                if path.is_empty() {
                    Binding::Root
                } else {
                    Binding::BoundTo(path)
                }
            }
            None if steps.is_empty() => self.clone(),
            None => Binding::Dynamic,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Frame {
    bindings: IndexMap<String, Binding>,
    /// lookups do not continue into enclosing frames
    isolated: bool,
}

impl Frame {
    /// A frame that rebinds the implicit context
    pub fn with_dot(dot: Binding) -> Self {
        let mut frame = Self::default();
        frame.bindings.insert(DOT.to_string(), dot);
        frame
    }

    /// A frame that hides everything outside of it, as used for `define` bodies
    pub fn isolated(dot: Binding) -> Self {
        let mut frame = Self::with_dot(dot.clone());
        frame.bindings.insert(ROOT.to_string(), dot);
        frame.isolated = true;
        frame
    }

    pub fn bind(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.bindings.insert(name.into(), binding);
        self
    }
}

#[derive(Debug)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new(Binding::Root)
    }
}

impl ScopeStack {
    /// A stack with one base frame binding `.` and `$` to `root`
    pub fn new(root: Binding) -> Self {
        Self {
            frames: vec![Frame::isolated(root)],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// # Panics
    /// Popping the base frame is a bug in the walk
    pub fn pop(&mut self) -> Frame {
        assert!(self.frames.len() > 1, "attempt to pop the base scope frame");
        self.frames.pop().expect("checked above")
    }

    /// Run `f` inside `frame`; the stack is back at its entry depth afterwards
    pub fn scoped<R>(&mut self, frame: Frame, f: impl FnOnce(&mut Self) -> R) -> R {
        let depth = self.depth();
        self.push(frame);
        let result = f(self);
        self.pop();
        assert_eq!(self.depth(), depth, "unbalanced scope stack");
        result
    }

    /// Innermost visible binding of `name`
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        for frame in self.frames.iter().rev() {
            if let Some(binding) = frame.bindings.get(name) {
                return Some(binding);
            }
            if frame.isolated {
                break;
            }
        }
        None
    }

    pub fn dot(&self) -> &Binding {
        self.lookup(DOT)
            .expect("every isolated frame binds the implicit context")
    }

    /// `$x := ...` adds to the innermost frame
    pub fn declare(&mut self, name: impl Into<String>, binding: Binding) {
        self.frames
            .last_mut()
            .expect("stack always has a base frame")
            .bindings
            .insert(name.into(), binding);
    }

    /// `$x = ...` updates the innermost visible frame that has `name`
    ///
    /// Returns false when `name` is not visible
    pub fn assign(&mut self, name: &str, binding: Binding) -> bool {
        for frame in self.frames.iter_mut().rev() {
            if let Some(existing) = frame.bindings.get_mut(name) {
                *existing = binding;
                return true;
            }
            if frame.isolated {
                break;
            }
        }
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn push_pop_symmetry() {
        let mut stack = ScopeStack::default();
        let depth = stack.depth();

        stack.scoped(Frame::with_dot(Binding::BoundTo("a".into())), |stack| {
            assert_eq!(stack.dot(), &Binding::BoundTo("a".into()));
            stack.scoped(Frame::default(), |stack| {
                assert_eq!(stack.depth(), depth + 2);
            });
        });

        assert_eq!(stack.depth(), depth);
        assert_eq!(stack.dot(), &Binding::Root);
    }

    #[test]
    #[should_panic(expected = "attempt to pop the base scope frame")]
    fn popping_base_frame_panics() {
        ScopeStack::default().pop();
    }

    #[test]
    fn variables_end_with_their_frame() {
        let mut stack = ScopeStack::default();
        stack.scoped(Frame::default(), |stack| {
            stack.declare("$x", Binding::BoundTo("items".into()));
            assert!(stack.lookup("$x").is_some());
        });
        assert_eq!(stack.lookup("$x"), None);
    }

    #[test]
    fn assign_updates_outer_frame() {
        let mut stack = ScopeStack::default();
        stack.declare("$x", Binding::Root);
        stack.scoped(Frame::default(), |stack| {
            assert!(stack.assign("$x", Binding::Dynamic));
            assert!(!stack.assign("$missing", Binding::Dynamic));
        });
        assert_eq!(stack.lookup("$x"), Some(&Binding::Dynamic));
    }

    #[test]
    fn isolated_frames_hide_outer_variables() {
        let mut stack = ScopeStack::default();
        stack.declare("$x", Binding::Root);
        stack.scoped(Frame::isolated(Binding::Dynamic), |stack| {
            assert_eq!(stack.lookup("$x"), None);
            assert_eq!(stack.lookup(ROOT), Some(&Binding::Dynamic));
        });
    }

    #[test]
    fn extend_bindings() {
        let steps = vec!["b".to_string(), "c".to_string()];
        assert_eq!(Binding::Root.extend(&steps), Binding::BoundTo("b.c".into()));
        assert_eq!(
            Binding::BoundTo("a".into()).extend(&steps),
            Binding::BoundTo("a.b.c".into())
        );
        assert_eq!(Binding::ElementOf("a".into()).extend(&steps), Binding::Dynamic);
        assert_eq!(Binding::Root.extend(&[]), Binding::Root);
    }
}
