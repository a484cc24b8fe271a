//! The value and control stacks used by function-body validation.
//!
//! [Spec]: https://webassembly.github.io/spec/core/appendix/algorithm.html

use {
    super::{ValidationError, ValidationType},
    crate::module::types::{RefType, ValueType},
};

type Result<T> = std::result::Result<T, ValidationError>;

/// The kind of structured construct a control frame belongs to. Branches to a
/// `Loop` frame target its parameter types; branches to any other frame
/// target its result types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Block,
    Loop,
    If,
    Else,
    Function,
}

#[derive(Debug, PartialEq)]
pub struct CtrlFrame {
    pub kind:        FrameKind,
    pub start_types: Vec<ValueType>,
    pub end_types:   Vec<ValueType>,
    pub height:      usize,
    pub unreachable: bool,
}

/// The combined validation stacks. Popping below the current frame's entry
/// height is an underflow, unless the frame is marked unreachable, in which
/// case the pop yields a polymorphic [ValidationType::Unknown].
#[derive(Debug, Default)]
pub struct Stacks {
    vals:  Vec<ValueType>,
    ctrls: Vec<CtrlFrame>,
}

impl Stacks {
    pub fn new() -> Stacks {
        Stacks::default()
    }

    pub fn push_val(&mut self, val: ValueType) {
        self.vals.push(val);
    }

    /// Push a sequence of types, first item deepest.
    pub fn push_vals(&mut self, vals: &[ValueType]) {
        self.vals.extend_from_slice(vals);
    }

    fn pop_any_inner(&mut self) -> Result<ValidationType> {
        let frame = self.peek_ctrl()?;
        if self.vals.len() == frame.height {
            return if frame.unreachable {
                Ok(ValidationType::Unknown)
            } else {
                Err(ValidationError::ValStackUnderflow)
            };
        }
        let val = self.vals.pop().ok_or(ValidationError::ValStackUnderflow)?;
        Ok(ValidationType::Value(val))
    }

    pub fn pop_any(&mut self) -> Result<ValidationType> {
        self.pop_any_inner()
    }

    pub fn pop_val(&mut self, expect: ValueType) -> Result<ValidationType> {
        let actual = self.pop_any_inner()?;
        match actual {
            ValidationType::Unknown => Ok(ValidationType::Value(expect)),
            ValidationType::Value(actual) if actual == expect => Ok(ValidationType::Value(actual)),
            actual => Err(ValidationError::TypeMismatch {
                actual,
                expect: ValidationType::Value(expect),
            }),
        }
    }

    pub fn pop_ref(&mut self) -> Result<Option<RefType>> {
        match self.pop_any_inner()? {
            ValidationType::Unknown => Ok(None),
            ValidationType::Value(ValueType::Ref(rt)) => Ok(Some(rt)),
            actual => Err(ValidationError::ExpectedRef { actual }),
        }
    }

    /// Pop a sequence of types, last item first.
    pub fn pop_vals(&mut self, vals: &[ValueType]) -> Result<()> {
        for v in vals.iter().rev() {
            self.pop_val(*v)?;
        }
        Ok(())
    }

    pub fn push_ctrl(
        &mut self,
        kind: FrameKind,
        start_types: Vec<ValueType>,
        end_types: Vec<ValueType>,
    ) {
        self.push_vals(&start_types);
        let frame = CtrlFrame {
            kind,
            start_types,
            end_types,
            height: self.vals.len(),
            unreachable: false,
        };
        self.ctrls.push(frame);
    }

    pub fn pop_ctrl(&mut self) -> Result<CtrlFrame> {
        let frame = self.peek_ctrl()?;
        let end_types = frame.end_types.clone();
        let height = frame.height;
        self.pop_vals(&end_types)?;
        if self.vals.len() != height {
            return Err(ValidationError::UnusedValues);
        }
        self.ctrls.pop().ok_or(ValidationError::CtrlStackUnderflow)
    }

    pub fn peek_ctrl(&self) -> Result<&CtrlFrame> {
        self.ctrls.last().ok_or(ValidationError::CtrlStackUnderflow)
    }

    pub fn ctrl_depth(&self) -> usize {
        self.ctrls.len()
    }

    /// The types a branch to the label at `depth` must provide: the frame's
    /// parameter types for a loop, its result types otherwise.
    pub fn label_types(&self, depth: u32) -> Result<Vec<ValueType>> {
        let frame = self
            .ctrls
            .len()
            .checked_sub(1 + depth as usize)
            .and_then(|i| self.ctrls.get(i))
            .ok_or(ValidationError::UnknownLabel(depth))?;
        Ok(if frame.kind == FrameKind::Loop {
            frame.start_types.clone()
        } else {
            frame.end_types.clone()
        })
    }

    /// The function frame's result types, targeted by `return`.
    pub fn return_types(&self) -> Result<Vec<ValueType>> {
        let frame = self
            .ctrls
            .first()
            .ok_or(ValidationError::CtrlStackUnderflow)?;
        Ok(frame.end_types.clone())
    }

    /// Mark the current frame unreachable and discard its known values; the
    /// stack is polymorphic until the frame's `else` or `end`.
    pub fn unreachable(&mut self) -> Result<()> {
        let frame = self
            .ctrls
            .last_mut()
            .ok_or(ValidationError::CtrlStackUnderflow)?;
        self.vals.truncate(frame.height);
        frame.unreachable = true;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::module::types::{I32, I64},
    };

    #[test]
    fn underflow_is_an_error_when_reachable() {
        let mut stacks = Stacks::new();
        stacks.push_ctrl(FrameKind::Function, vec![], vec![]);
        assert_eq!(
            stacks.pop_val(I32).unwrap_err(),
            ValidationError::ValStackUnderflow
        );
    }

    #[test]
    fn underflow_is_polymorphic_when_unreachable() {
        let mut stacks = Stacks::new();
        stacks.push_ctrl(FrameKind::Function, vec![], vec![]);
        stacks.unreachable().unwrap();
        assert_eq!(
            stacks.pop_val(I32).unwrap(),
            ValidationType::Value(I32)
        );
        assert_eq!(stacks.pop_any().unwrap(), ValidationType::Unknown);
    }

    #[test]
    fn loop_labels_target_params() {
        let mut stacks = Stacks::new();
        stacks.push_ctrl(FrameKind::Function, vec![], vec![I64]);
        stacks.push_ctrl(FrameKind::Loop, vec![I32], vec![I64]);
        assert_eq!(stacks.label_types(0).unwrap(), vec![I32]);
        assert_eq!(stacks.label_types(1).unwrap(), vec![I64]);
        assert!(stacks.label_types(2).is_err());
    }

    #[test]
    fn pop_ctrl_rejects_leftover_values() {
        let mut stacks = Stacks::new();
        stacks.push_ctrl(FrameKind::Block, vec![], vec![]);
        stacks.push_val(I32);
        assert_eq!(
            stacks.pop_ctrl().unwrap_err(),
            ValidationError::UnusedValues
        );
    }
}
