//! Execution cursor.

/// Correlates the step currently being invoked with its position in the
/// owning workflow's history log.
///
/// The cursor advances exactly once per step invocation, cache hit or
/// miss alike, so that during replay the Nth invoked step always lines up
/// with the Nth recorded entry. It starts at zero on every execution pass
/// and is never persisted.
#[derive(Debug, Clone, Default)]
pub struct ExecutionCursor {
  sequence: usize,
}

impl ExecutionCursor {
  /// Create a cursor at position zero.
  pub fn new() -> Self {
    Self::default()
  }

  /// The number of steps the current pass has invoked so far.
  pub fn sequence(&self) -> usize {
    self.sequence
  }

  /// Claim the next history position, advancing the cursor.
  pub fn next(&mut self) -> usize {
    let position = self.sequence;
    self.sequence += 1;
    position
  }

  /// Reset to position zero for a fresh execution pass.
  pub fn reset(&mut self) {
    self.sequence = 0;
  }
}
